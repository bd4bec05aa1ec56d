//! Foreground looper process.
//!
//! Looper notifications go to stdout as JSON lines. Control commands are
//! read from stdin, one per line (`start`, `pause`, `increase 5`, `quit`).
//! `reload` re-reads the config file; `move <id>` picks the time point the
//! next `start` opens. Logs go to stderr. The process ends on `quit` or
//! Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use pomoloop_core::storage::LedgerStore;
use pomoloop_core::timer::TimePointId;
use pomoloop_core::{
    Config, ErrorNotices, Looper, LooperEvent, LooperRuntime, LooperService, SystemClock,
    TimePointQueue, TimePointSettings,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Args)]
pub struct RunArgs {
    /// Start the first time point immediately
    #[arg(long)]
    pub start: bool,
    /// Work item to record for (defaults to `current_work_id`)
    #[arg(long)]
    pub work: Option<i64>,
    /// Do not record anything to the ledger
    #[arg(long)]
    pub no_ledger: bool,
}

/// A control line read from stdin.
#[derive(Debug, PartialEq, Eq)]
enum Control {
    Start,
    Stop,
    Pause,
    Resume,
    Skip,
    Reset,
    Increase(u64),
    Reduce(u64),
    Work(Option<i64>),
    Move(TimePointId),
    Reload,
    Status,
    Quit,
}

fn parse_control(line: &str) -> Result<Control, String> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    let minutes = |arg: Option<&str>| -> Result<u64, String> {
        arg.ok_or_else(|| format!("{verb}: missing minutes"))?
            .parse::<u64>()
            .map_err(|e| format!("{verb}: {e}"))
    };
    let control = match verb {
        "start" => Control::Start,
        "stop" => Control::Stop,
        "pause" => Control::Pause,
        "resume" => Control::Resume,
        "skip" => Control::Skip,
        "reset" => Control::Reset,
        "increase" => Control::Increase(minutes(parts.next())?),
        "reduce" => Control::Reduce(minutes(parts.next())?),
        "work" => match parts.next() {
            None | Some("none") => Control::Work(None),
            Some(id) => Control::Work(Some(id.parse().map_err(|e| format!("work: {e}"))?)),
        },
        "move" => {
            let id = parts.next().ok_or("move: missing time point id")?;
            Control::Move(id.parse().map_err(|e| format!("move: {e}"))?)
        }
        "reload" => Control::Reload,
        "status" => Control::Status,
        "quit" | "exit" => Control::Quit,
        other => return Err(format!("unknown command: {other}")),
    };
    Ok(control)
}

/// Apply a control to the service. Returns false once the loop should end.
fn dispatch(service: &LooperService, control: Control) -> Result<bool, Box<dyn std::error::Error>> {
    let minutes = |m: u64| Duration::from_secs(m.saturating_mul(60));
    match control {
        Control::Start => service.start()?,
        Control::Stop => service.stop(),
        Control::Pause => service.pause()?,
        Control::Resume => service.resume()?,
        Control::Skip => service.skip()?,
        Control::Reset => service.reset()?,
        Control::Increase(m) => service.increase(minutes(m))?,
        Control::Reduce(m) => service.reduce(minutes(m))?,
        Control::Work(id) => service.set_work(id),
        Control::Move(id) => service.move_to(id)?,
        Control::Reload => reload(service)?,
        Control::Status => service.publish_snapshot(),
        Control::Quit => return Ok(false),
    }
    Ok(true)
}

/// Apply the cycle and looper settings from the config file.
fn reload(service: &LooperService) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    service.replace_time_points(config.time_points()?)?;
    service.set_wrap_around(config.looper.wrap_around);
    service.set_disable_skip_break(config.looper.disable_skip_break);
    service.publish_snapshot();
    info!("config reloaded");
    Ok(())
}

pub fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_async(args))
}

async fn run_async(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let time_points = config.time_points()?;
    let work_id = args.work.or(config.current_work_id);

    let store: Option<Arc<dyn LedgerStore>> = if args.no_ledger {
        None
    } else {
        Some(Arc::new(super::open_database(&config)?))
    };

    let queue = TimePointQueue::new(time_points).with_wrap_around(config.looper.wrap_around);
    let looper = Looper::new(queue)
        .with_disable_skip_break(config.looper.disable_skip_break)
        .with_work(work_id);
    let notices = ErrorNotices::default();
    let looper_runtime = LooperRuntime::spawn(
        looper,
        Arc::new(SystemClock),
        store,
        notices.clone(),
        Duration::from_millis(config.looper.tick_interval_ms),
    );
    let service = Arc::clone(looper_runtime.service());
    info!(work_id = ?work_id, "looper running");

    let forwarder = tokio::spawn(forward_events(service.subscribe()));

    if args.start {
        service.start()?;
    } else {
        service.publish_snapshot();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            line = lines.next_line(), if stdin_open => {
                let line = match line {
                    Ok(Some(line)) => line,
                    // Without stdin keep running until interrupted.
                    Ok(None) => {
                        stdin_open = false;
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to read stdin");
                        stdin_open = false;
                        continue;
                    }
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let keep_going = match parse_control(line) {
                    Ok(control) => dispatch(&service, control).unwrap_or_else(|e| {
                        warn!(command = line, error = %e, "command rejected");
                        true
                    }),
                    Err(e) => {
                        warn!(error = %e, "bad command");
                        true
                    }
                };
                if !keep_going {
                    break;
                }
            }
        }
    }

    looper_runtime.shutdown().await;
    drop(service);
    // The forwarder ends once every sender is gone.
    if let Err(e) = forwarder.await {
        warn!(error = %e, "event forwarder failed");
    }
    for notice in notices.drain() {
        eprintln!("error: {}", notice.message);
    }
    Ok(())
}

async fn forward_events(mut rx: tokio::sync::broadcast::Receiver<LooperEvent>) {
    let mut stdout = tokio::io::stdout();
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => {
                    let line = format!("{json}\n");
                    if let Err(e) = stdout.write_all(line.as_bytes()).await {
                        warn!(error = %e, "failed to write event; stopping forwarder");
                        break;
                    }
                    let _ = stdout.flush().await;
                }
                Err(e) => warn!(error = %e, "failed to serialize event"),
            },
            Err(RecvError::Lagged(n)) => warn!(lagged = n, "event forwarder lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

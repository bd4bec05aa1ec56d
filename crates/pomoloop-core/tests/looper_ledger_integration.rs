//! Integration tests for the looper, the ledger and replay.
//!
//! Drives the state machine with explicit timestamps, persists every record
//! it produces, and checks what replay makes of the stored stream.

use chrono::{DateTime, Duration, TimeZone, Utc};
use pomoloop_core::stats::{replay, Replay};
use pomoloop_core::storage::{ActiveTimePointRepository, WorkEventRepository, WorkRepository};
use pomoloop_core::timer::{LedgerRecord, Outcome};
use pomoloop_core::{
    Database, Kind, Looper, LooperEvent, LooperState, TimePoint, TimePointQueue, WorkEvent,
};
use tokio_util::sync::CancellationToken;

fn t(min: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap() + Duration::minutes(min)
}

fn cycle() -> Vec<TimePoint> {
    vec![
        TimePoint::new("Focus", Kind::Work, 25 * 60),
        TimePoint::new("Break", Kind::Break, 5 * 60),
    ]
}

fn persist(db: &Database, out: &Outcome) {
    let token = CancellationToken::new();
    for record in &out.records {
        match record {
            LedgerRecord::ActiveTimePoint(atp) => db.insert_active_time_point(atp, &token).unwrap(),
            LedgerRecord::WorkEvent { work_id, event } => {
                db.insert_event(*work_id, event, &token).unwrap();
            }
        }
    }
}

fn stored(db: &Database, work_id: i64) -> Vec<WorkEvent> {
    db.events_for_work(work_id)
        .unwrap()
        .into_iter()
        .map(|r| r.event)
        .collect()
}

fn setup() -> (Database, i64, Looper) {
    let db = Database::open_memory().unwrap();
    let work = db.create_work(Some("PL-1"), "Integration").unwrap();
    let looper = Looper::new(TimePointQueue::new(cycle())).with_work(Some(work.id));
    (db, work.id, looper)
}

#[test]
fn test_natural_expiry_opens_break_at_expiry_instant() {
    let (db, work, mut looper) = setup();

    persist(&db, &looper.start(t(0)).unwrap());
    persist(&db, &looper.tick(t(25)));

    assert_eq!(looper.queue().cursor(), 1);
    let events = stored(&db, work);
    assert_eq!(events.len(), 2);
    match &events[1] {
        WorkEvent::BreakStarted { at, time_point_name, .. } => {
            assert_eq!(*at, t(25));
            assert_eq!(time_point_name, "Break");
        }
        other => panic!("expected BreakStarted, got {other:?}"),
    }
    assert_eq!(db.active_time_points().unwrap().len(), 2);
}

#[test]
fn test_stop_after_ten_minutes_replays_to_ten_minutes() {
    let (db, work, mut looper) = setup();

    persist(&db, &looper.start(t(0)).unwrap());
    persist(&db, &looper.stop(t(10)));

    let report = replay(&stored(&db, work));
    assert_eq!(report.totals.work_ms, 10 * 60_000);
    assert!(report.inconsistencies.is_empty());
}

#[test]
fn test_pause_is_excluded_from_work_time() {
    let (db, work, mut looper) = setup();

    persist(&db, &looper.start(t(0)).unwrap());
    persist(&db, &looper.pause(t(5)).unwrap());
    persist(&db, &looper.resume(t(10)).unwrap());
    assert_eq!(looper.remaining_ms(t(10)), 20 * 60_000);
    persist(&db, &looper.stop(t(20)));

    let report = replay(&stored(&db, work));
    assert_eq!(report.totals.work_ms, 15 * 60_000);
    assert_eq!(report.intervals.len(), 1);
}

#[test]
fn test_skip_right_after_start_is_clean() {
    let (db, work, mut looper) = setup();

    persist(&db, &looper.start(t(0)).unwrap());
    persist(&db, &looper.skip(t(0)).unwrap());
    assert_eq!(looper.queue().cursor(), 1);
    assert_eq!(looper.active().unwrap().kind, Kind::Break);

    let report = replay(&stored(&db, work));
    assert_eq!(report.totals.work_ms, 0);
    assert!(report.inconsistencies.is_empty());
    assert!(report.intervals.iter().all(|i| i.ended_at.map_or(true, |e| e >= i.started_at)));
}

#[test]
fn test_reduce_beyond_remaining_clamps_to_zero() {
    let (db, work, mut looper) = setup();

    persist(&db, &looper.start(t(0)).unwrap());
    let out = looper.reduce(t(20), 60 * 60_000).unwrap();
    persist(&db, &out);
    assert_eq!(looper.remaining_ms(t(20)), 0);

    let events = stored(&db, work);
    assert!(matches!(
        events.last(),
        Some(WorkEvent::WorkReduced { delta_ms, .. }) if *delta_ms == 5 * 60_000
    ));

    let catalog = db.active_time_points().unwrap();
    let mut r = Replay::new().with_catalog(&catalog);
    r.apply_all(&events);
    let report = r.finish(Some(t(20)));
    assert_eq!(report.intervals[0].planned_ms, Some(20 * 60_000));
}

#[test]
fn test_long_suspend_catches_up_every_boundary() {
    let (db, work, mut looper) = setup();

    persist(&db, &looper.start(t(0)).unwrap());
    // Focus 25 + Break 5 + Focus 25 + Break 5, then 3 minutes into Focus.
    let out = looper.tick(t(63));
    persist(&db, &out);

    let started: Vec<DateTime<Utc>> = out.work_events().map(|e| e.at()).collect();
    assert_eq!(started, vec![t(25), t(30), t(55), t(60)]);
    assert_eq!(looper.queue().cursor(), 0);
    assert_eq!(looper.remaining_ms(t(63)), 22 * 60_000);

    let report = replay(&stored(&db, work));
    assert_eq!(report.totals.work_ms, 50 * 60_000);
    assert_eq!(report.totals.break_ms, 10 * 60_000);
}

#[test]
fn test_stop_preserves_cursor_and_reset_rewinds() {
    let (db, _work, mut looper) = setup();

    persist(&db, &looper.start(t(0)).unwrap());
    persist(&db, &looper.skip(t(1)).unwrap());
    persist(&db, &looper.stop(t(2)));
    assert_eq!(looper.state(), LooperState::Stopped);
    assert_eq!(looper.queue().cursor(), 1);

    let out = looper.start(t(3)).unwrap();
    match &out.notifications[0] {
        LooperEvent::TimePointStarted { active, .. } => {
            assert_eq!(active.kind, Kind::Break);
            assert_eq!(active.duration_ms, 5 * 60_000);
        }
        other => panic!("unexpected {other:?}"),
    }
    persist(&db, &out);
    persist(&db, &looper.stop(t(4)));

    looper.reset().unwrap();
    assert_eq!(looper.queue().cursor(), 0);
}

#[test]
fn test_switching_work_splits_the_interval() {
    let (db, first, mut looper) = setup();
    let second = db.create_work(None, "Second").unwrap().id;

    persist(&db, &looper.start(t(0)).unwrap());
    persist(&db, &looper.set_work(t(10), Some(second)));
    persist(&db, &looper.stop(t(15)));

    assert_eq!(replay(&stored(&db, first)).totals.work_ms, 10 * 60_000);
    assert_eq!(replay(&stored(&db, second)).totals.work_ms, 5 * 60_000);

    let a = stored(&db, first)[0].active_time_point_id();
    let b = stored(&db, second)[0].active_time_point_id();
    assert_eq!(a, b);
}

#[test]
fn test_no_work_selected_records_nothing() {
    let db = Database::open_memory().unwrap();
    let work = db.create_work(None, "Unused").unwrap();
    let mut looper = Looper::new(TimePointQueue::new(cycle()));

    let out = looper.start(t(0)).unwrap();
    assert_eq!(out.work_events().count(), 0);
    persist(&db, &out);
    persist(&db, &looper.stop(t(5)));
    assert!(stored(&db, work.id).is_empty());
}

#[test]
fn test_stop_after_missed_ticks_splits_work_and_break() {
    let (db, work, mut looper) = setup();

    persist(&db, &looper.start(t(0)).unwrap());
    persist(&db, &looper.stop(t(28)));

    let report = replay(&stored(&db, work));
    assert_eq!(report.totals.work_ms, 25 * 60_000);
    assert_eq!(report.totals.break_ms, 3 * 60_000);
    assert!(report.inconsistencies.is_empty());
}

#[test]
fn test_pause_resume_after_missed_ticks_charges_each_interval() {
    let (db, work, mut looper) = setup();

    persist(&db, &looper.start(t(0)).unwrap());
    persist(&db, &looper.pause(t(40)).unwrap());
    persist(&db, &looper.resume(t(41)).unwrap());
    persist(&db, &looper.tick(t(42)));
    persist(&db, &looper.stop(t(45)));

    let events = stored(&db, work);
    let names: Vec<(&str, DateTime<Utc>)> = events.iter().map(|e| (e.name(), e.at())).collect();
    assert_eq!(
        names,
        vec![
            ("WorkStarted", t(0)),
            ("BreakStarted", t(25)),
            ("WorkStarted", t(30)),
            ("Stopped", t(40)),
            ("WorkStarted", t(41)),
            ("Stopped", t(45)),
        ]
    );
    let report = replay(&events);
    // 25 + (40 - 30) + (45 - 41) minutes of work, 5 of break.
    assert_eq!(report.totals.work_ms, 39 * 60_000);
    assert_eq!(report.totals.break_ms, 5 * 60_000);
    assert_eq!(report.intervals.len(), 3);
}

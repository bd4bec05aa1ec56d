//! Compact cycle patterns.
//!
//! A pattern lists prototype aliases separated by `-`. Parenthesised groups
//! may carry a repeat count:
//!
//! ```text
//! (w-b)3-w-lb   =>  w b w b w b w lb
//! ```
//!
//! Whitespace is ignored. Aliases are looked up in the prototype list.

use std::collections::HashMap;

use uuid::Uuid;

use super::time_point::{TimePoint, TimePointPrototype};
use crate::error::ConfigError;

pub const DEFAULT_PATTERN: &str = "(w-b)3-w-lb";

/// Groups deeper than this are refused.
const MAX_DEPTH: usize = 8;
/// Expansions longer than this are refused.
const MAX_TIME_POINTS: usize = 512;

/// Expand a pattern into fresh time points.
///
/// Names are taken from the prototype; when an alias occurs more than once the
/// name gets a running number (`Focus 1`, `Focus 2`, ...).
///
/// # Errors
/// Returns `ConfigError::InvalidPattern` on syntax errors, unknown aliases,
/// zero repeat counts or oversized expansions.
pub fn expand(pattern: &str, prototypes: &[TimePointPrototype]) -> Result<Vec<TimePoint>, ConfigError> {
    let tokens: Vec<(usize, char)> = pattern
        .char_indices()
        .filter(|(_, c)| !c.is_whitespace())
        .collect();
    let mut parser = Parser {
        pattern,
        tokens: &tokens,
        pos: 0,
    };
    let aliases = parser.sequence(0)?;
    if let Some(&(at, c)) = tokens.get(parser.pos) {
        return Err(parser.error(at, format!("unexpected '{c}'")));
    }
    if aliases.is_empty() {
        return Err(parser.error(0, "pattern is empty".into()));
    }

    let mut totals: HashMap<&str, usize> = HashMap::new();
    for alias in &aliases {
        *totals.entry(alias.as_str()).or_default() += 1;
    }

    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut out = Vec::with_capacity(aliases.len());
    for alias in &aliases {
        let proto = prototypes
            .iter()
            .find(|p| p.alias == *alias)
            .ok_or_else(|| ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                position: 0,
                message: format!("unknown alias '{alias}'"),
            })?;
        let n = seen.entry(alias.as_str()).or_default();
        *n += 1;
        let name = if totals[alias.as_str()] > 1 {
            format!("{} {}", proto.name, n)
        } else {
            proto.name.clone()
        };
        out.push(TimePoint {
            id: Uuid::new_v4(),
            name,
            kind: proto.kind,
            alias: proto.alias.clone(),
            duration_secs: proto.duration_secs,
        });
    }
    Ok(out)
}

struct Parser<'a> {
    pattern: &'a str,
    tokens: &'a [(usize, char)],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.tokens.get(self.pos).map(|&(_, c)| c)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|&(at, _)| at)
            .unwrap_or(self.pattern.len())
    }

    fn error(&self, position: usize, message: String) -> ConfigError {
        ConfigError::InvalidPattern {
            pattern: self.pattern.to_string(),
            position,
            message,
        }
    }

    fn sequence(&mut self, depth: usize) -> Result<Vec<String>, ConfigError> {
        let mut out = self.item(depth)?;
        while self.peek() == Some('-') {
            self.pos += 1;
            out.extend(self.item(depth)?);
            if out.len() > MAX_TIME_POINTS {
                return Err(self.error(self.offset(), "pattern expands to too many time points".into()));
            }
        }
        Ok(out)
    }

    fn item(&mut self, depth: usize) -> Result<Vec<String>, ConfigError> {
        match self.peek() {
            Some('(') => {
                if depth >= MAX_DEPTH {
                    return Err(self.error(self.offset(), "groups nested too deeply".into()));
                }
                self.pos += 1;
                let inner = self.sequence(depth + 1)?;
                if self.peek() != Some(')') {
                    return Err(self.error(self.offset(), "expected ')'".into()));
                }
                self.pos += 1;
                let count = self.count()?;
                if inner.len().saturating_mul(count) > MAX_TIME_POINTS {
                    return Err(self.error(self.offset(), "pattern expands to too many time points".into()));
                }
                Ok(inner.iter().cloned().cycle().take(inner.len() * count).collect())
            }
            Some(c) if c.is_ascii_alphabetic() => {
                let mut alias = String::new();
                while let Some(c) = self.peek().filter(|c| c.is_ascii_alphanumeric()) {
                    alias.push(c);
                    self.pos += 1;
                }
                Ok(vec![alias])
            }
            Some(c) => Err(self.error(self.offset(), format!("unexpected '{c}'"))),
            None => Err(self.error(self.offset(), "unexpected end of pattern".into())),
        }
    }

    fn count(&mut self) -> Result<usize, ConfigError> {
        let start = self.offset();
        let mut digits = String::new();
        while let Some(c) = self.peek().filter(|c| c.is_ascii_digit()) {
            digits.push(c);
            self.pos += 1;
        }
        if digits.is_empty() {
            return Ok(1);
        }
        match digits.parse::<usize>() {
            Ok(0) => Err(self.error(start, "repeat count must be positive".into())),
            Ok(n) => Ok(n),
            Err(_) => Err(self.error(start, "repeat count is too large".into())),
        }
    }
}

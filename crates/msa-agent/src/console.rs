use std::num::NonZeroUsize;

use crate::error::{Result, SupervisorError};

/// Number of trailing console records to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleLimit(NonZeroUsize);

impl ConsoleLimit {
    pub fn new(n: usize) -> Option<Self> {
        NonZeroUsize::new(n).map(Self)
    }

    /// Parses a raw `limit` query value.
    pub fn parse(raw: &str) -> Result<Self> {
        let n: i64 = raw
            .trim()
            .parse()
            .map_err(|_| SupervisorError::invalid(format!("limit must be an integer: {raw:?}")))?;
        if n <= 0 {
            return Err(SupervisorError::invalid("limit cannot <= 0"));
        }
        usize::try_from(n)
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| SupervisorError::invalid(format!("limit out of range: {n}")))
    }

    pub fn get(&self) -> usize {
        self.0.get()
    }
}

/// Last `limit` newline-delimited records of `text`, joined by `\n`.
///
/// A trailing newline terminates the final record rather than starting an
/// empty one.
pub fn tail_records(text: &str, limit: ConsoleLimit) -> String {
    let records: Vec<&str> = text.lines().collect();
    let start = records.len().saturating_sub(limit.get());
    records[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(n: usize) -> ConsoleLimit {
        ConsoleLimit::new(n).unwrap()
    }

    #[test]
    fn tail_returns_last_records() {
        assert_eq!(tail_records("A\nB\nC\nD\n", limit(2)), "C\nD");
        assert_eq!(tail_records("A\nB\nC\nD", limit(2)), "C\nD");
    }

    #[test]
    fn tail_larger_than_log_returns_everything() {
        assert_eq!(tail_records("A\nB\n", limit(10)), "A\nB");
        assert_eq!(tail_records("", limit(3)), "");
    }

    #[test]
    fn parse_rejects_non_positive_and_garbage() {
        assert_eq!(ConsoleLimit::parse("2").unwrap().get(), 2);
        assert_eq!(ConsoleLimit::parse(" 15 ").unwrap().get(), 15);

        for raw in ["0", "-3", "abc", "", "1.5"] {
            let err = ConsoleLimit::parse(raw).unwrap_err();
            assert_eq!(err.code(), "invalid_argument", "raw={raw:?}");
        }
    }
}

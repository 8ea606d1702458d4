//! Cursor-based log resume
//!
//! The server holds an append-only log and hands back a line cursor with
//! every page. A poll asks for lines after the last cursor; lines in the
//! answer are numbered from that offset. A missing cursor means "start
//! over", in which case lines already delivered are filtered out.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCursor {
    /// Offset to request the next page after; `None` fetches from the start
    cursor: Option<u64>,
    /// Number of leading log lines already handed to the observer
    delivered: u64,
}

impl LogCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a cursor obtained earlier, treating every line before
    /// it as already seen.
    pub fn resume_from(cursor: u64) -> Self {
        Self {
            cursor: Some(cursor),
            delivered: cursor,
        }
    }

    /// Offset to send with the next request
    pub fn position(&self) -> Option<u64> {
        self.cursor
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Fold one page into the cursor and return only the unseen lines.
    ///
    /// `requested_from` must be the offset the page was requested with,
    /// so a late page answered for an older cursor is still numbered
    /// correctly.
    pub fn merge(
        &mut self,
        requested_from: Option<u64>,
        lines: Vec<String>,
        next_cursor: Option<u64>,
    ) -> Vec<String> {
        let start = requested_from.unwrap_or(0);
        let end = start + lines.len() as u64;

        let skip = self.delivered.saturating_sub(start);
        let fresh: Vec<String> = lines
            .into_iter()
            .skip(usize::try_from(skip).unwrap_or(usize::MAX))
            .collect();
        self.delivered = self.delivered.max(end);

        self.cursor = match (self.cursor, next_cursor) {
            (Some(current), Some(next)) => Some(current.max(next)),
            (None, Some(next)) => Some(next),
            (_, None) => None,
        };

        fresh
    }
}

/// Split a raw log blob into lines, dropping blank ones.
pub fn split_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(range: std::ops::Range<u64>) -> Vec<String> {
        range.map(|i| format!("line {}", i)).collect()
    }

    #[test]
    fn test_resume_requests_after_cursor() {
        let mut cursor = LogCursor::new();
        let first = cursor.merge(None, lines(0..42), Some(42));
        assert_eq!(first.len(), 42);
        assert_eq!(cursor.position(), Some(42));

        let second = cursor.merge(cursor.position(), lines(42..45), Some(45));
        assert_eq!(second, lines(42..45));
        assert_eq!(cursor.position(), Some(45));
    }

    #[test]
    fn test_missing_cursor_refetches_without_redelivery() {
        let mut cursor = LogCursor::new();
        cursor.merge(None, lines(0..10), None);
        assert_eq!(cursor.position(), None);

        // Server returns the whole log again plus two new lines
        let again = cursor.merge(None, lines(0..12), None);
        assert_eq!(again, lines(10..12));
        assert_eq!(cursor.delivered(), 12);
    }

    #[test]
    fn test_stale_cursor_never_moves_backwards() {
        let mut cursor = LogCursor::resume_from(42);
        let page = cursor.merge(Some(42), lines(42..44), Some(40));
        assert_eq!(page, lines(42..44));
        assert_eq!(cursor.position(), Some(42));

        // A page answered from the older offset only yields unseen lines
        let overlap = cursor.merge(Some(40), lines(40..46), Some(46));
        assert_eq!(overlap, lines(44..46));
        assert_eq!(cursor.position(), Some(46));
    }

    #[test]
    fn test_split_lines_drops_blanks() {
        let raw = "TASK [setup]\n\n  \nok: [router]\r\n";
        assert_eq!(split_lines(raw), vec!["TASK [setup]", "ok: [router]"]);
    }
}

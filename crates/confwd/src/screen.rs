//! Row tracking for legacy screen-buffer polling.
//!
//! Each poll reads the cursor row and emits the rows the cursor has moved
//! past since the last poll. The cursor row itself may still be written
//! to, so it is held back until the cursor leaves it or the child exits.

use std::ops::Range;

use confwd_wire::text::utf16_to_utf8;

/// State carried between polls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsoleState {
    last_rendered_row: i16,
}

impl ConsoleState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_rendered_row: 0,
        }
    }

    #[must_use]
    pub const fn last_rendered_row(&self) -> i16 {
        self.last_rendered_row
    }

    /// Complete rows to emit for a poll that found the cursor on
    /// `cursor_row`.
    ///
    /// A cursor above the last rendered row means the buffer was cleared
    /// or scrolled; reading restarts at row 0.
    pub fn advance(&mut self, cursor_row: i16) -> Range<i16> {
        let cursor_row = cursor_row.max(0);
        if cursor_row < self.last_rendered_row {
            tracing::debug!(
                cursor_row,
                last = self.last_rendered_row,
                "cursor moved up; rereading from top"
            );
            self.last_rendered_row = 0;
        }
        let rows = self.last_rendered_row..cursor_row;
        self.last_rendered_row = cursor_row;
        rows
    }

    /// Rows to emit once the child has exited, including the cursor row.
    pub fn finish(&mut self, cursor_row: i16) -> Range<i16> {
        let rows = self.advance(cursor_row);
        let end = rows.end.saturating_add(1);
        self.last_rendered_row = end;
        rows.start..end
    }
}

/// Drop trailing blanks from a row of UTF-16 cells.
#[must_use]
pub fn trim_row(cells: &[u16]) -> &[u16] {
    let end = cells
        .iter()
        .rposition(|&cell| cell != u16::from(b' ') && cell != 0)
        .map_or(0, |i| i + 1);
    &cells[..end]
}

/// One screen row as a UTF-8 line without terminator.
#[must_use]
pub fn render_row(cells: &[u16]) -> String {
    utf16_to_utf8(trim_row(cells))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    // ── Row planning ─────────────────────────────────────────────────

    #[test]
    fn first_poll_emits_rows_above_cursor() {
        let mut state = ConsoleState::new();
        assert_eq!(state.advance(3), 0..3);
        assert_eq!(state.last_rendered_row(), 3);
    }

    #[test]
    fn unmoved_cursor_emits_nothing() {
        let mut state = ConsoleState::new();
        let _ = state.advance(2);
        assert!(state.advance(2).is_empty());
        assert!(state.advance(2).is_empty());
    }

    #[test]
    fn cursor_moving_up_restarts_at_top() {
        let mut state = ConsoleState::new();
        let _ = state.advance(8);
        assert_eq!(state.advance(2), 0..2);
        assert_eq!(state.last_rendered_row(), 2);
    }

    #[test]
    fn finish_includes_cursor_row() {
        let mut state = ConsoleState::new();
        let _ = state.advance(4);
        assert_eq!(state.finish(4), 4..5);
        assert_eq!(state.finish(0), 0..1);
    }

    #[test]
    fn negative_cursor_is_treated_as_top() {
        let mut state = ConsoleState::new();
        assert!(state.advance(-1).is_empty());
    }

    // ── Row text ─────────────────────────────────────────────────────

    #[test]
    fn trailing_padding_is_trimmed() {
        assert_eq!(render_row(&wide("hello   ")), "hello");
        assert_eq!(render_row(&wide("  indented  ")), "  indented");
        assert_eq!(render_row(&[0x20, 0, 0x20]), "");
    }

    #[test]
    fn non_ascii_cells_survive() {
        assert_eq!(render_row(&wide("caf\u{e9} \u{2713}  ")), "caf\u{e9} \u{2713}");
    }
}

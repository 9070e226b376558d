//! Generated-line to original-line table.

use std::fmt::Write as _;

/// Maps each line of generated Lua back to the Erde line it came from.
///
/// Lines are 1-based on both sides. Scaffolding lines introduced by the
/// code generator (block `end`s, export tables) map to `None`. Mapped
/// lines never decrease.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceMap {
    lines: Vec<Option<usize>>,
}

impl SourceMap {
    pub(crate) const fn from_lines(lines: Vec<Option<usize>>) -> Self {
        Self { lines }
    }

    /// Original line for a generated line, if it has one.
    #[must_use]
    pub fn original_line(&self, generated_line: usize) -> Option<usize> {
        generated_line
            .checked_sub(1)
            .and_then(|i| self.lines.get(i))
            .copied()
            .flatten()
    }

    /// Number of generated lines.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// `(generated_line, original_line)` pairs in output order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, Option<usize>)> + '_ {
        self.lines.iter().enumerate().map(|(i, line)| (i + 1, *line))
    }

    /// Rewrite `chunk:LINE:` locations in a Lua error message or
    /// traceback to refer to original lines. Unmapped lines are left
    /// as they are.
    #[must_use]
    pub fn rewrite(&self, message: &str) -> String {
        let bytes = message.as_bytes();
        let mut out = String::with_capacity(message.len());
        let mut copied = 0;
        let mut i = 0;

        while i < bytes.len() {
            if bytes[i] != b':' {
                i += 1;
                continue;
            }
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end == start || bytes.get(end) != Some(&b':') {
                i += 1;
                continue;
            }

            let original = message[start..end]
                .parse::<usize>()
                .ok()
                .and_then(|line| self.original_line(line));
            if let Some(original) = original {
                out.push_str(&message[copied..start]);
                let _ = write!(out, "{original}");
                copied = end;
            }
            i = end;
        }

        out.push_str(&message[copied..]);
        out
    }
}

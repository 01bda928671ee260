//! Anchored byte views over chunk text, and offset → position translation.

use std::borrow::Cow;

use crate::types::{Chunk, Position, Range};

/// An immutable byte buffer anchored at the position of its first byte.
///
/// Views borrow the chunk they were made from; slicing returns borrowed
/// bytes with the same lifetime and never copies.
#[derive(Debug, Clone, Copy)]
pub struct TextView<'a> {
    bytes: &'a [u8],
    anchor: &'a Position,
    column_offset: usize,
}

static UNANCHORED: Position = Position {
    file: None,
    line: 1,
    column: 1,
};

impl<'a> TextView<'a> {
    /// `column_offset` is the number of characters already consumed on the
    /// anchor's line before the view starts.
    pub fn new(bytes: &'a [u8], anchor: &'a Position, column_offset: usize) -> Self {
        Self {
            bytes,
            anchor,
            column_offset,
        }
    }

    /// View over a chunk; unanchored chunks start at line 1, column 1.
    pub fn of_chunk(chunk: &'a Chunk) -> Self {
        match &chunk.anchor {
            Some(anchor) => Self::new(chunk.text.as_bytes(), &anchor.position, anchor.column_offset),
            None => Self::new(chunk.text.as_bytes(), &UNANCHORED, 0),
        }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn anchor(&self) -> &'a Position {
        self.anchor
    }

    /// Bytes in `begin..end`, clamped to the view.
    pub fn get(&self, begin: usize, end: usize) -> &'a [u8] {
        let end = end.min(self.bytes.len());
        &self.bytes[begin.min(end)..end]
    }

    /// Text in `begin..end`; invalid UTF-8 is replaced.
    pub fn text(&self, begin: usize, end: usize) -> Cow<'a, str> {
        String::from_utf8_lossy(self.get(begin, end))
    }

    /// Position of the byte at `offset`.
    ///
    /// Columns count characters on every line, the first one included: on
    /// the anchor's line the column is `anchor.column` plus the number of
    /// characters before `offset`, not `anchor.column + offset`. Later lines
    /// start at `1 + column_offset`. Invalid UTF-8 counts one character per
    /// replacement.
    pub fn translate_offset(&self, offset: usize) -> Position {
        let before = self.get(0, offset);
        let file = self.anchor.file.clone();
        match before.iter().rposition(|&b| b == b'\n') {
            None => Position::new(file, self.anchor.line, self.anchor.column + char_count(before)),
            Some(nl) => {
                let newlines = before.iter().filter(|&&b| b == b'\n').count();
                let column = 1 + self.column_offset + char_count(&before[nl + 1..]);
                Position::new(file, self.anchor.line + newlines, column)
            }
        }
    }

    pub fn translate_range(&self, begin: usize, end: Option<usize>) -> Range {
        Range::new(
            self.translate_offset(begin),
            end.map(|end| self.translate_offset(end)),
        )
    }

    /// Clamp a checker-reported span to the view; no span means the whole view.
    pub fn clip(&self, span: Option<(usize, usize)>) -> (usize, usize) {
        let (begin, end) = span.unwrap_or((0, self.len()));
        let end = end.min(self.len());
        (begin.min(end), end)
    }
}

fn char_count(bytes: &[u8]) -> usize {
    String::from_utf8_lossy(bytes).chars().count()
}

/// Prefix every line of `text`.
///
/// A whitespace-only prefix skips blank lines. Any other prefix is added to
/// every non-empty line, and empty lines get the prefix without its trailing
/// whitespace.
pub fn indent(text: &str, prefix: &str) -> String {
    let whitespace_prefix = !prefix.is_empty() && prefix.chars().all(char::is_whitespace);
    let bare = prefix.trim_end();
    text.split('\n')
        .map(|line| {
            if whitespace_prefix {
                if line.trim().is_empty() {
                    line.to_string()
                } else {
                    format!("{prefix}{line}")
                }
            } else if line.is_empty() {
                bare.to_string()
            } else {
                format!("{prefix}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `chunk` with `begin..end` wrapped in `>>>`/`<<<`, keeping up to three
/// lines of context on each side.
pub fn highlight_substring(chunk: &[u8], begin: usize, end: usize) -> Vec<u8> {
    let end = end.min(chunk.len());
    let begin = begin.min(end);
    let before = lines(&chunk[..begin]);
    let after = lines(&chunk[end..]);
    let before = &before[before.len().saturating_sub(3)..];
    let after = &after[..after.len().min(3)];

    let mut out = before.join(&b'\n');
    out.extend_from_slice(b">>>");
    out.extend_from_slice(&chunk[begin..end]);
    out.extend_from_slice(b"<<<");
    out.extend_from_slice(&after.join(&b'\n'));
    out
}

/// Lines of `bytes`, without terminators; a final terminator does not start
/// a new line.
fn lines(bytes: &[u8]) -> Vec<&[u8]> {
    if bytes.is_empty() {
        return Vec::new();
    }
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    body.split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn anchor() -> Position {
        Position::new(Some(PathBuf::from("f")), 3, 2)
    }

    #[test]
    fn translate_first_line_uses_anchor_column() {
        let anchor = anchor();
        let view = TextView::new(b"abc\ndef\nghi", &anchor, 5);
        assert_eq!(view.translate_offset(0), Position::new(Some("f".into()), 3, 2));
        assert_eq!(view.translate_offset(2), Position::new(Some("f".into()), 3, 4));
    }

    #[test]
    fn translate_later_lines_use_column_offset() {
        let anchor = anchor();
        let view = TextView::new(b"abc\ndef\nghi", &anchor, 5);
        assert_eq!(view.translate_offset(10), Position::new(Some("f".into()), 5, 8));
        // Right after a newline.
        assert_eq!(view.translate_offset(4), Position::new(Some("f".into()), 4, 6));
    }

    #[test]
    fn translate_counts_characters_not_bytes() {
        let anchor = Position::start_of(None);
        let text = "x\n∀ α, β";
        let view = TextView::new(text.as_bytes(), &anchor, 0);
        let offset = text.find('β').unwrap();
        assert_eq!(view.translate_offset(offset), Position::new(None, 2, 6));
        let first_line = TextView::new("αβγ".as_bytes(), &anchor, 0);
        assert_eq!(first_line.translate_offset(4).column, 3);
    }

    #[test]
    fn translate_range_with_and_without_end() {
        let anchor = anchor();
        let view = TextView::new(b"abc\ndef", &anchor, 0);
        let range = view.translate_range(1, Some(6));
        assert_eq!(range.begin.line, 3);
        assert_eq!(range.end.as_ref().unwrap().line, 4);
        assert_eq!(range.end.unwrap().column, 3);
        assert!(view.translate_range(1, None).end.is_none());
    }

    #[test]
    fn unanchored_chunks_start_at_one_one() {
        let chunk = Chunk::new("a\nb");
        let view = TextView::of_chunk(&chunk);
        assert_eq!(view.translate_offset(2), Position::new(None, 2, 1));
    }

    #[test]
    fn slicing_borrows_and_clamps() {
        let anchor = anchor();
        let view = TextView::new(b"hello", &anchor, 0);
        assert_eq!(view.get(1, 3), b"el");
        assert_eq!(view.get(3, 100), b"lo");
        assert_eq!(view.get(9, 4), b"");
        assert_eq!(view.text(0, 5), "hello");
    }

    #[test]
    fn clip_span() {
        let anchor = anchor();
        let view = TextView::new(b"0123456789", &anchor, 0);
        assert_eq!(view.clip(None), (0, 10));
        assert_eq!(view.clip(Some((3, 40))), (3, 10));
        assert_eq!(view.clip(Some((12, 40))), (10, 10));
    }

    #[test]
    fn indent_with_quote_prefix() {
        assert_eq!(indent("a\n\nb", "  > "), "  > a\n  >\n  > b");
    }

    #[test]
    fn indent_with_whitespace_prefix_skips_blank_lines() {
        assert_eq!(indent("a\n\nb", "    "), "    a\n\n    b");
    }

    #[test]
    fn highlight_keeps_three_lines_of_context() {
        let chunk = b"l1\nl2\nl3\nl4\nbad stuff\nl6\nl7\nl8\nl9";
        let begin = 12;
        let end = begin + "bad stuff".len();
        let out = highlight_substring(chunk, begin, end);
        assert_eq!(out, b"l2\nl3\nl4>>>bad stuff<<<\nl6\nl7".to_vec());
    }

    #[test]
    fn highlight_at_chunk_edges() {
        assert_eq!(highlight_substring(b"abc", 0, 3), b">>>abc<<<".to_vec());
        assert_eq!(highlight_substring(b"abc", 1, 2), b"a>>>b<<<c".to_vec());
    }
}

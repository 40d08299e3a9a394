//! In-memory markdown documents and source spans.
//!
//! A [`Document`] is an immutable snapshot of a file's text at a version.
//! All source ranges handed out by this crate are [`Span`]s: a byte-offset
//! range into the snapshot paired with the equivalent LSP range. Spans are
//! derived purely from offsets into the text they were computed from and
//! must never outlive a version change of that document.

use std::ops::Range;
use std::sync::Arc;

use ropey::Rope;
use tower_lsp::lsp_types::{Position, Url};

/// An immutable snapshot of a markdown document.
///
/// Cloning is cheap: the text is shared and the rope is a persistent tree.
#[derive(Debug, Clone)]
pub struct Document {
    uri: Url,
    version: i32,
    text: Arc<str>,
    rope: Rope,
}

impl Document {
    pub fn new(uri: Url, version: i32, text: impl Into<Arc<str>>) -> Document {
        let text = text.into();
        let rope = Rope::from_str(&text);
        Document {
            uri,
            version,
            text,
            rope,
        }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn rope(&self) -> &Rope {
        &self.rope
    }

    pub fn line_count(&self) -> usize {
        self.rope.len_lines()
    }

    /// The text of a 0-based line, without its trailing line break.
    pub fn line(&self, line: usize) -> Option<String> {
        let slice = self.rope.get_line(line)?;
        let mut text = slice.to_string();
        while text.ends_with('\n') || text.ends_with('\r') {
            text.pop();
        }
        Some(text)
    }

    /// Character length of a 0-based line, excluding the line break.
    pub fn line_len(&self, line: usize) -> usize {
        self.line(line).map(|l| l.chars().count()).unwrap_or(0)
    }

    pub fn position_at(&self, byte_offset: usize) -> Position {
        let offset = byte_offset.min(self.rope.len_bytes());
        let char_offset = self.rope.byte_to_char(offset);
        let line = self.rope.char_to_line(char_offset);
        let character = char_offset - self.rope.line_to_char(line);
        Position {
            line: line as u32,
            character: character as u32,
        }
    }

    pub fn end_position(&self) -> Position {
        self.position_at(self.rope.len_bytes())
    }

    pub fn span(&self, offsets: Range<usize>) -> Span {
        Span::new(&self.rope, offsets)
    }
}

/// A byte-offset range into a document together with its LSP range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub offsets: Range<usize>,
    pub range: tower_lsp::lsp_types::Range,
}

impl Span {
    /// Converts a byte-offset range to positions using rope-based character
    /// counting (byte → char → line/column).
    pub fn new(rope: &Rope, offsets: Range<usize>) -> Span {
        let range = tower_lsp::lsp_types::Range {
            start: position_in(rope, offsets.start),
            end: position_in(rope, offsets.end),
        };
        Span { offsets, range }
    }

    pub fn contains_offset(&self, offset: usize) -> bool {
        self.offsets.start <= offset && offset < self.offsets.end
    }
}

fn position_in(rope: &Rope, byte_offset: usize) -> Position {
    let offset = byte_offset.min(rope.len_bytes());
    let char_offset = rope.byte_to_char(offset);
    let line = rope.char_to_line(char_offset);
    let character = char_offset - rope.line_to_char(line);
    Position {
        line: line as u32,
        character: character as u32,
    }
}

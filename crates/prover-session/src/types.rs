use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Errors that unwind out of a driver.
///
/// Only configuration and protocol faults end up here; statement failures
/// and orphaned messages are reported through the [`Observer`](crate::Observer)
/// instead.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Invalid configuration (margin, depth, ...).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The checker binary could not be found on the search path.
    #[error("{bin} not found; {hint}")]
    BinaryNotFound { bin: String, hint: String },

    /// Unclassifiable or ill-shaped response from the checker.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The checker closed its output while a response was expected.
    #[error("Checker process exited unexpectedly (last response: {last_response:?})")]
    ProcessDied { last_response: Option<String> },

    /// No response line within the configured number of seconds.
    #[error("Checker did not respond within {0}s")]
    Timeout(u64),

    /// A wire line could not be decoded.
    #[error("Wire decode error: {0}")]
    Decode(#[from] sexp_codec::ParseError),

    /// JSON encoding or decoding failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// IO error from process communication.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A location in a source file. Lines and columns are 1-based; columns
/// count Unicode scalar values, not bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub file: Option<PathBuf>,
    pub line: usize,
    pub column: usize,
}

impl Position {
    /// `line` and `column` are 1-based.
    pub fn new(file: Option<PathBuf>, line: usize, column: usize) -> Self {
        Self { file, line, column }
    }

    /// Line 1, column 1 of `file`.
    pub fn start_of(file: Option<PathBuf>) -> Self {
        Self::new(file, 1, 1)
    }

    /// `file:line:col:` header used in diagnostics.
    pub fn as_header(&self) -> String {
        format!("{}:{}:{}:", file_label(&self.file), self.line, self.column)
    }
}

/// A span between two positions of the same file; `end` is absent for
/// point locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub begin: Position,
    pub end: Option<Position>,
}

impl Range {
    pub fn new(begin: Position, end: Option<Position>) -> Self {
        debug_assert!(end.as_ref().map_or(true, |e| e.file == begin.file));
        Self { begin, end }
    }

    /// `file:(l:c)-(l:c):` for spans, `file:l:c:` for points.
    pub fn as_header(&self) -> String {
        let file = file_label(&self.begin.file);
        match &self.end {
            Some(end) => format!(
                "{file}:({}:{})-({}:{}):",
                self.begin.line, self.begin.column, end.line, end.column
            ),
            None => format!("{file}:{}:{}:", self.begin.line, self.begin.column),
        }
    }
}

fn file_label(file: &Option<PathBuf>) -> String {
    file.as_ref()
        .map_or_else(|| "<unknown>".to_string(), |p| p.display().to_string())
}

/// One row of a proof context, possibly binding several names.
///
/// `T` is the raw checker object before pretty-printing and `String` after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hypothesis<T = String> {
    pub names: Vec<String>,
    pub body: Option<T>,
    #[serde(rename = "type")]
    pub ty: T,
}

/// A pending proof obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal<T = String> {
    pub name: Option<String>,
    pub conclusion: T,
    /// Context in display order (top to bottom).
    pub hypotheses: Vec<Hypothesis<T>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub contents: String,
}

impl Message {
    pub fn new(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
        }
    }
}

/// A piece of an annotated chunk.
///
/// Concatenating the `contents` of all fragments of a chunk gives back the
/// chunk exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fragment {
    /// Whitespace or comments between statements.
    Text { contents: String },
    /// One checked statement with its output.
    Sentence {
        contents: String,
        messages: Vec<Message>,
        goals: Vec<Goal>,
    },
}

impl Fragment {
    pub fn text(contents: impl Into<String>) -> Self {
        Fragment::Text {
            contents: contents.into(),
        }
    }

    /// A sentence with no messages or goals yet.
    pub fn sentence(contents: impl Into<String>) -> Self {
        Fragment::Sentence {
            contents: contents.into(),
            messages: Vec::new(),
            goals: Vec::new(),
        }
    }

    pub fn contents(&self) -> &str {
        match self {
            Fragment::Text { contents } | Fragment::Sentence { contents, .. } => contents,
        }
    }
}

/// Concatenation of the fragments' contents.
pub fn fragments_text(fragments: &[Fragment]) -> String {
    fragments.iter().map(Fragment::contents).collect()
}

/// Identifies the external checker and its version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorInfo {
    pub name: String,
    pub version: String,
}

impl GeneratorInfo {
    pub fn fmt(&self, include_version: bool) -> String {
        if include_version {
            format!("{} v{}", self.name, self.version)
        } else {
            self.name.clone()
        }
    }
}

impl fmt::Display for GeneratorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&GeneratorInfo::fmt(self, true))
    }
}

/// Checker-assigned statement handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatementId(pub i64);

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Input to [`Driver::annotate`](crate::Driver::annotate): source text,
/// optionally anchored at its position in a larger file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub anchor: Option<Anchor>,
}

/// Where a chunk starts: the position of its first byte, and how many
/// characters of that line precede it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub position: Position,
    pub column_offset: usize,
}

impl Chunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            anchor: None,
        }
    }

    pub fn anchored(text: impl Into<String>, position: Position, column_offset: usize) -> Self {
        Self {
            text: text.into(),
            anchor: Some(Anchor {
                position,
                column_offset,
            }),
        }
    }
}

impl From<&str> for Chunk {
    fn from(text: &str) -> Self {
        Chunk::new(text)
    }
}

impl From<String> for Chunk {
    fn from(text: String) -> Self {
        Chunk::new(text)
    }
}

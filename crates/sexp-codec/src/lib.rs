//! Byte-exact s-expression codec for line-oriented prover protocols.
//!
//! Values are byte-strings, integers, or nested lists. The encoder never
//! emits a raw newline, so one encoded value always fits on one wire line,
//! and `decode(&encode(v)) == Ok(v)` holds for every value, including atoms
//! that carry arbitrary (non-UTF-8) bytes.
//!
//! ```
//! use sexp_codec::{decode, encode, Sexp};
//!
//! let value = Sexp::list(vec![Sexp::atom("Add"), Sexp::list(vec![]), Sexp::atom("Check 1.")]);
//! let wire = encode(&value);
//! assert_eq!(wire, b"(Add () \"Check 1.\")");
//! assert_eq!(decode(&wire).unwrap(), value);
//! ```

use std::fmt;

/// A wire value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Sexp {
    /// A byte-string, bare or quoted on the wire.
    Atom(Vec<u8>),
    /// A decimal integer.
    Int(i64),
    /// An ordered list of values.
    List(Vec<Sexp>),
}

/// Errors raised by [`decode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A list was never closed, or a `)` has no matching `(`.
    #[error("unbalanced parentheses (at byte {0})")]
    Unbalanced(usize),

    /// A quoted string was never closed.
    #[error("unterminated string (opened at byte {0})")]
    Unterminated(usize),

    /// The input holds no value at all.
    #[error("empty input")]
    Empty,

    /// Extra input follows the first complete value.
    #[error("trailing input at byte {0}")]
    Trailing(usize),
}

impl Sexp {
    /// Build an atom from anything byte-like.
    pub fn atom(bytes: impl Into<Vec<u8>>) -> Self {
        Sexp::Atom(bytes.into())
    }

    /// Build a list.
    pub fn list(items: Vec<Sexp>) -> Self {
        Sexp::List(items)
    }

    /// First element of a list, or the value itself for atoms and integers.
    ///
    /// Returns `None` for the empty list.
    pub fn head(&self) -> Option<&Sexp> {
        match self {
            Sexp::List(items) => items.first(),
            other => Some(other),
        }
    }

    /// Whether this is the atom `name`.
    pub fn is_atom(&self, name: &str) -> bool {
        matches!(self, Sexp::Atom(bytes) if bytes.as_slice() == name.as_bytes())
    }

    /// Whether this value is an atom or a list headed by the atom `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.head().is_some_and(|h| h.is_atom(tag))
    }

    /// Raw bytes of an atom; `None` for integers and lists.
    pub fn as_atom(&self) -> Option<&[u8]> {
        match self {
            Sexp::Atom(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Value of an integer; atoms that look numeric were already decoded as
    /// integers, so this is `None` for every atom.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Sexp::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Elements of a list; `None` for atoms and integers.
    pub fn as_list(&self) -> Option<&[Sexp]> {
        match self {
            Sexp::List(items) => Some(items),
            _ => None,
        }
    }

    /// Look up `key` in an association list of `(key value)` pairs.
    ///
    /// Returns the second element of the first pair whose head is `key`.
    /// Non-pair entries are skipped.
    pub fn assoc(&self, key: &str) -> Option<&Sexp> {
        self.as_list()?.iter().find_map(|entry| match entry.as_list() {
            Some([k, value, ..]) if k.is_atom(key) => Some(value),
            _ => None,
        })
    }

    /// Text of an atom (lossily decoded) or integer; `None` for lists.
    pub fn to_string_lossy(&self) -> Option<String> {
        match self {
            Sexp::Atom(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            Sexp::Int(n) => Some(n.to_string()),
            Sexp::List(_) => None,
        }
    }
}

impl From<&str> for Sexp {
    fn from(s: &str) -> Self {
        Sexp::Atom(s.as_bytes().to_vec())
    }
}

impl From<&[u8]> for Sexp {
    fn from(bytes: &[u8]) -> Self {
        Sexp::Atom(bytes.to_vec())
    }
}

impl From<i64> for Sexp {
    fn from(n: i64) -> Self {
        Sexp::Int(n)
    }
}

impl From<Vec<Sexp>> for Sexp {
    fn from(items: Vec<Sexp>) -> Self {
        Sexp::List(items)
    }
}

impl fmt::Display for Sexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&encode(self)))
    }
}

// --- Encoding ---

/// Serialize a value to its wire form.
pub fn encode(value: &Sexp) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Sexp, out: &mut Vec<u8>) {
    match value {
        Sexp::Int(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Sexp::Atom(bytes) if is_bare(bytes) => out.extend_from_slice(bytes),
        Sexp::Atom(bytes) => write_quoted(bytes, out),
        Sexp::List(items) => {
            out.push(b'(');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                write_value(item, out);
            }
            out.push(b')');
        }
    }
}

/// Bytes that may appear in an unquoted atom emitted by the encoder.
fn is_bare_byte(b: u8) -> bool {
    b.is_ascii_graphic() && !matches!(b, b'(' | b')' | b'"' | b';' | b'\\' | b'#' | b'|')
}

/// An atom goes out bare only if it reads back as the same atom.
fn is_bare(bytes: &[u8]) -> bool {
    !bytes.is_empty() && bytes.iter().all(|&b| is_bare_byte(b)) && parse_int(bytes).is_none()
}

fn write_quoted(bytes: &[u8], out: &mut Vec<u8>) {
    out.push(b'"');
    for &b in bytes {
        match b {
            b'"' => out.extend_from_slice(b"\\\""),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            0x08 => out.extend_from_slice(b"\\b"),
            b if b < 0x20 || b == 0x7f => {
                out.extend_from_slice(format!("\\{b:03}").as_bytes());
            }
            b => out.push(b),
        }
    }
    out.push(b'"');
}

fn parse_int(bytes: &[u8]) -> Option<i64> {
    let digits = bytes.strip_prefix(b"-").unwrap_or(bytes);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

// --- Decoding ---

/// Parse exactly one value from `input`, surrounded by optional whitespace.
pub fn decode(input: &[u8]) -> Result<Sexp, ParseError> {
    let mut parser = Parser::new(input);
    let value = parser.next_value()?.ok_or(ParseError::Empty)?;
    parser.skip_whitespace();
    match input.get(parser.pos) {
        None => Ok(value),
        Some(b')') => Err(ParseError::Unbalanced(parser.pos)),
        Some(_) => Err(ParseError::Trailing(parser.pos)),
    }
}

/// Parse every value in `input`.
pub fn decode_all(input: &[u8]) -> Result<Vec<Sexp>, ParseError> {
    let mut parser = Parser::new(input);
    let mut values = Vec::new();
    while let Some(value) = parser.next_value()? {
        values.push(value);
    }
    Ok(values)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// Next complete value, or `None` at end of input.
    ///
    /// Nesting is tracked on an explicit stack: pretty-printer objects can be
    /// nested far deeper than is comfortable for recursion.
    fn next_value(&mut self) -> Result<Option<Sexp>, ParseError> {
        let mut stack: Vec<(usize, Vec<Sexp>)> = Vec::new();
        loop {
            self.skip_whitespace();
            let Some(byte) = self.peek() else {
                return match stack.last() {
                    Some(&(open, _)) => Err(ParseError::Unbalanced(open)),
                    None => Ok(None),
                };
            };
            let value = match byte {
                b'(' => {
                    stack.push((self.pos, Vec::new()));
                    self.pos += 1;
                    continue;
                }
                b')' => {
                    let Some((_, items)) = stack.pop() else {
                        return Err(ParseError::Unbalanced(self.pos));
                    };
                    self.pos += 1;
                    Sexp::List(items)
                }
                b'"' => self.quoted()?,
                _ => self.bare(),
            };
            match stack.last_mut() {
                Some((_, items)) => items.push(value),
                None => return Ok(Some(value)),
            }
        }
    }

    fn bare(&mut self) -> Sexp {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| !b.is_ascii_whitespace() && !matches!(b, b'(' | b')' | b'"'))
        {
            self.pos += 1;
        }
        let bytes = &self.input[start..self.pos];
        match parse_int(bytes) {
            Some(n) => Sexp::Int(n),
            None => Sexp::Atom(bytes.to_vec()),
        }
    }

    fn quoted(&mut self) -> Result<Sexp, ParseError> {
        let open = self.pos;
        self.pos += 1;
        let mut out = Vec::new();
        loop {
            let Some(b) = self.peek() else {
                return Err(ParseError::Unterminated(open));
            };
            self.pos += 1;
            match b {
                b'"' => return Ok(Sexp::Atom(out)),
                b'\\' => self.escape(open, &mut out)?,
                b => out.push(b),
            }
        }
    }

    fn escape(&mut self, open: usize, out: &mut Vec<u8>) -> Result<(), ParseError> {
        let Some(b) = self.peek() else {
            return Err(ParseError::Unterminated(open));
        };
        self.pos += 1;
        match b {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'\\' | b'"' | b'\'' | b' ' => out.push(b),
            b'\n' => self.skip_continuation(),
            b'\r' if self.peek() == Some(b'\n') => {
                self.pos += 1;
                self.skip_continuation();
            }
            b'0'..=b'9' => match self.decimal_escape(b) {
                Some(value) => out.push(value),
                None => out.extend_from_slice(&[b'\\', b]),
            },
            b'x' => match self.hex_escape() {
                Some(value) => out.push(value),
                None => out.extend_from_slice(b"\\x"),
            },
            b => out.extend_from_slice(&[b'\\', b]),
        }
        Ok(())
    }

    /// `\` at end of line: the line break and the next line's indentation vanish.
    fn skip_continuation(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t')) {
            self.pos += 1;
        }
    }

    fn decimal_escape(&mut self, first: u8) -> Option<u8> {
        let rest = self.input.get(self.pos..self.pos + 2)?;
        if !rest.iter().all(u8::is_ascii_digit) {
            return None;
        }
        let value = u32::from(first - b'0') * 100
            + u32::from(rest[0] - b'0') * 10
            + u32::from(rest[1] - b'0');
        let value = u8::try_from(value).ok()?;
        self.pos += 2;
        Some(value)
    }

    fn hex_escape(&mut self) -> Option<u8> {
        let digits = self.input.get(self.pos..self.pos + 2)?;
        let text = std::str::from_utf8(digits).ok()?;
        let value = u8::from_str_radix(text, 16).ok()?;
        self.pos += 2;
        Some(value)
    }
}

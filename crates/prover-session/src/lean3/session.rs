use std::collections::VecDeque;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::ast::{plan_sentences, Ast};
use super::goals::parse_goals;
use crate::document::{Document, Positioned};
use crate::observer::{Level, Notification, Observer};
use crate::transport::Transport;
use crate::text::indent;
use crate::types::{DriverError, Fragment, Message};

static NON_WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\S+").expect("NON_WHITESPACE_RE regex is valid"));

#[derive(Debug, Serialize)]
struct Request<'a> {
    seq_num: i64,
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    column: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
enum Response {
    Ok {
        seq_num: Option<i64>,
        #[serde(default)]
        record: Option<Record>,
    },
    Error {
        seq_num: Option<i64>,
        #[serde(default)]
        message: String,
    },
    CurrentTasks {},
    AllMessages {
        msgs: Vec<LeanMessage>,
    },
}

#[derive(Debug, Default, Deserialize)]
struct Record {
    #[serde(default)]
    state: Option<String>,
}

/// A diagnostic from the server. Lines are 1-based, columns 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LeanMessage {
    pub pos_line: usize,
    pub pos_col: usize,
    #[serde(default)]
    pub end_pos_line: Option<usize>,
    #[serde(default)]
    pub end_pos_col: Option<usize>,
    #[serde(default)]
    pub severity: String,
    pub text: String,
}

/// One conversation with `lean --server`.
pub struct Lean3Session<T: Transport> {
    transport: T,
    file_name: String,
    seq_num: i64,
    messages: Vec<LeanMessage>,
}

impl<T: Transport> Lean3Session<T> {
    pub fn new(transport: T, file_name: impl Into<String>) -> Self {
        Self {
            transport,
            file_name: file_name.into(),
            seq_num: -1,
            messages: Vec::new(),
        }
    }

    /// Check `document` and cut the result back into chunks, then shut the
    /// server down whatever the outcome.
    pub async fn annotate(
        mut self,
        document: &Document,
        ast: &Ast,
        observer: &dyn Observer,
    ) -> Result<Vec<Vec<Fragment>>, DriverError> {
        let result = self.annotate_document(document, ast, observer).await;
        self.transport.kill().await;
        result
    }

    async fn annotate_document(
        &mut self,
        document: &Document,
        ast: &Ast,
        observer: &dyn Observer,
    ) -> Result<Vec<Vec<Fragment>>, DriverError> {
        self.query("sync", Some(document.contents()), None).await?;

        let mut sentences = Vec::new();
        for planned in plan_sentences(&ast.sentence_ranges(), document) {
            let state = match planned.state_at {
                Some(pos) => self.state_at(pos).await?,
                None => None,
            };
            let sentence = Fragment::Sentence {
                contents: document.contents()[planned.beg..planned.end].to_string(),
                messages: Vec::new(),
                goals: parse_goals(state.as_deref()),
            };
            sentences.push(Positioned::new(planned.beg, planned.end, sentence));
        }
        let fragments = Document::intersperse_text_fragments(document.contents(), sentences);

        let spans = self
            .messages
            .iter()
            .map(|msg| message_span(msg, document))
            .collect();
        let (fragments, orphans) = attach_messages(fragments, spans);
        for orphan in orphans {
            observer.notify(Notification {
                subject: document.contents().to_string(),
                message: format!(
                    "Orphaned message past the end of the document:\n{}",
                    indent(&orphan.value, " >  ")
                ),
                location: None,
                level: Level::Warning,
            });
        }
        Ok(document.recover_chunks(fragments))
    }

    /// Proof state at a position, as text.
    pub async fn state_at(&mut self, (line, column): (usize, usize)) -> Result<Option<String>, DriverError> {
        let record = self.query("info", None, Some((line, column))).await?;
        Ok(record.and_then(|r| r.state))
    }

    /// Messages gathered so far.
    pub fn messages(&self) -> &[LeanMessage] {
        &self.messages
    }

    async fn query(
        &mut self,
        command: &str,
        content: Option<&str>,
        position: Option<(usize, usize)>,
    ) -> Result<Option<Record>, DriverError> {
        self.seq_num += 1;
        let request = Request {
            seq_num: self.seq_num,
            command,
            file_name: Some(self.file_name.as_str()),
            content,
            line: position.map(|p| p.0),
            column: position.map(|p| p.1),
        };
        let line = serde_json::to_vec(&request)?;
        self.write(&line).await?;
        let sync = Request {
            seq_num: -1,
            command: "sync_output",
            file_name: None,
            content: None,
            line: None,
            column: None,
        };
        let line = serde_json::to_vec(&sync)?;
        self.write(&line).await?;
        self.wait().await
    }

    async fn write(&mut self, line: &[u8]) -> Result<(), DriverError> {
        tracing::debug!(">> {}", String::from_utf8_lossy(line));
        self.transport.write_line(line).await
    }

    /// Read until the answer to the current request.
    async fn wait(&mut self) -> Result<Option<Record>, DriverError> {
        loop {
            let Some(line) = self.transport.read_line().await? else {
                return Err(DriverError::ProcessDied {
                    last_response: None,
                });
            };
            tracing::debug!("<< {}", String::from_utf8_lossy(&line));
            let value: serde_json::Value = serde_json::from_slice(&line)?;
            let response = Response::deserialize(&value)
                .map_err(|e| DriverError::Protocol(format!("Unexpected response {value}: {e}")))?;
            match response {
                Response::Ok { seq_num, record } if seq_num == Some(self.seq_num) => {
                    return Ok(record);
                }
                Response::Error { seq_num, message } if seq_num == Some(self.seq_num) => {
                    return Err(DriverError::Protocol(message));
                }
                Response::Ok { seq_num, .. } | Response::Error { seq_num, .. } => {
                    tracing::debug!(?seq_num, expected = self.seq_num, "Skipping stale response");
                }
                Response::CurrentTasks {} => {}
                Response::AllMessages { msgs } => self.messages = msgs,
            }
        }
    }
}

/// Byte span a message covers.
///
/// Without an end position, the message covers the run of non-whitespace
/// text starting at its position, or nothing at the end of the document.
fn message_span(msg: &LeanMessage, document: &Document) -> Positioned<String> {
    let beg = document.pos_to_offset(msg.pos_line, msg.pos_col);
    let end = match (msg.end_pos_line, msg.end_pos_col) {
        (Some(line), Some(col)) => document.pos_to_offset(line, col).max(beg),
        _ => NON_WHITESPACE_RE
            .find_at(document.contents(), beg)
            .map_or(beg, |m| m.end()),
    };
    Positioned::new(beg, end, msg.text.clone())
}

/// Attach positioned messages to the fragments they fall in.
///
/// A message over a sentence joins that sentence. A message over text cuts
/// the covered part out into a new sentence. Returns the fragments and the
/// messages that start past the last fragment.
pub fn attach_messages(
    fragments: Vec<Fragment>,
    mut messages: Vec<Positioned<String>>,
) -> (Vec<Fragment>, Vec<Positioned<String>>) {
    messages.sort_by_key(|m| (m.beg, m.end));
    let mut messages = VecDeque::from(messages);
    let mut segments = VecDeque::from(Document::with_boundaries(fragments));
    let mut out = Vec::with_capacity(segments.len());

    let Some(mut current) = segments.pop_front() else {
        return (out, messages.into());
    };
    while let Some(msg) = messages.front() {
        if msg.beg >= current.end {
            out.push(current.value);
            match segments.pop_front() {
                Some(next) => current = next,
                None => return (out, messages.into()),
            }
            continue;
        }
        let (beg, end) = (msg.beg.max(current.beg), msg.end.min(current.end));
        if let Fragment::Text { contents } = &current.value {
            let mut contents = contents.clone();
            let mut fr_beg = current.beg;
            if fr_beg < beg {
                let rest = contents.split_off(beg - fr_beg);
                out.push(Fragment::text(contents));
                contents = rest;
                fr_beg = beg;
            }
            let mut fr_end = current.end;
            if end < fr_end {
                let suffix = contents.split_off(end - fr_beg);
                segments.push_front(Positioned::new(end, fr_end, Fragment::text(suffix)));
                fr_end = end;
            }
            current = Positioned::new(fr_beg, fr_end, Fragment::sentence(contents));
        }
        if let Fragment::Sentence { messages: attached, .. } = &mut current.value {
            attached.push(Message::new(msg.value.clone()));
        }
        messages.pop_front();
    }
    out.push(current.value);
    out.extend(segments.into_iter().map(|s| s.value));
    (out, Vec::new())
}

//! In-memory stand-ins for checker processes, for testing without `sertop`
//! or `lean`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sexp_codec::Sexp;

use crate::transport::Transport;
use crate::types::{DriverError, Goal};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<String> + Send>;

// ---------------------------------------------------------------------------
// ScriptedTransport
// ---------------------------------------------------------------------------

/// Transport that answers each request line with whatever a closure returns.
///
/// Requests are recorded in [`requests`](Self::requests). Once the queued
/// answers run out, reads see end of file.
pub struct ScriptedTransport {
    responder: Responder,
    pending: VecDeque<Vec<u8>>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    killed: Arc<AtomicBool>,
}

impl ScriptedTransport {
    pub fn new(responder: impl FnMut(&[u8]) -> Vec<String> + Send + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            pending: VecDeque::new(),
            requests: Arc::new(Mutex::new(Vec::new())),
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Like [`new`](Self::new), for s-expression protocols: the closure
    /// sees decoded requests. Undecodable requests get no answer.
    pub fn sexp(mut responder: impl FnMut(&Sexp) -> Vec<String> + Send + 'static) -> Self {
        Self::new(move |line| match sexp_codec::decode(line) {
            Ok(request) => responder(&request),
            Err(e) => {
                tracing::warn!(error = %e, "Scripted transport got an undecodable request");
                Vec::new()
            }
        })
    }

    /// Shared log of raw request lines, in order.
    pub fn requests(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.requests)
    }

    /// Set once [`Transport::kill`] has been called.
    pub fn killed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.killed)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn write_line(&mut self, line: &[u8]) -> Result<(), DriverError> {
        if self.killed.load(Ordering::SeqCst) {
            return Err(DriverError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "transport was killed",
            )));
        }
        let answers = (self.responder)(line);
        self.pending
            .extend(answers.into_iter().map(String::into_bytes));
        if let Ok(mut log) = self.requests.lock() {
            log.push(line.to_vec());
        }
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<Vec<u8>>, DriverError> {
        Ok(self.pending.pop_front())
    }

    async fn kill(&mut self) {
        self.killed.store(true, Ordering::SeqCst);
        self.pending.clear();
    }
}

// ---------------------------------------------------------------------------
// MockSertop
// ---------------------------------------------------------------------------

/// Who a scripted message is addressed to.
#[derive(Debug, Clone)]
enum Target {
    /// The statement being executed.
    Own,
    /// The statement with this exact text.
    Statement(String),
    /// A raw id, possibly unknown to the client.
    Sid(i64),
}

#[derive(Debug, Clone)]
struct ScriptedMessage {
    target: Target,
    text: String,
}

/// A small SerAPI simulator.
///
/// Sentences are runs of text ending with `.` followed by whitespace or the
/// end of the chunk; leading whitespace is not part of a sentence. Ids are
/// handed out from 2 and keep counting across `Add` requests. Behavior is
/// keyed by exact sentence text.
pub struct MockSertop {
    next_sid: i64,
    statements: HashMap<i64, Statement>,
    on_add: HashMap<String, Vec<ScriptedMessage>>,
    on_exec: HashMap<String, Vec<ScriptedMessage>>,
    goals: HashMap<String, Vec<Goal>>,
    failures: HashMap<String, String>,
    parse_errors: HashMap<String, String>,
}

#[derive(Debug, Clone)]
struct Statement {
    text: String,
    begin: usize,
    end: usize,
}

impl Default for MockSertop {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSertop {
    pub fn new() -> Self {
        Self {
            next_sid: 2,
            statements: HashMap::new(),
            on_add: HashMap::new(),
            on_exec: HashMap::new(),
            goals: HashMap::new(),
            failures: HashMap::new(),
            parse_errors: HashMap::new(),
        }
    }

    /// Executing `sentence` emits `text` addressed to itself.
    pub fn with_message(mut self, sentence: &str, text: &str) -> Self {
        self.on_exec
            .entry(sentence.to_string())
            .or_default()
            .push(ScriptedMessage {
                target: Target::Own,
                text: text.to_string(),
            });
        self
    }

    /// Executing `during` emits `text` addressed to the earlier sentence
    /// `target`.
    pub fn with_late_message(mut self, during: &str, target: &str, text: &str) -> Self {
        self.on_exec
            .entry(during.to_string())
            .or_default()
            .push(ScriptedMessage {
                target: Target::Statement(target.to_string()),
                text: text.to_string(),
            });
        self
    }

    /// Executing `during` emits `text` addressed to raw id `sid`.
    pub fn with_stray_message(mut self, during: &str, sid: i64, text: &str) -> Self {
        self.on_exec
            .entry(during.to_string())
            .or_default()
            .push(ScriptedMessage {
                target: Target::Sid(sid),
                text: text.to_string(),
            });
        self
    }

    /// Adding `sentence` emits `text` addressed to it, before `Completed`.
    pub fn with_parse_message(mut self, sentence: &str, text: &str) -> Self {
        self.on_add
            .entry(sentence.to_string())
            .or_default()
            .push(ScriptedMessage {
                target: Target::Own,
                text: text.to_string(),
            });
        self
    }

    /// Goals reported after `sentence`. Objects are given already printed.
    pub fn with_goals(mut self, sentence: &str, goals: Vec<Goal>) -> Self {
        self.goals.insert(sentence.to_string(), goals);
        self
    }

    /// Executing `sentence` raises an exception with `text`.
    pub fn with_failure(mut self, sentence: &str, text: &str) -> Self {
        self.failures.insert(sentence.to_string(), text.to_string());
        self
    }

    /// Adding `sentence` fails to parse: statements before it are added, then
    /// an exception naming no statement covers its first word, and nothing
    /// after it is added.
    pub fn with_parse_error(mut self, sentence: &str, text: &str) -> Self {
        self.parse_errors.insert(sentence.to_string(), text.to_string());
        self
    }

    pub fn into_transport(mut self) -> ScriptedTransport {
        ScriptedTransport::sexp(move |request| self.respond(request))
    }

    /// Answer lines for one `(query<N> <cmd>)` request.
    pub fn respond(&mut self, request: &Sexp) -> Vec<String> {
        let items = request.as_list().unwrap_or_default();
        let tag = items
            .first()
            .and_then(Sexp::to_string_lossy)
            .unwrap_or_default();
        let cmd = items.get(1).cloned().unwrap_or_else(|| Sexp::list(vec![]));
        let args = cmd.as_list().unwrap_or_default();

        let mut out = vec![line(answer(&tag, Sexp::from("Ack")))];
        if cmd.has_tag("Add") {
            let text = args.get(2).and_then(Sexp::as_atom).unwrap_or_default();
            self.add(&tag, text, &mut out);
        } else if cmd.has_tag("Exec") {
            let sid = args.get(1).and_then(Sexp::as_int).unwrap_or_default();
            self.exec(&tag, sid, &mut out);
        } else if cmd.has_tag("Query") {
            let sid = args
                .get(1)
                .and_then(|opts| opts.assoc("sid"))
                .and_then(Sexp::as_int)
                .unwrap_or_default();
            self.query_goals(&tag, sid, &mut out);
        } else if cmd.has_tag("Print") {
            let printed = args
                .get(2)
                .and_then(Sexp::as_list)
                .and_then(|kinded| kinded.get(1))
                .and_then(pp_string)
                .unwrap_or_default();
            out.push(line(answer(
                &tag,
                Sexp::list(vec![
                    Sexp::from("ObjList"),
                    Sexp::list(vec![Sexp::list(vec![
                        Sexp::from("CoqString"),
                        Sexp::from(printed.as_str()),
                    ])]),
                ]),
            )));
        } else {
            out.push(line(answer(&tag, exception(None, None, "Unknown command"))));
        }
        out.push(line(answer(&tag, Sexp::from("Completed"))));
        out
    }

    fn add(&mut self, tag: &str, text: &[u8], out: &mut Vec<String>) {
        let mut parse_feedback = Vec::new();
        for (begin, end) in split_sentences(text) {
            let sentence = String::from_utf8_lossy(&text[begin..end]).into_owned();
            if let Some(error) = self.parse_errors.get(&sentence) {
                let word_end = text[begin..end]
                    .iter()
                    .position(u8::is_ascii_whitespace)
                    .map_or(end, |i| begin + i);
                out.push(line(answer(tag, exception(Some((begin, word_end)), None, error))));
                break;
            }
            let sid = self.next_sid;
            self.next_sid += 1;
            out.push(line(answer(
                tag,
                Sexp::list(vec![
                    Sexp::from("Added"),
                    Sexp::Int(sid),
                    location(begin, end),
                    Sexp::from("NewTip"),
                ]),
            )));
            for scripted in self.on_add.get(&sentence).into_iter().flatten() {
                parse_feedback.push(message_feedback(sid, &scripted.text));
            }
            self.statements.insert(
                sid,
                Statement {
                    text: sentence,
                    begin,
                    end,
                },
            );
        }
        out.extend(parse_feedback.into_iter().map(line));
    }

    fn exec(&mut self, tag: &str, sid: i64, out: &mut Vec<String>) {
        let Some(statement) = self.statements.get(&sid).cloned() else {
            out.push(line(answer(tag, exception(None, None, "Invalid statement id"))));
            return;
        };
        for scripted in self.on_exec.get(&statement.text).into_iter().flatten() {
            let target = match &scripted.target {
                Target::Own => Some(sid),
                Target::Statement(text) => self.sid_of(text),
                Target::Sid(raw) => Some(*raw),
            };
            if let Some(target) = target {
                out.push(line(message_feedback(target, &scripted.text)));
            }
        }
        if let Some(error) = self.failures.get(&statement.text) {
            out.push(line(answer(
                tag,
                exception(Some((statement.begin, statement.end)), Some(sid), error),
            )));
        } else {
            out.push(line(feedback(sid, Sexp::from("Processed"))));
        }
    }

    fn query_goals(&mut self, tag: &str, sid: i64, out: &mut Vec<String>) {
        let goals = self
            .statements
            .get(&sid)
            .filter(|s| !self.failures.contains_key(&s.text))
            .and_then(|s| self.goals.get(&s.text))
            .cloned()
            .unwrap_or_default();
        let objects = if goals.is_empty() {
            Vec::new()
        } else {
            vec![Sexp::list(vec![
                Sexp::from("CoqExtGoal"),
                Sexp::list(vec![
                    pair("goals", Sexp::list(goals.iter().map(goal_sexp).collect())),
                    pair("stack", Sexp::list(vec![])),
                    pair("shelf", Sexp::list(vec![])),
                    pair("given_up", Sexp::list(vec![])),
                    pair("bullet", Sexp::list(vec![])),
                ]),
            ])]
        };
        out.push(line(answer(
            tag,
            Sexp::list(vec![Sexp::from("ObjList"), Sexp::list(objects)]),
        )));
    }

    fn sid_of(&self, text: &str) -> Option<i64> {
        self.statements
            .iter()
            .filter(|(_, s)| s.text == text)
            .map(|(sid, _)| *sid)
            .min()
    }
}

// ---------------------------------------------------------------------------
// MockLeanServer
// ---------------------------------------------------------------------------

/// A scripted `lean --server`: fixed proof states per position, and a fixed
/// message list reported after every `sync`.
#[derive(Default)]
pub struct MockLeanServer {
    states: HashMap<(usize, usize), String>,
    messages: Vec<serde_json::Value>,
}

impl MockLeanServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// State reported by `info` at 1-based `line`, 0-based `column`.
    pub fn with_state(mut self, line: usize, column: usize, state: &str) -> Self {
        self.states.insert((line, column), state.to_string());
        self
    }

    /// A message with a start position only.
    pub fn with_message(mut self, line: usize, column: usize, text: &str) -> Self {
        self.messages.push(serde_json::json!({
            "file_name": "test.lean",
            "pos_line": line,
            "pos_col": column,
            "severity": "information",
            "caption": "",
            "text": text,
        }));
        self
    }

    /// A message with both ends.
    pub fn with_message_span(
        mut self,
        (line, column): (usize, usize),
        (end_line, end_column): (usize, usize),
        text: &str,
    ) -> Self {
        self.messages.push(serde_json::json!({
            "file_name": "test.lean",
            "pos_line": line,
            "pos_col": column,
            "end_pos_line": end_line,
            "end_pos_col": end_column,
            "severity": "error",
            "caption": "",
            "text": text,
        }));
        self
    }

    pub fn into_transport(mut self) -> ScriptedTransport {
        ScriptedTransport::new(move |line| self.respond(line))
    }

    /// Answer lines for one JSON request.
    pub fn respond(&mut self, line: &[u8]) -> Vec<String> {
        let Ok(request) = serde_json::from_slice::<serde_json::Value>(line) else {
            return Vec::new();
        };
        let seq_num = request["seq_num"].clone();
        let answers = match request["command"].as_str() {
            Some("sync_output") => vec![],
            Some("sync") => vec![
                serde_json::json!({"response": "all_messages", "msgs": self.messages}),
                serde_json::json!({"response": "ok", "seq_num": seq_num, "message": "file invalidated"}),
            ],
            Some("info") => {
                let position = (
                    request["line"].as_u64().unwrap_or_default() as usize,
                    request["column"].as_u64().unwrap_or_default() as usize,
                );
                let record = match self.states.get(&position) {
                    Some(state) => serde_json::json!({"state": state}),
                    None => serde_json::json!({}),
                };
                vec![
                    serde_json::json!({"response": "current_tasks", "is_running": false, "tasks": []}),
                    serde_json::json!({"response": "ok", "seq_num": seq_num, "record": record}),
                ]
            }
            _ => vec![serde_json::json!({
                "response": "error",
                "seq_num": seq_num,
                "message": "unknown command",
            })],
        };
        answers.into_iter().map(|a| a.to_string()).collect()
    }
}

/// Byte ranges of `.`-terminated sentences, leading whitespace excluded.
fn split_sentences(text: &[u8]) -> Vec<(usize, usize)> {
    let mut sentences = Vec::new();
    let mut start = None;
    for (i, &b) in text.iter().enumerate() {
        if start.is_none() && !b.is_ascii_whitespace() {
            start = Some(i);
        }
        let closes = b == b'.' && text.get(i + 1).map_or(true, u8::is_ascii_whitespace);
        if let (true, Some(begin)) = (closes, start) {
            sentences.push((begin, i + 1));
            start = None;
        }
    }
    sentences
}

fn line(sexp: Sexp) -> String {
    String::from_utf8_lossy(&sexp_codec::encode(&sexp)).into_owned()
}

fn pair(key: &str, value: Sexp) -> Sexp {
    Sexp::list(vec![Sexp::from(key), value])
}

fn answer(tag: &str, body: Sexp) -> Sexp {
    Sexp::list(vec![Sexp::from("Answer"), Sexp::from(tag), body])
}

fn pp(text: &str) -> Sexp {
    Sexp::list(vec![Sexp::from("Pp_string"), Sexp::from(text)])
}

fn pp_string(object: &Sexp) -> Option<String> {
    match object.as_list() {
        Some([tag, text]) if tag.is_atom("Pp_string") => text.to_string_lossy(),
        _ => None,
    }
}

fn location(begin: usize, end: usize) -> Sexp {
    let offset = |n: usize| Sexp::Int(i64::try_from(n).unwrap_or(i64::MAX));
    Sexp::list(vec![
        pair("fname", Sexp::from("ToplevelInput")),
        pair("line_nb", Sexp::Int(1)),
        pair("bol_pos", Sexp::Int(0)),
        pair("line_nb_last", Sexp::Int(1)),
        pair("bol_pos_last", Sexp::Int(0)),
        pair("bp", offset(begin)),
        pair("ep", offset(end)),
    ])
}

fn exception(span: Option<(usize, usize)>, sid: Option<i64>, text: &str) -> Sexp {
    let loc = match span {
        Some((begin, end)) => Sexp::list(vec![location(begin, end)]),
        None => Sexp::list(vec![]),
    };
    let stm_ids = match sid {
        Some(sid) => Sexp::list(vec![Sexp::list(vec![Sexp::Int(sid)])]),
        None => Sexp::list(vec![]),
    };
    Sexp::list(vec![
        Sexp::from("CoqExn"),
        Sexp::list(vec![
            pair("loc", loc),
            pair("stm_ids", stm_ids),
            pair("backtrace", Sexp::list(vec![Sexp::from("Backtrace"), Sexp::list(vec![])])),
            pair("exn", Sexp::list(vec![Sexp::from("CErrors.UserError")])),
            pair("pp", pp(text)),
            pair("str", Sexp::from(text)),
        ]),
    ])
}

fn feedback(sid: i64, contents: Sexp) -> Sexp {
    Sexp::list(vec![
        Sexp::from("Feedback"),
        Sexp::list(vec![
            pair("doc_id", Sexp::Int(0)),
            pair("span_id", Sexp::Int(sid)),
            pair("route", Sexp::Int(0)),
            pair("contents", contents),
        ]),
    ])
}

fn message_feedback(sid: i64, text: &str) -> Sexp {
    feedback(
        sid,
        Sexp::list(vec![
            Sexp::from("Message"),
            pair("level", Sexp::from("Notice")),
            pair("loc", Sexp::list(vec![])),
            pair("pp", pp(text)),
            pair("str", Sexp::from(text)),
        ]),
    )
}

fn goal_sexp(goal: &Goal) -> Sexp {
    let name = match &goal.name {
        Some(n) => Sexp::list(vec![pair("Id", Sexp::from(n.as_str()))]),
        None => Sexp::list(vec![]),
    };
    let hyps = goal
        .hypotheses
        .iter()
        .rev()
        .map(|h| {
            let names = h
                .names
                .iter()
                .map(|n| pair("Id", Sexp::from(n.as_str())))
                .collect();
            let body = h.body.as_deref().map(pp).into_iter().collect();
            Sexp::list(vec![Sexp::list(names), Sexp::list(body), pp(&h.ty)])
        })
        .collect();
    Sexp::list(vec![
        pair(
            "info",
            Sexp::list(vec![
                pair("evar", Sexp::list(vec![Sexp::from("Ser_Evar"), Sexp::Int(1)])),
                pair("name", name),
            ]),
        ),
        pair("ty", pp(&goal.conclusion)),
        pair("hyp", Sexp::list(hyps)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentences_skip_leading_whitespace() {
        assert_eq!(split_sentences(b"  Check 1.\nCheck 2."), vec![(2, 10), (11, 19)]);
        assert_eq!(split_sentences(b"Check nat.(* x *)"), vec![]);
        assert_eq!(split_sentences(b"a.b. c."), vec![(0, 4), (5, 7)]);
    }

    #[test]
    fn ids_keep_counting_across_adds() {
        let mut sertop = MockSertop::new();
        let add = |text: &str| {
            sexp_codec::decode(format!("(query0 (Add () \"{text}\"))").as_bytes()).unwrap()
        };
        let first = sertop.respond(&add("a. b."));
        let second = sertop.respond(&add("c."));
        assert!(first[1].starts_with("(Answer query0 (Added 2 "));
        assert!(first[2].starts_with("(Answer query0 (Added 3 "));
        assert!(second[1].starts_with("(Answer query0 (Added 4 "));
    }
}

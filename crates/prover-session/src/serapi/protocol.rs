//! SerAPI wire vocabulary: request construction and response classification.

use sexp_codec::Sexp;

use crate::types::{Goal, Hypothesis, StatementId};

/// A command sent to `sertop`.
#[derive(Debug, Clone)]
pub enum SerapiRequest {
    /// Submit new source text.
    Add { text: Vec<u8> },
    /// Execute a previously added statement.
    Exec { sid: StatementId },
    /// Ask for the proof state after a statement.
    QueryGoals { sid: StatementId },
    /// Render an object to a string.
    Print {
        sid: StatementId,
        depth: usize,
        margin: usize,
        kind: Option<&'static str>,
        object: Sexp,
    },
}

impl SerapiRequest {
    pub fn to_sexp(&self) -> Sexp {
        match self {
            SerapiRequest::Add { text } => Sexp::list(vec![
                Sexp::from("Add"),
                Sexp::list(vec![]),
                Sexp::Atom(text.clone()),
            ]),
            SerapiRequest::Exec { sid } => Sexp::list(vec![Sexp::from("Exec"), Sexp::Int(sid.0)]),
            SerapiRequest::QueryGoals { sid } => Sexp::list(vec![
                Sexp::from("Query"),
                Sexp::list(vec![pair("sid", Sexp::Int(sid.0))]),
                Sexp::from("EGoals"),
            ]),
            SerapiRequest::Print {
                sid,
                depth,
                margin,
                kind,
                object,
            } => {
                let pp = Sexp::list(vec![
                    pair("pp_format", Sexp::from("PpStr")),
                    pair("pp_depth", Sexp::Int(to_i64(*depth))),
                    pair("pp_margin", Sexp::Int(to_i64(*margin))),
                ]);
                let meta = Sexp::list(vec![pair("sid", Sexp::Int(sid.0)), pair("pp", pp)]);
                let object = match kind {
                    Some(kind) => Sexp::list(vec![Sexp::from(*kind), object.clone()]),
                    None => object.clone(),
                };
                Sexp::list(vec![Sexp::from("Print"), meta, object])
            }
        }
    }

    /// Wire line for this request, tagged `query<qid>`.
    pub fn encode(&self, qid: u64) -> Vec<u8> {
        let tagged = Sexp::list(vec![Sexp::from(format!("query{qid}").as_str()), self.to_sexp()]);
        sexp_codec::encode(&tagged)
    }
}

fn pair(key: &str, value: Sexp) -> Sexp {
    Sexp::list(vec![Sexp::from(key), value])
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// A checker-raised exception.
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    /// Statements the exception concerns, when reported.
    pub sids: Option<Vec<StatementId>>,
    /// Byte span of the offending text within the submitted chunk.
    pub span: Option<(usize, usize)>,
    pub text: String,
}

/// A diagnostic message, not yet pretty-printed.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub sid: StatementId,
    pub level: String,
    pub object: Sexp,
}

/// One classified event; a response line yields zero or more.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Ack,
    /// Terminal marker: nothing more for the current request.
    Completed,
    Added { sid: StatementId, span: (usize, usize) },
    Exception(Exception),
    Message(Diagnostic),
    String(String),
    Goal(Goal<Sexp>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    /// A tag this client does not know about.
    #[error("Unexpected {0}")]
    Unknown(String),
    /// A known tag with the wrong shape.
    #[error("Malformed {0}")]
    Malformed(String),
}

type Classified = Result<Vec<Event>, ClassifyError>;

/// Classify one decoded response line.
pub fn classify(response: &Sexp) -> Classified {
    let items = response.as_list().unwrap_or_default();
    match items.first() {
        Some(tag) if tag.is_atom("Answer") => match items.get(2) {
            Some(answer) => classify_answer(answer),
            None => Err(malformed("answer", response)),
        },
        Some(tag) if tag.is_atom("Feedback") => match items.get(1) {
            Some(feedback) => classify_feedback(feedback),
            None => Err(malformed("feedback", response)),
        },
        _ => Err(ClassifyError::Unknown(format!("response: {response}"))),
    }
}

fn malformed(what: &str, sexp: &Sexp) -> ClassifyError {
    ClassifyError::Malformed(format!("{what}: {sexp}"))
}

fn classify_answer(answer: &Sexp) -> Classified {
    let items = answer.as_list().unwrap_or_default();
    if answer.has_tag("Ack") {
        Ok(vec![Event::Ack])
    } else if answer.has_tag("Completed") {
        Ok(vec![Event::Completed])
    } else if answer.has_tag("Added") {
        let sid = items.get(1).and_then(statement_id);
        let span = items.get(2).and_then(location_span);
        match (sid, span) {
            (Some(sid), Some(span)) => Ok(vec![Event::Added { sid, span }]),
            _ => Err(malformed("Added answer", answer)),
        }
    } else if answer.has_tag("ObjList") {
        let objects = items.get(1).and_then(Sexp::as_list).unwrap_or_default();
        let mut events = Vec::new();
        for object in objects {
            classify_object(object, &mut events)?;
        }
        Ok(events)
    } else if answer.has_tag("CoqExn") {
        let data = items.get(1).ok_or_else(|| malformed("CoqExn answer", answer))?;
        Ok(vec![Event::Exception(exception(data)?)])
    } else {
        Err(ClassifyError::Unknown(format!("answer: {answer}")))
    }
}

fn classify_object(object: &Sexp, events: &mut Vec<Event>) -> Result<(), ClassifyError> {
    let items = object.as_list().unwrap_or_default();
    if object.has_tag("CoqString") {
        let text = items
            .get(1)
            .and_then(Sexp::to_string_lossy)
            .ok_or_else(|| malformed("CoqString", object))?;
        events.push(Event::String(text));
    } else if object.has_tag("CoqExtGoal") {
        let goals = items
            .get(1)
            .and_then(|g| g.assoc("goals"))
            .and_then(Sexp::as_list)
            .unwrap_or_default();
        for goal in goals {
            events.push(Event::Goal(deserialize_goal(goal)?));
        }
    } else {
        tracing::debug!(%object, "Ignoring unsupported object in ObjList");
    }
    Ok(())
}

fn exception(data: &Sexp) -> Result<Exception, ClassifyError> {
    let text = data
        .assoc("str")
        .and_then(Sexp::to_string_lossy)
        .ok_or_else(|| malformed("CoqExn", data))?;
    let span = data
        .assoc("loc")
        .and_then(option_value)
        .and_then(location_span);
    let sids = data.assoc("stm_ids").and_then(option_value).map(|ids| {
        ids.as_list()
            .unwrap_or_default()
            .iter()
            .filter_map(statement_id)
            .collect()
    });
    Ok(Exception { sids, span, text })
}

fn classify_feedback(feedback: &Sexp) -> Classified {
    let contents = feedback
        .assoc("contents")
        .ok_or_else(|| malformed("feedback", feedback))?;
    if contents.has_tag("Message") {
        let fields = contents.as_list().and_then(|f| f.get(1..)).unwrap_or_default();
        let sid = feedback
            .assoc("span_id")
            .and_then(statement_id)
            .ok_or_else(|| malformed("feedback", feedback))?;
        let level = assoc_in(fields, "level")
            .and_then(Sexp::to_string_lossy)
            .unwrap_or_default();
        let object = assoc_in(fields, "pp")
            .cloned()
            .ok_or_else(|| malformed("message", contents))?;
        Ok(vec![Event::Message(Diagnostic { sid, level, object })])
    } else if ["FileLoaded", "ProcessingIn", "Processed", "AddedAxiom"]
        .iter()
        .any(|tag| contents.has_tag(tag))
    {
        Ok(Vec::new())
    } else {
        Err(ClassifyError::Unknown(format!("feedback: {feedback}")))
    }
}

/// `(goals ...)` entry: `((info ((name ((Id n))) ..)) (ty T) (hyp (H ..)))`.
fn deserialize_goal(goal: &Sexp) -> Result<Goal<Sexp>, ClassifyError> {
    let conclusion = goal
        .assoc("ty")
        .cloned()
        .ok_or_else(|| malformed("goal", goal))?;
    let name = goal
        .assoc("info")
        .and_then(|info| info.assoc("name"))
        .and_then(|name| name.assoc("Id"))
        .and_then(Sexp::to_string_lossy);
    let wire_hyps = goal
        .assoc("hyp")
        .and_then(Sexp::as_list)
        .unwrap_or_default();
    // Innermost first on the wire; displayed outermost first.
    let hypotheses = wire_hyps
        .iter()
        .rev()
        .map(deserialize_hyp)
        .collect::<Result<_, _>>()?;
    Ok(Goal {
        name,
        conclusion,
        hypotheses,
    })
}

/// `(((Id a) (Id b)) (BODY?) TYPE)`.
fn deserialize_hyp(hyp: &Sexp) -> Result<Hypothesis<Sexp>, ClassifyError> {
    let [meta, body, ty] = hyp.as_list().unwrap_or_default() else {
        return Err(malformed("hypothesis", hyp));
    };
    let names = meta
        .as_list()
        .unwrap_or_default()
        .iter()
        .filter_map(|entry| match entry.as_list() {
            Some([tag, name]) if tag.is_atom("Id") => name.to_string_lossy(),
            _ => None,
        })
        .collect();
    let body = match body.as_list() {
        Some([]) => None,
        Some([value]) => Some(value.clone()),
        _ => return Err(malformed("hypothesis body", hyp)),
    };
    Ok(Hypothesis {
        names,
        body,
        ty: ty.clone(),
    })
}

/// Look up `(key value)` among `items`.
fn assoc_in<'a>(items: &'a [Sexp], key: &str) -> Option<&'a Sexp> {
    items.iter().find_map(|entry| match entry.as_list() {
        Some([k, value, ..]) if k.is_atom(key) => Some(value),
        _ => None,
    })
}

/// Contents of an OCaml option: `()` is none, `(x)` is some.
fn option_value(option: &Sexp) -> Option<&Sexp> {
    match option.as_list() {
        Some([value]) => Some(value),
        _ => None,
    }
}

fn statement_id(sexp: &Sexp) -> Option<StatementId> {
    sexp.as_int().map(StatementId)
}

/// Byte span of a location record (`bp`/`ep` fields).
fn location_span(loc: &Sexp) -> Option<(usize, usize)> {
    let offset = |key| {
        loc.assoc(key)
            .and_then(Sexp::as_int)
            .and_then(|n| usize::try_from(n).ok())
    };
    Some((offset("bp")?, offset("ep")?))
}

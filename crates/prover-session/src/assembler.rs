//! Statement-by-statement fragment assembly, shared by backends that hand
//! out statement ids.
//!
//! Assembly runs in two phases. The first submits the chunk, executes every
//! statement and buffers all printed messages; the second routes the buffer
//! to sentences by statement id. Feedback for a statement may arrive while
//! a later one is executing, so nothing is attached until every statement
//! of the chunk has run.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::observer::{Level, Notification, Observer};
use crate::text::{indent, TextView};
use crate::types::{DriverError, Fragment, Goal, Message, StatementId};

/// A recognized part of a chunk. `id` is `None` for text between
/// statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub id: Option<StatementId>,
    pub begin: usize,
    pub end: usize,
}

/// An unprinted diagnostic addressed to a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Feedback<T> {
    pub id: StatementId,
    pub level: String,
    pub object: T,
}

/// The checker-facing half of assembly.
#[async_trait]
pub trait StatementBackend: Send {
    /// Raw checker object, rendered by the `print_*` methods.
    type Object: Send + Sync;

    /// Submit a chunk. Returns spans covering it contiguously, plus
    /// feedback that arrived while it was being parsed.
    async fn add(
        &mut self,
        view: &TextView<'_>,
    ) -> Result<(Vec<Span>, Vec<Feedback<Self::Object>>), DriverError>;

    async fn exec(
        &mut self,
        id: StatementId,
        view: &TextView<'_>,
    ) -> Result<Vec<Feedback<Self::Object>>, DriverError>;

    async fn query_goals(
        &mut self,
        id: StatementId,
        view: &TextView<'_>,
    ) -> Result<Vec<Goal<Self::Object>>, DriverError>;

    async fn print_feedback(
        &mut self,
        feedback: &Feedback<Self::Object>,
    ) -> Result<String, DriverError>;

    async fn print_goal(
        &mut self,
        goal: Goal<Self::Object>,
        id: StatementId,
    ) -> Result<Goal, DriverError>;
}

/// Annotate one chunk.
///
/// Messages addressed to no sentence of the chunk are reported to
/// `observer` as warnings and dropped.
pub async fn assemble<B: StatementBackend>(
    backend: &mut B,
    view: &TextView<'_>,
    observer: &dyn Observer,
) -> Result<Vec<Fragment>, DriverError> {
    let (spans, early) = backend.add(view).await?;

    let mut fragments = Vec::with_capacity(spans.len());
    let mut index = HashMap::new();
    let mut statements = Vec::new();
    for span in &spans {
        let contents = view.text(span.begin, span.end).into_owned();
        match span.id {
            None => fragments.push(Fragment::text(contents)),
            Some(id) => {
                index.insert(id, fragments.len());
                statements.push(id);
                fragments.push(Fragment::sentence(contents));
            }
        }
    }

    let mut buffered = Vec::new();
    for feedback in &early {
        buffered.push((feedback.id, backend.print_feedback(feedback).await?));
    }
    for id in statements {
        for feedback in &backend.exec(id, view).await? {
            buffered.push((feedback.id, backend.print_feedback(feedback).await?));
        }
        let mut goals = Vec::new();
        for goal in backend.query_goals(id, view).await? {
            goals.push(backend.print_goal(goal, id).await?);
        }
        if let Some(Fragment::Sentence { goals: slot, .. }) =
            index.get(&id).and_then(|&i| fragments.get_mut(i))
        {
            *slot = goals;
        }
    }

    let orphans = attach_messages(&mut fragments, &index, buffered);
    if !orphans.is_empty() {
        let subject = view.text(0, view.len()).into_owned();
        let location = view.translate_range(0, Some(view.len()));
        for (id, text) in orphans {
            observer.notify(Notification {
                subject: subject.clone(),
                message: format!("Orphaned message for sid {id}:\n{}", indent(&text, " >  ")),
                location: Some(location.clone()),
                level: Level::Warning,
            });
        }
    }
    Ok(fragments)
}

/// Append each message to the sentence its id points to, in order.
///
/// Returns the messages that matched no sentence.
pub fn attach_messages(
    fragments: &mut [Fragment],
    index: &HashMap<StatementId, usize>,
    messages: Vec<(StatementId, String)>,
) -> Vec<(StatementId, String)> {
    let mut orphans = Vec::new();
    for (id, text) in messages {
        match index.get(&id).and_then(|&i| fragments.get_mut(i)) {
            Some(Fragment::Sentence { messages, .. }) => messages.push(Message::new(text)),
            _ => orphans.push((id, text)),
        }
    }
    orphans
}

/// Spans for `added` statement ranges, with the gaps filled by text spans.
///
/// `added` must be in submission order; ranges that overlap, run backwards
/// or leave the chunk are a protocol error.
pub fn fill_gaps(
    added: &[(StatementId, usize, usize)],
    len: usize,
) -> Result<Vec<Span>, DriverError> {
    let mut spans = Vec::with_capacity(2 * added.len() + 1);
    let mut cursor = 0;
    for &(id, begin, end) in added {
        if begin < cursor || end < begin || end > len {
            return Err(DriverError::Protocol(format!(
                "Statement {id} spans bytes {begin}..{end}, outside {cursor}..{len}"
            )));
        }
        if begin > cursor {
            spans.push(Span {
                id: None,
                begin: cursor,
                end: begin,
            });
        }
        spans.push(Span {
            id: Some(id),
            begin,
            end,
        });
        cursor = end;
    }
    if cursor < len {
        spans.push(Span {
            id: None,
            begin: cursor,
            end: len,
        });
    }
    Ok(spans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::CollectingObserver;
    use crate::types::{fragments_text, Chunk, Hypothesis};

    /// Statements are the `;`-terminated runs; feedback is whatever the test
    /// queued for each id, delivered during `exec` of `deliver_at`.
    struct FakeBackend {
        early: Vec<Feedback<String>>,
        late: Vec<(StatementId, Feedback<String>)>,
        goals: HashMap<StatementId, Vec<Goal<String>>>,
        log: Vec<String>,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                early: Vec::new(),
                late: Vec::new(),
                goals: HashMap::new(),
                log: Vec::new(),
            }
        }
    }

    fn feedback(id: i64, text: &str) -> Feedback<String> {
        Feedback {
            id: StatementId(id),
            level: "Notice".into(),
            object: text.into(),
        }
    }

    #[async_trait]
    impl StatementBackend for FakeBackend {
        type Object = String;

        async fn add(
            &mut self,
            view: &TextView<'_>,
        ) -> Result<(Vec<Span>, Vec<Feedback<String>>), DriverError> {
            let bytes = view.as_bytes();
            let mut added = Vec::new();
            let mut begin = 0;
            let mut next_id = 1;
            for (i, &b) in bytes.iter().enumerate() {
                if b == b';' {
                    let start = begin + bytes[begin..i].iter().take_while(|b| b.is_ascii_whitespace()).count();
                    added.push((StatementId(next_id), start, i + 1));
                    next_id += 1;
                    begin = i + 1;
                }
            }
            Ok((fill_gaps(&added, bytes.len())?, std::mem::take(&mut self.early)))
        }

        async fn exec(
            &mut self,
            id: StatementId,
            _view: &TextView<'_>,
        ) -> Result<Vec<Feedback<String>>, DriverError> {
            self.log.push(format!("exec {id}"));
            let (now, later): (Vec<_>, Vec<_>) =
                std::mem::take(&mut self.late).into_iter().partition(|(at, _)| *at == id);
            self.late = later;
            Ok(now.into_iter().map(|(_, f)| f).collect())
        }

        async fn query_goals(
            &mut self,
            id: StatementId,
            _view: &TextView<'_>,
        ) -> Result<Vec<Goal<String>>, DriverError> {
            self.log.push(format!("goals {id}"));
            Ok(self.goals.remove(&id).unwrap_or_default())
        }

        async fn print_feedback(&mut self, feedback: &Feedback<String>) -> Result<String, DriverError> {
            Ok(feedback.object.to_uppercase())
        }

        async fn print_goal(
            &mut self,
            goal: Goal<String>,
            _id: StatementId,
        ) -> Result<Goal, DriverError> {
            Ok(Goal {
                name: goal.name,
                conclusion: goal.conclusion.to_uppercase(),
                hypotheses: goal.hypotheses,
            })
        }
    }

    fn messages(fragment: &Fragment) -> Vec<&str> {
        match fragment {
            Fragment::Sentence { messages, .. } => messages.iter().map(|m| m.contents.as_str()).collect(),
            Fragment::Text { .. } => panic!("Expected a sentence, got {fragment:?}"),
        }
    }

    #[test]
    fn fill_gaps_covers_chunk() {
        let spans = fill_gaps(&[(StatementId(1), 2, 5), (StatementId(2), 5, 7)], 9).unwrap();
        assert_eq!(
            spans,
            vec![
                Span { id: None, begin: 0, end: 2 },
                Span { id: Some(StatementId(1)), begin: 2, end: 5 },
                Span { id: Some(StatementId(2)), begin: 5, end: 7 },
                Span { id: None, begin: 7, end: 9 },
            ]
        );
        assert_eq!(fill_gaps(&[], 0).unwrap(), vec![]);
    }

    #[test]
    fn fill_gaps_rejects_overlap_and_overflow() {
        let overlap = fill_gaps(&[(StatementId(1), 0, 5), (StatementId(2), 3, 7)], 9);
        assert!(matches!(overlap, Err(DriverError::Protocol(_))));
        let overflow = fill_gaps(&[(StatementId(1), 0, 12)], 9);
        assert!(matches!(overflow, Err(DriverError::Protocol(_))));
    }

    #[test]
    fn attach_preserves_arrival_order() {
        let mut fragments = vec![Fragment::sentence("a;"), Fragment::text(" "), Fragment::sentence("b;")];
        let index = HashMap::from([(StatementId(1), 0), (StatementId(2), 2)]);
        let orphans = attach_messages(
            &mut fragments,
            &index,
            vec![
                (StatementId(2), "x".into()),
                (StatementId(1), "y".into()),
                (StatementId(2), "z".into()),
                (StatementId(9), "lost".into()),
            ],
        );
        assert_eq!(messages(&fragments[0]), vec!["y"]);
        assert_eq!(messages(&fragments[2]), vec!["x", "z"]);
        assert_eq!(orphans, vec![(StatementId(9), "lost".to_string())]);
    }

    #[tokio::test]
    async fn assemble_is_text_exact() {
        let chunk = Chunk::new("  a; b;\n (* c *) ");
        let view = TextView::of_chunk(&chunk);
        let observer = CollectingObserver::new();
        let mut backend = FakeBackend::new();
        let fragments = assemble(&mut backend, &view, &observer).await.unwrap();
        assert_eq!(fragments_text(&fragments), chunk.text);
        assert_eq!(fragments.len(), 5);
        assert_eq!(fragments[1], Fragment::sentence("a;"));
        assert_eq!(backend.log, vec!["exec 1", "goals 1", "exec 2", "goals 2"]);
    }

    #[tokio::test]
    async fn late_feedback_reaches_earlier_statement() {
        let chunk = Chunk::new("a; b;");
        let view = TextView::of_chunk(&chunk);
        let observer = CollectingObserver::new();
        let mut backend = FakeBackend::new();
        backend.early.push(feedback(2, "parsed"));
        backend.late.push((StatementId(2), feedback(1, "late for a")));
        backend.late.push((StatementId(1), feedback(1, "own")));
        backend.goals.insert(
            StatementId(1),
            vec![Goal {
                name: None,
                conclusion: "p".into(),
                hypotheses: vec![Hypothesis {
                    names: vec!["h".into()],
                    body: None,
                    ty: "q".into(),
                }],
            }],
        );

        let fragments = assemble(&mut backend, &view, &observer).await.unwrap();
        assert_eq!(messages(&fragments[0]), vec!["OWN", "LATE FOR A"]);
        assert_eq!(messages(&fragments[2]), vec!["PARSED"]);
        let Fragment::Sentence { goals, .. } = &fragments[0] else {
            panic!("Expected a sentence");
        };
        assert_eq!(goals[0].conclusion, "P");
        assert_eq!(observer.exit_code(), 0);
    }

    #[tokio::test]
    async fn orphaned_feedback_warns_once() {
        let chunk = Chunk::new("a;");
        let view = TextView::of_chunk(&chunk);
        let observer = CollectingObserver::new();
        let mut backend = FakeBackend::new();
        backend.late.push((StatementId(1), feedback(42, "stray")));

        let fragments = assemble(&mut backend, &view, &observer).await.unwrap();
        assert!(messages(&fragments[0]).is_empty());
        let notes = observer.notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].level, Level::Warning);
        assert_eq!(notes[0].message, "Orphaned message for sid 42:\n >  STRAY");
        let location = notes[0].location.as_ref().unwrap();
        assert_eq!((location.begin.line, location.begin.column), (1, 1));
        assert_eq!(location.end.as_ref().unwrap().column, 3);
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use sexp_codec::Sexp;

use super::protocol::{classify, Diagnostic, Event, Exception, SerapiRequest};
use crate::assembler::{assemble, fill_gaps, Feedback, Span, StatementBackend};
use crate::config::{SerapiConfig, MIN_PP_MARGIN};
use crate::observer::{Level, Notification, Observer};
use crate::text::{highlight_substring, indent, TextView};
use crate::transport::Transport;
use crate::types::{Chunk, DriverError, Fragment, Goal, Hypothesis, StatementId};

const QUOTE: &str = "  > ";

/// One conversation with `sertop`.
///
/// A session is good for a single [`annotate`](Self::annotate) call; statement
/// ids keep counting across the chunks of that call.
pub struct SerapiSession<T: Transport> {
    transport: T,
    config: SerapiConfig,
    observer: Arc<dyn Observer>,
    next_qid: u64,
    last_response: Option<String>,
}

impl<T: Transport> SerapiSession<T> {
    pub fn new(transport: T, config: SerapiConfig, observer: Arc<dyn Observer>) -> Self {
        Self {
            transport,
            config,
            observer,
            next_qid: 0,
            last_response: None,
        }
    }

    /// Annotate `chunks` in order, then shut the checker down whatever the
    /// outcome.
    pub async fn annotate(mut self, chunks: &[Chunk]) -> Result<Vec<Vec<Fragment>>, DriverError> {
        let result = self.annotate_chunks(chunks).await;
        self.transport.kill().await;
        result
    }

    async fn annotate_chunks(&mut self, chunks: &[Chunk]) -> Result<Vec<Vec<Fragment>>, DriverError> {
        let observer = Arc::clone(&self.observer);
        let mut annotated = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let view = TextView::of_chunk(chunk);
            annotated.push(assemble(&mut *self, &view, observer.as_ref()).await?);
        }
        Ok(annotated)
    }

    /// Terminate the checker. Safe to call more than once.
    pub async fn kill(&mut self) {
        self.transport.kill().await;
    }

    async fn send(&mut self, request: &SerapiRequest) -> Result<(), DriverError> {
        let line = request.encode(self.next_qid);
        self.next_qid += 1;
        tracing::debug!(">> {}", String::from_utf8_lossy(&line));
        self.transport.write_line(&line).await
    }

    /// Next classified response; unclassifiable ones are skipped in
    /// best-effort mode.
    async fn next_events(&mut self) -> Result<Vec<Event>, DriverError> {
        loop {
            let line = match self.transport.read_line().await? {
                Some(line) => line,
                None => {
                    return Err(DriverError::ProcessDied {
                        last_response: self.last_response.clone(),
                    })
                }
            };
            let text = String::from_utf8_lossy(&line).into_owned();
            tracing::debug!("<< {text}");
            if line.iter().all(u8::is_ascii_whitespace) {
                return Err(DriverError::Protocol("sertop printed an empty line".into()));
            }
            self.last_response = Some(text.clone());

            let classified = sexp_codec::decode(&line)
                .map_err(DriverError::from)
                .and_then(|sexp| classify(&sexp).map_err(|e| DriverError::Protocol(e.to_string())));
            match classified {
                Ok(events) => return Ok(events),
                Err(e) if self.config.best_effort => {
                    tracing::warn!(error = %e, response = %text, "Skipping unclassifiable response");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read events up to the terminal marker.
    ///
    /// Exceptions concerning `sid` (or any exception, when `sid` is `None`
    /// or the exception names no statement) are reported to the observer.
    async fn collect(
        &mut self,
        sid: Option<StatementId>,
        view: Option<&TextView<'_>>,
    ) -> Result<Vec<Event>, DriverError> {
        let mut collected = Vec::new();
        loop {
            for event in self.next_events().await? {
                match event {
                    Event::Ack => {}
                    Event::Completed => return Ok(collected),
                    Event::Exception(exn) => {
                        let concerned = match (sid, &exn.sids) {
                            (Some(sid), Some(sids)) => sids.contains(&sid),
                            _ => true,
                        };
                        if concerned {
                            self.warn_on_exception(&exn, view);
                        }
                        collected.push(Event::Exception(exn));
                    }
                    other => collected.push(other),
                }
            }
        }
    }

    fn warn_on_exception(&self, exn: &Exception, view: Option<&TextView<'_>>) {
        let mut message = format!("Coq raised an exception:\n{}", indent(&exn.text, QUOTE));
        let mut location = None;
        let mut subject = String::new();
        if let Some(view) = view {
            let (begin, end) = view.clip(exn.span);
            if !view.is_empty() {
                let highlight = highlight_substring(view.as_bytes(), begin, end);
                message.push_str("\nThe offending chunk is delimited by >>>…<<< below:\n");
                message.push_str(&indent(&String::from_utf8_lossy(&highlight), QUOTE));
            }
            location = Some(view.translate_range(begin, Some(end)));
            subject = view.text(0, view.len()).into_owned();
        }
        message.push_str("\nResults past this point may be unreliable.");
        self.observer.notify(Notification {
            subject,
            message,
            location,
            level: Level::Error,
        });
    }

    /// Render `object`, or return `None` without a round trip when there is
    /// nothing to print.
    pub async fn pretty_print(
        &mut self,
        object: Option<&Sexp>,
        sid: StatementId,
        kind: Option<&'static str>,
        depth: usize,
        margin: usize,
    ) -> Result<Option<String>, DriverError> {
        let Some(object) = object else {
            return Ok(None);
        };
        let request = SerapiRequest::Print {
            sid,
            depth,
            margin,
            kind,
            object: object.clone(),
        };
        self.send(&request).await?;
        let mut strings = Vec::new();
        for event in self.collect(Some(sid), None).await? {
            match event {
                Event::String(s) => strings.push(s),
                other => tracing::debug!(event = ?other, "Ignoring event in Print answer"),
            }
        }
        match <[String; 1]>::try_from(strings) {
            Ok([s]) => Ok(Some(s)),
            Err(strings) => Err(DriverError::Protocol(format!(
                "Expected one string in Print answer, got {strings:?}"
            ))),
        }
    }

    async fn pretty_hypothesis(
        &mut self,
        hyp: Hypothesis<Sexp>,
        sid: StatementId,
    ) -> Result<Hypothesis, DriverError> {
        let (depth, margin) = (self.config.pp_depth, self.config.pp_margin);
        let name_width = hyp.names.iter().map(|n| n.chars().count()).max().unwrap_or(0);
        let width = margin.saturating_sub(name_width).max(MIN_PP_MARGIN);
        let body = self
            .pretty_print(hyp.body.as_ref(), sid, Some("CoqExpr"), depth, width - 2)
            .await?;
        let ty = self
            .pretty_print(Some(&hyp.ty), sid, Some("CoqExpr"), depth, width - 3)
            .await?
            .unwrap_or_default();
        Ok(Hypothesis {
            names: hyp.names,
            body,
            ty,
        })
    }
}

#[async_trait]
impl<T: Transport> StatementBackend for SerapiSession<T> {
    type Object = Sexp;

    async fn add(
        &mut self,
        view: &TextView<'_>,
    ) -> Result<(Vec<Span>, Vec<Feedback<Sexp>>), DriverError> {
        self.send(&SerapiRequest::Add {
            text: view.as_bytes().to_vec(),
        })
        .await?;
        let mut added = Vec::new();
        let mut early = Vec::new();
        for event in self.collect(None, Some(view)).await? {
            match event {
                Event::Added { sid, span } => added.push((sid, span.0, span.1)),
                Event::Message(diagnostic) => early.push(feedback(diagnostic)),
                _ => {}
            }
        }
        Ok((fill_gaps(&added, view.len())?, early))
    }

    async fn exec(
        &mut self,
        id: StatementId,
        view: &TextView<'_>,
    ) -> Result<Vec<Feedback<Sexp>>, DriverError> {
        self.send(&SerapiRequest::Exec { sid: id }).await?;
        Ok(self
            .collect(Some(id), Some(view))
            .await?
            .into_iter()
            .filter_map(|event| match event {
                Event::Message(diagnostic) => Some(feedback(diagnostic)),
                _ => None,
            })
            .collect())
    }

    async fn query_goals(
        &mut self,
        id: StatementId,
        view: &TextView<'_>,
    ) -> Result<Vec<Goal<Sexp>>, DriverError> {
        self.send(&SerapiRequest::QueryGoals { sid: id }).await?;
        Ok(self
            .collect(Some(id), Some(view))
            .await?
            .into_iter()
            .filter_map(|event| match event {
                Event::Goal(goal) => Some(goal),
                _ => None,
            })
            .collect())
    }

    async fn print_feedback(&mut self, feedback: &Feedback<Sexp>) -> Result<String, DriverError> {
        let (depth, margin) = (self.config.pp_depth, self.config.pp_margin);
        Ok(self
            .pretty_print(Some(&feedback.object), feedback.id, Some("CoqPp"), depth, margin)
            .await?
            .unwrap_or_default())
    }

    async fn print_goal(&mut self, goal: Goal<Sexp>, id: StatementId) -> Result<Goal, DriverError> {
        let (depth, margin) = (self.config.pp_depth, self.config.pp_margin);
        let conclusion = self
            .pretty_print(Some(&goal.conclusion), id, Some("CoqExpr"), depth, margin)
            .await?
            .unwrap_or_default();
        let mut hypotheses = Vec::with_capacity(goal.hypotheses.len());
        for hyp in goal.hypotheses {
            hypotheses.push(self.pretty_hypothesis(hyp, id).await?);
        }
        Ok(Goal {
            name: goal.name,
            conclusion,
            hypotheses,
        })
    }
}

fn feedback(diagnostic: Diagnostic) -> Feedback<Sexp> {
    Feedback {
        id: diagnostic.sid,
        level: diagnostic.level,
        object: diagnostic.object,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::ScriptedTransport;
    use crate::observer::CollectingObserver;

    fn session(
        responder: impl FnMut(&Sexp) -> Vec<String> + Send + 'static,
        config: SerapiConfig,
    ) -> (SerapiSession<ScriptedTransport>, Arc<CollectingObserver>) {
        let observer = Arc::new(CollectingObserver::new());
        let transport = ScriptedTransport::sexp(responder);
        (SerapiSession::new(transport, config, observer.clone()), observer)
    }

    fn done(tag: &str, body: &[&str]) -> Vec<String> {
        let mut lines = vec![format!("(Answer {tag} Ack)")];
        lines.extend(body.iter().map(|b| b.to_string()));
        lines.push(format!("(Answer {tag} Completed)"));
        lines
    }

    #[tokio::test]
    async fn pretty_print_none_skips_round_trip() {
        let (mut session, _) = session(|_| panic!("No request expected"), SerapiConfig::default());
        let printed = session
            .pretty_print(None, StatementId(1), Some("CoqExpr"), 30, 55)
            .await
            .unwrap();
        assert!(printed.is_none());
        assert_eq!(session.next_qid, 0);
    }

    #[tokio::test]
    async fn pretty_print_requires_one_string() {
        let (mut session, _) = session(
            |_| done("query0", &["(Answer query0 (ObjList ()))"]),
            SerapiConfig::default(),
        );
        let err = session
            .pretty_print(Some(&Sexp::from("x")), StatementId(1), None, 30, 55)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Expected one string in Print answer"));
    }

    #[tokio::test]
    async fn pretty_print_ignores_feedback_in_answer() {
        let (mut session, _) = session(
            |_| {
                done(
                    "query0",
                    &[
                        r#"(Feedback ((doc_id 0) (span_id 2) (route 0) (contents (Message (level Notice) (loc ()) (pp (Pp_string late)) (str late)))))"#,
                        r#"(Answer query0 (ObjList ((CoqString nat))))"#,
                    ],
                )
            },
            SerapiConfig::default(),
        );
        let printed = session
            .pretty_print(Some(&Sexp::from("x")), StatementId(2), Some("CoqExpr"), 30, 55)
            .await
            .unwrap();
        assert_eq!(printed.as_deref(), Some("nat"));
    }

    #[tokio::test]
    async fn pretty_print_rejects_two_strings() {
        let (mut session, _) = session(
            |_| done("query0", &[r#"(Answer query0 (ObjList ((CoqString a) (CoqString b))))"#]),
            SerapiConfig::default(),
        );
        let err = session
            .pretty_print(Some(&Sexp::from("x")), StatementId(2), None, 30, 55)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Protocol(_)));
    }

    #[tokio::test]
    async fn hypothesis_margins_narrow_by_name_width() {
        let margins = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = margins.clone();
        let (mut session, _) = session(
            move |request| {
                let margin = request
                    .as_list()
                    .and_then(|r| r.get(1))
                    .and_then(|print| print.as_list())
                    .and_then(|p| p.get(1))
                    .and_then(|meta| meta.assoc("pp"))
                    .and_then(|pp| pp.assoc("pp_margin"))
                    .and_then(Sexp::as_int);
                seen.lock().unwrap().push(margin.unwrap());
                done("q", &[r#"(Answer q (ObjList ((CoqString "t"))))"#])
            },
            SerapiConfig::default(),
        );
        let hyp = Hypothesis {
            names: vec!["x".into(), "longname".into()],
            body: Some(Sexp::from("b")),
            ty: Sexp::from("t"),
        };
        let printed = session.pretty_hypothesis(hyp, StatementId(2)).await.unwrap();
        assert_eq!(printed.body.as_deref(), Some("t"));
        assert_eq!(printed.ty, "t");
        // 55 - 8 = 47.
        assert_eq!(*margins.lock().unwrap(), vec![45, 44]);

        let wide = Hypothesis {
            names: vec!["a".repeat(50)],
            body: None,
            ty: Sexp::from("t"),
        };
        session.pretty_hypothesis(wide, StatementId(2)).await.unwrap();
        assert_eq!(margins.lock().unwrap()[2], (MIN_PP_MARGIN - 3) as i64);
    }

    #[tokio::test]
    async fn exception_for_other_statement_is_not_reported() {
        let (mut session, observer) = session(
            |_| {
                done(
                    "query0",
                    &[r#"(Answer query0 (CoqExn ((loc ()) (stm_ids ((7))) (str "elsewhere"))))"#],
                )
            },
            SerapiConfig::default(),
        );
        let chunk = Chunk::new("idtac.");
        let view = TextView::of_chunk(&chunk);
        let messages = session.exec(StatementId(3), &view).await.unwrap();
        assert!(messages.is_empty());
        assert_eq!(observer.exit_code(), 0);
    }

    #[tokio::test]
    async fn exception_is_reported_with_context() {
        let (mut session, observer) = session(
            |_| {
                done(
                    "query0",
                    &[r#"(Answer query0 (CoqExn ((loc (((bp 0) (ep 4)))) (stm_ids ((3))) (str "Bad."))))"#],
                )
            },
            SerapiConfig::default(),
        );
        let chunk = Chunk::new("oops.");
        let view = TextView::of_chunk(&chunk);
        session.exec(StatementId(3), &view).await.unwrap();
        let notes = observer.notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].level, Level::Error);
        assert_eq!(
            notes[0].message,
            "Coq raised an exception:\n  > Bad.\n\
             The offending chunk is delimited by >>>…<<< below:\n  > >>>oops<<<.\n\
             Results past this point may be unreliable."
        );
        let location = notes[0].location.as_ref().unwrap();
        assert_eq!(location.end.as_ref().unwrap().column, 5);
    }

    #[tokio::test]
    async fn unknown_response_is_fatal_unless_best_effort() {
        let responder = |_: &Sexp| done("query0", &["(Surprise)"]);
        let chunk = Chunk::new("");
        let view = TextView::of_chunk(&chunk);

        let (mut strict, _) = session(responder, SerapiConfig::default());
        let err = strict.exec(StatementId(1), &view).await.unwrap_err();
        assert!(matches!(err, DriverError::Protocol(_)));

        let config = SerapiConfig {
            best_effort: true,
            ..SerapiConfig::default()
        };
        let (mut lenient, _) = session(responder, config);
        assert!(lenient.exec(StatementId(1), &view).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_pipe_is_fatal() {
        let (mut session, _) = session(|_| vec!["(Answer query0 Ack)".into()], SerapiConfig::default());
        let chunk = Chunk::new("x.");
        let view = TextView::of_chunk(&chunk);
        let err = session.exec(StatementId(1), &view).await.unwrap_err();
        match err {
            DriverError::ProcessDied { last_response } => {
                assert_eq!(last_response.as_deref(), Some("(Answer query0 Ack)"));
            }
            other => panic!("Expected ProcessDied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_line_is_fatal() {
        let (mut session, _) = session(|_| vec![String::new()], SerapiConfig::default());
        let chunk = Chunk::new("x.");
        let view = TextView::of_chunk(&chunk);
        let err = session.exec(StatementId(1), &view).await.unwrap_err();
        assert!(err.to_string().contains("empty line"));
    }

    #[tokio::test]
    async fn annotate_kills_transport_on_error() {
        let (session, _) = session(|_| vec!["garbage (".into()], SerapiConfig::default());
        let killed = session.transport.killed_flag();
        let result = session.annotate(&[Chunk::new("Check 1.")]).await;
        assert!(matches!(result, Err(DriverError::Decode(_))));
        assert!(killed.load(std::sync::atomic::Ordering::SeqCst));
    }
}

//! Lean 3 backend over `lean --server`.
//!
//! Lean checks a whole file at once, so chunks are joined into a single
//! [`Document`]. Sentence boundaries come from the `--ast` dump, proof
//! states from `info` queries, and messages are placed by position.

mod ast;
mod goals;
mod session;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

pub use ast::{plan_sentences, Ast, AstNode, PlannedSentence, SentenceRange};
pub use goals::parse_goals;
pub use session::{attach_messages, Lean3Session, LeanMessage};

use crate::config::{resolve_binary, Lean3Config};
use crate::document::Document;
use crate::driver::{version_output, Driver};
use crate::observer::{self, Observer};
use crate::transport::{ProcessTransport, Transport};
use crate::types::{Chunk, DriverError, Fragment, GeneratorInfo};

pub const LEAN_HINT: &str = "please install Lean 3 (for example with `elan`)";

pub struct Lean3 {
    config: Lean3Config,
    observer: Arc<dyn Observer>,
}

impl Lean3 {
    pub fn new(config: Lean3Config) -> Self {
        Self {
            config,
            observer: observer::global(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub fn session<T: Transport>(&self, transport: T) -> Lean3Session<T> {
        Lean3Session::new(transport, self.config.file_name())
    }

    /// Dump the AST of `document` with `lean --ast`.
    ///
    /// Lean exits with an error when the document has errors but still
    /// writes the AST, so a failing exit status is only logged.
    pub async fn parse_ast(&self, bin: &Path, document: &Document) -> Result<Ast, DriverError> {
        let source = tempfile::Builder::new().suffix(".lean").tempfile()?;
        std::fs::write(source.path(), document.contents())?;
        let ast_path = source.path().with_extension("ast.json");

        let output = tokio::process::Command::new(bin)
            .args(Lean3Config::CLI_ARGS)
            .args(&self.config.args)
            .arg(source.path())
            .current_dir(self.config.working_dir())
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            tracing::warn!(
                status = ?output.status,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "lean --ast reported errors; check that the output is as expected"
            );
        }

        let json = std::fs::read(&ast_path);
        if let Err(e) = std::fs::remove_file(&ast_path) {
            tracing::debug!(error = %e, path = %ast_path.display(), "Could not remove AST dump");
        }
        Ast::from_json(&json?)
    }

    fn server_args(&self) -> Vec<String> {
        Lean3Config::REPL_ARGS
            .iter()
            .map(|a| a.to_string())
            .chain(self.config.args.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl Driver for Lean3 {
    fn name(&self) -> &'static str {
        "lean3"
    }

    async fn version_info(&self) -> Result<GeneratorInfo, DriverError> {
        let bin = resolve_binary(&self.config.lean_bin, LEAN_HINT)?;
        Ok(GeneratorInfo {
            name: "Lean3".to_string(),
            version: version_output(&bin).await?,
        })
    }

    async fn annotate(&mut self, chunks: Vec<Chunk>) -> Result<Vec<Vec<Fragment>>, DriverError> {
        let bin = resolve_binary(&self.config.lean_bin, LEAN_HINT)?;
        let document = Document::new(chunks.into_iter().map(|c| c.text).collect(), "\n");
        let ast = self.parse_ast(&bin, &document).await?;

        let working_dir = self.config.working_dir();
        let transport = ProcessTransport::spawn(
            &bin,
            &self.server_args(),
            Some(&working_dir),
            self.config.response_timeout_secs,
        )?;
        tracing::info!(chunks = document.chunks().len(), "Annotating with lean --server");
        let observer = Arc::clone(&self.observer);
        self.session(transport)
            .annotate(&document, &ast, observer.as_ref())
            .await
    }
}

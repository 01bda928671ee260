//! Coq backend over SerAPI (`sertop`).
//!
//! Statements are added, executed and queried one at a time; see
//! [`assemble`](crate::assembler::assemble) for how their feedback is put
//! back together.

mod protocol;
mod session;

use std::sync::Arc;

use async_trait::async_trait;

pub use protocol::{classify, ClassifyError, Diagnostic, Event, Exception, SerapiRequest};
pub use session::SerapiSession;

use crate::config::{resolve_binary, SerapiConfig};
use crate::driver::{version_output, Driver};
use crate::observer::{self, Observer};
use crate::transport::{ProcessTransport, Transport};
use crate::types::{Chunk, DriverError, Fragment, GeneratorInfo};

pub const SERTOP_HINT: &str = "please run `opam install coq-serapi`";

pub struct Sertop {
    config: SerapiConfig,
    observer: Arc<dyn Observer>,
}

impl Sertop {
    /// Driver reporting to the process-wide observer.
    pub fn new(config: SerapiConfig) -> Result<Self, DriverError> {
        config.validate()?;
        Ok(Self {
            config,
            observer: observer::global(),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &SerapiConfig {
        &self.config
    }

    pub fn observer(&self) -> Arc<dyn Observer> {
        Arc::clone(&self.observer)
    }

    /// Session over an already-open transport.
    pub fn session<T: Transport>(&self, transport: T) -> SerapiSession<T> {
        SerapiSession::new(transport, self.config.clone(), self.observer())
    }

    /// Spawn `sertop` and open a session on it.
    pub fn spawn_session(&self) -> Result<SerapiSession<ProcessTransport>, DriverError> {
        let bin = resolve_binary(&self.config.sertop_bin, SERTOP_HINT)?;
        let transport = ProcessTransport::spawn(
            &bin,
            &self.config.sertop_args(),
            None,
            self.config.response_timeout_secs,
        )?;
        Ok(self.session(transport))
    }
}

#[async_trait]
impl Driver for Sertop {
    fn name(&self) -> &'static str {
        "sertop"
    }

    async fn version_info(&self) -> Result<GeneratorInfo, DriverError> {
        let bin = resolve_binary(&self.config.sertop_bin, SERTOP_HINT)?;
        Ok(GeneratorInfo {
            name: "Coq+SerAPI".to_string(),
            version: version_output(&bin).await?,
        })
    }

    async fn annotate(&mut self, chunks: Vec<Chunk>) -> Result<Vec<Vec<Fragment>>, DriverError> {
        let session = self.spawn_session()?;
        tracing::info!(chunks = chunks.len(), "Annotating with sertop");
        session.annotate(&chunks).await
    }
}

/// Annotate `chunks` with a default `sertop` driver and extra `args`.
pub async fn annotate(
    chunks: Vec<Chunk>,
    args: Vec<String>,
) -> Result<Vec<Vec<Fragment>>, DriverError> {
    let config = SerapiConfig {
        args,
        ..SerapiConfig::default()
    };
    Sertop::new(config)?.annotate(chunks).await
}

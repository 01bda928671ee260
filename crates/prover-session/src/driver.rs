//! The backend-independent entry point.
//!
//! Hosts hold a `Box<dyn Driver>` or a concrete [`Sertop`](crate::Sertop) /
//! [`Lean3`](crate::Lean3) and only ever call the methods below.

use async_trait::async_trait;

use crate::types::{Chunk, DriverError, Fragment, GeneratorInfo};

/// A checker backend that turns source chunks into annotated fragments.
///
/// Each call to [`annotate`](Driver::annotate) runs against a fresh checker
/// process, torn down before the call returns. Chunks share that process
/// and are checked in order.
#[async_trait]
pub trait Driver: Send {
    /// Short identifier, e.g. `"sertop"`.
    fn name(&self) -> &'static str;

    /// Checker name and version.
    async fn version_info(&self) -> Result<GeneratorInfo, DriverError>;

    /// One fragment list per chunk; each list concatenates back to its chunk.
    async fn annotate(&mut self, chunks: Vec<Chunk>) -> Result<Vec<Vec<Fragment>>, DriverError>;
}

/// Run `bin --version` and keep the ASCII part of its trimmed output.
pub(crate) async fn version_output(bin: &std::path::Path) -> Result<String, DriverError> {
    let output = tokio::process::Command::new(bin)
        .arg("--version")
        .kill_on_drop(true)
        .output()
        .await?;
    let version: String = String::from_utf8_lossy(&output.stdout)
        .chars()
        .filter(char::is_ascii)
        .collect();
    Ok(version.trim().to_string())
}

//! Line transport to a checker process.
//!
//! Sessions speak through the [`Transport`] trait so that the wire logic
//! runs unchanged against a child process or a scripted stand-in.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::types::DriverError;

/// A line-oriented, strictly sequential pipe to a checker.
///
/// Implemented by [`ProcessTransport`] for real subprocesses and by
/// [`ScriptedTransport`](crate::mocks::ScriptedTransport) in tests.
#[async_trait]
pub trait Transport: Send {
    /// Write one line; the implementation appends the terminator and flushes.
    async fn write_line(&mut self, line: &[u8]) -> Result<(), DriverError>;

    /// Next line without its terminator, or `None` once the peer closed its
    /// output.
    async fn read_line(&mut self) -> Result<Option<Vec<u8>>, DriverError>;

    /// Terminate the peer. Safe to call repeatedly.
    async fn kill(&mut self);
}

/// A checker subprocess talking over stdin/stdout.
///
/// The child is spawned with `kill_on_drop`, so dropping the transport on
/// an unwinding path still tears the process down.
pub struct ProcessTransport {
    child: Option<Child>,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    timeout_secs: Option<u64>,
}

impl ProcessTransport {
    /// Spawn `program` with `args`, optionally inside `cwd`.
    ///
    /// Checker diagnostics on stderr go straight to our stderr.
    pub fn spawn(
        program: &Path,
        args: &[String],
        cwd: Option<&Path>,
        timeout_secs: Option<u64>,
    ) -> Result<Self, DriverError> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = BufWriter::new(
            child
                .stdin
                .take()
                .ok_or_else(|| DriverError::Protocol("Failed to capture stdin".into()))?,
        );
        let stdout = BufReader::new(
            child
                .stdout
                .take()
                .ok_or_else(|| DriverError::Protocol("Failed to capture stdout".into()))?,
        );

        tracing::info!(
            program = %program.display(),
            args = ?args,
            pid = child.id(),
            "Spawned checker process"
        );

        Ok(Self {
            child: Some(child),
            stdin,
            stdout,
            timeout_secs,
        })
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn write_line(&mut self, line: &[u8]) -> Result<(), DriverError> {
        self.stdin.write_all(line).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<Vec<u8>>, DriverError> {
        let mut line = Vec::new();
        let read = self.stdout.read_until(b'\n', &mut line);
        let n = match self.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), read)
                .await
                .map_err(|_| DriverError::Timeout(secs))??,
            None => read.await?,
        };
        if n == 0 {
            return Ok(None);
        }
        if line.ends_with(b"\n") {
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }
        }
        Ok(Some(line))
    }

    async fn kill(&mut self) {
        // Ignore errors: the process may already be gone.
        let _ = self.stdin.shutdown().await;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
            let _ = child.wait().await;
            tracing::debug!("Checker process shut down");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessTransport {
        let args = vec!["-c".to_string(), script.to_string()];
        ProcessTransport::spawn(Path::new("/bin/sh"), &args, None, Some(10)).unwrap()
    }

    #[tokio::test]
    async fn echoes_lines_and_reports_eof() {
        let mut transport = sh("read line; echo \"got $line\"");
        transport.write_line(b"hello").await.unwrap();
        assert_eq!(transport.read_line().await.unwrap(), Some(b"got hello".to_vec()));
        assert_eq!(transport.read_line().await.unwrap(), None);
        transport.kill().await;
    }

    #[tokio::test]
    async fn kill_is_idempotent() {
        let mut transport = sh("sleep 30");
        transport.kill().await;
        transport.kill().await;
        assert!(transport.child.is_none());
    }

    #[tokio::test]
    async fn read_times_out() {
        let args = vec!["-c".to_string(), "sleep 30".to_string()];
        let mut transport =
            ProcessTransport::spawn(Path::new("/bin/sh"), &args, None, Some(1)).unwrap();
        let err = transport.read_line().await.unwrap_err();
        assert!(matches!(err, DriverError::Timeout(1)));
        transport.kill().await;
    }
}

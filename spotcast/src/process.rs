//! External tool execution
//!
//! Every call to the audio tool goes through a [`ProcessRunner`]. The
//! [`SystemRunner`] spawns real processes; tests inject scripted runners that
//! hand back in-memory pipes.

use std::io;
use std::pin::Pin;
use std::process::Stdio;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tracing::debug;

/// Owned, type-erased byte source
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Owned, type-erased byte sink
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Program and arguments of one tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Open a pipe to the process stdin
    pub pipe_stdin: bool,
}

impl ToolSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            pipe_stdin: false,
        }
    }

    pub fn with_stdin(mut self) -> Self {
        self.pipe_stdin = true;
        self
    }
}

/// Exit status of a finished tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolExit {
    pub success: bool,
    pub code: Option<i32>,
}

/// A running tool with its pipes
///
/// Dropping `exit` before it resolves kills the process.
pub struct ToolProcess {
    pub stdin: Option<BoxedWriter>,
    pub stdout: BoxedReader,
    pub stderr: BoxedReader,
    pub exit: BoxFuture<'static, io::Result<ToolExit>>,
}

/// Spawns external tools
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn spawn(&self, spec: ToolSpec) -> io::Result<ToolProcess>;
}

/// Runner backed by `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn spawn(&self, spec: ToolSpec) -> io::Result<ToolProcess> {
        debug!(program = %spec.program, args = ?spec.args, "Spawning tool");

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(if spec.pipe_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .map(|s| Box::pin(s) as BoxedWriter);
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("stderr was not captured"))?;

        let exit = async move {
            let status = child.wait().await?;
            Ok::<_, io::Error>(ToolExit {
                success: status.success(),
                code: status.code(),
            })
        }
        .boxed();

        Ok(ToolProcess {
            stdin,
            stdout: Box::pin(stdout),
            stderr: Box::pin(stderr),
            exit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_spec_builder() {
        let spec = ToolSpec::new("sox", ["--i", "-B", "song.mp3"]);
        assert_eq!(spec.program, "sox");
        assert_eq!(spec.args, vec!["--i", "-B", "song.mp3"]);
        assert!(!spec.pipe_stdin);
        assert!(spec.with_stdin().pipe_stdin);
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let result = SystemRunner
            .spawn(ToolSpec::new("spotcast-no-such-tool-4242", Vec::<String>::new()))
            .await;
        assert!(result.is_err());
    }
}

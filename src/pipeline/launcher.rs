//! Encoder process launching
//!
//! The supervisor never touches `tokio::process` directly. It asks an
//! [`EncoderLauncher`] for a child and drives it through [`EncoderChild`],
//! which keeps process spawning replaceable in tests.

use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use super::command::{EncoderCommand, OutputTarget};

/// Readable encoder output
pub type EncoderOutput = Box<dyn AsyncRead + Send + Unpin>;

/// A spawned encoder process
#[async_trait]
pub trait EncoderChild: Send {
    /// OS process id, if still known
    fn id(&self) -> Option<u32>;

    /// Take the stdout pipe; `None` when output goes to files or was already taken
    fn take_stdout(&mut self) -> Option<EncoderOutput>;

    /// Ask the OS to kill the process without waiting for it
    fn start_kill(&mut self) -> io::Result<()>;

    /// Wait for the process to exit, returning its exit code
    ///
    /// The code is `None` when the process was ended by a signal.
    async fn wait(&mut self) -> io::Result<Option<i32>>;
}

/// Spawns encoder processes
pub trait EncoderLauncher: Send + Sync {
    fn launch(&self, source_id: &str, command: &EncoderCommand) -> io::Result<Box<dyn EncoderChild>>;
}

/// Launcher backed by real OS processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl SystemLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl EncoderLauncher for SystemLauncher {
    fn launch(&self, source_id: &str, command: &EncoderCommand) -> io::Result<Box<dyn EncoderChild>> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match command.output {
            OutputTarget::Pipe => cmd.stdout(Stdio::piped()),
            OutputTarget::Hls { .. } => cmd.stdout(Stdio::null()),
        };

        #[cfg(windows)]
        {
            // CREATE_NO_WINDOW
            cmd.creation_flags(0x08000000);
        }

        let mut child = cmd.spawn()?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(source_id.to_string(), stderr));
        }

        Ok(Box::new(SystemChild { child }))
    }
}

/// Log encoder stderr line by line until the pipe closes
///
/// Lines are read as bytes; ffmpeg echoes device names and metadata that
/// are not always valid UTF-8.
async fn drain_stderr<R: AsyncRead + Unpin>(source_id: String, stderr: R) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end();
                if !text.is_empty() {
                    tracing::debug!(source = %source_id, "encoder: {}", text);
                }
            }
            Err(e) => {
                tracing::debug!(source = %source_id, error = %e, "Encoder stderr closed");
                break;
            }
        }
    }
}

struct SystemChild {
    child: Child,
}

#[async_trait]
impl EncoderChild for SystemChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn take_stdout(&mut self) -> Option<EncoderOutput> {
        self.child
            .stdout
            .take()
            .map(|stdout| Box::new(stdout) as EncoderOutput)
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.wait().await?.code())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::config::OutputMode;

    fn shell(script: &str, output: OutputTarget) -> EncoderCommand {
        EncoderCommand {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            signature: Vec::new(),
            mode: OutputMode::Flv,
            output,
        }
    }

    #[tokio::test]
    async fn test_system_launcher_pipes_stdout() {
        let mut child = SystemLauncher::new()
            .launch("cam", &shell("printf hello", OutputTarget::Pipe))
            .unwrap();
        assert!(child.id().is_some());

        let mut stdout = child.take_stdout().unwrap();
        assert!(child.take_stdout().is_none());

        let mut out = String::new();
        stdout.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello");
        assert_eq!(child.wait().await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_system_launcher_kill() {
        let mut child = SystemLauncher::new()
            .launch("cam", &shell("sleep 30", OutputTarget::Pipe))
            .unwrap();

        child.start_kill().unwrap();
        // Killed by signal: no exit code
        assert_eq!(child.wait().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stderr_drain_survives_invalid_utf8() {
        let input: &[u8] = b"first\n\xff\xfe broken\nlast line";
        let mut reader = input;
        drain_stderr("cam".into(), &mut reader).await;
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_missing_executable_fails_to_launch() {
        let mut command = shell("", OutputTarget::Pipe);
        command.program = "/nonexistent/encoder-binary".into();
        assert!(SystemLauncher::new().launch("cam", &command).is_err());
    }
}

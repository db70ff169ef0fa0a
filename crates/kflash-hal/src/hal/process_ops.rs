//! Privileged shell execution.
//!
//! Every external command goes through [`ShellOps`] so the flash and KPM pipelines can be
//! exercised without a rooted device.

use crate::HalResult;

/// Which pipe a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// One line of process output, without its trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: Stream,
    pub text: String,
}

impl OutputLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: Stream::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: Stream::Stderr,
            text: text.into(),
        }
    }
}

/// A running shell.
///
/// Lines are produced lazily and only once; `next_line` blocks until a line is available and
/// returns `Ok(None)` after both pipes reach EOF.
pub trait ProcessHandle: Send {
    fn next_line(&mut self) -> HalResult<Option<OutputLine>>;

    /// Block until the process exits and return its exit code (`-1` when killed by a signal).
    fn wait(&mut self) -> HalResult<i32>;
}

/// Collected result of a shell that was run to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Stdout joined with newlines and trimmed.
    pub fn stdout_text(&self) -> String {
        self.stdout.join("\n").trim().to_string()
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n").trim().to_string()
    }
}

/// Shell runner trait (the privileged execution primitive).
pub trait ShellOps: Send + Sync {
    /// Start `command` in a root shell (`elevated`) or a plain user shell.
    fn spawn_shell(&self, command: &str, elevated: bool) -> HalResult<Box<dyn ProcessHandle>>;

    fn run_capture(&self, command: &str, elevated: bool) -> HalResult<CommandOutput> {
        let mut process = self.spawn_shell(command, elevated)?;
        let mut output = CommandOutput::default();
        while let Some(line) = process.next_line()? {
            match line.stream {
                Stream::Stdout => output.stdout.push(line.text),
                Stream::Stderr => output.stderr.push(line.text),
            }
        }
        output.code = process.wait()?;
        Ok(output)
    }

    /// Read a system property, trimmed; empty when unset.
    fn getprop(&self, name: &str, elevated: bool) -> HalResult<String> {
        let output = self.run_capture(&format!("getprop {}", name), elevated)?;
        Ok(output.stdout_text())
    }

    fn root_available(&self) -> bool {
        match self.run_capture("id", true) {
            Ok(output) => output.success(),
            Err(err) => {
                log::warn!("root probe failed: {}", err);
                false
            }
        }
    }
}

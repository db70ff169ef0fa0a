//! Fake HAL implementation for testing.
//!
//! Records every shell and content request and answers from scripted responses, so the
//! pipelines can be driven in CI without root or a device.

use super::{CommandOutput, ContentHandle, ContentOps, OutputLine, ProcessHandle, ShellOps};
use crate::{HalError, HalResult};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Shell { command: String, elevated: bool },
    OpenContent { handle: String },
}

/// Scripted answer for commands containing a given needle.
#[derive(Debug, Clone, Default)]
pub struct FakeResponse {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub code: i32,
    /// Files created when the command is spawned (stands in for `touch`).
    pub touch: Vec<PathBuf>,
    pub spawn_failure: bool,
}

impl FakeResponse {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn stdout<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stdout: lines.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn exit(code: i32) -> Self {
        Self {
            code,
            ..Self::default()
        }
    }

    pub fn spawn_failure() -> Self {
        Self {
            spawn_failure: true,
            ..Self::default()
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = code;
        self
    }

    pub fn with_stderr(mut self, line: impl Into<String>) -> Self {
        self.stderr.push(line.into());
        self
    }

    pub fn touching(mut self, path: impl Into<PathBuf>) -> Self {
        self.touch.push(path.into());
        self
    }
}

#[derive(Debug, Clone)]
struct Rule {
    needle: String,
    response: FakeResponse,
    once: bool,
}

/// Shared state for FakeHal operations.
#[derive(Debug, Clone, Default)]
struct FakeHalState {
    operations: Vec<Operation>,
    rules: Vec<Rule>,
    contents: HashMap<String, Vec<u8>>,
}

/// Fake HAL implementation that records operations without executing them.
///
/// The most recently registered rule whose needle occurs in the command wins; `respond_once`
/// rules are dropped after their first use. Unmatched commands succeed silently.
#[derive(Debug, Clone, Default)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl FakeHal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, needle: impl Into<String>, response: FakeResponse) -> &Self {
        self.push_rule(needle.into(), response, false);
        self
    }

    pub fn respond_once(&self, needle: impl Into<String>, response: FakeResponse) -> &Self {
        self.push_rule(needle.into(), response, true);
        self
    }

    pub fn add_content(&self, handle: impl Into<String>, bytes: impl Into<Vec<u8>>) -> &Self {
        self.state
            .lock()
            .unwrap()
            .contents
            .insert(handle.into(), bytes.into());
        self
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().unwrap().operations.clone()
    }

    /// Commands passed to the shell, in order.
    pub fn commands(&self) -> Vec<String> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                Operation::Shell { command, .. } => Some(command),
                Operation::OpenContent { .. } => None,
            })
            .collect()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.state.lock().unwrap().operations.iter().any(check)
    }

    pub fn ran_command_containing(&self, needle: &str) -> bool {
        self.commands().iter().any(|c| c.contains(needle))
    }

    fn push_rule(&self, needle: String, response: FakeResponse, once: bool) {
        self.state.lock().unwrap().rules.push(Rule {
            needle,
            response,
            once,
        });
    }

    fn record_operation(&self, op: Operation) {
        self.state.lock().unwrap().operations.push(op);
    }

    fn take_response(&self, command: &str) -> FakeResponse {
        let mut state = self.state.lock().unwrap();
        let index = state
            .rules
            .iter()
            .rposition(|rule| command.contains(&rule.needle));
        match index {
            Some(i) if state.rules[i].once => state.rules.remove(i).response,
            Some(i) => state.rules[i].response.clone(),
            None => FakeResponse::ok(),
        }
    }
}

struct FakeProcess {
    lines: VecDeque<OutputLine>,
    code: i32,
}

impl ProcessHandle for FakeProcess {
    fn next_line(&mut self) -> HalResult<Option<OutputLine>> {
        Ok(self.lines.pop_front())
    }

    fn wait(&mut self) -> HalResult<i32> {
        Ok(self.code)
    }
}

impl ShellOps for FakeHal {
    fn spawn_shell(&self, command: &str, elevated: bool) -> HalResult<Box<dyn ProcessHandle>> {
        self.record_operation(Operation::Shell {
            command: command.to_string(),
            elevated,
        });
        let response = self.take_response(command);
        if response.spawn_failure {
            return Err(HalError::CommandNotFound("su".to_string()));
        }
        for path in &response.touch {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, b"")?;
        }
        log::info!("FAKE HAL: {} $ {}", if elevated { "su" } else { "sh" }, command);

        let lines = response
            .stdout
            .into_iter()
            .map(OutputLine::stdout)
            .chain(response.stderr.into_iter().map(OutputLine::stderr))
            .collect();
        Ok(Box::new(FakeProcess {
            lines,
            code: response.code,
        }))
    }
}

impl ContentOps for FakeHal {
    fn open_read(&self, handle: &ContentHandle) -> HalResult<Box<dyn Read + Send>> {
        self.record_operation(Operation::OpenContent {
            handle: handle.to_string(),
        });
        let bytes = self
            .state
            .lock()
            .unwrap()
            .contents
            .get(handle.as_str())
            .cloned()
            .ok_or_else(|| HalError::ContentNotFound(handle.to_string()))?;
        Ok(Box::new(Cursor::new(bytes)))
    }
}

impl FakeHal {
    /// Convenience for tests: run a command and return its scripted output.
    pub fn capture(&self, command: &str) -> CommandOutput {
        self.run_capture(command, true).unwrap()
    }
}

//! Linux/Android HAL implementation spawning real shells.

use super::{ContentHandle, ContentOps, OutputLine, ProcessHandle, ShellOps, Stream};
use crate::{HalError, HalResult};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

/// How shells are launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    /// Argv of the root shell; the command is fed on stdin.
    pub root_shell: Vec<String>,
    /// Argv of the unprivileged shell.
    pub user_shell: Vec<String>,
    /// Hard limit for a single shell. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            root_shell: vec!["su".to_string()],
            user_shell: vec!["sh".to_string()],
            timeout: None,
        }
    }
}

/// Real HAL implementation.
#[derive(Debug, Clone, Default)]
pub struct LinuxHal {
    shell: ShellConfig,
}

impl LinuxHal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(shell: ShellConfig) -> Self {
        Self { shell }
    }
}

fn map_spawn_err(program: &str, err: io::Error) -> HalError {
    match err.kind() {
        io::ErrorKind::NotFound => HalError::CommandNotFound(program.to_string()),
        io::ErrorKind::PermissionDenied => HalError::PermissionDenied,
        _ => HalError::Spawn {
            program: program.to_string(),
            source: err,
        },
    }
}

fn pump_lines<R: Read + Send + 'static>(reader: R, stream: Stream, tx: Sender<OutputLine>) {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
                        buf.pop();
                    }
                    let text = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send(OutputLine { stream, text }).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    log::debug!("output reader for {:?} stopped: {}", stream, err);
                    break;
                }
            }
        }
    });
}

struct LinuxProcess {
    program: String,
    child: Child,
    lines: Receiver<OutputLine>,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    exit_code: Option<i32>,
}

impl LinuxProcess {
    fn timed_out(&mut self) -> HalError {
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.exit_code = Some(-1);
        HalError::CommandTimeout {
            program: self.program.clone(),
            timeout_secs: self.timeout.map(|t| t.as_secs()).unwrap_or_default(),
        }
    }
}

impl ProcessHandle for LinuxProcess {
    fn next_line(&mut self) -> HalResult<Option<OutputLine>> {
        let Some(deadline) = self.deadline else {
            return Ok(self.lines.recv().ok());
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.lines.recv_timeout(remaining) {
            Ok(line) => Ok(Some(line)),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
            Err(RecvTimeoutError::Timeout) => Err(self.timed_out()),
        }
    }

    fn wait(&mut self) -> HalResult<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }
        let status = match self.deadline {
            None => self.child.wait()?,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match self.child.wait_timeout(remaining)? {
                    Some(status) => status,
                    None => return Err(self.timed_out()),
                }
            }
        };
        let code = status.code().unwrap_or(-1);
        self.exit_code = Some(code);
        Ok(code)
    }
}

impl ShellOps for LinuxHal {
    fn spawn_shell(&self, command: &str, elevated: bool) -> HalResult<Box<dyn ProcessHandle>> {
        let argv = if elevated {
            &self.shell.root_shell
        } else {
            &self.shell.user_shell
        };
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| HalError::Other("shell argv is empty".to_string()))?;

        log::debug!("{} $ {}", program, command);
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| map_spawn_err(program, e))?;

        // The shell reads the script from stdin; closing it ends the session after `exit`.
        if let Some(mut stdin) = child.stdin.take() {
            let script = format!("{}\nexit\n", command);
            if let Err(err) = stdin.write_all(script.as_bytes()) {
                log::warn!("failed to write command to {}: {}", program, err);
            }
        }

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            pump_lines(stdout, Stream::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            pump_lines(stderr, Stream::Stderr, tx);
        }

        Ok(Box::new(LinuxProcess {
            program: program.clone(),
            child,
            lines: rx,
            deadline: self.shell.timeout.map(|t| Instant::now() + t),
            timeout: self.shell.timeout,
            exit_code: None,
        }))
    }
}

impl ContentOps for LinuxHal {
    fn open_read(&self, handle: &ContentHandle) -> HalResult<Box<dyn Read + Send>> {
        let path = handle
            .local_path()
            .ok_or_else(|| HalError::ContentNotFound(handle.to_string()))?;
        match File::open(path) {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(HalError::ContentNotFound(handle.to_string()))
            }
            Err(err) => Err(HalError::Io(err)),
        }
    }
}

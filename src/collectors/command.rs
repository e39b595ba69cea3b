use crate::error::CollectorError;
use log::{debug, warn};
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

/// Exit status reported when the executable is missing or cannot be spawned
pub const SPAWN_FAILURE_STATUS: i32 = 127;

/// Exit status reported when the command exceeded its timeout and was killed
pub const TIMEOUT_STATUS: i32 = 124;

/// Exit status reported when the process ended without an exit code (signal)
pub const SIGNALED_STATUS: i32 = -1;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long to keep reading pipes once a timed-out child has been killed
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Captured result of one external command
///
/// The exit status is advisory: diagnostic tools frequently exit nonzero while
/// still writing usable output, so callers inspect `stdout` regardless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(status: i32, stdout: impl Into<Vec<u8>>, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Output describing a command that never ran
    pub fn from_error(program: &str, error: &CollectorError) -> Self {
        let status = match error {
            CollectorError::Timeout(_) => TIMEOUT_STATUS,
            _ => SPAWN_FAILURE_STATUS,
        };
        Self::new(status, Vec::new(), format!("{}: {}", program, error))
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Standard output decoded as UTF-8, replacing invalid sequences
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Executes external diagnostic tools
///
/// Implementations must never panic or return an error: every failure mode is
/// folded into the returned [`CommandOutput`].
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> CommandOutput;
}

/// Runs commands as real subprocesses with an optional wall-clock timeout
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    timeout: Option<Duration>,
}

impl SystemCommandRunner {
    /// Create a runner; `None` waits for commands indefinitely
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    fn execute(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CollectorError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CollectorError::SubprocessSpawn(e.to_string()))?;

        // Drain both pipes concurrently so a chatty child cannot block on a full pipe
        let stdout_reader = spawn_reader(child.stdout.take());
        let stderr_reader = spawn_reader(child.stderr.take());

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        warn!("{} exceeded timeout {:?}, killing it", program, self.timeout);
                        if let Err(e) = child.kill() {
                            warn!("Failed to kill {}: {}", program, e);
                        }
                        let _ = child.wait();
                        break None;
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(CollectorError::IoError(e));
                }
            }
        };

        // Grandchildren may still hold the pipes open, so reads are bounded by the deadline
        let read_wait = match status {
            Some(_) => deadline.map(|d| d.saturating_duration_since(Instant::now()).max(KILL_GRACE)),
            None => Some(KILL_GRACE),
        };
        let stdout = collect_reader(stdout_reader, read_wait);
        let stderr = String::from_utf8_lossy(&collect_reader(stderr_reader, read_wait)).into_owned();

        match status {
            Some(status) => Ok(CommandOutput::new(
                status.code().unwrap_or(SIGNALED_STATUS),
                stdout,
                stderr,
            )),
            None => {
                let timeout = self.timeout.unwrap_or_default();
                let mut output = CommandOutput::from_error(program, &CollectorError::Timeout(timeout));
                output.stdout = stdout;
                Ok(output)
            }
        }
    }
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self::new(Some(Duration::from_secs(120)))
    }
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> CommandOutput {
        debug!("Running {} {:?}", program, args);
        match self.execute(program, args) {
            Ok(output) => {
                debug!(
                    "{} exited with status {} ({} bytes stdout)",
                    program,
                    output.status,
                    output.stdout.len()
                );
                output
            }
            Err(e) => {
                debug!("{} could not be run: {}", program, e);
                CommandOutput::from_error(program, &e)
            }
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<Vec<u8>>> {
    pipe.map(|mut pipe| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            let _ = tx.send(buffer);
        });
        rx
    })
}

/// Wait for a reader thread's buffer; an expired wait detaches the thread
fn collect_reader(reader: Option<Receiver<Vec<u8>>>, wait: Option<Duration>) -> Vec<u8> {
    let Some(rx) = reader else {
        return Vec::new();
    };
    match wait {
        Some(wait) => rx.recv_timeout(wait).unwrap_or_default(),
        None => rx.recv().unwrap_or_default(),
    }
}

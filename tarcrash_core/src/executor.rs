use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_READ_LIMIT: usize = 64;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long the stdout reader gets to finish after a hung extractor is killed.
const READER_GRACE: Duration = Duration::from_millis(250);

/// What was observed from one extractor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// The first stdout line, newline included when one arrived within the
    /// read limit. Empty when the extractor closed stdout without output.
    Completed { first_line: Vec<u8> },
    /// Nothing arrived before the deadline; the extractor was killed.
    Timeout,
    /// The extractor could not be spawned.
    LaunchFailed(String),
}

/// Result of [`ExtractorExecutor::execute`].
#[derive(Debug)]
pub struct ExecutionReport {
    /// What the extractor printed, or why nothing was read.
    pub status: ExecutionStatus,
    /// Set when the child could not be killed or reaped cleanly, or when its
    /// stdout pipe stayed open after it was killed.
    pub close_error: Option<String>,
}

/// Per-run limits for the extractor process.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Deadline for the first output line, measured from spawn.
    pub timeout: Duration,
    /// Maximum number of bytes read from stdout.
    pub read_limit: usize,
    /// Directory the extractor runs in. Relative archive and extractor paths
    /// are resolved against the harness's own directory before spawning.
    pub working_dir: Option<PathBuf>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            read_limit: DEFAULT_READ_LIMIT,
            working_dir: None,
        }
    }
}

/// Runs `<extractor> <archive>` directly (no shell) and captures the first
/// line the extractor prints.
#[derive(Debug, Clone, Default)]
pub struct ExtractorExecutor {
    settings: ExecutorSettings,
}

impl ExtractorExecutor {
    pub fn new(settings: ExecutorSettings) -> Self {
        Self { settings }
    }

    /// Spawns `extractor archive`, waits for its first stdout line and makes
    /// sure the child is gone before returning.
    pub fn execute(&self, extractor: &Path, archive: &Path) -> ExecutionReport {
        let mut cmd = match self.command(extractor, archive) {
            Ok(cmd) => cmd,
            Err(e) => {
                return ExecutionReport {
                    status: ExecutionStatus::LaunchFailed(format!(
                        "Failed to resolve paths for extractor {extractor:?}: {e}"
                    )),
                    close_error: None,
                };
            }
        };

        let deadline = Instant::now() + self.settings.timeout;
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionReport {
                    status: ExecutionStatus::LaunchFailed(format!(
                        "Failed to spawn extractor {extractor:?}: {e}"
                    )),
                    close_error: None,
                };
            }
        };

        let Some(stdout) = child.stdout.take() else {
            let close_error = Self::kill_and_reap(&mut child).err();
            return ExecutionReport {
                status: ExecutionStatus::LaunchFailed("Extractor stdout was not captured".into()),
                close_error,
            };
        };

        // The reader thread owns stdout and ends once the pipe closes. A
        // descendant of the extractor can keep the pipe open after the kill;
        // the thread is then left blocked until that descendant exits.
        let (tx, rx) = mpsc::channel();
        let read_limit = self.settings.read_limit;
        thread::spawn(move || {
            let _ = tx.send(read_first_line(stdout, read_limit));
        });

        let status = match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(Ok(first_line)) => ExecutionStatus::Completed { first_line },
            Ok(Err(e)) => {
                warn!("Reading extractor output failed: {e}");
                ExecutionStatus::Completed {
                    first_line: Vec::new(),
                }
            }
            Err(_) => {
                warn!(
                    timeout = ?self.settings.timeout,
                    "Extractor produced no output line in time, killing it"
                );
                let close_error = Self::kill_and_reap(&mut child).err().or_else(|| {
                    rx.recv_timeout(READER_GRACE).err().map(|_| {
                        "Extractor stdout still held open by a descendant process".to_string()
                    })
                });
                return ExecutionReport {
                    status: ExecutionStatus::Timeout,
                    close_error,
                };
            }
        };

        let close_error = Self::reap_with_deadline(&mut child, deadline).err();
        ExecutionReport {
            status,
            close_error,
        }
    }

    fn command(&self, extractor: &Path, archive: &Path) -> io::Result<Command> {
        let mut cmd = match &self.settings.working_dir {
            Some(cwd) => {
                // A bare program name is looked up on PATH and stays as is.
                let program = if extractor.components().count() > 1 {
                    std::path::absolute(extractor)?
                } else {
                    extractor.to_path_buf()
                };
                let mut cmd = Command::new(program);
                cmd.arg(std::path::absolute(archive)?).current_dir(cwd);
                cmd
            }
            None => {
                let mut cmd = Command::new(extractor);
                cmd.arg(archive);
                cmd
            }
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        Ok(cmd)
    }

    fn reap_with_deadline(child: &mut Child, deadline: Instant) -> Result<(), String> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(?status, "Extractor exited");
                    return Ok(());
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        debug!("Extractor still running after its first line, killing it");
                        return Self::kill_and_reap(child);
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(format!("Error waiting for extractor: {e}")),
            }
        }
    }

    fn kill_and_reap(child: &mut Child) -> Result<(), String> {
        if let Err(e) = child.kill() {
            // Already exited between the last poll and the kill.
            if e.kind() != io::ErrorKind::InvalidInput {
                return Err(format!("Failed to kill extractor: {e}"));
            }
        }
        child
            .wait()
            .map(|_| ())
            .map_err(|e| format!("Failed to reap extractor: {e}"))
    }
}

/// Reads up to `limit` bytes, stopping after the first newline.
pub fn read_first_line<R: Read>(reader: R, limit: usize) -> io::Result<Vec<u8>> {
    let mut line = Vec::with_capacity(limit);
    BufReader::new(reader.take(limit as u64)).read_until(b'\n', &mut line)?;
    Ok(line)
}

use crate::context::HarnessContext;
use crate::executor::{ExecutionStatus, ExtractorExecutor};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info, warn};

/// The line an extractor under test prints when it detects its own fault.
pub const CRASH_BANNER: &str = "*** The program has crashed ***";

/// Outcome of one trial, as seen by corpus triage and the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialResult {
    NoCrash,
    Crashed,
    LaunchFailure,
}

/// How the first output line is compared with the banner.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMode {
    /// The line must be the banner followed by a newline, byte for byte.
    #[default]
    ExactLine,
    /// The banner may appear anywhere in the line.
    Substring,
}

/// The crash banner together with the rule used to look for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashBanner {
    text: String,
    mode: MatchMode,
}

impl Default for CrashBanner {
    fn default() -> Self {
        Self::new(CRASH_BANNER, MatchMode::default())
    }
}

impl CrashBanner {
    pub fn new(text: impl Into<String>, mode: MatchMode) -> Self {
        Self {
            text: text.into(),
            mode,
        }
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Checks one captured output line, trailing newline included.
    pub fn matches(&self, line: &[u8]) -> bool {
        let banner = self.text.as_bytes();
        match self.mode {
            MatchMode::ExactLine => line.strip_suffix(b"\n") == Some(banner),
            MatchMode::Substring => {
                !banner.is_empty() && line.windows(banner.len()).any(|w| w == banner)
            }
        }
    }
}

/// Runs an archive against the extractor and decides whether it crashed it.
pub trait Oracle {
    fn run(&mut self, ctx: &HarnessContext, archive: &Path) -> TrialResult;
}

/// The banner-watching oracle: spawns the extractor, reads its first line and
/// classifies it. Exit codes and stderr are ignored.
#[derive(Debug, Clone, Default)]
pub struct CrashOracle {
    executor: ExtractorExecutor,
    banner: CrashBanner,
}

impl CrashOracle {
    pub fn new(executor: ExtractorExecutor, banner: CrashBanner) -> Self {
        Self { executor, banner }
    }

    /// Maps an execution outcome to a trial result. Only a completed run whose
    /// first line matches the banner is a crash.
    pub fn classify(&self, status: &ExecutionStatus) -> TrialResult {
        match status {
            ExecutionStatus::Completed { first_line } if self.banner.matches(first_line) => {
                TrialResult::Crashed
            }
            ExecutionStatus::Completed { .. } | ExecutionStatus::Timeout => TrialResult::NoCrash,
            ExecutionStatus::LaunchFailed(_) => TrialResult::LaunchFailure,
        }
    }
}

impl Oracle for CrashOracle {
    fn run(&mut self, ctx: &HarnessContext, archive: &Path) -> TrialResult {
        let report = self.executor.execute(ctx.extractor(), archive);
        if let Some(close_error) = &report.close_error {
            warn!("Extractor did not shut down cleanly: {close_error}");
        }

        let result = self.classify(&report.status);
        match (&report.status, result) {
            (ExecutionStatus::LaunchFailed(reason), _) => warn!("{reason}"),
            (ExecutionStatus::Completed { first_line }, TrialResult::Crashed) => {
                info!(line = %String::from_utf8_lossy(first_line).trim_end(), "Crash message");
            }
            (ExecutionStatus::Completed { first_line }, _) if first_line.is_empty() => {
                debug!("No output");
            }
            _ => {}
        }
        result
    }
}

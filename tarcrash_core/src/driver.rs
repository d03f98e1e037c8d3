use crate::archive::write_archive;
use crate::context::HarnessContext;
use crate::corpus::{CorpusSink, CrashReport, TriageOutcome, triage};
use crate::mutator::MutationCase;
use crate::oracle::{Oracle, TrialResult};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Lifecycle of a [`FuzzDriver`]. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Constructed, `run` not yet called.
    Idle,
    /// Pulling and running cases.
    RunningCase,
    /// The case source is exhausted.
    Completed,
}

/// Per-run counters, one bucket per way a case can end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FuzzStats {
    /// Cases pulled from the generator.
    pub cases: u64,
    /// Trials classified as crashes.
    pub crashes: u64,
    /// Trials where the extractor ran without printing the banner.
    pub clean: u64,
    /// Trials where the extractor could not be spawned.
    pub launch_failures: u64,
    /// Cases skipped because the working archive could not be written.
    pub io_errors: u64,
    /// Trials whose archive could not be kept or deleted afterwards.
    pub triage_errors: u64,
}

/// Feeds every mutation case through writer, oracle and triage, one at a time.
///
/// Every case is attempted exactly once. Per-case failures are logged and
/// counted; none of them stop the run.
pub struct FuzzDriver<C, O, S>
where
    C: Iterator<Item = MutationCase>,
    O: Oracle,
    S: CorpusSink,
{
    ctx: HarnessContext,
    cases: C,
    oracle: O,
    sink: S,
    working_path: PathBuf,
    state: DriverState,
    stats: FuzzStats,
    crash_reports: Vec<CrashReport>,
}

impl<C, O, S> FuzzDriver<C, O, S>
where
    C: Iterator<Item = MutationCase>,
    O: Oracle,
    S: CorpusSink,
{
    /// Builds an idle driver. `working_path` is overwritten by every case.
    pub fn new(
        ctx: HarnessContext,
        cases: C,
        oracle: O,
        sink: S,
        working_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ctx,
            cases,
            oracle,
            sink,
            working_path: working_path.into(),
            state: DriverState::Idle,
            stats: FuzzStats::default(),
            crash_reports: Vec::new(),
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn context(&self) -> &HarnessContext {
        &self.ctx
    }

    pub fn stats(&self) -> &FuzzStats {
        &self.stats
    }

    /// Reports for every archive kept so far, in trial order.
    pub fn crash_reports(&self) -> &[CrashReport] {
        &self.crash_reports
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Runs until the case source is exhausted. Calling it again once
    /// `Completed` does nothing.
    pub fn run(&mut self) -> &FuzzStats {
        if self.state == DriverState::Completed {
            return &self.stats;
        }

        info!(extractor = ?self.ctx.extractor(), "Begin fuzzing");
        self.state = DriverState::RunningCase;
        while let Some(case) = self.cases.next() {
            self.run_case(case);
        }
        self.state = DriverState::Completed;
        info!(
            cases = self.stats.cases,
            trials = self.ctx.trials(),
            crashes = self.stats.crashes,
            "Stop fuzzing"
        );
        &self.stats
    }

    fn run_case(&mut self, case: MutationCase) {
        self.stats.cases += 1;
        debug!(case = %case.kind, "Running case");

        if let Err(e) = write_archive(&self.working_path, &case.entries, &case.tail) {
            warn!(case = %case.kind, "Skipping case: {e}");
            self.stats.io_errors += 1;
            return;
        }

        let result = self.oracle.run(&self.ctx, &self.working_path);
        let trial = match result {
            TrialResult::LaunchFailure => {
                warn!(case = %case.kind, "Extractor could not be launched");
                self.stats.launch_failures += 1;
                self.ctx.trials()
            }
            TrialResult::Crashed => {
                self.stats.crashes += 1;
                self.ctx.advance()
            }
            TrialResult::NoCrash => {
                self.stats.clean += 1;
                self.ctx.advance()
            }
        };

        match triage(&mut self.sink, result, &self.working_path, trial) {
            Ok(TriageOutcome::Retained(report)) => {
                info!(
                    case = %case.kind,
                    trial = report.trial,
                    artifact = ?report.artifact,
                    md5 = %report.input_hash,
                    "Saved crashing archive"
                );
                self.crash_reports.push(report);
            }
            Ok(TriageOutcome::Discarded | TriageOutcome::LeftInPlace) => {}
            Err(e) => {
                warn!(case = %case.kind, "Triage failed: {e}");
                self.stats.triage_errors += 1;
            }
        }
    }
}

use std::path::{Path, PathBuf};

/// State shared by every component for the lifetime of one harness run.
///
/// The extractor path is fixed at construction. The trial counter only moves
/// forward and only the fuzz driver advances it.
#[derive(Debug, Clone)]
pub struct HarnessContext {
    extractor: PathBuf,
    trials: u64,
}

impl HarnessContext {
    pub fn new(extractor: impl Into<PathBuf>) -> Self {
        Self {
            extractor: extractor.into(),
            trials: 0,
        }
    }

    pub fn extractor(&self) -> &Path {
        &self.extractor
    }

    /// Number of trials in which the extractor actually ran.
    pub fn trials(&self) -> u64 {
        self.trials
    }

    pub(crate) fn advance(&mut self) -> u64 {
        self.trials += 1;
        self.trials
    }
}

pub mod archive;
pub mod config;
pub mod context;
pub mod corpus;
pub mod driver;
pub mod executor;
pub mod header;
pub mod mutator;
pub mod oracle;

#[cfg(test)]
mod testutil;

pub use archive::{ArchiveEntry, ArchiveError, ArchiveTail, write_archive};
pub use config::{ConfigError, HarnessConfig};
pub use context::HarnessContext;
pub use corpus::{CorpusError, CorpusSink, CrashReport, DiskCorpus, InMemoryCorpus, triage};
pub use driver::{DriverState, FuzzDriver, FuzzStats};
pub use executor::{ExecutionStatus, ExecutorSettings, ExtractorExecutor};
pub use header::{BLOCK_SIZE, ChecksumWidth, HeaderError, HeaderField, TarHeader};
pub use mutator::{GeneratorSettings, MutationCase, MutationCaseGenerator, MutationKind};
pub use oracle::{CrashBanner, CrashOracle, MatchMode, Oracle, TrialResult};

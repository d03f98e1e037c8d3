use crate::oracle::TrialResult;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Defines errors that can arise while keeping or discarding a trial archive.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// A filesystem operation on a corpus path failed.
    #[error("Corpus I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CorpusError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> CorpusError + '_ {
        move |source| CorpusError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Describes an archive that crashed the extractor and was kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    /// Trial counter value when the crash was classified.
    pub trial: u64,
    /// Where the sink stored the archive.
    pub artifact: PathBuf,
    /// MD5 hex digest of the archive bytes.
    pub input_hash: String,
    /// Archive size in bytes.
    pub len: usize,
}

impl CrashReport {
    fn new(trial: u64, artifact: PathBuf, bytes: &[u8]) -> Self {
        Self {
            trial,
            artifact,
            input_hash: format!("{:x}", md5::compute(bytes)),
            len: bytes.len(),
        }
    }
}

/// `success_<trial>.tar`
pub fn artifact_name(trial: u64) -> String {
    format!("success_{trial}.tar")
}

/// Where crash-inducing archives go.
///
/// Both operations consume the working archive: after either returns `Ok`,
/// nothing remains at `working`.
pub trait CorpusSink {
    /// Moves the working archive into the corpus under the name for `trial`.
    fn retain(&mut self, working: &Path, trial: u64) -> Result<CrashReport, CorpusError>;

    /// Drops the working archive.
    fn discard(&mut self, working: &Path) -> Result<(), CorpusError>;
}

/// What [`triage`] did with the working archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriageOutcome {
    /// Moved into the sink.
    Retained(CrashReport),
    /// Deleted.
    Discarded,
    /// Launch failures leave the working archive where it is.
    LeftInPlace,
}

/// Keeps crash-inducing archives, deletes the rest.
pub fn triage<S: CorpusSink + ?Sized>(
    sink: &mut S,
    result: TrialResult,
    working: &Path,
    trial: u64,
) -> Result<TriageOutcome, CorpusError> {
    match result {
        TrialResult::Crashed => sink.retain(working, trial).map(TriageOutcome::Retained),
        TrialResult::NoCrash => sink.discard(working).map(|_| TriageOutcome::Discarded),
        TrialResult::LaunchFailure => Ok(TriageOutcome::LeftInPlace),
    }
}

/// Stores crash artifacts as plain files in one directory.
#[derive(Debug, Clone)]
pub struct DiskCorpus {
    output_dir: PathBuf,
}

impl DiskCorpus {
    /// Uses `output_dir`, creating it when missing.
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self, CorpusError> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir).map_err(CorpusError::io(&output_dir))?;
        Ok(Self { output_dir })
    }

    /// Where the artifact for `trial` is (or would be) stored.
    pub fn artifact_path(&self, trial: u64) -> PathBuf {
        self.output_dir.join(artifact_name(trial))
    }
}

impl CorpusSink for DiskCorpus {
    fn retain(&mut self, working: &Path, trial: u64) -> Result<CrashReport, CorpusError> {
        let bytes = fs::read(working).map_err(CorpusError::io(working))?;
        let artifact = self.artifact_path(trial);

        if let Err(rename_err) = fs::rename(working, &artifact) {
            // Rename cannot cross filesystems; fall back to copy then remove.
            debug!("Rename to {artifact:?} failed ({rename_err}), copying instead");
            fs::copy(working, &artifact).map_err(|_| CorpusError::Io {
                path: artifact.clone(),
                source: rename_err,
            })?;
            fs::remove_file(working).map_err(CorpusError::io(working))?;
        }

        Ok(CrashReport::new(trial, artifact, &bytes))
    }

    fn discard(&mut self, working: &Path) -> Result<(), CorpusError> {
        fs::remove_file(working).map_err(CorpusError::io(working))
    }
}

/// Keeps crash artifacts in memory. The working file is still removed from
/// disk so the filesystem looks the same as with [`DiskCorpus`].
#[derive(Debug, Default)]
pub struct InMemoryCorpus {
    entries: Vec<(CrashReport, Vec<u8>)>,
    discarded: usize,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes of the artifact saved for `trial`.
    pub fn get(&self, trial: u64) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(report, _)| report.trial == trial)
            .map(|(_, bytes)| bytes.as_slice())
    }

    pub fn reports(&self) -> impl Iterator<Item = &CrashReport> {
        self.entries.iter().map(|(report, _)| report)
    }

    pub fn discarded(&self) -> usize {
        self.discarded
    }
}

impl CorpusSink for InMemoryCorpus {
    fn retain(&mut self, working: &Path, trial: u64) -> Result<CrashReport, CorpusError> {
        let bytes = fs::read(working).map_err(CorpusError::io(working))?;
        fs::remove_file(working).map_err(CorpusError::io(working))?;
        let report = CrashReport::new(trial, PathBuf::from(artifact_name(trial)), &bytes);
        self.entries.push((report.clone(), bytes));
        Ok(report)
    }

    fn discard(&mut self, working: &Path) -> Result<(), CorpusError> {
        fs::remove_file(working).map_err(CorpusError::io(working))?;
        self.discarded += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn working_file(dir: &Path, bytes: &[u8]) -> PathBuf {
        let path = dir.join("archive.tar");
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn crashed_archive_is_renamed_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let payload = vec![0x5A; 2048];
        let working = working_file(dir.path(), &payload);
        let mut corpus = DiskCorpus::new(dir.path()).unwrap();

        let outcome = triage(&mut corpus, TrialResult::Crashed, &working, 7).unwrap();

        let artifact = dir.path().join("success_7.tar");
        assert!(!working.exists());
        assert_eq!(fs::read(&artifact).unwrap(), payload);
        match outcome {
            TriageOutcome::Retained(report) => {
                assert_eq!(report.trial, 7);
                assert_eq!(report.artifact, artifact);
                assert_eq!(report.len, payload.len());
                assert_eq!(report.input_hash, format!("{:x}", md5::compute(&payload)));
            }
            other => panic!("Expected Retained, got {other:?}"),
        }
    }

    #[test]
    fn clean_archive_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let working = working_file(dir.path(), b"data");
        let mut corpus = DiskCorpus::new(dir.path()).unwrap();

        let outcome = triage(&mut corpus, TrialResult::NoCrash, &working, 1).unwrap();
        assert_eq!(outcome, TriageOutcome::Discarded);
        assert!(!working.exists());
        assert!(!corpus.artifact_path(1).exists());
    }

    #[test]
    fn launch_failure_leaves_archive_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let working = working_file(dir.path(), b"data");
        let mut corpus = DiskCorpus::new(dir.path()).unwrap();

        let outcome = triage(&mut corpus, TrialResult::LaunchFailure, &working, 0).unwrap();
        assert_eq!(outcome, TriageOutcome::LeftInPlace);
        assert_eq!(fs::read(&working).unwrap(), b"data");
    }

    #[test]
    fn disk_corpus_creates_nested_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("crashes").join("tar");
        let working = working_file(dir.path(), b"boom");
        let mut corpus = DiskCorpus::new(&output).unwrap();

        corpus.retain(&working, 3).unwrap();
        assert_eq!(fs::read(output.join("success_3.tar")).unwrap(), b"boom");
    }

    #[test]
    fn missing_working_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut corpus = DiskCorpus::new(dir.path()).unwrap();
        let missing = dir.path().join("gone.tar");

        assert!(matches!(
            triage(&mut corpus, TrialResult::NoCrash, &missing, 1),
            Err(CorpusError::Io { .. })
        ));
        assert!(matches!(
            triage(&mut corpus, TrialResult::Crashed, &missing, 1),
            Err(CorpusError::Io { .. })
        ));
    }

    #[test]
    fn in_memory_corpus_captures_bytes_and_clears_working_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut corpus = InMemoryCorpus::new();

        let working = working_file(dir.path(), b"first");
        triage(&mut corpus, TrialResult::Crashed, &working, 1).unwrap();
        assert!(!working.exists());

        let working = working_file(dir.path(), b"second");
        triage(&mut corpus, TrialResult::NoCrash, &working, 2).unwrap();
        assert!(!working.exists());

        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.discarded(), 1);
        assert_eq!(corpus.get(1), Some(&b"first"[..]));
        assert_eq!(corpus.get(2), None);
        assert_eq!(
            corpus.reports().next().map(|r| r.artifact.clone()),
            Some(PathBuf::from("success_1.tar"))
        );
    }
}

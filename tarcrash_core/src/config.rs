use crate::executor::{DEFAULT_READ_LIMIT, ExecutorSettings};
use crate::header::ChecksumWidth;
use crate::mutator::GeneratorSettings;
use crate::oracle::{CRASH_BANNER, CrashBanner, MatchMode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No extractor path given; pass it on the command line or set [extractor] path")]
    MissingExtractor,
    #[error("The crash banner must not be empty")]
    EmptyBanner,
    #[error("read-limit must be at least 1 byte")]
    ZeroReadLimit,
    #[error("read-limit of {read_limit} bytes cannot hold the crash banner; at least {needed} needed")]
    ReadLimitBelowBanner { read_limit: usize, needed: usize },
    #[error("timeout-ms must be greater than zero")]
    ZeroTimeout,
}

/// `[extractor]`: the program under test and how it is run.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ExtractorConfig {
    /// Overridden by the positional CLI argument.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Deadline for the first output line.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Bytes of stdout read per trial. Must fit the banner and its newline.
    #[serde(default = "default_read_limit")]
    pub read_limit: usize,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_read_limit() -> usize {
    DEFAULT_READ_LIMIT
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            path: None,
            timeout_ms: default_timeout_ms(),
            read_limit: default_read_limit(),
            working_dir: None,
        }
    }
}

/// `[oracle]`: what counts as a crash.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct OracleConfig {
    #[serde(default = "default_banner")]
    pub banner: String,
    #[serde(default)]
    pub match_mode: MatchMode,
}

fn default_banner() -> String {
    CRASH_BANNER.to_string()
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            banner: default_banner(),
            match_mode: MatchMode::default(),
        }
    }
}

/// `[archive]`: where archives are written and kept.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    /// Rewritten by every case.
    #[serde(default = "default_working_path")]
    pub working_path: PathBuf,
    /// Receives `success_<N>.tar` artifacts.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub checksum_width: ChecksumWidth,
}

pub fn default_working_path() -> PathBuf {
    PathBuf::from("archive.tar")
}

pub fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            working_path: default_working_path(),
            output_dir: default_output_dir(),
            checksum_width: ChecksumWidth::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub seed: u64,
}

/// Top-level configuration, loaded from TOML and then patched by CLI flags.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

impl HarnessConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: HarnessConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }

    /// The extractor to test. Its absence is fatal before any trial runs.
    pub fn extractor_path(&self) -> Result<&Path, ConfigError> {
        self.extractor
            .path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::MissingExtractor)
    }

    /// Rejects settings under which no trial could run or no crash could
    /// ever be detected. Called once before the driver starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.extractor_path()?;
        if self.oracle.banner.is_empty() {
            return Err(ConfigError::EmptyBanner);
        }
        if self.extractor.read_limit == 0 {
            return Err(ConfigError::ZeroReadLimit);
        }
        let needed = match self.oracle.match_mode {
            MatchMode::ExactLine => self.oracle.banner.len() + 1,
            MatchMode::Substring => self.oracle.banner.len(),
        };
        if self.extractor.read_limit < needed {
            return Err(ConfigError::ReadLimitBelowBanner {
                read_limit: self.extractor.read_limit,
                needed,
            });
        }
        if self.extractor.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            timeout: Duration::from_millis(self.extractor.timeout_ms),
            read_limit: self.extractor.read_limit,
            working_dir: self.extractor.working_dir.clone(),
        }
    }

    pub fn crash_banner(&self) -> CrashBanner {
        CrashBanner::new(self.oracle.banner.clone(), self.oracle.match_mode)
    }

    pub fn generator_settings(&self) -> GeneratorSettings {
        GeneratorSettings {
            checksum_width: self.archive.checksum_width,
            seed: self.generator.seed,
        }
    }
}

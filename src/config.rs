//! tfmerge configuration (`tfmerge.toml`).
//!
//! Every field has a default and a missing file means all defaults, so the
//! file is only needed to change how terraform is driven.
//!
//! ```toml
//! [terraform]
//! binary = "/usr/local/bin/terraform"
//! timeout_seconds = 300
//! extra_args = []
//!
//! [merge]
//! scratch_dir = "/tmp/tfmerge-debug"
//! keep_scratch = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default config file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "tfmerge.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level tfmerge configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TfmergeConfig {
    /// How to run terraform.
    #[serde(default)]
    pub terraform: TerraformConfig,

    /// Merge workspace settings.
    #[serde(default)]
    pub merge: MergeConfig,
}

// ---------------------------------------------------------------------------
// TerraformConfig
// ---------------------------------------------------------------------------

/// Settings for the `terraform` CLI backend.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerraformConfig {
    /// Binary path or name looked up on `PATH` (default: `"terraform"`).
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Per-relocation timeout in seconds; 0 disables it (default: 300).
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Extra arguments appended to every `terraform state mv`.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl TerraformConfig {
    /// The relocation timeout, `None` when disabled.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        if self.timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_seconds))
        }
    }
}

impl Default for TerraformConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            timeout_seconds: default_timeout_seconds(),
            extra_args: Vec::new(),
        }
    }
}

fn default_binary() -> PathBuf {
    PathBuf::from("terraform")
}

const fn default_timeout_seconds() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// MergeConfig
// ---------------------------------------------------------------------------

/// Where the merge keeps its intermediate state files.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Fixed scratch directory. Unset or empty means a fresh temporary
    /// directory per merge.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// Keep the temporary scratch directory after the merge.
    #[serde(default)]
    pub keep_scratch: bool,
}

impl MergeConfig {
    /// The fixed scratch directory, if one is configured.
    #[must_use]
    pub fn fixed_scratch_dir(&self) -> Option<&Path> {
        self.scratch_dir
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error loading or parsing a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("{}: could not read file: {source}", path.display())]
    Read {
        /// The config file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid TOML or an unknown field.
    #[error("{}", located(path.as_deref(), line.as_ref(), message))]
    Parse {
        /// The config file, when loaded from disk.
        path: Option<PathBuf>,
        /// 1-based line of the offending input, when known.
        line: Option<usize>,
        /// The parser's description.
        message: String,
    },
}

impl ConfigError {
    /// The file the error refers to, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Read { path, .. } => Some(path),
            Self::Parse { path, .. } => path.as_deref(),
        }
    }
}

fn located(path: Option<&Path>, line: Option<&usize>, message: &str) -> String {
    let mut out = String::new();
    if let Some(p) = path {
        out.push_str(&format!("{}: ", p.display()));
    }
    if let Some(line) = line {
        out.push_str(&format!("line {line}: "));
    }
    out.push_str(message);
    out
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl TfmergeConfig {
    /// Load configuration from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but contains invalid TOML or unknown fields,
    ///   returns a [`ConfigError`] with line-level detail.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_owned(),
                    source,
                });
            }
        };
        Self::parse(&contents).map_err(|e| match e {
            ConfigError::Parse { line, message, .. } => ConfigError::Parse {
                path: Some(path.to_owned()),
                line,
                message,
            },
            read @ ConfigError::Read { .. } => read,
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse {
            path: None,
            line: e
                .span()
                .map(|span| toml_str[..span.start].matches('\n').count() + 1),
            message: e.message().to_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

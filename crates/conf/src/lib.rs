#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `exodus_conf` loads the exodus-rsync configuration file and maps rsync
//! destination arguments of the form `<prefix>:<path>` onto configured
//! gateway environments.
//!
//! The configuration is YAML:
//!
//! ```yaml
//! gwurl: https://gateway.example.com
//! environments:
//! - prefix: exodus
//!   gwenv: live
//! - prefix: exodus-mixed
//!   gwenv: live
//!   rsyncmode: mixed
//! ```
//!
//! # Design
//!
//! Environment selection is an exact match on the destination prefix; when
//! several environments share a prefix the first in configuration order
//! wins. The gateway base URL may be set globally or overridden per
//! environment. Credential material never appears here; it passes through
//! the process environment to the transport layer untouched.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Name of the environment variable overriding the configuration path.
pub const CONF_ENV_VAR: &str = "EXODUS_RSYNC_CONF";

/// How syncs to an environment are carried out.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RsyncMode {
    /// Publish through the gateway only.
    #[default]
    Exodus,
    /// Run the native rsync first, then publish through the gateway.
    Mixed,
    /// Hand the transfer to the native rsync entirely.
    Rsync,
}

/// One gateway environment, selected by destination prefix.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Environment {
    /// Destination prefix matched against the argument before `:`.
    pub prefix: String,
    /// Environment name passed to the gateway.
    pub gwenv: String,
    /// Transfer mode for this environment.
    #[serde(default)]
    pub rsyncmode: RsyncMode,
    /// Gateway base URL override for this environment.
    #[serde(default)]
    pub gwurl: Option<String>,
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Gateway base URL shared by environments without an override.
    #[serde(default)]
    pub gwurl: Option<String>,
    /// Configured environments, in selection order.
    #[serde(default)]
    pub environments: Vec<Environment>,
}

impl Config {
    /// Parses configuration from YAML text.
    pub fn from_str(text: &str) -> Result<Self, ConfError> {
        serde_yaml::from_str(text).map_err(ConfError::Parse)
    }

    /// Reads and parses the configuration file at `path`.
    pub fn from_path(path: &Path) -> Result<Self, ConfError> {
        let text = fs::read_to_string(path).map_err(|source| ConfError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str(&text)
    }

    /// Loads configuration from the standard search locations.
    ///
    /// The search order is `$EXODUS_RSYNC_CONF`, `./exodus-rsync.conf`,
    /// `$HOME/.config/exodus-rsync.conf`, `/etc/exodus-rsync.conf`. A path
    /// supplied through the environment variable must exist; the remaining
    /// candidates are skipped silently when absent.
    pub fn load() -> Result<Self, ConfError> {
        if let Some(path) = env::var_os(CONF_ENV_VAR) {
            return Self::from_path(Path::new(&path));
        }

        for candidate in Self::search_paths() {
            if candidate.is_file() {
                return Self::from_path(&candidate);
            }
        }

        Err(ConfError::NotFound)
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("exodus-rsync.conf")];
        if let Some(home) = env::var_os("HOME") {
            paths.push(PathBuf::from(home).join(".config/exodus-rsync.conf"));
        }
        paths.push(PathBuf::from("/etc/exodus-rsync.conf"));
        paths
    }

    /// Splits a destination argument into `(prefix, path)` at the first `:`.
    #[must_use]
    pub fn split_dest(dest: &str) -> Option<(&str, &str)> {
        dest.split_once(':')
    }

    /// Returns the first environment whose prefix exactly matches the
    /// destination argument's prefix, along with the destination path.
    #[must_use]
    pub fn environment_for<'a>(&'a self, dest: &'a str) -> Option<(&'a Environment, &'a str)> {
        let (prefix, path) = Self::split_dest(dest)?;
        self.environments
            .iter()
            .find(|environment| environment.prefix == prefix)
            .map(|environment| (environment, path))
    }

    /// Resolves the gateway base URL for `environment`.
    pub fn gateway_url<'a>(&'a self, environment: &'a Environment) -> Result<&'a str, ConfError> {
        environment
            .gwurl
            .as_deref()
            .or(self.gwurl.as_deref())
            .ok_or_else(|| ConfError::MissingGatewayUrl {
                env: environment.gwenv.clone(),
            })
    }
}

/// Errors produced while loading or consulting configuration.
#[derive(Debug, Error)]
pub enum ConfError {
    /// The configuration file could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        /// Path of the file that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The configuration file is not valid YAML for the expected schema.
    #[error("invalid config file: {0}")]
    Parse(#[source] serde_yaml::Error),
    /// No configuration file was found in any search location.
    #[error("no configuration file found (set ${CONF_ENV_VAR} or create exodus-rsync.conf)")]
    NotFound,
    /// The selected environment has no gateway URL configured.
    #[error("no gateway URL configured for environment '{env}'")]
    MissingGatewayUrl {
        /// Gateway environment name missing a URL.
        env: String,
    },
}

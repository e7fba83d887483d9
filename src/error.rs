//! Error kinds surfaced by the configuration and command-line core.
//!
//! Absence of a configuration file is not an error, and unknown command-line
//! flags are not errors either (they are deferred to the script). Everything
//! here is fatal and reported once to the caller.

use std::path::PathBuf;

use thiserror::Error;

/// Usage line shown when no script token can be identified.
pub const USAGE: &str = "Usage: devmon [options] [--] <script> [arguments]";

#[derive(Debug, Error)]
pub enum Error {
    /// No script token was found after disambiguation.
    #[error("{}", USAGE)]
    Usage,

    /// A configuration file exists but could not be read.
    #[error("failed to read config file {}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file is present but is not a valid JSON object.
    #[error("failed to parse config file {}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The merged configuration does not fit the expected option shapes.
    #[error("invalid configuration")]
    InvalidConfig(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

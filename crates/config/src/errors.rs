//! Configuration errors.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Errors that stop a configuration file from being read at all.
///
/// Bad individual values are not errors; they become
/// [`ConfigWarning`](crate::ConfigWarning)s.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read configuration file {}: {source}", path.display())]
    #[diagnostic(
        code(warden::config::read),
        help("check the path passed with --config or WARDEN_CONFIG")
    )]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The KDL document is syntactically invalid.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Kdl(#[from] kdl::KdlError),
}

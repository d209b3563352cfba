//! Load failure taxonomy
//!
//! Every failure in a load chain surfaces to the original caller as a
//! [`LoadError`]. Errors are `Clone` because the outcome of an in-flight load is
//! handed to every request that joined it.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Coarse error category, used by callers that only care about the class of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Location does not exist or is not a loadable unit
    Resolution,
    /// No registered transpiler applies to the location
    UnsupportedFormat,
    /// A transpiler failed while converting raw content
    Conversion,
    /// Evaluating the converted content failed
    Execution,
    /// A unit transitively requested itself while it was still loading
    CircularLoad,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("cannot load '{}': {reason}", location.display())]
    Resolution { location: PathBuf, reason: String },

    #[error("'{extension}' file not supported ({})", location.display())]
    UnsupportedExtension { location: PathBuf, extension: String },

    #[error("file must have extension: '{}'", location.display())]
    MissingExtension { location: PathBuf },

    #[error("failed to convert '{}': {message}", location.display())]
    Conversion { location: PathBuf, message: String },

    #[error("failed to execute '{}': {message}", location.display())]
    Execution { location: PathBuf, message: String },

    #[error("circular load of '{}': {chain}", location.display())]
    CircularLoad { location: PathBuf, chain: String },
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Resolution { .. } => ErrorKind::Resolution,
            Self::UnsupportedExtension { .. } | Self::MissingExtension { .. } => {
                ErrorKind::UnsupportedFormat
            }
            Self::Conversion { .. } => ErrorKind::Conversion,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::CircularLoad { .. } => ErrorKind::CircularLoad,
        }
    }

    /// Location the failure was reported for
    pub fn location(&self) -> &Path {
        match self {
            Self::Resolution { location, .. }
            | Self::UnsupportedExtension { location, .. }
            | Self::MissingExtension { location }
            | Self::Conversion { location, .. }
            | Self::Execution { location, .. }
            | Self::CircularLoad { location, .. } => location,
        }
    }

    pub(crate) fn resolution(location: &Path, reason: impl Into<String>) -> Self {
        Self::Resolution {
            location: location.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Build the "no transpiler" error, distinguishing a present-but-unsupported
    /// extension from a location that never resolved to one
    pub(crate) fn unsupported(location: &Path) -> Self {
        match location.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if !ext.is_empty() => Self::UnsupportedExtension {
                location: location.to_path_buf(),
                extension: format!(".{}", ext),
            },
            _ => Self::MissingExtension {
                location: location.to_path_buf(),
            },
        }
    }

    pub(crate) fn conversion(location: &Path, error: anyhow::Error) -> Self {
        Self::Conversion {
            location: location.to_path_buf(),
            message: format!("{:#}", error),
        }
    }

    /// Wrap an evaluation failure, unless the failure already is a load error
    /// raised by a nested request
    pub(crate) fn execution(location: &Path, error: anyhow::Error) -> Self {
        match error.downcast::<LoadError>() {
            Ok(nested) => nested,
            Err(error) => Self::Execution {
                location: location.to_path_buf(),
                message: format!("{:#}", error),
            },
        }
    }
}

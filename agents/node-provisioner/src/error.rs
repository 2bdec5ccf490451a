//! Error types
//!
//! Errors surfaced to the outer provisioning loop. Everything else the
//! readiness probes run into degrades to a boolean outcome.

use thiserror::Error;

/// Failure to produce a launcher for a node
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration problem the operator has to fix; provisioning of the
    /// node should be aborted.
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    /// The node is not (or no longer) addressable.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LaunchError {
    /// Create a provisioning error from a message
    pub fn provisioning(message: impl Into<String>) -> Self {
        LaunchError::Provisioning(message.into())
    }

    /// Create an I/O error of kind `Other` from a message
    pub fn io(message: impl Into<String>) -> Self {
        LaunchError::Io(std::io::Error::new(std::io::ErrorKind::Other, message.into()))
    }

    /// Whether the error is something the operator has to fix
    pub fn is_provisioning(&self) -> bool {
        matches!(self, LaunchError::Provisioning(_))
    }
}

/// Failure to resolve layered node configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown node template '{0}'")]
    UnknownTemplate(String),

    #[error("No connection strategy configured for '{0}' or its defaults")]
    NoStrategy(String),
}

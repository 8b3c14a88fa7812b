//! Page renderer error types

use thiserror::Error;

/// Page rendering errors
#[derive(Debug, Error)]
pub enum PageError {
    /// Template missing from the embedded set
    #[error("Template not found: {0}")]
    NotFound(String),

    /// Template parse or render error
    #[error("Template error: {0}")]
    TemplateError(String),
}

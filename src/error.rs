use thiserror::Error;

/// Raised at the input boundary before attributes reach the classifier.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} must be a finite number, got {value}")]
    NotFinite { field: &'static str, value: f64 },

    #[error("{field} must be between 0 and 100, got {value}")]
    OutOfPercentRange { field: &'static str, value: f64 },

    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("{0} must not be blank")]
    Blank(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown performance category: {0:?}")]
pub struct ParseCategoryError(pub String);

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("language model server at {0} is not reachable")]
    Unavailable(String),

    #[error("language model request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("language model returned status {0}")]
    Status(reqwest::StatusCode),
}

use crate::error::Error;

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

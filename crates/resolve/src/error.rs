//! Error types for address resolution

/// Error type for module resolution operations
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Failed to read the process memory map
    #[error("Failed to read process maps: {0}")]
    Io(#[from] std::io::Error),

    /// No mapping matched the requested module name
    #[error("Module not mapped: {0}")]
    ModuleNotFound(String),

    /// A maps line matched the module but could not be parsed
    #[error("Malformed maps line: {0}")]
    Parse(String),
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HierarchyError {
    #[error("category \"{0}\" not found")]
    PathNotFound(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("root.json not found under {0}")]
    MissingRoot(std::path::PathBuf),

    #[error("failed to read hierarchy directory {path}: {source}")]
    Walk {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

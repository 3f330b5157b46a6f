use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("vault root does not exist: {0}")]
    VaultNotFound(PathBuf),

    #[error("vault contains no markdown notes: {0}")]
    EmptyVault(PathBuf),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid arguments: {0}")]
    Validation(String),

    #[error("file too large: {path} is {size} bytes (max {max})")]
    FileTooLarge { path: String, size: u64, max: u64 },

    #[error("regex search exceeded its time budget of {0:?}")]
    SearchTimeout(Duration),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("frontmatter yaml error: {0}")]
    FrontmatterYaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

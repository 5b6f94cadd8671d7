use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read npy array: {0}")]
    ReadNpy(#[from] ndarray_npy::ReadNpyError),

    #[error("failed to write npy array: {0}")]
    WriteNpy(#[from] ndarray_npy::WriteNpyError),

    #[error("failed to read npz archive: {0}")]
    ReadNpz(#[from] ndarray_npy::ReadNpzError),

    #[error("failed to write npz archive: {0}")]
    WriteNpz(#[from] ndarray_npy::WriteNpzError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("{path}: unsupported format (expected .npy, .npz, .csv, .txt or .dat)")]
    UnsupportedFormat { path: PathBuf },

    #[error("npz archive {path} has no entry named {name}")]
    MissingEntry { path: PathBuf, name: String },

    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("{path}: expected a {expected} array, got {ndim}-D")]
    Dimensionality {
        path: PathBuf,
        expected: &'static str,
        ndim: usize,
    },

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error("{path} line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("invalid sparse matrix: {0}")]
    Sparse(String),

    #[error("residue selection error: {0}")]
    Selection(String),

    #[error("cannot form {k} clusters from {observations} observations")]
    TooFewObservations { k: usize, observations: usize },

    #[error("clustering error: {0}")]
    Clustering(String),

    #[error("failed to draw {path}: {message}")]
    Plot { path: PathBuf, message: String },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

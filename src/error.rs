use std::path::PathBuf;

/// Errors produced while opening a GRIB file or reading data through the
/// store.
///
/// Errors coming out of the external decoding library are propagated
/// unmodified inside the `Grib` variant; nothing is retried or downgraded
/// to a warning.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("GRIB decoding error: {0}")]
    Grib(grib::GribError),

    #[error("index {index} is out of bounds for axis {axis} with size {size}")]
    IndexOutOfBounds {
        index: usize,
        axis: usize,
        size: usize,
    },

    #[error("indexing expression has {got} indexers but the array has {expected} dimensions")]
    IndexerMismatch { got: usize, expected: usize },

    #[error("slice step must be nonzero for axis {axis}")]
    ZeroSliceStep { axis: usize },

    #[error("the underlying GRIB file handle has been closed")]
    FileClosed,

    #[error("message {0}.{1} listed in the index is no longer present in the file")]
    MessageVanished(usize, usize),

    #[error("message {}.{} decoded to {got} values, expected {expected}", message.0, message.1)]
    DecodedShapeMismatch {
        message: (usize, usize),
        got: usize,
        expected: usize,
    },

    #[error("unsupported GRIB key: '{0}'")]
    UnsupportedKey(String),

    #[error("unknown encode_cf component: '{0}'")]
    UnknownEncodeCf(String),

    #[error("no GRIB messages remain after applying filter_by_keys")]
    EmptyDataset,

    #[error("no backend registered under the name '{0}'")]
    UnknownBackend(String),

    #[error("no registered backend recognizes '{0}'")]
    NoMatchingBackend(PathBuf),
}

impl From<grib::GribError> for Error {
    fn from(err: grib::GribError) -> Self {
        Error::Grib(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

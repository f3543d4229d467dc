use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("unsupported trajectory file version: {0}")]
    UnsupportedVersion(String),

    #[error("person {person} has more than one observation in frame {frame}")]
    DuplicateObservation { person: i32, frame: usize },

    #[error("extrinsic calibration has not been computed")]
    NotCalibrated,

    #[error("Geometry Error: {0}")]
    Geometry(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config Error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config Error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("Video Error: {0}")]
    Video(String),
}

impl Error {
    pub(crate) fn parse<S: Into<String>>(line: usize, message: S) -> Self {
        Error::Parse {
            line,
            message: message.into(),
        }
    }
}

#[cfg(feature = "video")]
impl From<opencv::Error> for Error {
    fn from(err: opencv::Error) -> Self {
        Error::Video(err.to_string())
    }
}

use thiserror::Error;

/// Errors raised while building a sink from a URL.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The URL could not be parsed at all.
    #[error("invalid sink url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The URL names a sink other than statsite.
    #[error("cannot create metric sink, unrecognized sink name: {0:?}")]
    UnsupportedScheme(String),

    /// The URL has no host to connect to.
    #[error("sink url is missing a host")]
    MissingHost,

    /// The URL has no port to connect to.
    #[error("sink url is missing a port")]
    MissingPort,

    /// A query parameter had a value that could not be parsed.
    #[error("bad {name:?} param: {value:?}")]
    InvalidParameter { name: String, value: String },

    /// A query parameter that the sink does not understand.
    #[error("unknown sink url param: {0:?}")]
    UnknownParameter(String),
}

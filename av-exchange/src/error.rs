use std::fmt::Display;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures that end a stream or the whole pipeline.
///
/// "Not enough data yet" and "end of stream" are not errors: they are reported
/// through [`crate::exchange::Drain`] and handled by the drain loop itself.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Could not open a container, device or codec, or the configuration is
    /// unusable. Raised before the exchange loop starts.
    #[error("setup failed: {0}")]
    Setup(String),

    /// The decoder or encoder rejected a submission or failed while draining.
    #[error("codec error: {0}")]
    Codec(String),

    /// Writing output (mux, still image, render) failed.
    #[error("sink error: {0}")]
    Sink(String),

    /// A submit/drain call that the exchange state does not allow.
    #[error("invalid exchange state: {0}")]
    InvalidState(String),

    /// A frame was submitted with a timestamp not above the previous one.
    #[error("non-increasing timestamp {current} after {previous}")]
    Timestamp { previous: i64, current: i64 },
}

impl Error {
    pub fn setup(context: &str, err: impl Display) -> Self {
        Self::Setup(format!("{}: {}", context, err))
    }

    pub fn codec(context: &str, err: impl Display) -> Self {
        Self::Codec(format!("{}: {}", context, err))
    }

    pub fn sink(context: &str, err: impl Display) -> Self {
        Self::Sink(format!("{}: {}", context, err))
    }

    /// Short category label used in log lines and the CLI exit message.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Setup(_) => "setup",
            Error::Codec(_) | Error::Timestamp { .. } => "codec",
            Error::Sink(_) => "sink",
            Error::InvalidState(_) => "protocol",
        }
    }
}

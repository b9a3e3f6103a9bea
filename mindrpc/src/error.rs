use thiserror::Error;

/// The error type returned by protocol operations.
///
/// A device that answered with an explicit error object ([`Error::Device`])
/// is a different failure than a connection that produced no response at
/// all ([`Error::NoResponse`]); callers rely on the distinction.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tls error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("Tls handshake with the device failed: {0}")]
    Handshake(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Malformed response body: {0}")]
    MalformedBody(#[from] serde_json::Error),

    #[error("Connection closed before a response arrived")]
    NoResponse,

    #[error("Device reported an error: {0}")]
    Device(String),

    #[error("Device rejected the media access key: {0}")]
    AuthRejected(String),

    #[error("Response field {0:?} is missing or has the wrong shape")]
    MissingField(&'static str),
}

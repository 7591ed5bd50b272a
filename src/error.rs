use std::convert::From;
use std::io;

use crate::delivery_record::DeliveryStatusCode;

/// Errors raised while loading or persisting durable state, or while
/// preparing a run.
#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "I/O error: {}", _0)]
    Io(#[cause] io::Error),

    #[fail(display = "table error: {}", _0)]
    Table(#[cause] csv::Error),

    #[fail(display = "config parse error: {}", _0)]
    ConfigParse(#[cause] toml::de::Error),

    #[fail(display = "invalid configuration: {}", _0)]
    Config(String),

    #[fail(display = "message error: {}", _0)]
    Message(String),

    #[fail(display = "unrecognized table header in {}", _0)]
    UnknownSchema(String),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Error {
        Error::Table(e)
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Error {
        Error::ConfigParse(e)
    }
}

/// A failed hand-off to the transport, already classified.
#[derive(Debug, Clone, PartialEq, Fail)]
pub enum TransportError {
    /// The remote service rejected the sender credential.
    #[fail(display = "{}", _0)]
    Authentication(String),

    /// The session failed at the protocol level, or the relay deferred the
    /// message (4xx). Worth another attempt.
    #[fail(display = "{}", _0)]
    Protocol(String),

    /// The relay refused the message for good (5xx).
    #[fail(display = "{}", _0)]
    Rejected(String),

    /// Anything else (connection, TLS, resolution, ...).
    #[fail(display = "{}", _0)]
    Other(String),
}

impl TransportError {
    pub fn status_code(&self) -> DeliveryStatusCode {
        match *self {
            TransportError::Authentication(_) => DeliveryStatusCode::AuthenticationError,
            TransportError::Protocol(_) | TransportError::Rejected(_) => {
                DeliveryStatusCode::ProtocolError
            }
            TransportError::Other(_) => DeliveryStatusCode::UnknownError,
        }
    }

    /// Credential and permanent rejections will not change on an immediate
    /// re-attempt.
    pub fn is_retryable(&self) -> bool {
        match *self {
            TransportError::Authentication(_) | TransportError::Rejected(_) => false,
            TransportError::Protocol(_) | TransportError::Other(_) => true,
        }
    }
}

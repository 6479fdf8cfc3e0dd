//! Error taxonomy for the `strato` client.
//!
//! One `thiserror` enum covering validation, encoding, transport, and wire
//! decoding failures, plus a crate-wide [`Result`] alias. The CLI wraps these
//! in `anyhow` for human-facing context.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the Strato client.
#[derive(Debug, Error)]
pub enum Error {
    /// No account id was supplied to an operation that requires one.
    #[error("missing account id")]
    MissingAccountId,

    /// No script name was supplied to an operation that requires one.
    #[error("missing script name")]
    MissingScriptName,

    /// A binding descriptor carried an unrecognized `type` tag.
    #[error("invalid binding kind: {0}")]
    InvalidBindingKind(String),

    /// A script payload could not be read for upload.
    #[error("script payload is unreadable")]
    UnreadablePayload,

    /// Serialization or multipart encoding failed.
    #[error("failed to encode request: {0}")]
    Encode(#[from] std::io::Error),

    /// The HTTP request could not be transmitted.
    #[error("failed to transmit request: {0}")]
    Transmit(reqwest::Error),

    /// The server responded with a non-2xx status.
    #[error("api error ({status}): {message}")]
    Api {
        status: reqwest::StatusCode,
        message: String,
    },

    /// A response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(serde_json::Error),

    /// A multipart message was malformed.
    #[error("malformed multipart message: {0}")]
    MalformedMultipart(String),

    /// A request URL could not be constructed.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

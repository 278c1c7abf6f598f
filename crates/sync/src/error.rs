use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// RPC call failed below the protocol layer (socket, serialization of
    /// the outgoing frame, connection loss).
    #[error("transport: {message}")]
    Transport { message: String },

    /// RPC call did not complete within its deadline. Treated like a
    /// transport failure for state purposes.
    #[error("{method} timed out")]
    Timeout { method: String },

    /// Response body did not match the expected shape.
    #[error("decode {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// Rejected locally before any request was sent.
    #[error("{message}")]
    Validation { message: String },

    /// Server-side rejection of a request (e.g. unknown id).
    #[error("{code}: {message}")]
    Rejected { code: String, message: String },

    /// The engine or connection is stopped; no request was sent.
    #[error("gateway connection closed")]
    Closed,
}

impl Error {
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn timeout(method: impl Into<String>) -> Self {
        Self::Timeout {
            method: method.into(),
        }
    }

    #[must_use]
    pub fn decode(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            context: context.into(),
            source,
        }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// True when this error was raised before any request left the client.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

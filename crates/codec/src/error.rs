use thiserror::Error;

/// Errors that can occur while encoding or decoding payloads.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The payload could not be decoded into the requested type.
    #[error("failed to decode payload as {format}: {reason}")]
    Decode {
        /// Wire format the codec speaks.
        format: &'static str,
        /// Underlying decoder message.
        reason: String,
    },

    /// The value could not be encoded.
    #[error("failed to encode value as {format}: {reason}")]
    Encode {
        /// Wire format the codec speaks.
        format: &'static str,
        /// Underlying encoder message.
        reason: String,
    },
}

impl Error {
    pub(crate) fn decode(format: &'static str, reason: impl ToString) -> Self {
        Self::Decode {
            format,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn encode(format: &'static str, reason: impl ToString) -> Self {
        Self::Encode {
            format,
            reason: reason.to_string(),
        }
    }

    /// Whether this error came from the decoding side.
    #[must_use]
    pub const fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}

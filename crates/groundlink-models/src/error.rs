//! Error types for the `groundlink-models` crate.
//!
//! All fallible encoders and lookups in this crate return variants of
//! [`ProtocolError`]. Decode *misses* (bad checksum, short frame) are not
//! errors: the codecs report them as "no frame" so a lossy link keeps
//! flowing.

/// Errors produced when encoding frames or resolving protocol identifiers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// A frame payload exceeded what the wire format can carry.
    #[error("payload of {len} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge {
        /// Offending payload length.
        len: usize,
        /// Wire-format maximum.
        max: usize,
    },

    /// A message id is not part of the protocol's schema or valid id range.
    #[error("unknown message id {0}")]
    UnknownMessage(u32),

    /// A flight mode name did not match any supported mode.
    #[error("unknown flight mode \"{0}\"")]
    UnknownMode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_payload_too_large() {
        let err = ProtocolError::PayloadTooLarge { len: 300, max: 254 };
        assert_eq!(err.to_string(), "payload of 300 bytes exceeds the 254-byte limit");
    }

    #[test]
    fn display_unknown_message() {
        assert_eq!(
            ProtocolError::UnknownMessage(77).to_string(),
            "unknown message id 77"
        );
    }

    #[test]
    fn display_unknown_mode() {
        assert_eq!(
            ProtocolError::UnknownMode("WARP".into()).to_string(),
            "unknown flight mode \"WARP\""
        );
    }
}

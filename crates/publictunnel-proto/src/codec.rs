//! Codec for encoding/decoding control messages

use crate::messages::ControlMessage;
use thiserror::Error;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed control message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),
}

/// JSON codec for the control channel
///
/// One message per WebSocket frame, so there is no length prefix here.
pub struct ControlCodec;

impl ControlCodec {
    /// Maximum encoded message size (64MB, the WebSocket default message limit)
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

    /// Encode a message into the text of one frame
    pub fn encode(msg: &ControlMessage) -> Result<String, CodecError> {
        let text = serde_json::to_string(msg)?;

        if text.len() > Self::MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(text.len()));
        }

        Ok(text)
    }

    /// Decode the contents of one frame
    pub fn decode(data: &[u8]) -> Result<ControlMessage, CodecError> {
        if data.len() > Self::MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(data.len()));
        }

        Ok(serde_json::from_slice(data)?)
    }
}

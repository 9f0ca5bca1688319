//! Encoding and decoding of gateway frames.
//!
//! Outbound frames are JSON text messages. Inbound frames arrive either as
//! text or as chunks of one continuous zlib stream: a chunk is only complete
//! once it ends with the 4-byte sync trailer, and the inflater's dictionary
//! is shared across the whole connection, so partial chunks accumulate until
//! the trailer shows up.

use flate2::{Decompress, FlushDecompress};
use tokio_tungstenite::tungstenite::Message;
use tracing::trace;

use chatwire_shared::{Frame, ProtocolError};

/// Marks the end of one compressed frame (zlib sync flush).
const SYNC_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

const INFLATE_CHUNK: usize = 16 * 1024;

/// Stateful frame codec for one connection. Holds the shared inflater and
/// the partial-chunk accumulation buffer, so it must live exactly as long
/// as the socket.
pub struct FrameCodec {
    inflater: Decompress,
    buffer: Vec<u8>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            inflater: Decompress::new(true),
            buffer: Vec::new(),
        }
    }

    /// Serializes an outbound frame to a text message.
    pub fn encode(frame: &Frame) -> Result<Message, ProtocolError> {
        let json =
            serde_json::to_string(frame).map_err(|err| ProtocolError::MalformedFrame(err.to_string()))?;
        Ok(Message::text(json))
    }

    /// Decodes one websocket message. Returns `None` for messages that do
    /// not (yet) yield a frame: control messages, and binary chunks still
    /// waiting on the sync trailer.
    pub fn decode(&mut self, message: Message) -> Result<Option<Frame>, ProtocolError> {
        match message {
            Message::Text(text) => parse_frame(text.as_str()).map(Some),
            Message::Binary(bytes) => {
                self.buffer.extend_from_slice(&bytes);
                if !self.buffer.ends_with(&SYNC_TRAILER) {
                    trace!(buffered = self.buffer.len(), "compressed frame incomplete");
                    return Ok(None);
                }
                let inflated = self.inflate()?;
                let text = String::from_utf8(inflated)
                    .map_err(|err| ProtocolError::Decompress(err.to_string()))?;
                parse_frame(&text).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn inflate(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::with_capacity(INFLATE_CHUNK);
        let consumed_before = self.inflater.total_in();
        let mut offset = 0usize;
        loop {
            let len_before = out.len();
            self.inflater
                .decompress_vec(&self.buffer[offset..], &mut out, FlushDecompress::Sync)
                .map_err(|err| ProtocolError::Decompress(err.to_string()))?;
            offset = (self.inflater.total_in() - consumed_before) as usize;

            let consumed_all = offset >= self.buffer.len();
            if consumed_all && (out.len() < out.capacity() || out.len() == len_before) {
                break;
            }
            out.reserve(INFLATE_CHUNK);
        }
        self.buffer.clear();
        Ok(out)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_frame(text: &str) -> Result<Frame, ProtocolError> {
    serde_json::from_str(text).map_err(|err| ProtocolError::MalformedFrame(err.to_string()))
}

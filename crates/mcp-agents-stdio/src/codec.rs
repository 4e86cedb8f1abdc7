//! Newline-delimited JSON framing for the server's stdio.

use std::io;

use bytes::BytesMut;
use mcp_agents_core::SessionError;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Maximum accepted inbound line: 4 MiB.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// One inbound line.
///
/// Bad lines are yielded as items rather than decoder errors: a
/// `FramedRead` ends its stream after any decoder error, and one garbled
/// line must not end the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    /// A line that was dropped, with the reason.
    Malformed(String),
}

/// Line codec for JSON-RPC messages.
///
/// Decoder errors are reserved for failures of the underlying channel.
#[derive(Debug)]
pub struct JsonLineCodec(LinesCodec);

impl JsonLineCodec {
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for JsonLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonLineCodec {
    type Item = Frame;
    type Error = SessionError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, SessionError> {
        to_frame(self.0.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, SessionError> {
        to_frame(self.0.decode_eof(src))
    }
}

impl Encoder<String> for JsonLineCodec {
    type Error = SessionError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), SessionError> {
        self.0.encode(item, dst).map_err(|e| match e {
            LinesCodecError::Io(err) => SessionError::from(err),
            LinesCodecError::MaxLineLengthExceeded => {
                SessionError::Protocol("outbound line too long".into())
            }
        })
    }
}

// LinesCodec consumes the offending line before reporting it, so decoding
// can carry on with the next one.
fn to_frame(
    decoded: Result<Option<String>, LinesCodecError>,
) -> Result<Option<Frame>, SessionError> {
    match decoded {
        Ok(line) => Ok(line.map(Frame::Line)),
        Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Malformed(format!(
            "line too long: exceeded {MAX_LINE_BYTES} bytes"
        )))),
        Err(LinesCodecError::Io(err)) if err.kind() == io::ErrorKind::InvalidData => {
            Ok(Some(Frame::Malformed(format!("unreadable line: {err}"))))
        }
        Err(LinesCodecError::Io(err)) => Err(SessionError::from(err)),
    }
}

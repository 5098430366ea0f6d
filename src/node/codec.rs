//! Line codec for the node's console output.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! node that floods its console without newlines cannot grow the read
//! buffer without bound.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::warn;

use crate::{AppError, Result};

/// Maximum console line length accepted: 64 KiB.
pub const MAX_LINE_BYTES: usize = 65_536;

/// Newline-delimited UTF-8 decoder for node console streams.
///
/// Lines longer than [`MAX_LINE_BYTES`] are dropped with a warning and
/// decoding resumes after the next newline; a [`FramedRead`] stream ends on
/// the first decoder error, so an over-long line must not surface as one.
/// I/O errors map to [`AppError::Io`].
///
/// [`FramedRead`]: tokio_util::codec::FramedRead
#[derive(Debug)]
pub struct ConsoleCodec(LinesCodec);

impl ConsoleCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for ConsoleCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ConsoleCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(max = MAX_LINE_BYTES, "console line too long, discarding");
                }
                other => return other.map_err(map_codec_error),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode_eof(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(max = MAX_LINE_BYTES, "console line too long, discarding");
                }
                other => return other.map_err(map_codec_error),
            }
        }
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Process(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::serial::error::SerialPortError;

/// Lines longer than this are cut into several frames.
/// Stops a device which never prints a newline from growing the buffer forever.
pub(crate) const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// This codec has a configurable delimiter character for reading,
/// and optionally adds a terminator to each line it encodes.
#[derive(Debug, Clone)]
pub(crate) struct LinesCodec {
    /// How far we have looked for a newline into the buffer
    cursor: usize,

    /// How to delimit incoming byte streams.
    /// This delimiter is not included in the yielded frames.
    read_delimiter: u8,

    /// If provided, which bytes to append when writing (encoding) messages.
    /// If `None`, forwards the data as-is.
    write_terminator: Option<&'static [u8]>,

    max_line_length: usize,
}

impl LinesCodec {
    /// Create a new codec.
    pub(crate) fn new(read_delimiter: u8, write_terminator: Option<&'static [u8]>) -> Self {
        Self {
            cursor: 0,
            read_delimiter,
            write_terminator,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length.max(1);
        self
    }
}

impl Default for LinesCodec {
    fn default() -> Self {
        Self::new(b'\n', Some(b"\r\n"))
    }
}

impl Decoder for LinesCodec {
    type Item = Vec<u8>;
    type Error = SerialPortError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let read_to = src.len();

        let look_at = &src[self.cursor..read_to];

        if let Some(position) = look_at.iter().position(|&byte| byte == self.read_delimiter) {
            // Since we might "start late" in the buffer (from the cursor),
            // the "global" position within the buffer has to be calculated.
            let actual_position = self.cursor + position;

            // Next time we need to start over.
            self.cursor = 0;

            // Split at the delimiter, getting a slice of the bytes before it.
            let line = src.split_to(actual_position);

            // Discard the newline by advancing the source buffer beyond it.
            src.advance(1);

            Ok(Some(line[..].to_vec()))
        } else if read_to >= self.max_line_length {
            self.cursor = 0;

            Ok(Some(src.split_to(self.max_line_length)[..].to_vec()))
        } else {
            // We did not find a full frame.
            // The next time we are called the same buffer `src` will be provided to us (same starting point),
            // but possibly with more data.
            // Since our job is to find the delimiter, we don't need to re-read the bytes we have already looked at.
            self.cursor = read_to;

            // Indicate that we need more bytes to look at.
            Ok(None)
        }
    }
}

impl Encoder<&[u8]> for LinesCodec {
    type Error = SerialPortError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item);

        if let Some(terminator) = self.write_terminator {
            dst.extend_from_slice(terminator);
        }
        Ok(())
    }
}

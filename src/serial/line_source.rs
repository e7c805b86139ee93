use std::{
    io::ErrorKind,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::trace;

use super::{codecs::lines::LinesCodec, decode_line, error::SerialPortError, Connection};

/// What a single [`LineSource::read_line`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete line, without its line ending.
    Line(String),

    /// No complete line arrived in time.
    /// Not an error, the caller should just ask again.
    Timeout,
}

/// Reads newline terminated lines from a [`Connection`].
///
/// Bytes of a line which is not complete yet are kept until the rest arrives.
#[derive(Debug)]
pub struct LineSource {
    connection: Arc<Connection>,
    codec: LinesCodec,
    buffer: BytesMut,
    timeout: Duration,
}

impl LineSource {
    /// Create a line source.
    /// The `timeout` should match the read timeout the port was opened with.
    pub fn new(connection: Arc<Connection>, timeout: Duration) -> Self {
        Self {
            connection,
            codec: LinesCodec::default(),
            buffer: BytesMut::with_capacity(1024),
            timeout,
        }
    }

    /// Wait for the next line.
    ///
    /// Gives up with [`ReadOutcome::Timeout`] when no complete line showed up
    /// within roughly the timeout.
    pub fn read_line(&mut self) -> Result<ReadOutcome, SerialPortError> {
        let deadline = Instant::now() + self.timeout;
        let mut chunk = [0u8; 1024];

        loop {
            if let Some(line) = self.codec.decode(&mut self.buffer)? {
                return Ok(ReadOutcome::Line(decode_line(line)));
            }

            if Instant::now() >= deadline {
                return Ok(ReadOutcome::Timeout);
            }

            match self.connection.read(&mut chunk) {
                Ok(0) => return Err(SerialPortError::Disconnected),
                Ok(read) => {
                    trace!("Read {read} byte(s)");
                    self.buffer.extend_from_slice(&chunk[..read]);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    return Ok(ReadOutcome::Timeout)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

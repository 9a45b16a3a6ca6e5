//! Byte sink for the mixed PCM stream

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::OutputError;

/// Writes whole frames to an async writer, flushing after each one so the
/// downstream encoder sees a steady stream.
pub struct FrameSink<W> {
    writer: W,
    frames_written: u64,
    bytes_written: u64,
}

impl FrameSink<tokio::io::Stdout> {
    /// Sink writing to standard output
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin> FrameSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            frames_written: 0,
            bytes_written: 0,
        }
    }

    /// Write one complete frame and flush
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), OutputError> {
        self.writer.write_all(frame).await?;
        self.writer.flush().await?;
        self.frames_written += 1;
        self.bytes_written += frame.len() as u64;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_appended_in_order() {
        let mut sink = FrameSink::new(Vec::new());
        sink.write_frame(&[1, 2]).await.unwrap();
        sink.write_frame(&[3, 4]).await.unwrap();

        assert_eq!(sink.frames_written(), 2);
        assert_eq!(sink.bytes_written(), 4);
        assert_eq!(sink.into_inner(), vec![1, 2, 3, 4]);
    }
}

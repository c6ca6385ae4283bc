//! Newline-delimited JSON framing: incomplete trailing data is buffered
//! until the next `\n`; oversized frames are a protocol error. Shared
//! between `ControlServer` (this crate) and `SwitchboardClient` (the
//! `switchboard-client` crate) so both sides tolerate the same segment
//! splits.

use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("frame exceeds {0} bytes")]
    FrameTooLarge(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Buffers partial reads and yields one `\n`-terminated line at a time.
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
    max_bytes: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R, max_bytes: usize) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            max_bytes,
        }
    }

    /// Read the next complete line (without the trailing `\n`). Returns
    /// `Ok(None)` on clean EOF with no partial data pending.
    pub async fn read_line(&mut self) -> Result<Option<String>, FramingError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop(); // drop the '\n'
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                let text = String::from_utf8_lossy(&line).into_owned();
                return Ok(Some(text));
            }

            if self.buf.len() > self.max_bytes {
                return Err(FramingError::FrameTooLarge(self.max_bytes));
            }

            let mut chunk = [0u8; 4096];
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                // Partial line with no trailing newline before EOF: surface
                // whatever was buffered as the final frame, mirroring how a
                // line-oriented reader drains a half-closed socket.
                let text = String::from_utf8_lossy(&self.buf).into_owned();
                self.buf.clear();
                return Ok(Some(text));
            }
            if self.buf.len() + n > self.max_bytes * 2 {
                return Err(FramingError::FrameTooLarge(self.max_bytes));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn reads_single_line() {
        let mut r = LineReader::new(Cursor::new(b"hello\n".to_vec()), 1024);
        assert_eq!(r.read_line().await.unwrap(), Some("hello".to_string()));
        assert_eq!(r.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reads_multiple_lines_from_one_chunk() {
        let mut r = LineReader::new(Cursor::new(b"a\nb\nc\n".to_vec()), 1024);
        assert_eq!(r.read_line().await.unwrap(), Some("a".to_string()));
        assert_eq!(r.read_line().await.unwrap(), Some("b".to_string()));
        assert_eq!(r.read_line().await.unwrap(), Some("c".to_string()));
        assert_eq!(r.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn strips_trailing_cr() {
        let mut r = LineReader::new(Cursor::new(b"hi\r\n".to_vec()), 1024);
        assert_eq!(r.read_line().await.unwrap(), Some("hi".to_string()));
    }

    #[tokio::test]
    async fn oversized_frame_is_an_error() {
        let data = vec![b'x'; 200];
        let mut r = LineReader::new(Cursor::new(data), 64);
        let err = r.read_line().await.unwrap_err();
        assert!(matches!(err, FramingError::FrameTooLarge(64)));
    }

    /// A reader that trickles bytes one at a time, to prove the line
    /// boundary is identical regardless of how the underlying transport
    /// chunked the stream.
    struct OneByteAtATime(Cursor<Vec<u8>>);

    impl AsyncRead for OneByteAtATime {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            let mut one = [0u8; 1];
            let mut tiny = tokio::io::ReadBuf::new(&mut one);
            match std::pin::Pin::new(&mut self.0).poll_read(cx, &mut tiny) {
                std::task::Poll::Ready(Ok(())) => {
                    let filled = tiny.filled();
                    if !filled.is_empty() {
                        buf.put_slice(filled);
                    }
                    std::task::Poll::Ready(Ok(()))
                }
                other => other,
            }
        }
    }

    #[tokio::test]
    async fn split_across_arbitrary_segment_boundaries_yields_same_messages() {
        let mut r = LineReader::new(OneByteAtATime(Cursor::new(b"one\ntwo\n".to_vec())), 1024);
        assert_eq!(r.read_line().await.unwrap(), Some("one".to_string()));
        assert_eq!(r.read_line().await.unwrap(), Some("two".to_string()));
        assert_eq!(r.read_line().await.unwrap(), None);
    }
}

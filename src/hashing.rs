//! A stream transformer that forwards every byte unchanged while maintaining
//! a running sha-256 digest (component B). Composable inside larger
//! pipelines: `source -> HashingWriter -> optional compressor -> sink`.

use std::pin::Pin;
use std::task::{Context, Poll};

use sha2::{Digest, Sha256};
use tokio::io::{self, AsyncWrite};

/// Wraps an [`AsyncWrite`] sink, hashing every byte as it passes through.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: AsyncWrite + Unpin> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    /// The hex-encoded digest of everything written so far. Only meaningful
    /// once the stream has been fully written and flushed.
    pub fn hex_digest(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for HashingWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(written)) => {
                this.hasher.update(&buf[..written]);
                Poll::Ready(Ok(written))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Hash a complete in-memory buffer, for cases (the `.dat` upload, test
/// fixtures) where the bytes are already assembled.
pub fn hex_digest_of(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn hashing_writer_forwards_bytes_and_hashes() {
        let mut sink = Vec::new();
        {
            let mut writer = HashingWriter::new(&mut sink);
            writer.write_all(b"hello world").await.unwrap();
            writer.flush().await.unwrap();
            assert_eq!(writer.hex_digest(), hex_digest_of(b"hello world"));
        }
        assert_eq!(sink, b"hello world");
    }
}

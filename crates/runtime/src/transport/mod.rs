//! Async halves for the device-side frame protocol.
//!
//! Frames are a 4-byte big-endian length followed by that many bytes of
//! UTF-16LE text. [`FrameReader`] reassembles frames across arbitrary read
//! boundaries; [`FrameWriter`] encodes and flushes one frame per message.

use devbridge_protocol::{FrameDecoder, encode_frame};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

const READ_CHUNK: usize = 16 * 1024;

/// Reads decoded text messages from a device stream.
pub struct FrameReader<R> {
	inner: R,
	decoder: FrameDecoder,
	buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
	pub fn new(inner: R) -> Self {
		Self {
			inner,
			decoder: FrameDecoder::new(),
			buf: vec![0; READ_CHUNK],
		}
	}

	/// Returns the next message, or `None` on a clean end of stream.
	///
	/// EOF with a partial frame buffered is [`Error::TruncatedFrame`].
	pub async fn next_text(&mut self) -> Result<Option<String>> {
		loop {
			if let Some(payload) = self.decoder.next_payload()? {
				return Ok(Some(devbridge_protocol::decode_payload(&payload)?));
			}
			let n = self.inner.read(&mut self.buf).await?;
			if n == 0 {
				if self.decoder.is_idle() {
					return Ok(None);
				}
				return Err(Error::TruncatedFrame {
					buffered: self.decoder.buffered(),
				});
			}
			self.decoder.extend(&self.buf[..n]);
		}
	}
}

/// Writes text messages to a device stream.
pub struct FrameWriter<W> {
	inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
	pub fn new(inner: W) -> Self {
		Self { inner }
	}

	pub async fn send_text(&mut self, text: &str) -> Result<()> {
		let frame = encode_frame(text)?;
		self.inner.write_all(&frame).await?;
		self.inner.flush().await?;
		Ok(())
	}

	/// Shuts the write side down.
	pub async fn close(&mut self) -> Result<()> {
		self.inner.shutdown().await?;
		Ok(())
	}
}

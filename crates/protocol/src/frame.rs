//! Device-side frame codec.
//!
//! Each message on the device inspector socket is a 4-byte big-endian length
//! followed by that many bytes of UTF-16LE text:
//!
//! ```text
//! [len: u32 BE][payload: len bytes, UTF-16LE]
//! ```
//!
//! A single socket read may carry less than one frame, or the tail of one
//! frame and the head of the next. [`FrameDecoder`] buffers across reads and
//! only yields a payload once every byte of it has arrived.

use thiserror::Error;

/// Upper bound on a single frame payload.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Malformed-frame conditions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
	#[error("frame length {0} exceeds the {MAX_FRAME_LEN} byte limit")]
	TooLarge(usize),

	#[error("frame length {0} is odd; UTF-16LE payloads have an even byte count")]
	OddLength(usize),

	#[error("frame payload is not valid UTF-16LE")]
	InvalidUtf16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
	AwaitingLength,
	Accumulating(usize),
}

/// Incremental decoder for the device-side framing.
#[derive(Debug)]
pub struct FrameDecoder {
	buf: Vec<u8>,
	state: DecodeState,
}

impl Default for FrameDecoder {
	fn default() -> Self {
		Self::new()
	}
}

impl FrameDecoder {
	pub fn new() -> Self {
		Self {
			buf: Vec::new(),
			state: DecodeState::AwaitingLength,
		}
	}

	/// Appends bytes from one read without decoding.
	pub fn extend(&mut self, bytes: &[u8]) {
		self.buf.extend_from_slice(bytes);
	}

	/// Pops the next complete raw payload, if the buffer holds one.
	pub fn next_payload(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
		loop {
			match self.state {
				DecodeState::AwaitingLength => {
					if self.buf.len() < HEADER_LEN {
						return Ok(None);
					}
					let mut header = [0u8; HEADER_LEN];
					header.copy_from_slice(&self.buf[..HEADER_LEN]);
					let len = u32::from_be_bytes(header) as usize;
					if len > MAX_FRAME_LEN {
						return Err(FrameError::TooLarge(len));
					}
					if len % 2 != 0 {
						return Err(FrameError::OddLength(len));
					}
					self.buf.drain(..HEADER_LEN);
					self.state = DecodeState::Accumulating(len);
				}
				DecodeState::Accumulating(len) => {
					if self.buf.len() < len {
						return Ok(None);
					}
					let payload: Vec<u8> = self.buf.drain(..len).collect();
					self.state = DecodeState::AwaitingLength;
					return Ok(Some(payload));
				}
			}
		}
	}

	/// Feeds one read and returns every text frame it completed, in order.
	pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, FrameError> {
		self.extend(bytes);
		let mut frames = Vec::new();
		while let Some(payload) = self.next_payload()? {
			frames.push(decode_payload(&payload)?);
		}
		Ok(frames)
	}

	/// Bytes received but not yet emitted as part of a frame.
	pub fn buffered(&self) -> usize {
		self.buf.len()
	}

	/// Returns `true` when no partial frame is pending.
	pub fn is_idle(&self) -> bool {
		self.state == DecodeState::AwaitingLength && self.buf.is_empty()
	}
}

/// Decodes a UTF-16LE payload into text.
pub fn decode_payload(payload: &[u8]) -> Result<String, FrameError> {
	if payload.len() % 2 != 0 {
		return Err(FrameError::OddLength(payload.len()));
	}
	let units: Vec<u16> = payload
		.chunks_exact(2)
		.map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
		.collect();
	String::from_utf16(&units).map_err(|_| FrameError::InvalidUtf16)
}

/// Encodes one client text message as a single device frame.
pub fn encode_frame(text: &str) -> Result<Vec<u8>, FrameError> {
	let payload: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
	if payload.len() > MAX_FRAME_LEN {
		return Err(FrameError::TooLarge(payload.len()));
	}
	let len = payload.len() as u32;
	let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
	frame.extend_from_slice(&len.to_be_bytes());
	frame.extend_from_slice(&payload);
	Ok(frame)
}

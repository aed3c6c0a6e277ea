//! Wire types for the devbridge debug bridge.
//!
//! This crate holds the pieces of the bridge that are pure data: the session
//! key and option types shared by every layer, the device-side frame codec and
//! the names used by the on-device notification handshake. Nothing in here
//! performs I/O.
//!
//! # Main Types
//!
//! - [`SessionKey`] - identifies one debug session (device + app)
//! - [`DebugOptions`] / [`DebugResult`] - consumer-facing request and response
//! - [`FrameDecoder`] / [`encode_frame`] - device-side length-prefixed UTF-16LE framing
//! - [`Notification`] - handshake notification names

pub mod frame;
pub mod notification;
pub mod types;

pub use frame::{FrameDecoder, FrameError, MAX_FRAME_LEN, decode_payload, encode_frame};
pub use notification::Notification;
pub use types::{
	ConnectionType, DebugOptions, DebugResult, DiscoveredPort, Platform, PortForward, SessionKey,
};

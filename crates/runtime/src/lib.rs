//! devbridge runtime - device collaborators and byte transport
//!
//! This crate is the boundary between the debug bridge and the outside world:
//!
//! - **Devices**: the [`Device`] capability trait and its adb / libimobiledevice
//!   backed implementations, plus [`DeviceLocator`] for resolving identifiers
//! - **Notifications**: the [`NotificationCenter`] pub/sub trait used by the iOS
//!   attach handshake
//! - **Processes**: host command execution, detached spawning, pid liveness and
//!   local port probing
//! - **Transport**: async reader/writer halves speaking the device-side frame
//!   protocol over any `AsyncRead`/`AsyncWrite`
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │ devbridge-rs │  discovery, tunnels, handshake, bridge, orchestrator
//! └──────┬───────┘
//!        │ Device / NotificationCenter traits
//! ┌──────▼───────┐
//! │   runtime    │  This crate
//! │  ┌────────┐  │
//! │  │ Device │  │  adb, idevice* tools
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Trans  │  │  length-prefixed UTF-16LE frames
//! │  └────────┘  │
//! └──────────────┘
//! ```

pub mod device;
pub mod error;
pub mod notification;
pub mod process;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use device::{
	AdbDevice, Device, DeviceLocator, DeviceStatus, HostDevices, IosDevice, LogLines, RunningApp,
	ToolPaths,
};
pub use error::{Error, Result};
pub use notification::{LocalNotificationCenter, NotificationCallback, NotificationCenter, SubscriptionId};
pub use process::{CommandOutput, pid_is_alive, port_available};
pub use transport::{FrameReader, FrameWriter};

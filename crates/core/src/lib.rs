//! devbridge: attach debuggers to apps running on Android and iOS devices
//!
//! This crate connects a desktop debugger frontend to the JavaScript runtime
//! inside a mobile app. It finds the app's inspector port, tunnels it to a
//! local port, negotiates attachment where the platform requires it, and,
//! where the device speaks its own framing, relays messages through a local
//! WebSocket.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use devbridge::DebugService;
//! use devbridge_protocol::DebugOptions;
//! use devbridge_runtime::{HostDevices, ToolPaths};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let locator = Arc::new(HostDevices::new(ToolPaths::default()));
//!     let service = DebugService::builder(locator).build();
//!
//!     let result = service
//!         .start_debug("emulator-5554", "org.example.app", &DebugOptions::default())
//!         .await?;
//!     if let Some(url) = result.url {
//!         println!("open {url}");
//!     }
//!
//!     service.stop_debug("emulator-5554").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Components
//!
//! - [`tunnel`]: idempotent local port forwards with crash-safe cleanup registration
//! - [`discovery`]: per-platform strategies that locate the inspector port
//! - [`handshake`]: the iOS notification race that precedes attachment
//! - [`bridge`]: frame-to-WebSocket and raw Unix-socket relays
//! - [`service`]: the orchestrator tying them together per session

pub mod bridge;
pub mod cleanup;
pub mod config;
pub mod devtools;
pub mod discovery;
pub mod error;
pub mod handshake;
pub mod service;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tunnel;

pub use bridge::{BridgeEndpoint, BridgeEvent, BridgeHandle, DeviceEndpoint, RawSocketProxy, RetryPolicy, WebSocketBridge};
pub use cleanup::{CleanupCommand, CleanupRegistry, NoopCleanup};
pub use config::{DEFAULT_DEVTOOLS_COMMIT, DebugConfig};
pub use devtools::{ChromeDevTools, DevToolsUrlBuilder};
pub use discovery::{AndroidPortDiscovery, DiscoveryBudget, IosLogDiscovery, PortDiscoveryStrategy};
pub use error::{Error, ErrorCategory, Result};
pub use handshake::{AttachMode, AttachOutcome, HandshakeCoordinator, HandshakeTimeouts};
pub use service::{DebugService, DebugServiceBuilder};
pub use session::{SessionEvent, SessionState};
pub use tunnel::{AdbTunnel, PortProbe, TunnelBackend, TunnelManager, UsbmuxTunnel};

//! IO boundary for the rearshift daemon.
//!
//! Everything the daemon does to the device funnels through one sync
//! [`PrivilegedRunner`] trait (mock-injectable) wrapped by the async
//! [`Bridge`] facade. Free-form diagnostic dumps are parsed by pure
//! functions in [`stack`] and [`display`] so the parsers test without
//! a device.

pub mod bridge;
pub mod cache;
pub mod connection;
pub mod display;
pub mod error;
pub mod runner;
pub mod stack;

pub use bridge::{Bridge, BridgeConfig, RecordingSession};
pub use cache::DisplayCache;
pub use connection::BridgeHandle;
pub use display::{DisplayMetadata, Insets};
pub use error::BridgeError;
pub use runner::{PrivilegedRunner, ShellBroker};

//! Pure core for the rearshift daemon: value types, the overlay
//! arbitration state machine, the proximity debouncer, and settings.
//!
//! No tokio, no subprocess, no sockets. Time enters as explicit
//! `now_ms` parameters so every state machine tests deterministically.

pub mod animation;
pub mod proximity;
pub mod settings;
pub mod types;

pub use animation::{AnimationArbiter, EndDisposition};
pub use proximity::ProximityDebouncer;
pub use settings::Settings;
pub use types::{
    AnimationKind, ConnectionState, MigrationOutcome, TaskRef, PRIMARY_DISPLAY, REAR_DISPLAY,
};

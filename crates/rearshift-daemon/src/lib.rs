//! The rearshift daemon: orchestration loops, control socket, CLI glue.

pub mod client;
pub mod keeper;
pub mod migration;
pub mod orchestrator;
pub mod overlay;
pub mod server;
pub mod supervisor;

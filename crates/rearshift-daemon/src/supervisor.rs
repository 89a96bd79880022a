//! Reconnect supervisor for the privileged channel.
//!
//! Binding is attempted at a fixed interval, forever; the device may
//! grant the privileged broker minutes after boot, so giving up is
//! never correct. Bind failures are logged at debug and otherwise
//! silent. Once bound, the supervisor parks until the handle reports
//! the channel dead, then starts over.

use rearshift_bridge::{Bridge, BridgeConfig, BridgeError, BridgeHandle, ShellBroker};
use rearshift_core::{ConnectionState, Settings};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fixed delay between bind attempts.
pub const BIND_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Produces a live bridge, or fails. Sync so mocks stay trivial; the
/// supervisor crosses via spawn_blocking like every runner call.
pub trait BridgeBinder: Send + Sync {
    fn bind(&self) -> Result<Bridge, BridgeError>;
}

/// Real binder: builds a shell broker and probes it with a harmless
/// command before handing the bridge out.
pub struct ShellBinder {
    config: BridgeConfig,
    elevation_prefix: String,
}

impl ShellBinder {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            config: BridgeConfig {
                rear_home_package: settings.rear_home_package.clone(),
                rear_home_component: settings.rear_home_component.clone(),
                snapshot_dir: settings.snapshot_dir.clone(),
                recording_dir: settings.recording_dir.clone(),
            },
            elevation_prefix: settings.elevation_prefix.clone(),
        }
    }
}

impl BridgeBinder for ShellBinder {
    fn bind(&self) -> Result<Bridge, BridgeError> {
        let broker = ShellBroker::new().with_elevation_prefix(self.elevation_prefix.clone());
        use rearshift_bridge::PrivilegedRunner;
        // The probe proves both that the shell spawns and that the
        // elevation prefix actually works.
        let out = broker.run_for_output("id")?;
        tracing::debug!(identity = %out.trim(), "broker probe ok");
        Ok(Bridge::new(Arc::new(broker), self.config.clone()))
    }
}

pub struct ReconnectSupervisor {
    binder: Arc<dyn BridgeBinder>,
    handle: BridgeHandle,
    retry_interval: Duration,
    cancel: CancellationToken,
}

impl ReconnectSupervisor {
    pub fn new(binder: Arc<dyn BridgeBinder>, handle: BridgeHandle, cancel: CancellationToken) -> Self {
        Self {
            binder,
            handle,
            retry_interval: BIND_RETRY_INTERVAL,
            cancel,
        }
    }

    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub async fn run(self) {
        loop {
            // Bind phase: retry at the fixed interval until success.
            loop {
                if self.cancel.is_cancelled() {
                    return;
                }
                self.handle.set_binding();
                let binder = Arc::clone(&self.binder);
                let bound = tokio::task::spawn_blocking(move || binder.bind()).await;
                match bound {
                    Ok(Ok(bridge)) => {
                        self.handle.publish(bridge).await;
                        break;
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(error = %e, "bind attempt failed");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "bind task panicked");
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.retry_interval) => {}
                    _ = self.cancel.cancelled() => return,
                }
            }

            // Bound phase: park until the channel dies.
            let mut state_rx = self.handle.subscribe();
            loop {
                if *state_rx.borrow_and_update() == ConnectionState::Dead {
                    tracing::info!("channel dead, resuming bind attempts");
                    break;
                }
                tokio::select! {
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = self.cancel.cancelled() => return,
                }
            }
        }
    }
}

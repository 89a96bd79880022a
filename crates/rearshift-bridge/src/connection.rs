//! Shared handle to the privileged channel lifecycle.
//!
//! The supervisor writes (publish / mark dead), everything else reads.
//! State transitions go out over a watch channel so observers park on
//! `changed()` instead of registering callbacks.

use crate::bridge::Bridge;
use rearshift_core::ConnectionState;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

#[derive(Clone)]
pub struct BridgeHandle {
    bridge: Arc<RwLock<Option<Bridge>>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl BridgeHandle {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Unbound);
        Self {
            bridge: Arc::new(RwLock::new(None)),
            state_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions. The receiver starts at the current state.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// The live bridge, or `None` while unbound/binding/dead. Callers
    /// treat `None` as "channel unavailable, retry later".
    pub async fn current(&self) -> Option<Bridge> {
        self.bridge.read().await.clone()
    }

    /// Supervisor: a bind attempt is starting.
    pub fn set_binding(&self) {
        self.state_tx.send_replace(ConnectionState::Binding);
    }

    /// Supervisor: a bind succeeded.
    pub async fn publish(&self, bridge: Bridge) {
        *self.bridge.write().await = Some(bridge);
        self.state_tx.send_replace(ConnectionState::Bound);
        tracing::info!("privileged channel bound");
    }

    /// Any caller: the channel broke mid-use. Drops the bridge and
    /// wakes the supervisor.
    pub async fn mark_dead(&self) {
        *self.bridge.write().await = None;
        let prev = self.state_tx.send_replace(ConnectionState::Dead);
        if prev != ConnectionState::Dead {
            tracing::warn!(?prev, "privileged channel lost");
        }
    }
}

impl Default for BridgeHandle {
    fn default() -> Self {
        Self::new()
    }
}

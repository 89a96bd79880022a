//! Central event loop. Owns the monitored-session slot, the overlay
//! controller, and the keeper handle; every mutation of that state
//! happens on this single task.
//!
//! Requests arrive over an mpsc channel (from the control server, the
//! CLI, or self-scheduled timers) and are answered through an optional
//! oneshot. A read-only status snapshot is mirrored into shared state
//! for the server, the same split the control API expects.

use crate::keeper::{KeeperCommand, KeeperEvent, KeeperHandle, KeeperLoop};
use crate::migration::MigrationPipeline;
use crate::overlay::{FinishAction, OverlayController, OverlaySignal, StartDecision};
use rearshift_bridge::{BridgeHandle, DisplayCache, DisplayMetadata, RecordingSession};
use rearshift_core::{
    AnimationKind, ConnectionState, MigrationOutcome, Settings, TaskRef, REAR_DISPLAY,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Delay before re-verifying session placement after a rotation change;
/// the window manager occasionally bounces the task off the display.
const ROTATION_SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    SwitchCurrentToRear,
    SwitchPackageToRear { package: String },
    ReturnToPrimary,
    TakeScreenshot,
    StartRecording,
    StopRecording,
    SetRearDpi { dpi: u32 },
    ResetRearDpi,
    GetRearDpi,
    SetRearRotation { rotation: u32 },
    GetDisplayInfo,
    RefreshDisplayInfo,
    ShowCharging { level: u8 },
    PowerDisconnected,
    ShowNotification { title: String },
    DismissNotification,
    OverlayFinished { kind: AnimationKind },
    ProximityEvent { covered: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RequestOutcome {
    Migration(MigrationOutcome),
    Done { ok: bool },
    Dpi { dpi: Option<u32> },
    Display { metadata: DisplayMetadata },
    Snapshot { path: String },
    Recording { path: String },
    Error { message: String },
}

pub struct RequestEnvelope {
    pub request: Request,
    pub reply: Option<oneshot::Sender<RequestOutcome>>,
}

impl RequestEnvelope {
    pub fn fire_and_forget(request: Request) -> Self {
        Self {
            request,
            reply: None,
        }
    }
}

/// Read-only snapshot for the control server's `status` method.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub connection: ConnectionState,
    pub monitored: Option<TaskRef>,
    pub overlay: Option<AnimationKind>,
    pub keeper_active: bool,
    pub recording: bool,
}

pub type SharedStatus = Arc<RwLock<DaemonStatus>>;

pub struct Orchestrator {
    requests: mpsc::Receiver<RequestEnvelope>,
    requests_tx: mpsc::Sender<RequestEnvelope>,
    handle: BridgeHandle,
    settings: Arc<Settings>,
    pipeline: MigrationPipeline,
    display_cache: DisplayCache,
    overlay: OverlayController,
    status: SharedStatus,
    monitored: Option<TaskRef>,
    keeper: Option<KeeperHandle>,
    keeper_events_tx: mpsc::Sender<KeeperEvent>,
    keeper_events: mpsc::Receiver<KeeperEvent>,
    last_charging_level: u8,
    recording: Option<RecordingSession>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        handle: BridgeHandle,
        settings: Arc<Settings>,
        signals: broadcast::Sender<OverlaySignal>,
        status: SharedStatus,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Sender<RequestEnvelope>) {
        let (requests_tx, requests) = mpsc::channel(64);
        let (keeper_events_tx, keeper_events) = mpsc::channel(16);
        let pipeline = MigrationPipeline::new(handle.clone(), Arc::clone(&settings));
        let orchestrator = Self {
            requests,
            requests_tx: requests_tx.clone(),
            handle,
            settings,
            pipeline,
            display_cache: DisplayCache::new(),
            overlay: OverlayController::new(signals),
            status,
            monitored: None,
            keeper: None,
            keeper_events_tx,
            keeper_events,
            last_charging_level: 0,
            recording: None,
            cancel,
        };
        (orchestrator, requests_tx)
    }

    pub async fn run(mut self) {
        tracing::info!("orchestrator started");
        loop {
            self.sync_status().await;
            tokio::select! {
                envelope = self.requests.recv() => {
                    let Some(envelope) = envelope else { break };
                    let outcome = self.handle_request(envelope.request).await;
                    if let Some(reply) = envelope.reply {
                        let _ = reply.send(outcome);
                    }
                }
                event = self.keeper_events.recv() => {
                    if let Some(event) = event {
                        self.handle_keeper_event(event);
                    }
                }
                _ = self.cancel.cancelled() => break,
            }
        }
        if let Some(keeper) = self.keeper.take() {
            keeper.abort();
        }
        // An abandoned recorder would run until the display sleeps.
        if let Some(session) = self.recording.take() {
            if let Some(bridge) = self.handle.current().await {
                if let Err(e) = bridge.stop_display_recording(&session).await {
                    tracing::warn!(error = %e, "failed to stop recorder on shutdown");
                }
            }
        }
        tracing::info!("orchestrator stopped");
    }

    async fn handle_request(&mut self, request: Request) -> RequestOutcome {
        tracing::debug!(?request, "handling request");
        match request {
            Request::SwitchCurrentToRear => {
                let outcome = self.pipeline.switch_to_rear(self.monitored.as_ref()).await;
                self.adopt_migration(&outcome);
                RequestOutcome::Migration(outcome)
            }
            Request::SwitchPackageToRear { package } => {
                let outcome = self
                    .pipeline
                    .switch_package_to_rear(&package, self.monitored.as_ref())
                    .await;
                self.adopt_migration(&outcome);
                RequestOutcome::Migration(outcome)
            }
            Request::ReturnToPrimary => {
                let Some(task) = self.monitored.clone() else {
                    return RequestOutcome::Error {
                        message: "no migrated session to return".to_string(),
                    };
                };
                if let Some(keeper) = self.keeper.take() {
                    keeper.abort();
                }
                RequestOutcome::Migration(self.pipeline.return_to_primary(&task).await)
            }
            Request::TakeScreenshot => match self.handle.current().await {
                Some(bridge) => match bridge.take_display_snapshot().await {
                    Ok(path) => RequestOutcome::Snapshot { path },
                    Err(e) => RequestOutcome::Error {
                        message: e.to_string(),
                    },
                },
                None => RequestOutcome::Error {
                    message: "privileged channel unavailable".to_string(),
                },
            },
            Request::StartRecording => {
                if self.recording.is_some() {
                    return RequestOutcome::Error {
                        message: "recording already in progress".to_string(),
                    };
                }
                match self.handle.current().await {
                    Some(bridge) => match bridge.start_display_recording().await {
                        Ok(session) => {
                            let path = session.file.clone();
                            self.recording = Some(session);
                            RequestOutcome::Recording { path }
                        }
                        Err(e) => RequestOutcome::Error {
                            message: e.to_string(),
                        },
                    },
                    None => RequestOutcome::Error {
                        message: "privileged channel unavailable".to_string(),
                    },
                }
            }
            Request::StopRecording => {
                let Some(session) = self.recording.take() else {
                    return RequestOutcome::Error {
                        message: "no recording in progress".to_string(),
                    };
                };
                match self.handle.current().await {
                    Some(bridge) => match bridge.stop_display_recording(&session).await {
                        Ok(path) => RequestOutcome::Recording { path },
                        Err(e) => RequestOutcome::Error {
                            message: e.to_string(),
                        },
                    },
                    None => RequestOutcome::Error {
                        message: "privileged channel unavailable".to_string(),
                    },
                }
            }
            Request::SetRearDpi { dpi } => self.simple_bridge_op(|b| async move {
                b.set_display_dpi(REAR_DISPLAY, dpi).await
            })
            .await,
            Request::ResetRearDpi => self.simple_bridge_op(|b| async move {
                b.reset_display_dpi(REAR_DISPLAY).await
            })
            .await,
            Request::GetRearDpi => match self.handle.current().await {
                Some(bridge) => match bridge.get_display_dpi(REAR_DISPLAY).await {
                    Ok(dpi) => RequestOutcome::Dpi { dpi },
                    Err(e) => RequestOutcome::Error {
                        message: e.to_string(),
                    },
                },
                None => RequestOutcome::Error {
                    message: "privileged channel unavailable".to_string(),
                },
            },
            Request::SetRearRotation { rotation } => self.set_rotation(rotation).await,
            Request::GetDisplayInfo => RequestOutcome::Display {
                metadata: self.display_cache.get(&self.handle).await,
            },
            Request::RefreshDisplayInfo => RequestOutcome::Display {
                metadata: self.display_cache.refresh(&self.handle).await,
            },
            Request::ShowCharging { level } => {
                self.last_charging_level = level;
                let always_on = self.settings.charging_always_on;
                match self.overlay.begin_charging(Instant::now(), always_on) {
                    StartDecision::Ignored => RequestOutcome::Done { ok: false },
                    StartDecision::Start => {
                        self.place_overlay(AnimationKind::Charging, level, None).await
                    }
                }
            }
            Request::PowerDisconnected => {
                self.overlay.power_disconnected();
                self.finish_overlay(AnimationKind::Charging).await
            }
            Request::ShowNotification { title } => {
                match self.overlay.begin_notification() {
                    StartDecision::Ignored => RequestOutcome::Done { ok: false },
                    StartDecision::Start => {
                        self.schedule_auto_dismiss();
                        self.place_overlay(AnimationKind::Notification, 0, Some(&title))
                            .await
                    }
                }
            }
            Request::DismissNotification => {
                self.finish_overlay(AnimationKind::Notification).await
            }
            Request::OverlayFinished { kind } => self.finish_overlay(kind).await,
            Request::ProximityEvent { covered } => {
                if let Some(keeper) = &self.keeper {
                    keeper.proximity_event(covered).await;
                }
                RequestOutcome::Done { ok: true }
            }
        }
    }

    // ─── Migration bookkeeping ───

    fn adopt_migration(&mut self, outcome: &MigrationOutcome) {
        if let MigrationOutcome::Moved { task } = outcome {
            if let Some(old) = self.keeper.take() {
                old.abort();
            }
            self.monitored = Some(task.clone());
            self.keeper = Some(KeeperLoop::spawn(
                self.handle.clone(),
                Arc::clone(&self.settings),
                task.clone(),
                self.keeper_events_tx.clone(),
            ));
        }
    }

    fn handle_keeper_event(&mut self, event: KeeperEvent) {
        match event {
            KeeperEvent::Departed { occupant } => {
                tracing::info!(?occupant, "monitored session left the rear display");
                self.keeper = None;
            }
            KeeperEvent::PulledBack => {
                tracing::info!("session pulled back to primary display");
                self.keeper = None;
            }
            KeeperEvent::Stopped => {
                // Deliberate stop; the slot owner already moved on.
            }
        }
    }

    // ─── Overlay placement and teardown ───

    async fn place_overlay(
        &mut self,
        kind: AnimationKind,
        level: u8,
        title: Option<&str>,
    ) -> RequestOutcome {
        // A monitored session under the overlay must be restored after;
        // pause its keeper so the overlay is not flagged as a departure.
        if let Some(keeper) = &self.keeper {
            keeper.send(KeeperCommand::Pause).await;
            self.overlay.set_restore_on_exit(true);
        }

        let (component, launch) = self.overlay_launch(kind, level, title);
        let outcome = self
            .pipeline
            .place_overlay(&launch, &component, self.monitored.as_ref())
            .await;

        match outcome {
            MigrationOutcome::Moved { .. } => RequestOutcome::Done { ok: true },
            other => {
                tracing::warn!(?other, %kind, "overlay placement failed, releasing claim");
                // Release the slot; the released claim may still owe a
                // follow-up (an always-on charging overlay this surface
                // had preempted).
                match self.overlay.finish(kind) {
                    FinishAction::ResumeCharging => {
                        self.overlay.resume_charging();
                        let level = self.last_charging_level;
                        Box::pin(self.place_overlay(AnimationKind::Charging, level, None)).await;
                    }
                    FinishAction::RestoreHome => {
                        if let Some(bridge) = self.handle.current().await {
                            if let Err(e) = bridge.restore_rear_home().await {
                                tracing::debug!(error = %e, "rear home restore failed");
                            }
                        }
                    }
                    FinishAction::Restore | FinishAction::Stale => {
                        // The session never actually left the rear
                        // display; just wake its keeper back up.
                        if let Some(keeper) = &self.keeper {
                            keeper.send(KeeperCommand::Resume).await;
                        }
                    }
                }
                RequestOutcome::Done { ok: false }
            }
        }
    }

    fn overlay_launch(
        &self,
        kind: AnimationKind,
        level: u8,
        title: Option<&str>,
    ) -> (String, String) {
        match kind {
            AnimationKind::Charging => {
                let component = self.settings.charging_component.clone();
                let always_on = self.settings.charging_always_on;
                let launch = format!(
                    "am start -n {component} --ei battery_level {level} --ez always_on {always_on}"
                );
                (component, launch)
            }
            AnimationKind::Notification => {
                let component = self.settings.notification_component.clone();
                let mut launch = format!("am start -n {component}");
                if let Some(title) = title {
                    // The whole payload runs through `sh -c`; keep the
                    // title inside single quotes.
                    let escaped = title.replace('\'', r"'\''");
                    launch.push_str(&format!(" --es title '{escaped}'"));
                }
                (component, launch)
            }
        }
    }

    async fn finish_overlay(&mut self, kind: AnimationKind) -> RequestOutcome {
        match self.overlay.finish(kind) {
            FinishAction::Stale => {
                tracing::debug!(%kind, "stale overlay finish ignored");
                RequestOutcome::Done { ok: false }
            }
            FinishAction::Restore => {
                self.restore_monitored().await;
                if let Some(keeper) = &self.keeper {
                    keeper.send(KeeperCommand::Resume).await;
                }
                RequestOutcome::Done { ok: true }
            }
            FinishAction::ResumeCharging => {
                self.overlay.resume_charging();
                let level = self.last_charging_level;
                self.place_overlay(AnimationKind::Charging, level, None).await
            }
            FinishAction::RestoreHome => {
                if let Some(bridge) = self.handle.current().await {
                    if let Err(e) = bridge.restore_rear_home().await {
                        tracing::warn!(error = %e, "rear home restore failed");
                    }
                }
                RequestOutcome::Done { ok: true }
            }
        }
    }

    /// Put the monitored session back in front on the rear display,
    /// verifying the move actually took.
    async fn restore_monitored(&self) {
        let (Some(task), Some(bridge)) = (self.monitored.as_ref(), self.handle.current().await)
        else {
            return;
        };
        if let Err(e) = bridge.suppress_rear_home().await {
            tracing::debug!(error = %e, "rear home suppression failed");
        }
        if let Err(e) = bridge
            .move_session_to_display(task.task_id, REAR_DISPLAY)
            .await
        {
            tracing::warn!(error = %e, "restore move failed");
            self.handle.mark_dead().await;
            return;
        }
        match bridge.is_session_on_display(task.task_id, REAR_DISPLAY).await {
            Ok(true) => tracing::info!(task = %task, "session restored to rear display"),
            Ok(false) => tracing::warn!(task = %task, "session did not land on rear display"),
            Err(e) => tracing::warn!(error = %e, "restore verification failed"),
        }
    }

    // ─── Display property ops ───

    async fn set_rotation(&mut self, rotation: u32) -> RequestOutcome {
        let Some(bridge) = self.handle.current().await else {
            return RequestOutcome::Error {
                message: "privileged channel unavailable".to_string(),
            };
        };
        let ok = match bridge.set_display_rotation(REAR_DISPLAY, rotation).await {
            Ok(ok) => ok,
            Err(e) => {
                return RequestOutcome::Error {
                    message: e.to_string(),
                }
            }
        };

        // Rotation sometimes kicks the migrated session off the rear
        // display; check and put it back.
        if let Some(task) = self.monitored.clone() {
            tokio::time::sleep(ROTATION_SETTLE).await;
            match bridge.is_session_on_display(task.task_id, REAR_DISPLAY).await {
                Ok(false) => {
                    tracing::info!(task = %task, "rotation displaced session, re-moving");
                    if let Err(e) = bridge
                        .move_session_to_display(task.task_id, REAR_DISPLAY)
                        .await
                    {
                        tracing::warn!(error = %e, "re-move after rotation failed");
                    }
                }
                Ok(true) => {}
                Err(e) => tracing::warn!(error = %e, "post-rotation check failed"),
            }
        }
        RequestOutcome::Done { ok }
    }

    async fn simple_bridge_op<F, Fut>(&self, op: F) -> RequestOutcome
    where
        F: FnOnce(rearshift_bridge::Bridge) -> Fut,
        Fut: std::future::Future<Output = Result<bool, rearshift_bridge::BridgeError>>,
    {
        match self.handle.current().await {
            Some(bridge) => match op(bridge).await {
                Ok(ok) => RequestOutcome::Done { ok },
                Err(e) => RequestOutcome::Error {
                    message: e.to_string(),
                },
            },
            None => RequestOutcome::Error {
                message: "privileged channel unavailable".to_string(),
            },
        }
    }

    fn schedule_auto_dismiss(&self) {
        let delay = Duration::from_secs(self.settings.notification_auto_dismiss_secs);
        if delay.is_zero() {
            return;
        }
        let tx = self.requests_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Stale by then if the user dismissed it or something else
            // took the slot; the finish path shrugs that off.
            let _ = tx
                .send(RequestEnvelope::fire_and_forget(
                    Request::DismissNotification,
                ))
                .await;
        });
    }

    async fn sync_status(&self) {
        let mut status = self.status.write().await;
        status.connection = self.handle.state();
        status.monitored = self.monitored.clone();
        status.overlay = self.overlay.active();
        status.keeper_active = self.keeper.is_some();
        status.recording = self.recording.is_some();
    }
}

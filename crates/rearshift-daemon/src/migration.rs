//! Task migration pipeline: gets a session onto the rear display.
//!
//! Two paths share the conflict check and rear-home suppression:
//!   - direct switch: the session is already running, its task id is
//!     known from the foreground query, one move call suffices;
//!   - overlay placement: the surface is launched invisibly on the
//!     primary display and the stack dump is polled until the OS
//!     assigns it a task id, then it is moved.
//!
//! Every outcome is data; the only hard failure is a broken channel,
//! which is reported to the handle so the supervisor rebinds.

use rearshift_bridge::{Bridge, BridgeError, BridgeHandle};
use rearshift_core::{MigrationOutcome, Settings, TaskRef, PRIMARY_DISPLAY, REAR_DISPLAY};
use std::sync::Arc;
use std::time::Duration;

/// Placeholder poll: attempts x interval bounds the wall-clock budget.
pub const POLL_ATTEMPTS: u32 = 60;
pub const POLL_INTERVAL: Duration = Duration::from_millis(30);
/// Attempts after which the launch command is re-issued; first launches
/// are occasionally swallowed while the display pipeline warms up.
pub const RELAUNCH_AT: [u32; 2] = [20, 40];

#[derive(Clone)]
pub struct MigrationPipeline {
    handle: BridgeHandle,
    settings: Arc<Settings>,
}

impl MigrationPipeline {
    pub fn new(handle: BridgeHandle, settings: Arc<Settings>) -> Self {
        Self { handle, settings }
    }

    /// Move the primary display's current foreground session to the
    /// rear display. `monitored` is the session we last put there; it
    /// never counts as a conflicting occupant.
    pub async fn switch_to_rear(&self, monitored: Option<&TaskRef>) -> MigrationOutcome {
        let Some(bridge) = self.handle.current().await else {
            return MigrationOutcome::ChannelUnavailable;
        };

        let target = match bridge.query_foreground_session(PRIMARY_DISPLAY).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return MigrationOutcome::NoForegroundSession,
            Err(e) => return self.channel_broke(e).await,
        };

        if let Some(occupant) = self.rear_occupant(&bridge, Some(&target.task), monitored).await {
            tracing::info!(occupant = %occupant, "rear display occupied, refusing to migrate");
            return MigrationOutcome::Conflict { occupant };
        }

        if let Err(e) = self.prepare_rear(&bridge).await {
            return self.channel_broke(e).await;
        }

        match bridge
            .move_session_to_display(target.task.task_id, REAR_DISPLAY)
            .await
        {
            Ok(_) => {}
            Err(e) => return self.channel_broke(e).await,
        }

        // Tidy the primary display behind the departed session.
        if let Err(e) = bridge.collapse_status_shade().await {
            tracing::debug!(error = %e, "status shade collapse failed");
        }

        tracing::info!(task = %target.task, "session migrated to rear display");
        MigrationOutcome::Moved { task: target.task }
    }

    /// Migrate a specific package, launching it first if it is not
    /// already running.
    pub async fn switch_package_to_rear(
        &self,
        package: &str,
        monitored: Option<&TaskRef>,
    ) -> MigrationOutcome {
        let Some(bridge) = self.handle.current().await else {
            return MigrationOutcome::ChannelUnavailable;
        };

        let task_id = match bridge.find_task_by_package(package).await {
            Ok(Some(id)) => Some(id),
            Ok(None) => None,
            Err(e) => return self.channel_broke(e).await,
        };

        match task_id {
            Some(task_id) => {
                let task = TaskRef::new(package, task_id);
                if let Some(occupant) = self.rear_occupant(&bridge, Some(&task), monitored).await {
                    return MigrationOutcome::Conflict { occupant };
                }
                if let Err(e) = self.prepare_rear(&bridge).await {
                    return self.channel_broke(e).await;
                }
                match bridge.move_session_to_display(task_id, REAR_DISPLAY).await {
                    Ok(_) => MigrationOutcome::Moved { task },
                    Err(e) => self.channel_broke(e).await,
                }
            }
            None => {
                // Cold start: launch on the primary display, then run
                // the same poll the overlay placement uses.
                let launch = format!("monkey -p {package} -c android.intent.category.LAUNCHER 1");
                self.place_with_poll(&launch, package, package, monitored)
                    .await
            }
        }
    }

    /// Launch an overlay surface invisibly on the primary display and
    /// move it to the rear display once the OS assigns it a task id.
    pub async fn place_overlay(
        &self,
        launch_cmd: &str,
        component: &str,
        monitored: Option<&TaskRef>,
    ) -> MigrationOutcome {
        let package = component.split('/').next().unwrap_or(component);
        let marker = poll_marker(component);
        self.place_with_poll(launch_cmd, marker, package, monitored)
            .await
    }

    /// Move the session back to the primary display and bring the rear
    /// home surface up again.
    pub async fn return_to_primary(&self, task: &TaskRef) -> MigrationOutcome {
        let Some(bridge) = self.handle.current().await else {
            return MigrationOutcome::ChannelUnavailable;
        };
        match bridge
            .move_session_to_display(task.task_id, PRIMARY_DISPLAY)
            .await
        {
            Ok(_) => {}
            Err(e) => return self.channel_broke(e).await,
        }
        if let Err(e) = bridge.restore_rear_home().await {
            tracing::warn!(error = %e, "rear home restore failed");
        }
        tracing::info!(task = %task, "session returned to primary display");
        MigrationOutcome::Moved { task: task.clone() }
    }

    // ─── Shared steps ───

    async fn place_with_poll(
        &self,
        launch_cmd: &str,
        marker: &str,
        package: &str,
        monitored: Option<&TaskRef>,
    ) -> MigrationOutcome {
        let Some(bridge) = self.handle.current().await else {
            return MigrationOutcome::ChannelUnavailable;
        };

        if let Some(occupant) = self.rear_occupant(&bridge, None, monitored).await {
            return MigrationOutcome::Conflict { occupant };
        }
        if let Err(e) = self.prepare_rear(&bridge).await {
            return self.channel_broke(e).await;
        }

        if let Err(e) = bridge.run_command(launch_cmd).await {
            return self.channel_broke(e).await;
        }

        for attempt in 1..=POLL_ATTEMPTS {
            tokio::time::sleep(POLL_INTERVAL).await;

            match bridge.find_task_by_marker(marker).await {
                Ok(Some(task_id)) => {
                    match bridge.move_session_to_display(task_id, REAR_DISPLAY).await {
                        Ok(_) => {
                            let task = TaskRef::new(package, task_id);
                            tracing::info!(task = %task, attempt, "placed on rear display");
                            return MigrationOutcome::Moved { task };
                        }
                        Err(e) => return self.channel_broke(e).await,
                    }
                }
                Ok(None) => {}
                Err(e) => return self.channel_broke(e).await,
            }

            if RELAUNCH_AT.contains(&attempt) {
                tracing::debug!(attempt, "task id not visible yet, re-issuing launch");
                if let Err(e) = bridge.run_command(launch_cmd).await {
                    return self.channel_broke(e).await;
                }
            }
        }

        tracing::warn!(marker, "placeholder never appeared, abandoning");
        MigrationOutcome::Timeout
    }

    /// Foreign session currently fronting the rear display, if any.
    /// The rear home surface, our own overlay surfaces, the migration
    /// target itself, and the monitored session are not occupants.
    async fn rear_occupant(
        &self,
        bridge: &Bridge,
        target: Option<&TaskRef>,
        monitored: Option<&TaskRef>,
    ) -> Option<TaskRef> {
        let entry = match bridge.query_foreground_session(REAR_DISPLAY).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "rear foreground query failed");
                return None;
            }
        };
        if entry.task.package == self.settings.rear_home_package {
            return None;
        }
        if self.settings.is_overlay_component(&entry.component) {
            return None;
        }
        if target.is_some_and(|t| t.task_id == entry.task.task_id) {
            return None;
        }
        if monitored.is_some_and(|m| m.task_id == entry.task.task_id) {
            return None;
        }
        Some(entry.task)
    }

    async fn prepare_rear(&self, bridge: &Bridge) -> Result<(), BridgeError> {
        match bridge.suppress_rear_home().await {
            Ok(true) => {}
            Ok(false) => tracing::debug!("rear home still alive after force-stop"),
            Err(e) => return Err(e),
        }
        bridge.wake_display(REAR_DISPLAY).await?;
        Ok(())
    }

    async fn channel_broke(&self, e: BridgeError) -> MigrationOutcome {
        tracing::warn!(error = %e, "privileged channel broke mid-pipeline");
        self.handle.mark_dead().await;
        MigrationOutcome::ChannelUnavailable
    }
}

/// The substring polled for in stack dumps: the activity's simple name,
/// which survives both the shorthand and fully-qualified component
/// spellings the dump may use.
fn poll_marker(component: &str) -> &str {
    component
        .rsplit(['/', '.'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(component)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rearshift_bridge::{BridgeConfig, PrivilegedRunner};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn poll_marker_variants() {
        assert_eq!(
            poll_marker("com.rearshift.surfaces/.ChargingOverlayActivity"),
            "ChargingOverlayActivity"
        );
        assert_eq!(
            poll_marker("com.rearshift.surfaces/com.rearshift.surfaces.ChargingOverlayActivity"),
            "ChargingOverlayActivity"
        );
        assert_eq!(poll_marker("plainmarker"), "plainmarker");
    }

    /// Scripted device: answers stack dumps from a queue-like closure
    /// over a call counter, records everything else.
    struct FakeDevice {
        commands: Mutex<Vec<String>>,
        stack_dumps: AtomicUsize,
        dump_for: fn(usize) -> String,
    }

    impl FakeDevice {
        fn new(dump_for: fn(usize) -> String) -> Self {
            Self {
                commands: Mutex::new(Vec::new()),
                stack_dumps: AtomicUsize::new(0),
                dump_for,
            }
        }

        fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.commands()
                .iter()
                .filter(|c| c.starts_with(prefix))
                .count()
        }
    }

    impl PrivilegedRunner for FakeDevice {
        fn run(&self, cmd: &str) -> Result<bool, BridgeError> {
            self.commands.lock().unwrap().push(cmd.to_string());
            // pidof: rear home is gone after force-stop.
            Ok(!cmd.starts_with("pidof"))
        }
        fn run_for_output(&self, cmd: &str) -> Result<String, BridgeError> {
            self.commands.lock().unwrap().push(cmd.to_string());
            if cmd == "am stack list" {
                let n = self.stack_dumps.fetch_add(1, Ordering::SeqCst);
                return Ok((self.dump_for)(n));
            }
            Ok(String::new())
        }
    }

    async fn pipeline_with(device: Arc<FakeDevice>) -> MigrationPipeline {
        let handle = BridgeHandle::new();
        handle
            .publish(Bridge::new(device, BridgeConfig::default()))
            .await;
        MigrationPipeline::new(handle, Arc::new(Settings::default()))
    }

    const EMPTY_REAR: &str = "RootTask id=9 displayId=1\n  taskId=901: com.xiaomi.subscreencenter/.SubScreenLauncher\n";

    fn front_dump() -> String {
        format!(
            "RootTask id=7 displayId=0\n  taskId=812: com.example.browser/.Main\n{EMPTY_REAR}"
        )
    }

    #[tokio::test(start_paused = true)]
    async fn direct_switch_moves_the_foreground_session() {
        let device = Arc::new(FakeDevice::new(|_| front_dump()));
        let pipeline = pipeline_with(Arc::clone(&device)).await;

        let outcome = pipeline.switch_to_rear(None).await;
        assert_eq!(
            outcome,
            MigrationOutcome::Moved {
                task: TaskRef::new("com.example.browser", 812)
            }
        );
        let cmds = device.commands();
        assert!(cmds.contains(&"service call activity_task 50 i32 812 i32 1".to_string()));
        assert!(cmds.contains(&"am force-stop com.xiaomi.subscreencenter".to_string()));
        assert!(cmds.contains(&"cmd statusbar collapse".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_issues_zero_move_commands() {
        // A foreign game fronts the rear display.
        let device = Arc::new(FakeDevice::new(|_| {
            "RootTask id=7 displayId=0\n  taskId=812: com.example.browser/.Main\n\
             RootTask id=9 displayId=1\n  taskId=333: com.example.game/.GameActivity\n"
                .to_string()
        }));
        let pipeline = pipeline_with(Arc::clone(&device)).await;

        let outcome = pipeline.switch_to_rear(None).await;
        assert_eq!(
            outcome,
            MigrationOutcome::Conflict {
                occupant: TaskRef::new("com.example.game", 333)
            }
        );
        assert_eq!(device.count("service call activity_task"), 0);
        assert_eq!(device.count("am force-stop"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn monitored_session_on_rear_is_not_a_conflict() {
        let device = Arc::new(FakeDevice::new(|_| {
            "RootTask id=7 displayId=0\n  taskId=812: com.example.browser/.Main\n\
             RootTask id=9 displayId=1\n  taskId=555: com.example.reader/.Reader\n"
                .to_string()
        }));
        let pipeline = pipeline_with(Arc::clone(&device)).await;

        let monitored = TaskRef::new("com.example.reader", 555);
        let outcome = pipeline.switch_to_rear(Some(&monitored)).await;
        assert!(matches!(outcome, MigrationOutcome::Moved { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn no_foreground_session() {
        let device = Arc::new(FakeDevice::new(|_| EMPTY_REAR.to_string()));
        let pipeline = pipeline_with(device).await;
        assert_eq!(
            pipeline.switch_to_rear(None).await,
            MigrationOutcome::NoForegroundSession
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unbound_channel_short_circuits() {
        let pipeline = MigrationPipeline::new(BridgeHandle::new(), Arc::new(Settings::default()));
        assert_eq!(
            pipeline.switch_to_rear(None).await,
            MigrationOutcome::ChannelUnavailable
        );
    }

    // Dump schedule for the overlay poll: the conflict check (dump 0)
    // sees an empty rear display; the placeholder only shows up in
    // dump 45 (the 45th poll attempt).
    fn dump_appearing_at_45(n: usize) -> String {
        if n >= 45 {
            format!(
                "{EMPTY_REAR}RootTask id=7 displayId=0\n  taskId=777: com.rearshift.surfaces/.ChargingOverlayActivity\n"
            )
        } else {
            EMPTY_REAR.to_string()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn overlay_poll_succeeds_late_with_two_relaunches() {
        let device = Arc::new(FakeDevice::new(dump_appearing_at_45));
        let pipeline = pipeline_with(Arc::clone(&device)).await;

        let launch = "am start -n com.rearshift.surfaces/.ChargingOverlayActivity --ei level 80";
        let outcome = pipeline
            .place_overlay(launch, "com.rearshift.surfaces/.ChargingOverlayActivity", None)
            .await;
        assert_eq!(
            outcome,
            MigrationOutcome::Moved {
                task: TaskRef::new("com.rearshift.surfaces", 777)
            }
        );
        // Initial launch plus the re-issues at attempts 20 and 40.
        assert_eq!(device.count("am start -n com.rearshift.surfaces"), 3);
        assert_eq!(device.count("service call activity_task 50 i32 777"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overlay_poll_times_out_after_sixty_attempts() {
        let device = Arc::new(FakeDevice::new(|_| EMPTY_REAR.to_string()));
        let pipeline = pipeline_with(Arc::clone(&device)).await;

        let outcome = pipeline
            .place_overlay(
                "am start -n com.rearshift.surfaces/.ChargingOverlayActivity",
                "com.rearshift.surfaces/.ChargingOverlayActivity",
                None,
            )
            .await;
        assert_eq!(outcome, MigrationOutcome::Timeout);
        // 1 conflict-check dump + 60 poll dumps.
        assert_eq!(device.stack_dumps.load(Ordering::SeqCst), 61);
        // Initial launch + 2 re-issues, no move ever.
        assert_eq!(device.count("am start"), 3);
        assert_eq!(device.count("service call"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cold_package_switch_launches_then_polls() {
        // Dump 0: task lookup (absent). Dump 1: conflict check.
        // Dump 2+: the launched app is visible.
        let device = Arc::new(FakeDevice::new(|n| {
            if n >= 2 {
                format!("{EMPTY_REAR}RootTask id=7 displayId=0\n  taskId=888: com.example.maps/.MapsActivity\n")
            } else {
                EMPTY_REAR.to_string()
            }
        }));
        let pipeline = pipeline_with(Arc::clone(&device)).await;

        let outcome = pipeline
            .switch_package_to_rear("com.example.maps", None)
            .await;
        assert_eq!(
            outcome,
            MigrationOutcome::Moved {
                task: TaskRef::new("com.example.maps", 888)
            }
        );
        assert_eq!(device.count("monkey -p com.example.maps"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn warm_package_switch_skips_the_poll() {
        let device = Arc::new(FakeDevice::new(|_| {
            format!("{EMPTY_REAR}RootTask id=7 displayId=0\n  taskId=812: com.example.browser/.Main\n")
        }));
        let pipeline = pipeline_with(Arc::clone(&device)).await;

        let outcome = pipeline
            .switch_package_to_rear("com.example.browser", None)
            .await;
        assert_eq!(
            outcome,
            MigrationOutcome::Moved {
                task: TaskRef::new("com.example.browser", 812)
            }
        );
        assert_eq!(device.count("monkey"), 0);
        // Task lookup + conflict check only.
        assert_eq!(device.stack_dumps.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn return_to_primary_moves_and_restores_home() {
        let device = Arc::new(FakeDevice::new(|_| front_dump()));
        let pipeline = pipeline_with(Arc::clone(&device)).await;

        let task = TaskRef::new("com.example.browser", 812);
        let outcome = pipeline.return_to_primary(&task).await;
        assert_eq!(outcome, MigrationOutcome::Moved { task });
        let cmds = device.commands();
        assert!(cmds.contains(&"service call activity_task 50 i32 812 i32 0".to_string()));
        assert!(cmds
            .iter()
            .any(|c| c.starts_with("am start --display 1 -n com.xiaomi.subscreencenter")));
    }
}

//! Async typed facade over the privileged runner.
//!
//! Each method issues one shell command (sync, on a blocking thread)
//! and maps its output into a typed answer. Output parsing lives in
//! free functions so it tests without a runner.

use crate::display::{parse_display_metadata, DisplayMetadata};
use crate::error::BridgeError;
use crate::runner::PrivilegedRunner;
use crate::stack::{self, StackEntry};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// Static knowledge the bridge needs about the device.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub rear_home_package: String,
    pub rear_home_component: String,
    pub snapshot_dir: String,
    pub recording_dir: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            rear_home_package: "com.xiaomi.subscreencenter".to_string(),
            rear_home_component: "com.xiaomi.subscreencenter/.SubScreenLauncher".to_string(),
            snapshot_dir: "/sdcard/Pictures/RearShots".to_string(),
            recording_dir: "/sdcard/Movies".to_string(),
        }
    }
}

/// Handle to a recorder process started by
/// [`Bridge::start_display_recording`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSession {
    pub pid: i32,
    pub file: String,
}

const RECORDER_PID_FILE: &str = "/data/local/tmp/rearshift/record.pid";
const RECORDER_BIT_RATE: u32 = 20_000_000;
/// The recorder forks before the pid file lands.
const RECORDER_SPAWN_WAIT: Duration = Duration::from_millis(800);
/// SIGINT makes the recorder finalize the container; give it a moment.
const RECORDER_DRAIN_WAIT: Duration = Duration::from_secs(1);

/// Typed handle over a live privileged channel. Cheap to clone; all
/// clones share one runner.
#[derive(Clone)]
pub struct Bridge {
    runner: Arc<dyn PrivilegedRunner>,
    config: Arc<BridgeConfig>,
}

impl Bridge {
    pub fn new(runner: Arc<dyn PrivilegedRunner>, config: BridgeConfig) -> Self {
        Self {
            runner,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run a raw command, reporting exit status.
    pub async fn run_command(&self, cmd: impl Into<String>) -> Result<bool, BridgeError> {
        let cmd = cmd.into();
        let runner = Arc::clone(&self.runner);
        tokio::task::spawn_blocking(move || runner.run(&cmd)).await?
    }

    /// Run a raw command and capture stdout.
    pub async fn run_command_for_output(
        &self,
        cmd: impl Into<String>,
    ) -> Result<String, BridgeError> {
        let cmd = cmd.into();
        let runner = Arc::clone(&self.runner);
        tokio::task::spawn_blocking(move || runner.run_for_output(&cmd)).await?
    }

    // ─── Session placement ───

    /// Move a task to a display. Fire-and-forget: the underlying
    /// service call reports nothing useful, so callers that care
    /// re-query placement afterwards.
    pub async fn move_session_to_display(
        &self,
        task_id: i32,
        display_id: i32,
    ) -> Result<bool, BridgeError> {
        tracing::debug!(task_id, display_id, "moving session");
        self.run_command(format!(
            "service call activity_task 50 i32 {task_id} i32 {display_id}"
        ))
        .await
    }

    async fn stack_dump(&self) -> Result<String, BridgeError> {
        self.run_command_for_output("am stack list").await
    }

    /// Front-most session on a display, if the stack dump lists one.
    pub async fn query_foreground_session(
        &self,
        display_id: i32,
    ) -> Result<Option<StackEntry>, BridgeError> {
        let dump = self.stack_dump().await?;
        Ok(stack::foreground_on_display(&dump, display_id))
    }

    pub async fn is_session_on_display(
        &self,
        task_id: i32,
        display_id: i32,
    ) -> Result<bool, BridgeError> {
        let dump = self.stack_dump().await?;
        Ok(stack::task_on_display(&dump, task_id, display_id))
    }

    pub async fn find_task_by_package(
        &self,
        package: &str,
    ) -> Result<Option<i32>, BridgeError> {
        let dump = self.stack_dump().await?;
        Ok(stack::find_task_by_package(&dump, package))
    }

    /// Task id of the first stack entry containing `marker`, for the
    /// placeholder poll.
    pub async fn find_task_by_marker(&self, marker: &str) -> Result<Option<i32>, BridgeError> {
        let dump = self.stack_dump().await?;
        Ok(stack::task_id_for_marker(&dump, marker))
    }

    // ─── Display properties ───

    pub async fn fetch_display_metadata(&self) -> Result<DisplayMetadata, BridgeError> {
        let dump = self.run_command_for_output("dumpsys display").await?;
        Ok(parse_display_metadata(&dump))
    }

    /// Current dpi of a display: the override if one is set, else the
    /// physical density.
    pub async fn get_display_dpi(&self, display_id: i32) -> Result<Option<u32>, BridgeError> {
        let out = self
            .run_command_for_output(format!("wm density -d {display_id}"))
            .await?;
        Ok(parse_density_output(&out))
    }

    pub async fn set_display_dpi(&self, display_id: i32, dpi: u32) -> Result<bool, BridgeError> {
        self.run_command(format!("wm density {dpi} -d {display_id}"))
            .await
    }

    pub async fn reset_display_dpi(&self, display_id: i32) -> Result<bool, BridgeError> {
        self.run_command(format!("wm density reset -d {display_id}"))
            .await
    }

    /// Lock a display's rotation. 0..=3 for 0/90/180/270 degrees.
    pub async fn set_display_rotation(
        &self,
        display_id: i32,
        rotation: u32,
    ) -> Result<bool, BridgeError> {
        self.run_command(format!("wm user-rotation -d {display_id} lock {rotation}"))
            .await
    }

    /// Current locked rotation, or `None` when rotation is free.
    pub async fn get_display_rotation(
        &self,
        display_id: i32,
    ) -> Result<Option<u32>, BridgeError> {
        let out = self
            .run_command_for_output(format!("wm user-rotation -d {display_id}"))
            .await?;
        Ok(parse_rotation_output(&out))
    }

    pub async fn wake_display(&self, display_id: i32) -> Result<bool, BridgeError> {
        self.run_command(format!("input -d {display_id} keyevent KEYCODE_WAKEUP"))
            .await
    }

    // ─── Rear home surface ───

    /// Force-stop the stock rear home so it cannot cover a migrated
    /// session. Best-effort; the force-stop always exits zero, so a
    /// process probe tells the truth.
    pub async fn suppress_rear_home(&self) -> Result<bool, BridgeError> {
        let pkg = self.config.rear_home_package.clone();
        self.run_command(format!("am force-stop {pkg}")).await?;
        Ok(!self.is_rear_home_running().await?)
    }

    pub async fn restore_rear_home(&self) -> Result<bool, BridgeError> {
        let component = self.config.rear_home_component.clone();
        self.run_command(format!("am start --display 1 -n {component}"))
            .await
    }

    pub async fn is_rear_home_running(&self) -> Result<bool, BridgeError> {
        let pkg = self.config.rear_home_package.clone();
        self.run_command(format!("pidof {pkg}")).await
    }

    pub async fn collapse_status_shade(&self) -> Result<bool, BridgeError> {
        self.run_command("cmd statusbar collapse").await
    }

    // ─── Snapshot ───

    /// Capture the rear display to a timestamped image under the
    /// configured snapshot directory, then poke the media scanner so it
    /// shows up in the gallery. Returns the file path.
    pub async fn take_display_snapshot(&self) -> Result<String, BridgeError> {
        self.wake_display(rearshift_core::REAR_DISPLAY).await?;

        let dir = self.config.snapshot_dir.clone();
        self.run_command(format!("mkdir -p {dir}")).await?;

        // The compositor addresses displays by an opaque token, not the
        // logical id; the rear display is the second one it reports.
        let dump = self
            .run_command_for_output("dumpsys SurfaceFlinger --display-id")
            .await?;
        let token = parse_snapshot_display_token(&dump)
            .ok_or_else(|| BridgeError::CommandFailed("no rear display token".to_string()))?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let file = format!("{dir}/rear_{stamp}.png");
        let ok = self
            .run_command(format!("screencap -p -d {token} {file}"))
            .await?;
        if !ok {
            return Err(BridgeError::CommandFailed("screencap failed".to_string()));
        }

        self.run_command(format!(
            "am broadcast -a android.intent.action.MEDIA_SCANNER_SCAN_FILE -d file://{file}"
        ))
        .await?;
        Ok(file)
    }

    // ─── Recording ───

    /// Start recording the rear display to a timestamped video under the
    /// configured recording directory. The recorder runs detached; the
    /// returned session carries the pid needed to stop it.
    pub async fn start_display_recording(&self) -> Result<RecordingSession, BridgeError> {
        self.wake_display(rearshift_core::REAR_DISPLAY).await?;

        let dir = self.config.recording_dir.clone();
        self.run_command(format!("mkdir -p {dir}")).await?;

        let dump = self
            .run_command_for_output("dumpsys SurfaceFlinger --display-id")
            .await?;
        // The recorder also accepts the logical id when the compositor
        // token cannot be read.
        let token = match parse_snapshot_display_token(&dump) {
            Some(token) => token,
            None => {
                tracing::warn!("no rear display token, recording by logical id");
                rearshift_core::REAR_DISPLAY as u64
            }
        };

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let file = format!("{dir}/rear_{stamp}.mp4");
        self.run_command(format!(
            "screenrecord --display-id {token} --bit-rate {RECORDER_BIT_RATE} {file} \
             >/dev/null 2>&1 & echo $! > {RECORDER_PID_FILE}"
        ))
        .await?;

        tokio::time::sleep(RECORDER_SPAWN_WAIT).await;
        let pid: i32 = self
            .run_command_for_output(format!("cat {RECORDER_PID_FILE}"))
            .await?
            .trim()
            .parse()
            .map_err(|_| BridgeError::CommandFailed("no recorder pid".to_string()))?;

        let alive = self.run_command_for_output(format!("ps -p {pid}")).await?;
        if !alive.contains(&pid.to_string()) {
            return Err(BridgeError::CommandFailed(
                "recorder did not start".to_string(),
            ));
        }

        tracing::info!(pid, file = %file, "rear display recording started");
        Ok(RecordingSession { pid, file })
    }

    /// Stop a recorder gracefully, then poke the media scanner so the
    /// video shows up in the gallery. Returns the saved file path.
    pub async fn stop_display_recording(
        &self,
        session: &RecordingSession,
    ) -> Result<String, BridgeError> {
        let pid = session.pid;
        if !self.run_command(format!("kill -2 {pid}")).await? {
            self.run_command(format!("kill {pid}")).await?;
        }
        tokio::time::sleep(RECORDER_DRAIN_WAIT).await;

        let file = session.file.clone();
        self.run_command(format!(
            "am broadcast -a android.intent.action.MEDIA_SCANNER_SCAN_FILE -d file://{file}"
        ))
        .await?;
        tracing::info!(pid, file = %file, "rear display recording stopped");
        Ok(file)
    }
}

/// Parse `wm density` output, preferring the override line.
pub fn parse_density_output(out: &str) -> Option<u32> {
    let pick = |prefix: &str| {
        out.lines()
            .find_map(|l| l.trim().strip_prefix(prefix))
            .and_then(|v| v.trim().parse::<u32>().ok())
    };
    pick("Override density:").or_else(|| pick("Physical density:"))
}

/// Parse `wm user-rotation` output: `lock 2` or `free`.
pub fn parse_rotation_output(out: &str) -> Option<u32> {
    let trimmed = out.trim();
    trimmed
        .strip_prefix("lock")
        .and_then(|v| v.trim().parse::<u32>().ok())
}

/// Second display token from the compositor's display-id dump.
pub fn parse_snapshot_display_token(dump: &str) -> Option<u64> {
    static TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Display (\d+)").unwrap());
    TOKEN
        .captures_iter(dump)
        .nth(1)
        .and_then(|c| c[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn density_prefers_override() {
        let out = "Physical density: 450\nOverride density: 420\n";
        assert_eq!(parse_density_output(out), Some(420));
    }

    #[test]
    fn density_falls_back_to_physical() {
        assert_eq!(parse_density_output("Physical density: 450\n"), Some(450));
    }

    #[test]
    fn density_unparsable_is_none() {
        assert_eq!(parse_density_output("garbage\n"), None);
    }

    #[test]
    fn rotation_lock_and_free() {
        assert_eq!(parse_rotation_output("lock 2\n"), Some(2));
        assert_eq!(parse_rotation_output("free\n"), None);
        assert_eq!(parse_rotation_output(""), None);
    }

    #[test]
    fn snapshot_token_is_second_display() {
        let dump = "Display 4630946929816732931 (HWC display 0)\n\
                    Display 4630946949513469332 (HWC display 1)\n";
        assert_eq!(
            parse_snapshot_display_token(dump),
            Some(4630946949513469332)
        );
    }

    #[test]
    fn snapshot_token_missing_second_display() {
        let dump = "Display 4630946929816732931 (HWC display 0)\n";
        assert_eq!(parse_snapshot_display_token(dump), None);
    }

    // ─── Facade tests with a scripted runner ───

    use std::sync::Mutex;

    /// Records every command; answers `run` with `true` and
    /// `run_for_output` from a canned map by substring.
    struct ScriptedRunner {
        commands: Mutex<Vec<String>>,
        outputs: Vec<(&'static str, &'static str)>,
    }

    impl ScriptedRunner {
        fn new(outputs: Vec<(&'static str, &'static str)>) -> Self {
            Self {
                commands: Mutex::new(Vec::new()),
                outputs,
            }
        }
        fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    impl PrivilegedRunner for ScriptedRunner {
        fn run(&self, cmd: &str) -> Result<bool, BridgeError> {
            self.commands.lock().unwrap().push(cmd.to_string());
            // pidof reports the rear home as already gone.
            Ok(!cmd.starts_with("pidof"))
        }
        fn run_for_output(&self, cmd: &str) -> Result<String, BridgeError> {
            self.commands.lock().unwrap().push(cmd.to_string());
            for (needle, out) in &self.outputs {
                if cmd.contains(needle) {
                    return Ok((*out).to_string());
                }
            }
            Ok(String::new())
        }
    }

    fn bridge_with(runner: Arc<ScriptedRunner>) -> Bridge {
        Bridge::new(runner, BridgeConfig::default())
    }

    #[tokio::test]
    async fn move_issues_the_service_call() {
        let runner = Arc::new(ScriptedRunner::new(vec![]));
        let bridge = bridge_with(Arc::clone(&runner));
        assert!(bridge.move_session_to_display(812, 1).await.unwrap());
        assert_eq!(
            runner.commands(),
            vec!["service call activity_task 50 i32 812 i32 1"]
        );
    }

    #[tokio::test]
    async fn foreground_query_parses_the_dump() {
        let runner = Arc::new(ScriptedRunner::new(vec![(
            "am stack list",
            "RootTask id=7 displayId=0\n  taskId=812: com.example.browser/.Main\n",
        )]));
        let bridge = bridge_with(runner);
        let fg = bridge.query_foreground_session(0).await.unwrap().unwrap();
        assert_eq!(fg.task.task_id, 812);
        assert!(bridge.query_foreground_session(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn suppress_rear_home_verifies_with_pidof() {
        let runner = Arc::new(ScriptedRunner::new(vec![]));
        let bridge = bridge_with(Arc::clone(&runner));
        assert!(bridge.suppress_rear_home().await.unwrap());
        let cmds = runner.commands();
        assert_eq!(cmds[0], "am force-stop com.xiaomi.subscreencenter");
        assert_eq!(cmds[1], "pidof com.xiaomi.subscreencenter");
    }

    #[tokio::test]
    async fn snapshot_uses_the_compositor_token() {
        let runner = Arc::new(ScriptedRunner::new(vec![(
            "SurfaceFlinger",
            "Display 111 (HWC display 0)\nDisplay 222 (HWC display 1)\n",
        )]));
        let bridge = bridge_with(Arc::clone(&runner));
        let file = bridge.take_display_snapshot().await.unwrap();
        assert!(file.starts_with("/sdcard/Pictures/RearShots/rear_"));
        assert!(file.ends_with(".png"));
        let cmds = runner.commands();
        assert!(cmds.iter().any(|c| c.starts_with("screencap -p -d 222 ")));
        assert!(cmds.iter().any(|c| c.contains("MEDIA_SCANNER_SCAN_FILE")));
    }

    #[tokio::test]
    async fn snapshot_without_rear_display_fails() {
        let runner = Arc::new(ScriptedRunner::new(vec![(
            "SurfaceFlinger",
            "Display 111 (HWC display 0)\n",
        )]));
        let bridge = bridge_with(runner);
        assert!(matches!(
            bridge.take_display_snapshot().await,
            Err(BridgeError::CommandFailed(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn recording_start_reports_the_recorder_pid() {
        let runner = Arc::new(ScriptedRunner::new(vec![
            (
                "SurfaceFlinger",
                "Display 111 (HWC display 0)\nDisplay 222 (HWC display 1)\n",
            ),
            ("cat ", "4321\n"),
            ("ps -p", "  4321 shell screenrecord\n"),
        ]));
        let bridge = bridge_with(Arc::clone(&runner));
        let session = bridge.start_display_recording().await.unwrap();
        assert_eq!(session.pid, 4321);
        assert!(session.file.starts_with("/sdcard/Movies/rear_"));
        assert!(session.file.ends_with(".mp4"));
        assert!(runner
            .commands()
            .iter()
            .any(|c| c.starts_with("screenrecord --display-id 222 --bit-rate 20000000 ")));
    }

    #[tokio::test(start_paused = true)]
    async fn recording_start_fails_when_the_recorder_dies() {
        let runner = Arc::new(ScriptedRunner::new(vec![
            ("cat ", "4321\n"),
            ("ps -p", ""),
        ]));
        let bridge = bridge_with(runner);
        assert!(matches!(
            bridge.start_display_recording().await,
            Err(BridgeError::CommandFailed(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn recording_stop_interrupts_and_scans() {
        let runner = Arc::new(ScriptedRunner::new(vec![]));
        let bridge = bridge_with(Arc::clone(&runner));
        let session = RecordingSession {
            pid: 4321,
            file: "/sdcard/Movies/rear_20260829_120000.mp4".to_string(),
        };
        let saved = bridge.stop_display_recording(&session).await.unwrap();
        assert_eq!(saved, session.file);
        let cmds = runner.commands();
        assert_eq!(cmds[0], "kill -2 4321");
        assert!(cmds
            .iter()
            .any(|c| c.contains("MEDIA_SCANNER_SCAN_FILE") && c.contains(&session.file)));
    }

    #[tokio::test]
    async fn rotation_round_trip_commands() {
        let runner = Arc::new(ScriptedRunner::new(vec![("user-rotation", "lock 3\n")]));
        let bridge = bridge_with(Arc::clone(&runner));
        assert!(bridge.set_display_rotation(1, 3).await.unwrap());
        assert_eq!(bridge.get_display_rotation(1).await.unwrap(), Some(3));
        assert_eq!(
            runner.commands()[0],
            "wm user-rotation -d 1 lock 3"
        );
    }
}

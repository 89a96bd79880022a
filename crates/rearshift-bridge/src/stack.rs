//! Parsing for the activity-stack dump (`am stack list`).
//!
//! The dump is line oriented: a `RootTask` header names the display,
//! then one indented `taskId=` line per task on it, front-most first.
//! Parsers are pure functions over the raw text so they test without
//! a device.

use regex::Regex;
use rearshift_core::TaskRef;
use std::sync::LazyLock;

static TASK_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"taskId=(\d+):\s*([A-Za-z0-9_.]+)/(\S+)").unwrap()
});

static DISPLAY_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"displayId=(\d+)").unwrap());

/// One task line from the dump, with the display it sits on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEntry {
    pub display_id: i32,
    pub task: TaskRef,
    /// Full `package/activity` component from the dump.
    pub component: String,
}

/// Parse the whole dump into entries, preserving dump order (front-most
/// task of each display first). Unrecognized lines are skipped.
pub fn parse_stack_list(dump: &str) -> Vec<StackEntry> {
    let mut entries = Vec::new();
    let mut current_display: Option<i32> = None;

    for line in dump.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("RootTask") || trimmed.starts_with("Stack id=") {
            current_display = DISPLAY_ID
                .captures(trimmed)
                .and_then(|c| c[1].parse::<i32>().ok());
            continue;
        }
        let Some(display_id) = current_display else {
            continue;
        };
        if let Some(caps) = TASK_LINE.captures(trimmed) {
            // Regex groups are all matched digits/idents, parse cannot fail.
            let task_id: i32 = match caps[1].parse() {
                Ok(id) => id,
                Err(_) => continue,
            };
            let package = caps[2].to_string();
            let activity = &caps[3];
            entries.push(StackEntry {
                display_id,
                task: TaskRef::new(package.clone(), task_id),
                component: format!("{package}/{activity}"),
            });
        }
    }
    entries
}

/// Front-most task on `display_id`, if the dump lists one.
pub fn foreground_on_display(dump: &str, display_id: i32) -> Option<StackEntry> {
    parse_stack_list(dump)
        .into_iter()
        .find(|e| e.display_id == display_id)
}

/// Whether `task_id` appears under `display_id` anywhere in the dump.
pub fn task_on_display(dump: &str, task_id: i32, display_id: i32) -> bool {
    parse_stack_list(dump)
        .iter()
        .any(|e| e.display_id == display_id && e.task.task_id == task_id)
}

/// First task id whose package matches exactly, on any display.
pub fn find_task_by_package(dump: &str, package: &str) -> Option<i32> {
    parse_stack_list(dump)
        .into_iter()
        .find(|e| e.task.package == package)
        .map(|e| e.task.task_id)
}

/// Task id from the first dump line containing `marker`. Used by the
/// placeholder poll, where the launched component name is the marker.
pub fn task_id_for_marker(dump: &str, marker: &str) -> Option<i32> {
    static ID_ONLY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"taskId=(\d+)").unwrap());
    dump.lines()
        .filter(|l| l.contains(marker))
        .find_map(|l| ID_ONLY.captures(l).and_then(|c| c[1].parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "\
RootTask id=7 bounds=[0,0][1440,3200] displayId=0 userId=0 visible=true\n\
  taskId=812: com.example.browser/com.example.browser.MainActivity bounds=[0,0][1440,3200] userId=0 visible=true\n\
  taskId=640: com.android.settings/.Settings bounds=[0,0][1440,3200] userId=0 visible=false\n\
RootTask id=9 bounds=[0,0][904,572] displayId=1 userId=0 visible=true\n\
  taskId=901: com.xiaomi.subscreencenter/.SubScreenLauncher bounds=[0,0][904,572] userId=0 visible=true\n";

    #[test]
    fn parses_entries_per_display() {
        let entries = parse_stack_list(DUMP);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].display_id, 0);
        assert_eq!(entries[0].task, rearshift_core::TaskRef::new("com.example.browser", 812));
        assert_eq!(
            entries[0].component,
            "com.example.browser/com.example.browser.MainActivity"
        );
        assert_eq!(entries[2].display_id, 1);
        assert_eq!(entries[2].task.package, "com.xiaomi.subscreencenter");
    }

    #[test]
    fn foreground_is_front_most() {
        let fg = foreground_on_display(DUMP, 0).unwrap();
        assert_eq!(fg.task.task_id, 812);
        let rear = foreground_on_display(DUMP, 1).unwrap();
        assert_eq!(rear.task.task_id, 901);
        assert!(foreground_on_display(DUMP, 2).is_none());
    }

    #[test]
    fn task_on_display_checks_the_right_stack() {
        assert!(task_on_display(DUMP, 640, 0));
        assert!(!task_on_display(DUMP, 640, 1));
        assert!(task_on_display(DUMP, 901, 1));
        assert!(!task_on_display(DUMP, 4242, 0));
    }

    #[test]
    fn find_by_package_matches_exactly() {
        assert_eq!(find_task_by_package(DUMP, "com.android.settings"), Some(640));
        // Prefix of a real package must not match.
        assert_eq!(find_task_by_package(DUMP, "com.android"), None);
    }

    #[test]
    fn marker_extraction_for_placeholder_poll() {
        assert_eq!(task_id_for_marker(DUMP, "SubScreenLauncher"), Some(901));
        assert_eq!(task_id_for_marker(DUMP, "NoSuchActivity"), None);
    }

    #[test]
    fn task_lines_before_any_header_are_ignored() {
        let dump = "  taskId=5: com.a/.B\nRootTask id=1 displayId=0\n  taskId=6: com.c/.D\n";
        let entries = parse_stack_list(dump);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].task.task_id, 6);
    }

    #[test]
    fn header_without_display_id_suspends_collection() {
        let dump = "RootTask id=1 displayId=0\n  taskId=6: com.c/.D\nRootTask id=2\n  taskId=7: com.e/.F\n";
        let entries = parse_stack_list(dump);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].task.task_id, 6);
    }

    #[test]
    fn legacy_stack_header_form() {
        let dump = "Stack id=3 bounds=[0,0][904,572] displayId=1\n  taskId=44: com.g/.H\n";
        let entries = parse_stack_list(dump);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].display_id, 1);
    }

    #[test]
    fn empty_dump_yields_nothing() {
        assert!(parse_stack_list("").is_empty());
        assert!(foreground_on_display("", 0).is_none());
    }
}

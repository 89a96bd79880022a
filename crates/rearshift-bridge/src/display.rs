//! Rear display metadata extracted from the display diagnostic dump.
//!
//! The dump is huge and its cutout syntax varies by vendor build, so
//! parsing is a fallback chain: every stage that fails leaves the
//! previous value in place, and a fully unparsable dump degrades to the
//! hard-coded device defaults rather than an error.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Rear display panel defaults used when nothing can be parsed.
pub const DEFAULT_WIDTH: u32 = 904;
pub const DEFAULT_HEIGHT: u32 = 572;
pub const DEFAULT_DENSITY_DPI: u32 = 450;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Insets {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Insets {
    pub fn is_zero(&self) -> bool {
        *self == Insets::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
    pub cutout: Insets,
}

impl Default for DisplayMetadata {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            density_dpi: DEFAULT_DENSITY_DPI,
            cutout: Insets::default(),
        }
    }
}

static VIEWPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"displayId=1[^}]*deviceWidth=(\d+),\s*deviceHeight=(\d+)").unwrap()
});

static UNIQUE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"displayId=1[^}]*uniqueId='([^']+)'").unwrap());

static DENSITY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"density\s+(\d+)").unwrap());

// Vendor builds print insets as `Rect(left, top - right, bottom)`;
// AOSP prints `Rect(left, top, right, bottom)`.
static CUTOUT_DASHED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"DisplayCutout\{insets=Rect\((\d+),\s*(\d+)\s*-\s*(\d+),\s*(\d+)\)").unwrap()
});
static CUTOUT_STANDARD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"DisplayCutout\{insets=Rect\((\d+),\s*(\d+),\s*(\d+),\s*(\d+)\)").unwrap()
});
static CUTOUT_LOOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)cutout.*?Rect\(([^)]+)\)").unwrap());

/// Parse the rear display's metadata out of a full diagnostic dump.
/// Always succeeds; whatever cannot be parsed keeps its default.
pub fn parse_display_metadata(dump: &str) -> DisplayMetadata {
    let mut meta = DisplayMetadata::default();

    if let Some(caps) = VIEWPORT.captures(dump) {
        if let (Ok(w), Ok(h)) = (caps[1].parse(), caps[2].parse()) {
            meta.width = w;
            meta.height = h;
        }
    }

    let block = rear_device_block(dump, meta.width, meta.height);
    let Some(block) = block else {
        tracing::debug!("no rear display device block found in dump, using defaults");
        return meta;
    };

    if let Some(caps) = DENSITY.captures(block) {
        if let Ok(dpi) = caps[1].parse() {
            meta.density_dpi = dpi;
        }
    }

    meta.cutout = parse_cutout(block);
    meta
}

/// Locate the rear display's device-info block. The block is found by
/// the uniqueId from the viewport section when available, otherwise by
/// echoing the already-parsed resolution, and is bounded by the next
/// block header so primary-display values cannot bleed in.
fn rear_device_block(dump: &str, width: u32, height: u32) -> Option<&str> {
    const HEADER: &str = "DisplayDeviceInfo";
    let unique_id = UNIQUE_ID
        .captures(dump)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str());
    let resolution_echo = format!("{width} x {height}");

    let mut search = 0;
    while let Some(rel) = dump[search..].find(HEADER) {
        let start = search + rel;
        let body_from = start + HEADER.len();
        // Block ends at the next header; the probe must not look past
        // it or a later block's uniqueId would match this one.
        let end = match dump[body_from..].find(HEADER) {
            Some(next) => body_from + next,
            None => dump.len().min(start + 3000),
        };
        let probe = &dump[start..end.min(start + 2000)];

        let is_rear = match unique_id {
            Some(id) => probe.contains(id),
            None => false,
        } || probe.contains(&resolution_echo);

        if is_rear {
            return Some(&dump[start..end]);
        }
        search = body_from;
    }
    None
}

fn parse_cutout(block: &str) -> Insets {
    for pattern in [&CUTOUT_DASHED, &CUTOUT_STANDARD] {
        if let Some(caps) = pattern.captures(block) {
            let parse = |i: usize| caps[i].parse().unwrap_or(0);
            return Insets {
                left: parse(1),
                top: parse(2),
                right: parse(3),
                bottom: parse(4),
            };
        }
    }
    // Unrecognized syntax: keep the raw rect in the log for diagnosis,
    // report zero insets.
    if let Some(caps) = CUTOUT_LOOSE.captures(block) {
        tracing::debug!(rect = &caps[1], "cutout present but syntax unrecognized");
    }
    Insets::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump_with(block: &str) -> String {
        format!(
            "DisplayViewport{{type=INTERNAL, displayId=1, uniqueId='local:456', \
             deviceWidth=904, deviceHeight=572}}\n\
             DisplayDeviceInfo{{\"Front\": uniqueId=\"local:123\", 1440 x 3200, density 560}}\n\
             DisplayDeviceInfo{{\"Rear\": uniqueId=\"local:456\", 904 x 572, {block}}}\n"
        )
    }

    #[test]
    fn parses_viewport_resolution() {
        let meta = parse_display_metadata(&dump_with("density 450"));
        assert_eq!(meta.width, 904);
        assert_eq!(meta.height, 572);
    }

    #[test]
    fn density_comes_from_rear_block_not_front() {
        let meta = parse_display_metadata(&dump_with("density 450"));
        assert_eq!(meta.density_dpi, 450);
    }

    #[test]
    fn dashed_cutout_syntax() {
        let meta =
            parse_display_metadata(&dump_with("density 450, DisplayCutout{insets=Rect(12, 0 - 0, 0)"));
        assert_eq!(
            meta.cutout,
            Insets {
                left: 12,
                top: 0,
                right: 0,
                bottom: 0
            }
        );
    }

    #[test]
    fn standard_cutout_syntax() {
        let meta = parse_display_metadata(&dump_with(
            "density 450, DisplayCutout{insets=Rect(0, 88, 0, 4)",
        ));
        assert_eq!(
            meta.cutout,
            Insets {
                left: 0,
                top: 88,
                right: 0,
                bottom: 4
            }
        );
    }

    #[test]
    fn unparsable_cutout_is_zero() {
        let meta = parse_display_metadata(&dump_with(
            "density 450, cutout=SomeRect(weird ; syntax)",
        ));
        assert!(meta.cutout.is_zero());
    }

    #[test]
    fn empty_dump_degrades_to_defaults() {
        let meta = parse_display_metadata("");
        assert_eq!(meta, DisplayMetadata::default());
        assert_eq!(meta.width, 904);
        assert_eq!(meta.density_dpi, 450);
    }

    #[test]
    fn missing_rear_block_keeps_viewport_resolution() {
        let dump = "DisplayViewport{type=INTERNAL, displayId=1, \
                    deviceWidth=800, deviceHeight=600}\n";
        let meta = parse_display_metadata(dump);
        assert_eq!(meta.width, 800);
        assert_eq!(meta.height, 600);
        assert_eq!(meta.density_dpi, DEFAULT_DENSITY_DPI);
    }

    #[test]
    fn rear_block_found_by_resolution_when_unique_id_absent() {
        let dump = "DisplayViewport{type=INTERNAL, displayId=1, \
                    deviceWidth=904, deviceHeight=572}\n\
                    DisplayDeviceInfo{\"Rear\": 904 x 572, density 440}\n";
        let meta = parse_display_metadata(dump);
        assert_eq!(meta.density_dpi, 440);
    }

    #[test]
    fn adjacent_front_block_does_not_shadow_rear_block() {
        // The front block sits directly before the rear block, close
        // enough that an unbounded scan from its header would reach the
        // rear uniqueId. The rear block's values must still win.
        let dump = format!(
            "DisplayViewport{{type=INTERNAL, displayId=1, uniqueId='local:456', \
             deviceWidth=904, deviceHeight=572}}\n\
             DisplayDeviceInfo{{\"Front\": uniqueId=\"local:123\", 1440 x 3200, \
             density 560, DisplayCutout{{insets=Rect(0, 88, 0, 0)}}}}\n\
             DisplayDeviceInfo{{\"Rear\": uniqueId=\"local:456\", 904 x 572, \
             density 450, DisplayCutout{{insets=Rect(12, 0 - 0, 0)}}}}\n"
        );
        let meta = parse_display_metadata(&dump);
        assert_eq!(meta.density_dpi, 450);
        assert_eq!(
            meta.cutout,
            Insets {
                left: 12,
                top: 0,
                right: 0,
                bottom: 0
            }
        );
    }

    #[test]
    fn front_block_never_bleeds_into_rear_values() {
        // Only a front block exists; rear density must stay default.
        let dump = "DisplayViewport{type=INTERNAL, displayId=1, uniqueId='local:456', \
                    deviceWidth=904, deviceHeight=572}\n\
                    DisplayDeviceInfo{\"Front\": uniqueId=\"local:123\", 1440 x 3200, density 560}\n";
        let meta = parse_display_metadata(dump);
        assert_eq!(meta.density_dpi, DEFAULT_DENSITY_DPI);
        assert!(meta.cutout.is_zero());
    }
}

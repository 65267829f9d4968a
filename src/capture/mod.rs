//! Paginated preview capture: a state machine over a [`ViewerDriver`].

pub mod chrome;
pub mod document;
pub mod driver;
pub mod engine;
pub mod trailer;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

pub use chrome::{BrowserMedia, ChromeMedia, ChromeViewerDriver};
pub use driver::{DriverError, ViewerDriver};
pub use engine::{CaptureState, ViewerCaptureEngine};

/// How the viewer is advanced to the next page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdvanceAction {
    Key { target: String, key: String },
    Click { selector: String },
}

/// The selectors for the one supported viewer. Overridable from a JSON file
/// (`VIEWER_PROFILE`) when the viewer markup shifts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViewerProfile {
    pub age_gate: String,
    pub viewer_root: String,
    pub loading: String,
    pub surface: String,
    pub counter: String,
    pub advance: AdvanceAction,
}

impl Default for ViewerProfile {
    fn default() -> Self {
        Self {
            age_gate: r#"a[href*="declared=yes"]"#.to_string(),
            viewer_root: "#viewer".to_string(),
            loading: ".loading, #loading".to_string(),
            surface: "#viewer canvas".to_string(),
            counter: "#pageSliderCounter".to_string(),
            // right-to-left reading order
            advance: AdvanceAction::Key {
                target: "#viewer".to_string(),
                key: "ArrowLeft".to_string(),
            },
        }
    }
}

impl ViewerProfile {
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read viewer profile {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse viewer profile {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub age_gate_timeout: Duration,
    pub ready_timeout: Duration,
    pub element_timeout: Duration,
    pub settle: Duration,
    pub max_pages: usize,
    pub max_stalls: u32,
    pub diagnostics_dir: PathBuf,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            age_gate_timeout: Duration::from_secs(5),
            ready_timeout: Duration::from_secs(30),
            element_timeout: Duration::from_secs(5),
            settle: Duration::from_millis(1500),
            max_pages: 500,
            max_stalls: 2,
            diagnostics_dir: PathBuf::from("logs/diagnostics"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPage {
    /// 1-based.
    pub ordinal: usize,
    pub path: PathBuf,
}

/// Why a capture run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Counter reached the known total.
    Completed,
    /// The page cap was hit before the viewer ran out.
    PageCap,
    NavigationFailed,
    ViewerTimeout,
    SurfaceMissing,
    AdvanceMissing,
    Stalled,
    DriverFailure,
}

impl Termination {
    pub fn is_error(self) -> bool {
        !matches!(self, Termination::Completed | Termination::PageCap)
    }
}

#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub pages: Vec<CapturedPage>,
    pub document: Option<PathBuf>,
    pub termination: Termination,
    pub total_pages: Option<u32>,
    pub diagnostics: Vec<PathBuf>,
}

impl CaptureOutcome {
    pub fn failed(termination: Termination) -> Self {
        Self {
            pages: Vec::new(),
            document: None,
            termination,
            total_pages: None,
            diagnostics: Vec::new(),
        }
    }
}

/// Parse `"current/total"`. Anything malformed is `(0, 0)`.
pub fn parse_page_counter(text: &str) -> (u32, u32) {
    let Some((cur, total)) = text.split_once('/') else {
        return (0, 0);
    };
    match (cur.trim().parse::<u32>(), total.trim().parse::<u32>()) {
        (Ok(c), Ok(t)) => (c, t),
        _ => (0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_parsing() {
        assert_eq!(parse_page_counter("1/27"), (1, 27));
        assert_eq!(parse_page_counter(" 3 / 9 "), (3, 9));
        assert_eq!(parse_page_counter(""), (0, 0));
        assert_eq!(parse_page_counter("3 of 9"), (0, 0));
        assert_eq!(parse_page_counter("a/b"), (0, 0));
    }

    #[test]
    fn profile_overrides_keep_defaults() {
        let profile: ViewerProfile = serde_json::from_str(
            r##"{ "counter": "#pageCounter", "advance": { "kind": "click", "selector": ".next" } }"##,
        )
        .unwrap();
        assert_eq!(profile.counter, "#pageCounter");
        assert_eq!(profile.viewer_root, "#viewer");
        assert_eq!(
            profile.advance,
            AdvanceAction::Click { selector: ".next".into() }
        );
    }
}

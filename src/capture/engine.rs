use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::document::assemble_pdf;
use super::driver::{DriverError, ViewerDriver};
use super::{
    parse_page_counter, AdvanceAction, CaptureOutcome, CaptureSettings, CapturedPage,
    Termination, ViewerProfile,
};

/// Retry interval while waiting for a page surface or the advance control.
const ELEMENT_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Start,
    AgeGate,
    ViewerLoading,
    ViewerReady,
    CapturePage,
    AdvancePage,
    Done(Termination),
    Error(Termination),
}

#[derive(Debug, Clone)]
pub struct ViewerCaptureEngine {
    profile: ViewerProfile,
    settings: CaptureSettings,
}

/// Mutable state of one capture run.
struct Run {
    pages: Vec<CapturedPage>,
    counter: (u32, u32),
    stalls: u32,
}

impl ViewerCaptureEngine {
    pub fn new(profile: ViewerProfile, settings: CaptureSettings) -> Self {
        Self { profile, settings }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Drive the viewer at `viewer_url` to completion, writing
    /// `page_NNN.png` files and `{label}.pdf` into `out_dir`.
    ///
    /// Never fails: a run that ends in `Error` still returns the pages it got.
    pub async fn capture(
        &self,
        driver: &mut dyn ViewerDriver,
        viewer_url: &str,
        label: &str,
        out_dir: &Path,
    ) -> CaptureOutcome {
        let mut run = Run {
            pages: Vec::new(),
            counter: (0, 0),
            stalls: 0,
        };
        let mut state = CaptureState::Start;
        let termination = loop {
            let next = self.step(state, driver, viewer_url, out_dir, &mut run).await;
            debug!(label, from = ?state, to = ?next, "capture transition");
            match next {
                CaptureState::Done(t) | CaptureState::Error(t) => {
                    state = next;
                    break t;
                }
                _ => state = next,
            }
        };

        let mut diagnostics = Vec::new();
        if let CaptureState::Error(reason) = state {
            if ran_out_of_pages(reason, run.pages.len(), run.counter) {
                info!(label, pages = run.pages.len(), "viewer ran out of pages");
            } else {
                warn!(
                    label,
                    ?reason,
                    pages = run.pages.len(),
                    counter = ?run.counter,
                    "viewer capture ended in error"
                );
            }
            diagnostics = self.save_diagnostics(driver, label).await;
        }

        let document = if run.pages.is_empty() {
            None
        } else {
            let dest = out_dir.join(format!("{label}.pdf"));
            match assemble_pdf(&run.pages, &dest) {
                Ok(path) => Some(path),
                Err(e) => {
                    error!(label, error = %e, "pdf assembly failed");
                    None
                }
            }
        };

        info!(
            label,
            pages = run.pages.len(),
            total = run.counter.1,
            termination = ?termination,
            "viewer capture finished"
        );
        CaptureOutcome {
            pages: run.pages,
            document,
            termination,
            total_pages: (run.counter.1 > 0).then_some(run.counter.1),
            diagnostics,
        }
    }

    async fn step(
        &self,
        state: CaptureState,
        driver: &mut dyn ViewerDriver,
        viewer_url: &str,
        out_dir: &Path,
        run: &mut Run,
    ) -> CaptureState {
        let p = &self.profile;
        let s = &self.settings;
        match state {
            CaptureState::Start => match driver.goto(viewer_url).await {
                Ok(()) => CaptureState::AgeGate,
                Err(e) => {
                    error!(url = viewer_url, error = %e, "navigation failed");
                    CaptureState::Error(Termination::NavigationFailed)
                }
            },
            CaptureState::AgeGate => {
                match driver.wait_for(&p.age_gate, s.age_gate_timeout).await {
                    Ok(true) => match driver.click(&p.age_gate).await {
                        Ok(_) => info!("age gate confirmed"),
                        Err(e) => warn!(error = %e, "age gate click failed"),
                    },
                    Ok(false) => debug!("no age gate shown"),
                    Err(e) => warn!(error = %e, "age gate check failed"),
                }
                CaptureState::ViewerLoading
            }
            CaptureState::ViewerLoading => {
                if let Err(e) = driver.goto(viewer_url).await {
                    error!(url = viewer_url, error = %e, "viewer navigation failed");
                    return CaptureState::Error(Termination::NavigationFailed);
                }
                match driver.wait_for(&p.viewer_root, s.ready_timeout).await {
                    Ok(true) => {}
                    Ok(false) => return CaptureState::Error(Termination::ViewerTimeout),
                    Err(_) => return CaptureState::Error(Termination::DriverFailure),
                }
                match driver.wait_gone(&p.loading, s.ready_timeout).await {
                    Ok(true) => CaptureState::ViewerReady,
                    Ok(false) => CaptureState::Error(Termination::ViewerTimeout),
                    Err(_) => CaptureState::Error(Termination::DriverFailure),
                }
            }
            CaptureState::ViewerReady => {
                tokio::time::sleep(s.settle).await;
                CaptureState::CapturePage
            }
            CaptureState::CapturePage => {
                run.counter = self.read_counter(driver).await;
                let ordinal = run.pages.len() + 1;
                let dest = out_dir.join(format!("page_{ordinal:03}.png"));
                match self.capture_within(driver, &dest).await {
                    Ok(true) => {
                        debug!(ordinal, counter = ?run.counter, "page captured");
                        run.pages.push(CapturedPage {
                            ordinal,
                            path: dest,
                        });
                    }
                    Ok(false) => return CaptureState::Error(Termination::SurfaceMissing),
                    Err(e) => {
                        error!(ordinal, error = %e, "page capture failed");
                        return CaptureState::Error(Termination::DriverFailure);
                    }
                }
                let (current, total) = run.counter;
                if total > 0 && current >= total {
                    CaptureState::Done(Termination::Completed)
                } else if run.pages.len() >= s.max_pages {
                    warn!(max_pages = s.max_pages, "page cap reached");
                    CaptureState::Done(Termination::PageCap)
                } else {
                    CaptureState::AdvancePage
                }
            }
            CaptureState::AdvancePage => {
                let before = run.counter;
                match self.advance_within(driver).await {
                    Ok(true) => {}
                    Ok(false) => return CaptureState::Error(Termination::AdvanceMissing),
                    Err(_) => return CaptureState::Error(Termination::DriverFailure),
                }
                tokio::time::sleep(s.settle).await;
                let after = self.read_counter(driver).await;
                let known_total = before.1 > 0 && after.1 > 0;
                if known_total && after.0 == before.0 {
                    run.stalls += 1;
                    warn!(stalls = run.stalls, counter = ?after, "page counter did not move");
                    if run.stalls > s.max_stalls {
                        return CaptureState::Error(Termination::Stalled);
                    }
                    // retry the advance without re-capturing the same page
                    return CaptureState::AdvancePage;
                }
                run.stalls = 0;
                run.counter = after;
                CaptureState::CapturePage
            }
            done @ (CaptureState::Done(_) | CaptureState::Error(_)) => done,
        }
    }

    /// Capture the visible surface, retrying until `element_timeout` while
    /// the next page is still rendering.
    async fn capture_within(
        &self,
        driver: &mut dyn ViewerDriver,
        dest: &Path,
    ) -> Result<bool, DriverError> {
        let deadline = Instant::now() + self.settings.element_timeout;
        loop {
            if driver.capture_visible(&self.profile.surface, dest).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(ELEMENT_POLL).await;
        }
    }

    /// Send the advance input, retrying until `element_timeout` while its
    /// target is not on the page.
    async fn advance_within(&self, driver: &mut dyn ViewerDriver) -> Result<bool, DriverError> {
        let deadline = Instant::now() + self.settings.element_timeout;
        loop {
            let sent = match &self.profile.advance {
                AdvanceAction::Key { target, key } => driver.press_key(target, key).await?,
                AdvanceAction::Click { selector } => driver.click(selector).await?,
            };
            if sent {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(ELEMENT_POLL).await;
        }
    }

    async fn read_counter(&self, driver: &mut dyn ViewerDriver) -> (u32, u32) {
        match driver.text_of(&self.profile.counter).await {
            Ok(Some(text)) => parse_page_counter(&text),
            _ => (0, 0),
        }
    }

    /// Page markup and a screenshot, stamped with the label and time.
    async fn save_diagnostics(&self, driver: &mut dyn ViewerDriver, label: &str) -> Vec<PathBuf> {
        let dir = &self.settings.diagnostics_dir;
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(dir = %dir.display(), error = %e, "cannot create diagnostics dir");
            return Vec::new();
        }
        let stem = format!("{label}_{}", Utc::now().format("%Y%m%d_%H%M%S"));
        let mut saved = Vec::new();

        let html = dir.join(format!("{stem}.html"));
        match driver.page_source().await {
            Ok(source) => match tokio::fs::write(&html, source).await {
                Ok(()) => saved.push(html),
                Err(e) => warn!(error = %e, "writing page source failed"),
            },
            Err(e) => warn!(error = %e, "reading page source failed"),
        }

        let png = dir.join(format!("{stem}.png"));
        match driver.screenshot(&png).await {
            Ok(()) => saved.push(png),
            Err(e) => warn!(error = %e, "diagnostic screenshot failed"),
        }
        if !saved.is_empty() {
            info!(label, files = ?saved, "diagnostics saved");
        }
        saved
    }
}

/// A vanished surface is the normal end of a viewer whose total is unknown.
/// With a known total it only counts as the end once the counter reached it.
fn ran_out_of_pages(reason: Termination, pages: usize, counter: (u32, u32)) -> bool {
    let (current, total) = counter;
    reason == Termination::SurfaceMissing && pages > 0 && (total == 0 || current >= total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::driver::DriverError;
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use std::time::Duration;

    #[derive(Clone, Copy, PartialEq)]
    enum Counter {
        Known,
        Empty,
    }

    struct FakeViewer {
        total: u32,
        current: u32,
        counter: Counter,
        age_gate: bool,
        root_appears: bool,
        stuck: bool,
        age_gate_clicked: bool,
        visits: Vec<String>,
        /// How long a page takes to draw after an advance.
        render_delay: Duration,
        /// `None` means the surface never draws again after an advance.
        advanced_at: Option<Instant>,
        never_renders: bool,
        /// Advance attempts that miss their target before it shows up.
        advance_misses: u32,
    }

    impl FakeViewer {
        fn new(total: u32) -> Self {
            Self {
                total,
                current: 1,
                counter: Counter::Known,
                age_gate: true,
                root_appears: true,
                stuck: false,
                age_gate_clicked: false,
                visits: Vec::new(),
                render_delay: Duration::ZERO,
                advanced_at: None,
                never_renders: false,
                advance_misses: 0,
            }
        }
    }

    #[async_trait]
    impl ViewerDriver for FakeViewer {
        async fn goto(&mut self, url: &str) -> Result<(), DriverError> {
            self.visits.push(url.to_string());
            Ok(())
        }
        async fn wait_for(&mut self, selector: &str, _t: Duration) -> Result<bool, DriverError> {
            Ok(match selector {
                s if s.contains("declared=yes") => self.age_gate,
                "#viewer" => self.root_appears,
                _ => false,
            })
        }
        async fn wait_gone(&mut self, _s: &str, _t: Duration) -> Result<bool, DriverError> {
            Ok(true)
        }
        async fn click(&mut self, selector: &str) -> Result<bool, DriverError> {
            if selector.contains("declared=yes") {
                self.age_gate_clicked = true;
            }
            Ok(true)
        }
        async fn press_key(&mut self, _s: &str, _key: &str) -> Result<bool, DriverError> {
            if self.advance_misses > 0 {
                self.advance_misses -= 1;
                return Ok(false);
            }
            if !self.stuck {
                self.current += 1;
            }
            self.advanced_at = Some(Instant::now());
            Ok(true)
        }
        async fn text_of(&mut self, _s: &str) -> Result<Option<String>, DriverError> {
            Ok(match self.counter {
                Counter::Known => Some(format!("{}/{}", self.current, self.total)),
                Counter::Empty => Some(String::new()),
            })
        }
        async fn attribute(&mut self, _s: &str, _n: &str) -> Result<Option<String>, DriverError> {
            Ok(None)
        }
        async fn capture_visible(&mut self, _s: &str, dest: &Path) -> Result<bool, DriverError> {
            if self.current > self.total {
                return Ok(false);
            }
            if let Some(at) = self.advanced_at {
                if self.never_renders || Instant::now() < at + self.render_delay {
                    return Ok(false);
                }
            }
            RgbImage::from_pixel(6, 9, Rgb([self.current as u8, 0, 0]))
                .save(dest)
                .map_err(|e| DriverError::Browser(e.to_string()))?;
            Ok(true)
        }
        async fn page_source(&mut self) -> Result<String, DriverError> {
            Ok("<html></html>".into())
        }
        async fn screenshot(&mut self, dest: &Path) -> Result<(), DriverError> {
            std::fs::write(dest, b"png")?;
            Ok(())
        }
    }

    fn engine(diag: &Path) -> ViewerCaptureEngine {
        ViewerCaptureEngine::new(
            ViewerProfile::default(),
            CaptureSettings {
                diagnostics_dir: diag.to_path_buf(),
                ..CaptureSettings::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn known_total_yields_ordinal_pages_and_document() {
        let work = tempfile::tempdir().unwrap();
        let diag = tempfile::tempdir().unwrap();
        let mut viewer = FakeViewer::new(3);

        let outcome = engine(diag.path())
            .capture(&mut viewer, "https://viewer.example/?cid=1", "X1", work.path())
            .await;

        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(outcome.total_pages, Some(3));
        let names: Vec<_> = outcome
            .pages
            .iter()
            .map(|p| p.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["page_001.png", "page_002.png", "page_003.png"]);
        assert_eq!(outcome.document, Some(work.path().join("X1.pdf")));
        assert!(outcome.diagnostics.is_empty());
        assert!(viewer.age_gate_clicked);
        assert_eq!(viewer.visits.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unparseable_counter_stops_when_surface_disappears() {
        let work = tempfile::tempdir().unwrap();
        let diag = tempfile::tempdir().unwrap();
        let mut viewer = FakeViewer::new(4);
        viewer.counter = Counter::Empty;

        let outcome = engine(diag.path())
            .capture(&mut viewer, "https://viewer.example/", "X2", work.path())
            .await;

        assert_eq!(outcome.termination, Termination::SurfaceMissing);
        assert_eq!(outcome.pages.len(), 4);
        assert_eq!(outcome.total_pages, None);
        assert!(outcome.document.is_some());
        assert_eq!(outcome.diagnostics.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_age_gate_is_not_an_error() {
        let work = tempfile::tempdir().unwrap();
        let diag = tempfile::tempdir().unwrap();
        let mut viewer = FakeViewer::new(1);
        viewer.age_gate = false;

        let outcome = engine(diag.path())
            .capture(&mut viewer, "https://viewer.example/", "X3", work.path())
            .await;

        assert!(!viewer.age_gate_clicked);
        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(outcome.pages.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn viewer_timeout_saves_diagnostics() {
        let work = tempfile::tempdir().unwrap();
        let diag = tempfile::tempdir().unwrap();
        let mut viewer = FakeViewer::new(3);
        viewer.root_appears = false;

        let outcome = engine(diag.path())
            .capture(&mut viewer, "https://viewer.example/", "X4", work.path())
            .await;

        assert_eq!(outcome.termination, Termination::ViewerTimeout);
        assert!(outcome.pages.is_empty());
        assert!(outcome.document.is_none());
        let exts: Vec<_> = outcome
            .diagnostics
            .iter()
            .map(|p| p.extension().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(exts, vec!["html", "png"]);
        assert!(outcome.diagnostics.iter().all(|p| p.exists()));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_counter_ends_after_max_stalls() {
        let work = tempfile::tempdir().unwrap();
        let diag = tempfile::tempdir().unwrap();
        let mut viewer = FakeViewer::new(5);
        viewer.stuck = true;

        let outcome = engine(diag.path())
            .capture(&mut viewer, "https://viewer.example/", "X5", work.path())
            .await;

        assert_eq!(outcome.termination, Termination::Stalled);
        assert_eq!(outcome.pages.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_pages_are_waited_for() {
        let work = tempfile::tempdir().unwrap();
        let diag = tempfile::tempdir().unwrap();
        let mut viewer = FakeViewer::new(3);
        // slower than the settle interval, faster than the element timeout
        viewer.render_delay = Duration::from_secs(2);

        let outcome = engine(diag.path())
            .capture(&mut viewer, "https://viewer.example/", "X6", work.path())
            .await;

        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(outcome.pages.len(), 3);
        assert!(outcome.diagnostics.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn late_advance_control_is_retried() {
        let work = tempfile::tempdir().unwrap();
        let diag = tempfile::tempdir().unwrap();
        let mut viewer = FakeViewer::new(3);
        viewer.advance_misses = 3;

        let outcome = engine(diag.path())
            .capture(&mut viewer, "https://viewer.example/", "X7", work.path())
            .await;

        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(outcome.pages.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn advance_control_missing_past_timeout_is_an_error() {
        let work = tempfile::tempdir().unwrap();
        let diag = tempfile::tempdir().unwrap();
        let mut viewer = FakeViewer::new(3);
        viewer.advance_misses = u32::MAX;

        let outcome = engine(diag.path())
            .capture(&mut viewer, "https://viewer.example/", "X8", work.path())
            .await;

        assert_eq!(outcome.termination, Termination::AdvanceMissing);
        assert_eq!(outcome.pages.len(), 1);
        assert_eq!(outcome.diagnostics.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn surface_lost_before_known_total_is_reported_short() {
        let work = tempfile::tempdir().unwrap();
        let diag = tempfile::tempdir().unwrap();
        let mut viewer = FakeViewer::new(3);
        viewer.never_renders = true;

        let outcome = engine(diag.path())
            .capture(&mut viewer, "https://viewer.example/", "X9", work.path())
            .await;

        assert_eq!(outcome.termination, Termination::SurfaceMissing);
        assert_eq!(outcome.pages.len(), 1);
        assert_eq!(outcome.total_pages, Some(3));
        assert!(!ran_out_of_pages(outcome.termination, 1, (2, 3)));
    }

    #[test]
    fn end_of_viewer_classification() {
        assert!(ran_out_of_pages(Termination::SurfaceMissing, 4, (0, 0)));
        assert!(ran_out_of_pages(Termination::SurfaceMissing, 3, (3, 3)));
        assert!(!ran_out_of_pages(Termination::SurfaceMissing, 1, (2, 3)));
        assert!(!ran_out_of_pages(Termination::SurfaceMissing, 0, (0, 0)));
        assert!(!ran_out_of_pages(Termination::Stalled, 2, (0, 0)));
    }
}

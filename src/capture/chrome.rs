//! Headless Chromium implementation of [`ViewerDriver`] (chromiumoxide / CDP).

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::driver::{DriverError, ViewerDriver};
use super::engine::ViewerCaptureEngine;
use super::trailer::{is_direct_mp4, needs_player, resolve_via_player};
use super::{CaptureOutcome, Termination};

const POLL: Duration = Duration::from_millis(250);
const VISIBLE_MARK: &str = "data-harvest-visible";

fn browser_err(e: impl std::fmt::Display) -> DriverError {
    DriverError::Browser(e.to_string())
}

#[derive(Debug, Clone)]
pub struct ChromeLaunch {
    pub headless: bool,
    pub executable: Option<PathBuf>,
}

impl Default for ChromeLaunch {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
        }
    }
}

pub struct ChromeViewerDriver {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromeViewerDriver {
    pub async fn launch(opts: &ChromeLaunch) -> Result<Self, DriverError> {
        let mut builder = BrowserConfig::builder()
            .window_size(1200, 2000)
            .no_sandbox()
            .arg("--disable-gpu");
        if !opts.headless {
            builder = builder.with_head();
        }
        if let Some(exe) = &opts.executable {
            builder = builder.chrome_executable(exe);
        }
        let config = builder.build().map_err(DriverError::Browser)?;
        let (browser, mut handler) = Browser::launch(config).await.map_err(browser_err)?;
        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });
        let page = browser.new_page("about:blank").await.map_err(browser_err)?;
        debug!("chromium launched");
        Ok(Self {
            browser,
            page,
            handler,
        })
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "closing browser failed");
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T, DriverError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| DriverError::Script(e.to_string()))?
            .into_value::<T>()
            .map_err(|e| DriverError::Script(e.to_string()))
    }

    /// Number of `selector` matches that are laid out and not hidden.
    async fn visible_count(&self, selector: &str) -> Result<u32, DriverError> {
        let sel = serde_json::to_string(selector).map_err(|e| DriverError::Script(e.to_string()))?;
        self.eval(format!(
            r#"(() => Array.from(document.querySelectorAll({sel})).filter(e => {{
                const r = e.getBoundingClientRect();
                const s = getComputedStyle(e);
                return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
            }}).length)()"#
        ))
        .await
    }

    /// Tag the one match that intersects the viewport so it can be addressed.
    async fn mark_visible(&self, selector: &str) -> Result<bool, DriverError> {
        let sel = serde_json::to_string(selector).map_err(|e| DriverError::Script(e.to_string()))?;
        self.eval(format!(
            r#"(() => {{
                document.querySelectorAll('[{VISIBLE_MARK}]').forEach(e => e.removeAttribute('{VISIBLE_MARK}'));
                const vw = window.innerWidth, vh = window.innerHeight;
                const hit = Array.from(document.querySelectorAll({sel})).find(e => {{
                    const r = e.getBoundingClientRect();
                    const s = getComputedStyle(e);
                    return r.width > 0 && r.height > 0 && r.right > 0 && r.bottom > 0
                        && r.left < vw && r.top < vh
                        && s.visibility !== 'hidden' && s.display !== 'none';
                }});
                if (!hit) return false;
                hit.setAttribute('{VISIBLE_MARK}', '1');
                return true;
            }})()"#
        ))
        .await
    }
}

#[async_trait]
impl ViewerDriver for ChromeViewerDriver {
    async fn goto(&mut self, url: &str) -> Result<(), DriverError> {
        self.page.goto(url).await.map_err(browser_err)?;
        Ok(())
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL).await;
        }
    }

    async fn wait_gone(&mut self, selector: &str, timeout: Duration) -> Result<bool, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.visible_count(selector).await? == 0 {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL).await;
        }
    }

    async fn click(&mut self, selector: &str) -> Result<bool, DriverError> {
        let Ok(el) = self.page.find_element(selector).await else {
            return Ok(false);
        };
        el.click().await.map_err(browser_err)?;
        Ok(true)
    }

    async fn press_key(&mut self, selector: &str, key: &str) -> Result<bool, DriverError> {
        let Ok(el) = self.page.find_element(selector).await else {
            return Ok(false);
        };
        el.press_key(key).await.map_err(browser_err)?;
        Ok(true)
    }

    async fn text_of(&mut self, selector: &str) -> Result<Option<String>, DriverError> {
        let Ok(el) = self.page.find_element(selector).await else {
            return Ok(None);
        };
        el.inner_text().await.map_err(browser_err)
    }

    async fn attribute(
        &mut self,
        selector: &str,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let Ok(el) = self.page.find_element(selector).await else {
            return Ok(None);
        };
        el.attribute(name).await.map_err(browser_err)
    }

    async fn capture_visible(&mut self, selector: &str, dest: &Path) -> Result<bool, DriverError> {
        if !self.mark_visible(selector).await? {
            return Ok(false);
        }
        let el = self
            .page
            .find_element(format!("[{VISIBLE_MARK}]"))
            .await
            .map_err(browser_err)?;
        let png = el
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(browser_err)?;
        tokio::fs::write(dest, png).await?;
        Ok(true)
    }

    async fn page_source(&mut self) -> Result<String, DriverError> {
        self.page.content().await.map_err(browser_err)
    }

    async fn screenshot(&mut self, dest: &Path) -> Result<(), DriverError> {
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), dest)
            .await
            .map_err(browser_err)?;
        Ok(())
    }
}

/// Browser-backed media acquisition used by the orchestrator.
#[async_trait]
pub trait BrowserMedia: Send + Sync {
    async fn capture_viewer(&self, label: &str, viewer_url: &str, out_dir: &Path)
        -> CaptureOutcome;

    /// Playable MP4 URL for a catalog trailer link, if one can be found.
    async fn resolve_trailer(&self, page_url: &str) -> Option<String>;
}

/// Launches a fresh browser per call and always shuts it down.
pub struct ChromeMedia {
    engine: ViewerCaptureEngine,
    launch: ChromeLaunch,
}

impl ChromeMedia {
    pub fn new(engine: ViewerCaptureEngine, launch: ChromeLaunch) -> Self {
        Self { engine, launch }
    }
}

#[async_trait]
impl BrowserMedia for ChromeMedia {
    async fn capture_viewer(
        &self,
        label: &str,
        viewer_url: &str,
        out_dir: &Path,
    ) -> CaptureOutcome {
        let mut driver = match ChromeViewerDriver::launch(&self.launch).await {
            Ok(d) => d,
            Err(e) => {
                warn!(label, error = %e, "browser launch failed");
                return CaptureOutcome::failed(Termination::DriverFailure);
            }
        };
        let outcome = self
            .engine
            .capture(&mut driver, viewer_url, label, out_dir)
            .await;
        driver.close().await;
        outcome
    }

    async fn resolve_trailer(&self, page_url: &str) -> Option<String> {
        if is_direct_mp4(page_url) {
            return Some(page_url.to_string());
        }
        if !needs_player(page_url) {
            warn!(page_url, "unrecognised trailer link");
            return None;
        }
        let mut driver = match ChromeViewerDriver::launch(&self.launch).await {
            Ok(d) => d,
            Err(e) => {
                warn!(page_url, error = %e, "browser launch failed");
                return None;
            }
        };
        let resolved = match resolve_via_player(&mut driver, page_url).await {
            Ok(url) => url,
            Err(e) => {
                warn!(page_url, error = %e, "trailer resolution failed");
                None
            }
        };
        driver.close().await;
        resolved
    }
}

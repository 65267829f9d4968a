use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("browser: {0}")]
    Browser(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("script: {0}")]
    Script(String),
}

/// The browser capabilities the capture engine needs, addressed by CSS selector.
///
/// Lookups that can legitimately miss return `Ok(false)` / `Ok(None)`;
/// `Err` is reserved for a broken session.
#[async_trait]
pub trait ViewerDriver: Send {
    async fn goto(&mut self, url: &str) -> Result<(), DriverError>;

    /// Wait until `selector` matches, up to `timeout`.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool, DriverError>;

    /// Wait until nothing matches `selector`, up to `timeout`.
    async fn wait_gone(&mut self, selector: &str, timeout: Duration) -> Result<bool, DriverError>;

    async fn click(&mut self, selector: &str) -> Result<bool, DriverError>;

    async fn press_key(&mut self, selector: &str, key: &str) -> Result<bool, DriverError>;

    async fn text_of(&mut self, selector: &str) -> Result<Option<String>, DriverError>;

    async fn attribute(&mut self, selector: &str, name: &str)
        -> Result<Option<String>, DriverError>;

    /// Screenshot the single currently visible element among the `selector`
    /// matches into `dest` as PNG. `Ok(false)` when none is visible.
    async fn capture_visible(&mut self, selector: &str, dest: &Path) -> Result<bool, DriverError>;

    async fn page_source(&mut self) -> Result<String, DriverError>;

    async fn screenshot(&mut self, dest: &Path) -> Result<(), DriverError>;
}

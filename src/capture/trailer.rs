//! Turning a catalog trailer link into a playable MP4 URL.

use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use super::driver::{DriverError, ViewerDriver};

const PLAYER_TIMEOUT: Duration = Duration::from_secs(15);

/// Trailer links are either direct MP4s or HTML player pages that embed the
/// video through an iframe.
pub fn needs_player(url: &str) -> bool {
    let path = Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());
    path.ends_with(".html") || url.contains("litevideo")
}

pub fn is_direct_mp4(url: &str) -> bool {
    Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase().ends_with(".mp4"))
        .unwrap_or(false)
}

/// Open the player page, follow its iframe and read the `<video>` source.
/// Relative sources are resolved against the page that declared them.
pub async fn resolve_via_player(
    driver: &mut dyn ViewerDriver,
    page_url: &str,
) -> Result<Option<String>, DriverError> {
    driver.goto(page_url).await?;
    if !driver.wait_for("iframe", PLAYER_TIMEOUT).await? {
        warn!(page_url, "player page has no iframe");
        return Ok(None);
    }
    let Some(frame_src) = driver.attribute("iframe", "src").await? else {
        return Ok(None);
    };
    let Some(frame_url) = join(page_url, &frame_src) else {
        return Ok(None);
    };
    debug!(frame = %frame_url, "following player iframe");

    driver.goto(&frame_url).await?;
    if !driver.wait_for("video", PLAYER_TIMEOUT).await? {
        warn!(frame = %frame_url, "player iframe has no video element");
        return Ok(None);
    }
    let video = driver
        .attribute("video", "src")
        .await?
        .and_then(|src| join(&frame_url, &src));
    if let Some(v) = &video {
        info!(video = %v, "trailer resolved");
    }
    Ok(video)
}

fn join(base: &str, reference: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }
    let base = Url::parse(base).ok()?;
    base.join(reference).ok().map(String::from)
}

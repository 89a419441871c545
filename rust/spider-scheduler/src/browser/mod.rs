//! Headless-browser screenshot routine.
//!
//! Opens the page with the stored session cookies, waits for the first
//! content block, removes the great-grandparent of that block (on threaded
//! timelines this is the opening post) and screenshots the block that is
//! first afterwards.
//!
//! Needs the `browser` feature; without it [`capture_first_block`] fails.

pub mod cookies;

pub use cookies::{load_cookies, BrowserCookie, SameSite};

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

use crate::config::AppConfig;

/// Everything the screenshot routine needs from configuration.
#[derive(Debug, Clone)]
pub struct ScreenshotOptions {
    pub cookie_file: PathBuf,
    pub output_dir: PathBuf,
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
    pub content_selector: String,
    pub content_timeout: Duration,
}

impl ScreenshotOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            cookie_file: config.paths.cookie.clone(),
            output_dir: config.paths.screenshot.clone(),
            headless: config.browser.headless,
            chrome_executable: config.browser.chrome_executable.clone(),
            content_selector: config.browser.content_selector.clone(),
            content_timeout: Duration::from_secs(config.browser.content_timeout_secs),
        }
    }
}

/// Result payload of a capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenshotOutcome {
    /// Saved PNG.
    pub screenshot: PathBuf,
    /// Number of content blocks before the removal.
    pub matched: u64,
}

/// Path for a screenshot taken at `unix_secs`.
pub fn screenshot_path(dir: &Path, unix_secs: i64) -> PathBuf {
    dir.join(format!("{unix_secs}.png"))
}

/// Most recently modified PNG in `dir`, if any.
pub async fn latest_screenshot(dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to list {}", dir.display()));
        }
    };

    let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_png = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("png"));
        if !is_png {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified()?;
        // ties go to the lexically larger (later timestamped) name
        let newer = latest
            .as_ref()
            .is_none_or(|(t, p)| modified > *t || (modified == *t && path > *p));
        if newer {
            latest = Some((modified, path));
        }
    }
    Ok(latest.map(|(_, path)| path))
}

#[cfg(feature = "browser")]
const REMOVE_ANCESTOR_JS: &str = r"
(() => {
    const blocks = document.querySelectorAll(__SELECTOR__);
    const first = blocks[0];
    const ancestor = first && first.parentElement && first.parentElement.parentElement
        && first.parentElement.parentElement.parentElement;
    if (ancestor) { ancestor.remove(); }
    return blocks.length;
})()
";

/// Capture the first content block of `url`.
#[cfg(feature = "browser")]
pub async fn capture_first_block(
    options: &ScreenshotOptions,
    url: &str,
) -> anyhow::Result<ScreenshotOutcome> {
    use chromiumoxide::{Browser, BrowserConfig};
    use futures::StreamExt;

    let url = url::Url::parse(url).with_context(|| format!("Invalid URL '{url}'"))?;

    tokio::fs::create_dir_all(&options.output_dir)
        .await
        .with_context(|| format!("Failed to create {}", options.output_dir.display()))?;

    let mut builder = BrowserConfig::builder()
        .arg("--disable-dev-shm-usage")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--no-sandbox")
        .arg("--disable-gpu");
    if let Some(executable) = &options.chrome_executable {
        builder = builder.chrome_executable(executable);
    }
    if !options.headless {
        builder = builder.with_head();
    }
    let config = builder
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))?;

    tracing::info!(url = %url, headless = options.headless, "Launching browser");
    let (mut browser, mut handler) = Browser::launch(config)
        .await
        .context("Failed to launch browser")?;
    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                break;
            }
        }
    });

    let outcome = capture_with(&browser, options, url.as_str()).await;

    if let Err(e) = browser.close().await {
        tracing::warn!(error = %e, "Failed to close browser");
    }
    let _ = browser.wait().await;
    handler_task.abort();

    outcome
}

#[cfg(feature = "browser")]
async fn capture_with(
    browser: &chromiumoxide::Browser,
    options: &ScreenshotOptions,
    url: &str,
) -> anyhow::Result<ScreenshotOutcome> {
    use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;

    let page = browser
        .new_page("about:blank")
        .await
        .context("Failed to open page")?;

    let cookies = load_cookies(&options.cookie_file).await;
    let mut installed = 0_usize;
    for cookie in &cookies {
        match cookie.to_param() {
            Ok(param) => match page.set_cookie(param).await {
                Ok(_) => installed += 1,
                Err(e) => tracing::warn!(cookie = %cookie.name, error = %e, "Failed to set cookie"),
            },
            Err(e) => tracing::warn!(cookie = %cookie.name, error = %e, "Failed to build cookie"),
        }
    }
    tracing::debug!(installed, "Cookies installed");

    page.goto(url).await.with_context(|| format!("Failed to open {url}"))?;

    let selector = options.content_selector.as_str();
    tokio::time::timeout(options.content_timeout, async {
        loop {
            if page.find_element(selector).await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    })
    .await
    .with_context(|| {
        format!(
            "No '{selector}' element appeared within {}s",
            options.content_timeout.as_secs()
        )
    })?;

    let script = REMOVE_ANCESTOR_JS.replace("__SELECTOR__", &serde_json::to_string(selector)?);
    let matched: u64 = page
        .evaluate(script)
        .await
        .context("Failed to remove leading block")?
        .into_value()
        .context("Unexpected block count")?;
    tracing::info!(url = %url, matched, "Content blocks found");

    let target = page
        .find_element(selector)
        .await
        .context("No content block left to capture")?;
    let path = screenshot_path(&options.output_dir, chrono::Utc::now().timestamp());
    target
        .save_screenshot(CaptureScreenshotFormat::Png, &path)
        .await
        .with_context(|| format!("Failed to save screenshot to {}", path.display()))?;
    tracing::info!(path = %path.display(), "Screenshot saved");

    if let Err(e) = page.close().await {
        tracing::debug!(error = %e, "Failed to close page");
    }

    Ok(ScreenshotOutcome {
        screenshot: path,
        matched,
    })
}

/// Capture the first content block of `url`.
#[cfg(not(feature = "browser"))]
pub async fn capture_first_block(
    _options: &ScreenshotOptions,
    _url: &str,
) -> anyhow::Result<ScreenshotOutcome> {
    anyhow::bail!("Browser support not compiled. Rebuild with: cargo build --features browser")
}

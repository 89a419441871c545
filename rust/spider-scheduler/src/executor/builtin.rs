//! Routines shipped with the service.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::{json, Value};

use super::registry::{RoutineRegistry, RunContext, SpiderRoutine};
use crate::browser::ScreenshotOptions;

/// Module path of the HTTP routines.
pub const HTTP_MODULE: &str = "builtin.http";
/// Module path of the browser routines.
pub const BROWSER_MODULE: &str = "builtin.browser";

const USER_AGENT: &str = concat!("spider-scheduler/", env!("CARGO_PKG_VERSION"));

/// Register every built-in routine.
pub fn register_builtins(registry: &RoutineRegistry, screenshots: &ScreenshotOptions) {
    registry.register(HTTP_MODULE, "FetchStatus", || Box::new(FetchStatus::default()));

    #[cfg(feature = "browser")]
    {
        let options = screenshots.clone();
        registry.register(BROWSER_MODULE, "ArticleScreenshot", move || {
            Box::new(ArticleScreenshot {
                options: options.clone(),
            })
        });
    }
    #[cfg(not(feature = "browser"))]
    tracing::debug!(
        cookie_file = %screenshots.cookie_file.display(),
        "Browser support not compiled, {BROWSER_MODULE} routines unavailable"
    );
}

/// GET the target URL and report status, final URL, size and `<title>`.
#[derive(Debug, Clone)]
pub struct FetchStatus {
    timeout: Duration,
}

impl Default for FetchStatus {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl SpiderRoutine for FetchStatus {
    async fn run(&self, ctx: &RunContext) -> anyhow::Result<Value> {
        let url = ctx
            .target_url()
            .context("No target URL: pass params.url or name the spider after its URL")?;

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let response = client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read body of {url}"))?;

        Ok(json!({
            "url": url.as_str(),
            "final_url": final_url,
            "status": status,
            "content_length": body.len(),
            "title": extract_title(&body),
        }))
    }
}

/// Screenshot the first content block of the target URL.
#[cfg(feature = "browser")]
#[derive(Debug, Clone)]
pub struct ArticleScreenshot {
    options: ScreenshotOptions,
}

#[cfg(feature = "browser")]
#[async_trait]
impl SpiderRoutine for ArticleScreenshot {
    async fn run(&self, ctx: &RunContext) -> anyhow::Result<Value> {
        let url = ctx
            .target_url()
            .context("No target URL: pass params.url or name the spider after its URL")?;
        let outcome = crate::browser::capture_first_block(&self.options, url.as_str()).await?;
        Ok(serde_json::to_value(outcome)?)
    }
}

/// Text of the first `<title>` element, whitespace collapsed.
pub fn extract_title(html: &str) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let document = Html::parse_document(html);
    let element = document.select(&selector).next()?;
    let title = element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ");
    (!title.is_empty()).then_some(title)
}

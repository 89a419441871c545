//! Cookie loading for browser sessions.
//!
//! The cookie file is a JSON array as exported by browser extensions or
//! Playwright's `context.cookies()`. Entries without a name or domain are
//! skipped and `sameSite` values are normalised to `Strict`/`Lax`/`None`.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Normalised `sameSite` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    /// Case-insensitive mapping; anything else is dropped.
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "lax" => Some(Self::Lax),
            "none" | "no_restriction" => Some(Self::None),
            _ => None,
        }
    }
}

/// One cookie ready to be installed in a browser page.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: Option<String>,
    pub secure: Option<bool>,
    pub http_only: Option<bool>,
    pub same_site: Option<SameSite>,
    /// Unix seconds; session cookies have none.
    pub expires: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCookie {
    #[serde(default, alias = "key")]
    name: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    secure: Option<bool>,
    #[serde(default)]
    http_only: Option<bool>,
    #[serde(default)]
    same_site: Option<String>,
    #[serde(default, alias = "expirationDate")]
    expires: Option<f64>,
}

impl RawCookie {
    fn normalize(self) -> Option<BrowserCookie> {
        let name = self.name.filter(|n| !n.is_empty())?;
        let domain = self.domain.filter(|d| !d.is_empty())?;
        Some(BrowserCookie {
            name,
            value: self.value.unwrap_or_default(),
            domain,
            path: self.path,
            secure: self.secure,
            http_only: self.http_only,
            same_site: self.same_site.as_deref().and_then(SameSite::normalize),
            // -1 marks a session cookie in Playwright exports
            expires: self.expires.filter(|e| *e > 0.0),
        })
    }
}

/// Parse a cookie export. Malformed entries are skipped individually.
pub fn parse_cookies(json: &str) -> anyhow::Result<Vec<BrowserCookie>> {
    let entries: Vec<Value> = serde_json::from_str(json)?;
    let cookies = entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<RawCookie>(entry) {
            Ok(raw) => raw.normalize(),
            Err(e) => {
                debug!(error = %e, "Skipping malformed cookie entry");
                None
            }
        })
        .collect();
    Ok(cookies)
}

/// Load cookies from `path`.
///
/// A missing or unreadable file yields no cookies, not an error.
pub async fn load_cookies(path: &Path) -> Vec<BrowserCookie> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cookie file not readable, continuing without cookies");
            return Vec::new();
        }
    };

    match parse_cookies(&content) {
        Ok(cookies) => {
            debug!(path = %path.display(), count = cookies.len(), "Loaded cookies");
            cookies
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cookie file is not a JSON array, continuing without cookies");
            Vec::new()
        }
    }
}

#[cfg(feature = "browser")]
impl BrowserCookie {
    /// Convert into a CDP `Network.setCookie` parameter.
    pub fn to_param(
        &self,
    ) -> Result<chromiumoxide::cdp::browser_protocol::network::CookieParam, String> {
        use chromiumoxide::cdp::browser_protocol::network::{
            CookieParam, CookieSameSite, TimeSinceEpoch,
        };

        let mut builder = CookieParam::builder()
            .name(self.name.clone())
            .value(self.value.clone())
            .domain(self.domain.clone());
        if let Some(path) = &self.path {
            builder = builder.path(path.clone());
        }
        if let Some(secure) = self.secure {
            builder = builder.secure(secure);
        }
        if let Some(http_only) = self.http_only {
            builder = builder.http_only(http_only);
        }
        if let Some(same_site) = self.same_site {
            builder = builder.same_site(match same_site {
                SameSite::Strict => CookieSameSite::Strict,
                SameSite::Lax => CookieSameSite::Lax,
                SameSite::None => CookieSameSite::None,
            });
        }
        if let Some(expires) = self.expires {
            builder = builder.expires(TimeSinceEpoch::new(expires));
        }
        builder.build()
    }
}

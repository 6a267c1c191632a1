//! Remote video providers (Vimeo, YouTube)
//!
//! Provider media are stored as `<provider>://<id>` and never downloaded.
//! Only their poster image is fetched when a still version is requested.

use anyhow::{Context, Result, anyhow};
use log::info;
use reqwest::Url;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::background::make::handler::{TempDownload, download};
use crate::models::Locator;

const OEMBED_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub provider: String,
    pub locator: Locator,
    pub thumbnail_url: Option<String>,
    pub title: Option<String>,
}

pub trait ProviderResolver: Send + Sync {
    /// Identify the provider behind an external URL and fetch its metadata.
    fn resolve(&self, url: &str) -> Result<ProviderInfo>;

    /// Poster image of an already stored provider locator.
    fn thumbnail_url(&self, locator: &Locator) -> Result<String>;

    /// Download the poster of `locator` into `temp_root`.
    fn fetch_poster(&self, locator: &Locator, temp_root: &Path) -> Result<TempDownload> {
        download(&self.thumbnail_url(locator)?, temp_root)
    }
}

/// `(provider, id)` for a recognised Vimeo or YouTube page URL.
pub fn parse_provider_url(url: &str) -> Option<(&'static str, String)> {
    let url = Url::parse(url).ok()?;
    let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());

    match host {
        "vimeo.com" | "player.vimeo.com" => segments
            .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
            .last()
            .map(|id| ("vimeo", id.to_string())),
        "youtu.be" => segments.next().map(|id| ("youtube", id.to_string())),
        "youtube.com" => match segments.next()? {
            "watch" => url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, id)| ("youtube", id.into_owned())),
            "embed" | "shorts" | "live" => segments.next().map(|id| ("youtube", id.to_string())),
            _ => None,
        },
        _ => None,
    }
}

/// Public page URL of a provider locator.
pub fn canonical_url(locator: &Locator) -> Option<String> {
    match locator.scheme() {
        "vimeo" => Some(format!("https://vimeo.com/{}", locator.path())),
        "youtube" => Some(format!("https://www.youtube.com/watch?v={}", locator.path())),
        _ => None,
    }
}

fn oembed_endpoint(provider: &str, page_url: &str) -> Result<Url> {
    let (base, extra): (&str, &[(&str, &str)]) = match provider {
        "vimeo" => ("https://vimeo.com/api/oembed.json", &[]),
        "youtube" => ("https://www.youtube.com/oembed", &[("format", "json")]),
        other => return Err(anyhow!("no oEmbed endpoint for provider `{}`", other)),
    };
    let mut pairs = vec![("url", page_url)];
    pairs.extend_from_slice(extra);
    Url::parse_with_params(base, pairs).context("failed to build oEmbed URL")
}

#[derive(Debug, Deserialize)]
struct OEmbedResponse {
    title: Option<String>,
    thumbnail_url: Option<String>,
}

/// Resolver backed by the providers' public oEmbed endpoints.
///
/// Uses the blocking client, so call it from blocking threads only.
#[derive(Debug, Default, Clone)]
pub struct OEmbedResolver;

impl OEmbedResolver {
    fn fetch(&self, provider: &str, page_url: &str) -> Result<OEmbedResponse> {
        let endpoint = oembed_endpoint(provider, page_url)?;
        let client = reqwest::blocking::Client::builder()
            .timeout(OEMBED_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        let response = client
            .get(endpoint.clone())
            .send()
            .with_context(|| format!("oEmbed request to {} failed", endpoint))?
            .error_for_status()
            .with_context(|| format!("oEmbed request to {} was rejected", endpoint))?;
        response
            .json::<OEmbedResponse>()
            .with_context(|| format!("invalid oEmbed payload from {}", endpoint))
    }
}

impl ProviderResolver for OEmbedResolver {
    fn resolve(&self, url: &str) -> Result<ProviderInfo> {
        let (provider, id) =
            parse_provider_url(url).ok_or_else(|| anyhow!("{} is not a known provider URL", url))?;
        let locator = Locator::new(provider, id);
        let page_url = canonical_url(&locator).unwrap_or_else(|| url.to_string());
        let response = self.fetch(provider, &page_url)?;
        info!("Resolved {} to {}", url, locator);
        Ok(ProviderInfo {
            provider: provider.to_string(),
            locator,
            thumbnail_url: response.thumbnail_url,
            title: response.title,
        })
    }

    fn thumbnail_url(&self, locator: &Locator) -> Result<String> {
        let page_url = canonical_url(locator)
            .ok_or_else(|| anyhow!("{} is not a provider locator", locator))?;
        self.fetch(locator.scheme(), &page_url)?
            .thumbnail_url
            .ok_or_else(|| anyhow!("provider returned no thumbnail for {}", locator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vimeo_urls() {
        assert_eq!(
            parse_provider_url("https://vimeo.com/76979871"),
            Some(("vimeo", "76979871".to_string()))
        );
        assert_eq!(
            parse_provider_url("https://player.vimeo.com/video/76979871?h=abc"),
            Some(("vimeo", "76979871".to_string()))
        );
        assert_eq!(parse_provider_url("https://vimeo.com/about"), None);
    }

    #[test]
    fn test_youtube_urls() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://m.youtube.com/embed/dQw4w9WgXcQ",
        ] {
            assert_eq!(
                parse_provider_url(url),
                Some(("youtube", "dQw4w9WgXcQ".to_string())),
                "{}",
                url
            );
        }
        assert_eq!(parse_provider_url("https://www.youtube.com/feed"), None);
        assert_eq!(parse_provider_url("https://example.org/watch?v=x"), None);
    }

    #[test]
    fn test_canonical_url_and_endpoint() {
        let locator = Locator::parse("youtube://abc123").unwrap();
        let page = canonical_url(&locator).unwrap();
        assert_eq!(page, "https://www.youtube.com/watch?v=abc123");
        let endpoint = oembed_endpoint("youtube", &page).unwrap();
        assert_eq!(endpoint.host_str(), Some("www.youtube.com"));
        assert!(endpoint.query().unwrap().contains("format=json"));
        assert!(canonical_url(&Locator::parse("file://a.png").unwrap()).is_none());
    }
}

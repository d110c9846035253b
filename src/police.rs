use crate::error::Result;
use crate::http::{Method, RequestOptions, ResilientClient};
use async_trait::async_trait;
use log::{debug, warn};
use regex::Regex;
use std::sync::Arc;

#[async_trait]
pub trait PoliceRegistry: Send + Sync {
    /// Name shown next to the registry's answer.
    fn source(&self) -> &str;

    /// Free-text vehicle description, or `None` when the registry has
    /// nothing or could not be reached.
    async fn lookup(&self, plate: &str) -> Option<String>;
}

/// Public plate search page; the answer is the "связан с ..." note inside a
/// `<small>` element.
pub struct RegistrySite {
    client: Arc<ResilientClient>,
    url: String,
    source: String,
    small: Regex,
    linked: Regex,
}

impl RegistrySite {
    pub fn new(client: Arc<ResilientClient>, url: &str) -> Result<RegistrySite> {
        let source = url::Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_string))
            .unwrap_or_else(|| url.to_string());
        Ok(RegistrySite {
            client,
            url: url.to_string(),
            source,
            small: Regex::new(r"(?s)<small[^>]*>(.*?)</small>")?,
            linked: Regex::new(r"связан с\s*([^<]*\d{4})")?,
        })
    }

    fn extract(&self, html: &str) -> Option<String> {
        self.small
            .captures_iter(html)
            .filter_map(|small| self.linked.captures(small.get(1)?.as_str()))
            .filter_map(|linked| linked.get(1))
            .map(|found| found.as_str().replace(['(', ')'], "").trim().to_string())
            .find(|text| !text.is_empty())
    }
}

#[async_trait]
impl PoliceRegistry for RegistrySite {
    fn source(&self) -> &str {
        &self.source
    }

    async fn lookup(&self, plate: &str) -> Option<String> {
        let options = RequestOptions::default().query([("digits", plate)]);
        let reply = match self.client.request(Method::Get, &self.url, None, options).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Police lookup for {} failed: {}", plate, e);
                return None;
            }
        };
        match reply.text().await {
            Ok(html) => {
                let found = self.extract(&html);
                debug!("Police registry on {}: {:?}", plate, found);
                found
            }
            Err(e) => {
                warn!("Police lookup for {} failed: {}", plate, e);
                None
            }
        }
    }
}

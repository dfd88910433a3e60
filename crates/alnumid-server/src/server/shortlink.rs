//! Outbound client for the dynamic short-link API.
//!
//! Each token becomes one `POST {endpoint}?key={api_key}` carrying a
//! [`DynamicLinkRequest`]. Requests share one `governor` limiter so that the
//! whole process stays under the configured rate, however many runs are
//! reconciling at once.

use crate::server::{
    config::ShortLinkConfig,
    telemetry::{increment_resolution_passes, increment_unresolved_tokens},
};
use alnumid::{LinkResolver, Resolution};
use anyhow::Context;
use futures::{StreamExt, stream};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicLinkRequest {
    pub dynamic_link_info: DynamicLinkInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicLinkInfo {
    pub domain_uri_prefix: String,
    pub link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub android_info: Option<AndroidInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ios_info: Option<IosInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AndroidInfo {
    pub android_package_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IosInfo {
    pub ios_bundle_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortLinkResponse {
    pub short_link: Option<String>,
    pub preview_link: Option<String>,
    #[serde(default)]
    pub warning: Vec<ShortLinkWarning>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortLinkWarning {
    pub warning_code: Option<String>,
    pub warning_message: Option<String>,
}

pub struct ShortLinkClient {
    http: reqwest::Client,
    limiter: DefaultDirectRateLimiter,
    config: ShortLinkConfig,
}

impl ShortLinkClient {
    pub fn new(config: ShortLinkConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build short-link HTTP client")?;
        let limiter = RateLimiter::direct(Quota::per_second(config.requests_per_second));
        Ok(Self {
            http,
            limiter,
            config,
        })
    }

    pub fn request_for(&self, token: &str) -> DynamicLinkRequest {
        DynamicLinkRequest {
            dynamic_link_info: DynamicLinkInfo {
                domain_uri_prefix: self.config.domain_prefix.clone(),
                link: format!("{}/{token}", self.config.target_base),
                android_info: self
                    .config
                    .android_package_name
                    .clone()
                    .map(|android_package_name| AndroidInfo {
                        android_package_name,
                    }),
                ios_info: self
                    .config
                    .ios_bundle_id
                    .clone()
                    .map(|ios_bundle_id| IosInfo { ios_bundle_id }),
            },
        }
    }

    async fn lookup(&self, token: &str) -> Resolution {
        self.limiter.until_ready().await;

        let response = match self
            .http
            .post(&self.config.endpoint)
            .query(&[("key", self.config.api_key.as_str())])
            .json(&self.request_for(token))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Resolution::Failed(e.to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            return Resolution::Failed(format!("HTTP {status}"));
        }
        match response.json::<ShortLinkResponse>().await {
            Ok(ShortLinkResponse {
                short_link: Some(link),
                ..
            }) if !link.is_empty() => Resolution::Resolved(link),
            Ok(body) => {
                if let Some(preview) = &body.preview_link {
                    debug!(%token, %preview, "preview link without short link");
                }
                for w in &body.warning {
                    debug!(
                        %token,
                        code = w.warning_code.as_deref().unwrap_or_default(),
                        message = w.warning_message.as_deref().unwrap_or_default(),
                        "short-link warning"
                    );
                }
                Resolution::Missing
            }
            Err(e) => Resolution::Failed(format!("undecodable response: {e}")),
        }
    }
}

impl LinkResolver for ShortLinkClient {
    async fn resolve(&self, tokens: &[String]) -> HashMap<String, Resolution> {
        increment_resolution_passes();
        let results: HashMap<String, Resolution> = stream::iter(tokens.iter().cloned())
            .map(|token| async move {
                let resolution = self.lookup(&token).await;
                (token, resolution)
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let unresolved = results
            .values()
            .filter(|r| !matches!(r, Resolution::Resolved(_)))
            .count();
        if unresolved > 0 {
            warn!(unresolved, of = tokens.len(), "short links missing after pass");
            increment_unresolved_tokens(unresolved as u64);
        }
        results
    }
}

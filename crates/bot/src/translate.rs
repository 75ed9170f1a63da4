//! [`Translator`] adapters.

use core::time::Duration;

use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use plugin_core::services::Translator;

/// Client for a LibreTranslate-compatible `/detect` + `/translate` API.
#[derive(Clone)]
pub struct HttpTranslator {
    http: reqwest::Client,
    base: String,
    api_key: Option<String>,
}

impl core::fmt::Debug for HttpTranslator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HttpTranslator")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct DetectRequest<'a> {
    q: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct Detection {
    language: String,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

impl HttpTranslator {
    pub fn new(base: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building translator HTTP client")?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_owned(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    async fn post<B: Serialize + Sync, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.http
            .post(format!("{}/{path}", self.base))
            .json(body)
            .send()
            .await
            .with_context(|| format!("translator {path} request failed"))?
            .error_for_status()
            .with_context(|| format!("translator {path} rejected the request"))?
            .json()
            .await
            .with_context(|| format!("failed to decode translator {path} response"))
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn detect_language(&self, text: &str) -> Result<String> {
        let detections: Vec<Detection> = self
            .post(
                "detect",
                &DetectRequest {
                    q: text,
                    api_key: self.api_key.as_deref(),
                },
            )
            .await?;
        let Some(best) = detections
            .into_iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        else {
            bail!("The language of the text could not be detected");
        };
        debug!(language = %best.language, confidence = best.confidence, "Detected language");
        Ok(best.language)
    }

    async fn translate_text(&self, text: &str, source: &str, target: &str) -> Result<String> {
        let response: TranslateResponse = self
            .post(
                "translate",
                &TranslateRequest {
                    q: text,
                    source,
                    target,
                    format: "text",
                    api_key: self.api_key.as_deref(),
                },
            )
            .await?;
        Ok(response.translated_text)
    }
}

/// Used when no translation endpoint is configured.
#[derive(Debug, Default)]
pub struct UnconfiguredTranslator;

#[async_trait]
impl Translator for UnconfiguredTranslator {
    async fn detect_language(&self, _text: &str) -> Result<String> {
        bail!("Translation is not configured (set TRANSLATE_API_URL)")
    }

    async fn translate_text(&self, _text: &str, _source: &str, _target: &str) -> Result<String> {
        bail!("Translation is not configured (set TRANSLATE_API_URL)")
    }
}

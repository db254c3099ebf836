use anyhow::{anyhow, bail, Result};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

pub const DEFAULT_URL: &str = "http://localhost:8000";

/// Prediction as rendered by `POST /predict`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemotePrediction {
    pub filename: String,
    pub prediction: String,
    pub confidence: String,
    pub probabilities: BTreeMap<String, String>,
}

/// Thin HTTP client for a running X-Ray Insight service.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// `GET /`; returns the service banner.
    pub async fn root(&self) -> Result<String> {
        let url = format!("{}/", self.base_url);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            bail!("Server returned status code {}", resp.status());
        }

        let body: serde_json::Value = resp.json().await?;
        body.get("message")
            .and_then(|m| m.as_str())
            .map(String::from)
            .ok_or_else(|| anyhow!("Unexpected root response: {}", body))
    }

    /// Upload an image file as multipart field `file`.
    pub async fn predict(&self, image: &Path) -> Result<RemotePrediction> {
        let bytes = tokio::fs::read(image)
            .await
            .map_err(|e| anyhow!("Image file not found at {}: {}", image.display(), e))?;
        let filename = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let part = Part::bytes(bytes)
            .file_name(filename)
            .mime_str(mime_for(image))?;
        let form = Form::new().part("file", part);

        let url = format!("{}/predict", self.base_url);
        debug!("POST {}", url);
        let resp = self.client.post(&url).multipart(form).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            bail!("Prediction endpoint returned status code {}: {}", status, resp.text().await?);
        }

        let body: serde_json::Value = resp.json().await?;
        if let Some(error) = body.get("error").and_then(|e| e.as_str()) {
            bail!("Prediction failed: {}", error);
        }
        Ok(serde_json::from_value(body)?)
    }
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("bmp") => "image/bmp",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("tif") | Some("tiff") => "image/tiff",
        _ => "image/jpeg",
    }
}

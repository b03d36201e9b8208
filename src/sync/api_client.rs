use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::clipboard::{ClipboardEntry, ClipboardStats, EntryDto, ExportFormat, Page};
use crate::error::ApiError;

const CLIPBOARDS: &str = "/api/local/clipboards";

/// The operations a view needs from the backend.
#[async_trait]
pub trait ClipboardGateway: Send + Sync {
    async fn list_entries(&self, page: u32, size: u32) -> Result<Page<ClipboardEntry>, ApiError>;
    async fn search_entries(
        &self,
        query: &str,
        page: u32,
        size: u32,
    ) -> Result<Page<ClipboardEntry>, ApiError>;
    async fn pinned_entries(&self) -> Result<Vec<ClipboardEntry>, ApiError>;
    async fn toggle_pin(&self, id: i64) -> Result<ClipboardEntry, ApiError>;
    async fn delete_entry(&self, id: i64) -> Result<(), ApiError>;
    async fn delete_all(&self, include_pinned: bool) -> Result<(), ApiError>;
    async fn stats(&self) -> Result<ClipboardStats, ApiError>;
    async fn export(&self, format: ExportFormat, include_pinned: bool) -> Result<String, ApiError>;

    async fn delete_all_unpinned(&self) -> Result<(), ApiError> {
        self.delete_all(false).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TogglePinRequest {
    pub id: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StopResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Clone)]
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

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, CLIPBOARDS, path)
    }

    // ── Extras outside the gateway seam ─────────────────────────────────

    pub async fn recent_entries(&self, hours: u32) -> Result<Vec<ClipboardEntry>, ApiError> {
        let resp = self
            .client
            .get(self.url("/recent"))
            .query(&[("hours", hours)])
            .send()
            .await
            .map_err(ApiError::Network)?;
        let dtos: Vec<EntryDto> = parse_json(resp).await?;
        Ok(dtos.into_iter().map(EntryDto::normalize).collect())
    }

    pub async fn health(&self) -> Result<serde_json::Value, ApiError> {
        let resp = self
            .client
            .get(format!("{}/api/health", self.base_url))
            .send()
            .await
            .map_err(ApiError::Network)?;
        parse_json(resp).await
    }

    /// Ask the backend to stop capturing the system clipboard.
    pub async fn stop_monitoring(&self) -> Result<StopResponse, ApiError> {
        let resp = self
            .client
            .post(self.url("/stop"))
            .send()
            .await
            .map_err(ApiError::Network)?;
        parse_json(resp).await
    }
}

#[async_trait]
impl ClipboardGateway for ApiClient {
    async fn list_entries(&self, page: u32, size: u32) -> Result<Page<ClipboardEntry>, ApiError> {
        let resp = self
            .client
            .get(self.url(""))
            .query(&[("page", page), ("max", size)])
            .send()
            .await
            .map_err(ApiError::Network)?;
        let page: Page<EntryDto> = parse_json(resp).await?;
        Ok(page.map(EntryDto::normalize))
    }

    async fn search_entries(
        &self,
        query: &str,
        page: u32,
        size: u32,
    ) -> Result<Page<ClipboardEntry>, ApiError> {
        let resp = self
            .client
            .get(self.url("/search"))
            .query(&[
                ("query", query.to_string()),
                ("page", page.to_string()),
                ("size", size.to_string()),
            ])
            .send()
            .await
            .map_err(ApiError::Network)?;
        let page: Page<EntryDto> = parse_json(resp).await?;
        Ok(page.map(EntryDto::normalize))
    }

    async fn pinned_entries(&self) -> Result<Vec<ClipboardEntry>, ApiError> {
        let resp = self
            .client
            .get(self.url("/pins"))
            .send()
            .await
            .map_err(ApiError::Network)?;
        let value: serde_json::Value = parse_json(resp).await?;
        Ok(entries_from_value(value))
    }

    async fn toggle_pin(&self, id: i64) -> Result<ClipboardEntry, ApiError> {
        let resp = self
            .client
            .put(self.url("/pin"))
            .json(&TogglePinRequest { id })
            .send()
            .await
            .map_err(ApiError::Network)?;
        let dto: EntryDto = parse_json(resp).await?;
        Ok(dto.normalize())
    }

    async fn delete_entry(&self, id: i64) -> Result<(), ApiError> {
        let resp = self
            .client
            .delete(self.url(&format!("/delete/{}", id)))
            .send()
            .await
            .map_err(ApiError::Network)?;
        check_status(resp).await.map(|_| ())
    }

    async fn delete_all(&self, include_pinned: bool) -> Result<(), ApiError> {
        let resp = self
            .client
            .delete(self.url("/delete"))
            .query(&[("includePinned", include_pinned)])
            .send()
            .await
            .map_err(ApiError::Network)?;
        check_status(resp).await.map(|_| ())
    }

    async fn stats(&self) -> Result<ClipboardStats, ApiError> {
        let resp = self
            .client
            .get(self.url("/stats"))
            .send()
            .await
            .map_err(ApiError::Network)?;
        parse_json(resp).await
    }

    async fn export(&self, format: ExportFormat, include_pinned: bool) -> Result<String, ApiError> {
        let resp = self
            .client
            .get(self.url(&format!("/export/{}", format.extension())))
            .query(&[("includePinned", include_pinned)])
            .send()
            .await
            .map_err(ApiError::Network)?;
        check_status(resp).await?.text().await.map_err(ApiError::Parse)
    }
}

/// The pinned endpoint has been seen returning non-array bodies; anything but an
/// array of entries reads as "no pins".
fn entries_from_value(value: serde_json::Value) -> Vec<ClipboardEntry> {
    let value = match value {
        serde_json::Value::String(s) => match serde_json::from_str(&s) {
            Ok(inner) => inner,
            Err(e) => {
                log::warn!("Pinned entries body is not JSON: {}", e);
                return Vec::new();
            }
        },
        other => other,
    };
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<EntryDto>(item).ok())
            .map(EntryDto::normalize)
            .collect(),
        _ => Vec::new(),
    }
}

async fn check_status(resp: Response) -> Result<Response, ApiError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status,
        message: extract_error(&body),
    })
}

async fn parse_json<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    check_status(resp)
        .await?
        .json::<T>()
        .await
        .map_err(ApiError::Parse)
}

fn extract_error(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("message"))?
                .as_str()
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| body.to_string())
}

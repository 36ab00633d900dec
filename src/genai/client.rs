use std::path::Path;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::GenAiError;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const IMAGE_MODEL: &str = "gemini-3-pro-image-preview";
pub const TEXT_MODEL: &str = "gemini-3-pro-preview";

/// Image bytes plus their MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Bytes,
}

impl InlineImage {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self, GenAiError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mime = mime_from_ext(&ext).ok_or_else(|| {
            GenAiError::InvalidInput(format!("unsupported image type: {}", path.display()))
        })?;
        let data = tokio::fs::read(path).await?;
        Ok(Self::new(mime, data))
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.data))
    }

    pub fn extension(&self) -> &'static str {
        ext_from_mime(&self.mime_type).unwrap_or("bin")
    }
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

fn mime_from_ext(ext: &str) -> Option<&'static str> {
    match ext {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    Image(InlineImage),
}

impl Part {
    pub fn text(t: impl Into<String>) -> Self {
        Part::Text(t.into())
    }
}

/// A hosted model that turns prompt parts into response parts.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate_content(&self, model: &str, parts: Vec<Part>) -> Result<Vec<Part>, GenAiError>;
}

// ---- wire format ----

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBlob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<WireBlob>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<WireContent>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<WireContent>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

fn to_wire(parts: Vec<Part>) -> GenerateRequest {
    let parts = parts
        .into_iter()
        .map(|p| match p {
            Part::Text(text) => WirePart {
                text: Some(text),
                ..Default::default()
            },
            Part::Image(img) => WirePart {
                inline_data: Some(WireBlob {
                    data: STANDARD.encode(&img.data),
                    mime_type: img.mime_type,
                }),
                ..Default::default()
            },
        })
        .collect();
    GenerateRequest {
        contents: vec![WireContent { parts }],
    }
}

/// Parts of the first candidate; later candidates are ignored.
fn from_wire(res: GenerateResponse) -> Result<Vec<Part>, GenAiError> {
    let Some(content) = res.candidates.into_iter().next().and_then(|c| c.content) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::with_capacity(content.parts.len());
    for part in content.parts {
        if let Some(blob) = part.inline_data {
            let data = STANDARD
                .decode(blob.data.as_bytes())
                .map_err(|e| GenAiError::InvalidResponse(format!("inline data: {e}")))?;
            out.push(Part::Image(InlineImage::new(blob.mime_type, data)));
        } else if let Some(text) = part.text {
            out.push(Part::Text(text));
        }
    }
    Ok(out)
}

/// Gemini REST client (`models/{model}:generateContent`).
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        // per-call deadlines come from the retry wrapper
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate_content(&self, model: &str, parts: Vec<Part>) -> Result<Vec<Part>, GenAiError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        );
        debug!(%model, parts = parts.len(), "generate_content");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&to_wire(parts))
            .send()
            .await
            .map_err(|e| GenAiError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GenAiError::RateLimited);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %body, "generate_content failed");
            return Err(GenAiError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| GenAiError::InvalidResponse(e.to_string()))?;
        from_wire(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Path as AxumPath, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    #[test]
    fn mime_and_extension_mapping() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
        assert_eq!(mime_from_ext("jpeg"), Some("image/jpeg"));
        assert_eq!(mime_from_ext("gif"), None);
        assert_eq!(InlineImage::new("text/plain", vec![1u8]).extension(), "bin");
    }

    #[test]
    fn data_url_is_base64() {
        let img = InlineImage::new("image/png", b"abc".to_vec());
        assert_eq!(img.to_data_url(), "data:image/png;base64,YWJj");
    }

    #[test]
    fn request_uses_camel_case_inline_data() {
        let req = to_wire(vec![
            Part::Image(InlineImage::new("image/png", b"abc".to_vec())),
            Part::text("describe"),
        ]);
        let v = serde_json::to_value(req).unwrap();
        assert_eq!(v["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(v["contents"][0]["parts"][0]["inlineData"]["data"], "YWJj");
        assert_eq!(v["contents"][0]["parts"][1]["text"], "describe");
        assert!(v["contents"][0]["parts"][1].get("inlineData").is_none());
    }

    #[test]
    fn response_without_candidates_is_empty() {
        let res: GenerateResponse = serde_json::from_value(json!({})).unwrap();
        assert!(from_wire(res).unwrap().is_empty());
    }

    #[test]
    fn malformed_inline_data_is_invalid_response() {
        let res: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"inlineData": {"mimeType": "image/png", "data": "!!!"}}]}}]
        }))
        .unwrap();
        assert!(matches!(from_wire(res), Err(GenAiError::InvalidResponse(_))));
    }

    async fn spawn_mock(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn calls_generate_content_and_decodes_parts() {
        let router = Router::new().route(
            "/v1beta/models/:call",
            post(|AxumPath(call): AxumPath<String>, headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(call, "img-model:generateContent");
                assert_eq!(headers.get("x-goog-api-key").unwrap(), "k-123");
                assert_eq!(body["contents"][0]["parts"][0]["text"], "draw");
                Json(json!({
                    "candidates": [{"content": {"parts": [
                        {"text": "here you go"},
                        {"inlineData": {"mimeType": "image/png", "data": "YWJj"}}
                    ]}}]
                }))
            }),
        );
        let base = spawn_mock(router).await;
        let client = GeminiClient::with_base_url("k-123", base);

        let parts = client
            .generate_content("img-model", vec![Part::text("draw")])
            .await
            .unwrap();
        assert_eq!(
            parts,
            vec![
                Part::text("here you go"),
                Part::Image(InlineImage::new("image/png", b"abc".to_vec())),
            ]
        );
    }

    #[tokio::test]
    async fn maps_rate_limit_and_http_errors() {
        let router = Router::new()
            .route(
                "/v1beta/models/busy:generateContent",
                post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
            )
            .route(
                "/v1beta/models/broken:generateContent",
                post(|| async { (StatusCode::BAD_GATEWAY, "upstream") }),
            );
        let base = spawn_mock(router).await;
        let client = GeminiClient::with_base_url("k", base);

        let err = client.generate_content("busy", vec![]).await.unwrap_err();
        assert!(matches!(err, GenAiError::RateLimited));

        let err = client.generate_content("broken", vec![]).await.unwrap_err();
        assert!(matches!(err, GenAiError::Http { status: 502, ref body } if body == "upstream"));
    }
}

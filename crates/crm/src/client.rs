//! Authenticated CRM HTTP client. Built once per sync run from a resolved
//! credential; carries bearer auth, the pinned API version header, and
//! JSON content negotiation. Retry/backoff is layered above by the
//! executor, never here.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use thiserror::Error;

use onboardly_core::config::CrmConfig;
use onboardly_core::domain::credential::Credential;

const API_VERSION_HEADER: &str = "Version";

#[derive(Debug, Error)]
pub enum CrmApiError {
    #[error("credential has no usable access token")]
    MissingAccessToken,
    #[error("access token is not a valid header value")]
    MalformedAccessToken,
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("crm returned {status} for {method} {path}: {body}")]
    Status { status: u16, method: String, path: String, body: String },
}

impl CrmApiError {
    /// The 404 reconciliation signal: the referenced remote record no
    /// longer exists and an update should fall back to a create.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::NOT_FOUND.as_u16())
    }
}

#[derive(Clone)]
pub struct CrmClient {
    http: reqwest::Client,
    base_url: String,
}

impl CrmClient {
    pub fn build(credential: &Credential, config: &CrmConfig) -> Result<Self, CrmApiError> {
        let token = credential.current_access_token().ok_or(CrmApiError::MissingAccessToken)?;

        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| CrmApiError::MalformedAccessToken)?;
        auth.set_sensitive(true);
        let version = HeaderValue::from_str(&config.api_version)
            .map_err(|_| CrmApiError::MalformedAccessToken)?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(API_VERSION_HEADER, version);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.http_timeout_secs.max(1)))
            .build()?;

        Ok(Self { http, base_url: config.base_url.trim_end_matches('/').to_string() })
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, CrmApiError> {
        self.request(Method::POST, path, body).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Value, CrmApiError> {
        self.request(Method::PUT, path, body).await
    }

    pub async fn upload_media(
        &self,
        file_name: &str,
        mime_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<Value, CrmApiError> {
        let mut part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        if let Some(mime) = mime_type {
            part = part.mime_str(mime)?;
        }
        let form = reqwest::multipart::Form::new().part("file", part);

        let url = format!("{}{}", self.base_url, paths::MEDIA_UPLOAD);
        let response = self.http.post(&url).multipart(form).send().await?;
        decode_response(Method::POST, paths::MEDIA_UPLOAD, response).await
    }

    async fn request(&self, method: Method, path: &str, body: &Value) -> Result<Value, CrmApiError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.request(method.clone(), &url).json(body).send().await?;
        decode_response(method, path, response).await
    }
}

async fn decode_response(
    method: Method,
    path: &str,
    response: reqwest::Response,
) -> Result<Value, CrmApiError> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(CrmApiError::Status {
            status: status.as_u16(),
            method: method.to_string(),
            path: path.to_string(),
            body: text,
        });
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

/// Wire paths for the CRM's versioned REST surface.
pub mod paths {
    pub const MEDIA_UPLOAD: &str = "/medias/upload-file";

    pub fn custom_fields(location_id: &str) -> String {
        format!("/locations/{location_id}/customFields")
    }

    pub fn custom_values(location_id: &str) -> String {
        format!("/locations/{location_id}/customValues")
    }

    pub fn custom_value(location_id: &str, reference_id: &str) -> String {
        format!("/locations/{location_id}/customValues/{reference_id}")
    }

    pub fn trigger_links() -> String {
        "/links/".to_string()
    }

    pub fn trigger_link(reference_id: &str) -> String {
        format!("/links/{reference_id}")
    }

    pub fn tags(location_id: &str) -> String {
        format!("/locations/{location_id}/tags")
    }
}

//! Refresh-token grant against the CRM's OAuth token endpoint. Builds the
//! replacement credential by merging the grant over the stored one;
//! persisting the result is the caller's responsibility.

use chrono::Utc;
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::debug;

use onboardly_core::config::CrmConfig;
use onboardly_core::domain::credential::{Credential, TokenGrant};

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("oauth refresh is not configured: {0}")]
    Config(String),
    #[error("credential cannot be refreshed: {0}")]
    NotRefreshable(String),
    #[error("token endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token endpoint returned {status}: {body}")]
    Endpoint { status: u16, body: String },
    #[error("token endpoint returned an unusable grant: {0}")]
    InvalidGrant(String),
}

pub async fn refresh(
    http: &reqwest::Client,
    credential: &Credential,
    config: &CrmConfig,
) -> Result<Credential, OAuthError> {
    let Credential::Oauth(oauth) = credential else {
        return Err(OAuthError::NotRefreshable(
            "private token credentials have no refresh grant".to_string(),
        ));
    };
    let refresh_token = credential
        .refresh_token()
        .ok_or_else(|| OAuthError::NotRefreshable("stored credential has no refresh token".to_string()))?;

    let client_id = config
        .client_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| OAuthError::Config("missing crm.client_id".to_string()))?;
    let client_secret = config
        .client_secret
        .as_ref()
        .map(|secret| secret.expose_secret().trim().to_string())
        .filter(|secret| !secret.is_empty())
        .ok_or_else(|| OAuthError::Config("missing crm.client_secret".to_string()))?;

    debug!(token_url = %config.token_url, "requesting refresh-token grant");

    let response = http
        .post(&config.token_url)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
            ("client_secret", client_secret.as_str()),
        ])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OAuthError::Endpoint { status: status.as_u16(), body });
    }

    let grant: TokenGrant = response
        .json()
        .await
        .map_err(|error| OAuthError::InvalidGrant(error.to_string()))?;
    if grant.access_token.trim().is_empty() {
        return Err(OAuthError::InvalidGrant("empty access token".to_string()));
    }

    Ok(Credential::merge_refreshed(oauth, &grant, Utc::now()))
}

#[cfg(test)]
mod tests {
    use onboardly_core::config::AppConfig;
    use onboardly_core::domain::credential::Credential;

    use super::{refresh, OAuthError};

    #[tokio::test]
    async fn private_token_credentials_are_not_refreshable() {
        let config = AppConfig::default().crm;
        let http = reqwest::Client::new();
        let credential = Credential::decode(Some("pk-live-abc"));

        let result = refresh(&http, &credential, &config).await;
        assert!(matches!(result, Err(OAuthError::NotRefreshable(_))));
    }

    #[tokio::test]
    async fn missing_client_credentials_are_a_configuration_error() {
        let config = AppConfig::default().crm;
        let http = reqwest::Client::new();
        let raw = serde_json::json!({
            "kind": "oauth",
            "access_token": "at-1",
            "refresh_token": "rt-1",
        })
        .to_string();
        let credential = Credential::decode(Some(&raw));

        let result = refresh(&http, &credential, &config).await;
        assert!(matches!(result, Err(OAuthError::Config(_))));
    }

    #[tokio::test]
    async fn oauth_credential_without_refresh_token_is_rejected() {
        let mut config = AppConfig::default().crm;
        config.client_id = Some("client".to_string());
        config.client_secret = Some("secret".to_string().into());

        let http = reqwest::Client::new();
        let raw = serde_json::json!({
            "kind": "oauth",
            "access_token": "at-1",
        })
        .to_string();
        let credential = Credential::decode(Some(&raw));

        let result = refresh(&http, &credential, &config).await;
        assert!(matches!(result, Err(OAuthError::NotRefreshable(_))));
    }
}

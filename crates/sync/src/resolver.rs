//! Credential resolution for one sync run. Refresh is fail-open by
//! policy: a refresh that cannot run or does not succeed is surfaced as a
//! typed `RefreshSkipped` outcome and the run continues with the stored
//! (possibly stale) token.

use chrono::Utc;
use tracing::{debug, warn};

use onboardly_core::config::CrmConfig;
use onboardly_core::domain::credential::Credential;
use onboardly_crm::oauth;
use onboardly_db::repositories::ConnectionRepository;

use crate::engine::EngineError;

#[derive(Clone, Debug)]
pub enum Resolution {
    /// Stored credential used as-is (private token, or OAuth still fresh).
    Fresh { credential: Credential },
    /// OAuth credential was refreshed and the merged grant persisted.
    Refreshed { credential: Credential },
    /// Refresh was wanted but skipped; the stale stored token is used.
    RefreshSkipped { credential: Credential, reason: String },
}

impl Resolution {
    pub fn credential(&self) -> &Credential {
        match self {
            Self::Fresh { credential }
            | Self::Refreshed { credential }
            | Self::RefreshSkipped { credential, .. } => credential,
        }
    }
}

pub async fn resolve_credential(
    connections: &dyn ConnectionRepository,
    http: &reqwest::Client,
    config: &CrmConfig,
    owner_id: &str,
    location_id: &str,
) -> Result<Resolution, EngineError> {
    let connection =
        connections.find_for_location(owner_id, location_id).await?.ok_or_else(|| {
            EngineError::MissingConnection {
                owner_id: owner_id.to_string(),
                location_id: location_id.to_string(),
            }
        })?;

    if let Err(error) = connections.touch_last_used(&connection.id, Utc::now()).await {
        warn!(connection_id = %connection.id, error = %error, "last_used_at update failed");
    }

    let credential = connection.credential();
    let wants_refresh = matches!(credential, Credential::Oauth(_))
        && (credential.current_access_token().is_none()
            || credential.is_expired(config.token_refresh_buffer_secs));

    if !wants_refresh {
        return Ok(Resolution::Fresh { credential });
    }

    if !config.refresh_enabled() {
        let reason = "refresh client credentials are not configured".to_string();
        warn!(connection_id = %connection.id, %reason, "continuing with stale token");
        return Ok(Resolution::RefreshSkipped { credential, reason });
    }

    match oauth::refresh(http, &credential, config).await {
        Ok(refreshed) => {
            debug!(connection_id = %connection.id, "access token refreshed");
            let encoded = refreshed.encode();
            if let Err(error) =
                connections.update_token(&connection.id, &encoded, Utc::now()).await
            {
                // The refreshed grant is still good for this run even if
                // the write-back lost a race with the connection row.
                warn!(connection_id = %connection.id, error = %error, "refreshed token write-back failed");
            }
            Ok(Resolution::Refreshed { credential: refreshed })
        }
        Err(error) => {
            let reason = error.to_string();
            warn!(connection_id = %connection.id, %reason, "token refresh failed; continuing with stale token");
            Ok(Resolution::RefreshSkipped { credential, reason })
        }
    }
}

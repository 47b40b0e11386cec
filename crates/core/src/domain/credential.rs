use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Authorization artifact stored on a saved connection. The persisted
/// column is opaque text: either a bare private token (legacy rows) or a
/// JSON object carrying a `kind` tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credential {
    PrivateToken(PrivateTokenCredential),
    Oauth(OauthCredential),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PrivateTokenCredential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Legacy rows stored the token under `token` before `access_token`
    /// became the canonical field. Decode honors both.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_level: Option<ScopeLevel>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OauthCredential {
    #[serde(default)]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_location_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_level: Option<ScopeLevel>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeLevel {
    Location,
    Agency,
}

impl ScopeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Agency => "agency",
        }
    }
}

/// Body of a successful token-endpoint response (authorization-code or
/// refresh-token grant).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token_expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default, rename = "companyId")]
    pub company_id: Option<String>,
    #[serde(default, rename = "locationId")]
    pub location_id: Option<String>,
    #[serde(default, rename = "userType")]
    pub user_type: Option<String>,
}

impl Credential {
    /// Decode the persisted token column. Never fails: empty input yields
    /// an empty private-token credential, malformed JSON degrades to a
    /// bare private token with a logged warning, and untagged legacy JSON
    /// is normalized (OAuth is inferred from refresh/scope/expiry fields).
    pub fn decode(raw: Option<&str>) -> Self {
        let raw = match raw.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => value,
            None => return Self::PrivateToken(PrivateTokenCredential::default()),
        };

        if !raw.starts_with('{') {
            return Self::bare_private_token(raw);
        }

        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(error) => {
                warn!(error = %error, "stored credential is not valid JSON; treating as private token");
                return Self::bare_private_token(raw);
            }
        };

        let object = match value.as_object() {
            Some(object) => object,
            None => return Self::bare_private_token(raw),
        };

        if object.contains_key("kind") {
            match serde_json::from_value::<Self>(value.clone()) {
                Ok(credential) => return credential,
                Err(error) => {
                    warn!(error = %error, "stored credential has unrecognized shape; treating as private token");
                    return Self::bare_private_token(raw);
                }
            }
        }

        let looks_oauth = ["refresh_token", "scope", "expires_at", "refresh_token_expires_at"]
            .iter()
            .any(|key| object.contains_key(*key));

        let normalized = if looks_oauth {
            serde_json::from_value::<OauthCredential>(value).map(Self::Oauth)
        } else {
            serde_json::from_value::<PrivateTokenCredential>(value).map(Self::PrivateToken)
        };

        match normalized {
            Ok(credential) => credential,
            Err(error) => {
                warn!(error = %error, "stored credential could not be normalized; treating as private token");
                Self::bare_private_token(raw)
            }
        }
    }

    fn bare_private_token(raw: &str) -> Self {
        Self::PrivateToken(PrivateTokenCredential {
            access_token: Some(raw.to_string()),
            ..PrivateTokenCredential::default()
        })
    }

    /// Serialize for storage. Serialization failure yields an empty string
    /// rather than an error so a broken credential can never wedge a save.
    pub fn encode(&self) -> String {
        match serde_json::to_string(self) {
            Ok(encoded) => encoded,
            Err(error) => {
                warn!(error = %error, "credential serialization failed");
                String::new()
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::PrivateToken(_) => "private_token",
            Self::Oauth(_) => "oauth",
        }
    }

    /// Current bearer value. For OAuth this is the stored access token and
    /// may be stale; staleness is the resolver's concern.
    pub fn current_access_token(&self) -> Option<&str> {
        match self {
            Self::Oauth(oauth) => non_empty(Some(&oauth.access_token)),
            Self::PrivateToken(private) => {
                non_empty(private.access_token.as_ref()).or_else(|| non_empty(private.token.as_ref()))
            }
        }
    }

    pub fn refresh_token(&self) -> Option<&str> {
        match self {
            Self::Oauth(oauth) => non_empty(oauth.refresh_token.as_ref()),
            Self::PrivateToken(_) => None,
        }
    }

    pub fn is_expired(&self, buffer_secs: i64) -> bool {
        self.is_expired_at(Utc::now(), buffer_secs)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>, buffer_secs: i64) -> bool {
        match self {
            Self::Oauth(oauth) => match oauth.expires_at {
                Some(expires_at) => now >= expires_at - Duration::seconds(buffer_secs),
                None => false,
            },
            Self::PrivateToken(_) => false,
        }
    }

    /// Build a fresh OAuth credential from a token-endpoint grant.
    pub fn from_grant(grant: &TokenGrant, now: DateTime<Utc>) -> Self {
        Self::Oauth(OauthCredential {
            access_token: grant.access_token.clone(),
            refresh_token: grant.refresh_token.clone().filter(|token| !token.is_empty()),
            expires_at: grant.expires_in.map(|secs| now + Duration::seconds(secs)),
            refresh_token_expires_at: grant
                .refresh_token_expires_in
                .map(|secs| now + Duration::seconds(secs)),
            scope: split_scope(grant.scope.as_deref()),
            token_type: grant.token_type.clone(),
            provider_account_id: grant.company_id.clone(),
            provider_location_id: grant.location_id.clone(),
            installed_at: Some(now),
            scope_level: scope_level_from_user_type(grant.user_type.as_deref()),
            metadata: Map::new(),
        })
    }

    /// Merge a refresh grant over an existing OAuth credential. Fields the
    /// grant omits (refresh token, scope, provider ids) are carried
    /// forward from the old credential; metadata merges per-key with new
    /// values winning. The original `installed_at` is preserved.
    pub fn merge_refreshed(old: &OauthCredential, grant: &TokenGrant, now: DateTime<Utc>) -> Self {
        let fresh = match Self::from_grant(grant, now) {
            Self::Oauth(fresh) => fresh,
            Self::PrivateToken(_) => unreachable!("from_grant always builds an oauth credential"),
        };

        let kept_refresh = fresh.refresh_token.is_none();
        let mut metadata = old.metadata.clone();
        for (key, value) in &fresh.metadata {
            metadata.insert(key.clone(), value.clone());
        }

        Self::Oauth(OauthCredential {
            access_token: fresh.access_token,
            refresh_token: fresh.refresh_token.or_else(|| old.refresh_token.clone()),
            expires_at: fresh.expires_at,
            refresh_token_expires_at: if kept_refresh {
                old.refresh_token_expires_at
            } else {
                fresh.refresh_token_expires_at
            },
            scope: if fresh.scope.is_empty() { old.scope.clone() } else { fresh.scope },
            token_type: fresh.token_type.or_else(|| old.token_type.clone()),
            provider_account_id: fresh
                .provider_account_id
                .or_else(|| old.provider_account_id.clone()),
            provider_location_id: fresh
                .provider_location_id
                .or_else(|| old.provider_location_id.clone()),
            installed_at: old.installed_at.or(Some(now)),
            scope_level: fresh.scope_level.or(old.scope_level),
            metadata,
        })
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|value| !value.trim().is_empty())
}

fn split_scope(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split_whitespace()
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn scope_level_from_user_type(user_type: Option<&str>) -> Option<ScopeLevel> {
    match user_type.map(str::to_ascii_lowercase).as_deref() {
        Some("location") => Some(ScopeLevel::Location),
        Some("company") | Some("agency") => Some(ScopeLevel::Agency),
        _ => None,
    }
}

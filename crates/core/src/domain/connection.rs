use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::credential::Credential;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A saved CRM connection for one (owner, location) pair. Owns the
/// credential one-to-one: the token column dies with the row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedConnection {
    pub id: ConnectionId,
    pub owner_id: String,
    pub location_id: String,
    /// Encoded credential column; see `Credential::decode`/`encode`.
    pub token: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SavedConnection {
    pub fn credential(&self) -> Credential {
        Credential::decode(Some(&self.token))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{ConnectionId, SavedConnection};
    use crate::domain::credential::Credential;

    #[test]
    fn credential_accessor_decodes_the_stored_column() {
        let now = Utc::now();
        let connection = SavedConnection {
            id: ConnectionId("CONN-1".to_string()),
            owner_id: "user-1".to_string(),
            location_id: "loc-1".to_string(),
            token: "pk-live-xyz".to_string(),
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };

        let credential = connection.credential();
        assert_eq!(credential.kind(), "private_token");
        assert_eq!(credential.current_access_token(), Some("pk-live-xyz"));

        let empty = SavedConnection { token: String::new(), ..connection };
        assert_eq!(empty.credential(), Credential::decode(None));
    }
}

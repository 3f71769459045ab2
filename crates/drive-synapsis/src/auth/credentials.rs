//! User credential data model.
//!
//! Mirrors the per-user JSON credential file shape and the fields held in
//! the in-memory session store.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Long-lived OAuth credentials for one user.
///
/// `expiry` is kept timezone-naive UTC throughout: the refresh machinery
/// compares it against naive `Utc::now()`, and the on-disk format stores it
/// without an offset.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserCredentials {
    /// Access token for API calls.
    pub token: String,

    /// Refresh token, when offline access was granted.
    pub refresh_token: Option<String>,

    /// Token endpoint the credential was issued by.
    pub token_uri: String,

    /// OAuth client id the credential is bound to.
    pub client_id: Option<String>,

    /// OAuth client secret the credential is bound to.
    pub client_secret: Option<String>,

    /// Scopes granted with this credential.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Access token expiry as a timezone-naive UTC instant.
    #[serde(default, with = "naive_expiry")]
    pub expiry: Option<NaiveDateTime>,
}

impl UserCredentials {
    /// Whether the access token has expired.
    ///
    /// A credential without a recorded expiry is treated as unexpired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= Utc::now().naive_utc())
    }

    /// Whether the credential can be used for API calls right now.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.token.is_empty() && !self.is_expired()
    }

    /// Whether the granted scope set covers every required scope.
    ///
    /// A missing scope means the credential is unusable for the caller,
    /// not a partial grant.
    #[must_use]
    pub fn has_scopes(&self, required: &[String]) -> bool {
        required.iter().all(|scope| self.scopes.iter().any(|granted| granted == scope))
    }
}

impl std::fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCredentials")
            .field("scopes", &self.scopes)
            .field("expiry", &self.expiry)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

/// Normalize an ISO-8601 expiry string to a timezone-naive UTC instant.
///
/// Accepts both offset-bearing values (including a `Z` suffix) and naive
/// values; offset-bearing values are converted to UTC before dropping the
/// offset. Unparseable values yield `None`.
#[must_use]
pub fn normalize_expiry(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(aware) = DateTime::parse_from_rfc3339(raw) {
        return Some(aware.with_timezone(&Utc).naive_utc());
    }
    raw.parse::<NaiveDateTime>().ok()
}

/// Serde adapter: expiry persisted as an ISO-8601 string without offset.
mod naive_expiry {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(expiry) => serializer.serialize_str(&expiry.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(super::normalize_expiry))
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored in redb as bincode-encoded bytes, keyed by the secret id.
/// `data` is an opaque client-side envelope; the server never sees the password
/// that opens it. Once `data` is cleared it is never repopulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedSecretRecord {
    /// Identity of the creator. Never shown to anonymous readers.
    pub owner_id: String,
    /// Envelope blob, or `None` once expired or consumed.
    pub data: Option<String>,
    /// Unix timestamp (seconds) when the record was created.
    pub created_at: i64,
    /// Unix timestamp (seconds) after which the record is expired.
    pub expires_at: i64,
    /// Clear `data` after the first successful read.
    pub single_use: bool,
}

impl SharedSecretRecord {
    /// Returns true once the deadline has passed or the payload was cleared.
    /// A read at exactly `expires_at` is still live.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at < now || self.data.is_none()
    }

    /// Returns true if a point-read at `now` must clear the payload.
    pub fn clears_on_read(&self, now: i64) -> bool {
        self.is_expired(now) || self.single_use
    }

    /// Project the record into its externally visible shape at `now`.
    pub fn view(&self, id: Uuid, now: i64) -> SharedSecretView {
        let state = match (&self.data, self.is_expired(now)) {
            (Some(data), false) => SecretState::Live { data: data.clone() },
            _ => SecretState::Expired,
        };
        SharedSecretView {
            id,
            owner_id: self.owner_id.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            single_use: self.single_use,
            state,
        }
    }
}

/// Input to `Store::create`.
#[derive(Debug, Clone)]
pub struct NewSharedSecret {
    pub owner_id: String,
    pub data: String,
    pub expires_at: i64,
    pub single_use: bool,
}

/// Whether a record still discloses its payload. `Expired` is absorbing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretState {
    Live { data: String },
    Expired,
}

/// Masked view of a record returned by reads and listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedSecretView {
    pub id: Uuid,
    pub owner_id: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub single_use: bool,
    pub state: SecretState,
}

impl SharedSecretView {
    pub fn is_expired(&self) -> bool {
        matches!(self.state, SecretState::Expired)
    }

    /// The envelope blob, present only while live.
    pub fn data(&self) -> Option<&str> {
        match &self.state {
            SecretState::Live { data } => Some(data),
            SecretState::Expired => None,
        }
    }
}

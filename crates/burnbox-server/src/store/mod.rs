pub mod db;
pub mod error;
pub mod model;

pub use db::{unix_now, Store, MAX_PAYLOAD_BYTES};
pub use error::{StoreError, StoreResult};
pub use model::{NewSharedSecret, SecretState, SharedSecretRecord, SharedSecretView};

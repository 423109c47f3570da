use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use redb::{Database, MultimapTableDefinition, ReadableTable, TableDefinition};
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{StoreError, StoreResult};
use super::model::{NewSharedSecret, SharedSecretRecord, SharedSecretView};

const SHARED_SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("shared_secrets");
const SECRETS_BY_OWNER: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("shared_secrets_by_owner");

/// Leading byte of every encoded record, reserved for future layout changes.
const RECORD_V1_MARKER: u8 = 0x01;

/// Largest accepted envelope blob.
pub const MAX_PAYLOAD_BYTES: usize = 1_048_576;

/// Current Unix time in seconds. Store operations never read the clock
/// themselves; callers pass this (or a fixed value in tests) as `now`.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Thread-safe handle to the redb store.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        // Ensure all tables exist so read transactions can open them.
        let write_txn = db.begin_write()?;
        write_txn.open_table(SHARED_SECRETS)?;
        write_txn.open_multimap_table(SECRETS_BY_OWNER)?;
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Persist a new live record and return its id.
    pub fn create(&self, new: NewSharedSecret, now: i64) -> StoreResult<Uuid> {
        validate(&new, now)?;

        let id = Uuid::new_v4();
        let record = SharedSecretRecord {
            owner_id: new.owner_id,
            data: Some(new.data),
            created_at: now,
            expires_at: new.expires_at,
            single_use: new.single_use,
        };
        self.insert(&id.to_string(), &record)?;

        debug!(id = %id, owner = %record.owner_id, "stored shared secret");
        Ok(id)
    }

    /// Every record owned by `owner_id`, newest first, with expired payloads
    /// masked. Runs in a read transaction and never mutates anything.
    pub fn list_by_owner(&self, owner_id: &str, now: i64) -> StoreResult<Vec<SharedSecretView>> {
        let mut views: Vec<SharedSecretView> = self
            .load_owned(owner_id)?
            .into_iter()
            .map(|(id, record)| record.view(id, now))
            .collect();
        views.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(views)
    }

    /// Point-read by id.
    ///
    /// The returned view reflects the record as it was when read: a live
    /// single-use record is returned with its payload. In the same write
    /// transaction the payload is cleared whenever the record is expired or
    /// single-use, so two concurrent first reads of a single-use record can
    /// never both observe the payload.
    pub fn get_by_id(&self, id: Uuid, now: i64) -> StoreResult<SharedSecretView> {
        self.read_and_clear(id, now)?.ok_or(StoreError::NotFound)
    }

    /// Clear the payload of a record owned by `owner_id`.
    ///
    /// Unknown ids and records of other owners are left untouched and report
    /// `false`; neither case is an error.
    pub fn expire_by_id(&self, id: Uuid, owner_id: &str) -> StoreResult<bool> {
        Ok(self.clear_owned(id, owner_id)?)
    }

    /// Delete every record whose deadline passed more than `retention_secs`
    /// ago. Returns how many rows were removed.
    pub fn purge_expired(&self, now: i64, retention_secs: i64) -> StoreResult<usize> {
        if retention_secs < 0 {
            return Err(StoreError::Validation(format!(
                "retention must not be negative, got {retention_secs}s"
            )));
        }
        Ok(self.delete_past_retention(now.saturating_sub(retention_secs))?)
    }

    /// Spawn a background Tokio task that calls `purge_expired()` every `interval`.
    /// This only garbage-collects rows long past their deadline; expiry itself
    /// stays lazy.
    pub fn spawn_retention_sweep(self, interval: Duration, retention_secs: i64) {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                if let Err(e) = self.purge_expired(unix_now(), retention_secs) {
                    warn!(error = %e, "retention sweep error");
                }
            }
        });
    }

    fn insert(&self, key: &str, record: &SharedSecretRecord) -> Result<()> {
        let bytes = encode(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SHARED_SECRETS)?;
            table.insert(key, bytes.as_slice())?;
            let mut by_owner = write_txn.open_multimap_table(SECRETS_BY_OWNER)?;
            by_owner.insert(record.owner_id.as_str(), key)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn load_owned(&self, owner_id: &str) -> Result<Vec<(Uuid, SharedSecretRecord)>> {
        let read_txn = self.db.begin_read()?;
        let by_owner = read_txn.open_multimap_table(SECRETS_BY_OWNER)?;
        let table = read_txn.open_table(SHARED_SECRETS)?;

        let mut out = Vec::new();
        for entry in by_owner.get(owner_id)? {
            let entry = entry?;
            let key = entry.value();
            let Some(raw) = table.get(key)? else {
                continue;
            };
            let record = decode(raw.value())?;
            let id = Uuid::parse_str(key).with_context(|| format!("corrupt secret id: {key}"))?;
            out.push((id, record));
        }
        Ok(out)
    }

    fn read_and_clear(&self, id: Uuid, now: i64) -> Result<Option<SharedSecretView>> {
        let key = id.to_string();

        // Read and clear share one write transaction; redb serialises writers.
        let write_txn = self.db.begin_write()?;
        let view = {
            let mut table = write_txn.open_table(SHARED_SECRETS)?;

            // Copy the bytes out so the AccessGuard borrow on `table` ends
            // before any mutation.
            let raw_bytes: Option<Vec<u8>> =
                table.get(key.as_str())?.map(|guard| guard.value().to_vec());

            match raw_bytes {
                None => None,
                Some(bytes) => {
                    let mut record = decode(&bytes)?;
                    let view = record.view(id, now);

                    if record.clears_on_read(now) {
                        record.data = None;
                        let updated = encode(&record)?;
                        table.insert(key.as_str(), updated.as_slice())?;
                        if view.is_expired() {
                            debug!(id = %id, "lazy-expired shared secret");
                        } else {
                            debug!(id = %id, "consumed single-use shared secret");
                        }
                    }
                    Some(view)
                }
            }
        };
        write_txn.commit()?;
        Ok(view)
    }

    fn clear_owned(&self, id: Uuid, owner_id: &str) -> Result<bool> {
        let key = id.to_string();

        let write_txn = self.db.begin_write()?;
        let matched = {
            let mut table = write_txn.open_table(SHARED_SECRETS)?;
            let raw_bytes: Option<Vec<u8>> =
                table.get(key.as_str())?.map(|guard| guard.value().to_vec());

            match raw_bytes {
                Some(bytes) => {
                    let mut record = decode(&bytes)?;
                    if record.owner_id == owner_id {
                        record.data = None;
                        let updated = encode(&record)?;
                        table.insert(key.as_str(), updated.as_slice())?;
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(matched)
    }

    fn delete_past_retention(&self, cutoff: i64) -> Result<usize> {
        // Collect doomed rows in a read pass first. `expires_at` is immutable,
        // so nothing selected here can become live before the write pass.
        let doomed: Vec<(String, String)> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(SHARED_SECRETS)?;
            let mut rows = Vec::new();
            for item in table.iter()? {
                let (k, v) = item?;
                let record = decode(v.value())?;
                if record.expires_at < cutoff {
                    rows.push((k.value().to_owned(), record.owner_id.clone()));
                }
            }
            rows
        };

        if doomed.is_empty() {
            return Ok(0);
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SHARED_SECRETS)?;
            let mut by_owner = write_txn.open_multimap_table(SECRETS_BY_OWNER)?;
            for (key, owner_id) in &doomed {
                table.remove(key.as_str())?;
                by_owner.remove(owner_id.as_str(), key.as_str())?;
            }
        }
        write_txn.commit()?;

        let removed = doomed.len();
        info!(removed, "purged expired shared secrets");
        Ok(removed)
    }

    #[cfg(test)]
    fn load(&self, id: Uuid) -> Result<Option<SharedSecretRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SHARED_SECRETS)?;
        let key = id.to_string();
        let raw = table.get(key.as_str())?;
        raw.map(|guard| decode(guard.value())).transpose()
    }
}

fn validate(new: &NewSharedSecret, now: i64) -> StoreResult<()> {
    if new.owner_id.is_empty() {
        return Err(StoreError::Validation("owner id must not be empty".into()));
    }
    if new.data.is_empty() {
        return Err(StoreError::Validation("data must not be empty".into()));
    }
    if new.data.len() > MAX_PAYLOAD_BYTES {
        return Err(StoreError::Validation("data exceeds 1 MiB limit".into()));
    }
    if new.expires_at <= now {
        return Err(StoreError::Validation(
            "expires_at should be a future date".into(),
        ));
    }
    Ok(())
}

/// Encode a record as `[RECORD_V1_MARKER] + bincode(record)`.
fn encode(record: &SharedSecretRecord) -> Result<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(record, bincode::config::standard())
        .context("bincode encode")?;
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(RECORD_V1_MARKER);
    out.extend_from_slice(&payload);
    Ok(out)
}

fn decode(bytes: &[u8]) -> Result<SharedSecretRecord> {
    match bytes.split_first() {
        Some((&RECORD_V1_MARKER, payload)) => {
            let (record, _) =
                bincode::serde::decode_from_slice(payload, bincode::config::standard())
                    .context("bincode decode")?;
            Ok(record)
        }
        Some((marker, _)) => anyhow::bail!("unknown record format marker {marker:#04x}"),
        None => anyhow::bail!("empty record"),
    }
}

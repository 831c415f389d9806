//! Correction store: fingerprint-keyed, human-authorized decision overrides.
//!
//! Not a performance cache. Records never expire and are never evicted; the only way a record
//! changes is another explicit `put` for the same fingerprint (last write wins). Each `put`
//! replaces the whole serialized record in one operation, so a concurrent `get` sees either the
//! old record or the new one.

use crate::error::StoreError;
use crate::fingerprint::Fingerprint;
use crate::shared::{CorrectionRecord, Decision};
use dashmap::DashMap;
use std::path::Path;
use tracing::info;

const DEFAULT_PATH: &str = "./data/directive_corrections";
const CORRECTIONS_TREE: &str = "corrections";

/// The two operations the pipeline needs from persistence.
pub trait CorrectionStore: Send + Sync {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CorrectionRecord>, StoreError>;

    /// Stores `decision` as the override for `fingerprint`, replacing any earlier record.
    fn put(
        &self,
        fingerprint: &Fingerprint,
        decision: Decision,
        authorized_user: &str,
    ) -> Result<CorrectionRecord, StoreError>;
}

/// Sled-backed store with a single `corrections` tree.
pub struct SledCorrectionStore {
    tree: sled::Tree,
}

impl SledCorrectionStore {
    /// Opens `./data/directive_corrections`.
    pub fn new() -> Result<Self, StoreError> {
        Self::open_path(DEFAULT_PATH)
    }

    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref()).map_err(|e| StoreError::Open(e.to_string()))?;
        Self::from_db(&db)
    }

    /// Uses the `corrections` tree of an already-open database.
    pub fn from_db(db: &sled::Db) -> Result<Self, StoreError> {
        let tree = db.open_tree(CORRECTIONS_TREE)?;
        Ok(Self { tree })
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl CorrectionStore for SledCorrectionStore {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CorrectionRecord>, StoreError> {
        let Some(bytes) = self.tree.get(fingerprint.as_bytes())? else {
            return Ok(None);
        };
        CorrectionRecord::from_bytes(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                fingerprint: fingerprint.to_string(),
                reason: e.to_string(),
            })
    }

    fn put(
        &self,
        fingerprint: &Fingerprint,
        decision: Decision,
        authorized_user: &str,
    ) -> Result<CorrectionRecord, StoreError> {
        let record = CorrectionRecord::new(fingerprint.clone(), decision, authorized_user);
        let bytes = record.to_bytes()?;
        self.tree.insert(fingerprint.as_bytes(), bytes)?;
        self.tree.flush()?;
        info!(
            fingerprint = %fingerprint,
            authorized_user = %authorized_user,
            outcome = %record.decision_payload.outcome,
            "correction stored"
        );
        Ok(record)
    }
}

/// In-process store for tests and single-run tools.
#[derive(Debug, Default)]
pub struct MemoryCorrectionStore {
    records: DashMap<Fingerprint, CorrectionRecord>,
}

impl MemoryCorrectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl CorrectionStore for MemoryCorrectionStore {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CorrectionRecord>, StoreError> {
        Ok(self.records.get(fingerprint).map(|r| r.value().clone()))
    }

    fn put(
        &self,
        fingerprint: &Fingerprint,
        decision: Decision,
        authorized_user: &str,
    ) -> Result<CorrectionRecord, StoreError> {
        let record = CorrectionRecord::new(fingerprint.clone(), decision, authorized_user);
        self.records.insert(fingerprint.clone(), record.clone());
        Ok(record)
    }
}

use crate::error::NiahResult;
use crate::trial::{ResultRecord, TrialKey};

/// Write-once persistence of trial results.
pub trait ResultStore: Send + Sync {
    /// True if a record with exactly this model, length, depth and version exists.
    fn exists(&self, key: &TrialKey) -> NiahResult<bool>;

    /// Persist a record. Re-putting the same key overwrites it.
    fn put(&self, record: &ResultRecord) -> NiahResult<()>;

    /// All records stored for `model`.
    fn records(&self, model: &str) -> NiahResult<Vec<ResultRecord>>;
}

use crate::core::{Fields, Result};
use serde::{Deserialize, Serialize};

/// Options passed with a single update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOptions {
    pub upsert: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Documents the filter matched
    pub matched_count: u64,
    /// Documents actually changed
    pub modified_count: u64,
}

/// Database collection the flushes are written to - allows pluggable drivers
pub trait Collection: Send + Sync {
    /// Name of the collection
    fn name(&self) -> &str;

    /// Apply one update document to the first document matching `filter`
    fn update_one(
        &self,
        filter: &Fields,
        update: &Fields,
        options: &UpdateOptions,
    ) -> Result<UpdateResult>;

    /// Insert a whole document
    fn insert_one(&self, document: &Fields) -> Result<()>;
}

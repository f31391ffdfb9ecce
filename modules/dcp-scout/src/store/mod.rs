mod memory;
mod postgres;

pub use memory::MemoryProfileStore;
pub use postgres::PgProfileStore;

use anyhow::Result;
use async_trait::async_trait;

use dcp_common::{EntityKey, ProfileRecord};

/// Durable home of the current profile and score per entity.
///
/// `save_profile` must be atomic per entity: readers see either the previous
/// record or the new one, never a mix. A save carrying an older
/// `refreshed_at` than the stored record is ignored.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load_profile(&self, key: &EntityKey) -> Result<Option<ProfileRecord>>;

    async fn save_profile(&self, record: &ProfileRecord) -> Result<()>;
}

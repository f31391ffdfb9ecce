pub mod clock;
pub mod collectors;
pub mod extraction;
pub mod merge;
pub mod refresh;
pub mod scoring;
pub mod store;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use refresh::{
    ConflictPolicy, LeaseTable, Lookup, LookupOptions, NotReadyReason, ProfileView,
    RefreshIndicator, RefreshOrchestrator, StalePolicy,
};

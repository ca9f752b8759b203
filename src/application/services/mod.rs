pub mod sync_coordinator;

pub use sync_coordinator::{
    FeedStatus, LoadMoreOutcome, MutationIntent, PaginatedLoader, SyncCoordinator, SyncState,
    UpdateBatcher,
};

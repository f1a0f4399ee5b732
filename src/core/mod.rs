pub mod comparator;
pub mod comparison;
pub mod exclude;
pub mod listing;
pub mod paths;
pub mod pending;
pub mod phase;
pub mod pinstate;
pub mod records;
pub mod renames;
pub mod selective;

pub use comparator::{CompareConfig, FileComparator, FileRelation};
pub use comparison::{DirectoryJob, JobKind, PathTuple, QueryMode};
pub use exclude::{ExcludeFilter, ExcludeType, NoExcludes, PatternExcludes};
pub use listing::{RemoteListing, SingleDirectoryListing};
pub use pending::{PendingDeletion, PendingDeletions};
pub use phase::{
    AbortHandle, DiscoverLocallyFn, DiscoveryContext, DiscoveryEvents, DiscoveryPhase,
    DiscoverySummary, JobId, LocalDiscoveryStyle,
};
pub use pinstate::PinState;
pub use records::{
    Classification, DiscoveredItem, DiscoveryEvent, Direction, Instruction, ItemType, LocalEntry,
    Permission, RemoteEntry, RemotePermissions,
};
pub use renames::RenameTable;
pub use selective::{SelectiveSyncListType, SelectiveSyncLists};

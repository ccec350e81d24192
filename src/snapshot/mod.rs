pub mod cache;
pub mod codec;
pub mod entry;
pub mod ignore;
pub mod indexer;
pub mod orchestrator;
pub mod pipe;
pub mod restore;
pub mod trim;
pub mod version_id;
pub mod walk;

pub use cache::TreeCache;
pub use codec::FORMAT_TAG;
pub use entry::{EntryAction, EntryType, FileStat, IndexEntry, Version};
pub use ignore::{IgnoreSet, CONTROL_DIR};
pub use indexer::{build_index, IndexOutcome};
pub use orchestrator::{create_version, SnapshotOptions, SnapshotReport};
pub use pipe::{run_pipe, CancelToken, PipeResult, DEFAULT_TIMEOUT};
pub use restore::{read_version, restore_tree, RestoreSummary};
pub use trim::{trim_versions, TrimOutcome};
pub use walk::walk_tree;

//! pylon-feed: file and HTTP collaborators for the polling scheduler.

pub mod live_feed;
pub mod schedule_files;
pub mod snapshot_store;

pub use live_feed::{FeedSettings, HttpFetcher, decode_feed};
pub use schedule_files::{DEFAULT_SCHEDULE_FILES, FileScheduleLoader, read_schedule_file};
pub use snapshot_store::{DEFAULT_SNAPSHOT_FILE, FileSnapshotStore, read_snapshot, write_snapshot_atomic};

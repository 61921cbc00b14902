pub mod file;
pub mod server;

pub use file::{ChannelStatus, FileSyncChannel, SyncMode};
pub use server::{DEFAULT_PORT, PushEvent, PushSyncServer};

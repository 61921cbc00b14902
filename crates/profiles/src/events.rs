use crate::schema::ProfilesConfig;

/// Who caused a store mutation.  Sync channels use this to break feedback
/// loops: a file-originated save must not be re-exported to the file, and a
/// network-originated save is already broadcast by the HTTP handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// UI/editor command or any in-process caller.
    Local,
    /// Imported from the shared sync file.
    File,
    /// Accepted over the push sync server's HTTP endpoint.
    Network,
}

impl ChangeOrigin {
    /// Source tag used in push events and log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::File => "file",
            Self::Network => "network",
        }
    }
}

/// Payload delivered to store subscribers after every successful mutation.
/// Carries a full snapshot so consumers never need to re-read the store.
#[derive(Debug, Clone)]
pub struct ProfilesChanged {
    pub config: ProfilesConfig,
    pub origin: ChangeOrigin,
}

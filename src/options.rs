/// Tree options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Synchronously flush every commit batch to storage, using e.g. the
    /// fsync syscall. Disabling this significantly improves performance,
    /// but can lose data on e.g. power loss.
    pub sync: bool,

    /// The version number assigned by the first `save_version` call.
    /// Loading a store that already holds versions below this fails.
    pub initial_version: u64,

    /// Number of recent versions kept before the pruning policy deletes
    /// the version falling behind the window. 0 keeps every version.
    pub keep_recent: u64,

    /// Every version divisible by this is pinned against pruning, as is
    /// the first committed version. 0 disables pruning entirely.
    pub keep_every: u64,

    /// Capacity of the decoded-node cache, in nodes.
    pub cache_size: usize,
}

pub(crate) const DEFAULT_CACHE_SIZE: usize = 10_000;

impl Default for Options {
    fn default() -> Self {
        Self {
            sync: false,
            initial_version: 1,
            keep_recent: 0,
            keep_every: 0,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

impl Options {
    /// Pruning settings over default options.
    pub fn pruning(keep_recent: u64, keep_every: u64) -> Self {
        Self {
            keep_recent,
            keep_every,
            ..Self::default()
        }
    }

    pub(crate) fn prunes(&self) -> bool {
        self.keep_recent > 0 && self.keep_every > 0
    }
}

//! Live native-handle accounting.
//!
//! Release itself is owned by the handle types: [`crate::Connection`] and
//! [`crate::QueryStream`] free their native resources on explicit close or
//! on drop. The gauges here only observe that, so a process can check for
//! leaked handles; they never reclaim anything.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

static OPEN_CONNECTIONS: AtomicU64 = AtomicU64::new(0);
static OPEN_STREAMS: AtomicU64 = AtomicU64::new(0);

/// Point-in-time count of open native handles held by this process.
///
/// Diagnostic only; handles opened or released on other threads may make a
/// snapshot stale by the time the caller reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveHandles {
    pub connections: u64,
    pub streams: u64,
}

pub fn live_handles() -> LiveHandles {
    LiveHandles {
        connections: OPEN_CONNECTIONS.load(Ordering::Relaxed),
        streams: OPEN_STREAMS.load(Ordering::Relaxed),
    }
}

/// How a native handle reached its release call.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ReleasePath {
    /// `close()`, `cancel()`, or normal stream exhaustion.
    Explicit,
    /// Reclaimed by `Drop` without an explicit release.
    Drop,
}

pub(crate) fn connection_opened() {
    OPEN_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
    trace!("native connection opened");
}

pub(crate) fn connection_released(path: ReleasePath) {
    OPEN_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
    match path {
        ReleasePath::Explicit => trace!("native connection closed"),
        ReleasePath::Drop => trace!("native connection reclaimed on drop"),
    }
}

pub(crate) fn stream_opened() {
    OPEN_STREAMS.fetch_add(1, Ordering::Relaxed);
    trace!("native stream opened");
}

pub(crate) fn stream_released(path: ReleasePath) {
    OPEN_STREAMS.fetch_sub(1, Ordering::Relaxed);
    match path {
        ReleasePath::Explicit => trace!("native stream released"),
        ReleasePath::Drop => trace!("native stream reclaimed on drop"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_plain_data() {
        let snap = LiveHandles {
            connections: 2,
            streams: 1,
        };
        assert_eq!(snap, snap);
        assert_eq!(
            format!("{snap:?}"),
            "LiveHandles { connections: 2, streams: 1 }"
        );
    }

    // Tests run concurrently and share the process-wide gauges, so absolute
    // values are not assertable here. Exactly-once release is covered by the
    // lifecycle tests against the fake engine.
    #[test]
    fn gauges_accept_both_release_paths() {
        connection_opened();
        connection_released(ReleasePath::Explicit);
        stream_opened();
        stream_released(ReleasePath::Drop);
        let _ = live_handles();
    }
}

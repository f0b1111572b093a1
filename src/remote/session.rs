use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Tracks in-flight work across the pool of authenticated remote sessions.
///
/// The remote store penalises per-session throughput, not per-account, so
/// concurrent requests are spread over the least-loaded session and
/// background cache populations are pushed onto a session other than the one
/// serving the live viewer.
#[derive(Debug)]
pub struct SessionPool {
    loads: Vec<AtomicUsize>,
}

impl SessionPool {
    pub fn new(session_count: usize) -> Self {
        assert!(session_count >= 1, "session pool needs at least one session");
        Self {
            loads: (0..session_count).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.loads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }

    /// In-flight count for one session. May be stale by the time the caller
    /// acts on it, never negative.
    pub fn load(&self, index: usize) -> usize {
        self.loads[index].load(Ordering::Relaxed)
    }

    /// Session with the minimum in-flight count; ties break to the lowest
    /// index.
    pub fn pick_least_loaded(&self) -> usize {
        let mut best = 0;
        let mut best_load = self.loads[0].load(Ordering::Relaxed);
        for (index, load) in self.loads.iter().enumerate().skip(1) {
            let load = load.load(Ordering::Relaxed);
            if load < best_load {
                best = index;
                best_load = load;
            }
        }
        best
    }

    /// The next session over, used to keep background work off the session
    /// that serves the live stream.
    pub fn pick_other(&self, current: usize) -> usize {
        (current + 1) % self.loads.len()
    }

    /// Scoped acquisition: the in-flight counter is incremented here and
    /// released when the lease drops, on every exit path.
    pub fn acquire(self: &Arc<Self>, index: usize) -> SessionLease {
        self.loads[index].fetch_add(1, Ordering::Relaxed);
        debug!(session = index, "session acquired");
        SessionLease {
            pool: Arc::clone(self),
            index,
        }
    }
}

/// RAII guard over one unit of session load.
#[derive(Debug)]
pub struct SessionLease {
    pool: Arc<SessionPool>,
    index: usize,
}

impl SessionLease {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Release this session and acquire the next one over.
    pub fn rotate(self) -> SessionLease {
        let pool = Arc::clone(&self.pool);
        let next = pool.pick_other(self.index);
        drop(self);
        pool.acquire(next)
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.pool.loads[self.index].fetch_sub(1, Ordering::Relaxed);
        debug!(session = self.index, "session released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_loaded_prefers_lowest_index_on_tie() {
        let pool = Arc::new(SessionPool::new(3));
        assert_eq!(pool.pick_least_loaded(), 0);

        let _a = pool.acquire(0);
        assert_eq!(pool.pick_least_loaded(), 1);

        let _b = pool.acquire(1);
        let _c = pool.acquire(2);
        // All tied at one in-flight each.
        assert_eq!(pool.pick_least_loaded(), 0);
    }

    #[test]
    fn pick_other_wraps() {
        let pool = SessionPool::new(2);
        assert_eq!(pool.pick_other(0), 1);
        assert_eq!(pool.pick_other(1), 0);

        let single = SessionPool::new(1);
        assert_eq!(single.pick_other(0), 0);
    }

    #[test]
    fn lease_releases_on_drop() {
        let pool = Arc::new(SessionPool::new(2));
        {
            let lease = pool.acquire(0);
            assert_eq!(pool.load(0), 1);
            let rotated = lease.rotate();
            assert_eq!(pool.load(0), 0);
            assert_eq!(pool.load(1), 1);
            assert_eq!(rotated.index(), 1);
        }
        assert_eq!(pool.load(0), 0);
        assert_eq!(pool.load(1), 0);
    }
}

//! # Connection Pools
//!
//! An elastic set of logical connection handles for one service. A handle is
//! either idle in the pool or owned by exactly one caller; it is not `Clone`
//! and returning it consumes it, so the same handle can never be in use twice.
//! [`ConnectionPool::acquire`] wraps the handle in a [`PooledConnection`]
//! that goes back to the pool when dropped, including on cancellation.

use std::collections::{HashSet, VecDeque};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::{ResilienceError, Result};

/// Size bounds and wait limit for one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    /// Longest a caller waits for a free handle
    pub acquire_timeout: Duration,
}

impl PoolConfig {
    pub fn new(min_size: usize, max_size: usize, acquire_timeout: Duration) -> Self {
        let max_size = max_size.max(min_size).max(1);
        Self {
            min_size,
            max_size,
            acquire_timeout,
        }
    }
}

/// Exclusive right to use one pooled connection
#[derive(Debug)]
pub struct ConnectionHandle {
    id: Uuid,
    label: String,
    service: String,
    created_at: Instant,
}

impl ConnectionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Moves the identity out, leaving an empty shell behind
    fn detach(&mut self) -> ConnectionHandle {
        ConnectionHandle {
            id: self.id,
            label: std::mem::take(&mut self.label),
            service: std::mem::take(&mut self.service),
            created_at: self.created_at,
        }
    }
}

/// Handle checked out through [`ConnectionPool::acquire`], returned on drop
#[derive(Debug)]
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    handle: ConnectionHandle,
}

impl Deref for PooledConnection {
    type Target = ConnectionHandle;

    fn deref(&self) -> &ConnectionHandle {
        &self.handle
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let handle = self.handle.detach();
        self.pool.return_connection(handle);
    }
}

#[derive(Debug)]
struct IdleConnection {
    handle: ConnectionHandle,
    idle_since: Instant,
}

#[derive(Debug, Default)]
struct PoolState {
    available: VecDeque<IdleConnection>,
    in_use: HashSet<Uuid>,
    current_size: usize,
    total_created: u64,
    total_used: u64,
}

/// Point-in-time pool statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub service: String,
    pub current_size: usize,
    pub available: usize,
    pub in_use: usize,
    pub utilization: f64,
    pub total_created: u64,
    pub total_used: u64,
    pub min_size: usize,
    pub max_size: usize,
}

#[derive(Debug)]
pub struct ConnectionPool {
    service: String,
    config: PoolConfig,
    state: Mutex<PoolState>,
    released: Notify,
}

impl ConnectionPool {
    /// Creates the pool pre-filled with `min_size` idle handles
    pub fn new(service: impl Into<String>, config: PoolConfig) -> Self {
        let pool = Self {
            service: service.into(),
            config,
            state: Mutex::new(PoolState::default()),
            released: Notify::new(),
        };
        {
            let mut state = pool.state.lock();
            for _ in 0..config.min_size {
                let handle = pool.create_handle(&mut state);
                state.available.push_back(IdleConnection {
                    handle,
                    idle_since: Instant::now(),
                });
            }
        }
        pool
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    fn create_handle(&self, state: &mut PoolState) -> ConnectionHandle {
        state.total_created += 1;
        state.current_size += 1;
        ConnectionHandle {
            id: Uuid::new_v4(),
            label: format!("{}_conn_{}", self.service, state.total_created),
            service: self.service.clone(),
            created_at: Instant::now(),
        }
    }

    fn try_take(&self) -> Option<ConnectionHandle> {
        let mut state = self.state.lock();
        let handle = match state.available.pop_front() {
            Some(idle) => idle.handle,
            None if state.current_size < self.config.max_size => self.create_handle(&mut state),
            None => return None,
        };
        state.in_use.insert(handle.id);
        state.total_used += 1;
        Some(handle)
    }

    /// Takes an idle handle, grows the pool if below max, or waits for a
    /// release until the acquire timeout runs out
    pub async fn get_connection(&self) -> Result<ConnectionHandle> {
        let deadline = Instant::now() + self.config.acquire_timeout;

        loop {
            if let Some(handle) = self.try_take() {
                return Ok(handle);
            }

            if timeout_at(deadline, self.released.notified()).await.is_err() {
                // one last look, a release may have raced the deadline
                if let Some(handle) = self.try_take() {
                    return Ok(handle);
                }
                warn!(
                    service = %self.service,
                    waited_ms = self.config.acquire_timeout.as_millis() as u64,
                    "Connection pool exhausted"
                );
                return Err(ResilienceError::pool_exhausted(
                    self.service.clone(),
                    self.config.acquire_timeout,
                ));
            }
        }
    }

    /// Like [`get_connection`](Self::get_connection), returning the handle
    /// to this pool when the result is dropped
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection> {
        let handle = self.get_connection().await?;
        Ok(PooledConnection {
            pool: Arc::clone(self),
            handle,
        })
    }

    /// Puts a handle back; handles this pool does not own are dropped.
    /// Returns whether the handle was accepted.
    pub fn return_connection(&self, handle: ConnectionHandle) -> bool {
        let mut state = self.state.lock();
        if !state.in_use.remove(&handle.id) {
            warn!(
                service = %self.service,
                connection = %handle.label,
                "Ignoring connection not owned by this pool"
            );
            return false;
        }
        state.available.push_back(IdleConnection {
            handle,
            idle_since: Instant::now(),
        });
        drop(state);
        self.released.notify_one();
        true
    }

    /// Adds one idle handle if below max
    pub fn expand(&self) -> bool {
        let mut state = self.state.lock();
        if state.current_size >= self.config.max_size {
            return false;
        }
        let handle = self.create_handle(&mut state);
        state.available.push_back(IdleConnection {
            handle,
            idle_since: Instant::now(),
        });
        drop(state);
        self.released.notify_one();
        true
    }

    /// Closes one idle handle if above min
    pub fn shrink(&self) -> bool {
        let mut state = self.state.lock();
        Self::shrink_locked(&mut state, self.config.min_size)
    }

    fn shrink_locked(state: &mut PoolState, min_size: usize) -> bool {
        if state.current_size <= min_size {
            return false;
        }
        match state.available.pop_back() {
            Some(_) => {
                state.current_size -= 1;
                true
            }
            None => false,
        }
    }

    /// Closes idle handles down to min, returns how many were closed
    pub fn reduce_size(&self) -> usize {
        let mut state = self.state.lock();
        let mut closed = 0;
        while Self::shrink_locked(&mut state, self.config.min_size) {
            closed += 1;
        }
        closed
    }

    /// Grows or shrinks toward `current_size * factor`, within [min, max]
    pub fn scale(&self, factor: f64) -> usize {
        let factor = factor.max(0.0);
        let current = self.state.lock().current_size;
        let target = ((current as f64) * factor) as usize;
        let target = target.clamp(self.config.min_size, self.config.max_size);

        if target > current {
            for _ in current..target {
                if !self.expand() {
                    break;
                }
            }
        } else {
            let mut state = self.state.lock();
            while state.current_size > target && Self::shrink_locked(&mut state, self.config.min_size) {}
        }

        let size = self.state.lock().current_size;
        debug!(service = %self.service, factor, from = current, to = size, "Pool scaled");
        size
    }

    /// Closes handles idle longer than `max_idle`, never going below min
    pub fn cleanup_idle(&self, max_idle: Duration) -> usize {
        let mut state = self.state.lock();
        let min_size = self.config.min_size;
        let mut closed = 0;
        let mut kept = VecDeque::with_capacity(state.available.len());

        while let Some(idle) = state.available.pop_front() {
            if idle.idle_since.elapsed() > max_idle && state.current_size > min_size {
                state.current_size -= 1;
                closed += 1;
            } else {
                kept.push_back(idle);
            }
        }
        state.available = kept;
        closed
    }

    /// Fraction of handles currently out, 0.0 for an empty pool
    pub fn utilization(&self) -> f64 {
        let state = self.state.lock();
        if state.current_size == 0 {
            0.0
        } else {
            state.in_use.len() as f64 / state.current_size as f64
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let utilization = if state.current_size == 0 {
            0.0
        } else {
            state.in_use.len() as f64 / state.current_size as f64
        };
        PoolStats {
            service: self.service.clone(),
            current_size: state.current_size,
            available: state.available.len(),
            in_use: state.in_use.len(),
            utilization,
            total_created: state.total_created,
            total_used: state.total_used,
            min_size: self.config.min_size,
            max_size: self.config.max_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariant(pool: &ConnectionPool) {
        let stats = pool.stats();
        assert_eq!(stats.available + stats.in_use, stats.current_size);
        assert!(stats.current_size >= stats.min_size);
        assert!(stats.current_size <= stats.max_size);
    }

    #[test]
    fn test_prefilled_to_min() {
        let pool = ConnectionPool::new("cache", PoolConfig::new(3, 6, Duration::from_millis(10)));
        let stats = pool.stats();
        assert_eq!(stats.current_size, 3);
        assert_eq!(stats.available, 3);
        assert_eq!(stats.total_created, 3);
    }

    #[tokio::test]
    async fn test_get_and_return() {
        let pool = ConnectionPool::new("database", PoolConfig::new(1, 2, Duration::from_millis(10)));

        let first = pool.get_connection().await.unwrap();
        let second = pool.get_connection().await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(pool.stats().in_use, 2);
        assert_eq!(pool.utilization(), 1.0);
        assert_invariant(&pool);

        assert!(pool.return_connection(first));
        assert_eq!(pool.stats().available, 1);
        assert_invariant(&pool);
        assert!(pool.return_connection(second));
        assert_eq!(pool.stats().total_used, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_timeout() {
        let pool = ConnectionPool::new("customs_api", PoolConfig::new(1, 1, Duration::from_secs(5)));
        let _held = pool.get_connection().await.unwrap();

        let err = pool.get_connection().await.unwrap_err();
        assert!(matches!(err, ResilienceError::PoolExhausted { .. }));
        assert_eq!(err.service(), Some("customs_api"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_gets_released_handle() {
        let pool = Arc::new(ConnectionPool::new(
            "llm_api",
            PoolConfig::new(1, 1, Duration::from_secs(5)),
        ));
        let held = pool.get_connection().await.unwrap();
        let held_id = held.id();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get_connection().await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        pool.return_connection(held);

        let handle = waiter.await.unwrap().unwrap();
        assert_eq!(handle.id(), held_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pooled_connection_returns_on_drop() {
        let pool = Arc::new(ConnectionPool::new("tariff_api", PoolConfig::new(1, 1, Duration::from_secs(5))));

        let held = pool.acquire().await.unwrap();
        let held_id = held.id();
        assert_eq!(held.service(), "tariff_api");
        assert_eq!(pool.stats().in_use, 1);
        drop(held);
        assert_eq!(pool.stats().in_use, 0);
        assert_invariant(&pool);

        // a caller cancelled while holding the only handle gives it back
        let task = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let _conn = pool.acquire().await.unwrap();
                std::future::pending::<()>().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.stats().in_use, 1);
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id(), held_id);
        assert_invariant(&pool);
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let pool_a = ConnectionPool::new("tariff_api", PoolConfig::new(1, 2, Duration::from_millis(10)));
        let pool_b = ConnectionPool::new("trade_data_api", PoolConfig::new(1, 2, Duration::from_millis(10)));
        let handle = tokio_test::block_on(pool_a.get_connection()).unwrap();

        assert!(!pool_b.return_connection(handle));
        assert_invariant(&pool_b);
    }

    #[test]
    fn test_expand_shrink_stay_in_bounds() {
        let pool = ConnectionPool::new("tariff_api", PoolConfig::new(2, 4, Duration::from_millis(10)));
        for _ in 0..10 {
            pool.expand();
            assert_invariant(&pool);
        }
        assert_eq!(pool.stats().current_size, 4);

        for _ in 0..10 {
            pool.shrink();
            assert_invariant(&pool);
        }
        assert_eq!(pool.stats().current_size, 2);
    }

    #[test]
    fn test_shrink_never_closes_in_use() {
        let pool = ConnectionPool::new("database", PoolConfig::new(0, 3, Duration::from_millis(10)));
        let a = tokio_test::block_on(pool.get_connection()).unwrap();
        let b = tokio_test::block_on(pool.get_connection()).unwrap();

        assert!(!pool.shrink());
        assert_eq!(pool.reduce_size(), 0);
        assert_eq!(pool.stats().in_use, 2);

        pool.return_connection(a);
        pool.return_connection(b);
        assert_eq!(pool.reduce_size(), 2);
        assert_invariant(&pool);
    }

    #[test]
    fn test_scale_is_clamped() {
        let pool = ConnectionPool::new("llm_api", PoolConfig::new(4, 10, Duration::from_millis(10)));
        assert_eq!(pool.scale(2.0), 8);
        assert_eq!(pool.scale(2.0), 10);
        assert_eq!(pool.scale(0.1), 4);
        assert_invariant(&pool);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_idle_down_to_min() {
        let pool = ConnectionPool::new("cache", PoolConfig::new(2, 5, Duration::from_millis(10)));
        pool.expand();
        pool.expand();

        tokio::time::advance(Duration::from_secs(11 * 60)).await;
        let closed = pool.cleanup_idle(Duration::from_secs(10 * 60));
        assert_eq!(closed, 2);
        assert_eq!(pool.stats().current_size, 2);
        assert_invariant(&pool);
    }
}

//! Bounded asynchronous connection pool.
//!
//! Physical connections are leased FIFO from the idle set; a fair semaphore
//! queues waiters when the pool is at `max_connection_count`. Expiry
//! predicates run at lease and at return; an expired or dirty connection is
//! closed, and the waiter that freed slot simply opens a fresh one.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};
use crate::opts::Opts;

use super::Conn;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolOpts {
    /// Upper bound on simultaneously open physical connections
    pub max_connection_count: usize,
    /// Maximum wall-time since a connection was opened
    pub max_connection_age: Option<Duration>,
    /// Maximum idle time since a connection was last returned
    pub max_idle_time: Option<Duration>,
    /// Maximum number of statements executed on one connection
    pub max_query_count: Option<u64>,
    /// Connection options for opening physical connections
    pub connect: Opts,
}

impl PoolOpts {
    /// Pool options with the default single-connection bound.
    pub fn new(connect: Opts) -> Self {
        Self {
            max_connection_count: 1,
            max_connection_age: None,
            max_idle_time: None,
            max_query_count: None,
            connect,
        }
    }
}

struct IdleConn {
    conn: Conn,
    released_at: Instant,
}

struct PoolInner {
    opts: PoolOpts,
    /// Idle connections, FIFO. The mutex guards list manipulation only,
    /// never I/O.
    idle: Mutex<VecDeque<IdleConn>>,
    semaphore: Arc<Semaphore>,
    waiters: AtomicUsize,
    closed: AtomicBool,
}

impl PoolInner {
    /// Expiry predicates that apply to the connection itself.
    fn conn_expired(&self, conn: &Conn) -> bool {
        if let Some(age) = self.opts.max_connection_age {
            if conn.opened_at.elapsed() > age {
                return true;
            }
        }
        if let Some(limit) = self.opts.max_query_count {
            if conn.queries_executed >= limit {
                return true;
            }
        }
        false
    }

    /// Expiry predicates for an idle entry.
    fn idle_expired(&self, entry: &IdleConn) -> bool {
        if self.conn_expired(&entry.conn) {
            return true;
        }
        match self.opts.max_idle_time {
            Some(limit) => entry.released_at.elapsed() > limit,
            None => false,
        }
    }
}

/// Bounded connection pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool. No connections are opened until the first lease.
    pub fn new(opts: PoolOpts) -> Self {
        let semaphore = Arc::new(Semaphore::new(opts.max_connection_count.max(1)));
        Self {
            inner: Arc::new(PoolInner {
                opts,
                idle: Mutex::new(VecDeque::new()),
                semaphore,
                waiters: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Lease a session, waiting FIFO if the pool is at capacity.
    pub async fn get(&self) -> Result<PooledConn> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::InvalidUsage("pool is closed".into()));
        }

        self.inner.waiters.fetch_add(1, Ordering::Relaxed);
        let permit = self.inner.semaphore.clone().acquire_owned().await;
        self.inner.waiters.fetch_sub(1, Ordering::Relaxed);
        let permit =
            permit.map_err(|_| Error::InvalidUsage("pool is closed".into()))?;

        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::InvalidUsage("pool is closed".into()));
        }

        self.lease(permit).await
    }

    /// Non-blocking lease: fails with [`Error::PoolExhausted`] instead of
    /// queuing when the pool is at capacity.
    pub async fn try_get(&self) -> Result<PooledConn> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::InvalidUsage("pool is closed".into()));
        }
        let permit = self
            .inner
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| Error::PoolExhausted)?;
        self.lease(permit).await
    }

    async fn lease(&self, permit: OwnedSemaphorePermit) -> Result<PooledConn> {
        // Reuse the oldest idle connection that passes the expiry checks
        loop {
            let candidate = {
                let mut idle = self.inner.idle.lock().expect("pool lock poisoned");
                idle.pop_front()
            };
            let entry = match candidate {
                Some(entry) => entry,
                None => break,
            };

            if self.inner.idle_expired(&entry) {
                log::debug!(
                    target: "pgnet::pool",
                    "pool_close backend={} reason=expired",
                    entry.conn.connection_id()
                );
                tokio::spawn(async move {
                    let _ = entry.conn.close().await;
                });
                continue;
            }

            log::trace!(
                target: "pgnet::pool",
                "pool_lease backend={}",
                entry.conn.connection_id()
            );
            return Ok(PooledConn {
                conn: Some(entry.conn),
                pool: self.inner.clone(),
                permit: Some(permit),
            });
        }

        // Nothing idle: open a fresh physical connection
        let conn = Conn::connect(self.inner.opts.connect.clone()).await?;
        log::debug!(
            target: "pgnet::pool",
            "pool_open backend={}",
            conn.connection_id()
        );
        Ok(PooledConn {
            conn: Some(conn),
            pool: self.inner.clone(),
            permit: Some(permit),
        })
    }

    /// Number of idle connections currently pooled.
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().expect("pool lock poisoned").len()
    }

    /// Shut the pool down: refuse new leases, wait for outstanding leases
    /// to return (up to `deadline`, or indefinitely), then terminate every
    /// pooled connection.
    pub async fn close(&self, deadline: Option<Duration>) {
        self.inner.closed.store(true, Ordering::Release);

        let all_permits = self
            .inner
            .semaphore
            .clone()
            .acquire_many_owned(self.inner.opts.max_connection_count.max(1) as u32);
        match deadline {
            Some(limit) => {
                let _ = tokio::time::timeout(limit, all_permits).await;
            }
            None => {
                let _ = all_permits.await;
            }
        }

        let drained: Vec<IdleConn> = {
            let mut idle = self.inner.idle.lock().expect("pool lock poisoned");
            idle.drain(..).collect()
        };
        for entry in drained {
            let _ = entry.conn.close().await;
        }

        self.inner.semaphore.close();
        log::debug!(target: "pgnet::pool", "pool_close reason=shutdown");
    }
}

/// A leased session. Dereferences to [`Conn`]; returning it to the pool
/// happens on drop.
pub struct PooledConn {
    conn: Option<Conn>,
    pool: Arc<PoolInner>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Deref for PooledConn {
    type Target = Conn;
    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection taken")
    }
}

impl DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection taken")
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };
        let permit = self.permit.take();
        let pool = self.pool.clone();
        tokio::spawn(async move {
            check_in(pool, conn, permit).await;
        });
    }
}

/// Return a connection to the pool.
///
/// A connection coming back inside a transaction is rolled back and
/// discarded; broken or expired connections are closed. The permit is
/// released only after the idle list is updated, so a queued waiter always
/// observes the returned connection.
async fn check_in(pool: Arc<PoolInner>, mut conn: Conn, permit: Option<OwnedSemaphorePermit>) {
    log::trace!(
        target: "pgnet::pool",
        "pool_return backend={}",
        conn.connection_id()
    );

    let mut discard = conn.is_broken();
    if !discard && conn.transaction_status().in_transaction() {
        // The lease ended without resolving its transaction
        let _ = conn.force_rollback().await;
        discard = true;
    }

    let closed = pool.closed.load(Ordering::Acquire);
    if discard || closed || pool.conn_expired(&conn) {
        log::debug!(
            target: "pgnet::pool",
            "pool_close backend={} reason={}",
            conn.connection_id(),
            if discard { "discarded" } else { "expired" }
        );
        let _ = conn.close().await;
        // The freed permit lets the next waiter open a replacement
        drop(permit);
        return;
    }

    {
        let mut idle = pool.idle.lock().expect("pool lock poisoned");
        idle.push_back(IdleConn {
            conn,
            released_at: Instant::now(),
        });
    }
    drop(permit);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_opts() {
        let opts = PoolOpts::new(Opts::default());
        assert_eq!(opts.max_connection_count, 1);
        assert!(opts.max_connection_age.is_none());
        assert!(opts.max_idle_time.is_none());
        assert!(opts.max_query_count.is_none());
    }

    #[tokio::test]
    async fn closed_pool_refuses_leases() {
        let pool = Pool::new(PoolOpts::new(Opts::default()));
        pool.close(Some(Duration::from_millis(10))).await;
        assert!(pool.get().await.is_err());
        assert!(pool.try_get().await.is_err());
    }

    #[tokio::test]
    async fn try_get_reports_exhaustion_without_waiting() {
        // The semaphore is held by taking all permits directly; try_get
        // must fail immediately with PoolExhausted.
        let pool = Pool::new(PoolOpts::new(Opts::default()));
        let _held = pool
            .inner
            .semaphore
            .clone()
            .try_acquire_owned()
            .unwrap();
        match pool.try_get().await {
            Err(Error::PoolExhausted) => {}
            other => panic!("expected PoolExhausted, got {:?}", other.map(|_| ())),
        }
    }
}

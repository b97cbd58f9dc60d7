//! Connection pooling for engine clients.

use std::ops::{Deref, DerefMut};
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_lock::{Semaphore, SemaphoreGuardArc};
use futures::future::{Either, select};
use futures_timer::Delay;
use parking_lot::Mutex;

use dockyard_core::TransportError;

/// A connection that can tell whether it may serve another exchange.
pub trait Reusable {
    /// `false` once the connection is closed or left mid-exchange.
    fn is_reusable(&self) -> bool;
}

/// Configuration for connection pooling.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum idle connections kept for reuse.
    pub max_idle: usize,

    /// Maximum connections checked out at once. Unbounded when `None`.
    pub max_connections: Option<usize>,

    /// Maximum lifetime of a connection.
    pub max_lifetime: Duration,

    /// Idle timeout before closing a connection.
    pub idle_timeout: Duration,

    /// Timeout for acquiring a connection from the pool.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: 128,
            max_connections: None,
            max_lifetime: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(90),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of idle connections kept for reuse.
    #[must_use]
    pub fn max_idle(mut self, max: usize) -> Self {
        self.max_idle = max;
        self
    }

    /// Bound the connections checked out at once.
    ///
    /// Callers past the bound wait up to `acquire_timeout` for a slot.
    #[must_use]
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Set maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set acquire timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// A checked-out connection.
///
/// Dropping it hands the connection back to the pool when it is still
/// reusable, and closes it otherwise.
pub struct PooledConnection<C: Reusable + Send + 'static> {
    connection: Option<C>,
    created: Instant,
    reused: bool,
    pool: Arc<ConnectionPoolInner<C>>,
    _permit: Option<SemaphoreGuardArc>,
}

impl<C: Reusable + Send + 'static> PooledConnection<C> {
    /// Whether this connection served an earlier exchange.
    #[must_use]
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Drop the connection without returning it to the pool.
    pub fn discard(mut self) {
        self.connection.take();
    }
}

impl<C: Reusable + Send + 'static> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.connection.as_ref().expect("connection present until drop")
    }
}

impl<C: Reusable + Send + 'static> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.connection.as_mut().expect("connection present until drop")
    }
}

impl<C: Reusable + Send + 'static> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::Relaxed);
        if let Some(conn) = self.connection.take() {
            self.pool.release(conn, self.created);
        }
    }
}

struct IdleConnection<C> {
    connection: C,
    created: Instant,
    returned: Instant,
}

struct ConnectionPoolInner<C> {
    idle: Mutex<Vec<IdleConnection<C>>>,
    semaphore: Option<Arc<Semaphore>>,
    config: PoolConfig,
    in_use: AtomicUsize,
    closed: AtomicBool,
}

impl<C: Reusable + Send + 'static> ConnectionPoolInner<C> {
    fn is_fresh(&self, created: Instant, returned: Instant) -> bool {
        created.elapsed() <= self.config.max_lifetime
            && returned.elapsed() <= self.config.idle_timeout
    }

    fn release(&self, connection: C, created: Instant) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }

        if !connection.is_reusable() {
            tracing::debug!("closing connection left mid-exchange");
            return;
        }

        // Don't return expired connections
        if created.elapsed() > self.config.max_lifetime {
            return;
        }

        let mut idle = self.idle.lock();
        if idle.len() < self.config.max_idle {
            idle.push(IdleConnection {
                connection,
                created,
                returned: Instant::now(),
            });
        }
    }

    fn pop_idle(&self) -> Option<(C, Instant)> {
        let mut idle = self.idle.lock();
        while let Some(entry) = idle.pop() {
            if self.is_fresh(entry.created, entry.returned) && entry.connection.is_reusable() {
                return Some((entry.connection, entry.created));
            }
        }
        None
    }

    fn cleanup(&self) {
        self.idle.lock().retain(|c| {
            self.is_fresh(c.created, c.returned) && c.connection.is_reusable()
        });
    }
}

/// Connection pool for one endpoint.
///
/// Idle connections are reused most-recent first and at most `max_idle` are
/// kept. Checkouts are unbounded unless `max_connections` is set; then a
/// caller that cannot get a slot within `acquire_timeout` fails with
/// [`TransportError::PoolExhausted`].
///
/// ## Example
///
/// ```rust
/// use dockyard_transport::{ConnectionPool, PoolConfig, Reusable};
/// use std::time::Duration;
///
/// struct Conn;
///
/// impl Reusable for Conn {
///     fn is_reusable(&self) -> bool {
///         true
///     }
/// }
///
/// let config = PoolConfig::default()
///     .max_idle(32)
///     .idle_timeout(Duration::from_secs(120));
///
/// let pool: ConnectionPool<Conn> = ConnectionPool::new(config);
/// // let conn = pool.get_or_create(|| async { Ok(Conn) }).await?;
/// ```
pub struct ConnectionPool<C> {
    inner: Arc<ConnectionPoolInner<C>>,
}

impl<C: Reusable + Send + 'static> ConnectionPool<C> {
    /// Create a new connection pool.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(ConnectionPoolInner {
                idle: Mutex::new(Vec::new()),
                semaphore: config.max_connections.map(|max| Arc::new(Semaphore::new(max))),
                config,
                in_use: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Get an idle connection from the pool, or create one.
    pub async fn get_or_create<F, Fut>(&self, create: F) -> Result<PooledConnection<C>, TransportError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C, TransportError>>,
    {
        if self.inner.closed.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }

        let permit = match &self.inner.semaphore {
            Some(semaphore) => Some(self.acquire(semaphore).await?),
            None => None,
        };

        let (connection, created, reused) = match self.inner.pop_idle() {
            Some((connection, created)) => (connection, created, true),
            None => (create().await?, Instant::now(), false),
        };

        self.inner.in_use.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnection {
            connection: Some(connection),
            created,
            reused,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    async fn acquire(&self, semaphore: &Arc<Semaphore>) -> Result<SemaphoreGuardArc, TransportError> {
        let acquire_fut = pin!(semaphore.acquire_arc());
        let timeout_fut = pin!(Delay::new(self.inner.config.acquire_timeout));

        match select(acquire_fut, timeout_fut).await {
            Either::Left((permit, _)) => Ok(permit),
            Either::Right(_) => Err(TransportError::PoolExhausted),
        }
    }

    /// Current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle_connections: self.inner.idle.lock().len(),
            in_use_connections: self.inner.in_use.load(Ordering::Relaxed),
            max_connections: self.inner.config.max_connections,
        }
    }

    /// Run cleanup to remove expired connections.
    pub fn cleanup(&self) {
        self.inner.cleanup();
    }

    /// Close the pool, dropping idle connections and refusing checkouts.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Relaxed);
        self.inner.idle.lock().clear();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl<C> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Statistics for the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of idle connections.
    pub idle_connections: usize,
    /// Number of checked-out connections.
    pub in_use_connections: usize,
    /// Checkout bound, if any.
    pub max_connections: Option<usize>,
}

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, info};

use warden_wire::Connection;

/// Keep-alive idle time for pooled back-end connections.
const KEEPALIVE: Duration = Duration::from_secs(60);

/// Opens new connections for a [`Pool`].
pub trait Dial: Send + Sync + 'static {
    type Conn: Send + 'static;

    fn dial(&self) -> impl Future<Output = io::Result<Self::Conn>> + Send;
}

/// Dials the back-end over TCP with `TCP_NODELAY` and keep-alive set.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    addr: String,
}

impl TcpDialer {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl Dial for TcpDialer {
    type Conn = Connection<TcpStream>;

    fn dial(&self) -> impl Future<Output = io::Result<Self::Conn>> + Send {
        let addr = self.addr.clone();
        async move {
            let stream = TcpStream::connect(&addr).await?;
            let sock = SockRef::from(&stream);
            sock.set_nodelay(true)?;
            sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE))?;
            debug!("dialed back-end {}", addr);
            Ok(Connection::new(stream))
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections dialed up front. Clamped to `max_size`.
    pub initial_size: usize,
    /// Most idle connections kept for reuse.
    pub max_size: usize,
    /// Hard ceiling on connections alive at once (idle plus checked out).
    /// `None` means `get` always dials when nothing is idle.
    pub max_open: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 5,
            max_size: 16,
            max_open: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to dial back-end: {0}")]
    Dial(#[from] io::Error),

    #[error("pool exhausted: {0} connections open")]
    Exhausted(usize),
}

/// Lifetime counters. `total == alloced + reused` always holds; a `get`
/// refused by the `max_open` ceiling is not counted at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Calls to `get` that reused or dialed.
    pub total: u64,
    /// Dials started by `get`, failed ones included.
    pub alloced: u64,
    /// `get` calls served from the idle queue.
    pub reused: u64,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total: {}, Allocated: {}, Reused: {}",
            self.total, self.alloced, self.reused
        )
    }
}

/// A bounded pool of reusable connections.
///
/// `get` never waits for a connection to come back: it takes an idle one or
/// dials a new one. Cheap to clone; clones share the same queue.
pub struct Pool<D: Dial> {
    inner: Arc<PoolInner<D>>,
}

struct PoolInner<D: Dial> {
    config: PoolConfig,
    dialer: D,
    idle: Mutex<VecDeque<D::Conn>>,
    /// Idle plus checked out. Shared with every `Pooled`.
    open: Arc<AtomicUsize>,
    total: AtomicU64,
    alloced: AtomicU64,
    reused: AtomicU64,
}

impl<D: Dial> Clone for Pool<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: Dial> Pool<D> {
    /// Build a pool and dial `initial_size` connections. Fails if any of
    /// those dials fails.
    pub async fn new(mut config: PoolConfig, dialer: D) -> Result<Self, PoolError> {
        config.initial_size = config.initial_size.min(config.max_size);
        if let Some(max_open) = config.max_open {
            config.initial_size = config.initial_size.min(max_open);
        }

        let mut idle = VecDeque::with_capacity(config.max_size);
        for _ in 0..config.initial_size {
            idle.push_back(dialer.dial().await?);
        }
        info!(
            "connection pool ready: {} idle, max {}",
            idle.len(),
            config.max_size
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                open: Arc::new(AtomicUsize::new(idle.len())),
                idle: Mutex::new(idle),
                config,
                dialer,
                total: AtomicU64::new(0),
                alloced: AtomicU64::new(0),
                reused: AtomicU64::new(0),
            }),
        })
    }

    /// Check a connection out, preferring the most recently returned idle
    /// one.
    pub async fn get(&self) -> Result<Pooled<D::Conn>, PoolError> {
        let inner = &self.inner;

        let idle = self.lock_idle().pop_back();
        if let Some(conn) = idle {
            inner.total.fetch_add(1, Ordering::Relaxed);
            inner.reused.fetch_add(1, Ordering::Relaxed);
            return Ok(Pooled::new(conn, inner.open.clone()));
        }

        self.reserve()?;
        inner.total.fetch_add(1, Ordering::Relaxed);
        inner.alloced.fetch_add(1, Ordering::Relaxed);
        match inner.dialer.dial().await {
            Ok(conn) => Ok(Pooled::new(conn, inner.open.clone())),
            Err(e) => {
                inner.open.fetch_sub(1, Ordering::AcqRel);
                Err(PoolError::Dial(e))
            }
        }
    }

    /// Return a healthy connection. If the idle queue is full it is closed.
    pub fn put(&self, mut conn: Pooled<D::Conn>) {
        let Some(raw) = conn.conn.take() else {
            return;
        };

        let mut idle = self.lock_idle();
        if idle.len() < self.inner.config.max_size {
            idle.push_back(raw);
        } else {
            drop(idle);
            drop(raw);
            self.inner.open.fetch_sub(1, Ordering::AcqRel);
            debug!("idle queue full, closed returned connection");
        }
    }

    /// Close a connection that must not be reused.
    pub fn destroy(&self, conn: Pooled<D::Conn>) {
        drop(conn);
        debug!("destroyed pooled connection");
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.inner.total.load(Ordering::Relaxed),
            alloced: self.inner.alloced.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
        }
    }

    /// Connections waiting in the queue.
    pub fn idle(&self) -> usize {
        self.lock_idle().len()
    }

    /// Connections alive: idle plus checked out.
    pub fn open(&self) -> usize {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Claim a slot for a connection about to be dialed.
    fn reserve(&self) -> Result<(), PoolError> {
        let open = &self.inner.open;
        match self.inner.config.max_open {
            None => {
                open.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            Some(max) => open
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < max).then_some(n + 1)
                })
                .map(|_| ())
                .map_err(PoolError::Exhausted),
        }
    }

    fn lock_idle(&self) -> MutexGuard<'_, VecDeque<D::Conn>> {
        self.inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A checked-out connection. Dropping it without `put` closes it.
pub struct Pooled<C> {
    conn: Option<C>,
    open: Arc<AtomicUsize>,
}

impl<C> Pooled<C> {
    fn new(conn: C, open: Arc<AtomicUsize>) -> Self {
        Self {
            conn: Some(conn),
            open,
        }
    }
}

impl<C> Deref for Pooled<C> {
    type Target = C;

    fn deref(&self) -> &C {
        // Only `put` takes the connection, and it consumes `self`.
        self.conn.as_ref().expect("connection exists")
    }
}

impl<C> DerefMut for Pooled<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection exists")
    }
}

impl<C> Drop for Pooled<C> {
    fn drop(&mut self) {
        if self.conn.take().is_some() {
            self.open.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

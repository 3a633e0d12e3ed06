//! Generic pool of reusable backend connections.
//!
//! The pool owns idle connections; a connection on loan is owned by exactly
//! one [`PooledConnection`] until it is released back or discarded. Pool
//! state is guarded by a single mutex, so `acquire`, `release`, `discard`
//! and `clear` may be called from any number of threads.

use crate::error::ClientError;
use crate::node::{Exclusions, Node};
use parking_lot::{Condvar, Mutex};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// A connection that knows which node it is bound to.
pub trait Pooled: Send {
    fn node(&self) -> &Arc<Node>;
}

/// Creates a connection to some node not in the exclusion set.
pub type Factory<C> = Box<dyn Fn(&Exclusions) -> Result<C, ClientError> + Send + Sync>;

/// Destroys a connection that will not be reused.
pub type Teardown<C> = Box<dyn Fn(C) + Send + Sync>;

struct PoolState<C> {
    idle: Vec<C>,
    on_loan: usize,
    /// Bumped by `clear()`; loans from an older generation are not reused.
    generation: u64,
}

/// A pool of connections.
pub struct Pool<C: Pooled> {
    factory: Factory<C>,
    teardown: Teardown<C>,
    max_size: Option<usize>,
    state: Mutex<PoolState<C>>,
    available: Condvar,
}

impl<C: Pooled> Pool<C> {
    /// Creates an unbounded pool.
    pub fn new(factory: Factory<C>, teardown: Teardown<C>) -> Self {
        Self {
            factory,
            teardown,
            max_size: None,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                on_loan: 0,
                generation: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Caps the number of connections (idle plus on loan).
    pub fn with_max_size(mut self, max_size: Option<usize>) -> Self {
        self.max_size = max_size.map(|n| n.max(1));
        self
    }

    /// Takes a connection whose node is not excluded.
    ///
    /// Reuses an idle connection when one matches, otherwise creates one with
    /// the factory. A bounded pool at capacity first evicts a non-matching
    /// idle connection; with nothing to evict it blocks until a connection is
    /// returned. Factory errors are returned as-is.
    pub fn acquire(&self, excluded: &Exclusions) -> Result<PooledConnection<'_, C>, ClientError> {
        let mut state = self.state.lock();
        loop {
            if let Some(pos) = state
                .idle
                .iter()
                .position(|conn| !excluded.contains(conn.node().id()))
            {
                let conn = state.idle.swap_remove(pos);
                state.on_loan += 1;
                let generation = state.generation;
                return Ok(PooledConnection::new(self, conn, generation));
            }

            let evicted = match self.max_size {
                Some(max) if state.idle.len() + state.on_loan >= max => match state.idle.pop() {
                    Some(conn) => Some(conn),
                    None => {
                        tracing::debug!("Pool exhausted ({} on loan), waiting", state.on_loan);
                        self.available.wait(&mut state);
                        continue;
                    }
                },
                _ => None,
            };

            // Reserve the slot before creating outside the lock.
            state.on_loan += 1;
            let generation = state.generation;
            drop(state);

            if let Some(conn) = evicted {
                tracing::debug!("Evicting idle connection to {}", conn.node().id());
                (self.teardown)(conn);
            }

            return match (self.factory)(excluded) {
                Ok(conn) => Ok(PooledConnection::new(self, conn, generation)),
                Err(e) => {
                    self.forget_loan();
                    Err(e)
                }
            };
        }
    }

    /// Tears down every idle connection.
    ///
    /// Connections currently on loan are torn down when they come back.
    pub fn clear(&self) {
        let idle = {
            let mut state = self.state.lock();
            state.generation += 1;
            std::mem::take(&mut state.idle)
        };
        tracing::debug!("Clearing pool ({} idle connections)", idle.len());
        for conn in idle {
            (self.teardown)(conn);
        }
        self.available.notify_all();
    }

    /// Returns the number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Returns the number of connections on loan.
    pub fn on_loan_count(&self) -> usize {
        self.state.lock().on_loan
    }

    fn release(&self, conn: C, generation: u64) {
        let stale = {
            let mut state = self.state.lock();
            state.on_loan -= 1;
            if generation == state.generation {
                state.idle.push(conn);
                None
            } else {
                Some(conn)
            }
        };
        if let Some(conn) = stale {
            (self.teardown)(conn);
        }
        self.available.notify_one();
    }

    fn discard(&self, conn: C) {
        self.forget_loan();
        (self.teardown)(conn);
    }

    fn forget_loan(&self) {
        self.state.lock().on_loan -= 1;
        self.available.notify_one();
    }
}

/// A connection on loan from a [`Pool`].
///
/// Call [`release`](Self::release) to return a healthy connection or
/// [`discard`](Self::discard) to destroy a broken one. Dropping the lease
/// without either frees its slot and closes the connection through its own
/// `Drop`.
pub struct PooledConnection<'a, C: Pooled> {
    conn: C,
    loan: Loan<'a, C>,
}

struct Loan<'a, C: Pooled> {
    pool: &'a Pool<C>,
    generation: u64,
    settled: bool,
}

impl<C: Pooled> Drop for Loan<'_, C> {
    fn drop(&mut self) {
        if !self.settled {
            self.pool.forget_loan();
        }
    }
}

impl<'a, C: Pooled> PooledConnection<'a, C> {
    fn new(pool: &'a Pool<C>, conn: C, generation: u64) -> Self {
        Self {
            conn,
            loan: Loan {
                pool,
                generation,
                settled: false,
            },
        }
    }

    /// Returns the connection to the pool for reuse.
    pub fn release(self) {
        let PooledConnection { conn, mut loan } = self;
        loan.settled = true;
        loan.pool.release(conn, loan.generation);
    }

    /// Tears the connection down permanently.
    pub fn discard(self) {
        let PooledConnection { conn, mut loan } = self;
        loan.settled = true;
        loan.pool.discard(conn);
    }
}

impl<C: Pooled> Deref for PooledConnection<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C: Pooled> DerefMut for PooledConnection<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

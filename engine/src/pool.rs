//! Fixed-capacity session pool
//!
//! Sessions are created eagerly at startup and handed out one at a time via
//! RAII leases. Waiters are served strictly first-come-first-served through
//! a ticket queue, so a burst of requests cannot starve the earliest caller.
//! An unhealthy handle is retired on return and the factory is asked for a
//! replacement; if that fails the pool shrinks and keeps serving with what
//! is left.

use crate::batch::Batch;
use crate::error::{EngineError, Result};
use crate::session::{RawOutput, SessionFactory, SessionHandle};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct PoolState {
    free: Vec<SessionHandle>,
    queue: VecDeque<u64>,
    next_ticket: u64,
    /// Sessions that still exist, free or leased.
    live: usize,
    leased: usize,
    closed: bool,
}

/// Pool of interchangeable model sessions.
pub struct SessionPool {
    factory: Arc<dyn SessionFactory>,
    capacity: usize,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl SessionPool {
    /// Create `capacity` sessions up front. Fails fast if any session
    /// cannot be built.
    pub fn new(factory: Arc<dyn SessionFactory>, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(EngineError::Config(
                "Session pool capacity must be at least 1".to_string(),
            ));
        }

        let mut free = Vec::with_capacity(capacity);
        for id in 0..capacity {
            free.push(factory.create(id)?);
        }
        log::info!("session pool ready with {} session(s)", capacity);

        Ok(Self {
            factory,
            capacity,
            state: Mutex::new(PoolState {
                free,
                queue: VecDeque::new(),
                next_ticket: 0,
                live: capacity,
                leased: 0,
                closed: false,
            }),
            available: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sessions currently alive (free or leased). Shrinks when a retired
    /// session cannot be replaced.
    pub fn live(&self) -> usize {
        self.state.lock().live
    }

    /// Borrow a session, waiting until one is free.
    ///
    /// `timeout` of `None` waits indefinitely. Waiters are served in
    /// arrival order regardless of which thread wakes first.
    pub fn lease(&self, timeout: Option<Duration>) -> Result<SessionLease<'_>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();

        if state.closed {
            return Err(EngineError::PoolClosed);
        }
        if state.live == 0 {
            return Err(EngineError::PoolExhausted);
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(ticket);

        loop {
            if state.closed {
                Self::remove_ticket(&mut state, ticket);
                self.available.notify_all();
                return Err(EngineError::PoolClosed);
            }
            if state.live == 0 {
                Self::remove_ticket(&mut state, ticket);
                self.available.notify_all();
                return Err(EngineError::PoolExhausted);
            }

            if state.queue.front() == Some(&ticket) {
                if let Some(handle) = state.free.pop() {
                    state.queue.pop_front();
                    state.leased += 1;
                    // Let the next ticket in line start checking
                    self.available.notify_all();
                    return Ok(SessionLease {
                        pool: self,
                        handle: Some(handle),
                    });
                }
            }

            match deadline {
                Some(d) => {
                    if Instant::now() >= d {
                        Self::remove_ticket(&mut state, ticket);
                        self.available.notify_all();
                        return Err(EngineError::Timeout(timeout.unwrap_or_default()));
                    }
                    self.available.wait_until(&mut state, d);
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    fn remove_ticket(state: &mut PoolState, ticket: u64) {
        if let Some(pos) = state.queue.iter().position(|&t| t == ticket) {
            state.queue.remove(pos);
        }
    }

    /// Return a lease's handle. Healthy handles rejoin the free list;
    /// unhealthy ones are retired and replaced through the factory.
    fn give_back(&self, handle: SessionHandle) {
        if handle.is_healthy() {
            let mut state = self.state.lock();
            state.leased -= 1;
            if !state.closed {
                state.free.push(handle);
            }
            self.available.notify_all();
            return;
        }

        let id = handle.id();
        log::warn!("retiring unhealthy session {}", id);
        drop(handle);

        // Build the replacement outside the lock so waiters on other
        // sessions are not blocked by a slow model load.
        let replacement = self.factory.create(id);

        let mut state = self.state.lock();
        state.leased -= 1;
        match replacement {
            Ok(fresh) if !state.closed => {
                log::info!("session {} reloaded", id);
                state.free.push(fresh);
            }
            Ok(_) => {}
            Err(e) => {
                state.live -= 1;
                log::warn!(
                    "failed to reload session {}: {} ({} session(s) remaining)",
                    id,
                    e,
                    state.live
                );
            }
        }
        self.available.notify_all();
    }

    /// Close the pool: fail new and queued leases with `PoolClosed`, wait
    /// for in-flight leases to finish, then drop every session.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        self.available.notify_all();

        while state.leased > 0 {
            self.available.wait(&mut state);
        }
        state.free.clear();
        state.live = 0;
        log::info!("session pool shut down");
    }
}

/// RAII lease on one pooled session. Returns the session on drop.
pub struct SessionLease<'a> {
    pool: &'a SessionPool,
    handle: Option<SessionHandle>,
}

impl SessionLease<'_> {
    pub fn session_id(&self) -> usize {
        match &self.handle {
            Some(handle) => handle.id(),
            None => usize::MAX,
        }
    }

    /// Run one batch on the leased session.
    pub fn run(&mut self, batch: &Batch) -> Result<RawOutput> {
        match self.handle.as_mut() {
            Some(handle) => handle.run(batch),
            None => Err(EngineError::PoolClosed),
        }
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.give_back(handle);
        }
    }
}

//! Reentrant per-token lock.
//!
//! The lock is exclusive across owners and reentrant for the same owner.
//! Ownership is an explicit [`OwnerId`] compared by value, so an owner can be
//! an OS thread, a governed unit, or a cooperative task.

use crate::error::{Error, ErrorKind, Result};
use crate::types::OwnerId;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct LockState {
    owner: Option<OwnerId>,
    depth: u32,
}

/// Outcome of a successful acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// Depth went from 0 to 1.
    First,
    /// Same owner re-entered; depth is now the contained value.
    Reentered(u32),
}

/// Outcome of a successful release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// Depth went from 1 to 0; the lock is free.
    Freed,
    /// Depth decreased; the contained value remains.
    Held(u32),
}

/// Reentrant mutual exclusion bound to one token.
#[derive(Debug, Default)]
pub struct LockContext {
    state: Mutex<LockState>,
    released: Condvar,
    contention: AtomicU64,
}

impl LockContext {
    /// Creates an unheld lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires for `owner`, blocking while another owner holds it.
    pub fn lock(&self, owner: OwnerId) -> Acquired {
        let mut state = self.state.lock();
        let mut contended = false;
        loop {
            let holder = state.owner;
            match holder {
                None => {
                    state.owner = Some(owner);
                    state.depth = 1;
                    return Acquired::First;
                }
                Some(current) if current == owner => {
                    state.depth += 1;
                    return Acquired::Reentered(state.depth);
                }
                Some(_) => {
                    if !contended {
                        contended = true;
                        self.contention.fetch_add(1, Ordering::Relaxed);
                    }
                    self.released.wait(&mut state);
                }
            }
        }
    }

    /// Acquires for `owner`, giving up after `timeout`.
    pub fn lock_timeout(&self, owner: OwnerId, timeout: Duration) -> Result<Acquired> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        let mut contended = false;
        loop {
            let holder = state.owner;
            match holder {
                None => {
                    state.owner = Some(owner);
                    state.depth = 1;
                    return Ok(Acquired::First);
                }
                Some(current) if current == owner => {
                    state.depth += 1;
                    return Ok(Acquired::Reentered(state.depth));
                }
                Some(current) => {
                    if !contended {
                        contended = true;
                        self.contention.fetch_add(1, Ordering::Relaxed);
                    }
                    if self.released.wait_until(&mut state, deadline).timed_out()
                        && state.owner.is_some_and(|o| o != owner)
                    {
                        return Err(Error::new(ErrorKind::LockedByOther)
                            .with_message(format!("held by {current} after {timeout:?}")));
                    }
                }
            }
        }
    }

    /// Acquires without blocking.
    pub fn try_lock(&self, owner: OwnerId) -> Result<Acquired> {
        let mut state = self.state.lock();
        let holder = state.owner;
        match holder {
            None => {
                state.owner = Some(owner);
                state.depth = 1;
                Ok(Acquired::First)
            }
            Some(current) if current == owner => {
                state.depth += 1;
                Ok(Acquired::Reentered(state.depth))
            }
            Some(current) => {
                self.contention.fetch_add(1, Ordering::Relaxed);
                Err(Error::new(ErrorKind::LockedByOther).with_message(format!("held by {current}")))
            }
        }
    }

    /// Releases one level for `owner`.
    ///
    /// Fails without effect if `owner` is not the holder or the depth is zero.
    pub fn unlock(&self, owner: OwnerId) -> Result<Released> {
        let mut state = self.state.lock();
        let holder = state.owner;
        match holder {
            None => Err(Error::new(ErrorKind::NotLocked)),
            Some(current) if current != owner => Err(Error::new(ErrorKind::NotLockOwner)
                .with_message(format!("{owner} tried to release lock held by {current}"))),
            Some(_) => {
                state.depth -= 1;
                if state.depth == 0 {
                    state.owner = None;
                    drop(state);
                    self.released.notify_one();
                    Ok(Released::Freed)
                } else {
                    Ok(Released::Held(state.depth))
                }
            }
        }
    }

    /// Drops every level held by `owner`. Returns the depth that was released.
    pub(crate) fn force_release(&self, owner: OwnerId) -> u32 {
        let mut state = self.state.lock();
        if state.owner != Some(owner) {
            return 0;
        }
        let depth = state.depth;
        state.owner = None;
        state.depth = 0;
        drop(state);
        self.released.notify_all();
        depth
    }

    /// Returns the current holder.
    #[must_use]
    pub fn owner(&self) -> Option<OwnerId> {
        self.state.lock().owner
    }

    /// Returns the recursion depth.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.state.lock().depth
    }

    /// Returns true if any owner holds the lock.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    /// Returns how many acquisitions found the lock held by another owner.
    #[must_use]
    pub fn contention(&self) -> u64 {
        self.contention.load(Ordering::Relaxed)
    }
}

//! `OsMutex`: a recursive mutex built over a single `std::sync::Mutex`,
//! tracking `{owner_thread, lock_depth}` so the same thread may re-acquire it
//! any number of times (spec.md §3.3/§4.2).

use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

use crate::engine_err;
use crate::error::{EngineResult, ErrorKind};

struct State {
    owner: Option<ThreadId>,
    depth: u32,
}

pub struct OsMutex {
    state: Mutex<State>,
    cv: Condvar,
}

impl OsMutex {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                owner: None,
                depth: 0,
            }),
            cv: Condvar::new(),
        }
    }

    /// Acquire the mutex `n` times on behalf of the calling thread, blocking
    /// while another thread owns it.
    pub fn lock(&self, n: u32) {
        let me = thread::current().id();
        let mut guard = self.state.lock().unwrap();
        loop {
            match guard.owner {
                None => {
                    guard.owner = Some(me);
                    guard.depth += n;
                    return;
                }
                Some(owner) if owner == me => {
                    guard.depth += n;
                    return;
                }
                Some(_) => {
                    guard = self.cv.wait(guard).unwrap();
                }
            }
        }
    }

    /// Non-blocking variant; returns `false` if another thread owns the
    /// mutex.
    pub fn try_lock(&self, n: u32) -> bool {
        let me = thread::current().id();
        let mut guard = self.state.lock().unwrap();
        match guard.owner {
            None => {
                guard.owner = Some(me);
                guard.depth += n;
                true
            }
            Some(owner) if owner == me => {
                guard.depth += n;
                true
            }
            Some(_) => false,
        }
    }

    /// Release `n` recursive acquisitions. Fails with `NotLocked` if the
    /// caller does not own the mutex, or releases more than it holds.
    pub fn unlock(&self, n: u32) -> EngineResult<()> {
        let me = thread::current().id();
        let mut guard = self.state.lock().unwrap();
        match guard.owner {
            Some(owner) if owner == me => {
                if n > guard.depth {
                    return Err(engine_err!(
                        ErrorKind::NotLocked,
                        "unlock({}) exceeds held depth {}",
                        n,
                        guard.depth
                    ));
                }
                guard.depth -= n;
                if guard.depth == 0 {
                    guard.owner = None;
                    drop(guard);
                    self.cv.notify_one();
                }
                Ok(())
            }
            _ => Err(engine_err!(
                ErrorKind::NotLocked,
                "unlock called by a thread that does not own the mutex"
            )),
        }
    }

    /// Drop every nested acquisition held by the calling thread at once.
    pub fn unlock_all(&self) -> EngineResult<()> {
        let me = thread::current().id();
        let mut guard = self.state.lock().unwrap();
        match guard.owner {
            Some(owner) if owner == me => {
                guard.depth = 0;
                guard.owner = None;
                drop(guard);
                self.cv.notify_one();
                Ok(())
            }
            _ => Err(engine_err!(
                ErrorKind::NotLocked,
                "unlock_all called by a thread that does not own the mutex"
            )),
        }
    }

    pub fn lock_depth(&self) -> u32 {
        self.state.lock().unwrap().depth
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().unwrap().owner.is_some()
    }
}

impl Drop for OsMutex {
    fn drop(&mut self) {
        let depth = self.state.lock().unwrap().depth;
        if depth != 0 {
            if cfg!(debug_assertions) {
                panic!("OsMutex dropped with lock_depth={} still held", depth);
            } else {
                log::warn!("OsMutex dropped with lock_depth={} still held", depth);
            }
        }
    }
}

impl Default for OsMutex {
    fn default() -> Self {
        Self::new()
    }
}

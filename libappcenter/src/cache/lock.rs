//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use super::{CacheError, Result};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::trace;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Single-owner guard of one cache.
///
/// The owning thread gets [`CacheError::Reentrant`] when it tries to take the
/// guard a second time. Other threads poll until the owner lets go or the
/// timeout expires.
#[derive(Debug)]
pub struct CacheLock {
    scope: String,
    owner: Mutex<Option<ThreadId>>,
    timeout: Duration,
}

/// Releases the [`CacheLock`] when dropped
#[derive(Debug)]
pub struct CacheGuard<'a> {
    lock: &'a CacheLock,
}

impl CacheLock {
    pub fn new(scope: impl Into<String>, timeout: Duration) -> Self {
        CacheLock {
            scope: scope.into(),
            owner: Mutex::new(None),
            timeout,
        }
    }

    fn owner(&self) -> MutexGuard<'_, Option<ThreadId>> {
        // The protected value is a plain id, a panicking holder cannot leave
        // it half written.
        self.owner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn acquire(&self) -> Result<CacheGuard<'_>> {
        let me = thread::current().id();
        let started = Instant::now();
        loop {
            {
                let mut owner = self.owner();
                match *owner {
                    None => {
                        *owner = Some(me);
                        trace!("Acquired cache guard {}", self.scope);
                        return Ok(CacheGuard { lock: self });
                    }
                    Some(holder) if holder == me => {
                        return Err(CacheError::Reentrant {
                            scope: self.scope.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
            let waited = started.elapsed();
            if waited >= self.timeout {
                return Err(CacheError::LockTimeout {
                    scope: self.scope.clone(),
                    waited,
                });
            }
            thread::sleep(POLL_INTERVAL.min(self.timeout - waited));
        }
    }

    pub fn is_held(&self) -> bool {
        self.owner().is_some()
    }
}

impl Drop for CacheGuard<'_> {
    fn drop(&mut self) {
        *self.lock.owner() = None;
        trace!("Released cache guard {}", self.lock.scope);
    }
}

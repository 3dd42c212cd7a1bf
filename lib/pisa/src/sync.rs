// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Lock wrappers used throughout the engine.
//!
//! A panic while a lock is held poisons the std primitives. Every piece
//! of state guarded here stays structurally valid across a panicking
//! holder (updates are single assignments or inserts), so the guards
//! recover the inner value instead of propagating the poison to the
//! packet path.

use core::ops::Deref;
use core::ops::DerefMut;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

/// A mutual-exclusion lock.
///
/// Named `KMutex` to make it obvious at a glance that this is not the
/// `Mutex` from std.
#[derive(Debug, Default)]
pub struct KMutex<T> {
    inner: Mutex<T>,
}

pub struct KMutexGuard<'a, T: 'a> {
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for KMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> DerefMut for KMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

impl<T> KMutex<T> {
    pub fn new(val: T) -> Self {
        KMutex { inner: Mutex::new(val) }
    }

    pub fn into_inner(self) -> T {
        match self.inner.into_inner() {
            Ok(val) => val,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn lock(&self) -> KMutexGuard<'_, T> {
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        KMutexGuard { guard }
    }
}

/// A readers-writer lock.
#[derive(Debug, Default)]
pub struct KRwLock<T> {
    inner: RwLock<T>,
}

pub struct KRwLockReadGuard<'a, T: 'a> {
    guard: RwLockReadGuard<'a, T>,
}

pub struct KRwLockWriteGuard<'a, T: 'a> {
    guard: RwLockWriteGuard<'a, T>,
}

impl<T> Deref for KRwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> Deref for KRwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> DerefMut for KRwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

impl<T> KRwLock<T> {
    pub fn new(val: T) -> Self {
        KRwLock { inner: RwLock::new(val) }
    }

    pub fn into_inner(self) -> T {
        match self.inner.into_inner() {
            Ok(val) => val,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn read(&self) -> KRwLockReadGuard<'_, T> {
        let guard = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        KRwLockReadGuard { guard }
    }

    pub fn write(&self) -> KRwLockWriteGuard<'_, T> {
        let guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        KRwLockWriteGuard { guard }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn poisoned_lock_recovers() {
        let lock = Arc::new(KMutex::new(7u32));
        let l2 = lock.clone();
        let res = thread::spawn(move || {
            let _g = l2.lock();
            panic!("poison");
        })
        .join();
        assert!(res.is_err());
        assert_eq!(*lock.lock(), 7);
    }

    #[test]
    fn rwlock_readers_and_writer() {
        let lock = KRwLock::new(vec![1, 2]);
        {
            let r1 = lock.read();
            let r2 = lock.read();
            assert_eq!(r1.len() + r2.len(), 4);
        }
        lock.write().push(3);
        assert_eq!(lock.into_inner(), vec![1, 2, 3]);
    }
}

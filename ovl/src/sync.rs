//! Synchronization primitives that wrap both `parking_lot` and `std::sync`.
//!
//! This module provides a unified API for synchronization primitives that:
//! - Uses `parking_lot` when the `parking_lot` feature is enabled
//! - Falls back to `std::sync` when the feature is disabled
//! - Removes poisoning by unwrapping poisoned locks

#[cfg(feature = "parking_lot")]
pub use parking_lot::{
  Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

#[cfg(feature = "parking_lot")]
pub use self::pl_condvar::Condvar;

#[cfg(feature = "parking_lot")]
mod pl_condvar {
  use parking_lot::MutexGuard;

  /// Condition variable over [`parking_lot::Condvar`], taking guards by
  /// value like the `std` fallback.
  #[derive(Default)]
  pub struct Condvar(parking_lot::Condvar);

  impl Condvar {
    #[inline]
    pub const fn new() -> Self {
      Self(parking_lot::Condvar::new())
    }

    #[inline]
    pub fn wait<'a, T>(&self, mut guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
      self.0.wait(&mut guard);
      guard
    }

    #[inline]
    pub fn notify_all(&self) {
      self.0.notify_all();
    }
  }
}

#[cfg(not(feature = "parking_lot"))]
pub use self::std_sync::*;

#[cfg(not(feature = "parking_lot"))]
mod std_sync {
  use std::sync as std_sync;

  /// A mutual exclusion primitive that wraps `std::sync::Mutex`.
  ///
  /// Unlike `std::sync::Mutex`, this does not support poisoning.
  pub struct Mutex<T: ?Sized> {
    inner: std_sync::Mutex<T>,
  }

  impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state ready for use.
    #[inline]
    pub const fn new(value: T) -> Self {
      Self { inner: std_sync::Mutex::new(value) }
    }
  }

  impl<T: ?Sized> Mutex<T> {
    /// Acquires a mutex, blocking the current thread until it is able to do so.
    ///
    /// This function does not propagate poisoning, so it will always succeed.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T> {
      MutexGuard { inner: self.inner.lock().unwrap_or_else(|e| e.into_inner()) }
    }
  }

  /// An RAII implementation of a "scoped lock" of a mutex.
  ///
  /// When this structure is dropped (falls out of scope), the lock will be unlocked.
  pub struct MutexGuard<'a, T: ?Sized> {
    inner: std_sync::MutexGuard<'a, T>,
  }

  impl<T: ?Sized> std::ops::Deref for MutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
      &self.inner
    }
  }

  impl<T: ?Sized> std::ops::DerefMut for MutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
      &mut self.inner
    }
  }

  /// A condition variable that wraps `std::sync::Condvar`, without poisoning.
  #[derive(Default)]
  pub struct Condvar {
    inner: std_sync::Condvar,
  }

  impl Condvar {
    #[inline]
    pub const fn new() -> Self {
      Self { inner: std_sync::Condvar::new() }
    }

    /// Releases `guard`, blocks until notified, then re-acquires the lock.
    #[inline]
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
      MutexGuard {
        inner: self.inner.wait(guard.inner).unwrap_or_else(|e| e.into_inner()),
      }
    }

    #[inline]
    pub fn notify_all(&self) {
      self.inner.notify_all();
    }
  }

  /// A reader-writer lock that wraps `std::sync::RwLock`, without poisoning.
  pub struct RwLock<T: ?Sized> {
    inner: std_sync::RwLock<T>,
  }

  impl<T> RwLock<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
      Self { inner: std_sync::RwLock::new(value) }
    }
  }

  impl<T: ?Sized> RwLock<T> {
    /// Locks with shared read access, blocking while a writer holds the lock.
    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
      RwLockReadGuard {
        inner: self.inner.read().unwrap_or_else(|e| e.into_inner()),
      }
    }

    /// Locks with exclusive write access.
    #[inline]
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
      RwLockWriteGuard {
        inner: self.inner.write().unwrap_or_else(|e| e.into_inner()),
      }
    }
  }

  pub struct RwLockReadGuard<'a, T: ?Sized> {
    inner: std_sync::RwLockReadGuard<'a, T>,
  }

  impl<T: ?Sized> std::ops::Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
      &self.inner
    }
  }

  pub struct RwLockWriteGuard<'a, T: ?Sized> {
    inner: std_sync::RwLockWriteGuard<'a, T>,
  }

  impl<T: ?Sized> std::ops::Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
      &self.inner
    }
  }

  impl<T: ?Sized> std::ops::DerefMut for RwLockWriteGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
      &mut self.inner
    }
  }
}

//! Mutual-exclusion strategies guarding the buffer state.
//!
//! All strategies hand out access through scoped closures. The lock guard
//! lives for exactly the duration of the closure and is released on every
//! exit path, unwinding included (`parking_lot` locks do not poison).

use clap::ValueEnum;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scoped read/write access to a guarded value.
pub trait Access<T> {
  /// Run `f` with shared access. Implementations may serialize readers.
  fn with_read<R>(&self, f: impl FnOnce(&T) -> R) -> R;

  /// Run `f` with exclusive access.
  fn with_write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R;
}

/// Selectable synchronization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LockStrategy {
  /// One mutex for readers and writers.
  #[default]
  Exclusive,
  /// Shared reads, exclusive writes.
  ReadWrite,
  /// Busy-retry on a non-blocking acquire. Benchmarking only: burns CPU for
  /// as long as contention lasts.
  Spin,
}

impl fmt::Display for LockStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      LockStrategy::Exclusive => "exclusive",
      LockStrategy::ReadWrite => "read-write",
      LockStrategy::Spin => "spin",
    };
    f.write_str(name)
  }
}

pub struct Exclusive<T> {
  inner: Mutex<T>,
}

impl<T> Exclusive<T> {
  pub fn new(value: T) -> Self {
    Self {
      inner: Mutex::new(value),
    }
  }
}

impl<T> Access<T> for Exclusive<T> {
  fn with_read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
    f(&self.inner.lock())
  }

  fn with_write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
    f(&mut self.inner.lock())
  }
}

pub struct ReadWrite<T> {
  inner: RwLock<T>,
}

impl<T> ReadWrite<T> {
  pub fn new(value: T) -> Self {
    Self {
      inner: RwLock::new(value),
    }
  }
}

impl<T> Access<T> for ReadWrite<T> {
  fn with_read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
    f(&self.inner.read())
  }

  fn with_write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
    f(&mut self.inner.write())
  }
}

/// Never parks the calling thread: a failed `try_lock` is retried at once.
pub struct Spin<T> {
  inner: Mutex<T>,
}

impl<T> Spin<T> {
  pub fn new(value: T) -> Self {
    Self {
      inner: Mutex::new(value),
    }
  }

  fn acquire(&self) -> MutexGuard<'_, T> {
    loop {
      if let Some(guard) = self.inner.try_lock() {
        return guard;
      }
      std::hint::spin_loop();
    }
  }
}

impl<T> Access<T> for Spin<T> {
  fn with_read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
    f(&self.acquire())
  }

  fn with_write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
    f(&mut self.acquire())
  }
}

/// A value guarded by the strategy picked at runtime.
pub enum Guarded<T> {
  Exclusive(Exclusive<T>),
  ReadWrite(ReadWrite<T>),
  Spin(Spin<T>),
}

impl<T> Guarded<T> {
  pub fn new(strategy: LockStrategy, value: T) -> Self {
    match strategy {
      LockStrategy::Exclusive => Guarded::Exclusive(Exclusive::new(value)),
      LockStrategy::ReadWrite => Guarded::ReadWrite(ReadWrite::new(value)),
      LockStrategy::Spin => Guarded::Spin(Spin::new(value)),
    }
  }

  #[must_use]
  pub fn strategy(&self) -> LockStrategy {
    match self {
      Guarded::Exclusive(_) => LockStrategy::Exclusive,
      Guarded::ReadWrite(_) => LockStrategy::ReadWrite,
      Guarded::Spin(_) => LockStrategy::Spin,
    }
  }
}

impl<T> Access<T> for Guarded<T> {
  fn with_read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
    match self {
      Guarded::Exclusive(lock) => lock.with_read(f),
      Guarded::ReadWrite(lock) => lock.with_read(f),
      Guarded::Spin(lock) => lock.with_read(f),
    }
  }

  fn with_write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
    match self {
      Guarded::Exclusive(lock) => lock.with_write(f),
      Guarded::ReadWrite(lock) => lock.with_write(f),
      Guarded::Spin(lock) => lock.with_write(f),
    }
  }
}

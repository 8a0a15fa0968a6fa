//! Bounded, thread-safe text buffer with a fixed overflow policy.
//!
//! Producers append text; a single consumer periodically drains it with
//! [`SyncBuffer::take`]. Capacity and drop accounting are measured in
//! characters (Unicode scalar values), never bytes, so a multi-byte
//! character is kept or discarded as a whole.
//!
//! Every mutating call observes the current length and mutates the content
//! inside one critical section. Callers only ever receive copies of the
//! content.

pub mod strategy;

use clap::ValueEnum;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;

pub use strategy::{Access, Guarded, LockStrategy};

/// What to discard when an append would exceed capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
  /// Keep resident content; drop the tail of incoming text.
  #[default]
  DropNew,
  /// Keep the newest characters; push the oldest out of the front.
  DropOld,
}

impl fmt::Display for OverflowPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OverflowPolicy::DropNew => f.write_str("drop-new"),
      OverflowPolicy::DropOld => f.write_str("drop-old"),
    }
  }
}

/// Point-in-time view of the buffer counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
  pub len: usize,
  pub capacity: usize,
  pub dropped: u64,
}

impl fmt::Display for BufferStats {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}/{} characters buffered, {} dropped",
      self.len, self.capacity, self.dropped
    )
  }
}

#[derive(Debug, Default)]
struct BufferState {
  content: String,
  /// Length of `content` in characters.
  len: usize,
  dropped: u64,
}

impl BufferState {
  fn reset(&mut self) {
    self.content.clear();
    self.len = 0;
  }
}

pub struct SyncBuffer {
  capacity: usize,
  policy: OverflowPolicy,
  state: Guarded<BufferState>,
}

impl SyncBuffer {
  #[must_use]
  pub fn new(capacity: NonZeroUsize, policy: OverflowPolicy, strategy: LockStrategy) -> Self {
    Self {
      capacity: capacity.get(),
      policy,
      state: Guarded::new(strategy, BufferState::default()),
    }
  }

  #[must_use]
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  #[must_use]
  pub fn policy(&self) -> OverflowPolicy {
    self.policy
  }

  #[must_use]
  pub fn strategy(&self) -> LockStrategy {
    self.state.strategy()
  }

  /// Append `text` under the overflow policy.
  ///
  /// Returns how many characters of this call were discarded.
  pub fn append_to_back(&self, text: &str) -> usize {
    self.state.with_write(|state| self.append_locked(state, text))
  }

  /// Replace the content with `text`. The replacement goes through the same
  /// overflow accounting as [`SyncBuffer::append_to_back`].
  pub fn set_text(&self, text: &str) -> usize {
    self.state.with_write(|state| {
      state.reset();
      self.append_locked(state, text)
    })
  }

  /// Empty the content. The dropped counter is left untouched.
  pub fn clear(&self) {
    self.state.with_write(BufferState::reset);
  }

  /// Copy of the content, or `None` when empty.
  #[must_use]
  pub fn snapshot(&self) -> Option<String> {
    self
      .state
      .with_read(|state| (!state.content.is_empty()).then(|| state.content.clone()))
  }

  /// Drain the content in one critical section.
  ///
  /// Returns `None` when there was nothing to drain, which is distinct from
  /// a drained empty string.
  #[must_use]
  pub fn take(&self) -> Option<String> {
    self.state.with_write(|state| {
      if state.content.is_empty() {
        return None;
      }
      debug!("Draining {} characters from message buffer", state.len);
      state.len = 0;
      Some(std::mem::take(&mut state.content))
    })
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.state.with_read(|state| state.len == 0)
  }

  /// Current length in characters.
  #[must_use]
  pub fn len(&self) -> usize {
    self.state.with_read(|state| state.len)
  }

  /// Characters discarded due to capacity pressure since construction.
  #[must_use]
  pub fn dropped_count(&self) -> u64 {
    self.state.with_read(|state| state.dropped)
  }

  #[must_use]
  pub fn stats(&self) -> BufferStats {
    self.state.with_read(|state| BufferStats {
      len: state.len,
      capacity: self.capacity,
      dropped: state.dropped,
    })
  }

  // Caller holds write access for the whole call.
  fn append_locked(&self, state: &mut BufferState, text: &str) -> usize {
    let incoming = text.chars().count();
    let room = self.capacity.saturating_sub(state.len);

    let discarded = match self.policy {
      OverflowPolicy::DropNew if room == 0 => {
        if incoming > 0 {
          state.dropped += incoming as u64;
          warn!(
            "Message buffer is full - dropping whole message of length {incoming} ({} dropped so far)",
            state.dropped
          );
        }
        incoming
      }
      OverflowPolicy::DropNew if room < incoming => {
        let cut = byte_offset(text, room);
        state.content.push_str(&text[..cut]);
        state.len += room;
        let discarded = incoming - room;
        state.dropped += discarded as u64;
        warn!(
          "Message buffer is full - dropping last {discarded} characters of new message ({} dropped so far)",
          state.dropped
        );
        discarded
      }
      OverflowPolicy::DropNew => {
        state.content.push_str(text);
        state.len += incoming;
        0
      }
      OverflowPolicy::DropOld => {
        state.content.push_str(text);
        state.len += incoming;
        if state.len <= self.capacity {
          0
        } else {
          let excess = state.len - self.capacity;
          let cut = byte_offset(&state.content, excess);
          state.content.drain(..cut);
          state.len = self.capacity;
          state.dropped += excess as u64;
          warn!(
            "Message buffer is full - pushing out {excess} characters ({} dropped so far)",
            state.dropped
          );
          excess
        }
      }
    };
    debug_assert!(state.len <= self.capacity);
    discarded
  }
}

/// Byte offset of the `chars`-th character of `s`, or `s.len()` past the end.
fn byte_offset(s: &str, chars: usize) -> usize {
  s.char_indices().nth(chars).map_or(s.len(), |(idx, _)| idx)
}

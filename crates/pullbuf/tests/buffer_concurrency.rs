use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Barrier};
use std::thread;

use pullbuf::{LockStrategy, OverflowPolicy, SyncBuffer};

const STRATEGIES: [LockStrategy; 3] = [
  LockStrategy::Exclusive,
  LockStrategy::ReadWrite,
  LockStrategy::Spin,
];

fn shared(capacity: usize, policy: OverflowPolicy, strategy: LockStrategy) -> Arc<SyncBuffer> {
  Arc::new(SyncBuffer::new(
    NonZeroUsize::new(capacity).expect("non-zero capacity"),
    policy,
    strategy,
  ))
}

/// Marker `"<thread><seq>;"` with fixed width so every append has the same length.
fn marker(thread: usize, seq: usize) -> String {
  format!("{thread:02}{seq:04};")
}

fn count_markers(text: &str, into: &mut HashMap<String, usize>) {
  for m in text.split_terminator(';') {
    *into.entry(format!("{m};")).or_default() += 1;
  }
}

#[test]
fn concurrent_appends_below_capacity_lose_nothing() {
  const THREADS: usize = 8;
  const PER_THREAD: usize = 200;
  let total_len = THREADS * PER_THREAD * marker(0, 0).len();

  for strategy in STRATEGIES {
    let buffer = shared(total_len + 1, OverflowPolicy::DropNew, strategy);
    let barrier = Arc::new(Barrier::new(THREADS));
    let workers: Vec<_> = (0..THREADS)
      .map(|t| {
        let buffer = Arc::clone(&buffer);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
          barrier.wait();
          for seq in 0..PER_THREAD {
            buffer.append_to_back(&marker(t, seq));
          }
        })
      })
      .collect();
    for w in workers {
      w.join().expect("producer thread");
    }

    assert_eq!(buffer.len(), total_len, "strategy {strategy}");
    assert_eq!(buffer.dropped_count(), 0, "strategy {strategy}");

    let mut seen = HashMap::new();
    count_markers(&buffer.take().expect("content"), &mut seen);
    assert_eq!(seen.len(), THREADS * PER_THREAD, "strategy {strategy}");
    assert!(seen.values().all(|&n| n == 1));
  }
}

#[test]
fn take_partitions_concurrent_appends() {
  const THREADS: usize = 4;
  const PER_THREAD: usize = 500;
  let total_len = THREADS * PER_THREAD * marker(0, 0).len();

  for strategy in STRATEGIES {
    let buffer = shared(total_len, OverflowPolicy::DropNew, strategy);
    let barrier = Arc::new(Barrier::new(THREADS + 1));
    let workers: Vec<_> = (0..THREADS)
      .map(|t| {
        let buffer = Arc::clone(&buffer);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
          barrier.wait();
          for seq in 0..PER_THREAD {
            buffer.append_to_back(&marker(t, seq));
          }
        })
      })
      .collect();

    barrier.wait();
    let mut drained = Vec::new();
    for _ in 0..50 {
      if let Some(chunk) = buffer.take() {
        drained.push(chunk);
      }
      thread::yield_now();
    }
    for w in workers {
      w.join().expect("producer thread");
    }

    let mut seen = HashMap::new();
    for chunk in &drained {
      // A drain never splits a marker: appends and takes do not interleave.
      assert!(chunk.ends_with(';'), "strategy {strategy}");
      count_markers(chunk, &mut seen);
    }
    if let Some(rest) = buffer.take() {
      count_markers(&rest, &mut seen);
    }

    assert_eq!(seen.len(), THREADS * PER_THREAD, "strategy {strategy}");
    assert!(
      seen.values().all(|&n| n == 1),
      "every marker is either drained or remaining, exactly once ({strategy})"
    );
    assert_eq!(buffer.dropped_count(), 0);
  }
}

#[test]
fn overflowing_writers_never_exceed_capacity() {
  const THREADS: usize = 6;
  const PER_THREAD: usize = 300;
  const CAPACITY: usize = 97;
  let marker_len = marker(0, 0).len();

  for policy in [OverflowPolicy::DropNew, OverflowPolicy::DropOld] {
    for strategy in STRATEGIES {
      let buffer = shared(CAPACITY, policy, strategy);
      let workers: Vec<_> = (0..THREADS)
        .map(|t| {
          let buffer = Arc::clone(&buffer);
          thread::spawn(move || {
            let mut discarded = 0u64;
            for seq in 0..PER_THREAD {
              discarded += buffer.append_to_back(&marker(t, seq)) as u64;
              assert!(buffer.len() <= CAPACITY);
            }
            discarded
          })
        })
        .collect();
      let discarded: u64 = workers
        .into_iter()
        .map(|w| w.join().expect("producer thread"))
        .sum();

      let written = (THREADS * PER_THREAD * marker_len) as u64;
      assert_eq!(buffer.len(), CAPACITY, "{policy}/{strategy}");
      assert_eq!(buffer.dropped_count(), discarded, "{policy}/{strategy}");
      assert_eq!(written - discarded, CAPACITY as u64, "{policy}/{strategy}");
    }
  }
}

#[test]
fn readers_see_whole_appends_only() {
  for strategy in STRATEGIES {
    let buffer = shared(10_000, OverflowPolicy::DropNew, strategy);
    let writer = {
      let buffer = Arc::clone(&buffer);
      thread::spawn(move || {
        for _ in 0..1_000 {
          buffer.append_to_back("abcde");
        }
      })
    };
    let reader = {
      let buffer = Arc::clone(&buffer);
      thread::spawn(move || {
        for _ in 0..1_000 {
          if let Some(snapshot) = buffer.snapshot() {
            assert_eq!(snapshot.len() % 5, 0);
          }
        }
      })
    };
    writer.join().expect("writer");
    reader.join().expect("reader");
    assert_eq!(buffer.len(), 5_000, "strategy {strategy}");
  }
}

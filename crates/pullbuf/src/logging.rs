/// Install the process-wide logger. `RUST_LOG` overrides the `info` default.
/// Calling it again is a no-op.
pub fn init() {
  let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
    .format_timestamp_secs()
    .try_init();
}

/// Debug builds only: report lock cycles among the producer and server threads.
#[cfg(debug_assertions)]
pub fn spawn_deadlock_watchdog() {
  let _ = std::thread::Builder::new()
    .name("deadlock-watchdog".to_string())
    .spawn(|| {
      loop {
        std::thread::sleep(std::time::Duration::from_millis(200));
        let deadlocks = parking_lot::deadlock::check_deadlock();
        if !deadlocks.is_empty() {
          log::error!("Deadlock detected: {} cycles", deadlocks.len());
        }
      }
    });
}

#[cfg(not(debug_assertions))]
pub fn spawn_deadlock_watchdog() {}

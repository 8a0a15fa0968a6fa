//! Pull server: drains the shared buffer on behalf of exactly one TCP peer.
//!
//! High-level flow:
//! - Bind a TCP listener and keep it non-blocking so the wait for a peer can
//!   be cut short by the deadline or the stop signal.
//! - Accept the first peer only. Later connection attempts are never served.
//! - For every request line, drain the buffer and reply with one line (empty
//!   when nothing was pending). The request content is ignored. Line breaks
//!   and backslashes in the drained text are escaped so a reply never spans
//!   more than one line.
//! - A request line longer than [`MAX_REQUEST_LINE`] ends the connection with
//!   an error.
//! - Reads carry a timeout so the deadline and stop signal are re-checked
//!   while the peer is quiet.
//! - Once the deadline has passed, the next request is not answered and the
//!   connection is closed.

use crate::buffer::SyncBuffer;
use crate::error::ServeError;
use crate::stop::StopSignal;
use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use log::{debug, error, info};
use std::borrow::Cow;
use std::fmt;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default interval at which blocked accepts and reads re-check for shutdown.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on the sleep between non-blocking accept attempts.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Longest request line accepted, terminator included.
pub const MAX_REQUEST_LINE: usize = 8 * 1024;

/// Why the serve loop ended without a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
  /// The experiment period elapsed.
  DeadlineElapsed,
  /// The peer closed its side of the connection.
  PeerClosed,
  /// The host raised the stop signal.
  Stopped,
}

impl fmt::Display for StopReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StopReason::DeadlineElapsed => f.write_str("deadline elapsed"),
      StopReason::PeerClosed => f.write_str("peer closed the connection"),
      StopReason::Stopped => f.write_str("stop requested"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeSummary {
  pub requests_served: u64,
  pub reason: StopReason,
}

enum Waited {
  Peer(TcpStream, SocketAddr),
  Closed(StopReason),
}

pub struct PullServer {
  listener: TcpListener,
  local_addr: SocketAddr,
  buffer: Arc<SyncBuffer>,
  period: Duration,
  poll_interval: Duration,
}

impl PullServer {
  /// Bind the listening socket. The period starts counting when
  /// [`PullServer::run`] is called.
  pub fn bind(
    addr: impl ToSocketAddrs,
    buffer: Arc<SyncBuffer>,
    period: Duration,
  ) -> Result<Self, ServeError> {
    let listener = TcpListener::bind(addr).map_err(ServeError::Bind)?;
    listener.set_nonblocking(true).map_err(ServeError::Bind)?;
    let local_addr = listener.local_addr().map_err(ServeError::Bind)?;
    Ok(Self {
      listener,
      local_addr,
      buffer,
      period,
      poll_interval: DEFAULT_POLL_INTERVAL,
    })
  }

  #[must_use]
  pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
    self.poll_interval = poll_interval.max(Duration::from_millis(1));
    self
  }

  #[must_use]
  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  /// Serve one peer until the deadline, peer close, stop signal or a
  /// transport error. Both sockets are closed on return.
  pub fn run(self, stop: &StopSignal) -> Result<ServeSummary, ServeError> {
    // A period too long to represent never elapses.
    let deadline = Instant::now().checked_add(self.period);
    info!(
      "Pull server listening on {} for {:?}",
      self.local_addr, self.period
    );

    let (stream, peer) = match self.wait_for_peer(deadline, stop)? {
      Waited::Peer(stream, peer) => (stream, peer),
      Waited::Closed(reason) => {
        info!("Pull server closed before any peer connected: {reason}");
        return Ok(ServeSummary {
          requests_served: 0,
          reason,
        });
      }
    };
    info!("Pull client connected from {peer}");

    let result = self.serve(&stream, deadline, stop);
    let _ = stream.shutdown(Shutdown::Both);
    if let Ok(summary) = &result {
      info!(
        "Pull server closed: {} after {} requests",
        summary.reason, summary.requests_served
      );
    }
    result
  }

  /// Run the server on its own thread. The returned handle reports the
  /// outcome instead of taking the process down on failure.
  pub fn spawn(self, stop: StopSignal) -> std::io::Result<ServerHandle> {
    let (done_tx, done_rx) = bounded(1);
    let local_addr = self.local_addr;
    let thread_stop = stop.clone();
    let thread = thread::Builder::new()
      .name("pull-server".to_string())
      .spawn(move || {
        let result = self.run(&thread_stop);
        if let Err(err) = &result {
          error!("Pull server failed: {err}");
        }
        let _ = done_tx.send(result);
      })?;
    Ok(ServerHandle {
      local_addr,
      stop,
      done: done_rx,
      thread,
    })
  }

  fn wait_for_peer(&self, deadline: Option<Instant>, stop: &StopSignal) -> Result<Waited, ServeError> {
    loop {
      if let Some(reason) = check_stop(deadline, stop) {
        return Ok(Waited::Closed(reason));
      }
      match self.listener.accept() {
        Ok((stream, peer)) => {
          stream.set_nonblocking(false).map_err(ServeError::Accept)?;
          stream
            .set_read_timeout(Some(self.poll_interval))
            .map_err(ServeError::Accept)?;
          return Ok(Waited::Peer(stream, peer));
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock => {
          thread::sleep(self.poll_interval.min(ACCEPT_BACKOFF));
        }
        Err(e) if e.kind() == ErrorKind::Interrupted => {}
        Err(e) => return Err(ServeError::Accept(e)),
      }
    }
  }

  fn serve(
    &self,
    stream: &TcpStream,
    deadline: Option<Instant>,
    stop: &StopSignal,
  ) -> Result<ServeSummary, ServeError> {
    let mut reader = BufReader::new(stream);
    let mut writer = stream;
    // Bytes of a request line received so far; survives read timeouts.
    let mut pending = Vec::new();
    let mut requests_served = 0u64;

    let reason = loop {
      if pending.len() >= MAX_REQUEST_LINE {
        return Err(ServeError::RequestTooLong(MAX_REQUEST_LINE));
      }
      let room = (MAX_REQUEST_LINE - pending.len()) as u64;
      match (&mut reader).take(room).read_until(b'\n', &mut pending) {
        Ok(0) => break StopReason::PeerClosed,
        Ok(_) => {
          if pending.last() != Some(&b'\n') && pending.len() >= MAX_REQUEST_LINE {
            return Err(ServeError::RequestTooLong(MAX_REQUEST_LINE));
          }
          pending.clear();
          if let Some(reason) = check_stop(deadline, stop) {
            break reason;
          }
          let reply = self.buffer.take();
          let line = single_line(reply.as_deref().unwrap_or_default());
          debug!("Replying with {} bytes", line.len());
          writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush())
            .map_err(ServeError::Write)?;
          requests_served += 1;
        }
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
          if let Some(reason) = check_stop(deadline, stop) {
            break reason;
          }
        }
        Err(e) => return Err(ServeError::Read(e)),
      }
    };

    Ok(ServeSummary {
      requests_served,
      reason,
    })
  }
}

fn check_stop(deadline: Option<Instant>, stop: &StopSignal) -> Option<StopReason> {
  if stop.is_raised() {
    Some(StopReason::Stopped)
  } else if deadline.is_some_and(|d| Instant::now() >= d) {
    Some(StopReason::DeadlineElapsed)
  } else {
    None
  }
}

/// Escape `\\`, `\n` and `\r` so the reply fits on one line.
fn single_line(text: &str) -> Cow<'_, str> {
  if !text.contains(['\\', '\n', '\r']) {
    return Cow::Borrowed(text);
  }
  let mut out = String::with_capacity(text.len() + 8);
  for c in text.chars() {
    match c {
      '\\' => out.push_str("\\\\"),
      '\n' => out.push_str("\\n"),
      '\r' => out.push_str("\\r"),
      _ => out.push(c),
    }
  }
  Cow::Owned(out)
}

/// Handle to a pull server running on its own thread.
pub struct ServerHandle {
  local_addr: SocketAddr,
  stop: StopSignal,
  done: Receiver<Result<ServeSummary, ServeError>>,
  thread: JoinHandle<()>,
}

impl ServerHandle {
  #[must_use]
  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  /// Ask the server to close at its next poll.
  pub fn stop(&self) {
    self.stop.raise();
  }

  /// Block until the server finishes.
  pub fn wait(self) -> Result<ServeSummary, ServeError> {
    let result = self.done.recv().unwrap_or(Err(ServeError::Crashed));
    let _ = self.thread.join();
    result
  }

  /// Like [`ServerHandle::wait`], but gives up after `timeout` and hands the
  /// handle back.
  pub fn wait_timeout(self, timeout: Duration) -> Result<Result<ServeSummary, ServeError>, Self> {
    match self.done.recv_timeout(timeout) {
      Ok(result) => {
        let _ = self.thread.join();
        Ok(result)
      }
      Err(RecvTimeoutError::Timeout) => Err(self),
      Err(RecvTimeoutError::Disconnected) => {
        let _ = self.thread.join();
        Ok(Err(ServeError::Crashed))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::buffer::{LockStrategy, OverflowPolicy};
  use std::num::NonZeroUsize;

  fn shared_buffer() -> Arc<SyncBuffer> {
    Arc::new(SyncBuffer::new(
      NonZeroUsize::new(16).expect("non-zero"),
      OverflowPolicy::DropNew,
      LockStrategy::Exclusive,
    ))
  }

  #[test]
  fn closes_when_deadline_passes_without_peer() {
    let server = PullServer::bind("127.0.0.1:0", shared_buffer(), Duration::from_millis(50))
      .expect("bind")
      .with_poll_interval(Duration::from_millis(10));
    let summary = server.run(&StopSignal::new()).expect("run");
    assert_eq!(summary.reason, StopReason::DeadlineElapsed);
    assert_eq!(summary.requests_served, 0);
  }

  #[test]
  fn raised_stop_signal_wins_over_deadline() {
    let server = PullServer::bind("127.0.0.1:0", shared_buffer(), Duration::from_secs(60))
      .expect("bind");
    let stop = StopSignal::new();
    stop.raise();
    let summary = server.run(&stop).expect("run");
    assert_eq!(summary.reason, StopReason::Stopped);
  }

  #[test]
  fn bind_failure_is_reported_not_fatal() {
    let first = PullServer::bind("127.0.0.1:0", shared_buffer(), Duration::from_secs(1))
      .expect("bind");
    let taken = first.local_addr();
    let err = PullServer::bind(taken, shared_buffer(), Duration::from_secs(1))
      .err()
      .expect("second bind must fail");
    assert!(matches!(err, ServeError::Bind(_)));
  }

  #[test]
  fn unrepresentable_period_never_elapses() {
    let server = PullServer::bind(
      "127.0.0.1:0",
      shared_buffer(),
      Duration::from_secs(u64::MAX),
    )
    .expect("bind");
    let stop = StopSignal::new();
    stop.raise();
    let summary = server.run(&stop).expect("run");
    assert_eq!(summary.reason, StopReason::Stopped);
    assert_eq!(check_stop(None, &StopSignal::new()), None);
  }

  #[test]
  fn single_line_escapes_line_breaks() {
    assert!(matches!(single_line("plain"), Cow::Borrowed("plain")));
    assert_eq!(single_line("a\nb\r\nc"), "a\\nb\\r\\nc");
    assert_eq!(single_line("back\\slash"), "back\\\\slash");
    assert_eq!(single_line("über\n"), "über\\n");
  }

  #[test]
  fn poll_interval_is_clamped_above_zero() {
    let server = PullServer::bind("127.0.0.1:0", shared_buffer(), Duration::from_secs(1))
      .expect("bind")
      .with_poll_interval(Duration::ZERO);
    assert_eq!(server.poll_interval, Duration::from_millis(1));
  }
}

use std::io;
use thiserror::Error;

/// Transport failures of the pull server. Each one ends the serve loop; the
/// caller decides whether to shut down or start a fresh server.
#[derive(Debug, Error)]
pub enum ServeError {
  #[error("failed to bind pull server: {0}")]
  Bind(#[source] io::Error),
  #[error("failed to accept pull client: {0}")]
  Accept(#[source] io::Error),
  #[error("failed to read request: {0}")]
  Read(#[source] io::Error),
  #[error("failed to write reply: {0}")]
  Write(#[source] io::Error),
  #[error("request line exceeds {0} bytes")]
  RequestTooLong(usize),
  #[error("pull server thread terminated unexpectedly")]
  Crashed,
}


//! Pull client: asks the server for the buffered contents, one line at a time.

use anyhow::Context;
use log::debug;
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

/// Request line sent to the server. The server ignores its content.
pub const REQUEST_LINE: &str = "request";

pub struct PullClient {
  reader: BufReader<TcpStream>,
  writer: TcpStream,
}

impl PullClient {
  pub fn connect(addr: impl ToSocketAddrs) -> anyhow::Result<Self> {
    let stream = TcpStream::connect(addr).context("failed to connect to pull server")?;
    let writer = stream
      .try_clone()
      .context("failed to clone pull server stream")?;
    Ok(Self {
      reader: BufReader::new(stream),
      writer,
    })
  }

  /// Send one request and read the reply line.
  ///
  /// Returns `Ok(None)` once the server has closed the connection. An empty
  /// string means the buffer had nothing pending.
  pub fn request(&mut self) -> anyhow::Result<Option<String>> {
    if let Err(err) = writeln!(self.writer, "{REQUEST_LINE}").and_then(|()| self.writer.flush()) {
      return closed_or(err).context("failed to send request");
    }
    let mut line = String::new();
    match self.reader.read_line(&mut line) {
      Ok(0) => Ok(None),
      Ok(_) => {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        debug!("Received reply of {} bytes", trimmed.len());
        Ok(Some(trimmed.to_string()))
      }
      Err(err) => closed_or(err).context("failed to read reply"),
    }
  }

  /// Issue up to `requests` requests (`0` means until the server closes),
  /// sleeping `interval` between them. Returns the number of replies seen.
  pub fn run(
    &mut self,
    requests: usize,
    interval: Duration,
    mut on_reply: impl FnMut(&str),
  ) -> anyhow::Result<usize> {
    let mut replies = 0;
    while requests == 0 || replies < requests {
      let Some(reply) = self.request()? else {
        break;
      };
      on_reply(&reply);
      replies += 1;
      thread::sleep(interval);
    }
    Ok(replies)
  }
}

// A reset or broken pipe means the server hung up, same as end-of-stream.
fn closed_or(err: io::Error) -> io::Result<Option<String>> {
  match err.kind() {
    ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => Ok(None),
    _ => Err(err),
  }
}

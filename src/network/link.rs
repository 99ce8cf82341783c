//! Newline framed TCP links
//!
//! A link is split into a reader, owned by the thread that services it, and a
//! writer that stays with the core. Closing the writer shuts the socket down in
//! both directions, which is also how a blocked reader is released.
//!
use std::cmp;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::{Error, TransportError};
use crate::messages::Message;

const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_millis(1000);

/// Result of a single blocking line read
#[derive(Debug)]
pub enum ReadOutcome {
    Line(String),
    /// The read timeout expired. Any partial line is retained for the next read.
    Timeout,
    PeerClosed,
    Failed(io::Error)
}

pub struct LinkReader {
    reader: BufReader<TcpStream>,
    partial: String
}

impl LinkReader {
    pub fn read_line(&mut self) -> ReadOutcome {
        loop {
            match self.reader.read_line(&mut self.partial) {
                Ok(0) => return ReadOutcome::PeerClosed,
                Ok(_) => {
                    // read_line only stops short of a newline at end of stream
                    if !self.partial.ends_with('\n') {
                        continue;
                    }
                    let line = self.partial.trim_end_matches(|c: char| c == '\r' || c == '\n').to_string();
                    self.partial.clear();
                    if !line.trim().is_empty() {
                        return ReadOutcome::Line(line);
                    }
                },
                Err(e) => match e.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => return ReadOutcome::Timeout,
                    io::ErrorKind::Interrupted => (),
                    io::ErrorKind::InvalidData => {
                        // The offending bytes are already consumed; drop whatever was buffered with them
                        warn!("Discarding a line that is not valid UTF-8");
                        self.partial.clear();
                    },
                    _ => return ReadOutcome::Failed(e)
                }
            }
        }
    }

    /// Blocks until a complete message arrives. Used during startup, before the
    /// link is handed over to a reader thread.
    pub fn read_message(&mut self) -> Result<Message, Error> {
        match self.read_line() {
            ReadOutcome::Line(line) => Ok(Message::decode(&line)?),
            ReadOutcome::Timeout => Err(TransportError::Io(io::ErrorKind::TimedOut.into()).into()),
            ReadOutcome::PeerClosed => Err(TransportError::Closed.into()),
            ReadOutcome::Failed(e) => Err(TransportError::Io(e).into())
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.reader.get_ref().set_read_timeout(timeout)
    }
}

pub struct LinkWriter {
    stream: TcpStream
}

impl LinkWriter {
    pub fn send(&self, message: &Message) -> Result<(), TransportError> {
        let mut line = message.to_string();
        line.push('\n');
        (&self.stream).write_all(line.as_bytes())?;
        Ok(())
    }

    pub fn close(&self) {
        // Already closed sockets report NotConnected, which is of no interest
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

pub fn split(stream: TcpStream) -> Result<(LinkReader, LinkWriter), TransportError> {
    stream.set_nodelay(true)?;
    let writer = stream.try_clone()?;
    Ok((
        LinkReader { reader: BufReader::new(stream), partial: String::new() },
        LinkWriter { stream: writer }
    ))
}

pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    (host, port).to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable,
            format!("{}:{} did not resolve to an address", host, port)).into())
}

pub fn listen(host: &str, port: u16) -> Result<TcpListener, TransportError> {
    let addr = resolve(host, port)?;
    TcpListener::bind(addr).map_err(|source| TransportError::Bind { addr, source })
}

/// Connects to `addr`, retrying with exponential backoff while the remote
/// listener is not yet up. Gives up once the next attempt would start after
/// `deadline`.
pub fn connect_with_retry(addr: SocketAddr, deadline: Instant) -> Result<TcpStream, TransportError> {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => return Ok(stream),
            Err(source) => {
                if Instant::now() + backoff >= deadline {
                    return Err(TransportError::ConnectTimeout { addr, source });
                }
                debug!("Connection to {} failed ({}), retrying in {:?}", addr, source, backoff);
                thread::sleep(backoff);
                backoff = cmp::min(backoff * 2, MAX_BACKOFF);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vote::ParticipantId;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn lines_are_framed() {
        let (client, server) = pair();
        let (_, writer) = split(client).unwrap();
        let (mut reader, _) = split(server).unwrap();

        writer.send(&Message::Join(ParticipantId(5))).unwrap();
        writer.send(&Message::Restart).unwrap();

        assert_eq!(reader.read_message().unwrap(), Message::Join(ParticipantId(5)));
        match reader.read_line() {
            ReadOutcome::Line(l) => assert_eq!(l, "RESTART"),
            other => panic!("unexpected {:?}", other)
        }
    }

    #[test]
    fn read_timeout_keeps_link_open() {
        let (client, server) = pair();
        let (_, writer) = split(client).unwrap();
        let (mut reader, _) = split(server).unwrap();

        reader.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        match reader.read_line() {
            ReadOutcome::Timeout => (),
            other => panic!("unexpected {:?}", other)
        }

        writer.send(&Message::Restart).unwrap();
        assert_eq!(reader.read_message().unwrap(), Message::Restart);
    }

    #[test]
    fn invalid_utf8_line_is_skipped() {
        let (client, server) = pair();
        let (mut reader, _) = split(server).unwrap();

        (&client).write_all(b"VOTE 9 \xff\xfe\nVOTE 9 A\n").unwrap();

        assert_eq!(reader.read_message().unwrap(),
            Message::Vote(vec![(ParticipantId(9), crate::vote::VoteOption::from("A"))]));
    }

    #[test]
    fn close_is_seen_by_the_remote_reader() {
        let (client, server) = pair();
        let (_, writer) = split(client).unwrap();
        let (mut reader, _) = split(server).unwrap();

        writer.close();
        match reader.read_line() {
            ReadOutcome::PeerClosed | ReadOutcome::Failed(_) => (),
            other => panic!("unexpected {:?}", other)
        }
    }

    #[test]
    fn connect_gives_up_at_deadline() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let r = connect_with_retry(addr, Instant::now() + Duration::from_millis(120));
        match r {
            Err(TransportError::ConnectTimeout { .. }) => (),
            other => panic!("unexpected {:?}", other.map(|_| ()))
        }
    }
}

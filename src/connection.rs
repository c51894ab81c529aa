use std::io::{self, Read};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};

use mio::net::TcpStream;
use tracing::{debug, trace};

use crate::poller::{Interest, Multiplexer};
use crate::request::{ParseStatus, RequestState};
use crate::response::{FlushStatus, Outgoing, ResponseCode, ServedFile};
use crate::site::Site;
use crate::window::{ReadWindow, READ_BUFFER_SIZE};

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("request does not fit in {0} bytes")]
    Oversized(usize),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    // The request head is still open; keep the connection readable.
    NeedMore,
    // A response is prepared (or, for `Closed`, the connection should be dropped).
    Respond(ResponseCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Done,
    Pending,
    Error,
}

// Request and response state of one HTTP exchange, independent of the socket.
pub struct Exchange {
    window: ReadWindow,
    request: RequestState,
    outgoing: Outgoing,
}

impl Default for Exchange {
    fn default() -> Self {
        Self::with_capacity(READ_BUFFER_SIZE)
    }
}

impl Exchange {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            window: ReadWindow::with_capacity(capacity),
            request: RequestState::default(),
            outgoing: Outgoing::new(),
        }
    }

    // Clears all cursors and releases any prepared response together with its mapping.
    pub fn reset(&mut self) {
        self.window.clear();
        self.request.reset();
        self.outgoing.reset();
    }

    pub fn outgoing(&self) -> Option<&Outgoing> {
        self.outgoing.is_staged().then_some(&self.outgoing)
    }

    // Intent: drain a non-blocking source into the free part of the window.
    // Result: the number of bytes read before the source would block or the window filled
    // up; end of stream, or a window that was already full, is an error.
    pub fn fill_from<R: Read>(&mut self, source: &mut R) -> Result<usize, ReadError> {
        let mut total = 0;
        loop {
            if self.window.is_full() {
                if total > 0 {
                    return Ok(total);
                }
                return Err(ReadError::Oversized(self.window.capacity()));
            }
            match source.read(self.window.spare_mut()) {
                Ok(0) => return Err(ReadError::PeerClosed),
                Ok(count) => {
                    self.window.commit(count);
                    total += count;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(ReadError::Io(err)),
            }
        }
    }

    // Intent: parse whatever has been read so far and, once the head is complete, prepare
    // the response for the requested route.
    // Result: NeedMore while the head is open, otherwise the response code now staged.
    pub fn parse_and_respond(&mut self, site: &Site) -> ParseOutcome {
        let served = match self.request.advance(&mut self.window) {
            ParseStatus::NeedMore if self.window.is_full() => Err(ResponseCode::BadRequest),
            ParseStatus::NeedMore => return ParseOutcome::NeedMore,
            ParseStatus::Bad => Err(ResponseCode::BadRequest),
            ParseStatus::Complete if self.request.has_body() => Err(ResponseCode::BadRequest),
            ParseStatus::Complete => site.serve(self.request.target(&self.window)),
        };
        ParseOutcome::Respond(self.stage(served))
    }

    fn stage(&mut self, served: Result<ServedFile, ResponseCode>) -> ResponseCode {
        let staged = match served {
            Ok(file) => self.outgoing.stage_file(file),
            Err(code) => self.outgoing.stage_status(code),
        };
        if let Err(err) = staged {
            debug!(error = %err, "falling back to internal error response");
            if self.outgoing.stage_status(ResponseCode::InternalError).is_err() {
                return ResponseCode::Closed;
            }
        }
        self.outgoing.code().unwrap_or(ResponseCode::Closed)
    }

    pub fn flush_to<W: io::Write>(&mut self, sink: &mut W) -> io::Result<FlushStatus> {
        self.outgoing.write_to(sink)
    }
}

// One accepted socket and its exchange state. Slots keep the value across connections so
// the buffers are reused rather than reallocated.
pub struct Connection {
    fd: RawFd,
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    exchange: Exchange,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            fd: -1,
            stream: None,
            peer: None,
            exchange: Exchange::default(),
        }
    }
}

impl Connection {
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn has_response(&self) -> bool {
        self.exchange.outgoing.is_staged()
    }

    // Intent: take ownership of a freshly accepted socket.
    // Result: all state reset and the descriptor watched for readable input.
    pub fn accept(
        &mut self,
        stream: TcpStream,
        peer: SocketAddr,
        poller: &Multiplexer,
    ) -> io::Result<()> {
        self.exchange.reset();
        let fd = stream.as_raw_fd();
        poller.register(fd, Interest::READABLE)?;
        self.fd = fd;
        self.stream = Some(stream);
        self.peer = Some(peer);
        debug!(fd, %peer, "connection accepted");
        Ok(())
    }

    pub fn fill_read_buffer(&mut self) -> Result<usize, ReadError> {
        let stream = self.stream.as_mut().ok_or(ReadError::PeerClosed)?;
        let count = self.exchange.fill_from(stream)?;
        trace!(fd = self.fd, count, "read request bytes");
        Ok(count)
    }

    pub fn parse_and_respond(&mut self, site: &Site) -> ParseOutcome {
        let outcome = self.exchange.parse_and_respond(site);
        trace!(
            fd = self.fd,
            ?outcome,
            method = ?self.exchange.request.method(),
            phase = ?self.exchange.request.phase(),
            "parsed request"
        );
        outcome
    }

    // Intent: send as much of the prepared response as the socket takes.
    // Result: Pending leaves the response staged; Done and Error release it.
    pub fn flush_write(&mut self) -> WriteStatus {
        let Some(stream) = self.stream.as_mut() else {
            return WriteStatus::Error;
        };
        match self.exchange.flush_to(stream) {
            Ok(FlushStatus::Pending) => WriteStatus::Pending,
            Ok(FlushStatus::Done) => {
                self.exchange.reset();
                WriteStatus::Done
            }
            Err(err) => {
                debug!(fd = self.fd, error = %err, "write failed");
                self.exchange.reset();
                WriteStatus::Error
            }
        }
    }

    // Drops the socket and any staged response. Closing twice is harmless.
    pub fn close(&mut self) {
        self.exchange.reset();
        if self.stream.take().is_some() {
            debug!(fd = self.fd, "connection closed");
        }
        self.peer = None;
        self.fd = -1;
    }
}

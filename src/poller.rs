use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Poll, Token, Waker};

pub use mio::Interest;

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

// Token for the worker completion waker. Descriptor tokens are the descriptor values
// themselves, which never reach this far.
pub const WAKER: Token = Token(usize::MAX - 1);

pub fn token_for(fd: RawFd) -> Token {
    Token(fd as usize)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub read_closed: bool,
    pub write_closed: bool,
}

impl Readiness {
    pub fn fd(&self) -> RawFd {
        self.token.0 as RawFd
    }

    pub fn is_hangup(&self) -> bool {
        self.error || self.write_closed
    }
}

// Readiness multiplexer over descriptors.
// Registrations are edge-triggered: after a readable notification the caller drains the
// descriptor until it would block. Peer-closed and error conditions are always reported.
pub struct Multiplexer {
    poll: Poll,
    events: Events,
}

impl Multiplexer {
    pub fn new(event_capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(event_capacity.max(1)),
        })
    }

    pub fn register(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), token_for(fd), interest)
    }

    pub fn modify(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.poll
            .registry()
            .reregister(&mut SourceFd(&fd), token_for(fd), interest)
    }

    pub fn unregister(&self, fd: RawFd) -> io::Result<()> {
        self.poll.registry().deregister(&mut SourceFd(&fd))
    }

    pub fn waker(&self) -> io::Result<Waker> {
        Waker::new(self.poll.registry(), WAKER)
    }

    // Intent: block until at least one registered descriptor is ready.
    // Result: the batch of readiness events; a signal interruption yields an empty batch.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<Readiness>> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(err) => return Err(err),
        }
        Ok(self
            .events
            .iter()
            .map(|event| Readiness {
                token: event.token(),
                readable: event.is_readable(),
                writable: event.is_writable(),
                error: event.is_error(),
                read_closed: event.is_read_closed(),
                write_closed: event.is_write_closed(),
            })
            .collect())
    }
}

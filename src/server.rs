use std::io::{self, Read};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

use libc::c_int;
use mio::net::{TcpListener, UnixStream};
use mio::Token;
use tracing::{debug, info, trace, warn};

use crate::connection::{Connection, ParseOutcome, WriteStatus};
use crate::error::ServerError;
use crate::poller::{token_for, Interest, Multiplexer, Readiness, DEFAULT_EVENT_CAPACITY, WAKER};
use crate::pool::{Rejected, WorkerPool, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};
use crate::response::ResponseCode;
use crate::signals::is_termination;
use crate::site::Site;
use crate::table::{descriptor_ceiling, ConnectionTable, SlotState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    pub workers: usize,
    pub queue_capacity: usize,
    pub event_capacity: usize,
    // Slots in the connection table; `None` sizes it to the descriptor limit.
    pub table_capacity: Option<usize>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            table_capacity: None,
        }
    }
}

struct Parsed {
    fd: RawFd,
    connection: Box<Connection>,
    outcome: ParseOutcome,
}

// The reactor: one thread owning the listener, the signal pipe, every registration and
// all socket I/O. Parsing runs on the worker pool.
pub struct Server {
    poller: Multiplexer,
    listener: TcpListener,
    listener_token: Token,
    signals: UnixStream,
    signal_token: Token,
    table: ConnectionTable,
    pool: WorkerPool<Box<Connection>>,
    parsed: Receiver<Parsed>,
    stop: bool,
}

impl Server {
    // Intent: wire the listener, the signal pipe and the worker pool into one reactor.
    // Result: a server ready to run; any failure here is fatal for startup.
    pub fn new(
        listener: TcpListener,
        signals: UnixStream,
        site: Site,
        options: ServerOptions,
    ) -> Result<Self, ServerError> {
        let poller = Multiplexer::new(options.event_capacity)?;
        poller.register(listener.as_raw_fd(), Interest::READABLE)?;
        poller.register(signals.as_raw_fd(), Interest::READABLE)?;

        let capacity = match options.table_capacity {
            Some(capacity) => capacity,
            None => descriptor_ceiling()?,
        };
        if capacity == 0 {
            return Err(ServerError::EmptyTable);
        }

        let waker = Arc::new(poller.waker()?);
        let site = Arc::new(site);
        let (sender, parsed) = mpsc::channel();
        let pool = WorkerPool::new(
            options.workers,
            options.queue_capacity,
            move |mut connection: Box<Connection>| {
                let outcome = connection.parse_and_respond(&site);
                let fd = connection.fd();
                if sender
                    .send(Parsed {
                        fd,
                        connection,
                        outcome,
                    })
                    .is_err()
                {
                    return;
                }
                if let Err(err) = waker.wake() {
                    warn!(fd, error = %err, "failed to wake reactor");
                }
            },
        )?;

        Ok(Self {
            listener_token: token_for(listener.as_raw_fd()),
            signal_token: token_for(signals.as_raw_fd()),
            poller,
            listener,
            signals,
            table: ConnectionTable::with_capacity(capacity),
            pool,
            parsed,
            stop: false,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    // Intent: run the event loop until a termination signal arrives.
    // Result: workers joined and every connection closed before returning; only a failing
    // readiness wait is reported as an error.
    pub fn run(mut self) -> Result<(), ServerError> {
        info!(
            addr = ?self.listener.local_addr().ok(),
            workers = self.pool.threads(),
            slots = self.table.capacity(),
            "reactor started"
        );
        let result = self.event_loop();
        self.shutdown();
        result
    }

    fn event_loop(&mut self) -> Result<(), ServerError> {
        while !self.stop {
            let ready = self.poller.wait(None)?;
            for readiness in ready {
                self.dispatch(readiness);
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, readiness: Readiness) {
        match readiness.token {
            WAKER => self.collect_parsed(),
            token if token == self.listener_token => self.accept_connections(),
            token if token == self.signal_token => self.drain_signals(),
            _ => self.connection_event(readiness),
        }
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let fd = stream.as_raw_fd();
                    let slots = self.table.capacity();
                    let Some(connection) = self.table.install(fd) else {
                        warn!(fd, %peer, slots, "no slot for descriptor, closing");
                        continue;
                    };
                    if let Err(err) = connection.accept(stream, peer, &self.poller) {
                        warn!(fd, error = %err, "failed to register connection");
                        self.table.vacate(fd);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    break;
                }
            }
        }
    }

    fn drain_signals(&mut self) {
        let mut buf = [0_u8; 1024];
        loop {
            match self.signals.read(&mut buf) {
                Ok(0) => break,
                Ok(count) => {
                    for &byte in &buf[..count] {
                        let signal = c_int::from(byte);
                        if is_termination(signal) {
                            info!(signal, "termination signal received");
                            self.stop = true;
                        } else {
                            debug!(signal, "ignoring signal");
                        }
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(error = %err, "signal pipe read failed");
                    break;
                }
            }
        }
    }

    fn connection_event(&mut self, readiness: Readiness) {
        let fd = readiness.fd();
        match self.table.state(fd) {
            SlotState::Vacant => trace!(fd, "event for vacant slot"),
            SlotState::InFlight { .. } => {
                if readiness.is_hangup() {
                    self.table.note_hangup(fd);
                }
            }
            SlotState::Open => {
                if readiness.error {
                    self.close(fd);
                } else if readiness.readable {
                    self.on_readable(fd);
                } else if readiness.writable {
                    self.on_writable(fd);
                } else if readiness.read_closed || readiness.write_closed {
                    self.close(fd);
                }
            }
        }
    }

    fn on_readable(&mut self, fd: RawFd) {
        let Some(connection) = self.table.get_mut(fd) else {
            return;
        };
        if connection.has_response() {
            return;
        }
        match connection.fill_read_buffer() {
            Ok(_) => self.submit(fd),
            Err(err) => {
                debug!(fd, error = %err, "dropping connection");
                self.close(fd);
            }
        }
    }

    fn submit(&mut self, fd: RawFd) {
        let Some(connection) = self.table.check_out(fd) else {
            return;
        };
        let connection = match self.pool.submit(connection) {
            Ok(()) => return,
            Err(Rejected::Full(connection)) => {
                warn!(fd, "worker queue full, dropping connection");
                connection
            }
            Err(Rejected::Closed(connection)) => connection,
        };
        self.table.check_in(fd, connection);
        self.close(fd);
    }

    fn on_writable(&mut self, fd: RawFd) {
        let Some(connection) = self.table.get_mut(fd) else {
            return;
        };
        if !connection.has_response() {
            return;
        }
        match connection.flush_write() {
            WriteStatus::Pending => trace!(fd, "response partially sent"),
            WriteStatus::Done => {
                trace!(fd, "response sent");
                self.close(fd);
            }
            WriteStatus::Error => self.close(fd),
        }
    }

    fn collect_parsed(&mut self) {
        while let Ok(Parsed {
            fd,
            connection,
            outcome,
        }) = self.parsed.try_recv()
        {
            if self.table.check_in(fd, connection) {
                self.close(fd);
                continue;
            }
            match outcome {
                ParseOutcome::NeedMore => self.rearm(fd, Interest::READABLE),
                ParseOutcome::Respond(ResponseCode::Closed) => self.close(fd),
                ParseOutcome::Respond(code) => {
                    debug!(fd, ?code, "response ready");
                    self.rearm(fd, Interest::WRITABLE);
                }
            }
        }
    }

    fn rearm(&mut self, fd: RawFd, interest: Interest) {
        if let Err(err) = self.poller.modify(fd, interest) {
            warn!(fd, error = %err, "failed to update registration");
            self.close(fd);
        }
    }

    fn close(&mut self, fd: RawFd) {
        if self.table.state(fd) == SlotState::Open {
            if let Err(err) = self.poller.unregister(fd) {
                trace!(fd, error = %err, "unregister failed");
            }
        }
        self.table.vacate(fd);
    }

    fn shutdown(&mut self) {
        self.pool.shutdown();
        let mut returned = 0;
        while self.parsed.try_recv().is_ok() {
            returned += 1;
        }
        let closed = self.table.close_all();
        info!(closed, returned, "reactor stopped");
    }
}

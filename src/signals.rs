use std::io;
use std::os::unix::io::{AsRawFd, IntoRawFd};

use libc::c_int;
use mio::net::UnixStream;
use tracing::debug;

pub use signal_hook::consts::{SIGALRM, SIGINT, SIGTERM};

pub fn is_termination(signal: c_int) -> bool {
    signal == SIGTERM || signal == SIGINT
}

// Intent: route asynchronous signals into the reactor through a self-pipe.
// Result: each delivery writes the signal number as one byte to the returned stream's
// peer; the write end lives for the rest of the process.
pub fn install(signals: &[c_int]) -> io::Result<UnixStream> {
    let (reader, writer) = UnixStream::pair()?;
    let write_fd = writer.into_raw_fd();

    for &signal in signals {
        let byte = u8::try_from(signal)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "signal number too large"))?;
        let action = move || {
            // send(2) is async-signal-safe; a full pipe just drops the notification.
            unsafe {
                libc::send(
                    write_fd,
                    (&byte as *const u8).cast::<libc::c_void>(),
                    1,
                    libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL,
                );
            }
        };
        unsafe { signal_hook::low_level::register(signal, action) }?;
    }

    debug!(fd = reader.as_raw_fd(), ?signals, "signal pipe installed");
    Ok(reader)
}

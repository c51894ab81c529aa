use std::io;
use std::os::unix::io::RawFd;

use crate::connection::Connection;

pub const MAX_TABLE_CAPACITY: usize = 1 << 20;

// Intent: read the soft RLIMIT_NOFILE of the process.
// Result: the number of descriptor values the connection table has to cover.
pub fn descriptor_ceiling() -> io::Result<usize> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0 {
        return Err(io::Error::last_os_error());
    }
    if limit.rlim_cur == libc::RLIM_INFINITY {
        return Ok(MAX_TABLE_CAPACITY);
    }
    Ok(usize::try_from(limit.rlim_cur).map_or(MAX_TABLE_CAPACITY, |cur| cur.min(MAX_TABLE_CAPACITY)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Vacant,
    Open,
    // Handed to the worker pool; `hangup` records a peer close seen meanwhile.
    InFlight { hangup: bool },
}

enum Slot {
    // Keeps the last connection's allocation for reuse.
    Vacant(Option<Box<Connection>>),
    Open(Box<Connection>),
    InFlight { hangup: bool },
}

// Connection table indexed by descriptor value.
// A slot is the only owner of its connection. Checking a connection out for parsing
// leaves an in-flight marker behind, so the reactor cannot touch it again until it is
// checked back in.
pub struct ConnectionTable {
    slots: Vec<Slot>,
}

impl ConnectionTable {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot::Vacant(None));
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot_mut(&mut self, fd: RawFd) -> Option<&mut Slot> {
        usize::try_from(fd).ok().and_then(|index| self.slots.get_mut(index))
    }

    pub fn state(&self, fd: RawFd) -> SlotState {
        let slot = usize::try_from(fd).ok().and_then(|index| self.slots.get(index));
        match slot {
            None | Some(Slot::Vacant(_)) => SlotState::Vacant,
            Some(Slot::Open(_)) => SlotState::Open,
            Some(Slot::InFlight { hangup }) => SlotState::InFlight { hangup: *hangup },
        }
    }

    pub fn open_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| !matches!(slot, Slot::Vacant(_)))
            .count()
    }

    // Intent: claim the slot for a newly accepted descriptor.
    // Result: a reset-ready connection, or None when the descriptor is beyond capacity or
    // the slot is still in use.
    pub fn install(&mut self, fd: RawFd) -> Option<&mut Connection> {
        let slot = self.slot_mut(fd)?;
        let connection = match slot {
            Slot::Vacant(cached) => cached.take().unwrap_or_default(),
            _ => return None,
        };
        *slot = Slot::Open(connection);
        match slot {
            Slot::Open(connection) => Some(connection.as_mut()),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut Connection> {
        match self.slot_mut(fd)? {
            Slot::Open(connection) => Some(connection.as_mut()),
            _ => None,
        }
    }

    pub fn check_out(&mut self, fd: RawFd) -> Option<Box<Connection>> {
        let slot = self.slot_mut(fd)?;
        if !matches!(slot, Slot::Open(_)) {
            return None;
        }
        match std::mem::replace(slot, Slot::InFlight { hangup: false }) {
            Slot::Open(connection) => Some(connection),
            _ => None,
        }
    }

    // Puts a parsed connection back. Returns whether a hang-up was noted while it was out.
    pub fn check_in(&mut self, fd: RawFd, connection: Box<Connection>) -> bool {
        let Some(slot) = self.slot_mut(fd) else {
            return true;
        };
        let hangup = match slot {
            Slot::InFlight { hangup } => *hangup,
            _ => true,
        };
        *slot = Slot::Open(connection);
        hangup
    }

    pub fn note_hangup(&mut self, fd: RawFd) {
        if let Some(Slot::InFlight { hangup }) = self.slot_mut(fd) {
            *hangup = true;
        }
    }

    // Intent: end an open connection and free its slot.
    // Result: the socket is closed and the allocation kept for the next accept; in-flight
    // slots only get a hang-up mark.
    pub fn vacate(&mut self, fd: RawFd) -> bool {
        let Some(slot) = self.slot_mut(fd) else {
            return false;
        };
        match slot {
            Slot::Open(_) => {}
            Slot::InFlight { hangup } => {
                *hangup = true;
                return false;
            }
            Slot::Vacant(_) => return false,
        }
        match std::mem::replace(slot, Slot::Vacant(None)) {
            Slot::Open(mut connection) => {
                connection.close();
                *slot = Slot::Vacant(Some(connection));
                true
            }
            _ => false,
        }
    }

    // Closes every open connection. In-flight connections are dropped by whoever holds them.
    pub fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for slot in &mut self.slots {
            match std::mem::replace(slot, Slot::Vacant(None)) {
                Slot::Open(mut connection) => {
                    connection.close();
                    closed += 1;
                }
                Slot::Vacant(_) | Slot::InFlight { .. } => {}
            }
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_is_positive() {
        let ceiling = descriptor_ceiling().unwrap();
        assert!(ceiling > 0);
        assert!(ceiling <= MAX_TABLE_CAPACITY);
    }

    #[test]
    fn rejects_descriptors_beyond_capacity() {
        let mut table = ConnectionTable::with_capacity(4);
        assert!(table.install(4).is_none());
        assert!(table.install(-1).is_none());
        assert!(table.install(3).is_some());
        assert_eq!(table.state(3), SlotState::Open);
        assert_eq!(table.state(100), SlotState::Vacant);
    }

    #[test]
    fn check_out_blocks_reentry() {
        let mut table = ConnectionTable::with_capacity(8);
        table.install(5).unwrap();

        let connection = table.check_out(5).unwrap();
        assert_eq!(table.state(5), SlotState::InFlight { hangup: false });
        assert!(table.check_out(5).is_none());
        assert!(table.get_mut(5).is_none());
        assert!(table.install(5).is_none());

        assert!(!table.check_in(5, connection));
        assert_eq!(table.state(5), SlotState::Open);
    }

    #[test]
    fn hangup_while_in_flight_is_reported_on_check_in() {
        let mut table = ConnectionTable::with_capacity(8);
        table.install(2).unwrap();
        let connection = table.check_out(2).unwrap();

        assert!(!table.vacate(2));
        assert_eq!(table.state(2), SlotState::InFlight { hangup: true });
        assert!(table.check_in(2, connection));
        assert!(table.vacate(2));
        assert_eq!(table.state(2), SlotState::Vacant);
    }

    #[test]
    fn vacated_slot_is_reusable() {
        let mut table = ConnectionTable::with_capacity(8);
        table.install(1).unwrap();
        assert_eq!(table.open_count(), 1);
        assert!(table.vacate(1));
        assert!(!table.vacate(1));
        assert_eq!(table.open_count(), 0);
        assert!(table.install(1).is_some());
        assert_eq!(table.close_all(), 1);
    }
}

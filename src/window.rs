use std::ops::Range;

// Capacity of a connection's request buffer. A request head that does not fit is rejected.
pub const READ_BUFFER_SIZE: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LineStatus {
    // A CRLF-terminated line; the range excludes the terminator.
    Complete(Range<usize>),
    // The scan reached the end of the filled bytes without a terminator.
    Open,
    // A CR not followed by LF, or an LF without a preceding CR.
    Bad,
}

// Fixed-capacity request window.
// Keeps `line_start <= scan_pos <= filled_end <= capacity`. Bytes past `filled_end` are
// spare room for the next socket read; lines are handed out by range so they stay valid
// until the window is cleared.
pub(crate) struct ReadWindow {
    buf: Box<[u8]>,
    line_start: usize,
    scan_pos: usize,
    filled_end: usize,
}

impl ReadWindow {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0_u8; capacity].into_boxed_slice(),
            line_start: 0,
            scan_pos: 0,
            filled_end: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.capacity() - self.filled_end
    }

    pub(crate) fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.filled_end..]
    }

    pub(crate) fn commit(&mut self, count: usize) {
        self.filled_end = (self.filled_end + count).min(self.capacity());
    }

    pub(crate) fn slice(&self, range: Range<usize>) -> &[u8] {
        &self.buf[range]
    }

    pub(crate) fn clear(&mut self) {
        self.line_start = 0;
        self.scan_pos = 0;
        self.filled_end = 0;
    }

    // Intent: pull the next CRLF-terminated line out of the filled region.
    // Result: complete lines are consumed; an open line leaves the cursors where a later
    // call can resume once more bytes are committed.
    pub(crate) fn next_line(&mut self) -> LineStatus {
        while self.scan_pos < self.filled_end {
            match self.buf[self.scan_pos] {
                b'\r' => {
                    if self.scan_pos + 1 == self.filled_end {
                        return LineStatus::Open;
                    }
                    if self.buf[self.scan_pos + 1] != b'\n' {
                        return LineStatus::Bad;
                    }
                    let line = self.line_start..self.scan_pos;
                    self.scan_pos += 2;
                    self.line_start = self.scan_pos;
                    return LineStatus::Complete(line);
                }
                b'\n' => {
                    if self.scan_pos > self.line_start && self.buf[self.scan_pos - 1] == b'\r' {
                        let line = self.line_start..self.scan_pos - 1;
                        self.scan_pos += 1;
                        self.line_start = self.scan_pos;
                        return LineStatus::Complete(line);
                    }
                    return LineStatus::Bad;
                }
                _ => self.scan_pos += 1,
            }
        }
        LineStatus::Open
    }
}

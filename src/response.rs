use std::io::{self, IoSlice, Write};

use crate::mapping::FileMapping;

pub const HEADER_BUFFER_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    FileServed,
    BadRequest,
    Forbidden,
    NoResource,
    InternalError,
    // Drop the connection without answering.
    Closed,
}

impl ResponseCode {
    pub fn status(&self) -> Option<u16> {
        match self {
            ResponseCode::FileServed => Some(200),
            ResponseCode::BadRequest => Some(400),
            ResponseCode::Forbidden => Some(403),
            ResponseCode::NoResource => Some(404),
            ResponseCode::InternalError => Some(500),
            ResponseCode::Closed => None,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ResponseCode::FileServed => "OK",
            ResponseCode::BadRequest => "Bad Request",
            ResponseCode::Forbidden => "Forbidden",
            ResponseCode::NoResource => "Not Found",
            ResponseCode::InternalError => "Internal Server Error",
            ResponseCode::Closed => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    Html,
    Jpeg,
    Png,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Html => "text/html",
            ContentType::Jpeg => "image/jpeg",
            ContentType::Png => "image/png",
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.ends_with(".jpg") {
            Some(ContentType::Jpeg)
        } else if name.ends_with(".png") {
            Some(ContentType::Png)
        } else {
            None
        }
    }
}

#[derive(Debug)]
pub struct ServedFile {
    pub content_type: Option<ContentType>,
    pub size: usize,
    // `None` for empty files.
    pub mapping: Option<FileMapping>,
}

#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("response header exceeds {HEADER_BUFFER_SIZE} bytes")]
    HeaderOverflow,
    #[error("{0:?} has no status line")]
    NoStatus(ResponseCode),
}

// Fixed-capacity header block; writes past capacity fail instead of growing.
pub(crate) struct HeaderBlock {
    buf: Box<[u8; HEADER_BUFFER_SIZE]>,
    len: usize,
}

impl HeaderBlock {
    fn new() -> Self {
        Self {
            buf: Box::new([0_u8; HEADER_BUFFER_SIZE]),
            len: 0,
        }
    }

    fn clear(&mut self) {
        self.len = 0;
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn status_line(&mut self, code: ResponseCode, status: u16) -> Result<(), PrepareError> {
        write!(self, "HTTP/1.1 {} {}\r\n", status, code.reason()).map_err(|_| PrepareError::HeaderOverflow)
    }

    fn header(&mut self, key: &str, value: &dyn std::fmt::Display) -> Result<(), PrepareError> {
        write!(self, "{key}: {value}\r\n").map_err(|_| PrepareError::HeaderOverflow)
    }

    fn end(&mut self) -> Result<(), PrepareError> {
        self.write_all(b"\r\n").map_err(|_| PrepareError::HeaderOverflow)
    }
}

impl Write for HeaderBlock {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let count = data.len().min(HEADER_BUFFER_SIZE - self.len);
        self.buf[self.len..self.len + count].copy_from_slice(&data[..count]);
        self.len += count;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    Done,
    Pending,
}

// Response staging area of one connection: header bytes, then the mapped body when a file
// is served. The header storage lives as long as the connection; `bytes_sent` never
// passes `bytes_prepared`.
pub struct Outgoing {
    header: HeaderBlock,
    code: Option<ResponseCode>,
    body: Option<FileMapping>,
    bytes_prepared: usize,
    bytes_sent: usize,
}

impl Default for Outgoing {
    fn default() -> Self {
        Self::new()
    }
}

impl Outgoing {
    pub fn new() -> Self {
        Self {
            header: HeaderBlock::new(),
            code: None,
            body: None,
            bytes_prepared: 0,
            bytes_sent: 0,
        }
    }

    // Intent: forget the staged response but keep the header storage.
    // Result: nothing staged, the mapping released, both cursors at zero.
    pub fn reset(&mut self) {
        self.header.clear();
        self.code = None;
        self.body = None;
        self.bytes_prepared = 0;
        self.bytes_sent = 0;
    }

    pub fn is_staged(&self) -> bool {
        self.code.is_some()
    }

    // Intent: stage a bodyless response for an error or status-only outcome.
    // Result: status line followed by the blank line.
    pub fn stage_status(&mut self, code: ResponseCode) -> Result<(), PrepareError> {
        self.reset();
        let status = code.status().ok_or(PrepareError::NoStatus(code))?;
        let written = self
            .header
            .status_line(code, status)
            .and_then(|()| self.header.end());
        self.commit(code, None, written)
    }

    // Intent: stage a 200 response for a prepared file.
    // Result: Content-Type and Content-Length headers, with the mapping as the second segment.
    pub fn stage_file(&mut self, file: ServedFile) -> Result<(), PrepareError> {
        self.reset();
        let code = ResponseCode::FileServed;
        let written = self.file_header(code, &file);
        self.commit(code, file.mapping, written)
    }

    fn file_header(&mut self, code: ResponseCode, file: &ServedFile) -> Result<(), PrepareError> {
        self.header.status_line(code, 200)?;
        if let Some(content_type) = file.content_type {
            self.header.header("Content-Type", &content_type.as_str())?;
        }
        self.header.header("Content-Length", &file.size)?;
        self.header.end()
    }

    fn commit(
        &mut self,
        code: ResponseCode,
        body: Option<FileMapping>,
        written: Result<(), PrepareError>,
    ) -> Result<(), PrepareError> {
        if let Err(err) = written {
            self.reset();
            return Err(err);
        }
        let body_len = body.as_ref().map_or(0, FileMapping::len);
        self.bytes_prepared = self.header.len + body_len;
        self.body = body;
        self.code = Some(code);
        Ok(())
    }

    pub fn code(&self) -> Option<ResponseCode> {
        self.code
    }

    pub fn bytes_prepared(&self) -> usize {
        self.bytes_prepared
    }

    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    pub fn header_bytes(&self) -> &[u8] {
        self.header.as_bytes()
    }

    fn remaining(&self) -> (&[u8], &[u8]) {
        let header = self.header.as_bytes();
        let head = &header[self.bytes_sent.min(header.len())..];
        let body = match &self.body {
            Some(mapping) => {
                let offset = self.bytes_sent.saturating_sub(header.len());
                &mapping.as_slice()[offset.min(mapping.len())..]
            }
            None => &[],
        };
        (head, body)
    }

    // Intent: push the unsent part of the header and body with one scatter write per attempt.
    // Result: Done once every prepared byte is out, Pending when the sink would block.
    pub fn write_to<W: Write>(&mut self, sink: &mut W) -> io::Result<FlushStatus> {
        if !self.is_staged() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no response staged",
            ));
        }
        while self.bytes_sent < self.bytes_prepared {
            let (head, body) = self.remaining();
            let segments = [IoSlice::new(head), IoSlice::new(body)];
            match sink.write_vectored(&segments) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(written) => {
                    self.bytes_sent = (self.bytes_sent + written).min(self.bytes_prepared);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(FlushStatus::Pending)
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(FlushStatus::Done)
    }
}

use std::ops::Range;

use crate::window::{LineStatus, ReadWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    RequestLine,
    Headers,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParseStatus {
    NeedMore,
    Bad,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestLine {
    pub(crate) method: Method,
    pub(crate) target: Range<usize>,
}

const CONTENT_LENGTH: &[u8] = b"content-length:";

// Intent: match `METHOD SP TARGET SP HTTP/1.1` with GET/POST and the version compared
// case-insensitively.
// Result: None for anything else, including empty targets or doubled separators.
pub(crate) fn parse_request_line(line: &[u8]) -> Option<RequestLine> {
    let method_end = line.iter().position(u8::is_ascii_whitespace)?;
    let method = &line[..method_end];
    let method = if method.eq_ignore_ascii_case(b"GET") {
        Method::Get
    } else if method.eq_ignore_ascii_case(b"POST") {
        Method::Post
    } else {
        return None;
    };

    let target_start = method_end + 1;
    let target_len = line[target_start..]
        .iter()
        .position(u8::is_ascii_whitespace)?;
    if target_len == 0 {
        return None;
    }
    let target_end = target_start + target_len;

    let version = &line[target_end + 1..];
    if !version.eq_ignore_ascii_case(b"HTTP/1.1") {
        return None;
    }

    Some(RequestLine {
        method,
        target: target_start..target_end,
    })
}

// Intent: read a `Content-Length` header value the way a C `atoi` would.
// Result: None for other headers; leading blanks skipped, trailing garbage ignored.
pub(crate) fn content_length(line: &[u8]) -> Option<i64> {
    if line.len() < CONTENT_LENGTH.len()
        || !line[..CONTENT_LENGTH.len()].eq_ignore_ascii_case(CONTENT_LENGTH)
    {
        return None;
    }
    let value = &line[CONTENT_LENGTH.len()..];
    let value = match value.iter().position(|b| *b != b' ' && *b != b'\t') {
        Some(start) => &value[start..],
        None => return Some(0),
    };

    let (negative, digits) = match value.first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };
    let magnitude = digits
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0_i64, |acc, b| {
            acc.saturating_mul(10).saturating_add(i64::from(b - b'0'))
        });
    Some(if negative { -magnitude } else { magnitude })
}

// Parse progress for one request. Ranges point into the connection's read window and
// are meaningful only until the window is cleared.
#[derive(Debug)]
pub(crate) struct RequestState {
    phase: Phase,
    method: Option<Method>,
    target: Range<usize>,
    content_length: i64,
}

impl Default for RequestState {
    fn default() -> Self {
        Self {
            phase: Phase::RequestLine,
            method: None,
            target: 0..0,
            content_length: 0,
        }
    }
}

impl RequestState {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn method(&self) -> Option<Method> {
        self.method
    }

    pub(crate) fn has_body(&self) -> bool {
        self.content_length != 0
    }

    pub(crate) fn target<'a>(&self, window: &'a ReadWindow) -> &'a [u8] {
        window.slice(self.target.clone())
    }

    // Intent: feed every complete line in the window to the handler for the current phase.
    // Result: Complete once the blank line has been seen and the remaining bytes hold no
    // malformed terminator; NeedMore while the head is still open.
    pub(crate) fn advance(&mut self, window: &mut ReadWindow) -> ParseStatus {
        loop {
            let line = match window.next_line() {
                LineStatus::Complete(line) => line,
                LineStatus::Open => break,
                LineStatus::Bad => return ParseStatus::Bad,
            };

            match self.phase {
                Phase::RequestLine => {
                    let Some(request_line) = parse_request_line(window.slice(line.clone())) else {
                        return ParseStatus::Bad;
                    };
                    self.method = Some(request_line.method);
                    self.target = line.start + request_line.target.start
                        ..line.start + request_line.target.end;
                    self.phase = Phase::Headers;
                }
                Phase::Headers => {
                    let text = window.slice(line);
                    if text.is_empty() {
                        self.phase = Phase::Body;
                    } else if let Some(length) = content_length(text) {
                        self.content_length = length;
                    }
                }
                Phase::Body => {}
            }
        }

        if self.phase == Phase::Body {
            ParseStatus::Complete
        } else {
            ParseStatus::NeedMore
        }
    }
}

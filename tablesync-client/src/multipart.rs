//! Multipart encoding and streaming decoding for bulk attachment transfer.
//!
//! Uploads build a `multipart/form-data` body with one part per file.
//! Downloads are decoded by [`MultipartParser`], a push parser that is fed
//! raw byte chunks as they arrive and yields events. It does no I/O itself.
//!
//! Parser states follow the body layout:
//!
//! ```text
//! Preamble --delimiter--> Boundary --CRLF--> Headers --CRLFCRLF--> Body
//!    Body --delimiter--> Boundary --"--"--> Done
//! ```

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Largest header block accepted for a single part.
pub const HEADER_PART_SIZE_MAX: usize = 10 * 1024;

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Errors raised while decoding a multipart body.
#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("stream ended in state {0}")]
    UnexpectedEof(ParserState),

    #[error("boundary not followed by CRLF or closing dashes")]
    MalformedBoundary,

    #[error("part header block exceeds {0} bytes")]
    HeadersTooLarge(usize),

    #[error("malformed part header: {0}")]
    MalformedHeader(String),
}

/// New boundary for an upload: `"ref"` followed by a random UUID.
pub fn generate_boundary() -> String {
    format!("ref{}", Uuid::new_v4())
}

/// Extracts the `boundary` parameter from a `Content-Type` value.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// Quotes inside a filename are doubled in `Content-Disposition`.
pub fn escape_filename(filename: &str) -> String {
    filename.replace('"', "\"\"")
}

/// Reads the `filename` parameter of a `Content-Disposition` value,
/// undoing [`escape_filename`].
pub fn content_disposition_filename(value: &str) -> Option<String> {
    let lower = value.to_ascii_lowercase();
    let mut search_from = 0;
    let start = loop {
        let idx = lower[search_from..].find("filename=")? + search_from;
        let preceded_ok = idx == 0
            || matches!(lower.as_bytes()[idx - 1], b';' | b' ' | b'\t');
        if preceded_ok {
            break idx + "filename=".len();
        }
        search_from = idx + 1;
    };

    let rest = &value[start..];
    let filename = if let Some(quoted) = rest.strip_prefix('"') {
        let mut out = String::new();
        let mut chars = quoted.chars().peekable();
        loop {
            match chars.next() {
                Some('"') if chars.peek() == Some(&'"') => {
                    chars.next();
                    out.push('"');
                }
                Some('"') | None => break,
                Some(c) => out.push(c),
            }
        }
        out
    } else {
        rest.split(';').next().unwrap_or_default().trim().to_string()
    };

    (!filename.is_empty()).then_some(filename)
}

/// Builds a `multipart/form-data` request body.
pub struct MultipartBuilder {
    boundary: String,
    body: Vec<u8>,
    parts: usize,
}

impl MultipartBuilder {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            body: Vec::new(),
            parts: 0,
        }
    }

    pub fn with_random_boundary() -> Self {
        Self::new(generate_boundary())
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `Content-Type` header value announcing the boundary.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn part_count(&self) -> usize {
        self.parts
    }

    /// Appends one file part.
    pub fn add_file_part(&mut self, filename: &str, content_type: &str, content: &[u8]) {
        let head = format!(
            "--{}\r\nContent-Disposition: file;filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            self.boundary,
            escape_filename(filename),
            content_type
        );
        self.body.extend_from_slice(head.as_bytes());
        self.body.extend_from_slice(content);
        self.body.extend_from_slice(CRLF);
        self.parts += 1;
    }

    /// Closes the body.
    pub fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        self.body
    }
}

/// Headers of one part, in arrival order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartHeaders {
    entries: Vec<(String, String)>,
}

impl PartHeaders {
    /// Case-insensitive lookup of the first header named `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The `filename` parameter of the part's `Content-Disposition`.
    pub fn filename(&self) -> Option<String> {
        self.get("Content-Disposition")
            .and_then(content_disposition_filename)
    }

    fn parse(block: &[u8]) -> Result<Self, MultipartError> {
        let text = String::from_utf8_lossy(block);
        let mut entries: Vec<(String, String)> = Vec::new();
        for line in text.split("\r\n") {
            if line.is_empty() {
                continue;
            }
            if line.starts_with([' ', '\t']) {
                // folded continuation of the previous header
                let (_, value) = entries
                    .last_mut()
                    .ok_or_else(|| MultipartError::MalformedHeader(line.to_string()))?;
                value.push(' ');
                value.push_str(line.trim());
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| MultipartError::MalformedHeader(line.to_string()))?;
            entries.push((name.trim().to_string(), value.trim().to_string()));
        }
        Ok(Self { entries })
    }
}

/// Parser position within the multipart body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParserState {
    Preamble,
    Headers,
    Body,
    Boundary,
    Done,
}

impl fmt::Display for ParserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preamble => "preamble",
            Self::Headers => "headers",
            Self::Body => "body",
            Self::Boundary => "boundary",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Output of [`MultipartParser::next_event`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MultipartEvent {
    /// A new part starts.
    Headers(PartHeaders),
    /// Body bytes of the current part. A part may be split over many events.
    Data(Vec<u8>),
    /// The current part is complete.
    PartEnd,
    /// The closing delimiter was read (or the body had no parts at all).
    Finished,
}

/// Push parser for `multipart/*` bodies.
pub struct MultipartParser {
    /// `CRLF--boundary`.
    delimiter: Vec<u8>,
    buf: Vec<u8>,
    state: ParserState,
    input_closed: bool,
}

impl MultipartParser {
    pub fn new(boundary: &str) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 4);
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(boundary.as_bytes());
        Self {
            delimiter,
            // lets a body that opens directly with `--boundary` match the delimiter
            buf: CRLF.to_vec(),
            state: ParserState::Preamble,
            input_closed: false,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Appends received bytes.
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.state != ParserState::Done {
            self.buf.extend_from_slice(chunk);
        }
    }

    /// Signals that no more bytes will be fed.
    pub fn close_input(&mut self) {
        self.input_closed = true;
    }

    /// Advances the state machine.
    ///
    /// Returns `Ok(None)` when more input is needed.
    pub fn next_event(&mut self) -> Result<Option<MultipartEvent>, MultipartError> {
        loop {
            match self.state {
                ParserState::Preamble => {
                    if let Some(pos) = find(&self.buf, &self.delimiter) {
                        self.buf.drain(..pos + self.delimiter.len());
                        self.state = ParserState::Boundary;
                        continue;
                    }
                    self.keep_delimiter_tail();
                    if self.input_closed {
                        self.state = ParserState::Done;
                        return Ok(Some(MultipartEvent::Finished));
                    }
                    return Ok(None);
                }
                ParserState::Boundary => {
                    if self.buf.len() < 2 {
                        return self.need_more();
                    }
                    if self.buf.starts_with(CRLF) {
                        self.buf.drain(..2);
                        self.state = ParserState::Headers;
                        continue;
                    }
                    if self.buf.starts_with(b"--") {
                        // epilogue is ignored
                        self.buf.clear();
                        self.state = ParserState::Done;
                        return Ok(Some(MultipartEvent::Finished));
                    }
                    return Err(MultipartError::MalformedBoundary);
                }
                ParserState::Headers => {
                    if self.buf.starts_with(CRLF) {
                        self.buf.drain(..2);
                        self.state = ParserState::Body;
                        return Ok(Some(MultipartEvent::Headers(PartHeaders::default())));
                    }
                    if let Some(pos) = find(&self.buf, HEADER_END) {
                        if pos > HEADER_PART_SIZE_MAX {
                            return Err(MultipartError::HeadersTooLarge(HEADER_PART_SIZE_MAX));
                        }
                        let headers = PartHeaders::parse(&self.buf[..pos])?;
                        self.buf.drain(..pos + HEADER_END.len());
                        self.state = ParserState::Body;
                        return Ok(Some(MultipartEvent::Headers(headers)));
                    }
                    if self.buf.len() > HEADER_PART_SIZE_MAX {
                        return Err(MultipartError::HeadersTooLarge(HEADER_PART_SIZE_MAX));
                    }
                    return self.need_more();
                }
                ParserState::Body => {
                    if let Some(pos) = find(&self.buf, &self.delimiter) {
                        if pos > 0 {
                            let data: Vec<u8> = self.buf.drain(..pos).collect();
                            return Ok(Some(MultipartEvent::Data(data)));
                        }
                        self.buf.drain(..self.delimiter.len());
                        self.state = ParserState::Boundary;
                        return Ok(Some(MultipartEvent::PartEnd));
                    }
                    let keep = self.delimiter.len() - 1;
                    if self.buf.len() > keep {
                        let data: Vec<u8> = self.buf.drain(..self.buf.len() - keep).collect();
                        return Ok(Some(MultipartEvent::Data(data)));
                    }
                    return self.need_more();
                }
                ParserState::Done => return Ok(Some(MultipartEvent::Finished)),
            }
        }
    }

    fn need_more(&self) -> Result<Option<MultipartEvent>, MultipartError> {
        if self.input_closed {
            Err(MultipartError::UnexpectedEof(self.state))
        } else {
            Ok(None)
        }
    }

    fn keep_delimiter_tail(&mut self) {
        let keep = self.delimiter.len() - 1;
        if self.buf.len() > keep {
            self.buf.drain(..self.buf.len() - keep);
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

use crate::loc::Loc;
use crate::consts::syntax::ESCAPE;

use std::mem;

/// One logical line: physical lines joined at escaped newlines, terminator stripped.
///
/// Only `$\n` is consumed here, every other escape is kept verbatim so that the
/// grammar can still tell `$ ` and `$:` apart from real separators, see [`decode_escapes`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line {
    pub text: String,
    pub loc: Loc,
    /// Spans more than one physical line.
    pub continued: bool,
}

impl Line {
    #[inline(always)]
    pub fn is_indented(&self) -> bool {
        self.text.starts_with([' ', '\t'])
    }

    #[inline(always)]
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    #[inline(always)]
    pub fn is_comment(&self) -> bool {
        self.text.trim_start().starts_with(crate::consts::syntax::COMMENT)
    }
}

/// Incremental decoder: bytes go in through [`LineDecoder::append`] in any split,
/// complete logical lines come out together with their exact start offsets.
#[cfg_attr(feature = "dbg", derive(Debug))]
pub struct LineDecoder {
    buf: Vec::<u8>,
    /// `$` seen as the very last byte of the previous append.
    pending_escape: bool,
    /// `$\r` seen, a `\n` next makes it a continuation.
    escaped_cr: bool,
    continued: bool,
    start: Option::<Loc>,
    offset: u64,
    row: u32,
}

impl LineDecoder {
    /// `offset` and `row` describe where the first appended byte sits in the file.
    #[inline]
    pub fn new(offset: u64, row: u32) -> Self {
        Self {
            buf: Vec::with_capacity(128),
            pending_escape: false,
            escaped_cr: false,
            continued: false,
            start: None,
            offset,
            row,
        }
    }

    /// Absolute offset of the next byte to be appended.
    #[inline(always)]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[inline(always)]
    pub fn row(&self) -> u32 {
        self.row
    }

    #[inline]
    fn take_line(&mut self) -> Line {
        let bytes = mem::take(&mut self.buf);
        let text = match String::from_utf8(bytes) {
            Ok(ok) => ok,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned()
        };
        Line {
            text,
            loc: self.start.take().unwrap_or_default(),
            continued: mem::take(&mut self.continued),
        }
    }

    pub fn append(&mut self, bytes: &[u8]) -> Vec::<Line> {
        let mut lines = Vec::new();
        for &b in bytes {
            if self.start.is_none() {
                self.start = Some(Loc::new(self.row, self.offset))
            }
            self.offset += 1;

            if self.escaped_cr {
                self.escaped_cr = false;
                if b == b'\n' {
                    self.row += 1;
                    self.continued = true;
                    continue
                }
                self.buf.extend_from_slice(&[ESCAPE, b'\r'])
            } else if self.pending_escape {
                self.pending_escape = false;
                match b {
                    b'\n' => {
                        self.row += 1;
                        self.continued = true
                    }
                    b'\r' => self.escaped_cr = true,
                    _ => self.buf.extend_from_slice(&[ESCAPE, b])
                }
                continue
            }

            match b {
                ESCAPE => self.pending_escape = true,
                b'\n' => {
                    if self.buf.last() == Some(&b'\r') {
                        _ = self.buf.pop()
                    }
                    lines.push(self.take_line());
                    self.row += 1
                }
                _ => self.buf.push(b)
            }
        } lines
    }

    /// Flushes the last, unterminated line, if any.
    pub fn finish(mut self) -> Option::<Line> {
        if mem::take(&mut self.escaped_cr) {
            self.buf.extend_from_slice(&[ESCAPE, b'\r'])
        }
        if mem::take(&mut self.pending_escape) {
            self.buf.push(ESCAPE)
        }
        self.start.map(|_| self.take_line())
    }
}

/// Decodes every escape left in `text`, scanning left to right:
/// `$\n` → nothing, `$$` → `$`, `$ ` → ` `, `$:` → `:`. Any other `$x` stays as is.
///
/// `$$:` therefore always becomes `$:`, the pair is consumed first.
pub fn decode_escapes(text: &str) -> String {
    if !text.contains('$') { return text.to_owned() }

    let mut ret = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            ret.push(c);
            continue
        }
        match chars.peek() {
            Some('\n') => { chars.next(); }
            Some(&e @ ('$' | ' ' | ':')) => {
                chars.next();
                ret.push(e)
            }
            _ => ret.push('$')
        }
    } ret
}

/// Escapes every `$` of a decoded path so it survives another expansion and decoding pass.
#[inline]
pub fn escape_dollars(text: &str) -> String {
    text.replace('$', "$$")
}

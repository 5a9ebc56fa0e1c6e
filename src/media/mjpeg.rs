//! Motion-JPEG frame splitting
//!
//! An MJPEG stream from the encoder is a plain concatenation of JPEG images.
//! The splitter walks JPEG marker segments rather than searching for the first
//! EOI, so thumbnails embedded in APPn segments do not cut a frame short.
//!
//! ```text
//! FFD8 | FFEx len ... | FFDB len ... | FFDA len <entropy data> | FFD9
//!  SOI    APPn (skipped by length)      SOS                      EOI
//! ```

use bytes::{Bytes, BytesMut};

const MARKER: u8 = 0xFF;
const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const TEM: u8 = 0x01;

/// Largest frame accepted before the buffer is discarded to resynchronise
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

enum Scan {
    /// Complete frame of this length
    Frame(usize),
    /// More data needed
    Incomplete,
    /// Not a valid JPEG at the buffer start
    Corrupt,
}

/// Incremental JPEG frame splitter
#[derive(Debug)]
pub struct JpegSplitter {
    buffer: BytesMut,
    max_frame_size: usize,
    discarded: u64,
}

impl JpegSplitter {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            max_frame_size,
            discarded: 0,
        }
    }

    /// Append raw bytes read from the stream
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes dropped while resynchronising
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Next complete JPEG image, SOI through EOI
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            if !self.align_to_soi() {
                return None;
            }

            match scan_frame(&self.buffer) {
                Scan::Frame(len) => return Some(self.buffer.split_to(len).freeze()),
                Scan::Incomplete => {
                    if self.buffer.len() > self.max_frame_size {
                        tracing::warn!(
                            buffered = self.buffer.len(),
                            "JPEG frame exceeds limit, resynchronising"
                        );
                        self.skip(2);
                        continue;
                    }
                    return None;
                }
                Scan::Corrupt => {
                    self.skip(2);
                }
            }
        }
    }

    fn skip(&mut self, n: usize) {
        let n = n.min(self.buffer.len());
        let _ = self.buffer.split_to(n);
        self.discarded += n as u64;
    }

    /// Drop bytes before the next SOI; false if none is buffered yet
    fn align_to_soi(&mut self) -> bool {
        match self.buffer.windows(2).position(|w| w == [MARKER, SOI]) {
            Some(0) => true,
            Some(pos) => {
                self.skip(pos);
                true
            }
            None => {
                // Keep a trailing 0xFF that may start the next SOI
                let keep = usize::from(self.buffer.last() == Some(&MARKER));
                let drop = self.buffer.len() - keep;
                self.skip(drop);
                false
            }
        }
    }
}

impl Default for JpegSplitter {
    fn default() -> Self {
        Self::new()
    }
}

fn segment_len(buf: &[u8], pos: usize) -> Option<usize> {
    if buf.len() < pos + 4 {
        return None;
    }
    Some(((buf[pos + 2] as usize) << 8) | buf[pos + 3] as usize)
}

fn scan_frame(buf: &[u8]) -> Scan {
    let mut pos = 2;

    loop {
        if buf.len() < pos + 2 {
            return Scan::Incomplete;
        }
        if buf[pos] != MARKER {
            return Scan::Corrupt;
        }
        // Fill bytes
        if buf[pos + 1] == MARKER {
            pos += 1;
            continue;
        }

        match buf[pos + 1] {
            EOI => return Scan::Frame(pos + 2),
            TEM | 0xD0..=0xD7 => pos += 2,
            SOI => return Scan::Corrupt,
            SOS => {
                let len = match segment_len(buf, pos) {
                    Some(len) if len >= 2 => len,
                    Some(_) => return Scan::Corrupt,
                    None => return Scan::Incomplete,
                };
                pos += 2 + len;
                match scan_entropy(buf, pos) {
                    Some(next) => pos = next,
                    None => return Scan::Incomplete,
                }
            }
            _ => {
                let len = match segment_len(buf, pos) {
                    Some(len) if len >= 2 => len,
                    Some(_) => return Scan::Corrupt,
                    None => return Scan::Incomplete,
                };
                pos += 2 + len;
            }
        }
    }
}

/// Position of the first real marker after entropy-coded data
fn scan_entropy(buf: &[u8], mut pos: usize) -> Option<usize> {
    while pos + 1 < buf.len() {
        if buf[pos] == MARKER {
            match buf[pos + 1] {
                MARKER => pos += 1,
                // Stuffed 0xFF and restart markers belong to the scan
                0x00 | 0xD0..=0xD7 => pos += 2,
                _ => return Some(pos),
            }
        } else {
            pos += 1;
        }
    }
    None
}

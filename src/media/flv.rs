//! FLV stream demuxing
//!
//! The encoder's live output is a plain FLV byte stream on stdout. The
//! demuxer cuts it into the file header and whole tags, keeping each tag's
//! exact wire bytes so they can be forwarded to players unchanged.
//!
//! FLV file layout:
//! ```text
//! +-----------+---------------+-------+---------------+-------+---
//! | Header(9) | PrevTagSize0  | Tag 1 | PrevTagSize 1 | Tag 2 | ...
//! +-----------+---------------+-------+---------------+-------+---
//! ```
//!
//! Tag layout:
//! ```text
//! +--------+-------------+-----------+-------------+---------+
//! | Type(1)| DataSize(3) | TS(3+1)   | StreamID(3) | Data(N) |
//! +--------+-------------+-----------+-------------+---------+
//! ```
//!
//! Video data starts with one byte holding the frame type (upper 4 bits) and
//! codec id (lower 4 bits); for AVC/HEVC the next byte is the packet type,
//! 0 meaning decoder configuration (sequence header).

use bytes::{Buf, Bytes, BytesMut};

/// Size of the FLV file header without the trailing previous-tag-size field
pub const FLV_HEADER_SIZE: usize = 9;

/// Size of a tag header
pub const TAG_HEADER_SIZE: usize = 11;

/// Size of a previous-tag-size field
pub const PREV_TAG_SIZE: usize = 4;

/// Largest tag body accepted before the stream is considered corrupt
pub const DEFAULT_MAX_TAG_SIZE: usize = 16 * 1024 * 1024;

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    Script,
}

impl FlvTagType {
    /// Decode the tag type byte, ignoring the filter/reserved bits
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            8 => Some(FlvTagType::Audio),
            9 => Some(FlvTagType::Video),
            18 => Some(FlvTagType::Script),
            _ => None,
        }
    }
}

/// AVC codec id
pub const CODEC_AVC: u8 = 7;

/// HEVC codec id, as written by ffmpeg's legacy FLV muxer
pub const CODEC_HEVC: u8 = 12;

/// The leading bytes of a video tag body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoTagHeader {
    /// Upper nibble of byte 0: 1 key, 2 inter, 3 disposable, 4 generated key, 5 command
    pub frame_type: u8,
    /// Lower nibble of byte 0
    pub codec_id: u8,
    /// AVC/HEVC packet type from byte 1; 0 is the decoder configuration record
    pub packet_type: Option<u8>,
}

impl VideoTagHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        let first = *data.first()?;
        let codec_id = first & 0x0F;
        let packet_type = match codec_id {
            CODEC_AVC | CODEC_HEVC => data.get(1).copied(),
            _ => None,
        };
        Some(Self {
            frame_type: (first >> 4) & 0x07,
            codec_id,
            packet_type,
        })
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self.frame_type, 1 | 4)
    }

    pub fn is_sequence_header(&self) -> bool {
        self.packet_type == Some(0)
    }
}

/// A demuxed tag
#[derive(Debug, Clone)]
pub struct FlvTag {
    pub tag_type: FlvTagType,
    /// Milliseconds, extended timestamp byte included
    pub timestamp: u32,
    /// Tag body without the tag header
    pub data: Bytes,
}

impl FlvTag {
    pub fn new(tag_type: FlvTagType, timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type,
            timestamp,
            data,
        }
    }

    pub fn video(timestamp: u32, data: Bytes) -> Self {
        Self::new(FlvTagType::Video, timestamp, data)
    }

    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self::new(FlvTagType::Audio, timestamp, data)
    }

    /// Parsed video header; `None` for non-video or empty tags
    pub fn video_header(&self) -> Option<VideoTagHeader> {
        match self.tag_type {
            FlvTagType::Video => VideoTagHeader::parse(&self.data),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        self.video_header().map_or(false, |h| h.is_keyframe())
    }

    /// Whether this is an AVC or HEVC decoder configuration record
    pub fn is_video_sequence_header(&self) -> bool {
        self.video_header().map_or(false, |h| h.is_sequence_header())
    }
}

/// Error while demuxing an FLV stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlvError {
    /// Stream does not start with `FLV`
    InvalidSignature,
    /// Header data offset is smaller than the header itself
    InvalidHeaderOffset(u32),
    /// Tag body exceeds the configured maximum
    TagTooLarge(usize),
}

impl std::fmt::Display for FlvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlvError::InvalidSignature => write!(f, "Invalid FLV signature"),
            FlvError::InvalidHeaderOffset(offset) => {
                write!(f, "Invalid FLV header offset: {}", offset)
            }
            FlvError::TagTooLarge(size) => write!(f, "FLV tag too large: {} bytes", size),
        }
    }
}

impl std::error::Error for FlvError {}

/// One demuxed element of an FLV stream
#[derive(Debug, Clone)]
pub enum FlvEvent {
    /// File header including PreviousTagSize0
    Header(Bytes),
    /// A complete tag
    Tag {
        tag: FlvTag,
        /// Tag header, body and trailing previous-tag-size
        wire: Bytes,
    },
}

/// Incremental FLV demuxer
///
/// Feed arbitrary chunks with [`push`](Self::push) and drain events with
/// [`next_event`](Self::next_event) until it yields `None`.
#[derive(Debug)]
pub struct FlvDemuxer {
    buffer: BytesMut,
    header_done: bool,
    max_tag_size: usize,
}

impl FlvDemuxer {
    pub fn new() -> Self {
        Self::with_max_tag_size(DEFAULT_MAX_TAG_SIZE)
    }

    pub fn with_max_tag_size(max_tag_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            header_done: false,
            max_tag_size,
        }
    }

    /// Append raw bytes read from the stream
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of bytes waiting for a complete element
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete header or tag
    pub fn next_event(&mut self) -> Result<Option<FlvEvent>, FlvError> {
        if !self.header_done {
            return self.read_header();
        }

        loop {
            if self.buffer.len() < TAG_HEADER_SIZE {
                return Ok(None);
            }

            let type_byte = self.buffer[0];
            let size = read_u24(&self.buffer[1..4]) as usize;
            if size > self.max_tag_size {
                return Err(FlvError::TagTooLarge(size));
            }

            let total = TAG_HEADER_SIZE + size + PREV_TAG_SIZE;
            if self.buffer.len() < total {
                return Ok(None);
            }

            let timestamp = read_u24(&self.buffer[4..7]) | ((self.buffer[7] as u32) << 24);
            let wire = self.buffer.split_to(total).freeze();

            let tag_type = match FlvTagType::from_byte(type_byte) {
                Some(t) => t,
                None => {
                    tracing::trace!(tag_type = type_byte, "Skipping unknown FLV tag");
                    continue;
                }
            };

            let data = wire.slice(TAG_HEADER_SIZE..TAG_HEADER_SIZE + size);
            return Ok(Some(FlvEvent::Tag {
                tag: FlvTag::new(tag_type, timestamp, data),
                wire,
            }));
        }
    }

    fn read_header(&mut self) -> Result<Option<FlvEvent>, FlvError> {
        if self.buffer.len() < FLV_HEADER_SIZE {
            return Ok(None);
        }
        if &self.buffer[0..3] != b"FLV" {
            return Err(FlvError::InvalidSignature);
        }

        let offset = (&self.buffer[5..9]).get_u32();
        if (offset as usize) < FLV_HEADER_SIZE {
            return Err(FlvError::InvalidHeaderOffset(offset));
        }

        let total = offset as usize + PREV_TAG_SIZE;
        if self.buffer.len() < total {
            return Ok(None);
        }

        self.header_done = true;
        Ok(Some(FlvEvent::Header(self.buffer.split_to(total).freeze())))
    }
}

impl Default for FlvDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

fn read_u24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn flv_header() -> Vec<u8> {
        vec![b'F', b'L', b'V', 1, 0x01, 0, 0, 0, 9, 0, 0, 0, 0]
    }

    pub(crate) fn flv_tag(tag_type: u8, timestamp: u32, body: &[u8]) -> Vec<u8> {
        let size = body.len() as u32;
        let mut out = vec![
            tag_type,
            (size >> 16) as u8,
            (size >> 8) as u8,
            size as u8,
            (timestamp >> 16) as u8,
            (timestamp >> 8) as u8,
            timestamp as u8,
            (timestamp >> 24) as u8,
            0,
            0,
            0,
        ];
        out.extend_from_slice(body);
        out.extend_from_slice(&(size + TAG_HEADER_SIZE as u32).to_be_bytes());
        out
    }

    fn drain(demuxer: &mut FlvDemuxer) -> Vec<FlvEvent> {
        let mut events = Vec::new();
        while let Some(event) = demuxer.next_event().unwrap() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_video_tag_header() {
        let key = VideoTagHeader::parse(&[0x17, 0x01]).unwrap();
        assert_eq!(key.frame_type, 1);
        assert_eq!(key.codec_id, CODEC_AVC);
        assert!(key.is_keyframe());
        assert!(!key.is_sequence_header());

        let inter = VideoTagHeader::parse(&[0x27, 0x01]).unwrap();
        assert!(!inter.is_keyframe());

        // Generated keyframes count, command frames do not
        assert!(VideoTagHeader::parse(&[0x47]).unwrap().is_keyframe());
        assert!(!VideoTagHeader::parse(&[0x57]).unwrap().is_keyframe());

        // VP6 has no packet type byte
        let vp6 = VideoTagHeader::parse(&[0x14, 0x00]).unwrap();
        assert_eq!(vp6.packet_type, None);
        assert!(VideoTagHeader::parse(&[]).is_none());
    }

    #[test]
    fn test_video_sequence_header() {
        let avc = FlvTag::video(0, Bytes::from_static(&[0x17, 0x00, 0x00, 0x00, 0x00]));
        assert!(avc.is_video_sequence_header());
        assert!(avc.is_keyframe());

        let hevc = FlvTag::video(0, Bytes::from_static(&[0x1C, 0x00]));
        assert!(hevc.is_video_sequence_header());

        let nalu = FlvTag::video(0, Bytes::from_static(&[0x17, 0x01, 0x00, 0x00, 0x00]));
        assert!(!nalu.is_video_sequence_header());

        // Audio bodies are never read as video headers
        let audio = FlvTag::audio(0, Bytes::from_static(&[0x17, 0x00]));
        assert!(audio.video_header().is_none());
        assert!(!audio.is_video_sequence_header());
        assert!(!audio.is_keyframe());
    }

    #[test]
    fn test_short_video_data() {
        let tag = FlvTag::video(0, Bytes::from_static(&[0x17]));
        assert!(tag.is_keyframe());
        assert!(!tag.is_video_sequence_header());

        let empty = FlvTag::video(0, Bytes::new());
        assert!(!empty.is_keyframe());
        assert!(empty.video_header().is_none());
    }

    #[test]
    fn test_demux_whole_stream() {
        let mut stream = flv_header();
        stream.extend(flv_tag(18, 0, b"\x02\x00\x0aonMetaData"));
        stream.extend(flv_tag(9, 0, &[0x17, 0x00, 0x00, 0x00, 0x00, 0x01]));
        stream.extend(flv_tag(9, 0, &[0x17, 0x01, 0x00, 0x00, 0x00, 0xAA]));
        stream.extend(flv_tag(9, 0x0100_0021, &[0x27, 0x01, 0x00, 0x00, 0x00, 0xBB]));

        let mut demuxer = FlvDemuxer::new();
        demuxer.push(&stream);
        let events = drain(&mut demuxer);

        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], FlvEvent::Header(ref h) if h.len() == 13));

        match &events[2] {
            FlvEvent::Tag { tag, wire } => {
                assert!(tag.is_video_sequence_header());
                assert_eq!(wire.len(), TAG_HEADER_SIZE + 6 + PREV_TAG_SIZE);
                assert_eq!(tag.data.as_ref(), &[0x17, 0x00, 0x00, 0x00, 0x00, 0x01]);
            }
            other => panic!("unexpected event {:?}", other),
        }

        match &events[4] {
            FlvEvent::Tag { tag, .. } => {
                assert_eq!(tag.timestamp, 0x0100_0021);
                assert!(!tag.is_keyframe());
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(demuxer.buffered(), 0);
    }

    #[test]
    fn test_demux_byte_by_byte() {
        let mut stream = flv_header();
        stream.extend(flv_tag(9, 40, &[0x17, 0x01, 0x00, 0x00, 0x00, 0xCC]));

        let mut demuxer = FlvDemuxer::new();
        let mut events = Vec::new();
        for byte in &stream {
            demuxer.push(std::slice::from_ref(byte));
            events.extend(drain(&mut demuxer));
        }

        assert_eq!(events.len(), 2);
        match &events[1] {
            FlvEvent::Tag { tag, .. } => {
                assert_eq!(tag.timestamp, 40);
                assert!(tag.is_keyframe());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_demux_skips_unknown_tag_types() {
        let mut stream = flv_header();
        stream.extend(flv_tag(0x0F, 0, &[1, 2, 3]));
        stream.extend(flv_tag(8, 0, &[0xAF, 0x01, 0x00]));

        let mut demuxer = FlvDemuxer::new();
        demuxer.push(&stream);
        let events = drain(&mut demuxer);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], FlvEvent::Tag { ref tag, .. } if tag.tag_type == FlvTagType::Audio));
    }

    #[test]
    fn test_demux_errors() {
        let mut demuxer = FlvDemuxer::new();
        demuxer.push(b"MP4\x01\x01\x00\x00\x00\x09\x00\x00\x00\x00");
        assert_eq!(demuxer.next_event().unwrap_err(), FlvError::InvalidSignature);

        let mut demuxer = FlvDemuxer::with_max_tag_size(4);
        demuxer.push(&flv_header());
        demuxer.push(&flv_tag(9, 0, &[0x17, 0x01, 0x00, 0x00, 0x00]));
        assert!(matches!(demuxer.next_event(), Ok(Some(FlvEvent::Header(_)))));
        assert_eq!(demuxer.next_event().unwrap_err(), FlvError::TagTooLarge(5));
    }
}

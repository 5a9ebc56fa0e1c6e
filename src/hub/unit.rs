//! Stream units broadcast to subscribers

use bytes::Bytes;

use crate::media::flv::{FlvTag, FlvTagType};

/// Role of a unit in the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Container header, sent once at stream start
    Header,
    /// Decoder configuration (e.g. AVC sequence header)
    VideoConfig,
    /// Media frame
    Frame,
}

/// A unit to be broadcast to subscribers
///
/// Cheap to clone: `data` is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamUnit {
    pub kind: UnitKind,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Wire bytes, forwarded to subscribers unchanged
    pub data: Bytes,
    /// Whether a decoder can start from this unit
    pub is_keyframe: bool,
}

impl StreamUnit {
    pub fn header(data: Bytes) -> Self {
        Self {
            kind: UnitKind::Header,
            timestamp: 0,
            data,
            is_keyframe: false,
        }
    }

    pub fn video_config(timestamp: u32, data: Bytes) -> Self {
        Self {
            kind: UnitKind::VideoConfig,
            timestamp,
            data,
            is_keyframe: false,
        }
    }

    pub fn frame(timestamp: u32, data: Bytes, is_keyframe: bool) -> Self {
        Self {
            kind: UnitKind::Frame,
            timestamp,
            data,
            is_keyframe,
        }
    }

    /// Classify a demuxed FLV tag; `wire` is the full tag as read
    pub fn from_flv_tag(tag: &FlvTag, wire: Bytes) -> Self {
        match tag.tag_type {
            FlvTagType::Video if tag.is_video_sequence_header() => {
                Self::video_config(tag.timestamp, wire)
            }
            FlvTagType::Video => Self::frame(tag.timestamp, wire, tag.is_keyframe()),
            FlvTagType::Audio | FlvTagType::Script => Self::frame(tag.timestamp, wire, false),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

//! Encoder output decoding
//!
//! This module provides:
//! - FLV demuxing of the low-latency binary stream
//! - JPEG frame splitting of motion-JPEG output

pub mod flv;
pub mod mjpeg;

pub use flv::{FlvDemuxer, FlvError, FlvEvent, FlvTag, FlvTagType, VideoTagHeader};
pub use mjpeg::JpegSplitter;

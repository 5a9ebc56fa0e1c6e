//! Encoder output pump
//!
//! Reads piped encoder output, cuts it into stream units and publishes them
//! to the source's hub. Reading never waits on subscribers.

use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::OutputMode;
use crate::hub::{StreamHub, StreamUnit};
use crate::media::{FlvDemuxer, FlvEvent, JpegSplitter};

/// Turns raw encoder output into stream units
pub(crate) enum OutputDecoder {
    Flv {
        demuxer: FlvDemuxer,
        failed: bool,
    },
    Jpeg {
        splitter: JpegSplitter,
        started: Instant,
    },
}

impl OutputDecoder {
    /// Decoder for a piped mode; `None` for file-based output
    pub fn for_mode(mode: OutputMode) -> Option<Self> {
        match mode {
            OutputMode::Flv => Some(OutputDecoder::Flv {
                demuxer: FlvDemuxer::new(),
                failed: false,
            }),
            OutputMode::Mjpeg | OutputMode::MjpegPassthrough => Some(OutputDecoder::Jpeg {
                splitter: JpegSplitter::new(),
                started: Instant::now(),
            }),
            OutputMode::Hls => None,
        }
    }

    /// Feed a chunk, returning the units it completed
    pub fn feed(&mut self, source_id: &str, chunk: &[u8]) -> Vec<StreamUnit> {
        let mut units = Vec::new();

        match self {
            OutputDecoder::Flv { demuxer, failed } => {
                if *failed {
                    return units;
                }
                demuxer.push(chunk);
                loop {
                    match demuxer.next_event() {
                        Ok(Some(FlvEvent::Header(header))) => units.push(StreamUnit::header(header)),
                        Ok(Some(FlvEvent::Tag { tag, wire })) => {
                            units.push(StreamUnit::from_flv_tag(&tag, wire))
                        }
                        Ok(None) => break,
                        Err(e) => {
                            // No resync point in FLV; drain the pipe without publishing
                            tracing::warn!(source = %source_id, error = %e, "FLV output unreadable");
                            *failed = true;
                            break;
                        }
                    }
                }
            }
            OutputDecoder::Jpeg { splitter, started } => {
                splitter.push(chunk);
                while let Some(frame) = splitter.next_frame() {
                    let timestamp = started.elapsed().as_millis() as u32;
                    units.push(StreamUnit::frame(timestamp, frame, true));
                }
            }
        }

        units
    }
}

/// Pump `reader` into `hub` until end of stream
pub(crate) async fn pump_output<R>(
    source_id: String,
    mut reader: R,
    mut decoder: OutputDecoder,
    hub: Arc<StreamHub>,
    chunk_size: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(chunk_size);
    let mut bytes_read: u64 = 0;
    let mut units: u64 = 0;

    loop {
        buffer.clear();
        match reader.read_buf(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                bytes_read += n as u64;
                for unit in decoder.feed(&source_id, &buffer) {
                    hub.publish(unit);
                    units += 1;
                }
            }
            Err(e) => {
                tracing::warn!(source = %source_id, error = %e, "Encoder output read failed");
                break;
            }
        }
    }

    tracing::debug!(
        source = %source_id,
        bytes = bytes_read,
        units = units,
        "Encoder output ended"
    );
}

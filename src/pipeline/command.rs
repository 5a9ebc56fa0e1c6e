//! Encoder command line construction
//!
//! ```text
//! ffmpeg -hide_banner -loglevel error -nostdin <input args> <encode args> <output args>
//! ```
//!
//! The orphan reconciler looks for a source's signature in foreign command
//! lines. Input options vary with the output mode, so the signature is only
//! `-i <locator>`, or the whole input override when one is configured. An
//! encoder left over from a run in another mode still matches.

use std::path::{Path, PathBuf};

use crate::config::{OutputMode, OutputState, Platform, SourceConfig, SourceKind};

use super::config::SupervisorConfig;

/// Where the encoder writes its output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Encoded stream on stdout, published to the source's hub
    Pipe,
    /// Segment files plus a playlist served by an external file server
    Hls { dir: PathBuf, playlist: PathBuf },
}

/// A fully resolved encoder invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Arguments identifying this source in a process table
    pub signature: Vec<String>,
    pub mode: OutputMode,
    pub output: OutputTarget,
}

impl EncoderCommand {
    /// Command line as a single display string
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Split an argument string on whitespace, honouring single and double quotes
pub fn split_args(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if in_token {
        args.push(current);
    }
    args
}

/// Per-source HLS directory name
///
/// Lowercase ASCII letters, digits and `-` pass through; every other byte is
/// written as `_xx` hex, so distinct ids never share a directory.
pub fn hls_dir_name(source_id: &str) -> String {
    let mut name = String::with_capacity(source_id.len());
    for b in source_id.to_ascii_lowercase().bytes() {
        if b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' {
            name.push(b as char);
        } else {
            name.push_str(&format!("_{:02x}", b));
        }
    }
    name
}

/// Input arguments for a source
pub fn input_args(platform: Platform, source: &SourceConfig, mode: OutputMode) -> Vec<String> {
    if let Some(ref input) = source.input_override {
        let args = split_args(input);
        if !args.is_empty() {
            return args;
        }
    }

    let locator = input_locator(platform, source);
    let mut args: Vec<String> = Vec::new();

    match source.kind {
        SourceKind::Device => {
            args.push("-f".into());
            args.push(platform.device_input_format().into());
            if mode == OutputMode::MjpegPassthrough && platform == Platform::Linux {
                args.push("-input_format".into());
                args.push("mjpeg".into());
            }
            args.push("-i".into());
            args.push(locator);
        }
        SourceKind::Rtsp => {
            args.extend(["-rtsp_transport".into(), "tcp".into(), "-i".into(), locator]);
        }
        SourceKind::Url => {
            args.extend(["-i".into(), locator]);
        }
        SourceKind::File => {
            args.extend(["-re".into(), "-i".into(), locator]);
        }
    }

    args
}

/// Value passed to `-i` for a source without an input override
fn input_locator(platform: Platform, source: &SourceConfig) -> String {
    match source.kind {
        SourceKind::Device if platform == Platform::Windows && !source.locator.starts_with("video=") => {
            format!("video={}", source.locator)
        }
        _ => source.locator.clone(),
    }
}

/// Arguments identifying a source's encoder in any output mode
pub fn source_signature(platform: Platform, source: &SourceConfig) -> Vec<String> {
    if let Some(ref input) = source.input_override {
        let args = split_args(input);
        if !args.is_empty() {
            return args;
        }
    }
    vec!["-i".into(), input_locator(platform, source)]
}

fn encode_args(profile_args: &str, output: &OutputState, mode: OutputMode) -> Vec<String> {
    match mode {
        OutputMode::Flv | OutputMode::Hls => {
            let mut args = split_args(profile_args);
            args.push("-an".into());
            args
        }
        OutputMode::Mjpeg => {
            let mut args: Vec<String> = vec![
                "-an".into(),
                "-c:v".into(),
                "mjpeg".into(),
                "-q:v".into(),
                "5".into(),
                "-r".into(),
                output.mjpeg_fps.max(1).to_string(),
            ];
            if !output.mjpeg_size.trim().is_empty() {
                args.push("-s".into());
                args.push(output.mjpeg_size.trim().to_string());
            }
            args
        }
        OutputMode::MjpegPassthrough => vec!["-an".into(), "-c:v".into(), "copy".into()],
    }
}

fn output_args(config: &SupervisorConfig, mode: OutputMode, dir: &Path) -> (Vec<String>, OutputTarget) {
    match mode {
        OutputMode::Flv => (
            vec![
                "-f".into(),
                "flv".into(),
                "-flvflags".into(),
                "no_duration_filesize".into(),
                "pipe:1".into(),
            ],
            OutputTarget::Pipe,
        ),
        OutputMode::Mjpeg | OutputMode::MjpegPassthrough => {
            (vec!["-f".into(), "mjpeg".into(), "pipe:1".into()], OutputTarget::Pipe)
        }
        OutputMode::Hls => {
            let playlist = dir.join("index.m3u8");
            (
                vec![
                    "-f".into(),
                    "hls".into(),
                    "-hls_time".into(),
                    config.hls_segment_secs.to_string(),
                    "-hls_list_size".into(),
                    config.hls_list_size.to_string(),
                    "-hls_flags".into(),
                    "delete_segments+omit_endlist".into(),
                    playlist.to_string_lossy().into_owned(),
                ],
                OutputTarget::Hls {
                    dir: dir.to_path_buf(),
                    playlist,
                },
            )
        }
    }
}

/// Build the encoder invocation for one source
///
/// MJPEG modes ignore the profile arguments: profiles describe H.264 encodes.
pub fn build_command(
    config: &SupervisorConfig,
    platform: Platform,
    source: &SourceConfig,
    profile_args: &str,
    output: &OutputState,
) -> EncoderCommand {
    let mode = output.mode();
    let input = input_args(platform, source, mode);
    let signature = source_signature(platform, source);
    let dir = config.hls_root.join(hls_dir_name(&source.id));
    let (out_args, target) = output_args(config, mode, &dir);

    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-nostdin".into(),
    ];
    args.extend(input);
    args.extend(encode_args(profile_args, output, mode));
    args.extend(out_args);

    EncoderCommand {
        program: config.encoder_path.clone(),
        args,
        signature,
        mode,
        output: target,
    }
}

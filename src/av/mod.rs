//! Core audio/video types and the media engine seams.
//!
//! The transcoding control plane never touches bitstreams itself. Everything
//! that demuxes, decodes, filters, encodes or muxes sits behind the traits in
//! this module, and a [`MediaEngine`] hands out the concrete implementations.
//!
//! Expected, frequent outcomes ("try again", "end of stream") travel as
//! [`Pull`] values; only structural failures are `Err`.

use crate::utils::Rational;
use crate::Result;
use std::fmt;

/// Outcome of a non-failing receive operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull<T> {
    /// An item is available
    Ready(T),
    /// Nothing available right now; retry later
    Again,
    /// The source is exhausted
    Eof,
}

impl<T> Pull<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Pull::Ready(_))
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, Pull::Eof)
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Pull::Ready(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Video,
    Audio,
    Subtitle,
    Data,
}

impl MediaType {
    pub fn name(self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Subtitle => "subtitle",
            MediaType::Data => "data",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Codec-level description of an elementary stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecParameters {
    pub media_type: MediaType,
    pub codec: String,
    pub format: i32,
    pub width: u32,
    pub height: u32,
    pub sample_aspect_ratio: Rational,
    pub sample_rate: u32,
    pub channels: u16,
    pub channel_layout: u64,
    /// Samples per audio frame, 0 when variable
    pub frame_size: usize,
    /// Number of frames of reordering delay (B-frames)
    pub video_delay: u32,
    pub frame_rate: Option<Rational>,
    pub extra_data: Option<Vec<u8>>,
}

impl CodecParameters {
    pub fn video(codec: &str, width: u32, height: u32) -> Self {
        Self {
            media_type: MediaType::Video,
            codec: codec.to_string(),
            format: 0,
            width,
            height,
            sample_aspect_ratio: Rational::new(0, 1),
            sample_rate: 0,
            channels: 0,
            channel_layout: 0,
            frame_size: 0,
            video_delay: 0,
            frame_rate: None,
            extra_data: None,
        }
    }

    pub fn audio(codec: &str, sample_rate: u32, channels: u16, frame_size: usize) -> Self {
        Self {
            media_type: MediaType::Audio,
            codec: codec.to_string(),
            format: 0,
            width: 0,
            height: 0,
            sample_aspect_ratio: Rational::new(0, 1),
            sample_rate,
            channels,
            channel_layout: 0,
            frame_size,
            video_delay: 0,
            frame_rate: None,
            extra_data: None,
        }
    }

    pub fn with_frame_rate(mut self, rate: Rational) -> Self {
        self.frame_rate = Some(rate);
        self
    }
}

/// One elementary stream as reported by a demuxer.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    pub time_base: Rational,
    pub params: CodecParameters,
    /// First timestamp of the stream in `time_base`
    pub start_time: Option<i64>,
    /// Width in bits of the container's timestamp counter
    pub pts_wrap_bits: u32,
    pub avg_frame_rate: Option<Rational>,
    /// Display rotation in degrees, clockwise
    pub rotation: f64,
}

impl StreamInfo {
    pub fn new(index: usize, time_base: Rational, params: CodecParameters) -> Self {
        Self {
            index,
            time_base,
            avg_frame_rate: params.frame_rate,
            params,
            start_time: None,
            pts_wrap_bits: 64,
            rotation: 0.0,
        }
    }

    pub fn with_wrap_bits(mut self, bits: u32) -> Self {
        self.pts_wrap_bits = bits;
        self
    }

    pub fn with_start_time(mut self, start_time: i64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_rotation(mut self, degrees: f64) -> Self {
        self.rotation = degrees;
        self
    }

    pub fn media_type(&self) -> MediaType {
        self.params.media_type
    }
}

/// Parameters negotiated on a filter graph endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointParams {
    pub media_type: MediaType,
    pub format: i32,
    pub width: u32,
    pub height: u32,
    pub sample_aspect_ratio: Rational,
    pub sample_rate: u32,
    pub channels: u16,
    pub channel_layout: u64,
    pub time_base: Rational,
    pub frame_rate: Option<Rational>,
}

impl EndpointParams {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            media_type: frame.media_type,
            format: frame.format,
            width: frame.width,
            height: frame.height,
            sample_aspect_ratio: frame.sample_aspect_ratio,
            sample_rate: frame.sample_rate,
            channels: frame.channels,
            channel_layout: frame.channel_layout,
            time_base: frame.time_base,
            frame_rate: None,
        }
    }

    pub fn from_stream(stream: &StreamInfo) -> Self {
        let p = &stream.params;
        Self {
            media_type: p.media_type,
            format: p.format,
            width: p.width,
            height: p.height,
            sample_aspect_ratio: p.sample_aspect_ratio,
            sample_rate: p.sample_rate,
            channels: p.channels,
            channel_layout: p.channel_layout,
            time_base: stream.time_base,
            frame_rate: stream.avg_frame_rate.or(p.frame_rate),
        }
    }

    /// True when `frame` would require the graph to be rebuilt.
    pub fn differs_from(&self, frame: &Frame) -> bool {
        if self.format != frame.format {
            return true;
        }
        match self.media_type {
            MediaType::Video => {
                self.width != frame.width
                    || self.height != frame.height
                    || (frame.sample_aspect_ratio.num != 0
                        && self.sample_aspect_ratio != frame.sample_aspect_ratio)
            }
            MediaType::Audio => {
                self.sample_rate != frame.sample_rate
                    || self.channels != frame.channels
                    || self.channel_layout != frame.channel_layout
            }
            _ => false,
        }
    }
}

/// An open pad found while parsing a filter graph description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PadInfo {
    pub label: Option<String>,
    pub media_type: Option<MediaType>,
}

/// Open input and output pads of a parsed graph description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphPads {
    pub inputs: Vec<PadInfo>,
    pub outputs: Vec<PadInfo>,
}

/// One filter inserted between an endpoint and the user graph.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub name: String,
    pub args: Option<String>,
}

impl FilterSpec {
    pub fn new(name: &str, args: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            args,
        }
    }
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.args {
            Some(args) => write!(f, "{}={}", self.name, args),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputEndpoint {
    pub name: String,
    pub label: Option<String>,
    pub params: EndpointParams,
    /// Adaptation filters applied after the source, in order
    pub chain: Vec<FilterSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputEndpoint {
    pub name: String,
    pub label: Option<String>,
    pub media_type: MediaType,
    /// Adaptation filters applied before the sink, in order
    pub chain: Vec<FilterSpec>,
}

/// Everything the filter engine needs to instantiate a graph.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphSpec {
    pub description: String,
    pub inputs: Vec<InputEndpoint>,
    pub outputs: Vec<OutputEndpoint>,
}

/// Container-level traits of a muxer that influence timing decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuxerCaps {
    pub format_name: String,
    /// Frame rate may vary between packets
    pub variable_fps: bool,
    /// Container does not store timestamps at all
    pub no_timestamps: bool,
    /// DTS must strictly increase (equal values rejected)
    pub strict_timestamps: bool,
}

/// A stream announced to the muxer at header time.
#[derive(Debug, Clone)]
pub struct MuxStream {
    pub index: usize,
    pub params: CodecParameters,
    /// Time base the packets are currently expressed in
    pub time_base: Rational,
}

/// Encoder configuration resolved from the filter graph output.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSetup {
    pub media_type: MediaType,
    pub time_base: Rational,
    pub format: i32,
    pub width: u32,
    pub height: u32,
    pub sample_aspect_ratio: Rational,
    pub sample_rate: u32,
    pub channels: u16,
    pub channel_layout: u64,
    pub frame_rate: Option<Rational>,
}

/// Source of compressed packets for one input.
pub trait Demuxer: Send {
    fn streams(&self) -> &[StreamInfo];

    /// Reads the next packet. `Pull::Again` means "not ready yet".
    fn read_packet(&mut self) -> Result<Pull<Packet>>;

    /// Seeks every stream to `timestamp` (engine time base).
    fn seek(&mut self, timestamp: i64) -> Result<()>;

    /// Container start time in the engine time base.
    fn start_time(&self) -> Option<i64> {
        None
    }

    /// True for formats whose timestamps may jump (e.g. MPEG-TS).
    fn ts_discontinuous(&self) -> bool {
        false
    }
}

pub trait Decoder: Send {
    /// Submits a packet, or `None` to start draining.
    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<()>;
    fn receive_frame(&mut self) -> Result<Pull<Frame>>;
    /// Drops internal state so decoding can restart after a seek.
    fn flush(&mut self);
}

pub trait Encoder: Send {
    /// Submits a frame, or `None` to start draining.
    fn send_frame(&mut self, frame: Option<&Frame>) -> Result<()>;
    fn receive_packet(&mut self) -> Result<Pull<Packet>>;
    /// Codec parameters announced to the muxer.
    fn parameters(&self) -> CodecParameters;
    /// Fixed number of samples per audio frame, 0 when variable.
    fn frame_size(&self) -> usize {
        0
    }
    /// True when the encoder may hold back frames (and sets its own pts).
    fn has_delay(&self) -> bool {
        false
    }
}

pub trait BitstreamFilter: Send {
    /// Submits a packet, or `None` to signal end of stream.
    fn send_packet(&mut self, packet: Option<Packet>) -> Result<()>;
    fn receive_packet(&mut self) -> Result<Pull<Packet>>;
}

pub trait Muxer: Send {
    fn capabilities(&self) -> MuxerCaps;

    /// Writes the container header. Returns the time base the muxer selected
    /// for each stream, in the order given.
    fn write_header(&mut self, streams: &[MuxStream]) -> Result<Vec<Rational>>;

    fn write_packet(&mut self, packet: &Packet) -> Result<()>;

    fn write_trailer(&mut self) -> Result<()>;
}

/// An instantiated, validated filter graph.
pub trait FilterGraphHandle: Send {
    fn push(&mut self, input: usize, frame: Frame) -> Result<()>;

    /// Marks an input as finished at `pts` (input time base).
    fn close(&mut self, input: usize, pts: Option<i64>) -> Result<()>;

    /// Pulls an already-buffered frame from an output without requesting more.
    fn pull(&mut self, output: usize) -> Result<Pull<Frame>>;

    /// Asks the sink that has waited longest to produce a frame.
    fn request_oldest(&mut self) -> Result<Pull<()>>;

    /// Number of times an input was asked for data it did not have.
    fn failed_requests(&self, input: usize) -> u32;

    fn output_params(&self, output: usize) -> EndpointParams;

    /// Forces audio frames on `output` to `samples` per frame.
    fn set_output_frame_size(&mut self, _output: usize, _samples: usize) {}
}

pub trait FilterEngine: Send {
    /// Lists the open pads of a textual graph description.
    fn parse(&self, description: &str) -> Result<GraphPads>;

    /// Builds, validates and activates a graph.
    fn build(&mut self, spec: &GraphSpec) -> Result<Box<dyn FilterGraphHandle>>;
}

/// Factory for every external media component.
pub trait MediaEngine: Send {
    fn open_input(&mut self, url: &str) -> Result<Box<dyn Demuxer>>;

    fn open_output(&mut self, url: &str, format: Option<&str>) -> Result<Box<dyn Muxer>>;

    /// `Ok(None)` when no decoder exists for the stream's codec.
    fn open_decoder(&mut self, stream: &StreamInfo) -> Result<Option<Box<dyn Decoder>>>;

    fn has_encoder(&self, codec: &str) -> bool;

    /// `Ok(None)` when no encoder named `codec` exists.
    fn open_encoder(&mut self, codec: &str, setup: &EncoderSetup) -> Result<Option<Box<dyn Encoder>>>;

    fn open_bitstream_filter(
        &mut self,
        name: &str,
        params: &CodecParameters,
    ) -> Result<Box<dyn BitstreamFilter>>;

    fn filters(&mut self) -> &mut dyn FilterEngine;
}

mod frame;
mod packet;
pub use frame::*;
pub use packet::*;

pub mod mock;
pub mod transcode;

//! In-memory media engine.
//!
//! Demuxers replay scripted packets, codecs map packets to frames one to
//! one, and muxers record everything they receive into a shared
//! [`MuxRecorder`]. Used by the test suites and handy for dry runs of a job
//! layout without touching real media.

use super::{
    BitstreamFilter, CodecParameters, Decoder, Demuxer, Encoder, EncoderSetup, EndpointParams,
    FilterEngine, FilterGraphHandle, Frame, GraphPads, GraphSpec, MediaEngine, MediaType, MuxStream,
    Muxer, MuxerCaps, Packet, PadInfo, Pull, StreamInfo,
};
use crate::error::{Result, TranscodeError};
use crate::utils::{rescale_q, Rational, TIME_BASE_Q};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::Arc;

/// Everything a mock muxer was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum MuxEvent {
    /// Header written; time bases chosen for each stream
    Header(Vec<Rational>),
    Packet(Packet),
    Trailer,
}

/// Shared log of muxer activity, keyed by output url.
#[derive(Debug, Clone, Default)]
pub struct MuxRecorder {
    events: Arc<Mutex<HashMap<String, Vec<MuxEvent>>>>,
}

impl MuxRecorder {
    fn record(&self, url: &str, event: MuxEvent) {
        self.events
            .lock()
            .entry(url.to_string())
            .or_default()
            .push(event);
    }

    pub fn events(&self, url: &str) -> Vec<MuxEvent> {
        self.events.lock().get(url).cloned().unwrap_or_default()
    }

    /// Packets written to `url`, in write order.
    pub fn packets(&self, url: &str) -> Vec<Packet> {
        self.events(url)
            .into_iter()
            .filter_map(|event| match event {
                MuxEvent::Packet(pkt) => Some(pkt),
                _ => None,
            })
            .collect()
    }

    pub fn header_count(&self, url: &str) -> usize {
        self.events(url)
            .iter()
            .filter(|event| matches!(event, MuxEvent::Header(_)))
            .count()
    }

    pub fn has_trailer(&self, url: &str) -> bool {
        self.events(url).contains(&MuxEvent::Trailer)
    }
}

/// Scripted content of an input file.
#[derive(Debug, Clone, Default)]
pub struct MockSource {
    streams: Vec<StreamInfo>,
    packets: Vec<Packet>,
    start_time: Option<i64>,
    ts_discontinuous: bool,
    error_at: Option<usize>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream(mut self, stream: StreamInfo) -> Self {
        self.streams.push(stream);
        self
    }

    pub fn with_packet(mut self, packet: Packet) -> Self {
        self.packets.push(packet);
        self
    }

    /// Adds a video stream with `count` key frames, one per frame period.
    pub fn with_video_stream(mut self, time_base: Rational, rate: Rational, count: usize) -> Self {
        let index = self.streams.len();
        let params = CodecParameters::video("rawvideo", 64, 48).with_frame_rate(rate);
        self.streams.push(StreamInfo::new(index, time_base, params));
        let step = rescale_q(1, rate.invert(), time_base).max(1);
        for i in 0..count as i64 {
            self.packets.push(
                Packet::new(vec![0u8; 32])
                    .with_pts(i * step)
                    .with_dts(i * step)
                    .with_duration(step)
                    .with_key_flag(true)
                    .with_stream_index(index)
                    .with_time_base(time_base),
            );
        }
        self
    }

    /// Adds an audio stream with `count` packets of `frame_size` samples.
    pub fn with_audio_stream(mut self, sample_rate: u32, frame_size: usize, count: usize) -> Self {
        let index = self.streams.len();
        let time_base = Rational::new(1, sample_rate as i32);
        let params = CodecParameters::audio("pcm_s16le", sample_rate, 2, frame_size);
        self.streams.push(StreamInfo::new(index, time_base, params));
        let step = frame_size as i64;
        for i in 0..count as i64 {
            self.packets.push(
                Packet::new(vec![0u8; 16])
                    .with_pts(i * step)
                    .with_dts(i * step)
                    .with_duration(step)
                    .with_key_flag(true)
                    .with_stream_index(index)
                    .with_time_base(time_base),
            );
        }
        self
    }

    pub fn with_start_time(mut self, start_time: i64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_discontinuous_timestamps(mut self) -> Self {
        self.ts_discontinuous = true;
        self
    }

    /// Fails the read of packet number `index` once.
    pub fn with_read_error_at(mut self, index: usize) -> Self {
        self.error_at = Some(index);
        self
    }

    fn demuxer(&self) -> MockDemuxer {
        let mut packets = self.packets.clone();
        let streams = &self.streams;
        // interleave by decode time like a real container would
        packets.sort_by_key(|pkt| {
            let tb = streams
                .get(pkt.stream_index)
                .map_or(pkt.time_base, |st| st.time_base);
            pkt.dts.map_or(i64::MIN, |dts| rescale_q(dts, tb, TIME_BASE_Q))
        });
        MockDemuxer {
            streams: self.streams.clone(),
            packets,
            position: 0,
            start_time: self.start_time,
            ts_discontinuous: self.ts_discontinuous,
            error_at: self.error_at,
        }
    }
}

pub struct MockDemuxer {
    streams: Vec<StreamInfo>,
    packets: Vec<Packet>,
    position: usize,
    start_time: Option<i64>,
    ts_discontinuous: bool,
    error_at: Option<usize>,
}

impl Demuxer for MockDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Pull<Packet>> {
        if self.error_at == Some(self.position) {
            self.error_at = None;
            return Err(TranscodeError::InvalidData("scripted read failure".into()));
        }
        match self.packets.get(self.position) {
            Some(pkt) => {
                self.position += 1;
                Ok(Pull::Ready(pkt.clone()))
            }
            None => Ok(Pull::Eof),
        }
    }

    fn seek(&mut self, _timestamp: i64) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn start_time(&self) -> Option<i64> {
        self.start_time
    }

    fn ts_discontinuous(&self) -> bool {
        self.ts_discontinuous
    }
}

/// Produces one frame per packet, carrying the packet timestamps.
pub struct MockDecoder {
    params: CodecParameters,
    time_base: Rational,
    pending: VecDeque<Frame>,
    draining: bool,
}

impl Decoder for MockDecoder {
    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<()> {
        let pkt = match packet {
            Some(pkt) => pkt,
            None => {
                self.draining = true;
                return Ok(());
            }
        };
        if pkt.corrupt {
            return Err(TranscodeError::InvalidData("undecodable packet".into()));
        }
        let p = &self.params;
        let mut frame = match p.media_type {
            MediaType::Audio => {
                let samples = if p.frame_size > 0 { p.frame_size } else { 1024 };
                Frame::audio(p.sample_rate, p.channels, p.format, samples)
            }
            _ => Frame::video(p.width, p.height, p.format),
        };
        frame.pts = pkt.pts;
        frame.duration = pkt.duration;
        frame.time_base = self.time_base;
        frame.data = pkt.data.clone();
        self.pending.push_back(frame);
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Pull<Frame>> {
        match self.pending.pop_front() {
            Some(frame) => Ok(Pull::Ready(frame)),
            None if self.draining => Ok(Pull::Eof),
            None => Ok(Pull::Again),
        }
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.draining = false;
    }
}

/// Produces one key packet per frame with `pts == dts == frame.pts`.
pub struct MockEncoder {
    codec: String,
    setup: EncoderSetup,
    frame_size: usize,
    pending: VecDeque<Packet>,
    draining: bool,
}

impl Encoder for MockEncoder {
    fn send_frame(&mut self, frame: Option<&Frame>) -> Result<()> {
        let frame = match frame {
            Some(frame) => frame,
            None => {
                self.draining = true;
                return Ok(());
            }
        };
        let mut pkt = Packet::new(vec![0u8; 8])
            .with_key_flag(true)
            .with_time_base(self.setup.time_base);
        pkt.pts = frame.pts;
        pkt.dts = frame.pts;
        pkt.duration = match frame.media_type {
            MediaType::Audio => frame.nb_samples as i64,
            _ => 1,
        };
        self.pending.push_back(pkt);
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Pull<Packet>> {
        match self.pending.pop_front() {
            Some(pkt) => Ok(Pull::Ready(pkt)),
            None if self.draining => Ok(Pull::Eof),
            None => Ok(Pull::Again),
        }
    }

    fn parameters(&self) -> CodecParameters {
        let s = &self.setup;
        let mut params = match s.media_type {
            MediaType::Audio => CodecParameters::audio(&self.codec, s.sample_rate, s.channels, self.frame_size),
            _ => CodecParameters::video(&self.codec, s.width, s.height),
        };
        params.format = s.format;
        params.sample_aspect_ratio = s.sample_aspect_ratio;
        params.channel_layout = s.channel_layout;
        params.frame_rate = s.frame_rate;
        params
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }
}

/// Bitstream filter that forwards packets untouched.
#[derive(Default)]
pub struct PassthroughFilter {
    pending: VecDeque<Packet>,
    eof: bool,
}

impl BitstreamFilter for PassthroughFilter {
    fn send_packet(&mut self, packet: Option<Packet>) -> Result<()> {
        match packet {
            Some(pkt) => self.pending.push_back(pkt),
            None => self.eof = true,
        }
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Pull<Packet>> {
        match self.pending.pop_front() {
            Some(pkt) => Ok(Pull::Ready(pkt)),
            None if self.eof => Ok(Pull::Eof),
            None => Ok(Pull::Again),
        }
    }
}

pub struct MockMuxer {
    url: String,
    caps: MuxerCaps,
    recorder: MuxRecorder,
}

impl Muxer for MockMuxer {
    fn capabilities(&self) -> MuxerCaps {
        self.caps.clone()
    }

    fn write_header(&mut self, streams: &[MuxStream]) -> Result<Vec<Rational>> {
        let time_bases: Vec<Rational> = streams.iter().map(|st| st.time_base).collect();
        self.recorder
            .record(&self.url, MuxEvent::Header(time_bases.clone()));
        Ok(time_bases)
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.recorder.record(&self.url, MuxEvent::Packet(packet.clone()));
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.recorder.record(&self.url, MuxEvent::Trailer);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GraphMode {
    /// Every input frame goes to every output
    Broadcast,
    /// One output frame per complete set of input frames; ends with the
    /// shortest input
    Mix,
}

struct GraphInput {
    queue: VecDeque<Frame>,
    closed: bool,
    failed: u32,
}

struct GraphOutput {
    queue: VecDeque<Frame>,
    ended: bool,
    params: EndpointParams,
}

/// A running mock graph.
pub struct MockGraph {
    mode: GraphMode,
    inputs: Vec<GraphInput>,
    outputs: Vec<GraphOutput>,
}

impl MockGraph {
    fn run(&mut self) {
        match self.mode {
            GraphMode::Broadcast => {
                if let Some(input) = self.inputs.first_mut() {
                    while let Some(frame) = input.queue.pop_front() {
                        for output in &mut self.outputs {
                            output.queue.push_back(frame.clone());
                        }
                    }
                    if input.closed {
                        for output in &mut self.outputs {
                            output.ended = true;
                        }
                    }
                }
            }
            GraphMode::Mix => {
                while self.inputs.iter().all(|input| !input.queue.is_empty()) {
                    let mut first = None;
                    for input in &mut self.inputs {
                        let frame = input.queue.pop_front();
                        if first.is_none() {
                            first = frame;
                        }
                    }
                    if let (Some(frame), Some(output)) = (first, self.outputs.first_mut()) {
                        output.queue.push_back(frame);
                    }
                }
                if self
                    .inputs
                    .iter()
                    .any(|input| input.closed && input.queue.is_empty())
                {
                    for output in &mut self.outputs {
                        output.ended = true;
                    }
                }
            }
        }
    }
}

impl FilterGraphHandle for MockGraph {
    fn push(&mut self, input: usize, frame: Frame) -> Result<()> {
        let slot = self
            .inputs
            .get_mut(input)
            .ok_or_else(|| TranscodeError::Filter(format!("no input pad {}", input)))?;
        if slot.closed {
            return Err(TranscodeError::Filter(format!("input pad {} already closed", input)));
        }
        slot.queue.push_back(frame);
        slot.failed = 0;
        self.run();
        Ok(())
    }

    fn close(&mut self, input: usize, _pts: Option<i64>) -> Result<()> {
        let slot = self
            .inputs
            .get_mut(input)
            .ok_or_else(|| TranscodeError::Filter(format!("no input pad {}", input)))?;
        slot.closed = true;
        self.run();
        Ok(())
    }

    fn pull(&mut self, output: usize) -> Result<Pull<Frame>> {
        let slot = self
            .outputs
            .get_mut(output)
            .ok_or_else(|| TranscodeError::Filter(format!("no output pad {}", output)))?;
        Ok(match slot.queue.pop_front() {
            Some(frame) => Pull::Ready(frame),
            None if slot.ended => Pull::Eof,
            None => Pull::Again,
        })
    }

    fn request_oldest(&mut self) -> Result<Pull<()>> {
        if self.outputs.iter().any(|output| !output.queue.is_empty()) {
            return Ok(Pull::Ready(()));
        }
        if self.outputs.iter().all(|output| output.ended) {
            return Ok(Pull::Eof);
        }
        for input in &mut self.inputs {
            if !input.closed && input.queue.is_empty() {
                input.failed += 1;
            }
        }
        Ok(Pull::Again)
    }

    fn failed_requests(&self, input: usize) -> u32 {
        self.inputs.get(input).map_or(0, |input| input.failed)
    }

    fn output_params(&self, output: usize) -> EndpointParams {
        self.outputs[output].params.clone()
    }
}

/// Parses `[in]name=args[out]` descriptions and builds [`MockGraph`]s.
///
/// Filters whose name starts with `a` are audio filters. `split` fans out
/// to `args` outputs (default 2); any graph with several inputs mixes them.
#[derive(Debug, Clone, Default)]
pub struct MockFilterEngine {
    built: Arc<Mutex<Vec<GraphSpec>>>,
}

impl MockFilterEngine {
    /// Specs of every graph built so far.
    pub fn built(&self) -> Vec<GraphSpec> {
        self.built.lock().clone()
    }
}

fn split_labels(description: &str) -> Result<(Vec<String>, &str, Vec<String>)> {
    let mut rest = description.trim();
    let mut inputs = Vec::new();
    while let Some(stripped) = rest.strip_prefix('[') {
        let end = stripped
            .find(']')
            .ok_or_else(|| TranscodeError::Filter(format!("unterminated label in '{}'", description)))?;
        inputs.push(stripped[..end].to_string());
        rest = stripped[end + 1..].trim_start();
    }
    let mut outputs = Vec::new();
    while rest.ends_with(']') {
        let start = rest
            .rfind('[')
            .ok_or_else(|| TranscodeError::Filter(format!("unterminated label in '{}'", description)))?;
        outputs.insert(0, rest[start + 1..rest.len() - 1].to_string());
        rest = rest[..start].trim_end();
    }
    Ok((inputs, rest, outputs))
}

fn filter_media_type(body: &str) -> MediaType {
    if body.starts_with('a') {
        MediaType::Audio
    } else {
        MediaType::Video
    }
}

impl FilterEngine for MockFilterEngine {
    fn parse(&self, description: &str) -> Result<GraphPads> {
        let (inputs, body, outputs) = split_labels(description)?;
        if body.is_empty() {
            return Err(TranscodeError::Filter(format!(
                "no filter in graph description '{}'",
                description
            )));
        }
        let media_type = Some(filter_media_type(body));
        let (name, args) = match body.split_once('=') {
            Some((name, args)) => (name, Some(args)),
            None => (body, None),
        };

        let mut pads = GraphPads::default();
        if inputs.is_empty() {
            pads.inputs.push(PadInfo { label: None, media_type });
        }
        for label in inputs {
            pads.inputs.push(PadInfo {
                label: Some(label),
                media_type,
            });
        }
        if outputs.is_empty() {
            let count = if name == "split" || name == "asplit" {
                args.and_then(|a| a.parse().ok()).unwrap_or(2)
            } else {
                1
            };
            for _ in 0..count {
                pads.outputs.push(PadInfo { label: None, media_type });
            }
        }
        for label in outputs {
            pads.outputs.push(PadInfo {
                label: Some(label),
                media_type,
            });
        }
        Ok(pads)
    }

    fn build(&mut self, spec: &GraphSpec) -> Result<Box<dyn FilterGraphHandle>> {
        let first = spec
            .inputs
            .first()
            .ok_or_else(|| TranscodeError::Filter("graph without inputs".into()))?;
        let mode = if spec.inputs.len() > 1 {
            GraphMode::Mix
        } else {
            GraphMode::Broadcast
        };
        let inputs = spec
            .inputs
            .iter()
            .map(|_| GraphInput {
                queue: VecDeque::new(),
                closed: false,
                failed: 0,
            })
            .collect();
        let outputs = spec
            .outputs
            .iter()
            .map(|_| GraphOutput {
                queue: VecDeque::new(),
                ended: false,
                params: first.params.clone(),
            })
            .collect();
        self.built.lock().push(spec.clone());
        Ok(Box::new(MockGraph {
            mode,
            inputs,
            outputs,
        }))
    }
}

/// A [`MediaEngine`] serving scripted inputs and recording outputs.
#[derive(Default)]
pub struct MockEngine {
    sources: HashMap<String, MockSource>,
    caps: HashMap<String, MuxerCaps>,
    missing_codecs: HashSet<String>,
    audio_frame_size: usize,
    recorder: MuxRecorder,
    filters: MockFilterEngine,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, url: &str, source: MockSource) -> Self {
        self.sources.insert(url.to_string(), source);
        self
    }

    pub fn with_muxer_caps(mut self, url: &str, caps: MuxerCaps) -> Self {
        self.caps.insert(url.to_string(), caps);
        self
    }

    /// Makes both decoding and encoding of `codec` unavailable.
    pub fn without_codec(mut self, codec: &str) -> Self {
        self.missing_codecs.insert(codec.to_string());
        self
    }

    /// Fixed frame size reported by audio encoders.
    pub fn with_audio_frame_size(mut self, samples: usize) -> Self {
        self.audio_frame_size = samples;
        self
    }

    pub fn recorder(&self) -> MuxRecorder {
        self.recorder.clone()
    }

    pub fn filter_log(&self) -> MockFilterEngine {
        self.filters.clone()
    }
}

impl MediaEngine for MockEngine {
    fn open_input(&mut self, url: &str) -> Result<Box<dyn Demuxer>> {
        let source = self.sources.get(url).ok_or_else(|| {
            TranscodeError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: no such file", url),
            ))
        })?;
        Ok(Box::new(source.demuxer()))
    }

    fn open_output(&mut self, url: &str, format: Option<&str>) -> Result<Box<dyn Muxer>> {
        let mut caps = self.caps.get(url).cloned().unwrap_or_default();
        if let Some(format) = format {
            caps.format_name = format.to_string();
        }
        Ok(Box::new(MockMuxer {
            url: url.to_string(),
            caps,
            recorder: self.recorder.clone(),
        }))
    }

    fn open_decoder(&mut self, stream: &StreamInfo) -> Result<Option<Box<dyn Decoder>>> {
        if self.missing_codecs.contains(&stream.params.codec) {
            return Ok(None);
        }
        Ok(Some(Box::new(MockDecoder {
            params: stream.params.clone(),
            time_base: stream.time_base,
            pending: VecDeque::new(),
            draining: false,
        })))
    }

    fn has_encoder(&self, codec: &str) -> bool {
        !self.missing_codecs.contains(codec)
    }

    fn open_encoder(&mut self, codec: &str, setup: &EncoderSetup) -> Result<Option<Box<dyn Encoder>>> {
        if !self.has_encoder(codec) {
            return Ok(None);
        }
        let frame_size = match setup.media_type {
            MediaType::Audio => self.audio_frame_size,
            _ => 0,
        };
        Ok(Some(Box::new(MockEncoder {
            codec: codec.to_string(),
            setup: setup.clone(),
            frame_size,
            pending: VecDeque::new(),
            draining: false,
        })))
    }

    fn open_bitstream_filter(
        &mut self,
        _name: &str,
        _params: &CodecParameters,
    ) -> Result<Box<dyn BitstreamFilter>> {
        Ok(Box::new(PassthroughFilter::default()))
    }

    fn filters(&mut self) -> &mut dyn FilterEngine {
        &mut self.filters
    }
}

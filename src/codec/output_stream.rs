use super::vsync::{VsyncMethod, VsyncParams, VsyncState};
use super::{InputStream, PadRef, StreamRef};
use crate::av::transcode::TranscodeStats;
use crate::av::{
    BitstreamFilter, CodecParameters, Encoder, EncoderSetup, Frame, MediaEngine, MediaType, Packet,
    Pull,
};
use crate::config::{OutputStreamConfig, StreamCodec, TranscodeOptions};
use crate::error::{Result, TranscodeError};
use crate::format::{InputTimeline, MuxContext};
use crate::utils::{compare_ts, rescale_q, Rational, TIME_BASE_Q};
use std::cmp::Ordering;
use std::collections::VecDeque;

/// Initial number of packets the pre-header queue holds before growing.
const MUXING_QUEUE_INITIAL: usize = 8;

/// Where an output stream's data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSource {
    /// Packets of an input stream, copied as-is
    Copy(StreamRef),
    /// Frames pulled from a filter graph output
    Filter(PadRef),
}

/// The two halves of a stream's shutdown.
///
/// `encoder` means no more frames will be submitted, `muxer` means no more
/// packets will be written. A stream is done once either is set and fully
/// finished when both are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinishState {
    pub encoder: bool,
    pub muxer: bool,
}

impl FinishState {
    pub fn any(self) -> bool {
        self.encoder || self.muxer
    }

    pub fn all(self) -> bool {
        self.encoder && self.muxer
    }
}

/// Bounded FIFO holding packets produced before the container header exists.
///
/// Capacity doubles on demand. Once the buffered bytes exceed the data
/// threshold, growth stops at `max_packets`.
#[derive(Debug)]
pub struct MuxingQueue {
    packets: VecDeque<Packet>,
    capacity: usize,
    data_size: usize,
    max_packets: usize,
    data_threshold: usize,
}

impl MuxingQueue {
    pub fn new(max_packets: usize, data_threshold: usize) -> Self {
        Self {
            packets: VecDeque::new(),
            capacity: MUXING_QUEUE_INITIAL,
            data_size: 0,
            max_packets,
            data_threshold,
        }
    }

    /// Buffers a packet; `false` when the queue cannot grow any further.
    pub fn push(&mut self, pkt: Packet) -> bool {
        if self.packets.len() >= self.capacity {
            let over_size = self.data_size + pkt.size() > self.data_threshold;
            let new_capacity = if over_size {
                (2 * self.capacity).min(self.max_packets)
            } else {
                2 * self.capacity
            };
            if new_capacity <= self.capacity {
                return false;
            }
            self.capacity = new_capacity;
        }
        self.data_size += pkt.size();
        self.packets.push_back(pkt);
        true
    }

    pub fn pop(&mut self) -> Option<Packet> {
        let pkt = self.packets.pop_front()?;
        self.data_size -= pkt.size();
        Some(pkt)
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// Encode, stream-copy and mux state of one output elementary stream.
pub struct OutputStream {
    pub file_index: usize,
    pub index: usize,
    pub media_type: MediaType,
    pub source: OutputSource,
    /// The single input stream feeding this output, if any
    pub source_stream: Option<StreamRef>,
    pub stream_copy: bool,
    pub encoder_name: Option<String>,
    pub encoder: Option<Box<dyn Encoder>>,
    /// Codec parameters announced to the muxer
    pub params: Option<CodecParameters>,
    pub enc_time_base: Rational,
    /// Time base packets are expressed in on their way to the muxer
    pub mux_time_base: Rational,
    /// Time base the muxer selected for the stream
    pub st_time_base: Rational,
    pub frame_rate: Option<Rational>,
    pub vsync_override: Option<VsyncMethod>,
    /// Resolved at initialization
    pub vsync_method: VsyncMethod,
    /// Output cursor and frame counter
    pub vsync: VsyncState,
    pub max_frames: u64,
    pub recording_time: Option<i64>,
    pub last_mux_dts: Option<i64>,
    pub initialized: bool,
    pub finished: FinishState,
    /// Every input of the feeding graph is exhausted without output
    pub inputs_done: bool,
    /// The source stalled this iteration
    pub unavailable: bool,
    pub muxing_queue: MuxingQueue,
    pub bsf_names: Vec<String>,
    pub bsfs: Vec<Box<dyn BitstreamFilter>>,
    /// Simple graph description for encoded streams fed by one input
    pub filter_description: Option<String>,
    pub copy_initial_nonkeyframes: bool,
    pub copy_prior_start: bool,
    pub packets_written: u64,
    pub data_size: u64,
    pub samples_encoded: u64,
    encoder_draining: bool,
    last_frame: Option<Frame>,
}

impl OutputStream {
    pub fn new(
        file_index: usize,
        index: usize,
        media_type: MediaType,
        source: OutputSource,
        config: &OutputStreamConfig,
    ) -> Self {
        let (stream_copy, encoder_name) = match &config.codec {
            StreamCodec::Copy => (true, None),
            StreamCodec::Encode(name) => (false, Some(name.clone())),
        };
        let source_stream = match source {
            OutputSource::Copy(stream) => Some(stream),
            OutputSource::Filter(_) => None,
        };
        Self {
            file_index,
            index,
            media_type,
            source,
            source_stream,
            stream_copy,
            encoder_name,
            encoder: None,
            params: None,
            enc_time_base: Rational::new(1, 1),
            mux_time_base: Rational::new(1, 1),
            st_time_base: Rational::new(1, 1),
            frame_rate: config.frame_rate,
            vsync_override: config.vsync,
            vsync_method: VsyncMethod::Passthrough,
            vsync: VsyncState::new(),
            max_frames: config.max_frames.unwrap_or(u64::MAX),
            recording_time: config.recording_time,
            last_mux_dts: None,
            initialized: false,
            finished: FinishState::default(),
            inputs_done: false,
            unavailable: false,
            muxing_queue: MuxingQueue::new(
                config.max_muxing_queue_size,
                config.muxing_queue_data_threshold,
            ),
            bsf_names: config.bitstream_filters.clone(),
            bsfs: Vec::new(),
            filter_description: config.filter.clone(),
            copy_initial_nonkeyframes: config.copy_initial_nonkeyframes,
            copy_prior_start: config.copy_prior_start,
            packets_written: 0,
            data_size: 0,
            samples_encoded: 0,
            encoder_draining: false,
            last_frame: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.any()
    }

    pub fn filter_pad(&self) -> Option<PadRef> {
        match self.source {
            OutputSource::Filter(pad) => Some(pad),
            OutputSource::Copy(_) => None,
        }
    }

    pub fn frame_number(&self) -> u64 {
        self.vsync.frame_number
    }

    /// Stops feeding the encoder. Under the shortest policy the whole file follows.
    pub fn close(&mut self, mux: &mut MuxContext) {
        self.finished.encoder = true;
        if mux.shortest {
            mux.request_shortest_stop();
        }
    }

    /// Marks the stream as completely done.
    pub fn finish(&mut self, mux: &mut MuxContext) {
        self.finished = FinishState {
            encoder: true,
            muxer: true,
        };
        if mux.shortest {
            mux.request_shortest_stop();
        }
    }

    /// Closes the stream once its cursor passes the recording bound.
    fn check_recording_time(&mut self, mux: &mut MuxContext) -> bool {
        if let Some(limit) = self.recording_time.or(mux.recording_time) {
            if compare_ts(self.vsync.sync_opts, self.enc_time_base, limit, TIME_BASE_Q)
                != Ordering::Less
            {
                self.close(mux);
                return false;
            }
        }
        true
    }

    /// Opens the encoder for the negotiated settings and marks the stream initialized.
    pub fn open_encoder(&mut self, engine: &mut dyn MediaEngine, setup: &EncoderSetup) -> Result<()> {
        let name = self.encoder_name.clone().unwrap_or_default();
        let encoder = engine
            .open_encoder(&name, setup)?
            .ok_or_else(|| TranscodeError::EncoderNotFound {
                file: self.file_index,
                stream: self.index,
                codec: name.clone(),
            })?;
        if self.media_type == MediaType::Video {
            self.frame_rate = setup.frame_rate;
        }
        self.params = Some(encoder.parameters());
        self.enc_time_base = setup.time_base;
        self.mux_time_base = setup.time_base;
        self.st_time_base = setup.time_base;
        self.encoder = Some(encoder);
        self.open_bitstream_filters(engine)?;
        self.initialized = true;
        log::debug!(
            "output stream #{}:{} encoding {} with time base {}",
            self.file_index,
            self.index,
            name,
            setup.time_base
        );
        Ok(())
    }

    /// Prepares a stream-copy output from its source input stream.
    pub fn init_stream_copy(&mut self, engine: &mut dyn MediaEngine, ist: &InputStream) -> Result<()> {
        let tb = ist.time_base();
        self.params = Some(ist.info.params.clone());
        self.enc_time_base = tb;
        self.mux_time_base = tb;
        self.st_time_base = tb;
        if self.frame_rate.is_none() {
            self.frame_rate = ist.info.avg_frame_rate;
        }
        self.open_bitstream_filters(engine)?;
        self.initialized = true;
        Ok(())
    }

    fn open_bitstream_filters(&mut self, engine: &mut dyn MediaEngine) -> Result<()> {
        let params = match &self.params {
            Some(params) => params,
            None => return Ok(()),
        };
        for name in &self.bsf_names {
            self.bsfs.push(engine.open_bitstream_filter(name, params)?);
        }
        Ok(())
    }

    /// Encoder frame size, 0 when variable or unknown.
    pub fn encoder_frame_size(&self) -> usize {
        self.encoder.as_ref().map_or(0, |enc| enc.frame_size())
    }

    /// Resynchronizes and encodes one filtered video frame, or flushes the
    /// duplication history at end of stream when `frame` is `None`.
    ///
    /// `sync_ipts` is the frame pts in encoder ticks and `duration` the
    /// expected frame duration in the same unit.
    pub fn do_video_out(
        &mut self,
        mux: &mut MuxContext,
        frame: Option<Frame>,
        sync_ipts: Option<f64>,
        duration: f64,
        options: &TranscodeOptions,
        stats: &mut TranscodeStats,
    ) -> Result<()> {
        let params = VsyncParams {
            method: self.vsync_method,
            frame_drop_threshold: options.frame_drop_threshold,
            dts_error_threshold: options.dts_error_threshold,
        };
        let ipts = frame
            .as_ref()
            .map(|_| sync_ipts.unwrap_or(self.vsync.sync_opts as f64));
        let frames_left = self.max_frames.saturating_sub(self.vsync.frame_number);
        let decision = self.vsync.decide(&params, ipts, duration, frames_left);

        stats.frames_dropped += decision.dropped;
        if decision.overflow {
            stats.dup_overflows += 1;
            return Ok(());
        }
        stats.record_duplicates(decision.duplicated);

        for i in 0..decision.nb_frames {
            let source = if i < decision.nb0_frames && self.last_frame.is_some() {
                self.last_frame.as_ref()
            } else {
                frame.as_ref()
            };
            let mut picture = match source {
                Some(picture) => picture.clone(),
                None => return Ok(()),
            };
            picture.pts = Some(self.vsync.sync_opts);
            picture.time_base = self.enc_time_base;

            if !self.check_recording_time(mux) {
                return Ok(());
            }
            self.encode_frame(mux, &picture, options, stats)?;
            self.vsync.sync_opts += 1;
            self.vsync.frame_number += 1;
        }

        self.last_frame = frame;
        Ok(())
    }

    /// Encodes one filtered audio frame (pts already in encoder time base).
    pub fn do_audio_out(
        &mut self,
        mux: &mut MuxContext,
        mut frame: Frame,
        options: &TranscodeOptions,
        stats: &mut TranscodeStats,
    ) -> Result<()> {
        if !self.check_recording_time(mux) {
            return Ok(());
        }
        let pts = *frame.pts.get_or_insert(self.vsync.sync_opts);
        frame.time_base = self.enc_time_base;
        self.vsync.sync_opts = pts + frame.nb_samples as i64;
        self.samples_encoded += frame.nb_samples as u64;
        self.encode_frame(mux, &frame, options, stats)
    }

    fn encode_error(&self, reason: impl ToString) -> TranscodeError {
        let err = TranscodeError::Encode {
            file: self.file_index,
            stream: self.index,
            media: self.media_type.name(),
            reason: reason.to_string(),
        };
        log::error!("{}", err);
        err
    }

    fn encode_frame(
        &mut self,
        mux: &mut MuxContext,
        frame: &Frame,
        options: &TranscodeOptions,
        stats: &mut TranscodeStats,
    ) -> Result<()> {
        let encoder = match self.encoder.as_mut() {
            Some(encoder) => encoder,
            None => return Err(self.encode_error("encoder not opened")),
        };
        let mut packets = Vec::new();
        let mut failure = encoder.send_frame(Some(frame)).err();
        if failure.is_none() {
            loop {
                match encoder.receive_packet() {
                    Ok(Pull::Ready(pkt)) => packets.push(pkt),
                    Ok(Pull::Again) | Ok(Pull::Eof) => break,
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
        }
        let has_delay = encoder.has_delay();
        if let Some(err) = failure {
            return Err(self.encode_error(err));
        }
        stats.frames_encoded += 1;

        for mut pkt in packets {
            if self.media_type == MediaType::Video && pkt.pts.is_none() && !has_delay {
                pkt.pts = Some(self.vsync.sync_opts);
            }
            pkt.time_base = self.enc_time_base;
            pkt.rescale_ts(self.mux_time_base);
            mux.output_packet(self, Some(pkt), options, stats)?;
        }
        Ok(())
    }

    /// Drains the encoder and flushes the bitstream filter chain.
    pub fn flush_encoder(
        &mut self,
        mux: &mut MuxContext,
        options: &TranscodeOptions,
        stats: &mut TranscodeStats,
    ) -> Result<()> {
        if self.stream_copy || !matches!(self.media_type, MediaType::Audio | MediaType::Video) {
            return Ok(());
        }
        let encoder = match self.encoder.as_mut() {
            Some(encoder) => encoder,
            None => return Ok(()),
        };

        let mut packets = Vec::new();
        let mut failure = None;
        loop {
            match encoder.receive_packet() {
                Ok(Pull::Ready(pkt)) => packets.push(pkt),
                Ok(Pull::Eof) => break,
                Ok(Pull::Again) if !self.encoder_draining => {
                    if let Err(err) = encoder.send_frame(None) {
                        failure = Some(err);
                        break;
                    }
                    self.encoder_draining = true;
                }
                Ok(Pull::Again) => {
                    log::warn!(
                        "encoder for output stream #{}:{} stalled while draining",
                        self.file_index,
                        self.index
                    );
                    break;
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = failure {
            return Err(self.encode_error(err));
        }

        for mut pkt in packets {
            if self.finished.muxer {
                continue;
            }
            pkt.time_base = self.enc_time_base;
            pkt.rescale_ts(self.mux_time_base);
            mux.output_packet(self, Some(pkt), options, stats)?;
        }
        mux.output_packet(self, None, options, stats)
    }

    /// Rewrites the timestamps of an input packet and sends it to the muxer.
    /// `None` flushes the bitstream filter chain.
    pub fn do_streamcopy(
        &mut self,
        mux: &mut MuxContext,
        ist: &InputStream,
        timeline: &InputTimeline,
        pkt: Option<&Packet>,
        options: &TranscodeOptions,
        stats: &mut TranscodeStats,
    ) -> Result<()> {
        let start_time = mux.start_time.unwrap_or(0);
        let ost_tb_start = rescale_q(start_time, TIME_BASE_Q, self.mux_time_base);
        let ist_tb = ist.time_base();

        let pkt = match pkt {
            Some(pkt) => pkt,
            None => return mux.output_packet(self, None, options, stats),
        };

        if self.vsync.frame_number == 0 && !pkt.is_key && !self.copy_initial_nonkeyframes {
            return Ok(());
        }

        if self.vsync.frame_number == 0 && !self.copy_prior_start {
            let mut comp_start = start_time;
            if options.copy_ts {
                if let Some(file_start) = timeline.user_start_time {
                    comp_start = comp_start.max(file_start + timeline.ts_offset);
                }
            }
            let before_start = match pkt.pts {
                // an input position that is still unknown lies before any start
                None => ist.pts.map_or(true, |pts| pts < comp_start),
                Some(pts) => pts < rescale_q(comp_start, TIME_BASE_Q, ist_tb),
            };
            if before_start {
                return Ok(());
            }
        }

        if let Some(limit) = self.recording_time.or(mux.recording_time) {
            if ist.pts.map_or(false, |pts| pts >= limit + start_time) {
                self.close(mux);
                return Ok(());
            }
        }

        if let Some(limit) = timeline.recording_time {
            let mut file_start = 0;
            if options.copy_ts {
                file_start += timeline.user_start_time.unwrap_or(0);
                file_start += timeline.start_time.unwrap_or(0);
            }
            if ist.pts.map_or(false, |pts| pts >= limit + file_start) {
                self.close(mux);
                return Ok(());
            }
        }

        if self.media_type == MediaType::Video {
            self.vsync.sync_opts += 1;
        }

        let mut opkt = pkt.clone();
        opkt.pts = pkt
            .pts
            .map(|pts| rescale_q(pts, ist_tb, self.mux_time_base) - ost_tb_start);
        opkt.dts = match pkt.dts {
            None => ist.dts.map(|dts| rescale_q(dts, TIME_BASE_Q, self.mux_time_base)),
            Some(dts) => {
                let dts = rescale_q(dts, ist_tb, self.mux_time_base);
                if self.media_type == MediaType::Audio {
                    opkt.pts = Some(dts - ost_tb_start);
                }
                Some(dts)
            }
        };
        opkt.dts = opkt.dts.map(|dts| dts - ost_tb_start);
        opkt.duration = rescale_q(pkt.duration, ist_tb, self.mux_time_base);
        opkt.time_base = self.mux_time_base;

        mux.output_packet(self, Some(opkt), options, stats)
    }
}

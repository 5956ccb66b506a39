use super::{PadRef, StreamRef};
use crate::av::transcode::TranscodeStats;
use crate::av::{Decoder, Frame, MediaType, Packet, Pull, StreamInfo};
use crate::config::TranscodeOptions;
use crate::error::{Result, TranscodeError};
use crate::format::InputTimeline;
use crate::utils::{rescale_q, Rational, TIME_BASE, TIME_BASE_Q};
use std::collections::VecDeque;

/// What a single decode call feeds to the decoder.
enum Feed<'a> {
    Packet(&'a Packet),
    /// Start draining
    Drain,
    /// Only collect already decoded output
    Receive,
}

/// Decode and timing state of one elementary stream of an input file.
///
/// `dts`, `pts`, `next_dts` and `next_pts` are kept in the engine time base
/// ([`TIME_BASE_Q`]) and are always set once the first packet carrying a
/// timestamp has been seen.
pub struct InputStream {
    pub file_index: usize,
    pub index: usize,
    pub info: StreamInfo,
    /// At least one consumer needs decoded frames
    pub decoding_needed: bool,
    /// No output uses the stream; its packets are dropped
    pub discard: bool,
    pub decoder: Option<Box<dyn Decoder>>,
    /// Forced input frame rate, replaces decoded timestamps with a counter
    pub framerate: Option<Rational>,
    pub ts_scale: f64,
    pub dts: Option<i64>,
    pub pts: Option<i64>,
    pub next_dts: Option<i64>,
    pub next_pts: Option<i64>,
    /// Smallest and largest corrected pts, stream time base
    pub min_pts: Option<i64>,
    pub max_pts: Option<i64>,
    /// A decoded frame left this stream at least once
    pub got_output: bool,
    /// Samples in the last decoded audio frame
    pub nb_samples: usize,
    pub frames_decoded: u64,
    pub samples_decoded: u64,
    pub packets_read: u64,
    pub bytes_read: u64,
    /// Filter graph inputs fed by this stream
    pub filters: Vec<PadRef>,
    /// Output streams receiving this stream's packets untouched
    pub copy_targets: Vec<StreamRef>,
    saw_first_ts: bool,
    wrap_correction_done: bool,
    cfr_next_pts: i64,
    dts_buffer: VecDeque<Option<i64>>,
}

impl InputStream {
    pub fn new(file_index: usize, info: StreamInfo) -> Self {
        Self {
            file_index,
            index: info.index,
            info,
            decoding_needed: false,
            discard: true,
            decoder: None,
            framerate: None,
            ts_scale: 1.0,
            dts: None,
            pts: None,
            next_dts: None,
            next_pts: None,
            min_pts: None,
            max_pts: None,
            got_output: false,
            nb_samples: 0,
            frames_decoded: 0,
            samples_decoded: 0,
            packets_read: 0,
            bytes_read: 0,
            filters: Vec::new(),
            copy_targets: Vec::new(),
            saw_first_ts: false,
            wrap_correction_done: false,
            cfr_next_pts: 0,
            dts_buffer: VecDeque::new(),
        }
    }

    pub fn media_type(&self) -> MediaType {
        self.info.media_type()
    }

    pub fn time_base(&self) -> Rational {
        self.info.time_base
    }

    fn is_audio_or_video(&self) -> bool {
        matches!(self.media_type(), MediaType::Audio | MediaType::Video)
    }

    /// Repairs the timestamps of a freshly demuxed packet in place.
    ///
    /// Steps, in order: wrap correction, file offset and scale, inter-stream
    /// discontinuity, loop duration shift, steady-state discontinuity. None
    /// of them fail; timestamps degrade to unknown instead.
    pub fn correct_timestamps(
        &mut self,
        pkt: &mut Packet,
        timeline: &mut InputTimeline,
        options: &TranscodeOptions,
        stats: &mut TranscodeStats,
    ) {
        let tb = self.info.time_base;
        let wrap_bits = self.info.pts_wrap_bits;
        let delta_threshold = (options.dts_delta_threshold * TIME_BASE as f64) as i64;
        let error_threshold = (options.dts_error_threshold * TIME_BASE as f64) as i64;

        if !self.wrap_correction_done && wrap_bits > 0 && wrap_bits < 64 {
            if let Some(start) = timeline.start_time {
                self.correct_wrap(pkt, timeline, start);
            }
        }

        let offset = rescale_q(timeline.ts_offset, TIME_BASE_Q, tb);
        pkt.dts = pkt.dts.map(|dts| dts + offset);
        pkt.pts = pkt.pts.map(|pts| pts + offset);
        if self.ts_scale != 1.0 {
            pkt.pts = pkt.pts.map(|pts| (pts as f64 * self.ts_scale) as i64);
            pkt.dts = pkt.dts.map(|dts| (dts as f64 * self.ts_scale) as i64);
        }

        let pkt_dts = pkt.dts.map(|dts| rescale_q(dts, tb, TIME_BASE_Q));
        if self.is_audio_or_video()
            && !options.copy_ts
            && timeline.ts_discontinuous
            && self.next_dts.is_none()
        {
            if let (Some(pkt_dts), Some(last_ts)) = (pkt_dts, timeline.last_ts) {
                let delta = pkt_dts - last_ts;
                if delta < -delta_threshold || delta > delta_threshold {
                    timeline.ts_offset -= delta;
                    log::debug!(
                        "inter stream timestamp discontinuity {}, new offset={}",
                        delta,
                        timeline.ts_offset
                    );
                    shift_packet(pkt, -rescale_q(delta, TIME_BASE_Q, tb));
                }
            }
        }

        let duration = rescale_q(timeline.duration, timeline.time_base, tb);
        if let Some(pts) = pkt.pts.as_mut() {
            *pts += duration;
            self.max_pts = Some(self.max_pts.map_or(*pts, |max| max.max(*pts)));
            self.min_pts = Some(self.min_pts.map_or(*pts, |min| min.min(*pts)));
        }
        if let Some(dts) = pkt.dts.as_mut() {
            *dts += duration;
        }

        let pkt_dts = pkt.dts.map(|dts| rescale_q(dts, tb, TIME_BASE_Q));
        let mut disable_correction = options.copy_ts;
        if let (true, Some(dts), Some(pkt_dts), Some(next_dts)) =
            (options.copy_ts, pkt.dts, pkt_dts, self.next_dts)
        {
            if timeline.ts_discontinuous && wrap_bits < 60 {
                let wrap_dts = rescale_q(dts + (1i64 << wrap_bits), tb, TIME_BASE_Q);
                if (wrap_dts - next_dts).abs() < (pkt_dts - next_dts).abs() / 10 {
                    disable_correction = false;
                }
            }
        }

        if self.is_audio_or_video() && !disable_correction {
            if let (Some(pkt_dts), Some(next_dts)) = (pkt_dts, self.next_dts) {
                let delta = pkt_dts - next_dts;
                if timeline.ts_discontinuous {
                    let behind = match self.pts.max(self.dts) {
                        Some(last) => pkt_dts + TIME_BASE / 10 < last,
                        None => false,
                    };
                    if delta < -delta_threshold || delta > delta_threshold || behind {
                        timeline.ts_offset -= delta;
                        log::debug!(
                            "timestamp discontinuity for stream #{}:{} (type={}): {}, new offset={}",
                            self.file_index,
                            self.index,
                            self.media_type(),
                            delta,
                            timeline.ts_offset
                        );
                        shift_packet(pkt, -rescale_q(delta, TIME_BASE_Q, tb));
                    }
                } else {
                    if delta < -error_threshold || delta > error_threshold {
                        log::warn!(
                            "DTS {:?}, next:{} st:{} invalid dropping",
                            pkt.dts,
                            next_dts,
                            self.index
                        );
                        pkt.dts = None;
                        stats.discarded_timestamps += 1;
                    }
                    if let Some(pts) = pkt.pts {
                        let delta = rescale_q(pts, tb, TIME_BASE_Q) - next_dts;
                        if delta < -error_threshold || delta > error_threshold {
                            log::warn!(
                                "PTS {}, next:{} invalid dropping st:{}",
                                pts,
                                next_dts,
                                self.index
                            );
                            pkt.pts = None;
                            stats.discarded_timestamps += 1;
                        }
                    }
                }
            }
        }

        if let Some(dts) = pkt.dts {
            timeline.last_ts = Some(rescale_q(dts, tb, TIME_BASE_Q));
        }
    }

    fn correct_wrap(&mut self, pkt: &mut Packet, timeline: &mut InputTimeline, start: i64) {
        // the container start time may predate every stream actually used
        if self.next_dts.is_none() && timeline.ts_offset == -start && timeline.ts_discontinuous {
            if let Some(new_start) = timeline.enabled_start_time {
                if new_start > start {
                    log::debug!("correcting start time by {}", new_start - start);
                    timeline.ts_offset = -new_start;
                }
            }
        }

        let bits = self.info.pts_wrap_bits;
        let stime = rescale_q(start, TIME_BASE_Q, self.info.time_base) as i128;
        let period = 1i128 << bits;
        let half = 1i128 << (bits - 1);
        self.wrap_correction_done = true;

        if let Some(dts) = pkt.dts {
            if dts as i128 > stime + half {
                pkt.dts = Some((dts as i128 - period) as i64);
                self.wrap_correction_done = false;
            }
        }
        if let Some(pts) = pkt.pts {
            if pts as i128 > stime + half {
                pkt.pts = Some((pts as i128 - period) as i64);
                self.wrap_correction_done = false;
            }
        }
    }

    /// Seeds the running timestamps from a packet, or from nothing at EOF.
    pub fn begin_packet(&mut self, pkt: Option<&Packet>) {
        let tb = self.info.time_base;
        if !self.saw_first_ts {
            let delay = self.info.params.video_delay as f64;
            let dts = match self.info.avg_frame_rate {
                Some(rate) if rate.num != 0 => -(delay * TIME_BASE as f64 / rate.as_f64()) as i64,
                _ => 0,
            };
            self.dts = Some(dts);
            self.pts = Some(0);
            if let Some(pts) = pkt.and_then(|p| p.pts) {
                if !self.decoding_needed {
                    let dts = dts + rescale_q(pts, tb, TIME_BASE_Q);
                    self.dts = Some(dts);
                    self.pts = Some(dts);
                }
            }
            self.saw_first_ts = true;
        }

        if self.next_dts.is_none() {
            self.next_dts = self.dts;
        }
        if self.next_pts.is_none() {
            self.next_pts = self.pts;
        }

        if let Some(dts) = pkt.and_then(|p| p.dts) {
            let dts = rescale_q(dts, tb, TIME_BASE_Q);
            self.dts = Some(dts);
            self.next_dts = Some(dts);
            if self.media_type() != MediaType::Video || !self.decoding_needed {
                self.pts = Some(dts);
                self.next_pts = Some(dts);
            }
        }
    }

    /// Runs one decode call and advances the timestamp predictions.
    ///
    /// `pkt` is the packet being processed (`None` while draining at EOF);
    /// `repeating` is true for the second and later calls on the same packet,
    /// which only collect buffered output.
    pub fn decode_step(&mut self, pkt: Option<&Packet>, repeating: bool) -> Result<Pull<Frame>> {
        self.pts = self.next_pts;
        self.dts = self.next_dts;

        let feed = match (repeating, pkt) {
            (true, _) => Feed::Receive,
            (false, Some(pkt)) => Feed::Packet(pkt),
            (false, None) => Feed::Drain,
        };

        match self.media_type() {
            MediaType::Audio => self.decode_audio(feed, pkt),
            MediaType::Video => {
                let result = self.decode_video(feed, pkt.is_none());
                let got_output = matches!(result, Ok(Pull::Ready(_)));
                if !repeating || pkt.is_none() || got_output {
                    let duration_dts = match pkt {
                        Some(p) if p.duration > 0 => {
                            rescale_q(p.duration, self.info.time_base, TIME_BASE_Q)
                        }
                        _ => self.codec_frame_duration(),
                    };
                    self.next_dts = match self.dts {
                        Some(_) if duration_dts != 0 => self.next_dts.map(|d| d + duration_dts),
                        _ => None,
                    };
                    if let Ok(Pull::Ready(frame)) = &result {
                        let duration_pts = if frame.duration > 0 {
                            rescale_q(frame.duration, frame.time_base, TIME_BASE_Q)
                        } else {
                            duration_dts
                        };
                        self.next_pts = self.next_pts.map(|p| p + duration_pts);
                    }
                }
                result
            }
            other => Err(TranscodeError::Decode {
                file: self.file_index,
                stream: self.index,
                reason: format!("decoding {} streams is not supported", other),
            }),
        }
    }

    /// Frame duration derived from the codec frame rate, engine time base.
    fn codec_frame_duration(&self) -> i64 {
        match self.info.params.frame_rate {
            Some(rate) if rate.num != 0 && rate.den != 0 => TIME_BASE * rate.den as i64 / rate.num as i64,
            _ => 0,
        }
    }

    fn decode(&mut self, feed: Feed<'_>) -> Result<Pull<Frame>> {
        let (file, stream) = (self.file_index, self.index);
        let decoder = self.decoder.as_mut().ok_or_else(|| TranscodeError::Decode {
            file,
            stream,
            reason: "decoder not opened".into(),
        })?;
        let wrap = |e: TranscodeError| TranscodeError::Decode {
            file,
            stream,
            reason: e.to_string(),
        };
        match feed {
            Feed::Packet(pkt) => decoder.send_packet(Some(pkt)).map_err(wrap)?,
            Feed::Drain => decoder.send_packet(None).map_err(wrap)?,
            Feed::Receive => {}
        }
        decoder.receive_frame().map_err(wrap)
    }

    fn decode_audio(&mut self, feed: Feed<'_>, pkt: Option<&Packet>) -> Result<Pull<Frame>> {
        let mut frame = match self.decode(feed)? {
            Pull::Ready(frame) => frame,
            other => return Ok(other),
        };
        if frame.sample_rate == 0 {
            return Err(TranscodeError::Decode {
                file: self.file_index,
                stream: self.index,
                reason: "decoded audio frame has no sample rate".into(),
            });
        }

        self.samples_decoded += frame.nb_samples as u64;
        self.frames_decoded += 1;

        let advance = TIME_BASE * frame.nb_samples as i64 / frame.sample_rate as i64;
        self.next_pts = self.next_pts.map(|p| p + advance);
        self.next_dts = self.next_dts.map(|d| d + advance);

        let (pts, tb) = match (frame.pts, pkt.and_then(|p| p.pts)) {
            (Some(pts), _) => (Some(pts), self.info.time_base),
            (None, Some(pts)) => (Some(pts), self.info.time_base),
            (None, None) => (self.dts, TIME_BASE_Q),
        };
        let sample_tb = Rational::new(1, frame.sample_rate as i32);
        frame.pts = pts.map(|pts| rescale_q(pts, tb, sample_tb));
        frame.time_base = sample_tb;
        self.nb_samples = frame.nb_samples;
        Ok(Pull::Ready(frame))
    }

    fn decode_video(&mut self, feed: Feed<'_>, eof: bool) -> Result<Pull<Frame>> {
        let tb = self.info.time_base;
        if let Feed::Packet(pkt) = &feed {
            if !eof && pkt.size() == 0 {
                return Ok(Pull::Again);
            }
        }

        let dts = self.dts.map(|dts| rescale_q(dts, TIME_BASE_Q, tb));
        if eof {
            self.dts_buffer.push_back(dts);
        }

        let result = match feed {
            Feed::Packet(pkt) => {
                let mut pkt = pkt.clone();
                pkt.dts = dts;
                self.decode(Feed::Packet(&pkt))?
            }
            other => self.decode(other)?,
        };
        let mut frame = match result {
            Pull::Ready(frame) => frame,
            other => return Ok(other),
        };

        self.frames_decoded += 1;
        frame.time_base = tb;

        let mut best_effort = frame.pts;
        if let Some(rate) = self.framerate {
            best_effort = Some(self.cfr_next_pts);
            self.cfr_next_pts += 1;
            frame.time_base = rate.invert();
        }
        if eof && best_effort.is_none() {
            if let Some(buffered) = self.dts_buffer.pop_front() {
                best_effort = buffered;
            }
        }

        if let Some(ts) = best_effort {
            frame.pts = Some(ts);
            let ts = rescale_q(ts, frame.time_base, TIME_BASE_Q);
            self.pts = Some(ts);
            self.next_pts = Some(ts);
        }

        let sar = self.info.params.sample_aspect_ratio;
        if sar.num != 0 {
            frame.sample_aspect_ratio = sar;
        }
        Ok(Pull::Ready(frame))
    }

    /// Advances the predicted timestamps for a packet that is only copied.
    pub fn advance_copy_timestamps(&mut self, pkt: &Packet) {
        let tb = self.info.time_base;
        self.dts = self.next_dts;
        let params = &self.info.params;
        match params.media_type {
            MediaType::Audio => {
                let step = if params.sample_rate > 0 {
                    TIME_BASE * params.frame_size as i64 / params.sample_rate as i64
                } else {
                    rescale_q(pkt.duration, tb, TIME_BASE_Q)
                };
                self.next_dts = self.next_dts.map(|d| d + step);
            }
            MediaType::Video => {
                if let Some(rate) = self.framerate {
                    let frame_tb = rate.invert();
                    self.next_dts = self.next_dts.map(|d| {
                        let frames = rescale_q(d, TIME_BASE_Q, frame_tb);
                        rescale_q(frames + 1, frame_tb, TIME_BASE_Q)
                    });
                } else if pkt.duration > 0 {
                    let step = rescale_q(pkt.duration, tb, TIME_BASE_Q);
                    self.next_dts = self.next_dts.map(|d| d + step);
                } else {
                    let step = self.codec_frame_duration();
                    self.next_dts = self.next_dts.map(|d| d + step);
                }
            }
            _ => {}
        }
        self.pts = self.dts;
        self.next_pts = self.next_dts;
    }

    /// The current pts in stream time base, used to close filter inputs.
    pub fn eof_pts(&self) -> Option<i64> {
        self.pts.map(|pts| rescale_q(pts, TIME_BASE_Q, self.info.time_base))
    }

    /// Duration of a single frame or audio packet, in stream time base.
    /// Used as the tail added to `max_pts - min_pts` when looping.
    pub fn last_frame_duration(&self, has_audio: bool) -> Option<i64> {
        let tb = self.info.time_base;
        if has_audio {
            if self.media_type() == MediaType::Audio && self.nb_samples > 0 {
                let sample_tb = Rational::new(1, self.info.params.sample_rate.max(1) as i32);
                return Some(rescale_q(self.nb_samples as i64, sample_tb, tb));
            }
            return None;
        }
        let rate = self
            .framerate
            .or(self.info.avg_frame_rate)
            .filter(|rate| rate.num != 0);
        Some(match rate {
            Some(rate) => rescale_q(1, rate.invert(), tb),
            None => 1,
        })
    }
}

fn shift_packet(pkt: &mut Packet, shift: i64) {
    pkt.dts = pkt.dts.map(|dts| dts + shift);
    pkt.pts = pkt.pts.map(|pts| pts + shift);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::CodecParameters;
    use pretty_assertions::assert_eq;

    fn video_stream(tb: Rational) -> InputStream {
        let params = CodecParameters::video("raw", 320, 240).with_frame_rate(Rational::new(25, 1));
        InputStream::new(0, StreamInfo::new(0, tb, params))
    }

    fn timeline(discontinuous: bool) -> InputTimeline {
        InputTimeline {
            ts_discontinuous: discontinuous,
            ..InputTimeline::default()
        }
    }

    fn feed(
        ist: &mut InputStream,
        timeline: &mut InputTimeline,
        options: &TranscodeOptions,
        ts: i64,
    ) -> Packet {
        let mut stats = TranscodeStats::default();
        let mut pkt = Packet::new(vec![0u8; 8])
            .with_pts(ts)
            .with_dts(ts)
            .with_duration(1);
        ist.correct_timestamps(&mut pkt, timeline, options, &mut stats);
        ist.begin_packet(Some(&pkt));
        ist.advance_copy_timestamps(&pkt);
        pkt
    }

    #[test]
    fn test_offset_then_scale() {
        let mut ist = video_stream(Rational::new(1, 1000));
        ist.ts_scale = 2.0;
        let mut tl = timeline(false);
        tl.ts_offset = 1_000_000; // one second
        let mut stats = TranscodeStats::default();
        let mut pkt = Packet::new(vec![1u8]).with_pts(40).with_dts(40);
        ist.correct_timestamps(&mut pkt, &mut tl, &TranscodeOptions::default(), &mut stats);
        assert_eq!(pkt.pts, Some(2080));
        assert_eq!(pkt.dts, Some(2080));
    }

    #[test]
    fn test_wrap_correction() {
        let mut ist = video_stream(Rational::new(1, 90000));
        ist.info.pts_wrap_bits = 33;
        let mut tl = timeline(false);
        tl.start_time = Some(0);
        let wrapped = (1i64 << 33) - 3000;
        let mut stats = TranscodeStats::default();
        let mut pkt = Packet::new(vec![1u8]).with_pts(wrapped).with_dts(wrapped);
        ist.correct_timestamps(&mut pkt, &mut tl, &TranscodeOptions::default(), &mut stats);
        assert_eq!(pkt.dts, Some(-3000));
        assert!(!ist.wrap_correction_done);

        let mut pkt = Packet::new(vec![1u8]).with_pts(3000).with_dts(3000);
        ist.correct_timestamps(&mut pkt, &mut tl, &TranscodeOptions::default(), &mut stats);
        assert_eq!(pkt.dts, Some(3000));
        assert!(ist.wrap_correction_done);
    }

    #[test]
    fn test_discontinuous_jump_folds_into_offset() {
        let options = TranscodeOptions::default();
        let mut ist = video_stream(Rational::new(1, 25));
        let mut tl = timeline(true);
        for ts in 0..5 {
            feed(&mut ist, &mut tl, &options, ts);
        }
        // 100 seconds forward jump
        let pkt = feed(&mut ist, &mut tl, &options, 2505);
        assert_eq!(pkt.dts, Some(5));
        assert_eq!(tl.ts_offset, -100_000_000);
        // later packets follow the new offset
        let pkt = feed(&mut ist, &mut tl, &options, 2506);
        assert_eq!(pkt.dts, Some(6));
    }

    #[test]
    fn test_small_jump_is_kept() {
        let options = TranscodeOptions::default();
        let mut ist = video_stream(Rational::new(1, 25));
        let mut tl = timeline(true);
        feed(&mut ist, &mut tl, &options, 0);
        let pkt = feed(&mut ist, &mut tl, &options, 50);
        assert_eq!(pkt.dts, Some(50));
        assert_eq!(tl.ts_offset, 0);
    }

    #[test]
    fn test_continuous_format_invalidates() {
        let options = TranscodeOptions {
            dts_error_threshold: 10.0,
            ..TranscodeOptions::default()
        };
        let mut ist = video_stream(Rational::new(1, 25));
        let mut tl = timeline(false);
        let mut stats = TranscodeStats::default();
        feed(&mut ist, &mut tl, &options, 0);
        let mut pkt = Packet::new(vec![1u8]).with_pts(25 * 60).with_dts(25 * 60);
        ist.correct_timestamps(&mut pkt, &mut tl, &options, &mut stats);
        assert_eq!(pkt.dts, None);
        assert_eq!(pkt.pts, None);
        assert_eq!(stats.discarded_timestamps, 2);
        assert_eq!(tl.ts_offset, 0);
    }

    #[test]
    fn test_copy_ts_disables_correction() {
        let options = TranscodeOptions {
            copy_ts: true,
            ..TranscodeOptions::default()
        };
        let mut ist = video_stream(Rational::new(1, 25));
        let mut tl = timeline(true);
        feed(&mut ist, &mut tl, &options, 0);
        let pkt = feed(&mut ist, &mut tl, &options, 2500);
        assert_eq!(pkt.dts, Some(2500));
        assert_eq!(tl.ts_offset, 0);
    }

    #[test]
    fn test_inter_stream_discontinuity() {
        let options = TranscodeOptions::default();
        let mut ist = video_stream(Rational::new(1, 25));
        let mut tl = timeline(true);
        tl.last_ts = Some(0);
        let mut stats = TranscodeStats::default();
        // first packet of this stream lands 60 s after the file's last timestamp
        let mut pkt = Packet::new(vec![1u8]).with_pts(1500).with_dts(1500);
        ist.correct_timestamps(&mut pkt, &mut tl, &options, &mut stats);
        assert_eq!(pkt.dts, Some(0));
        assert_eq!(tl.ts_offset, -60_000_000);
    }

    #[test]
    fn test_loop_duration_shift() {
        let options = TranscodeOptions::default();
        let mut ist = video_stream(Rational::new(1, 25));
        let mut tl = timeline(false);
        tl.duration = 10;
        tl.time_base = Rational::new(1, 25);
        let pkt = feed(&mut ist, &mut tl, &options, 3);
        assert_eq!(pkt.pts, Some(13));
        assert_eq!(ist.min_pts, Some(13));
        assert_eq!(ist.max_pts, Some(13));
    }

    #[test]
    fn test_copy_prediction_uses_duration() {
        let options = TranscodeOptions::default();
        let mut ist = video_stream(Rational::new(1, 25));
        let mut tl = timeline(false);
        feed(&mut ist, &mut tl, &options, 0);
        assert_eq!(ist.dts, Some(0));
        assert_eq!(ist.next_dts, Some(40_000));
    }
}

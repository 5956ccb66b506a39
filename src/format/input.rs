use super::reader::InputReader;
use crate::av::{Demuxer, MediaEngine, MediaType, Packet, Pull};
use crate::codec::InputStream;
use crate::config::{Backpressure, InputFileConfig, TranscodeOptions};
use crate::error::{Result, TranscodeError};
use crate::utils::{compare_ts, rescale_q, Rational, TIME_BASE_Q};
use std::cmp::Ordering;

/// File-wide timing state shared by the streams of one input.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTimeline {
    /// Added to every timestamp read from the file, engine time base
    pub ts_offset: i64,
    /// Last DTS seen on any stream of the file, engine time base
    pub last_ts: Option<i64>,
    /// Accumulated length of completed loop iterations, in `time_base`
    pub duration: i64,
    pub time_base: Rational,
    /// Container start time, engine time base
    pub start_time: Option<i64>,
    /// Earliest start time among the streams actually used
    pub enabled_start_time: Option<i64>,
    /// Container tolerates timestamp jumps
    pub ts_discontinuous: bool,
    /// Requested start position, engine time base
    pub user_start_time: Option<i64>,
    /// Requested input duration, engine time base
    pub recording_time: Option<i64>,
}

impl Default for InputTimeline {
    fn default() -> Self {
        Self {
            ts_offset: 0,
            last_ts: None,
            duration: 0,
            time_base: Rational::new(1, 1),
            start_time: None,
            enabled_start_time: None,
            ts_discontinuous: false,
            user_start_time: None,
            recording_time: None,
        }
    }
}

impl InputTimeline {
    /// Extends the loop duration to `candidate` (in `candidate_tb`) when it
    /// is longer than what is stored.
    pub fn extend_duration(&mut self, candidate: i64, candidate_tb: Rational) {
        if self.duration == 0 {
            self.duration = candidate;
            self.time_base = candidate_tb;
            return;
        }
        if compare_ts(self.duration, self.time_base, candidate, candidate_tb) == Ordering::Less {
            self.duration = candidate;
            self.time_base = candidate_tb;
        }
    }
}

/// Length of one loop iteration of a stream: its pts span plus the duration
/// of its last frame. A span that would overflow is left out.
fn loop_duration(frame_duration: i64, min_pts: i64, max_pts: i64) -> i64 {
    if max_pts <= min_pts {
        return frame_duration;
    }
    max_pts
        .checked_sub(min_pts)
        .and_then(|span| span.checked_add(frame_duration))
        .unwrap_or(frame_duration)
}

/// An opened input file: its streams, timing state and reader thread.
pub struct InputFile {
    pub index: usize,
    pub url: String,
    pub timeline: InputTimeline,
    pub streams: Vec<InputStream>,
    pub eof_reached: bool,
    /// The last read attempt reported "not ready"
    pub eagain: bool,
    /// Remaining loop iterations, -1 for infinite
    pub loops_left: i32,
    /// Position the demuxer is rewound to when looping
    pub seek_timestamp: i64,
    pub accurate_seek: bool,
    pub deinterlace: bool,
    queue_size: usize,
    backpressure: Backpressure,
    non_blocking: bool,
    blocking_reads: bool,
    demuxer: Option<Box<dyn Demuxer>>,
    reader: Option<InputReader>,
}

impl InputFile {
    /// Opens the file and prepares its streams. Streams start discarded.
    pub fn open(
        index: usize,
        config: &InputFileConfig,
        engine: &mut dyn MediaEngine,
        options: &TranscodeOptions,
    ) -> Result<Self> {
        let mut demuxer = engine.open_input(&config.url)?;
        let container_start = demuxer.start_time();

        let mut timestamp = config.start_time.unwrap_or(0);
        if let Some(start) = container_start {
            timestamp += start;
        }
        if config.start_time.is_some() {
            log::debug!("input #{} seeking to {}", index, timestamp);
            if let Err(err) = demuxer.seek(timestamp) {
                log::warn!("{}: could not seek to position {}: {}", config.url, timestamp, err);
            }
        }

        let ts_offset = if options.copy_ts {
            config.input_ts_offset
        } else {
            config.input_ts_offset - timestamp
        };

        let mut streams = Vec::with_capacity(demuxer.streams().len());
        for (i, info) in demuxer.streams().iter().enumerate() {
            let mut ist = InputStream::new(index, info.clone());
            if let Some(scale) = config.ts_scale.get(i).or(config.ts_scale.last()) {
                ist.ts_scale = *scale;
            }
            if ist.media_type() == MediaType::Video {
                ist.framerate = config.frame_rate;
            }
            streams.push(ist);
        }

        let timeline = InputTimeline {
            ts_offset,
            start_time: container_start,
            ts_discontinuous: demuxer.ts_discontinuous(),
            user_start_time: config.start_time,
            recording_time: config.recording_time,
            ..InputTimeline::default()
        };

        log::info!(
            "input #{}, from '{}': {} stream(s)",
            index,
            config.url,
            streams.len()
        );

        Ok(Self {
            index,
            url: config.url.clone(),
            timeline,
            streams,
            eof_reached: false,
            eagain: false,
            loops_left: config.stream_loop,
            seek_timestamp: container_start.unwrap_or(0),
            accurate_seek: config.accurate_seek,
            deinterlace: config.deinterlace,
            queue_size: config.thread_queue_size.unwrap_or(options.thread_queue_size),
            backpressure: config.backpressure,
            non_blocking: config.non_blocking,
            blocking_reads: false,
            demuxer: Some(demuxer),
            reader: None,
        })
    }

    /// Records the earliest start time among streams that are in use.
    pub fn update_enabled_start_time(&mut self) {
        self.timeline.enabled_start_time = self
            .streams
            .iter()
            .filter(|ist| !ist.discard)
            .filter_map(|ist| {
                ist.info
                    .start_time
                    .map(|start| rescale_q(start, ist.time_base(), TIME_BASE_Q))
            })
            .min();
    }

    pub fn is_running(&self) -> bool {
        self.reader.is_some()
    }

    /// Hands the demuxer to a reader thread. Reads block only when this
    /// is the sole input and non-blocking mode was not requested.
    pub fn start_reader(&mut self, single_input: bool) -> Result<()> {
        let demuxer = match self.demuxer.take() {
            Some(demuxer) => demuxer,
            None => return Ok(()),
        };
        self.blocking_reads = single_input && !self.non_blocking;
        let reader = InputReader::spawn(self.index, demuxer, self.queue_size, self.backpressure)?;
        self.reader = Some(reader);
        Ok(())
    }

    /// Joins the reader thread and takes the demuxer back.
    pub fn stop_reader(&mut self) -> Result<()> {
        if let Some(reader) = self.reader.take() {
            self.demuxer = Some(reader.stop()?);
        }
        Ok(())
    }

    /// Next demuxed packet.
    pub fn get_packet(&mut self) -> Result<Pull<Packet>> {
        match &self.reader {
            Some(reader) if self.blocking_reads => reader.recv(),
            Some(reader) => reader.try_recv(),
            None => Ok(Pull::Eof),
        }
    }

    /// Loops remain to be played.
    pub fn can_loop(&self) -> bool {
        self.loops_left != 0
    }

    /// Rewinds the file for the next loop iteration.
    ///
    /// The length of the iteration just played is folded into the timeline
    /// duration so the next iteration's timestamps continue after it.
    pub fn seek_to_start(&mut self) -> Result<()> {
        let blocking = self.blocking_reads;
        self.stop_reader()?;
        let demuxer = self.demuxer.as_mut().ok_or_else(|| TranscodeError::Demux {
            file: self.index,
            reason: "demuxer unavailable".into(),
        })?;
        demuxer.seek(self.seek_timestamp).map_err(|err| TranscodeError::Demux {
            file: self.index,
            reason: format!("seek to start failed: {}", err),
        })?;

        let has_audio = self
            .streams
            .iter()
            .any(|ist| ist.media_type() == MediaType::Audio && ist.nb_samples > 0);

        for ist in &self.streams {
            let (min, max) = match (ist.min_pts, ist.max_pts) {
                (Some(min), Some(max)) => (min, max),
                _ => continue,
            };
            let duration = match ist.last_frame_duration(has_audio) {
                Some(duration) => duration,
                None => continue,
            };
            self.timeline
                .extend_duration(loop_duration(duration, min, max), ist.time_base());
        }

        if self.loops_left > 0 {
            self.loops_left -= 1;
        }
        log::debug!(
            "input #{} looping, duration {} ({}), {} loop(s) left",
            self.index,
            self.timeline.duration,
            self.timeline.time_base,
            self.loops_left
        );

        self.start_reader(blocking && !self.non_blocking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::mock::{MockEngine, MockSource};
    use crate::av::transcode::TranscodeStats;
    use crate::av::{CodecParameters, StreamInfo};
    use pretty_assertions::assert_eq;

    fn read_all(file: &mut InputFile, options: &TranscodeOptions) -> Vec<Packet> {
        let mut stats = TranscodeStats::default();
        let mut packets = Vec::new();
        while let Pull::Ready(mut pkt) = file.get_packet().unwrap() {
            let ist = &mut file.streams[pkt.stream_index];
            ist.correct_timestamps(&mut pkt, &mut file.timeline, options, &mut stats);
            ist.begin_packet(Some(&pkt));
            ist.advance_copy_timestamps(&pkt);
            packets.push(pkt);
        }
        packets
    }

    #[test]
    fn test_loop_duration_ignores_overflowing_span() {
        assert_eq!(loop_duration(1, 0, 9), 10);
        assert_eq!(loop_duration(1, 5, 5), 1);
        assert_eq!(loop_duration(1, i64::MIN, i64::MAX), 1);
        assert_eq!(loop_duration(10, 0, i64::MAX - 5), 10);
    }

    #[test]
    fn test_extend_duration_keeps_longest() {
        let mut timeline = InputTimeline::default();
        timeline.extend_duration(10, Rational::new(1, 25));
        assert_eq!(timeline.duration, 10);
        timeline.extend_duration(9000, Rational::new(1, 90000));
        assert_eq!(timeline.time_base, Rational::new(1, 25));
        timeline.extend_duration(90000, Rational::new(1, 90000));
        assert_eq!(timeline.duration, 90000);
        assert_eq!(timeline.time_base, Rational::new(1, 90000));
    }

    #[test]
    fn test_loop_continues_timestamps() {
        let options = TranscodeOptions::default();
        let tb = Rational::new(1, 25);
        let mut engine = MockEngine::new().with_input(
            "loop.raw",
            MockSource::new().with_video_stream(tb, Rational::new(25, 1), 10),
        );
        let config = InputFileConfig::new("loop.raw").with_loop(1);
        let mut file = InputFile::open(0, &config, &mut engine, &options).unwrap();
        file.streams[0].discard = false;
        file.start_reader(true).unwrap();

        let first = read_all(&mut file, &options);
        assert_eq!(first.len(), 10);
        assert!(file.can_loop());

        file.seek_to_start().unwrap();
        assert_eq!(file.timeline.duration, 10);
        assert_eq!(file.timeline.time_base, tb);
        assert_eq!(file.loops_left, 0);

        let second = read_all(&mut file, &options);
        let pts: Vec<_> = second.iter().map(|p| p.pts.unwrap()).collect();
        assert_eq!(pts, (10..20).collect::<Vec<_>>());
        file.stop_reader().unwrap();
    }

    #[test]
    fn test_loop_duration_prefers_audio() {
        let options = TranscodeOptions::default();
        let video_tb = Rational::new(1, 25);
        let audio_tb = Rational::new(1, 48000);
        let mut engine = MockEngine::new().with_input(
            "av.raw",
            MockSource::new()
                .with_stream(StreamInfo::new(
                    0,
                    video_tb,
                    CodecParameters::video("raw", 64, 64).with_frame_rate(Rational::new(25, 1)),
                ))
                .with_stream(StreamInfo::new(
                    1,
                    audio_tb,
                    CodecParameters::audio("pcm", 48000, 2, 1024),
                )),
        );
        let mut file =
            InputFile::open(0, &InputFileConfig::new("av.raw").with_loop(-1), &mut engine, &options)
                .unwrap();
        file.streams[0].min_pts = Some(0);
        file.streams[0].max_pts = Some(24);
        file.streams[1].min_pts = Some(0);
        file.streams[1].max_pts = Some(48000 - 1024);
        file.streams[1].nb_samples = 1024;

        file.seek_to_start().unwrap();
        // only the audio stream counts once it carries sample information
        assert_eq!(file.timeline.duration, 48000);
        assert_eq!(file.timeline.time_base, audio_tb);
        assert_eq!(file.loops_left, -1);
        file.stop_reader().unwrap();
    }

    #[test]
    fn test_start_time_sets_offset() {
        let options = TranscodeOptions::default();
        let mut engine = MockEngine::new().with_input(
            "start.raw",
            MockSource::new()
                .with_video_stream(Rational::new(1, 25), Rational::new(25, 1), 5)
                .with_start_time(2_000_000),
        );
        let config = InputFileConfig::new("start.raw").with_ts_offset(500_000);
        let file = InputFile::open(0, &config, &mut engine, &options).unwrap();
        assert_eq!(file.timeline.ts_offset, 500_000 - 2_000_000);
        assert_eq!(file.seek_timestamp, 2_000_000);
    }
}

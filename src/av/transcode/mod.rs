//! The transcoding driver.
//!
//! A [`Transcoder`] owns every input file, filter graph and output file of a
//! job and runs a single-threaded scheduling loop over them. Each iteration
//! picks the output stream that lags furthest behind, works out which input
//! has to be read to advance it, and pushes the result through decoding,
//! filtering, resynchronization, encoding and muxing. Demuxing is the only
//! work that happens on other threads.
//!
//! ```rust
//! use avtranscode::av::mock::{MockEngine, MockSource};
//! use avtranscode::av::transcode::Transcoder;
//! use avtranscode::config::{InputFileConfig, OutputFileConfig, OutputStreamConfig, TranscodeJob, TranscodeOptions};
//! use avtranscode::utils::Rational;
//!
//! let engine = MockEngine::new().with_input(
//!     "clip.raw",
//!     MockSource::new().with_video_stream(Rational::new(1, 25), Rational::new(25, 1), 25),
//! );
//! let job = TranscodeJob::new(TranscodeOptions::default())
//!     .input(InputFileConfig::new("clip.raw"))
//!     .output(OutputFileConfig::new("clip.mkv").with_stream(OutputStreamConfig::encode(0, 0, "ffv1")));
//!
//! let stats = Transcoder::new(job, Box::new(engine))?.run()?;
//! assert_eq!(stats.packets_written, 25);
//! # Ok::<(), avtranscode::TranscodeError>(())
//! ```

mod filter;
mod pipeline;
mod setup;
pub mod stats;

pub use filter::{EndpointChain, FilterGraph, GraphChains, InputFilter, OutputFilter};
pub use stats::TranscodeStats;

use crate::av::MediaEngine;
use crate::codec::{OutputSource, StreamRef};
use crate::config::TranscodeOptions;
use crate::error::{Result, TranscodeError};
use crate::format::{InputFile, OutputFile};
use crate::utils::{rescale_q, TIME_BASE_Q};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Cloneable handle used to ask a running transcoder to stop.
///
/// The flag is polled once per scheduling iteration. An interrupted run
/// still flushes its encoders and writes trailers.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Outcome of one scheduling iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Done,
}

pub struct Transcoder {
    options: TranscodeOptions,
    engine: Box<dyn MediaEngine>,
    inputs: Vec<InputFile>,
    graphs: Vec<FilterGraph>,
    outputs: Vec<OutputFile>,
    stats: TranscodeStats,
    interrupt: InterruptHandle,
}

impl Transcoder {
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub fn stats(&self) -> &TranscodeStats {
        &self.stats
    }

    pub fn options(&self) -> &TranscodeOptions {
        &self.options
    }

    /// Runs the job to completion and returns the run counters.
    pub fn run(mut self) -> Result<TranscodeStats> {
        let result = self.transcode_init().and_then(|_| self.main_loop());
        if let Err(err) = result {
            log::error!("transcoding failed: {}", err);
            self.stop_readers();
            return Err(err);
        }
        self.finish()?;
        log::info!("{}", self.stats);
        Ok(self.stats)
    }

    /// Runs the job on tokio's blocking pool.
    pub async fn run_async(self) -> Result<TranscodeStats> {
        tokio::task::spawn_blocking(move || self.run())
            .await
            .map_err(|err| TranscodeError::Task(err.to_string()))?
    }

    /// Initializes every stream that does not wait for a filter graph and
    /// starts the reader threads.
    fn transcode_init(&mut self) -> Result<()> {
        for f in 0..self.outputs.len() {
            for s in 0..self.outputs[f].streams.len() {
                if let OutputSource::Copy(_) = self.outputs[f].streams[s].source {
                    self.init_output_stream(StreamRef::new(f, s))?;
                }
            }
            self.outputs[f].check_init(&self.options, &mut self.stats)?;
        }

        let single_input = self.inputs.len() == 1;
        for file in &mut self.inputs {
            file.start_reader(single_input)?;
        }
        log::info!(
            "transcoding {} input(s) into {} output(s) through {} filter graph(s)",
            self.inputs.len(),
            self.outputs.len(),
            self.graphs.len()
        );
        Ok(())
    }

    fn main_loop(&mut self) -> Result<()> {
        while !self.interrupt.is_interrupted() {
            if !self.need_output() {
                log::debug!("no more output streams to write to, finishing");
                break;
            }
            if self.transcode_step()? == Step::Done {
                break;
            }
        }
        if self.interrupt.is_interrupted() {
            log::info!("received interrupt, finishing");
            self.stats.interrupted = true;
        }
        Ok(())
    }

    /// True while some output stream still wants data.
    fn need_output(&mut self) -> bool {
        for file in &mut self.outputs {
            file.apply_shortest();
        }
        for file in &mut self.outputs {
            let mut limit_reached = false;
            let mut wanted = false;
            for ost in &file.streams {
                if ost.is_finished() {
                    continue;
                }
                if ost.frame_number() >= ost.max_frames {
                    limit_reached = true;
                    continue;
                }
                wanted = true;
            }
            if limit_reached {
                file.close_all();
                continue;
            }
            if wanted {
                return true;
            }
        }
        false
    }

    /// The output stream to advance next: uninitialized streams with live
    /// inputs first, then the smallest muxed DTS. Streams that have not
    /// muxed anything yet count as being at the very start.
    fn choose_output(&self) -> Option<StreamRef> {
        let mut candidates = Vec::new();
        for (f, file) in self.outputs.iter().enumerate() {
            for (s, ost) in file.streams.iter().enumerate() {
                if ost.is_finished() || ost.unavailable {
                    continue;
                }
                if !ost.initialized && !ost.inputs_done {
                    return Some(StreamRef::new(f, s));
                }
                let position = match ost.last_mux_dts {
                    Some(dts) => rescale_q(dts, ost.st_time_base, TIME_BASE_Q),
                    None => {
                        log::trace!(
                            "output stream #{}:{} has no muxed dts yet",
                            f,
                            s
                        );
                        i64::MIN
                    }
                };
                candidates.push((position, StreamRef::new(f, s)));
            }
        }
        candidates
            .into_iter()
            .min_by_key(|(position, _)| *position)
            .map(|(_, target)| target)
    }

    /// Some source stalled during this round.
    fn got_eagain(&self) -> bool {
        self.inputs.iter().any(|file| file.eagain)
            || self
                .outputs
                .iter()
                .flat_map(|file| file.streams.iter())
                .any(|ost| ost.unavailable)
    }

    fn reset_eagain(&mut self) {
        for file in &mut self.inputs {
            file.eagain = false;
        }
        for ost in self.outputs.iter_mut().flat_map(|file| file.streams.iter_mut()) {
            ost.unavailable = false;
        }
    }

    fn transcode_step(&mut self) -> Result<Step> {
        let target = match self.choose_output() {
            Some(target) => target,
            None => {
                if self.got_eagain() {
                    self.reset_eagain();
                    thread::sleep(Duration::from_millis(self.options.stall_sleep_ms));
                    return Ok(Step::Continue);
                }
                log::debug!("no more inputs to read from, finishing");
                return Ok(Step::Done);
            }
        };

        let source = self.outputs[target.file].streams[target.stream].source;
        let ist = match source {
            OutputSource::Filter(pad) => {
                if !self.graphs[pad.graph].is_configured() && self.graphs[pad.graph].all_inputs_known() {
                    self.configure_graph(pad.graph)?;
                }
                if self.graphs[pad.graph].is_configured() {
                    if !self.outputs[target.file].streams[target.stream].initialized {
                        self.init_output_stream(target)?;
                    }
                    match self.transcode_from_filter(pad.graph)? {
                        Some(ist) => ist,
                        None => return Ok(Step::Continue),
                    }
                } else {
                    let inputs = &self.inputs;
                    let starving = self.graphs[pad.graph].inputs.iter().find(|ifilter| {
                        let src = ifilter.source;
                        !inputs[src.file].streams[src.stream].got_output && !inputs[src.file].eof_reached
                    });
                    match starving {
                        Some(ifilter) => ifilter.source,
                        None => {
                            self.outputs[target.file].streams[target.stream].inputs_done = true;
                            return Ok(Step::Continue);
                        }
                    }
                }
            }
            OutputSource::Copy(ist) => ist,
        };

        if self.process_input(ist.file)?.is_ready() {
            self.reap_filters(false)?;
        } else if self.inputs[ist.file].eagain {
            self.outputs[target.file].streams[target.stream].unavailable = true;
        }
        Ok(Step::Continue)
    }

    fn stop_readers(&mut self) {
        for file in &mut self.inputs {
            if let Err(err) = file.stop_reader() {
                log::warn!("{}", err);
            }
        }
    }

    /// Drains decoders and encoders and finalizes every output file.
    fn finish(&mut self) -> Result<()> {
        self.stop_readers();

        for f in 0..self.inputs.len() {
            if self.inputs[f].eof_reached {
                continue;
            }
            for s in 0..self.inputs[f].streams.len() {
                let ist = StreamRef::new(f, s);
                loop {
                    let more = self.process_input_packet(ist, None, false)?;
                    if !more || !self.inputs[f].streams[s].decoding_needed {
                        break;
                    }
                }
            }
        }

        self.flush_encoders()?;

        for file in &mut self.outputs {
            file.write_trailer(&self.options)?;
        }

        let written: u64 = self.outputs.iter().map(OutputFile::packets_written).sum();
        if written == 0 && self.options.abort_on_empty_output {
            log::error!("empty output detected");
            return Err(TranscodeError::EmptyOutput);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::mock::{MockEngine, MockSource};
    use crate::config::{InputFileConfig, OutputFileConfig, OutputStreamConfig, TranscodeJob};
    use crate::utils::Rational;
    use pretty_assertions::assert_eq;

    fn two_file_job() -> Transcoder {
        let tb = Rational::new(1, 25);
        let rate = Rational::new(25, 1);
        let engine = MockEngine::new()
            .with_input("a.raw", MockSource::new().with_video_stream(tb, rate, 5))
            .with_input("b.raw", MockSource::new().with_video_stream(tb, rate, 5));
        let job = TranscodeJob::new(TranscodeOptions::default())
            .input(InputFileConfig::new("a.raw"))
            .input(InputFileConfig::new("b.raw"))
            .output(
                OutputFileConfig::new("out.mkv")
                    .with_stream(OutputStreamConfig::copy(0, 0))
                    .with_stream(OutputStreamConfig::encode(1, 0, "ffv1")),
            );
        Transcoder::new(job, Box::new(engine)).unwrap()
    }

    #[test]
    fn test_uninitialized_stream_served_first() {
        let mut transcoder = two_file_job();
        transcoder.outputs[0].streams[0].initialized = true;
        assert_eq!(transcoder.choose_output(), Some(StreamRef::new(0, 1)));
    }

    #[test]
    fn test_smallest_dts_wins() {
        let mut transcoder = two_file_job();
        for ost in &mut transcoder.outputs[0].streams {
            ost.initialized = true;
            ost.st_time_base = Rational::new(1, 1000);
        }
        transcoder.outputs[0].streams[0].last_mux_dts = Some(400);
        transcoder.outputs[0].streams[1].last_mux_dts = Some(120);
        assert_eq!(transcoder.choose_output(), Some(StreamRef::new(0, 1)));

        transcoder.outputs[0].streams[1].unavailable = true;
        assert_eq!(transcoder.choose_output(), Some(StreamRef::new(0, 0)));

        transcoder.outputs[0].streams[0].finished.encoder = true;
        assert_eq!(transcoder.choose_output(), None);
        assert!(transcoder.got_eagain());
        transcoder.reset_eagain();
        assert!(!transcoder.got_eagain());
    }

    #[test]
    fn test_unwritten_stream_served_first() {
        let mut transcoder = two_file_job();
        for ost in &mut transcoder.outputs[0].streams {
            ost.initialized = true;
            ost.st_time_base = Rational::new(1, 1000);
        }
        transcoder.outputs[0].streams[0].last_mux_dts = Some(0);
        assert_eq!(transcoder.choose_output(), Some(StreamRef::new(0, 1)));

        transcoder.outputs[0].streams[1].last_mux_dts = Some(40);
        assert_eq!(transcoder.choose_output(), Some(StreamRef::new(0, 0)));
    }

    #[test]
    fn test_copy_streams_from_two_files_interleave() {
        let tb = Rational::new(1, 25);
        let rate = Rational::new(25, 1);
        let engine = MockEngine::new()
            .with_input("a.raw", MockSource::new().with_video_stream(tb, rate, 6))
            .with_input("b.raw", MockSource::new().with_video_stream(tb, rate, 6));
        let recorder = engine.recorder();
        let job = TranscodeJob::new(TranscodeOptions::default())
            .input(InputFileConfig::new("a.raw"))
            .input(InputFileConfig::new("b.raw"))
            .output(
                OutputFileConfig::new("out.mkv")
                    .with_stream(OutputStreamConfig::copy(0, 0))
                    .with_stream(OutputStreamConfig::copy(1, 0)),
            );
        let mut transcoder = Transcoder::new(job, Box::new(engine)).unwrap();

        transcoder.transcode_init().unwrap();
        // let both reader threads fill their queues so no read stalls
        thread::sleep(Duration::from_millis(100));
        transcoder.main_loop().unwrap();
        transcoder.finish().unwrap();

        let order: Vec<(usize, Option<i64>)> = recorder
            .packets("out.mkv")
            .iter()
            .map(|pkt| (pkt.stream_index, pkt.dts))
            .collect();
        let expected: Vec<(usize, Option<i64>)> = (0..6)
            .flat_map(|dts| vec![(0, Some(dts)), (1, Some(dts))])
            .collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_frame_limit_closes_file() {
        let mut transcoder = two_file_job();
        transcoder.outputs[0].streams[0].max_frames = 0;
        assert!(!transcoder.need_output());
        assert!(transcoder
            .outputs[0]
            .streams
            .iter()
            .all(|ost| ost.finished.encoder));
    }

    #[test]
    fn test_interrupt_handle_shared() {
        let transcoder = two_file_job();
        let handle = transcoder.interrupt_handle();
        assert!(!transcoder.interrupt.is_interrupted());
        handle.interrupt();
        assert!(transcoder.interrupt.is_interrupted());
    }
}

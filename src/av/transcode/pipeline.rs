use super::filter::{EndpointChain, GraphChains};
use super::Transcoder;
use crate::av::{EncoderSetup, EndpointParams, Frame, MediaType, Packet, Pull};
use crate::codec::{InputStream, OutputSource, OutputStream, PadRef, StreamRef};
use crate::error::{Result, TranscodeError};
use crate::format::OutputFile;
use crate::utils::{log2, rescale_q, Rational, TIME_BASE_Q};

impl Transcoder {
    /// Reads and processes one packet of input file `f`.
    ///
    /// `Pull::Again` means nothing was processed: the file is stalled
    /// (`eagain` set) or has just reached its end (`eof_reached` set).
    pub(super) fn process_input(&mut self, f: usize) -> Result<Pull<()>> {
        let mut read = self.inputs[f].get_packet();
        if let Ok(Pull::Again) = read {
            self.inputs[f].eagain = true;
            return Ok(Pull::Again);
        }

        if !matches!(read, Ok(Pull::Ready(_))) && self.inputs[f].can_loop() {
            for s in 0..self.inputs[f].streams.len() {
                if !self.inputs[f].streams[s].decoding_needed {
                    continue;
                }
                if self.process_input_packet(StreamRef::new(f, s), None, true)? {
                    return Ok(Pull::Ready(()));
                }
                if let Some(decoder) = self.inputs[f].streams[s].decoder.as_mut() {
                    decoder.flush();
                }
            }
            read = match self.inputs[f].seek_to_start() {
                Ok(()) => self.inputs[f].get_packet(),
                Err(err) => {
                    log::warn!("{}: seek to start failed: {}", self.inputs[f].url, err);
                    Err(err)
                }
            };
            if let Ok(Pull::Again) = read {
                self.inputs[f].eagain = true;
                return Ok(Pull::Again);
            }
        }

        let mut pkt = match read {
            Ok(Pull::Ready(pkt)) => pkt,
            Ok(Pull::Again) => {
                self.inputs[f].eagain = true;
                return Ok(Pull::Again);
            }
            Ok(Pull::Eof) => return self.input_file_ended(f),
            Err(err) => {
                log::error!("{}: {}", self.inputs[f].url, err);
                if self.options.exit_on_error {
                    return Err(err);
                }
                return self.input_file_ended(f);
            }
        };

        self.reset_eagain();

        let s = pkt.stream_index;
        let file = &mut self.inputs[f];
        // streams appearing after the file was opened are ignored
        let ist = match file.streams.get_mut(s) {
            Some(ist) if !ist.discard => ist,
            _ => return Ok(Pull::Ready(())),
        };

        ist.packets_read += 1;
        ist.bytes_read += pkt.size() as u64;

        if pkt.corrupt {
            if self.options.exit_on_error {
                log::error!("{}: corrupt input packet in stream {}", file.url, s);
                return Err(TranscodeError::CorruptPacket { file: f, stream: s });
            }
            log::warn!("{}: corrupt input packet in stream {}", file.url, s);
            self.stats.corrupt_packets += 1;
        }

        ist.correct_timestamps(&mut pkt, &mut file.timeline, &self.options, &mut self.stats);
        self.process_input_packet(StreamRef::new(f, s), Some(&pkt), false)?;
        Ok(Pull::Ready(()))
    }

    /// Drains the decoders of a file that has no more packets and finishes
    /// the streams copied from it.
    fn input_file_ended(&mut self, f: usize) -> Result<Pull<()>> {
        for s in 0..self.inputs[f].streams.len() {
            let src = StreamRef::new(f, s);
            if self.inputs[f].streams[s].decoding_needed && self.process_input_packet(src, None, false)? {
                return Ok(Pull::Ready(()));
            }

            let targets = self.inputs[f].streams[s].copy_targets.clone();
            for target in targets {
                let ist = &self.inputs[f].streams[s];
                let timeline = &self.inputs[f].timeline;
                let OutputFile { mux, streams } = &mut self.outputs[target.file];
                let ost = &mut streams[target.stream];
                if !ost.finished.muxer {
                    ost.do_streamcopy(mux, ist, timeline, None, &self.options, &mut self.stats)?;
                }
                self.outputs[target.file].finish_stream(target.stream);
            }
        }

        log::debug!("input #{} ({}) reached end of file", f, self.inputs[f].url);
        self.inputs[f].eof_reached = true;
        Ok(Pull::Again)
    }

    /// Decodes (or copies) one packet of input stream `src`. `None` drains
    /// the decoder; with `no_eof` the filter inputs stay open, which is
    /// what looping needs.
    ///
    /// Returns false once the decoder has been fully drained.
    pub(super) fn process_input_packet(
        &mut self,
        src: StreamRef,
        pkt: Option<&Packet>,
        no_eof: bool,
    ) -> Result<bool> {
        self.inputs[src.file].streams[src.stream].begin_packet(pkt);

        let mut eof_reached = false;
        let mut repeating = false;
        while self.inputs[src.file].streams[src.stream].decoding_needed {
            let ist = &mut self.inputs[src.file].streams[src.stream];
            match ist.decode_step(pkt, repeating) {
                Ok(Pull::Ready(frame)) => {
                    ist.got_output = true;
                    self.send_frame_to_filters(src, frame)?;
                    if pkt.is_none() {
                        break;
                    }
                    repeating = true;
                }
                Ok(Pull::Again) => break,
                Ok(Pull::Eof) => {
                    eof_reached = true;
                    break;
                }
                Err(err) => {
                    log::error!("{}", err);
                    if self.options.exit_on_error {
                        return Err(err);
                    }
                    self.stats.decode_errors += 1;
                    break;
                }
            }
        }

        let decoding_needed = self.inputs[src.file].streams[src.stream].decoding_needed;
        if pkt.is_none() && decoding_needed && eof_reached && !no_eof {
            self.send_filter_eof(src)?;
        }

        if !decoding_needed {
            if let Some(pkt) = pkt {
                self.inputs[src.file].streams[src.stream].advance_copy_timestamps(pkt);
            }
        }

        let targets = self.inputs[src.file].streams[src.stream].copy_targets.clone();
        for target in targets {
            let file = &self.inputs[src.file];
            let ist = &file.streams[src.stream];
            let OutputFile { mux, streams } = &mut self.outputs[target.file];
            let ost = &mut streams[target.stream];
            if ost.finished.muxer || (pkt.is_some() && ost.is_finished()) {
                continue;
            }
            if let Some(start) = mux.start_time {
                if ist.pts.map_or(true, |pts| pts < start) {
                    continue;
                }
            }
            ost.do_streamcopy(mux, ist, &file.timeline, pkt, &self.options, &mut self.stats)?;
            self.outputs[target.file].apply_shortest();
        }

        Ok(!eof_reached)
    }

    fn send_frame_to_filters(&mut self, src: StreamRef, frame: Frame) -> Result<()> {
        let ist = &self.inputs[src.file].streams[src.stream];
        let rate = ist.framerate.or(ist.info.avg_frame_rate);
        let pads = ist.filters.clone();
        for pad in pads {
            self.ifilter_send_frame(pad, frame.clone(), rate)?;
        }
        Ok(())
    }

    /// Pushes a decoded frame into a graph input, (re)building the graph
    /// when the frame parameters changed. Frames arriving before every
    /// input of the graph is known are queued.
    fn ifilter_send_frame(&mut self, pad: PadRef, frame: Frame, rate: Option<Rational>) -> Result<()> {
        let graph = &mut self.graphs[pad.graph];
        let need_reinit = graph.inputs[pad.pad].needs_reinit(&frame);
        if need_reinit {
            let mut params = EndpointParams::from_frame(&frame);
            params.frame_rate = rate;
            graph.inputs[pad.pad].params = Some(params);
        }

        if need_reinit || !graph.is_configured() {
            if !graph.all_inputs_known() {
                graph.inputs[pad.pad].frame_queue.push_back(frame);
                return Ok(());
            }
            self.reap_filters(true)?;
            self.configure_graph(pad.graph)?;
        }

        let graph = &mut self.graphs[pad.graph];
        let handle = graph.handle.as_mut().ok_or_else(|| {
            TranscodeError::Filter(format!("filter graph {} is not configured", pad.graph))
        })?;
        handle.push(pad.pad, frame).map_err(|err| {
            TranscodeError::Filter(format!("error while filtering in graph {}: {}", pad.graph, err))
        })
    }

    fn send_filter_eof(&mut self, src: StreamRef) -> Result<()> {
        let ist = &self.inputs[src.file].streams[src.stream];
        let pts = ist.eof_pts();
        for pad in &ist.filters {
            self.graphs[pad.graph].close_input(pad.pad, pts, EndpointParams::from_stream(&ist.info))?;
        }
        Ok(())
    }

    /// Builds graph `g` with the adaptation chains its endpoints need.
    pub(super) fn configure_graph(&mut self, g: usize) -> Result<()> {
        let graph = &self.graphs[g];
        let mut chains = GraphChains::default();

        for ifilter in &graph.inputs {
            let file = &self.inputs[ifilter.source.file];
            let ist = &file.streams[ifilter.source.stream];
            let timeline = &file.timeline;
            let mut chain = EndpointChain {
                deinterlace: file.deinterlace,
                trim_duration: timeline.recording_time,
                ..EndpointChain::default()
            };
            if self.options.auto_rotate {
                chain.rotation = ist.info.rotation;
            }
            if let Some(start) = timeline.user_start_time {
                if file.accurate_seek {
                    chain.trim_start = Some(if self.options.copy_ts {
                        start + timeline.start_time.unwrap_or(0)
                    } else {
                        0
                    });
                }
            }
            chains.inputs.push(chain);
        }

        for ofilter in &graph.outputs {
            let mut chain = EndpointChain::default();
            if let Some(target) = ofilter.target {
                let file = &self.outputs[target.file];
                chain.trim_start = file.mux.start_time;
                chain.trim_duration = file.mux.recording_time;
                if ofilter.media_type == MediaType::Audio {
                    chain.frame_size = file.streams[target.stream].encoder_frame_size();
                }
            }
            chains.outputs.push(chain);
        }

        self.graphs[g].configure(self.engine.filters(), &chains)
    }

    /// Opens the encoder (or prepares the copy) of an output stream and
    /// writes the file header once every stream of the file is ready.
    pub(super) fn init_output_stream(&mut self, target: StreamRef) -> Result<()> {
        let ost = &mut self.outputs[target.file].streams[target.stream];
        if ost.initialized {
            return Ok(());
        }

        match ost.source {
            OutputSource::Copy(src) => {
                let ist = &self.inputs[src.file].streams[src.stream];
                ost.init_stream_copy(self.engine.as_mut(), ist)?;
            }
            OutputSource::Filter(pad) => {
                let params = self.graphs[pad.graph].outputs[pad.pad]
                    .params
                    .clone()
                    .ok_or_else(|| {
                        TranscodeError::Filter(format!(
                            "output stream #{}:{} is fed by an unconfigured filter graph",
                            target.file, target.stream
                        ))
                    })?;
                let source = ost
                    .source_stream
                    .map(|src| &self.inputs[src.file].streams[src.stream]);
                let setup = encoder_setup(ost, &params, source);
                ost.open_encoder(self.engine.as_mut(), &setup)?;

                let frame_size = ost.encoder_frame_size();
                if ost.media_type == MediaType::Audio && frame_size > 0 {
                    if let Some(handle) = self.graphs[pad.graph].handle.as_mut() {
                        handle.set_output_frame_size(pad.pad, frame_size);
                    }
                }
            }
        }

        self.outputs[target.file].check_init(&self.options, &mut self.stats)
    }

    /// Lets graph `g` produce output. Returns the input stream that has to
    /// be read for the graph to make progress, if any.
    pub(super) fn transcode_from_filter(&mut self, g: usize) -> Result<Option<StreamRef>> {
        let status = match self.graphs[g].handle.as_mut() {
            Some(handle) => handle.request_oldest()?,
            None => return Ok(None),
        };
        match status {
            Pull::Ready(()) => {
                self.reap_filters(false)?;
                return Ok(None);
            }
            Pull::Eof => {
                self.reap_filters(true)?;
                let targets: Vec<StreamRef> = self.graphs[g]
                    .outputs
                    .iter()
                    .filter_map(|ofilter| ofilter.target)
                    .collect();
                for target in targets {
                    let OutputFile { mux, streams } = &mut self.outputs[target.file];
                    streams[target.stream].close(mux);
                }
                return Ok(None);
            }
            Pull::Again => {}
        }

        let graph = &self.graphs[g];
        let handle = match graph.handle.as_ref() {
            Some(handle) => handle,
            None => return Ok(None),
        };
        let mut best = None;
        let mut most_requests = 0;
        for (i, ifilter) in graph.inputs.iter().enumerate() {
            let file = &self.inputs[ifilter.source.file];
            if file.eagain || file.eof_reached {
                continue;
            }
            let requests = handle.failed_requests(i);
            if requests > most_requests {
                most_requests = requests;
                best = Some(ifilter.source);
            }
        }

        if best.is_none() {
            let targets: Vec<StreamRef> = graph.outputs.iter().filter_map(|ofilter| ofilter.target).collect();
            for target in targets {
                self.outputs[target.file].streams[target.stream].unavailable = true;
            }
        }
        Ok(best)
    }

    /// Moves every frame already available at the graph outputs into the
    /// encoders. With `flush`, video streams whose graph ended also flush
    /// their duplication history.
    pub(super) fn reap_filters(&mut self, flush: bool) -> Result<()> {
        for f in 0..self.outputs.len() {
            for s in 0..self.outputs[f].streams.len() {
                let pad = match self.outputs[f].streams[s].filter_pad() {
                    Some(pad) => pad,
                    None => continue,
                };
                if !self.graphs[pad.graph].is_configured() {
                    continue;
                }
                if !self.outputs[f].streams[s].initialized {
                    self.init_output_stream(StreamRef::new(f, s))?;
                }
                self.reap_output(f, s, pad, flush)?;
                self.outputs[f].apply_shortest();
            }
        }
        Ok(())
    }

    fn reap_output(&mut self, f: usize, s: usize, pad: PadRef, flush: bool) -> Result<()> {
        let graph = &mut self.graphs[pad.graph];
        let simple_passthrough = graph.simple && matches!(graph.description.as_str(), "null" | "anull");
        let filter_rate = graph.outputs[pad.pad]
            .params
            .as_ref()
            .and_then(|params| params.frame_rate);
        let handle = match graph.handle.as_mut() {
            Some(handle) => handle,
            None => return Ok(()),
        };
        let OutputFile { mux, streams } = &mut self.outputs[f];
        let ost = &mut streams[s];

        loop {
            let mut frame = match handle.pull(pad.pad) {
                Ok(Pull::Ready(frame)) => frame,
                Ok(Pull::Again) => break,
                Ok(Pull::Eof) => {
                    if flush && ost.media_type == MediaType::Video {
                        ost.do_video_out(mux, None, None, 0.0, &self.options, &mut self.stats)?;
                    }
                    break;
                }
                Err(err) => {
                    log::warn!(
                        "error pulling frames from filter graph {} for output stream #{}:{}: {}",
                        pad.graph,
                        f,
                        s,
                        err
                    );
                    break;
                }
            };
            if ost.is_finished() {
                continue;
            }

            let enc_tb = ost.enc_time_base;
            let filter_tb = frame.time_base;
            let start = mux.start_time.unwrap_or(0);
            let float_pts = frame.pts.map(|pts| {
                let extra_bits = (29 - log2(enc_tb.den)).clamp(0, 16);
                let fine_tb = Rational::new(enc_tb.num, enc_tb.den << extra_bits);
                let ticks = rescale_q(pts, filter_tb, fine_tb) - rescale_q(start, TIME_BASE_Q, fine_tb);
                let value = ticks as f64 / (1i64 << extra_bits) as f64;
                // keep clear of exact midpoints
                let sign = if value > 0.0 { 1.0 } else { -1.0 };
                value + sign / (1 << 17) as f64
            });
            frame.pts = frame
                .pts
                .map(|pts| rescale_q(pts, filter_tb, enc_tb) - rescale_q(start, TIME_BASE_Q, enc_tb));

            match ost.media_type {
                MediaType::Video => {
                    let duration = frame_duration(ost, &frame, filter_rate, simple_passthrough);
                    ost.do_video_out(mux, Some(frame), float_pts, duration, &self.options, &mut self.stats)?;
                }
                MediaType::Audio => {
                    ost.do_audio_out(mux, frame, &self.options, &mut self.stats)?;
                }
                other => {
                    log::debug!("dropping filtered {} frame", other);
                }
            }
        }
        Ok(())
    }

    /// Drains every encoder. Streams that never received a frame are
    /// initialized from their input stream parameters first so the file
    /// still gets a valid header.
    pub(super) fn flush_encoders(&mut self) -> Result<()> {
        for f in 0..self.outputs.len() {
            for s in 0..self.outputs[f].streams.len() {
                let ost = &self.outputs[f].streams[s];
                let pad = match ost.filter_pad() {
                    Some(pad) if !ost.stream_copy => pad,
                    _ => continue,
                };

                if !ost.initialized {
                    log::warn!("finishing stream {}:{} without any data written to it", f, s);
                    if !self.graphs[pad.graph].is_configured() {
                        let inputs = &self.inputs;
                        for ifilter in &mut self.graphs[pad.graph].inputs {
                            if ifilter.params.is_none() {
                                let ist = &inputs[ifilter.source.file].streams[ifilter.source.stream];
                                ifilter.params = Some(EndpointParams::from_stream(&ist.info));
                            }
                        }
                        if !self.graphs[pad.graph].all_inputs_known() {
                            continue;
                        }
                        self.configure_graph(pad.graph)?;
                        self.outputs[f].finish_stream(s);
                    }
                    self.init_output_stream(StreamRef::new(f, s))?;
                }

                let OutputFile { mux, streams } = &mut self.outputs[f];
                streams[s].flush_encoder(mux, &self.options, &mut self.stats)?;
            }
        }
        Ok(())
    }
}

/// Encoder settings for a filter-fed stream.
///
/// The video rate comes from the user, then the graph output, then the
/// source stream, with 25 fps as last resort for streams that have a source.
fn encoder_setup(ost: &OutputStream, params: &EndpointParams, source: Option<&InputStream>) -> EncoderSetup {
    let mut frame_rate = ost.frame_rate.or(params.frame_rate).filter(|rate| rate.is_valid());
    if frame_rate.is_none() {
        if let Some(ist) = source {
            frame_rate = ist
                .framerate
                .or(ist.info.avg_frame_rate)
                .filter(|rate| rate.is_valid());
            if frame_rate.is_none() && ost.media_type == MediaType::Video {
                log::warn!(
                    "no information about the input framerate of output stream #{}:{}, falling back to 25fps",
                    ost.file_index,
                    ost.index
                );
                frame_rate = Some(Rational::new(25, 1));
            }
        }
    }

    let time_base = match ost.media_type {
        MediaType::Audio if params.sample_rate > 0 => Rational::new(1, params.sample_rate as i32),
        MediaType::Video => frame_rate
            .map(Rational::invert)
            .filter(|tb| tb.is_valid())
            .unwrap_or(params.time_base),
        _ => params.time_base,
    };

    EncoderSetup {
        media_type: ost.media_type,
        time_base,
        format: params.format,
        width: params.width,
        height: params.height,
        sample_aspect_ratio: params.sample_aspect_ratio,
        sample_rate: params.sample_rate,
        channels: params.channels,
        channel_layout: params.channel_layout,
        frame_rate: if ost.media_type == MediaType::Video {
            frame_rate
        } else {
            None
        },
    }
}

/// Expected duration of a filtered video frame, in encoder ticks.
fn frame_duration(
    ost: &OutputStream,
    frame: &Frame,
    filter_rate: Option<Rational>,
    simple_passthrough: bool,
) -> f64 {
    let enc_tb = ost.enc_time_base.as_f64();
    let mut duration = match filter_rate.filter(|rate| rate.num > 0 && rate.den > 0) {
        Some(rate) => 1.0 / (rate.as_f64() * enc_tb),
        None => 0.0,
    };
    if let Some(rate) = ost.frame_rate.filter(|rate| rate.is_valid()) {
        let forced = 1.0 / (rate.as_f64() * enc_tb);
        if duration == 0.0 || forced < duration {
            duration = forced;
        }
    }
    if simple_passthrough && frame.duration > 0 {
        let ticks = (frame.duration as f64 * frame.time_base.as_f64() / enc_tb).round();
        if ticks > 0.0 {
            duration = ticks;
        }
    }
    duration
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::mock::{MockEngine, MockSource};
    use crate::config::{InputFileConfig, OutputFileConfig, OutputStreamConfig, TranscodeJob};
    use pretty_assertions::assert_eq;

    fn video_ost(frame_rate: Option<Rational>) -> OutputStream {
        let mut config = OutputStreamConfig::encode(0, 0, "ffv1");
        config.frame_rate = frame_rate;
        OutputStream::new(0, 0, MediaType::Video, OutputSource::Filter(PadRef::new(0, 0)), &config)
    }

    fn endpoint(time_base: Rational, frame_rate: Option<Rational>) -> EndpointParams {
        let mut params = EndpointParams::from_frame(&Frame::video(64, 48, 0).with_time_base(time_base));
        params.frame_rate = frame_rate;
        params
    }

    #[test]
    fn test_encoder_time_base_follows_rate() {
        let ost = video_ost(None);
        let setup = encoder_setup(&ost, &endpoint(Rational::new(1, 90000), Some(Rational::new(30, 1))), None);
        assert_eq!(setup.time_base, Rational::new(1, 30));
        assert_eq!(setup.frame_rate, Some(Rational::new(30, 1)));

        let ost = video_ost(Some(Rational::new(50, 1)));
        let setup = encoder_setup(&ost, &endpoint(Rational::new(1, 90000), Some(Rational::new(30, 1))), None);
        assert_eq!(setup.time_base, Rational::new(1, 50));
    }

    #[test]
    fn test_encoder_time_base_without_rate() {
        let ost = video_ost(None);
        let setup = encoder_setup(&ost, &endpoint(Rational::new(1, 90000), None), None);
        assert_eq!(setup.time_base, Rational::new(1, 90000));
        assert_eq!(setup.frame_rate, None);
    }

    #[test]
    fn test_audio_time_base_is_sample_rate() {
        let config = OutputStreamConfig::encode(0, 0, "aac");
        let ost = OutputStream::new(0, 0, MediaType::Audio, OutputSource::Filter(PadRef::new(0, 0)), &config);
        let params = EndpointParams::from_frame(&Frame::audio(44100, 2, 0, 1024));
        let setup = encoder_setup(&ost, &params, None);
        assert_eq!(setup.time_base, Rational::new(1, 44100));
        assert_eq!(setup.frame_rate, None);
    }

    #[test]
    fn test_frame_duration() {
        let mut ost = video_ost(None);
        ost.enc_time_base = Rational::new(1, 25);
        let frame = Frame::video(64, 48, 0).with_time_base(Rational::new(1, 25));
        assert_eq!(frame_duration(&ost, &frame, Some(Rational::new(25, 1)), false), 1.0);
        assert_eq!(frame_duration(&ost, &frame, None, false), 0.0);

        ost.frame_rate = Some(Rational::new(50, 1));
        assert_eq!(frame_duration(&ost, &frame, Some(Rational::new(25, 1)), false), 0.5);

        let frame = frame.with_duration(2);
        assert_eq!(frame_duration(&ost, &frame, Some(Rational::new(25, 1)), true), 2.0);
    }

    #[test]
    fn test_eof_closes_filter_inputs() {
        let engine = MockEngine::new().with_input(
            "a.raw",
            MockSource::new().with_video_stream(Rational::new(1, 25), Rational::new(25, 1), 2),
        );
        let job = TranscodeJob::default()
            .input(InputFileConfig::new("a.raw"))
            .output(OutputFileConfig::new("out.mkv").with_stream(OutputStreamConfig::encode(0, 0, "ffv1")));
        let mut transcoder = Transcoder::new(job, Box::new(engine)).unwrap();
        transcoder.inputs[0].start_reader(true).unwrap();

        while !transcoder.inputs[0].eof_reached {
            transcoder.process_input(0).unwrap();
        }
        let graph = &transcoder.graphs[0];
        assert!(graph.is_configured());
        assert!(graph.inputs[0].eof);
        assert_eq!(transcoder.inputs[0].streams[0].packets_read, 2);
        transcoder.inputs[0].stop_reader().unwrap();
    }

    #[test]
    fn test_copy_stream_finished_at_eof() {
        let engine = MockEngine::new().with_input(
            "a.raw",
            MockSource::new().with_video_stream(Rational::new(1, 25), Rational::new(25, 1), 3),
        );
        let job = TranscodeJob::default()
            .input(InputFileConfig::new("a.raw"))
            .output(OutputFileConfig::new("out.mkv").with_stream(OutputStreamConfig::copy(0, 0)));
        let mut transcoder = Transcoder::new(job, Box::new(engine)).unwrap();
        transcoder.init_output_stream(StreamRef::new(0, 0)).unwrap();
        transcoder.inputs[0].start_reader(true).unwrap();

        while !transcoder.inputs[0].eof_reached {
            transcoder.process_input(0).unwrap();
        }
        let ost = &transcoder.outputs[0].streams[0];
        assert!(ost.finished.all());
        assert_eq!(ost.packets_written, 3);
        transcoder.inputs[0].stop_reader().unwrap();
    }
}

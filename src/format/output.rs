use crate::av::transcode::TranscodeStats;
use crate::av::{MediaEngine, MediaType, MuxStream, Muxer, MuxerCaps, Packet, Pull};
use crate::codec::{FinishState, OutputStream, VsyncMethod};
use crate::config::{OutputFileConfig, TranscodeOptions};
use crate::error::{Result, TranscodeError};
use crate::utils::{mid_pred, rescale_q};

/// The muxer of one output file plus the file-level state every stream of
/// the file consults on its way out.
pub struct MuxContext {
    pub file_index: usize,
    pub url: String,
    pub caps: MuxerCaps,
    pub header_written: bool,
    pub trailer_written: bool,
    /// Output start offset, engine time base
    pub start_time: Option<i64>,
    /// Output duration bound, engine time base
    pub recording_time: Option<i64>,
    pub shortest: bool,
    shortest_pending: bool,
    muxer: Box<dyn Muxer>,
}

impl MuxContext {
    pub fn new(file_index: usize, config: &OutputFileConfig, muxer: Box<dyn Muxer>) -> Self {
        Self {
            file_index,
            url: config.url.clone(),
            caps: muxer.capabilities(),
            header_written: false,
            trailer_written: false,
            start_time: config.start_time,
            recording_time: config.recording_time,
            shortest: config.shortest,
            shortest_pending: false,
            muxer,
        }
    }

    /// One stream ended and the others should follow.
    pub fn request_shortest_stop(&mut self) {
        self.shortest_pending = true;
    }

    /// Runs a packet (or the end-of-stream marker) through the stream's
    /// bitstream filters and hands every result to [`MuxContext::write_packet`].
    pub fn output_packet(
        &mut self,
        ost: &mut OutputStream,
        pkt: Option<Packet>,
        options: &TranscodeOptions,
        stats: &mut TranscodeStats,
    ) -> Result<()> {
        if ost.bsfs.is_empty() {
            if let Some(pkt) = pkt {
                self.write_packet(ost, pkt, false, options, stats)?;
            }
            return Ok(());
        }

        if let Err(err) = ost.bsfs[0].send_packet(pkt) {
            return self.bsf_failed(ost, err, options);
        }

        let count = ost.bsfs.len();
        let mut idx = 1;
        while idx > 0 {
            let received = match ost.bsfs[idx - 1].receive_packet() {
                Ok(received) => received,
                Err(err) => return self.bsf_failed(ost, err, options),
            };
            match received {
                Pull::Again => idx -= 1,
                Pull::Eof if idx < count => {
                    if let Err(err) = ost.bsfs[idx].send_packet(None) {
                        return self.bsf_failed(ost, err, options);
                    }
                    idx += 1;
                }
                Pull::Eof => break,
                Pull::Ready(pkt) if idx < count => {
                    if let Err(err) = ost.bsfs[idx].send_packet(Some(pkt)) {
                        return self.bsf_failed(ost, err, options);
                    }
                    idx += 1;
                }
                Pull::Ready(pkt) => self.write_packet(ost, pkt, false, options, stats)?,
            }
        }
        Ok(())
    }

    fn bsf_failed(
        &self,
        ost: &OutputStream,
        err: TranscodeError,
        options: &TranscodeOptions,
    ) -> Result<()> {
        log::error!(
            "error applying bitstream filters to an output packet for stream #{}:{}: {}",
            ost.file_index,
            ost.index,
            err
        );
        if options.exit_on_error {
            return Err(err);
        }
        Ok(())
    }

    /// Queues the packet until the header exists, then repairs its
    /// timestamps and writes it.
    ///
    /// `unqueue` is set while draining the pre-header queue so frame
    /// counting is not applied twice.
    pub fn write_packet(
        &mut self,
        ost: &mut OutputStream,
        mut pkt: Packet,
        unqueue: bool,
        options: &TranscodeOptions,
        stats: &mut TranscodeStats,
    ) -> Result<()> {
        let video_encoded = ost.media_type == MediaType::Video && !ost.stream_copy;
        if !video_encoded && !unqueue {
            if ost.vsync.frame_number >= ost.max_frames {
                return Ok(());
            }
            ost.vsync.frame_number += 1;
        }

        if !self.header_written {
            if !ost.muxing_queue.push(pkt) {
                let err = TranscodeError::MuxingQueueOverflow {
                    file: ost.file_index,
                    stream: ost.index,
                };
                log::error!("{}", err);
                return Err(err);
            }
            return Ok(());
        }

        if ost.media_type == MediaType::Video {
            if ost.vsync_method == VsyncMethod::Drop {
                pkt.pts = None;
                pkt.dts = None;
            }
            if let Some(rate) = ost.frame_rate {
                if ost.vsync_method.is_cfr() && rate.num != 0 {
                    pkt.duration = rescale_q(1, rate.invert(), ost.mux_time_base);
                }
            }
        }

        pkt.time_base = ost.mux_time_base;
        pkt.rescale_ts(ost.st_time_base);

        if !self.caps.no_timestamps {
            if let (Some(pts), Some(dts)) = (pkt.pts, pkt.dts) {
                if dts > pts {
                    let next = ost.last_mux_dts.map_or(i64::MIN + 1, |last| last + 1);
                    log::warn!(
                        "invalid DTS: {} PTS: {} in output stream #{}:{}, replacing by guess",
                        dts,
                        pts,
                        ost.file_index,
                        ost.index
                    );
                    let guess = mid_pred(pts, dts, next);
                    pkt.pts = Some(guess);
                    pkt.dts = Some(guess);
                    stats.repaired_mux_dts += 1;
                }
            }
            if matches!(
                ost.media_type,
                MediaType::Audio | MediaType::Video | MediaType::Subtitle
            ) {
                if let (Some(dts), Some(last)) = (pkt.dts, ost.last_mux_dts) {
                    let max = last + i64::from(self.caps.strict_timestamps);
                    if dts < max {
                        if options.exit_on_error {
                            let err = TranscodeError::NonMonotonicDts {
                                file: ost.file_index,
                                stream: ost.index,
                                previous: last,
                                current: dts,
                            };
                            log::error!("{}", err);
                            return Err(err);
                        }
                        log::warn!(
                            "non-monotonous DTS in output stream #{}:{}; previous: {}, current: {}; changing to {}",
                            ost.file_index,
                            ost.index,
                            last,
                            dts,
                            max
                        );
                        if let Some(pts) = pkt.pts {
                            if pts >= dts {
                                pkt.pts = Some(pts.max(max));
                            }
                        }
                        pkt.dts = Some(max);
                        stats.repaired_mux_dts += 1;
                    }
                }
            }
        }
        // timestamp-less packets (vsync drop) keep the stream's position
        if pkt.dts.is_some() {
            ost.last_mux_dts = pkt.dts;
        }

        ost.data_size += pkt.size() as u64;
        ost.packets_written += 1;
        pkt.stream_index = ost.index;
        stats.record_written(pkt.size());

        log::trace!(
            "muxer <- type:{} pkt_pts:{:?} pkt_dts:{:?} size:{}",
            ost.media_type,
            pkt.pts,
            pkt.dts,
            pkt.size()
        );

        if let Err(err) = self.muxer.write_packet(&pkt) {
            ost.finished = FinishState {
                encoder: true,
                muxer: true,
            };
            let err = TranscodeError::Mux {
                file: self.file_index,
                reason: err.to_string(),
            };
            log::error!("{}", err);
            return Err(err);
        }
        Ok(())
    }
}

/// An output file: its muxer and the streams written into it.
pub struct OutputFile {
    pub mux: MuxContext,
    pub streams: Vec<OutputStream>,
}

impl OutputFile {
    pub fn open(index: usize, config: &OutputFileConfig, engine: &mut dyn MediaEngine) -> Result<Self> {
        let muxer = engine.open_output(&config.url, config.format.as_deref())?;
        let mux = MuxContext::new(index, config, muxer);
        log::info!(
            "output #{}, {}, to '{}'",
            index,
            if mux.caps.format_name.is_empty() {
                "auto"
            } else {
                mux.caps.format_name.as_str()
            },
            config.url
        );
        Ok(Self {
            mux,
            streams: Vec::new(),
        })
    }

    pub fn index(&self) -> usize {
        self.mux.file_index
    }

    /// Writes the header once every stream is initialized, then flushes
    /// the pre-header queues in stream order.
    pub fn check_init(&mut self, options: &TranscodeOptions, stats: &mut TranscodeStats) -> Result<()> {
        if self.mux.header_written || !self.streams.iter().all(|ost| ost.initialized) {
            return Ok(());
        }

        let mut announced = Vec::with_capacity(self.streams.len());
        for ost in &self.streams {
            let params = ost.params.clone().ok_or_else(|| TranscodeError::Header {
                file: self.mux.file_index,
                reason: format!("stream {} has no codec parameters", ost.index),
            })?;
            announced.push(MuxStream {
                index: ost.index,
                params,
                time_base: ost.mux_time_base,
            });
        }

        let time_bases = self
            .mux
            .muxer
            .write_header(&announced)
            .map_err(|err| TranscodeError::Header {
                file: self.mux.file_index,
                reason: err.to_string(),
            })?;
        self.mux.header_written = true;
        log::info!(
            "output #{} ({}): header written for {} stream(s)",
            self.mux.file_index,
            self.mux.url,
            self.streams.len()
        );

        for (i, ost) in self.streams.iter_mut().enumerate() {
            if let Some(tb) = time_bases.get(i).filter(|tb| tb.is_valid()) {
                ost.st_time_base = *tb;
            }
            if ost.muxing_queue.is_empty() {
                ost.mux_time_base = ost.st_time_base;
            }
            while let Some(pkt) = ost.muxing_queue.pop() {
                self.mux.write_packet(ost, pkt, true, options, stats)?;
            }
        }
        Ok(())
    }

    /// Propagates a pending shortest stop to every stream of the file.
    pub fn apply_shortest(&mut self) {
        if !self.mux.shortest_pending {
            return;
        }
        self.mux.shortest_pending = false;
        let muxer_done = self.streams.iter().any(|ost| ost.finished.muxer);
        for ost in &mut self.streams {
            ost.finished.encoder = true;
            ost.finished.muxer |= muxer_done;
        }
        log::debug!("output #{}: shortest stream ended, closing all streams", self.mux.file_index);
    }

    /// Stops every stream, e.g. once a frame limit is reached.
    pub fn close_all(&mut self) {
        for ost in &mut self.streams {
            ost.finished.encoder = true;
        }
    }

    /// Finishes one stream completely.
    pub fn finish_stream(&mut self, index: usize) {
        if let Some(ost) = self.streams.get_mut(index) {
            ost.finish(&mut self.mux);
        }
        self.apply_shortest();
    }

    pub fn packets_written(&self) -> u64 {
        self.streams.iter().map(|ost| ost.packets_written).sum()
    }

    /// Finalizes the file. A file whose header never got written is
    /// reported and skipped.
    pub fn write_trailer(&mut self, options: &TranscodeOptions) -> Result<()> {
        if !self.mux.header_written {
            log::error!(
                "nothing was written into output file #{} ({}), because at least one of its streams received no packets",
                self.mux.file_index,
                self.mux.url
            );
            return Ok(());
        }
        if self.mux.trailer_written {
            return Ok(());
        }
        self.mux.trailer_written = true;
        if let Err(err) = self.mux.muxer.write_trailer() {
            log::error!("error writing trailer of {}: {}", self.mux.url, err);
            if options.exit_on_error {
                return Err(TranscodeError::Mux {
                    file: self.mux.file_index,
                    reason: err.to_string(),
                });
            }
        }
        Ok(())
    }
}

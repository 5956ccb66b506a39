//! Video frame-rate resynchronization.
//!
//! Decoded frames rarely line up with the output cadence. For every incoming
//! frame the [`VsyncState`] decides how many output frames to emit (0 drops,
//! more than 1 duplicates) and how many of those repeat the previous picture.

use crate::error::TranscodeError;
use crate::utils::mid_pred;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VsyncMethod {
    /// Chosen per output from the muxer capabilities
    Auto,
    /// Timestamps pass through untouched
    Passthrough,
    /// Constant frame rate: frames are duplicated/dropped to keep the cadence
    Cfr,
    /// Variable frame rate: frames may be dropped, never duplicated
    Vfr,
    /// Like passthrough, but timestamps are stripped at mux time
    Drop,
    /// CFR that does not fill an initial gap
    Vscfr,
}

impl VsyncMethod {
    /// Resolves `Auto` for a concrete output.
    ///
    /// `single_plain_input` is true when the source file has exactly one
    /// stream and no user timestamp offset.
    pub fn resolve(
        self,
        format_name: &str,
        variable_fps: bool,
        no_timestamps: bool,
        single_plain_input: bool,
        copy_ts: bool,
    ) -> VsyncMethod {
        if self != VsyncMethod::Auto {
            return self;
        }
        let mut method = if format_name == "avi" {
            VsyncMethod::Vfr
        } else if variable_fps {
            if no_timestamps {
                VsyncMethod::Passthrough
            } else {
                VsyncMethod::Vfr
            }
        } else {
            VsyncMethod::Cfr
        };
        if method == VsyncMethod::Cfr && (single_plain_input || copy_ts) {
            method = VsyncMethod::Vscfr;
        }
        method
    }

    pub fn is_cfr(self) -> bool {
        matches!(self, VsyncMethod::Cfr | VsyncMethod::Vscfr)
    }
}

impl fmt::Display for VsyncMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VsyncMethod::Auto => "auto",
            VsyncMethod::Passthrough => "passthrough",
            VsyncMethod::Cfr => "cfr",
            VsyncMethod::Vfr => "vfr",
            VsyncMethod::Drop => "drop",
            VsyncMethod::Vscfr => "vscfr",
        };
        f.write_str(name)
    }
}

impl FromStr for VsyncMethod {
    type Err = TranscodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" | "-1" => Ok(VsyncMethod::Auto),
            "passthrough" | "0" => Ok(VsyncMethod::Passthrough),
            "cfr" | "1" => Ok(VsyncMethod::Cfr),
            "vfr" | "2" => Ok(VsyncMethod::Vfr),
            "drop" => Ok(VsyncMethod::Drop),
            "vscfr" => Ok(VsyncMethod::Vscfr),
            _ => Err(TranscodeError::Config(format!("invalid vsync method: {}", s))),
        }
    }
}

/// Limits that do not change over the life of a stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VsyncParams {
    pub method: VsyncMethod,
    /// CFR frames whose delta falls below this are dropped; 0 disables
    pub frame_drop_threshold: f64,
    /// Duplication beyond `dts_error_threshold * 30` frames is refused
    pub dts_error_threshold: f64,
}

/// Outcome of one resynchronization step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VsyncDecision {
    /// Output frames to emit for this input frame
    pub nb_frames: i64,
    /// How many of those repeat the previous frame
    pub nb0_frames: i64,
    /// Frames dropped by this step
    pub dropped: u64,
    /// Frames duplicated by this step
    pub duplicated: u64,
    /// The duplication count exceeded the safety cap and was refused
    pub overflow: bool,
}

/// Per-output-stream resynchronization state.
#[derive(Debug, Clone, Default)]
pub struct VsyncState {
    /// Output timeline cursor, in encoder time base units
    pub sync_opts: i64,
    /// Frames submitted to the encoder so far
    pub frame_number: u64,
    last_nb0_frames: [i64; 3],
    last_dropped: bool,
}

impl VsyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides what to emit for a frame at `sync_ipts` (encoder time base,
    /// fractional), or for the end-of-stream flush when `sync_ipts` is `None`.
    ///
    /// `duration` is the expected frame duration in encoder ticks and
    /// `frames_left` caps the emitted count (`max_frames` bookkeeping).
    pub fn decide(
        &mut self,
        params: &VsyncParams,
        sync_ipts: Option<f64>,
        mut duration: f64,
        frames_left: u64,
    ) -> VsyncDecision {
        let mut nb_frames: i64;
        let mut nb0_frames: i64;

        match sync_ipts {
            None => {
                let median = mid_pred(
                    self.last_nb0_frames[0],
                    self.last_nb0_frames[1],
                    self.last_nb0_frames[2],
                );
                nb_frames = median;
                nb0_frames = median;
            }
            Some(mut sync_ipts) => {
                let method = params.method;
                let mut delta0 = sync_ipts - self.sync_opts as f64;
                let mut delta = delta0 + duration;

                nb0_frames = 0;
                nb_frames = 1;

                if delta0 < 0.0
                    && delta > 0.0
                    && method != VsyncMethod::Passthrough
                    && method != VsyncMethod::Drop
                {
                    if delta0 < -0.6 {
                        log::debug!("past duration {:.3} too large", -delta0);
                    } else {
                        log::trace!("clipping frame in rate conversion by {:.3}", -delta0);
                    }
                    sync_ipts = self.sync_opts as f64;
                    duration += delta0;
                    delta0 = 0.0;
                }

                match method {
                    VsyncMethod::Cfr | VsyncMethod::Vscfr => {
                        if method == VsyncMethod::Vscfr && self.frame_number == 0 && delta0 >= 0.5
                        {
                            log::debug!("not duplicating {} initial frames", delta0.round() as i64);
                            delta = duration;
                            delta0 = 0.0;
                            self.sync_opts = sync_ipts.round() as i64;
                        }
                        if params.frame_drop_threshold != 0.0
                            && delta < params.frame_drop_threshold
                            && self.frame_number > 0
                        {
                            nb_frames = 0;
                        } else if delta < -1.1 {
                            nb_frames = 0;
                        } else if delta > 1.1 {
                            nb_frames = delta.round() as i64;
                            if delta0 > 1.1 {
                                nb0_frames = (delta0 - 0.6).round() as i64;
                            }
                        }
                    }
                    VsyncMethod::Vfr => {
                        if delta <= -0.6 {
                            nb_frames = 0;
                        } else if delta > 0.6 {
                            self.sync_opts = sync_ipts.round() as i64;
                        }
                    }
                    VsyncMethod::Drop | VsyncMethod::Passthrough | VsyncMethod::Auto => {
                        self.sync_opts = sync_ipts.round() as i64;
                    }
                }
            }
        }

        let frames_left = i64::try_from(frames_left).unwrap_or(i64::MAX);
        nb_frames = nb_frames.min(frames_left).max(0);
        nb0_frames = nb0_frames.min(nb_frames).max(0);

        self.last_nb0_frames.rotate_right(1);
        self.last_nb0_frames[0] = nb0_frames;

        let mut decision = VsyncDecision {
            nb_frames,
            nb0_frames,
            ..Default::default()
        };

        if nb0_frames == 0 && self.last_dropped {
            decision.dropped += 1;
            log::trace!("dropping frame {}", self.frame_number);
        }

        let repeat_of_dropped = i64::from(nb0_frames > 0 && self.last_dropped);
        let fresh = i64::from(nb_frames > nb0_frames);
        if nb_frames > repeat_of_dropped + fresh {
            if nb_frames as f64 > params.dts_error_threshold * 30.0 {
                log::error!("{} frame duplication too large, skipping", nb_frames - 1);
                decision.dropped += 1;
                decision.overflow = true;
                decision.nb_frames = 0;
                decision.nb0_frames = 0;
                return decision;
            }
            decision.duplicated = (nb_frames - repeat_of_dropped - fresh) as u64;
            log::trace!("{} dup", nb_frames - 1);
        }
        self.last_dropped = nb_frames == nb0_frames && sync_ipts.is_some();

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    fn params(method: VsyncMethod) -> VsyncParams {
        VsyncParams {
            method,
            frame_drop_threshold: 0.0,
            dts_error_threshold: 3600.0 * 30.0,
        }
    }

    /// Runs frames through `decide`, advancing the cursor the way the encoder
    /// loop does, and returns the number of emitted frames per input frame.
    fn run(state: &mut VsyncState, p: &VsyncParams, pts: &[f64], duration: f64) -> Vec<i64> {
        pts.iter()
            .map(|&ts| {
                let d = state.decide(p, Some(ts), duration, u64::MAX);
                state.sync_opts += d.nb_frames;
                state.frame_number += d.nb_frames as u64;
                d.nb_frames
            })
            .collect()
    }

    #[test]
    fn test_cfr_one_frame_per_frame() {
        let mut state = VsyncState::new();
        let pts: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let out = run(&mut state, &params(VsyncMethod::Cfr), &pts, 1.0);
        assert!(out.iter().all(|&n| n == 1));
        assert_eq!(state.sync_opts, 50);
    }

    #[quickcheck]
    fn prop_cfr_fixed_point(start: u16, count: u8) -> bool {
        let mut state = VsyncState::new();
        state.sync_opts = start as i64;
        let pts: Vec<f64> = (0..count as i64).map(|i| (start as i64 + i) as f64).collect();
        let out = run(&mut state, &params(VsyncMethod::Cfr), &pts, 1.0);
        out.iter().all(|&n| n == 1)
    }

    #[test]
    fn test_cfr_duplicates_gap() {
        let mut state = VsyncState::new();
        let p = params(VsyncMethod::Cfr);
        run(&mut state, &p, &[0.0, 1.0], 1.0);
        // next frame arrives 3 frames late
        let d = state.decide(&p, Some(5.0), 1.0, u64::MAX);
        assert_eq!(d.nb_frames, 4);
        assert_eq!(d.nb0_frames, 2);
        assert_eq!(d.duplicated, 3);
    }

    #[test]
    fn test_cfr_drops_early_frame() {
        let mut state = VsyncState::new();
        let p = params(VsyncMethod::Cfr);
        run(&mut state, &p, &[0.0, 1.0, 2.0, 3.0], 1.0);
        let d = state.decide(&p, Some(1.0), 1.0, u64::MAX);
        assert_eq!(d.nb_frames, 0);
        // the drop is counted when the next frame does not reuse it
        let d = state.decide(&p, Some(4.0), 1.0, u64::MAX);
        assert_eq!(d.dropped, 1);
    }

    #[test]
    fn test_duplication_cap() {
        let mut state = VsyncState::new();
        let p = VsyncParams {
            dts_error_threshold: 1.0,
            ..params(VsyncMethod::Cfr)
        };
        run(&mut state, &p, &[0.0], 1.0);
        let d = state.decide(&p, Some(1_000_000.0), 1.0, u64::MAX);
        assert!(d.overflow);
        assert_eq!(d.nb_frames, 0);
        assert_eq!(d.dropped, 1);
        assert_eq!(d.duplicated, 0);
    }

    #[test]
    fn test_vfr_never_duplicates() {
        let mut state = VsyncState::new();
        let p = params(VsyncMethod::Vfr);
        let out = run(&mut state, &p, &[0.0, 1.0, 7.0, 8.0], 1.0);
        assert_eq!(out, vec![1, 1, 1, 1]);
        let d = state.decide(&p, Some(2.0), 1.0, u64::MAX);
        assert_eq!(d.nb_frames, 0);
    }

    #[test]
    fn test_vscfr_skips_initial_gap() {
        let mut state = VsyncState::new();
        let p = params(VsyncMethod::Vscfr);
        let d = state.decide(&p, Some(10.0), 1.0, u64::MAX);
        assert_eq!(d.nb_frames, 1);
        assert_eq!(state.sync_opts, 10);

        let mut cfr = VsyncState::new();
        let d = cfr.decide(&params(VsyncMethod::Cfr), Some(10.0), 1.0, u64::MAX);
        assert_eq!(d.nb_frames, 11);
    }

    #[test]
    fn test_clipping_overlapping_frame() {
        let mut state = VsyncState::new();
        let p = params(VsyncMethod::Cfr);
        run(&mut state, &p, &[0.0, 1.0], 1.0);
        // starts 0.4 before the cursor but ends after it
        let d = state.decide(&p, Some(1.6), 1.0, u64::MAX);
        assert_eq!(d.nb_frames, 1);
    }

    #[test]
    fn test_flush_uses_median_history() {
        let mut state = VsyncState::new();
        state.last_nb0_frames = [2, 0, 2];
        let d = state.decide(&params(VsyncMethod::Cfr), None, 1.0, u64::MAX);
        assert_eq!(d.nb_frames, 2);
        assert_eq!(d.nb0_frames, 2);
    }

    #[test]
    fn test_frames_left_caps_output() {
        let mut state = VsyncState::new();
        let d = state.decide(&params(VsyncMethod::Cfr), Some(9.0), 1.0, 3);
        assert_eq!(d.nb_frames, 3);
    }

    #[test]
    fn test_resolve_auto() {
        assert_eq!(
            VsyncMethod::Auto.resolve("mp4", false, false, false, false),
            VsyncMethod::Cfr
        );
        assert_eq!(
            VsyncMethod::Auto.resolve("mp4", false, false, true, false),
            VsyncMethod::Vscfr
        );
        assert_eq!(
            VsyncMethod::Auto.resolve("matroska", true, false, false, false),
            VsyncMethod::Vfr
        );
        assert_eq!(
            VsyncMethod::Auto.resolve("image2", true, true, false, false),
            VsyncMethod::Passthrough
        );
        assert_eq!(
            VsyncMethod::Auto.resolve("avi", false, false, false, false),
            VsyncMethod::Vfr
        );
        assert_eq!(
            VsyncMethod::Cfr.resolve("avi", false, false, true, true),
            VsyncMethod::Cfr
        );
        assert_eq!("VFR".parse::<VsyncMethod>().unwrap(), VsyncMethod::Vfr);
    }
}

use std::fmt;

/// Counters collected over one transcoding run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscodeStats {
    pub packets_written: u64,
    pub bytes_written: u64,
    pub frames_encoded: u64,
    pub frames_duplicated: u64,
    pub frames_dropped: u64,
    /// Duplication requests refused by the safety cap
    pub dup_overflows: u64,
    pub corrupt_packets: u64,
    /// Input timestamps invalidated by the discontinuity check
    pub discarded_timestamps: u64,
    /// Output packets whose DTS had to be repaired before muxing
    pub repaired_mux_dts: u64,
    pub decode_errors: u64,
    /// Termination was requested through an interrupt handle
    pub interrupted: bool,
    next_dup_warning: u64,
}

impl TranscodeStats {
    pub fn new(dup_warning: u64) -> Self {
        Self {
            next_dup_warning: dup_warning,
            ..Default::default()
        }
    }

    /// Adds duplicated frames, warning each time the total passes the
    /// current threshold (which then grows tenfold).
    pub fn record_duplicates(&mut self, count: u64) {
        if count == 0 {
            return;
        }
        self.frames_duplicated += count;
        if self.next_dup_warning > 0 && self.frames_duplicated > self.next_dup_warning {
            log::warn!("more than {} frames duplicated", self.next_dup_warning);
            self.next_dup_warning = self.next_dup_warning.saturating_mul(10);
        }
    }

    pub fn record_written(&mut self, bytes: usize) {
        self.packets_written += 1;
        self.bytes_written += bytes as u64;
    }
}

impl fmt::Display for TranscodeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "packets={} size={}B frames={} dup={} drop={}",
            self.packets_written,
            self.bytes_written,
            self.frames_encoded,
            self.frames_duplicated,
            self.frames_dropped
        )?;
        if self.decode_errors > 0 {
            write!(f, " decode_errors={}", self.decode_errors)?;
        }
        if self.interrupted {
            f.write_str(" (interrupted)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dup_warning_grows() {
        let mut stats = TranscodeStats::new(10);
        stats.record_duplicates(11);
        assert_eq!(stats.next_dup_warning, 100);
        stats.record_duplicates(50);
        assert_eq!(stats.next_dup_warning, 100);
        stats.record_duplicates(50);
        assert_eq!(stats.next_dup_warning, 1000);
        assert_eq!(stats.frames_duplicated, 111);
    }

    #[test]
    fn test_display() {
        let mut stats = TranscodeStats::new(1000);
        stats.record_written(188);
        stats.frames_dropped = 2;
        assert_eq!(
            stats.to_string(),
            "packets=1 size=188B frames=0 dup=0 drop=2"
        );
    }
}

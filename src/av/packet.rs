use crate::utils::Rational;
use bytes::Bytes;

/// A compressed unit of one elementary stream.
///
/// Timestamps are expressed in `time_base`; `None` means unknown.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub stream_index: usize,
    pub is_key: bool,
    pub corrupt: bool,
    /// Duration in `time_base` units, 0 when unknown
    pub duration: i64,
    pub time_base: Rational,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: None,
            dts: None,
            stream_index: 0,
            is_key: false,
            corrupt: false,
            duration: 0,
            time_base: Rational::new(1, 1),
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: i64) -> Self {
        self.dts = Some(dts);
        self
    }

    pub fn with_stream_index(mut self, index: usize) -> Self {
        self.stream_index = index;
        self
    }

    pub fn with_key_flag(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_time_base(mut self, time_base: Rational) -> Self {
        self.time_base = time_base;
        self
    }

    pub fn with_corrupt_flag(mut self, corrupt: bool) -> Self {
        self.corrupt = corrupt;
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Converts pts, dts and duration from the current time base to `dst`.
    pub fn rescale_ts(&mut self, dst: Rational) {
        let src = self.time_base;
        if src == dst {
            return;
        }
        self.pts = self.pts.map(|ts| crate::utils::rescale_q(ts, src, dst));
        self.dts = self.dts.map(|ts| crate::utils::rescale_q(ts, src, dst));
        if self.duration > 0 {
            self.duration = crate::utils::rescale_q(self.duration, src, dst);
        }
        self.time_base = dst;
    }
}

use super::MediaType;
use crate::utils::Rational;
use bytes::Bytes;

/// A decoded audio or video unit, or the filtered result thereof.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub media_type: MediaType,
    pub data: Bytes,
    /// Presentation timestamp in `time_base`
    pub pts: Option<i64>,
    pub time_base: Rational,
    /// Duration of the source packet in `time_base`, 0 when unknown
    pub duration: i64,
    pub format: i32,
    pub width: u32,
    pub height: u32,
    pub sample_aspect_ratio: Rational,
    pub sample_rate: u32,
    pub channels: u16,
    pub channel_layout: u64,
    pub nb_samples: usize,
    pub interlaced: bool,
}

impl Frame {
    pub fn video(width: u32, height: u32, format: i32) -> Self {
        Self {
            media_type: MediaType::Video,
            data: Bytes::new(),
            pts: None,
            time_base: Rational::new(1, 1),
            duration: 0,
            format,
            width,
            height,
            sample_aspect_ratio: Rational::new(0, 1),
            sample_rate: 0,
            channels: 0,
            channel_layout: 0,
            nb_samples: 0,
            interlaced: false,
        }
    }

    pub fn audio(sample_rate: u32, channels: u16, format: i32, nb_samples: usize) -> Self {
        Self {
            media_type: MediaType::Audio,
            data: Bytes::new(),
            pts: None,
            time_base: Rational::new(1, sample_rate.max(1) as i32),
            duration: 0,
            format,
            width: 0,
            height: 0,
            sample_aspect_ratio: Rational::new(0, 1),
            sample_rate,
            channels,
            channel_layout: 0,
            nb_samples,
            interlaced: false,
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_time_base(mut self, time_base: Rational) -> Self {
        self.time_base = time_base;
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }
}

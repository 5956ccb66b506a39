use crate::codec::VsyncMethod;
use crate::error::{Result, TranscodeError};
use crate::utils::Rational;
use std::env;
use std::fs;
use std::path::Path;

/// Files consulted by [`TranscodeOptions::load`], first match wins.
pub const CONFIG_PATHS: [&str; 2] = ["./transcode.toml", "./avtranscode.toml"];

const ENV_PREFIX: &str = "AVTRANSCODE_";

/// Process-wide transcoding policy.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeOptions {
    /// Turn correctable data anomalies (corrupt packets, non-monotonic DTS)
    /// into fatal errors
    pub exit_on_error: bool,
    /// Keep input timestamps instead of shifting them to start at zero
    pub copy_ts: bool,
    /// Timestamp jump (seconds) treated as a discontinuity in discontinuous formats
    pub dts_delta_threshold: f64,
    /// Timestamp jump (seconds) treated as invalid in continuous formats
    pub dts_error_threshold: f64,
    pub video_sync: VsyncMethod,
    /// CFR frames whose delta falls below this (in frames) are dropped; 0 disables
    pub frame_drop_threshold: f64,
    /// Fail the run if no packet at all was written
    pub abort_on_empty_output: bool,
    /// Default Packet Queue capacity per input
    pub thread_queue_size: usize,
    /// Insert rotation-correcting filters from stream metadata
    pub auto_rotate: bool,
    /// Warn whenever total duplicated frames pass this value (grows x10)
    pub dup_warning: u64,
    /// Idle sleep when every source is stalled, in milliseconds
    pub stall_sleep_ms: u64,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            exit_on_error: false,
            copy_ts: false,
            dts_delta_threshold: 10.0,
            dts_error_threshold: 3600.0 * 30.0,
            video_sync: VsyncMethod::Auto,
            frame_drop_threshold: 0.0,
            abort_on_empty_output: false,
            thread_queue_size: 8,
            auto_rotate: true,
            dup_warning: 1000,
            stall_sleep_ms: 10,
        }
    }
}

impl TranscodeOptions {
    /// Defaults, then the first config file found, then `AVTRANSCODE_*`
    /// environment variables.
    pub fn load() -> Result<Self> {
        let mut options = Self::default();
        for path in &CONFIG_PATHS {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                options.apply_str(&content)?;
                break;
            }
        }
        options.apply_env()?;
        Ok(options)
    }

    /// Applies `key = value` lines. Unknown keys are ignored, `#` starts a comment.
    pub fn apply_str(&mut self, content: &str) -> Result<()> {
        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() || line.starts_with('[') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                self.set(key.trim(), value)?;
            }
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        for (key, value) in env::vars() {
            if let Some(name) = key.strip_prefix(ENV_PREFIX) {
                self.set(&name.to_ascii_lowercase(), &value)?;
            }
        }
        Ok(())
    }

    /// Sets a single option by name.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "exit_on_error" => self.exit_on_error = parse_bool(key, value)?,
            "copy_ts" => self.copy_ts = parse_bool(key, value)?,
            "dts_delta_threshold" => self.dts_delta_threshold = value.parse()?,
            "dts_error_threshold" => self.dts_error_threshold = value.parse()?,
            "vsync" | "video_sync" => self.video_sync = value.parse()?,
            "frame_drop_threshold" => self.frame_drop_threshold = value.parse()?,
            "abort_on_empty_output" => self.abort_on_empty_output = parse_bool(key, value)?,
            "thread_queue_size" => self.thread_queue_size = value.parse()?,
            "auto_rotate" | "autorotate" => self.auto_rotate = parse_bool(key, value)?,
            "dup_warning" => self.dup_warning = value.parse()?,
            "stall_sleep_ms" => self.stall_sleep_ms = value.parse()?,
            _ => log::debug!("ignoring unknown option {}", key),
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(TranscodeError::Config(format!(
            "invalid boolean for {}: {}",
            key, value
        ))),
    }
}

/// How the reader thread reacts to a full Packet Queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    /// Always block until the main loop makes room
    Block,
    /// Try non-blocking sends; on the first overflow log once and switch to
    /// blocking sends for good, throttling the source instead of dropping
    EscalateOnOverflow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputFileConfig {
    pub url: String,
    /// Seek target and timeline origin, engine time base
    pub start_time: Option<i64>,
    /// Maximum duration read from the input, engine time base
    pub recording_time: Option<i64>,
    /// Extra loops after the first pass; -1 loops forever
    pub stream_loop: i32,
    /// Offset added to every timestamp, engine time base
    pub input_ts_offset: i64,
    /// Per-stream timestamp scale, indexed by stream; missing entries are 1.0
    pub ts_scale: Vec<f64>,
    /// Forced input frame rate for video streams
    pub frame_rate: Option<Rational>,
    pub thread_queue_size: Option<usize>,
    /// The main loop does not wait on an empty queue (live sources)
    pub non_blocking: bool,
    pub backpressure: Backpressure,
    /// Apply the start time inside the filter graph as well
    pub accurate_seek: bool,
    pub deinterlace: bool,
}

impl InputFileConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            start_time: None,
            recording_time: None,
            stream_loop: 0,
            input_ts_offset: 0,
            ts_scale: Vec::new(),
            frame_rate: None,
            thread_queue_size: None,
            non_blocking: false,
            backpressure: Backpressure::EscalateOnOverflow,
            accurate_seek: true,
            deinterlace: false,
        }
    }

    pub fn with_loop(mut self, count: i32) -> Self {
        self.stream_loop = count;
        self
    }

    pub fn with_start_time(mut self, start_time: i64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_recording_time(mut self, recording_time: i64) -> Self {
        self.recording_time = Some(recording_time);
        self
    }

    pub fn with_ts_offset(mut self, offset: i64) -> Self {
        self.input_ts_offset = offset;
        self
    }

    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.thread_queue_size = Some(size);
        self
    }

    pub fn with_non_blocking(mut self, non_blocking: bool) -> Self {
        self.non_blocking = non_blocking;
        self
    }
}

/// Where an output stream takes its data from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSource {
    /// An input elementary stream, either copied or run through a simple graph
    Input { file: usize, stream: usize },
    /// An output pad of a complex graph; `label: None` takes the first unbound pad
    Filter { graph: usize, label: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamCodec {
    /// Pass packets through without decoding
    Copy,
    /// Encode with the named encoder
    Encode(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputStreamConfig {
    pub source: StreamSource,
    pub codec: StreamCodec,
    /// Simple graph description; defaults to a passthrough for the media type
    pub filter: Option<String>,
    pub bitstream_filters: Vec<String>,
    pub frame_rate: Option<Rational>,
    /// Overrides the global video sync method
    pub vsync: Option<VsyncMethod>,
    pub max_frames: Option<u64>,
    /// Overrides the file recording time for this stream, engine time base
    pub recording_time: Option<i64>,
    pub copy_initial_nonkeyframes: bool,
    pub copy_prior_start: bool,
    /// Hard cap on the pre-header queue, in packets
    pub max_muxing_queue_size: usize,
    /// Bytes buffered before the hard cap starts to apply
    pub muxing_queue_data_threshold: usize,
}

impl OutputStreamConfig {
    pub fn new(source: StreamSource, codec: StreamCodec) -> Self {
        Self {
            source,
            codec,
            filter: None,
            bitstream_filters: Vec::new(),
            frame_rate: None,
            vsync: None,
            max_frames: None,
            recording_time: None,
            copy_initial_nonkeyframes: false,
            copy_prior_start: false,
            max_muxing_queue_size: 128,
            muxing_queue_data_threshold: 50 * 1024 * 1024,
        }
    }

    /// Stream copy of input stream `file:stream`.
    pub fn copy(file: usize, stream: usize) -> Self {
        Self::new(StreamSource::Input { file, stream }, StreamCodec::Copy)
    }

    /// Encode input stream `file:stream` with `codec` through a simple graph.
    pub fn encode(file: usize, stream: usize, codec: &str) -> Self {
        Self::new(
            StreamSource::Input { file, stream },
            StreamCodec::Encode(codec.to_string()),
        )
    }

    /// Encode a complex graph output with `codec`.
    pub fn from_graph(graph: usize, label: Option<&str>, codec: &str) -> Self {
        Self::new(
            StreamSource::Filter {
                graph,
                label: label.map(str::to_string),
            },
            StreamCodec::Encode(codec.to_string()),
        )
    }

    pub fn with_filter(mut self, description: &str) -> Self {
        self.filter = Some(description.to_string());
        self
    }

    pub fn with_bitstream_filter(mut self, name: &str) -> Self {
        self.bitstream_filters.push(name.to_string());
        self
    }

    pub fn with_frame_rate(mut self, rate: Rational) -> Self {
        self.frame_rate = Some(rate);
        self
    }

    pub fn with_vsync(mut self, method: VsyncMethod) -> Self {
        self.vsync = Some(method);
        self
    }

    pub fn with_max_frames(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    pub fn with_recording_time(mut self, recording_time: i64) -> Self {
        self.recording_time = Some(recording_time);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputFileConfig {
    pub url: String,
    pub format: Option<String>,
    /// Output timeline origin, engine time base
    pub start_time: Option<i64>,
    pub recording_time: Option<i64>,
    /// Finish every stream as soon as one of them finishes
    pub shortest: bool,
    pub streams: Vec<OutputStreamConfig>,
}

impl OutputFileConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            format: None,
            start_time: None,
            recording_time: None,
            shortest: false,
            streams: Vec::new(),
        }
    }

    pub fn with_stream(mut self, stream: OutputStreamConfig) -> Self {
        self.streams.push(stream);
        self
    }

    pub fn with_format(mut self, format: &str) -> Self {
        self.format = Some(format.to_string());
        self
    }

    pub fn with_shortest(mut self, shortest: bool) -> Self {
        self.shortest = shortest;
        self
    }

    pub fn with_recording_time(mut self, recording_time: i64) -> Self {
        self.recording_time = Some(recording_time);
        self
    }

    pub fn with_start_time(mut self, start_time: i64) -> Self {
        self.start_time = Some(start_time);
        self
    }
}

/// A filter graph with arbitrary fan-in/fan-out. Input pads labelled
/// `"F:S"` bind to input stream `S` of file `F`; unlabelled pads bind to the
/// first unused input stream of the matching media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexGraphConfig {
    pub description: String,
}

impl ComplexGraphConfig {
    pub fn new(description: &str) -> Self {
        Self {
            description: description.to_string(),
        }
    }
}

/// A fully resolved transcoding job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscodeJob {
    pub options: TranscodeOptions,
    pub inputs: Vec<InputFileConfig>,
    pub graphs: Vec<ComplexGraphConfig>,
    pub outputs: Vec<OutputFileConfig>,
}

impl TranscodeJob {
    pub fn new(options: TranscodeOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    pub fn input(mut self, input: InputFileConfig) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn graph(mut self, graph: ComplexGraphConfig) -> Self {
        self.graphs.push(graph);
        self
    }

    pub fn output(mut self, output: OutputFileConfig) -> Self {
        self.outputs.push(output);
        self
    }
}

/// Creates a commented option file if none exists at `path`.
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# avtranscode configuration
# Every key may also be set through an AVTRANSCODE_<KEY> environment variable.

exit_on_error = false
copy_ts = false
dts_delta_threshold = 10
dts_error_threshold = 108000
vsync = "auto"
thread_queue_size = 8
"#;
        fs::write(path, template)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let options = TranscodeOptions::default();
        assert_eq!(options.dts_delta_threshold, 10.0);
        assert_eq!(options.dts_error_threshold, 108000.0);
        assert_eq!(options.video_sync, VsyncMethod::Auto);
        assert!(!options.exit_on_error);
    }

    #[test]
    fn test_apply_str() {
        let mut options = TranscodeOptions::default();
        options
            .apply_str(
                "# comment\n[transcode]\nexit_on_error = true\nvsync = \"cfr\"\ndts_delta_threshold = 2.5 # inline\nunknown = 1\n",
            )
            .unwrap();
        assert!(options.exit_on_error);
        assert_eq!(options.video_sync, VsyncMethod::Cfr);
        assert_eq!(options.dts_delta_threshold, 2.5);
    }

    #[test]
    fn test_invalid_values() {
        let mut options = TranscodeOptions::default();
        assert!(options.set("copy_ts", "maybe").is_err());
        assert!(options.set("thread_queue_size", "-3").is_err());
        assert!(options.set("vsync", "sometimes").is_err());
    }

    #[test]
    fn test_job_builder() {
        let job = TranscodeJob::new(TranscodeOptions::default())
            .input(InputFileConfig::new("a.ts").with_loop(2))
            .output(
                OutputFileConfig::new("out.mkv")
                    .with_stream(OutputStreamConfig::copy(0, 0))
                    .with_shortest(true),
            );
        assert_eq!(job.inputs[0].stream_loop, 2);
        assert_eq!(job.outputs[0].streams[0].codec, StreamCodec::Copy);
        assert!(job.outputs[0].shortest);
    }
}

use std::num::{ParseFloatError, ParseIntError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("error reading input file #{file}: {reason}")]
    Demux { file: usize, reason: String },

    #[error("error muxing output file #{file}: {reason}")]
    Mux { file: usize, reason: String },

    #[error("could not write header for output file #{file} (incorrect codec parameters?): {reason}")]
    Header { file: usize, reason: String },

    #[error("decoder for input stream #{file}:{stream} ({codec}) not found")]
    DecoderNotFound {
        file: usize,
        stream: usize,
        codec: String,
    },

    #[error("encoder ({codec}) not found for output stream #{file}:{stream}")]
    EncoderNotFound {
        file: usize,
        stream: usize,
        codec: String,
    },

    #[error("error while decoding stream #{file}:{stream}: {reason}")]
    Decode {
        file: usize,
        stream: usize,
        reason: String,
    },

    #[error("{media} encoding failed for output stream #{file}:{stream}: {reason}")]
    Encode {
        file: usize,
        stream: usize,
        media: &'static str,
        reason: String,
    },

    #[error("filter graph error: {0}")]
    Filter(String),

    #[error(
        "simple filtergraph '{graph}' was expected to have exactly 1 input and 1 output, \
         but it had {inputs} input(s) and {outputs} output(s)"
    )]
    SimpleGraphTopology {
        graph: String,
        inputs: usize,
        outputs: usize,
    },

    #[error("too many packets buffered for output stream #{file}:{stream}")]
    MuxingQueueOverflow { file: usize, stream: usize },

    #[error("non-monotonic DTS in output stream #{file}:{stream}; previous: {previous}, current: {current}")]
    NonMonotonicDts {
        file: usize,
        stream: usize,
        previous: i64,
        current: i64,
    },

    #[error("corrupt input packet in stream #{file}:{stream}")]
    CorruptPacket { file: usize, stream: usize },

    #[error("output file is empty, nothing was encoded")]
    EmptyOutput,

    #[error("transcoding task failed: {0}")]
    Task(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error("parse float error: {0}")]
    ParseFloat(#[from] ParseFloatError),
}

pub type Result<T> = std::result::Result<T, TranscodeError>;

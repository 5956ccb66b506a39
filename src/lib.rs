#![doc(html_root_url = "https://docs.rs/avtranscode/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # avtranscode - multi-stream transcoding control plane
//!
//! `avtranscode` drives a transcoding job made of several input files, any
//! number of filter graphs and several output files. It decides what to read
//! next, repairs timestamps, resynchronizes video frame rates and gates the
//! muxers. The actual demuxing, decoding, filtering, encoding and muxing are
//! delegated to a [`MediaEngine`](av::MediaEngine) implementation.
//!
//! ## Features
//!
//! ### Scheduling
//! - Output-driven loop that always advances the stream lagging furthest behind
//! - One reader thread per input with bounded packet queues and backpressure
//! - Filter graphs that ask for the input they are starving on
//!
//! ### Timing
//! - Timestamp wrap, offset, scale and discontinuity correction
//! - Seamless input looping
//! - Passthrough, CFR, VFR, drop and variable-CFR video sync
//! - Monotonic muxing DTS with repair of out-of-order timestamps
//!
//! ### Muxing
//! - Header written once every stream of a file is ready, with pre-header queues
//! - Bitstream filter chains, frame limits, recording time and `shortest`
//!
//! ## Quick Start
//!
//! ```rust
//! use avtranscode::av::mock::{MockEngine, MockSource};
//! use avtranscode::av::transcode::Transcoder;
//! use avtranscode::config::{InputFileConfig, OutputFileConfig, OutputStreamConfig, TranscodeJob};
//! use avtranscode::utils::Rational;
//!
//! let engine = MockEngine::new().with_input(
//!     "in.ts",
//!     MockSource::new()
//!         .with_video_stream(Rational::new(1, 90000), Rational::new(30, 1), 30)
//!         .with_audio_stream(48000, 1024, 40),
//! );
//! let job = TranscodeJob::default()
//!     .input(InputFileConfig::new("in.ts"))
//!     .output(
//!         OutputFileConfig::new("out.mkv")
//!             .with_stream(OutputStreamConfig::copy(0, 0))
//!             .with_stream(OutputStreamConfig::encode(0, 1, "aac")),
//!     );
//!
//! let stats = Transcoder::new(job, Box::new(engine))?.run()?;
//! assert_eq!(stats.packets_written, 70);
//! # Ok::<(), avtranscode::TranscodeError>(())
//! ```
//!
//! ## Module Overview
//!
//! - `av`: engine traits, packets, frames and the [`transcode`] driver
//! - `codec`: per-stream state, timestamp repair and video sync
//! - `format`: input files, reader threads and output muxing
//! - `config`: job description and process-wide options
//! - `error`: the crate error type
//! - `utils`: time-base arithmetic

/// Media types, engine traits and the transcoding driver
pub mod av;

/// Input and output stream state
pub mod codec;

/// Job configuration
pub mod config;

/// Error types and utilities
pub mod error;

/// Input files, reader threads and muxing
pub mod format;

/// Time-base arithmetic
pub mod utils;

pub use error::{Result, TranscodeError};

// Re-export transcode module for convenience
pub use av::transcode;

//! Per-elementary-stream state on both sides of the pipeline.

mod input_stream;
mod output_stream;
pub mod vsync;

pub use input_stream::InputStream;
pub use output_stream::*;
pub use vsync::{VsyncDecision, VsyncMethod, VsyncParams, VsyncState};

/// Non-owning handle to a stream of an input or output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamRef {
    pub file: usize,
    pub stream: usize,
}

impl StreamRef {
    pub fn new(file: usize, stream: usize) -> Self {
        Self { file, stream }
    }
}

/// Non-owning handle to one endpoint of a filter graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PadRef {
    pub graph: usize,
    pub pad: usize,
}

impl PadRef {
    pub fn new(graph: usize, pad: usize) -> Self {
        Self { graph, pad }
    }
}

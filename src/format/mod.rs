//! Container-level plumbing: input files with their reader threads and
//! timestamp bookkeeping, and output files with header gating and packet
//! timestamp repair.

mod input;
mod output;
pub mod queue;
pub mod reader;

pub use input::{InputFile, InputTimeline};
pub use output::{MuxContext, OutputFile};
pub use queue::{packet_queue, PacketReceiver, PacketSender};
pub use reader::InputReader;

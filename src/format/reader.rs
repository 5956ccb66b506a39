use super::queue::{packet_queue, PacketReceiver, PacketSender, SendError};
use crate::av::{Demuxer, Packet, Pull};
use crate::config::Backpressure;
use crate::error::{Result, TranscodeError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Back-off applied when the demuxer reports "not ready".
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// A demuxer running on its own thread, feeding a bounded packet queue.
pub struct InputReader {
    file_index: usize,
    receiver: PacketReceiver,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Box<dyn Demuxer>>>,
}

impl InputReader {
    /// Starts the reader thread. The demuxer is handed back by [`InputReader::stop`].
    pub fn spawn(
        file_index: usize,
        demuxer: Box<dyn Demuxer>,
        queue_size: usize,
        backpressure: Backpressure,
    ) -> Result<Self> {
        let (sender, receiver) = packet_queue(queue_size);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name(format!("demux{}", file_index))
            .spawn(move || {
                read_loop(file_index, demuxer, sender, backpressure, queue_size, thread_stop)
            })?;

        log::debug!(
            "started reader for input #{} (queue size {})",
            file_index,
            queue_size
        );
        Ok(Self {
            file_index,
            receiver,
            stop,
            handle: Some(handle),
        })
    }

    pub fn try_recv(&self) -> Result<Pull<Packet>> {
        self.receiver.try_recv()
    }

    pub fn recv(&self) -> Result<Pull<Packet>> {
        self.receiver.recv()
    }

    /// Closes the queue, joins the thread and returns the demuxer.
    pub fn stop(mut self) -> Result<Box<dyn Demuxer>> {
        self.shutdown().ok_or_else(|| TranscodeError::Demux {
            file: self.file_index,
            reason: "reader thread panicked".into(),
        })
    }

    fn shutdown(&mut self) -> Option<Box<dyn Demuxer>> {
        self.stop.store(true, Ordering::SeqCst);
        self.receiver.close();
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(demuxer) => Some(demuxer),
            Err(_) => {
                log::error!("reader thread for input #{} panicked", self.file_index);
                None
            }
        }
    }
}

impl Drop for InputReader {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.shutdown();
        }
    }
}

fn read_loop(
    file_index: usize,
    mut demuxer: Box<dyn Demuxer>,
    sender: PacketSender,
    backpressure: Backpressure,
    queue_size: usize,
    stop: Arc<AtomicBool>,
) -> Box<dyn Demuxer> {
    let mut blocking = backpressure == Backpressure::Block;

    while !stop.load(Ordering::SeqCst) {
        let packet = match demuxer.read_packet() {
            Ok(Pull::Ready(packet)) => packet,
            Ok(Pull::Again) => {
                thread::sleep(RETRY_DELAY);
                continue;
            }
            Ok(Pull::Eof) => {
                sender.finish();
                break;
            }
            Err(err) => {
                log::debug!("input #{} read failed: {}", file_index, err);
                sender.fail(err);
                break;
            }
        };

        let sent = if blocking {
            sender.send(packet)
        } else {
            match sender.try_send(packet) {
                Err(SendError::Full(packet)) => {
                    log::warn!(
                        "packet queue for input #{} is blocking; consider raising \
                         thread_queue_size (current value: {})",
                        file_index,
                        queue_size
                    );
                    blocking = true;
                    sender.send(packet)
                }
                other => other,
            }
        };

        if sent.is_err() {
            // receiver closed, nothing left to do
            break;
        }
    }

    demuxer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::{CodecParameters, StreamInfo};
    use crate::utils::Rational;
    use pretty_assertions::assert_eq;

    struct CountingDemuxer {
        streams: Vec<StreamInfo>,
        next: i64,
        limit: i64,
        fail_at: Option<i64>,
        again_once: bool,
    }

    impl CountingDemuxer {
        fn new(limit: i64) -> Self {
            Self {
                streams: vec![StreamInfo::new(
                    0,
                    Rational::new(1, 25),
                    CodecParameters::video("raw", 16, 16),
                )],
                next: 0,
                limit,
                fail_at: None,
                again_once: true,
            }
        }
    }

    impl Demuxer for CountingDemuxer {
        fn streams(&self) -> &[StreamInfo] {
            &self.streams
        }

        fn read_packet(&mut self) -> Result<Pull<Packet>> {
            if self.again_once {
                self.again_once = false;
                return Ok(Pull::Again);
            }
            if Some(self.next) == self.fail_at {
                return Err(TranscodeError::InvalidData("bad sync byte".into()));
            }
            if self.next >= self.limit {
                return Ok(Pull::Eof);
            }
            let packet = Packet::new(vec![1u8]).with_pts(self.next).with_dts(self.next);
            self.next += 1;
            Ok(Pull::Ready(packet))
        }

        fn seek(&mut self, _timestamp: i64) -> Result<()> {
            self.next = 0;
            Ok(())
        }
    }

    fn drain(reader: &InputReader) -> (Vec<i64>, bool) {
        let mut seen = Vec::new();
        let mut failed = false;
        loop {
            match reader.recv() {
                Ok(Pull::Ready(p)) => seen.push(p.pts.unwrap()),
                Ok(Pull::Again) => continue,
                Ok(Pull::Eof) => break,
                Err(_) => failed = true,
            }
        }
        (seen, failed)
    }

    #[test]
    fn test_reads_everything_through_small_queue() {
        let reader = InputReader::spawn(
            0,
            Box::new(CountingDemuxer::new(20)),
            2,
            Backpressure::EscalateOnOverflow,
        )
        .unwrap();
        let (seen, failed) = drain(&reader);
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
        assert!(!failed);
    }

    #[test]
    fn test_error_after_pending_packets() {
        let mut demuxer = CountingDemuxer::new(10);
        demuxer.fail_at = Some(3);
        let reader = InputReader::spawn(0, Box::new(demuxer), 8, Backpressure::Block).unwrap();
        let (seen, failed) = drain(&reader);
        assert_eq!(seen, vec![0, 1, 2]);
        assert!(failed);
    }

    #[test]
    fn test_stop_returns_demuxer() {
        let reader = InputReader::spawn(
            1,
            Box::new(CountingDemuxer::new(1000)),
            1,
            Backpressure::EscalateOnOverflow,
        )
        .unwrap();
        let mut demuxer = reader.stop().unwrap();
        demuxer.seek(0).unwrap();
        assert!(demuxer.read_packet().is_ok());
        assert_eq!(demuxer.streams().len(), 1);
    }
}

use crate::av::{Packet, Pull};
use crate::error::{Result, TranscodeError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

/// Why a send did not enqueue. The packet is handed back.
#[derive(Debug)]
pub enum SendError {
    /// The queue is at capacity (non-blocking sends only)
    Full(Packet),
    /// The receiving side is gone
    Closed(Packet),
}

impl SendError {
    pub fn into_packet(self) -> Packet {
        match self {
            SendError::Full(packet) | SendError::Closed(packet) => packet,
        }
    }
}

struct QueueState {
    packets: VecDeque<Packet>,
    capacity: usize,
    /// Sender reported end of stream
    finished: bool,
    /// Terminal sender error, surfaced once after pending packets
    error: Option<TranscodeError>,
    /// Receiver dropped or closed
    closed: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    not_full: Condvar,
    not_empty: Condvar,
}

/// Creates a bounded single-producer/single-consumer packet queue.
pub fn packet_queue(capacity: usize) -> (PacketSender, PacketReceiver) {
    let shared = Arc::new(Shared {
        state: Mutex::new(QueueState {
            packets: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            finished: false,
            error: None,
            closed: false,
        }),
        not_full: Condvar::new(),
        not_empty: Condvar::new(),
    });
    (
        PacketSender {
            shared: shared.clone(),
        },
        PacketReceiver { shared },
    )
}

/// Producer half, owned by an input reader thread.
pub struct PacketSender {
    shared: Arc<Shared>,
}

impl PacketSender {
    /// Enqueues without waiting; fails with [`SendError::Full`] at capacity.
    pub fn try_send(&self, packet: Packet) -> std::result::Result<(), SendError> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(SendError::Closed(packet));
        }
        if state.packets.len() >= state.capacity {
            return Err(SendError::Full(packet));
        }
        state.packets.push_back(packet);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Enqueues, waiting for room while the queue is full.
    pub fn send(&self, packet: Packet) -> std::result::Result<(), SendError> {
        let mut state = self.shared.state.lock();
        while state.packets.len() >= state.capacity && !state.closed {
            self.shared.not_full.wait(&mut state);
        }
        if state.closed {
            return Err(SendError::Closed(packet));
        }
        state.packets.push_back(packet);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Signals a clean end of stream.
    pub fn finish(&self) {
        let mut state = self.shared.state.lock();
        state.finished = true;
        self.shared.not_empty.notify_all();
    }

    /// Puts the queue into its terminal error state.
    pub fn fail(&self, error: TranscodeError) {
        let mut state = self.shared.state.lock();
        state.error = Some(error);
        state.finished = true;
        self.shared.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

impl Drop for PacketSender {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Consumer half, owned by the main loop.
pub struct PacketReceiver {
    shared: Arc<Shared>,
}

impl PacketReceiver {
    /// Dequeues without waiting. `Pull::Again` when empty but still open.
    pub fn try_recv(&self) -> Result<Pull<Packet>> {
        let mut state = self.shared.state.lock();
        Self::take(&mut state, &self.shared.not_full)
    }

    /// Dequeues, waiting while the queue is empty and the sender is alive.
    pub fn recv(&self) -> Result<Pull<Packet>> {
        let mut state = self.shared.state.lock();
        while state.packets.is_empty() && !state.finished && !state.closed {
            self.shared.not_empty.wait(&mut state);
        }
        Self::take(&mut state, &self.shared.not_full)
    }

    fn take(state: &mut QueueState, not_full: &Condvar) -> Result<Pull<Packet>> {
        if let Some(packet) = state.packets.pop_front() {
            not_full.notify_one();
            return Ok(Pull::Ready(packet));
        }
        if let Some(error) = state.error.take() {
            return Err(error);
        }
        if state.finished || state.closed {
            return Ok(Pull::Eof);
        }
        Ok(Pull::Again)
    }

    /// Stops the producer: pending packets are dropped and any blocked
    /// `send` returns [`SendError::Closed`].
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        state.packets.clear();
        self.shared.not_full.notify_all();
        self.shared.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.state.lock().capacity
    }
}

impl Drop for PacketReceiver {
    fn drop(&mut self) {
        self.close();
    }
}

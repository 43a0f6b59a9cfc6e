//! The session's outbound queue.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use wseb_proto::{Command, Message};

/// Whether a queued frame carries application data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Application message; counts toward the client buffer threshold.
    Data,
    /// PING or PONG.
    Control,
}

/// One entry of the outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundItem {
    /// An encoded frame.
    Frame {
        /// Frame bytes before carrier encoding.
        bytes: Bytes,
        /// Data or control.
        kind: FrameKind,
    },
    /// The local CLOSE of the close handshake.
    Close,
    /// Swap the writer: finish the current carrier and promote the pending
    /// one.
    Reconnect,
}

/// FIFO of frames awaiting a writer.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    items: VecDeque<OutboundItem>,
    data_frames: usize,
}

impl OutboundQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an application message.
    pub fn push_message(&mut self, message: &Message) {
        self.data_frames += 1;
        self.items.push_back(OutboundItem::Frame {
            bytes: message.to_frame_bytes(),
            kind: FrameKind::Data,
        });
    }

    /// Enqueue a PING or PONG.
    pub fn push_control(&mut self, command: Command) {
        let mut buf = BytesMut::with_capacity(command.encoded_len());
        command.encode(&mut buf);
        self.items.push_back(OutboundItem::Frame {
            bytes: buf.freeze(),
            kind: FrameKind::Control,
        });
    }

    /// Enqueue the local CLOSE unless one is already queued.
    pub fn push_close(&mut self) -> bool {
        if self.items.contains(&OutboundItem::Close) {
            return false;
        }
        self.items.push_back(OutboundItem::Close);
        true
    }

    /// Enqueue the reconnect marker.
    pub fn push_reconnect(&mut self) {
        self.items.push_back(OutboundItem::Reconnect);
    }

    /// Remove every queued reconnect marker. Returns whether one was present.
    pub fn remove_reconnect(&mut self) -> bool {
        let before = self.items.len();
        self.items.retain(|item| *item != OutboundItem::Reconnect);
        before != self.items.len()
    }

    /// Peek at the head of the queue.
    #[must_use]
    pub fn front(&self) -> Option<&OutboundItem> {
        self.items.front()
    }

    /// Take the head of the queue.
    pub fn pop_front(&mut self) -> Option<OutboundItem> {
        let item = self.items.pop_front()?;
        if matches!(item, OutboundItem::Frame { kind: FrameKind::Data, .. }) {
            self.data_frames -= 1;
        }
        Some(item)
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of queued application messages.
    #[must_use]
    pub const fn data_frames(&self) -> usize {
        self.data_frames
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.items.clear();
        self.data_frames = 0;
    }
}

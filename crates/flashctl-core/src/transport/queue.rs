use std::collections::VecDeque;

use crate::frame::OutboundFrame;

/// Control frames held while the channel is down. FIFO; on overflow the
/// oldest frame is dropped and handed back to the caller.
#[derive(Debug)]
pub struct OutboundQueue {
    frames: VecDeque<OutboundFrame>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Enqueue at the back. Returns the dropped frame when full.
    pub fn push(&mut self, frame: OutboundFrame) -> Option<OutboundFrame> {
        let dropped = if self.frames.len() >= self.capacity {
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        dropped
    }

    /// Put a frame that failed to send back at the head.
    pub fn requeue(&mut self, frame: OutboundFrame) -> Option<OutboundFrame> {
        if self.frames.len() >= self.capacity {
            return Some(frame);
        }
        self.frames.push_front(frame);
        None
    }

    pub fn pop(&mut self) -> Option<OutboundFrame> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

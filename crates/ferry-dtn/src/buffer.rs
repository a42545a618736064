//! Bounded FIFO message buffer
//!
//! Messages are kept in arrival order. When a newcomer does not fit, the
//! oldest messages are evicted until it does.

use ferry_core::{Message, MessageId};
use tracing::debug;

/// Byte-bounded store of carried messages
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    capacity: u64,
    used: u64,
    messages: Vec<Message>,
}

impl MessageBuffer {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            used: 0,
            messages: Vec::new(),
        }
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn free(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }

    /// Occupied fraction of the capacity, in `[0, 1]`
    pub fn occupancy(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        (self.used as f64 / self.capacity as f64).clamp(0.0, 1.0)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| &m.id == id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }

    /// Messages in arrival order
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &MessageId> {
        self.messages.iter().map(|m| &m.id)
    }

    /// Whether a message of `size` bytes can ever be stored
    pub fn fits(&self, size: u64) -> bool {
        size <= self.capacity
    }

    /// Store `message`, evicting the oldest messages to make room
    ///
    /// Returns the evicted messages, or gives the message back when it is
    /// larger than the whole buffer.
    pub fn insert(&mut self, message: Message) -> Result<Vec<Message>, Message> {
        if !self.fits(message.size) {
            return Err(message);
        }
        if let Some(idx) = self.messages.iter().position(|m| m.id == message.id) {
            self.used = self.used - self.messages[idx].size + message.size;
            self.messages[idx] = message;
            return Ok(Vec::new());
        }

        let mut evicted = Vec::new();
        while self.free() < message.size && !self.messages.is_empty() {
            let oldest = self.messages.remove(0);
            self.used -= oldest.size;
            debug!(message = %oldest.id, "Evicted to make room");
            evicted.push(oldest);
        }
        self.used += message.size;
        self.messages.push(message);
        Ok(evicted)
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let idx = self.messages.iter().position(|m| &m.id == id)?;
        let message = self.messages.remove(idx);
        self.used -= message.size;
        Some(message)
    }
}

//! Coarse-locked FIFO between caller threads and the execution thread

use super::Request;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Request FIFO shared by all caller threads
#[derive(Debug, Default)]
pub struct RequestQueue {
    items: Mutex<VecDeque<Request>>,
}

impl RequestQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request
    pub fn push(&self, request: Request) {
        self.items.lock().push_back(request);
    }

    /// Put a partially completed request back at the head
    pub fn push_front(&self, request: Request) {
        self.items.lock().push_front(request);
    }

    /// Take the oldest request
    pub fn pop(&self) -> Option<Request> {
        self.items.lock().pop_front()
    }

    /// Number of queued requests
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Drop all queued requests, returning how many there were
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let dropped = items.len();
        items.clear();
        dropped
    }
}

//! Storage events published to the rest of the scheduler.

use std::sync::mpsc;

use parking_lot::Mutex;

use perch_core::types::HostAttributes;

/// Events the storage engine publishes.
#[derive(Debug, Clone, PartialEq)]
pub enum PubsubEvent {
    /// Host attributes were saved and actually changed.
    HostAttributesChanged(HostAttributes),
}

/// Destination for published events.
pub trait EventSink: Send + Sync {
    fn post(&self, event: PubsubEvent);
}

/// Sink that drops every event.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn post(&self, _event: PubsubEvent) {}
}

/// Sink backed by a queue, decoupling consumers from the engine's write
/// path. Events posted after the receiver is dropped are discarded.
pub struct ChannelEventSink {
    tx: Mutex<mpsc::Sender<PubsubEvent>>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::Receiver<PubsubEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Mutex::new(tx) }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn post(&self, event: PubsubEvent) {
        let _ = self.tx.lock().send(event);
    }
}

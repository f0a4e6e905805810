//! Per-connection framing decoders at the application boundary.
//!
//! When framing is enabled, each connection gets its own [`Decoder`] fed
//! with inbound segments on whatever worker thread the connection is
//! sharded to. Per-connection event ordering makes that safe; the map
//! itself is mutex-protected because different connections decode
//! concurrently.
//!
//! Reassembly timeouts are reaped opportunistically: a coarse once-a-second
//! sweep piggybacks on event arrival.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use tracing::debug;

use tidewire_core::error::Result;
use tidewire_protocol::{CompletedMessage, Decoder, StreamEvent};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Everything a fed segment produced.
#[derive(Debug, Default)]
pub struct FramedBatch {
    /// Messages completed by this segment.
    pub messages: Vec<CompletedMessage>,
    /// Stream events decoded from this segment.
    pub stream_events: Vec<StreamEvent>,
}

/// Owns the per-connection decoders of one facade.
pub struct FramedPipeline {
    decoders: Mutex<HashMap<u64, Decoder>>,
    message_timeout: Duration,
    last_sweep: Mutex<Instant>,
}

impl FramedPipeline {
    /// Creates a pipeline whose decoders reap partial messages after
    /// `message_timeout`.
    pub fn new(message_timeout: Duration) -> Self {
        Self {
            decoders: Mutex::new(HashMap::new()),
            message_timeout,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Creates the decoder for a newly connected connection.
    pub fn open(&self, connection_id: u64) {
        let mut decoders = self.decoders.lock().unwrap_or_else(|e| e.into_inner());
        decoders.insert(connection_id, Decoder::new(self.message_timeout));
    }

    /// Drops the decoder of a terminated connection.
    pub fn close(&self, connection_id: u64) {
        let mut decoders = self.decoders.lock().unwrap_or_else(|e| e.into_inner());
        decoders.remove(&connection_id);
    }

    /// Feeds one inbound segment through the connection's decoder.
    ///
    /// A protocol violation leaves the decoder removed and surfaces as an
    /// error; the caller reports it and drops the connection.
    pub fn feed(&self, connection_id: u64, payload: &[u8]) -> Result<FramedBatch> {
        self.sweep();

        let mut decoders = self.decoders.lock().unwrap_or_else(|e| e.into_inner());
        let decoder = decoders
            .entry(connection_id)
            .or_insert_with(|| Decoder::new(self.message_timeout));

        if let Err(err) = decoder.feed(payload) {
            decoders.remove(&connection_id);
            return Err(err);
        }

        let mut batch = FramedBatch::default();
        while let Some(message) = decoder.next_message() {
            batch.messages.push(message);
        }
        while let Some(event) = decoder.next_stream_event() {
            batch.stream_events.push(event);
        }
        Ok(batch)
    }

    /// Reaps timed-out partial messages across all connections, at most
    /// once per sweep interval.
    fn sweep(&self) {
        {
            let mut last = self.last_sweep.lock().unwrap_or_else(|e| e.into_inner());
            if last.elapsed() < SWEEP_INTERVAL {
                return;
            }
            *last = Instant::now();
        }

        let mut decoders = self.decoders.lock().unwrap_or_else(|e| e.into_inner());
        let mut reclaimed = 0;
        for decoder in decoders.values_mut() {
            reclaimed += decoder.cleanup_timeout_messages();
        }
        if reclaimed > 0 {
            debug!(reclaimed, "reaped timed-out partial messages");
        }
    }
}

#[cfg(test)]
mod tests {
    use tidewire_core::error::{ErrorKind, ProtocolViolationKind};
    use tidewire_protocol::Encoder;

    use super::*;

    fn wire(message_id: u64, data: &[u8]) -> Vec<u8> {
        Encoder::serialize_frames(&Encoder::encode_message(message_id, data, true).unwrap())
            .concat()
    }

    #[test]
    fn feeds_are_isolated_per_connection() {
        let pipeline = FramedPipeline::new(Duration::from_secs(30));
        pipeline.open(1);
        pipeline.open(2);

        let stream = wire(9, b"to-conn-1");
        // Split the stream so connection 1 holds a partial frame while
        // connection 2 decodes a complete one.
        let batch = pipeline.feed(1, &stream[..10]).unwrap();
        assert!(batch.messages.is_empty());

        let batch = pipeline.feed(2, &wire(8, b"to-conn-2")).unwrap();
        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.messages[0].data, b"to-conn-2");

        let batch = pipeline.feed(1, &stream[10..]).unwrap();
        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.messages[0].message_id, 9);
    }

    #[test]
    fn violation_drops_the_decoder() {
        let pipeline = FramedPipeline::new(Duration::from_secs(30));
        pipeline.open(1);

        let mut stream = wire(1, b"ok");
        stream[0] = 0;
        let err = pipeline.feed(1, &stream).unwrap_err();
        assert!(matches!(err, ErrorKind::Protocol(ProtocolViolationKind::BadMagic)));
    }

    #[test]
    fn close_forgets_partial_state() {
        let pipeline = FramedPipeline::new(Duration::from_secs(30));
        pipeline.open(1);
        let stream = wire(5, b"partial");
        pipeline.feed(1, &stream[..8]).unwrap();
        pipeline.close(1);

        // A fresh decoder sees the tail as garbage, not a continuation;
        // feeding the head again decodes cleanly.
        let batch = pipeline.feed(1, &stream).unwrap();
        assert_eq!(batch.messages.len(), 1);
    }
}

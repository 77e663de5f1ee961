//! Outbound audio path
//!
//! Capture callbacks hand encoded frames to a single-slot mailbox that the
//! driver task drains onto the socket. The slot holds at most one frame: a
//! new frame replaces an unsent one, and frames offered while the link is
//! not open are dropped. Stale realtime audio is never queued.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::audio::codec;
use crate::protocol;

/// Readiness of the socket for outbound audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl LinkState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LinkState::Connecting,
            1 => LinkState::Open,
            2 => LinkState::Closing,
            _ => LinkState::Closed,
        }
    }
}

/// What happened to an offered frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Slot was empty
    Queued,
    /// An unsent frame was discarded in favour of this one
    Replaced,
    /// Link not open; frame discarded
    Dropped,
}

/// Frame counters shared by the outbound and inbound paths
#[derive(Debug, Default)]
pub struct FrameCounters {
    pub sent: AtomicU64,
    pub dropped: AtomicU64,
    pub played: AtomicU64,
    pub discarded: AtomicU64,
}

/// Depth-1 mailbox between capture and the socket writer
#[derive(Debug)]
pub struct OutboundSlot {
    frame: Mutex<Option<String>>,
    notify: Notify,
    state: AtomicU8,
    counters: Arc<FrameCounters>,
}

impl OutboundSlot {
    pub fn new(counters: Arc<FrameCounters>) -> Self {
        Self {
            frame: Mutex::new(None),
            notify: Notify::new(),
            state: AtomicU8::new(LinkState::Connecting as u8),
            counters,
        }
    }

    pub fn link_state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_link_state(&self, state: LinkState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.link_state() == LinkState::Open
    }

    /// Offer an encoded message for sending
    pub fn offer(&self, message: String) -> Offer {
        if !self.is_open() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return Offer::Dropped;
        }

        let previous = match self.frame.lock() {
            Ok(mut slot) => slot.replace(message),
            Err(poisoned) => poisoned.into_inner().replace(message),
        };
        self.notify.notify_one();

        if previous.is_some() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            Offer::Replaced
        } else {
            Offer::Queued
        }
    }

    /// Take the pending message, if any
    pub fn take(&self) -> Option<String> {
        match self.frame.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Wait for the next pending message
    pub async fn next(&self) -> String {
        loop {
            let notified = self.notify.notified();
            if let Some(message) = self.take() {
                return message;
            }
            notified.await;
        }
    }

    pub fn counters(&self) -> &FrameCounters {
        &self.counters
    }
}

/// Handle given to capture backends for pushing microphone frames.
///
/// Cheap to clone and safe to call from a realtime audio thread.
#[derive(Debug, Clone)]
pub struct AudioSender {
    slot: Arc<OutboundSlot>,
    mime_type: Arc<str>,
}

impl AudioSender {
    pub fn new(slot: Arc<OutboundSlot>, mime_type: &str) -> Self {
        Self {
            slot,
            mime_type: Arc::from(mime_type),
        }
    }

    /// Encode one capture tick and offer it to the socket writer
    pub fn send_samples(&self, samples: &[f32]) -> Offer {
        if !self.slot.is_open() {
            self.slot.counters().dropped.fetch_add(1, Ordering::Relaxed);
            return Offer::Dropped;
        }

        let data = codec::encode_float_frame(samples);
        match protocol::realtime_input_message(data, &self.mime_type) {
            Ok(message) => {
                let offer = self.slot.offer(message);
                if offer == Offer::Replaced {
                    debug!("Outbound frame replaced before it was sent");
                }
                offer
            }
            Err(e) => {
                warn!("Failed to encode realtime input: {}", e);
                self.slot.counters().dropped.fetch_add(1, Ordering::Relaxed);
                Offer::Dropped
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.slot.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot() -> Arc<OutboundSlot> {
        Arc::new(OutboundSlot::new(Arc::new(FrameCounters::default())))
    }

    #[test]
    fn test_offer_dropped_until_open() {
        let slot = slot();
        assert_eq!(slot.offer("a".into()), Offer::Dropped);
        assert!(slot.take().is_none());

        slot.set_link_state(LinkState::Open);
        assert_eq!(slot.offer("b".into()), Offer::Queued);
        assert_eq!(slot.take().as_deref(), Some("b"));
    }

    #[test]
    fn test_newer_frame_replaces_unsent_frame() {
        let slot = slot();
        slot.set_link_state(LinkState::Open);

        assert_eq!(slot.offer("first".into()), Offer::Queued);
        assert_eq!(slot.offer("second".into()), Offer::Replaced);
        assert_eq!(slot.take().as_deref(), Some("second"));
        assert!(slot.take().is_none());
        assert_eq!(slot.counters().dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_closing_link_drops_frames() {
        let slot = slot();
        slot.set_link_state(LinkState::Closing);
        assert_eq!(slot.offer("late".into()), Offer::Dropped);
    }

    #[tokio::test]
    async fn test_next_waits_for_offer() {
        let slot = slot();
        slot.set_link_state(LinkState::Open);

        let waiter = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move { slot.next().await })
        };
        tokio::task::yield_now().await;
        slot.offer("frame".into());

        assert_eq!(waiter.await.unwrap(), "frame");
    }

    #[test]
    fn test_sender_wraps_samples_in_realtime_input() {
        let slot = slot();
        slot.set_link_state(LinkState::Open);
        let sender = AudioSender::new(Arc::clone(&slot), "audio/pcm;rate=16000");

        assert_eq!(sender.send_samples(&[0.0, 0.5]), Offer::Queued);

        let message = slot.take().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&message).unwrap();
        let chunk = &parsed["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        let bytes = codec::decode_base64(chunk["data"].as_str().unwrap()).unwrap();
        assert_eq!(codec::le_bytes_to_pcm16(&bytes), vec![0, 16383]);
    }
}

//! In-process transport that records every operation.
//!
//! Used by the console mode of the daemon and by tests.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use super::{MessageRef, OutgoingMessage, Transport, TransportError};

/// One recorded transport operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Sent {
        anchor: MessageRef,
        sent: MessageRef,
        message: OutgoingMessage,
    },
    Edited {
        target: MessageRef,
        message: OutgoingMessage,
    },
    Deleted {
        target: MessageRef,
        revoke: bool,
    },
}

impl TransportEvent {
    /// Text carried by a send or edit.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Sent { message, .. } | Self::Edited { message, .. } => Some(&message.text),
            Self::Deleted { .. } => None,
        }
    }
}

/// Most events kept; older ones are dropped first.
const MAX_EVENTS: usize = 1024;

/// Transport that keeps operations in memory instead of talking to a server.
#[derive(Debug)]
pub struct MemoryTransport {
    events: Mutex<Vec<TransportEvent>>,
    next_id: AtomicI32,
    fail_sends: AtomicBool,
    sink: Option<mpsc::UnboundedSender<TransportEvent>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            next_id: AtomicI32::new(1_000),
            fail_sends: AtomicBool::new(false),
            sink: None,
        }
    }

    /// Also forwards every event to `sink` as it happens.
    #[must_use]
    pub fn with_sink(mut self, sink: mpsc::UnboundedSender<TransportEvent>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Makes subsequent sends fail with [`TransportError::Rejected`].
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of the most recent recorded events.
    pub async fn events(&self) -> Vec<TransportEvent> {
        self.events.lock().await.clone()
    }

    /// Texts of all sent (not edited) messages, in order.
    pub async fn sent_texts(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|event| match event {
                TransportEvent::Sent { message, .. } => Some(message.text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forgets recorded events.
    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }

    async fn record(&self, event: TransportEvent) {
        debug!("Transport event: {:?}", event);
        if let Some(sink) = &self.sink {
            let _ = sink.send(event.clone());
        }
        let mut events = self.events.lock().await;
        if events.len() >= MAX_EVENTS {
            let excess = events.len() + 1 - MAX_EVENTS;
            events.drain(..excess);
        }
        events.push(event);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_message(
        &self,
        anchor: &MessageRef,
        message: OutgoingMessage,
    ) -> Result<MessageRef, TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("sends disabled".to_owned()));
        }

        let sent = MessageRef::new(anchor.chat_id, self.next_id.fetch_add(1, Ordering::SeqCst));
        self.record(TransportEvent::Sent {
            anchor: *anchor,
            sent,
            message,
        })
        .await;
        Ok(sent)
    }

    async fn edit_message(
        &self,
        target: &MessageRef,
        message: OutgoingMessage,
    ) -> Result<MessageRef, TransportError> {
        self.record(TransportEvent::Edited {
            target: *target,
            message,
        })
        .await;
        Ok(*target)
    }

    async fn delete_message(
        &self,
        target: &MessageRef,
        revoke: bool,
    ) -> Result<(), TransportError> {
        self.record(TransportEvent::Deleted {
            target: *target,
            revoke,
        })
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_in_order() {
        let transport = MemoryTransport::new();
        let anchor = MessageRef::new(10, 1);

        let sent = transport
            .send_message(&anchor, OutgoingMessage::text("hello"))
            .await
            .unwrap();
        assert_eq!(sent.chat_id, 10);

        transport
            .edit_message(&anchor, OutgoingMessage::text("edited"))
            .await
            .unwrap();
        transport.delete_message(&anchor, true).await.unwrap();

        let events = transport.events().await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].text(), Some("hello"));
        assert_eq!(events[1].text(), Some("edited"));
        assert_eq!(
            events[2],
            TransportEvent::Deleted {
                target: anchor,
                revoke: true
            }
        );
        assert_eq!(transport.sent_texts().await, vec!["hello".to_owned()]);
    }

    #[tokio::test]
    async fn test_failing_sends() {
        let transport = MemoryTransport::new();
        transport.fail_sends(true);

        let result = transport
            .send_message(&MessageRef::new(1, 1), OutgoingMessage::text("x"))
            .await;
        assert!(matches!(result, Err(TransportError::Rejected(_))));
        assert!(transport.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_sink_receives_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = MemoryTransport::new().with_sink(tx);

        transport
            .send_message(&MessageRef::new(1, 1), OutgoingMessage::text("ping"))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.text(), Some("ping"));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = MemoryTransport::new().with_sink(tx);
        let anchor = MessageRef::new(1, 1);

        for i in 0..MAX_EVENTS + 10 {
            transport
                .send_message(&anchor, OutgoingMessage::text(i.to_string()))
                .await
                .unwrap();
        }

        let events = transport.events().await;
        assert_eq!(events.len(), MAX_EVENTS);
        assert_eq!(events[0].text(), Some("10"));
        assert_eq!(
            events[MAX_EVENTS - 1].text(),
            Some((MAX_EVENTS + 9).to_string().as_str())
        );

        let mut forwarded = 0;
        while rx.try_recv().is_ok() {
            forwarded += 1;
        }
        assert_eq!(forwarded, MAX_EVENTS + 10);
    }
}

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::warn;
use uuid::Uuid;

/// Which side of the bridge a link talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkRole {
    /// Media stream from the telephony provider.
    Telephony,
    /// Realtime model connection.
    Model,
    /// Monitoring client.
    Observer,
}

impl fmt::Display for LinkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Telephony => "telephony",
            Self::Model => "model",
            Self::Observer => "observer",
        };
        f.write_str(name)
    }
}

/// Sending half of a live link.
///
/// Writes are fire-and-forget into a bounded queue drained by the link's
/// writer task. A full queue drops the frame.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    /// Distinguishes successive links of the same role.
    pub id: Uuid,
    /// The side this link talks to.
    pub role: LinkRole,
    tx: mpsc::Sender<String>,
    shutdown: Arc<Notify>,
}

/// Receiving half of a link, owned by the writer task.
pub struct LinkReceiver {
    rx: mpsc::Receiver<String>,
    shutdown: Arc<Notify>,
}

impl LinkHandle {
    /// Create a link with an outbound queue of `capacity` frames.
    pub fn channel(role: LinkRole, capacity: usize) -> (Self, LinkReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let shutdown = Arc::new(Notify::new());
        let handle = Self {
            id: Uuid::new_v4(),
            role,
            tx,
            shutdown: shutdown.clone(),
        };
        (handle, LinkReceiver { rx, shutdown })
    }

    /// Queue a text frame. Returns `false` if the frame was not queued.
    pub fn send(&self, text: String) -> bool {
        match self.tx.try_send(text) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(link = %self.role, link_id = %self.id, "Outbound queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Serialize `value` and queue it.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(text) => self.send(text),
            Err(e) => {
                warn!(link = %self.role, error = %e, "Failed to serialize outbound frame");
                false
            }
        }
    }

    /// Ask the writer task to close the socket. Queued frames are discarded.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    /// Whether the writer task is still draining this link.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl LinkReceiver {
    /// Next frame to write, or `None` once the link has been closed.
    pub async fn next(&mut self) -> Option<String> {
        tokio::select! {
            biased;
            _ = self.shutdown.notified() => None,
            msg = self.rx.recv() => msg,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let (link, mut rx) = LinkHandle::channel(LinkRole::Telephony, 8);
        assert!(link.send("a".into()));
        assert!(link.send_json(&serde_json::json!({"b": 1})));
        assert_eq!(rx.next().await.unwrap(), "a");
        assert_eq!(rx.next().await.unwrap(), r#"{"b":1}"#);
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let (link, mut rx) = LinkHandle::channel(LinkRole::Model, 1);
        assert!(link.send("first".into()));
        assert!(!link.send("second".into()));
        assert_eq!(rx.next().await.unwrap(), "first");
    }

    #[tokio::test]
    async fn test_close_before_wait_is_not_lost() {
        let (link, mut rx) = LinkHandle::channel(LinkRole::Observer, 4);
        link.send("pending".into());
        link.close();
        assert!(rx.next().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (link, rx) = LinkHandle::channel(LinkRole::Telephony, 4);
        drop(rx);
        assert!(!link.is_open());
        assert!(!link.send("x".into()));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(LinkRole::Telephony.to_string(), "telephony");
        assert_eq!(LinkRole::Observer.to_string(), "observer");
    }
}

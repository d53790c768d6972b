//! Outbound frames and the bounded send queue
//!
//! The queue is the backpressure point of a connection: producers wait a
//! bounded time for space and get `QueueFull` instead of buffering without
//! limit.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::shared::ConnectionError;

/// A frame waiting to be written to a station's socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Opaque application payload
    Data(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl OutboundFrame {
    /// Protocol-control frame (ping/pong/close) rather than application data
    pub fn is_control(&self) -> bool {
        !matches!(self, Self::Data(_))
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            Self::Data(p) | Self::Ping(p) | Self::Pong(p) => p.len(),
            Self::Close => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Data frames go out as text when they are valid UTF-8, binary otherwise.
    pub(crate) fn into_message(self) -> Message {
        match self {
            Self::Data(payload) => match String::from_utf8(payload) {
                Ok(text) => Message::Text(text),
                Err(err) => Message::Binary(err.into_bytes()),
            },
            Self::Ping(payload) => Message::Ping(payload),
            Self::Pong(payload) => Message::Pong(payload),
            Self::Close => Message::Close(None),
        }
    }
}

/// Producer side of a connection's bounded send queue.
#[derive(Debug, Clone)]
pub(crate) struct OutboundQueue {
    tx: mpsc::Sender<OutboundFrame>,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1).
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue `frame`, waiting up to `timeout` for space.
    ///
    /// Fails with `Closed` if `cancel` fires first or the consumer is gone,
    /// and with `QueueFull` when the timeout elapses.
    pub async fn push(
        &self,
        frame: OutboundFrame,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectionError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ConnectionError::Closed),
            sent = tokio::time::timeout(timeout, self.tx.send(frame)) => match sent {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(ConnectionError::Closed),
                Err(_) => Err(ConnectionError::QueueFull(timeout)),
            },
        }
    }

    /// Frames currently waiting in the queue
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn data_frames_are_not_control_frames() {
        assert!(!OutboundFrame::Data(b"x".to_vec()).is_control());
        assert!(OutboundFrame::Ping(Vec::new()).is_control());
        assert!(OutboundFrame::Close.is_control());
    }

    #[test]
    fn utf8_payload_becomes_text_message() {
        let msg = OutboundFrame::Data(b"[2,\"1\",\"Heartbeat\",{}]".to_vec()).into_message();
        assert_eq!(msg, Message::Text("[2,\"1\",\"Heartbeat\",{}]".to_string()));
    }

    #[test]
    fn non_utf8_payload_becomes_binary_message() {
        let msg = OutboundFrame::Data(vec![0xff, 0xfe]).into_message();
        assert_eq!(msg, Message::Binary(vec![0xff, 0xfe]));
    }

    #[tokio::test]
    async fn full_queue_times_out_with_queue_full() {
        let (queue, _rx) = OutboundQueue::channel(1);
        let cancel = CancellationToken::new();
        let timeout = Duration::from_millis(50);

        queue
            .push(OutboundFrame::Data(b"first".to_vec()), timeout, &cancel)
            .await
            .unwrap();
        assert_eq!(queue.depth(), 1);

        let started = Instant::now();
        let err = queue
            .push(OutboundFrame::Data(b"second".to_vec()), timeout, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectionError::QueueFull(_)));
        assert!(started.elapsed() >= timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn cancellation_wins_over_waiting_for_space() {
        let (queue, _rx) = OutboundQueue::channel(1);
        let cancel = CancellationToken::new();
        queue
            .push(OutboundFrame::Data(b"fill".to_vec()), Duration::from_secs(1), &cancel)
            .await
            .unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = queue
            .push(OutboundFrame::Data(b"blocked".to_vec()), Duration::from_secs(10), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Closed));
    }

    #[tokio::test]
    async fn dropped_consumer_reports_closed() {
        let (queue, rx) = OutboundQueue::channel(4);
        drop(rx);
        let err = queue
            .push(OutboundFrame::Data(b"x".to_vec()), Duration::from_millis(10), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Closed));
    }

    #[tokio::test]
    async fn frames_are_received_in_enqueue_order() {
        let (queue, mut rx) = OutboundQueue::channel(8);
        let cancel = CancellationToken::new();
        for i in 0..5u8 {
            queue
                .push(OutboundFrame::Data(vec![i]), Duration::from_millis(10), &cancel)
                .await
                .unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(rx.recv().await, Some(OutboundFrame::Data(vec![i])));
        }
        assert_eq!(queue.depth(), 0);
    }
}

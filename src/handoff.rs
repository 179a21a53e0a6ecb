//! The single-slot hand-off between the GATT server task, which sees inbound
//! characteristic writes, and the owner of an [`Advertiser`](crate::Advertiser).

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::gatt::WriteHandler;

/// Longest name accepted through the hand-off characteristic.
pub const MAX_NAME_LEN: usize = 255;

/// What became of one offered write.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Offer {
    Accepted,
    NonZeroOffset,
    TooLong,
    NotUtf8,
    Full,
    Closed,
}

enum SlotState {
    Open(oneshot::Sender<String>),
    Filled,
    Closed,
}

struct Slot {
    state: Mutex<SlotState>,
    token: CancellationToken,
}

/// The producing half. Offers never block.
#[derive(Clone)]
pub struct HandoffSink {
    slot: Arc<Slot>,
}

/// The consuming half. Yields at most one name.
pub struct PendingHandoff {
    rx: Option<oneshot::Receiver<String>>,
    token: CancellationToken,
}

/// Creates an empty slot whose offers are dropped once `token` is cancelled.
pub fn handoff_slot(token: CancellationToken) -> (HandoffSink, PendingHandoff) {
    let (tx, rx) = oneshot::channel();

    let sink = HandoffSink {
        slot: Arc::new(Slot {
            state: Mutex::new(SlotState::Open(tx)),
            token: token.clone(),
        }),
    };

    (sink, PendingHandoff { rx: Some(rx), token })
}

impl HandoffSink {
    pub fn offer(&self, offset: u16, value: &[u8]) -> Offer {
        if self.slot.token.is_cancelled() {
            return Offer::Closed;
        }
        if offset != 0 {
            return Offer::NonZeroOffset;
        }
        if value.len() > MAX_NAME_LEN {
            return Offer::TooLong;
        }
        let name = match std::str::from_utf8(value) {
            Ok(name) => name.to_owned(),
            Err(_) => return Offer::NotUtf8,
        };

        let mut state = self.slot.state.lock().unwrap_or_else(|e| e.into_inner());
        match std::mem::replace(&mut *state, SlotState::Filled) {
            SlotState::Open(tx) => match tx.send(name) {
                Ok(()) => Offer::Accepted,
                Err(_) => {
                    *state = SlotState::Closed;
                    Offer::Closed
                }
            },
            SlotState::Filled => Offer::Full,
            SlotState::Closed => {
                *state = SlotState::Closed;
                Offer::Closed
            }
        }
    }

    /// Discards the slot. A pending waiter sees [`Error::NotAdvertising`].
    pub fn close(&self) {
        let mut state = self.slot.state.lock().unwrap_or_else(|e| e.into_inner());
        if let SlotState::Open(_) = &*state {
            *state = SlotState::Closed;
        }
    }
}

impl WriteHandler for HandoffSink {
    fn on_write(&self, offset: u16, value: &[u8]) {
        match self.offer(offset, value) {
            Offer::Accepted => info!(len = value.len(), "name handed off"),
            outcome => debug!(?outcome, len = value.len(), "handoff write dropped"),
        }
    }
}

impl PendingHandoff {
    /// Suspends until a name arrives. Cancelling either `token` or the slot's
    /// own token ends the wait with [`Error::HandoffTimedOut`].
    pub async fn wait(&mut self, token: &CancellationToken) -> Result<String> {
        let rx = self.rx.as_mut().ok_or(Error::NotAdvertising)?;

        let outcome = tokio::select! {
            biased;
            received = rx => Some(received),
            _ = token.cancelled() => None,
            _ = self.token.cancelled() => None,
        };

        match outcome {
            Some(Ok(name)) => {
                self.rx = None;
                Ok(name)
            }
            Some(Err(_)) => {
                self.rx = None;
                Err(Error::NotAdvertising)
            }
            None => Err(Error::HandoffTimedOut),
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.rx.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn offer_rejections_test() {
        let (sink, _pending) = handoff_slot(CancellationToken::new());

        assert_eq!(sink.offer(1, b"proxy"), Offer::NonZeroOffset);
        assert_eq!(sink.offer(0, &[b'a'; MAX_NAME_LEN + 1]), Offer::TooLong);
        assert_eq!(sink.offer(0, &[0xFF, 0xFE]), Offer::NotUtf8);
        assert_eq!(sink.offer(0, b"proxy"), Offer::Accepted);
        assert_eq!(sink.offer(0, b"other"), Offer::Full);
    }

    #[test]
    pub fn cancelled_slot_drops_offers_test() {
        let token = CancellationToken::new();
        let (sink, _pending) = handoff_slot(token.clone());
        token.cancel();
        assert_eq!(sink.offer(0, b"proxy"), Offer::Closed);

        let (sink, _pending) = handoff_slot(CancellationToken::new());
        sink.close();
        assert_eq!(sink.offer(0, b"proxy"), Offer::Closed);
    }

    #[tokio::test]
    pub async fn first_value_wins_test() {
        let (sink, mut pending) = handoff_slot(CancellationToken::new());

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let sink = sink.clone();
                std::thread::spawn(move || sink.offer(0, format!("name-{}", i).as_bytes()))
            })
            .collect();
        let outcomes: Vec<_> = writers.into_iter().map(|w| w.join().unwrap()).collect();

        assert_eq!(outcomes.iter().filter(|o| **o == Offer::Accepted).count(), 1);
        assert_eq!(outcomes.iter().filter(|o| **o == Offer::Full).count(), 7);

        let name = pending.wait(&CancellationToken::new()).await.unwrap();
        let winner = outcomes.iter().position(|o| *o == Offer::Accepted).unwrap();
        assert_eq!(name, format!("name-{}", winner));

        assert!(matches!(
            pending.wait(&CancellationToken::new()).await,
            Err(Error::NotAdvertising)
        ));
    }

    #[tokio::test]
    pub async fn wait_ends_on_cancel_test() {
        let (_sink, mut pending) = handoff_slot(CancellationToken::new());
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            pending.wait(&token).await,
            Err(Error::HandoffTimedOut)
        ));
        assert!(!pending.is_consumed());
    }

    #[tokio::test]
    pub async fn closed_slot_ends_wait_test() {
        let (sink, mut pending) = handoff_slot(CancellationToken::new());
        sink.close();
        drop(sink);
        assert!(matches!(
            pending.wait(&CancellationToken::new()).await,
            Err(Error::NotAdvertising)
        ));
    }
}

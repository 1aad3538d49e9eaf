use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;

use procura_core::domain::agent::PairKey;

/// Wake-up hub for agents waiting on supplier replies.
///
/// Carries no state beyond a counter per pair: receivers must re-read the store after every
/// wake-up, and must subscribe before their first read so no append slips in between.
#[derive(Debug, Default)]
pub struct ReplySignals {
    senders: Mutex<HashMap<PairKey, watch::Sender<u64>>>,
}

impl ReplySignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, pair: &PairKey) -> watch::Receiver<u64> {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders.entry(pair.clone()).or_insert_with(|| watch::channel(0).0).subscribe()
    }

    pub fn notify(&self, pair: &PairKey) {
        let senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = senders.get(pair) {
            sender.send_modify(|counter| *counter = counter.wrapping_add(1));
        }
    }

    /// Drops the channel of a pair that reached a terminal state.
    pub fn forget(&self, pair: &PairKey) {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders.remove(pair);
    }

    pub fn tracked_pairs(&self) -> usize {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

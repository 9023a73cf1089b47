//! Correlation table for in-flight requests.
//!
//! Removal is atomic with completion: whichever of {response, timeout} takes
//! the entry out of the map delivers the result, and the loser finds
//! nothing. The one-shot sender makes double delivery unrepresentable.

use std::collections::HashMap;

use {
    serde_json::Value,
    tokio::{sync::oneshot, task::AbortHandle},
};

use crate::error::ClientError;

pub type RequestResult = Result<Value, ClientError>;

struct PendingRequest {
    tx: oneshot::Sender<RequestResult>,
    timer: Option<AbortHandle>,
}

#[derive(Default)]
pub struct PendingTable {
    entries: HashMap<String, PendingRequest>,
}

impl PendingTable {
    pub fn insert(&mut self, id: String, tx: oneshot::Sender<RequestResult>) {
        self.entries.insert(id, PendingRequest { tx, timer: None });
    }

    /// Attach the expiry timer to an entry, so a response-side completion
    /// can cancel it.
    pub fn arm(&mut self, id: &str, timer: AbortHandle) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.timer = Some(timer);
        }
    }

    /// Remove the entry and deliver `result` to the waiting caller.
    ///
    /// Returns `false` when the id is unknown — already completed by the
    /// other path — in which case `result` is dropped.
    pub fn complete(&mut self, id: &str, result: RequestResult) -> bool {
        let Some(entry) = self.entries.remove(id) else {
            return false;
        };
        if let Some(timer) = entry.timer {
            timer.abort();
        }
        // The caller may have stopped waiting; that is its business.
        let _ = entry.tx.send(result);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn response_reaches_the_caller() {
        let mut table = PendingTable::default();
        let (tx, rx) = oneshot::channel();
        table.insert("1".into(), tx);

        assert!(table.complete("1", Ok(serde_json::json!({"n": 5}))));
        assert!(table.is_empty());
        assert_eq!(rx.await.unwrap().unwrap()["n"], 5);
    }

    #[tokio::test]
    async fn completion_is_at_most_once() {
        let mut table = PendingTable::default();
        let (tx, mut rx) = oneshot::channel();
        table.insert("1".into(), tx);

        assert!(table.complete("1", Err(ClientError::NotConnected)));
        // The losing path is a no-op.
        assert!(!table.complete("1", Ok(Value::Null)));
        assert!(rx.try_recv().unwrap().is_err());
    }

    #[test]
    fn unknown_id_is_dropped() {
        let mut table = PendingTable::default();
        assert!(!table.complete("99", Ok(Value::Null)));
    }

    #[tokio::test]
    async fn entries_are_independent() {
        let mut table = PendingTable::default();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        table.insert("1".into(), tx1);
        table.insert("2".into(), tx2);

        assert!(table.complete("2", Ok(Value::Null)));
        assert_eq!(table.len(), 1);
        // Entry 1 still waiting.
        assert!(rx1.try_recv().is_err());
    }
}

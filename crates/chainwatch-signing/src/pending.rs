//! In-flight signature ledger: at most one live request per tx id.

use std::collections::HashMap;

use chainwatch_core::types::{SigningOutcome, SigningRequest};

use crate::error::SigningError;

#[derive(Debug, Default)]
pub struct PendingSignatures {
    requests: HashMap<String, SigningRequest>,
}

impl PendingSignatures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request as pending. A request with the same tx id that is
    /// still pending is rejected; a terminal one is replaced.
    pub fn begin(&mut self, mut request: SigningRequest) -> Result<(), SigningError> {
        if self
            .requests
            .get(&request.tx_id)
            .is_some_and(|r| r.outcome == SigningOutcome::Pending)
        {
            return Err(SigningError::DuplicateRequest(request.tx_id));
        }
        request.outcome = SigningOutcome::Pending;
        self.requests.insert(request.tx_id.clone(), request);
        Ok(())
    }

    /// Mark a pending request canceled. Returns `false` if it was not pending.
    pub fn cancel(&mut self, tx_id: &str) -> bool {
        self.transition(tx_id, SigningOutcome::Canceled)
    }

    /// Claim a pending request for submission. Once claimed, a cancel is
    /// refused. Returns `false` if it was not pending (canceled meanwhile).
    pub fn complete(&mut self, tx_id: &str) -> bool {
        self.transition(tx_id, SigningOutcome::Completed)
    }

    pub fn is_canceled(&self, tx_id: &str) -> bool {
        self.outcome(tx_id) == Some(SigningOutcome::Canceled)
    }

    pub fn outcome(&self, tx_id: &str) -> Option<SigningOutcome> {
        self.requests.get(tx_id).map(|r| r.outcome)
    }

    /// Drop the request once its flow is over.
    pub fn finish(&mut self, tx_id: &str) -> Option<SigningRequest> {
        self.requests.remove(tx_id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn transition(&mut self, tx_id: &str, to: SigningOutcome) -> bool {
        match self.requests.get_mut(tx_id) {
            Some(r) if r.outcome == SigningOutcome::Pending => {
                r.outcome = to;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn request(tx_id: &str) -> SigningRequest {
        SigningRequest {
            tx_id: tx_id.to_owned(),
            chain_id: "Polkadot".to_owned(),
            from: "15alice".to_owned(),
            payload: vec![0xde, 0xad],
            metadata: None,
            outcome: SigningOutcome::Pending,
        }
    }

    #[test]
    fn one_live_request_per_tx() {
        let mut pending = PendingSignatures::new();
        pending.begin(request("t1")).expect("first");
        assert!(matches!(
            pending.begin(request("t1")),
            Err(SigningError::DuplicateRequest(_))
        ));
        pending.begin(request("t2")).expect("other tx");
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn terminal_request_can_be_restarted() {
        let mut pending = PendingSignatures::new();
        pending.begin(request("t1")).expect("first");
        assert!(pending.cancel("t1"));
        pending.begin(request("t1")).expect("replaces canceled");
        assert_eq!(pending.outcome("t1"), Some(SigningOutcome::Pending));
    }

    #[test]
    fn cancel_and_complete_are_exclusive() {
        let mut pending = PendingSignatures::new();
        pending.begin(request("t1")).expect("begin");
        assert!(pending.cancel("t1"));
        assert!(!pending.complete("t1"));
        assert!(pending.is_canceled("t1"));
        assert!(pending.finish("t1").is_some());
        assert!(!pending.cancel("t1"));
        assert!(pending.is_empty());
    }
}

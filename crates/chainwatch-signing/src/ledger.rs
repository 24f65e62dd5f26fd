//! Hardware-device signing coordinator.
//!
//! `Idle → AwaitingMetadata → AwaitingDeviceResponse → {Submitted | Failed}`.
//! One request at a time. The building flag is cleared on every exit.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chainwatch_core::types::{SigningOutcome, SigningRequest};

use crate::collaborators::{BuilderFeedback, ExtrinsicSubmitter, LedgerDevice, MetadataCache};
use crate::error::SigningError;
use crate::pending::PendingSignatures;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LedgerPhase {
    #[default]
    Idle,
    AwaitingMetadata { tx_id: String },
    AwaitingDeviceResponse { tx_id: String },
    Submitted { tx_id: String },
    Failed { tx_id: String, reason: String },
}

impl LedgerPhase {
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::AwaitingMetadata { .. } | Self::AwaitingDeviceResponse { .. }
        )
    }

    pub fn tx_id(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::AwaitingMetadata { tx_id }
            | Self::AwaitingDeviceResponse { tx_id }
            | Self::Submitted { tx_id }
            | Self::Failed { tx_id, .. } => Some(tx_id),
        }
    }
}

pub struct LedgerCoordinator {
    phase: Mutex<LedgerPhase>,
    pending: Arc<Mutex<PendingSignatures>>,
    device: Arc<dyn LedgerDevice>,
    metadata: Arc<dyn MetadataCache>,
    submitter: Arc<dyn ExtrinsicSubmitter>,
    feedback: Arc<dyn BuilderFeedback>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LedgerCoordinator {
    pub fn new(
        pending: Arc<Mutex<PendingSignatures>>,
        device: Arc<dyn LedgerDevice>,
        metadata: Arc<dyn MetadataCache>,
        submitter: Arc<dyn ExtrinsicSubmitter>,
        feedback: Arc<dyn BuilderFeedback>,
    ) -> Self {
        Self {
            phase: Mutex::new(LedgerPhase::Idle),
            pending,
            device,
            metadata,
            submitter,
            feedback,
        }
    }

    pub fn phase(&self) -> LedgerPhase {
        lock(&self.phase).clone()
    }

    /// Sign on the device and submit. Returns `Canceled` when the request was
    /// canceled while the device was busy.
    pub async fn sign(
        &self,
        request: SigningRequest,
        account_index: u32,
    ) -> Result<SigningOutcome, SigningError> {
        let tx_id = request.tx_id.clone();
        {
            let mut phase = lock(&self.phase);
            if phase.is_busy() {
                return Err(SigningError::Busy(
                    phase.tx_id().unwrap_or_default().to_owned(),
                ));
            }
            lock(&self.pending).begin(request.clone())?;
            *phase = LedgerPhase::AwaitingMetadata {
                tx_id: tx_id.clone(),
            };
        }
        self.feedback.building(&tx_id, true);

        let metadata = match &request.metadata {
            Some(attached) => Some(attached.clone()),
            None => self.metadata.fetch(&request.chain_id).await,
        };
        let Some(metadata) = metadata else {
            let err = SigningError::MissingMetadata {
                tx_id: tx_id.clone(),
                chain_id: request.chain_id.clone(),
            };
            self.fail(&tx_id, &err);
            return Err(err);
        };
        if lock(&self.pending).is_canceled(&tx_id) {
            tracing::debug!("{tx_id}: canceled before reaching the device");
            self.settle(&tx_id, LedgerPhase::Idle);
            return Ok(SigningOutcome::Canceled);
        }

        *lock(&self.phase) = LedgerPhase::AwaitingDeviceResponse {
            tx_id: tx_id.clone(),
        };
        tracing::debug!("{tx_id}: awaiting device response");
        let signature = match self
            .device
            .sign(account_index, &request.payload, &metadata)
            .await
        {
            Ok(signature) => signature,
            Err(e) => {
                self.feedback.device_error(&tx_id, e.code, &e.message);
                let err = SigningError::Device(e);
                self.fail(&tx_id, &err);
                return Err(err);
            }
        };

        // Claiming for submission and the cancel check are one step.
        if !lock(&self.pending).complete(&tx_id) {
            tracing::debug!("{tx_id}: canceled while on device; signature discarded");
            self.settle(&tx_id, LedgerPhase::Idle);
            return Ok(SigningOutcome::Canceled);
        }

        if let Err(reason) = self.submitter.submit(&request, &signature).await {
            let err = SigningError::Submit(reason);
            self.fail(&tx_id, &err);
            return Err(err);
        }
        self.feedback.submitted(&tx_id);
        self.settle(
            &tx_id,
            LedgerPhase::Submitted {
                tx_id: tx_id.clone(),
            },
        );
        tracing::info!("{tx_id}: signed on device and submitted");
        Ok(SigningOutcome::Completed)
    }

    /// Cancel a pending device request. Returns `false` if it was not pending
    /// or submission already started.
    pub fn cancel(&self, tx_id: &str) -> bool {
        let canceled = lock(&self.pending).cancel(tx_id);
        if canceled {
            tracing::debug!("{tx_id}: canceled");
            self.feedback.overlay_close();
        }
        canceled
    }

    fn fail(&self, tx_id: &str, err: &SigningError) {
        tracing::warn!("{tx_id}: {err}");
        // Device errors already went out as structured feedback.
        if !matches!(err, SigningError::Device(_)) {
            self.feedback.failed(tx_id, &err.to_string());
        }
        self.settle(
            tx_id,
            LedgerPhase::Failed {
                tx_id: tx_id.to_owned(),
                reason: err.to_string(),
            },
        );
    }

    fn settle(&self, tx_id: &str, phase: LedgerPhase) {
        lock(&self.pending).finish(tx_id);
        *lock(&self.phase) = phase;
        self.feedback.building(tx_id, false);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::error::{DeviceError, DeviceErrorCode};
    use crate::pending::tests::request;
    use crate::testing::{RecordingFeedback, RecordingSubmitter};

    struct MockDevice {
        result: Result<Vec<u8>, DeviceError>,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl MockDevice {
        fn ok() -> Self {
            Self {
                result: Ok(vec![0x01; 64]),
                gate: None,
            }
        }
    }

    #[async_trait]
    impl LedgerDevice for MockDevice {
        async fn sign(&self, _index: u32, _payload: &[u8], _metadata: &[u8]) -> Result<Vec<u8>, DeviceError> {
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }
            self.result.clone()
        }
    }

    struct Cache(Option<Vec<u8>>);

    #[async_trait]
    impl MetadataCache for Cache {
        async fn fetch(&self, _chain_id: &str) -> Option<Vec<u8>> {
            self.0.clone()
        }
    }

    /// Metadata lookup that blocks until released.
    struct SlowCache {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl MetadataCache for SlowCache {
        async fn fetch(&self, _chain_id: &str) -> Option<Vec<u8>> {
            self.entered.notify_one();
            self.release.notified().await;
            Some(vec![0xaa])
        }
    }

    struct Harness {
        ledger: Arc<LedgerCoordinator>,
        pending: Arc<Mutex<PendingSignatures>>,
        submitter: Arc<RecordingSubmitter>,
        feedback: Arc<RecordingFeedback>,
    }

    fn harness(device: MockDevice, cache: Option<Vec<u8>>) -> Harness {
        harness_with(device, Arc::new(Cache(cache)), RecordingSubmitter::default())
    }

    fn harness_with(
        device: MockDevice,
        cache: Arc<dyn MetadataCache>,
        submitter: RecordingSubmitter,
    ) -> Harness {
        let pending = Arc::new(Mutex::new(PendingSignatures::new()));
        let submitter = Arc::new(submitter);
        let feedback = Arc::new(RecordingFeedback::default());
        let ledger = LedgerCoordinator::new(
            Arc::clone(&pending),
            Arc::new(device),
            cache,
            submitter.clone(),
            feedback.clone(),
        );
        Harness {
            ledger: Arc::new(ledger),
            pending,
            submitter,
            feedback,
        }
    }

    #[tokio::test]
    async fn signs_with_cached_metadata_and_submits() {
        let h = harness(MockDevice::ok(), Some(vec![0xaa]));
        let outcome = h.ledger.sign(request("t1"), 0).await.expect("sign");
        assert_eq!(outcome, SigningOutcome::Completed);
        assert_eq!(h.submitter.submitted(), vec!["t1"]);
        assert_eq!(h.ledger.phase(), LedgerPhase::Submitted { tx_id: "t1".to_owned() });
        assert_eq!(h.feedback.building_events(), vec![("t1".to_owned(), true), ("t1".to_owned(), false)]);
        assert!(lock(&h.pending).is_empty());
    }

    #[tokio::test]
    async fn missing_metadata_fails_without_touching_device() {
        let h = harness(MockDevice::ok(), None);
        let err = h.ledger.sign(request("t1"), 0).await.expect_err("must fail");
        assert!(matches!(err, SigningError::MissingMetadata { .. }));
        assert!(matches!(h.ledger.phase(), LedgerPhase::Failed { .. }));
        assert!(h.submitter.submitted().is_empty());
        assert_eq!(h.feedback.failures(), vec!["t1"]);
        assert_eq!(h.feedback.building_events().last(), Some(&("t1".to_owned(), false)));
    }

    #[tokio::test]
    async fn attached_metadata_skips_cache() {
        let h = harness(MockDevice::ok(), None);
        let mut req = request("t1");
        req.metadata = Some(vec![0xbb]);
        assert_eq!(h.ledger.sign(req, 0).await.expect("sign"), SigningOutcome::Completed);
    }

    #[tokio::test]
    async fn device_error_is_forwarded_and_clears_building() {
        let device = MockDevice {
            result: Err(DeviceError::new(
                DeviceErrorCode::from_status(0x6985),
                "Transaction rejected",
            )),
            gate: None,
        };
        let h = harness(device, Some(vec![0xaa]));
        let err = h.ledger.sign(request("t1"), 0).await.expect_err("must fail");
        assert!(matches!(err, SigningError::Device(_)));
        assert_eq!(
            h.feedback.device_errors(),
            vec![("t1".to_owned(), DeviceErrorCode::UserRejected)]
        );
        assert_eq!(h.feedback.building_events().last(), Some(&("t1".to_owned(), false)));
        assert!(lock(&h.pending).is_empty());

        // A failed request leaves the coordinator free for the next one.
        assert!(!h.ledger.phase().is_busy());
    }

    #[tokio::test]
    async fn one_request_in_flight() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let device = MockDevice {
            result: Ok(vec![1]),
            gate: Some((Arc::clone(&entered), Arc::clone(&release))),
        };
        let h = harness(device, Some(vec![0xaa]));

        let ledger = Arc::clone(&h.ledger);
        let first = tokio::spawn(async move { ledger.sign(request("t1"), 0).await });
        entered.notified().await;

        assert!(matches!(
            h.ledger.sign(request("t2"), 0).await,
            Err(SigningError::Busy(tx)) if tx == "t1"
        ));
        release.notify_one();
        first.await.expect("join").expect("first signs");
    }

    #[tokio::test]
    async fn cancel_while_on_device_suppresses_submit() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let device = MockDevice {
            result: Ok(vec![1]),
            gate: Some((Arc::clone(&entered), Arc::clone(&release))),
        };
        let h = harness(device, Some(vec![0xaa]));

        let ledger = Arc::clone(&h.ledger);
        let task = tokio::spawn(async move { ledger.sign(request("t1"), 0).await });
        entered.notified().await;
        assert!(h.ledger.cancel("t1"));
        release.notify_one();

        let outcome = task.await.expect("join").expect("canceled is not an error");
        assert_eq!(outcome, SigningOutcome::Canceled);
        assert!(h.submitter.submitted().is_empty());
        assert_eq!(h.ledger.phase(), LedgerPhase::Idle);
    }

    #[tokio::test]
    async fn cancel_during_metadata_fetch_never_reaches_device() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let cache = SlowCache {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        };
        // Reaching the device would surface this error.
        let device = MockDevice {
            result: Err(DeviceError::new(DeviceErrorCode::DeviceLocked, "locked")),
            gate: None,
        };
        let h = harness_with(device, Arc::new(cache), RecordingSubmitter::default());

        let ledger = Arc::clone(&h.ledger);
        let task = tokio::spawn(async move { ledger.sign(request("t1"), 0).await });
        entered.notified().await;
        assert!(h.ledger.cancel("t1"));
        release.notify_one();

        let outcome = task.await.expect("join").expect("canceled is not an error");
        assert_eq!(outcome, SigningOutcome::Canceled);
        assert!(h.feedback.device_errors().is_empty());
        assert!(h.submitter.submitted().is_empty());
        assert_eq!(h.feedback.building_events().last(), Some(&("t1".to_owned(), false)));
        assert!(lock(&h.pending).is_empty());
    }

    #[tokio::test]
    async fn cancel_is_refused_once_submission_starts() {
        let (submitter, entered, release) = RecordingSubmitter::gated();
        let h = harness_with(MockDevice::ok(), Arc::new(Cache(Some(vec![0xaa]))), submitter);

        let ledger = Arc::clone(&h.ledger);
        let task = tokio::spawn(async move { ledger.sign(request("t1"), 0).await });
        entered.notified().await;
        assert!(!h.ledger.cancel("t1"), "already submitting");
        release.notify_one();

        let outcome = task.await.expect("join").expect("sign");
        assert_eq!(outcome, SigningOutcome::Completed);
        assert_eq!(h.submitter.submitted(), vec!["t1"]);
        assert_eq!(h.feedback.overlay_closes(), 0);
    }

    #[test]
    fn status_words_map_to_codes() {
        assert_eq!(DeviceErrorCode::from_status(0x6e01), DeviceErrorCode::AppNotOpen);
        assert_eq!(DeviceErrorCode::from_status(0x5515), DeviceErrorCode::DeviceLocked);
        assert_eq!(DeviceErrorCode::from_status(0x1234), DeviceErrorCode::Unknown(0x1234));
        assert_eq!(DeviceErrorCode::Unknown(0x1234).to_string(), "unknown (0x1234)");
    }
}

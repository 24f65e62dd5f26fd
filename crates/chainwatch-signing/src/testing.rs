//! Recording collaborators shared by the coordinator tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use chainwatch_core::types::SigningRequest;

use crate::collaborators::{BuilderFeedback, ExtrinsicSubmitter};
use crate::error::DeviceErrorCode;

#[derive(Default)]
pub(crate) struct RecordingSubmitter {
    txs: Mutex<Vec<String>>,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl RecordingSubmitter {
    /// `submit` signals `entered` and waits for `release` before recording.
    pub(crate) fn gated() -> (Self, Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let submitter = Self {
            txs: Mutex::new(Vec::new()),
            gate: Some((Arc::clone(&entered), Arc::clone(&release))),
        };
        (submitter, entered, release)
    }

    pub(crate) fn submitted(&self) -> Vec<String> {
        self.txs.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ExtrinsicSubmitter for RecordingSubmitter {
    async fn submit(&self, request: &SigningRequest, _signature: &[u8]) -> Result<(), String> {
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        self.txs.lock().expect("lock").push(request.tx_id.clone());
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingFeedback {
    building: Mutex<Vec<(String, bool)>>,
    errors: Mutex<Vec<(String, DeviceErrorCode)>>,
    modals: Mutex<Vec<(String, bool)>>,
    overlay_closes: Mutex<usize>,
    failures: Mutex<Vec<String>>,
}

impl RecordingFeedback {
    pub(crate) fn building_events(&self) -> Vec<(String, bool)> {
        self.building.lock().expect("lock").clone()
    }

    pub(crate) fn device_errors(&self) -> Vec<(String, DeviceErrorCode)> {
        self.errors.lock().expect("lock").clone()
    }

    pub(crate) fn modal_events(&self) -> Vec<(String, bool)> {
        self.modals.lock().expect("lock").clone()
    }

    pub(crate) fn overlay_closes(&self) -> usize {
        *self.overlay_closes.lock().expect("lock")
    }

    pub(crate) fn failures(&self) -> Vec<String> {
        self.failures.lock().expect("lock").clone()
    }
}

impl BuilderFeedback for RecordingFeedback {
    fn building(&self, tx_id: &str, building: bool) {
        self.building
            .lock()
            .expect("lock")
            .push((tx_id.to_owned(), building));
    }

    fn device_error(&self, tx_id: &str, code: DeviceErrorCode, _message: &str) {
        self.errors.lock().expect("lock").push((tx_id.to_owned(), code));
    }

    fn modal(&self, tx_id: &str, open: bool) {
        self.modals.lock().expect("lock").push((tx_id.to_owned(), open));
    }

    fn overlay_close(&self) {
        *self.overlay_closes.lock().expect("lock") += 1;
    }

    fn submitted(&self, _tx_id: &str) {}

    fn failed(&self, tx_id: &str, _message: &str) {
        self.failures.lock().expect("lock").push(tx_id.to_owned());
    }
}

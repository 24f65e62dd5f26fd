//! Remote wallet-session signing coordinator.
//!
//! `Idle → SessionEstablishing → SessionReady → AwaitingApproval →
//! {Submitted | Canceled | Failed}`. The session is cached and reused until
//! it expires or the wallet deletes it. A cancel can land at any await point;
//! the outcome is re-checked after each one and a canceled request is never
//! submitted.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use chainwatch_core::types::{SigningOutcome, SigningRequest};

use crate::collaborators::{BuilderFeedback, ExtrinsicSubmitter, RemoteSession, RemoteWallet};
use crate::error::SigningError;
use crate::pending::PendingSignatures;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RemotePhase {
    #[default]
    Idle,
    SessionEstablishing { tx_id: String },
    SessionReady { tx_id: String },
    AwaitingApproval { tx_id: String },
    Submitted { tx_id: String },
    Canceled { tx_id: String },
    Failed { tx_id: String, reason: String },
}

impl RemotePhase {
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::SessionEstablishing { .. } | Self::SessionReady { .. } | Self::AwaitingApproval { .. }
        )
    }

    pub fn tx_id(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::SessionEstablishing { tx_id }
            | Self::SessionReady { tx_id }
            | Self::AwaitingApproval { tx_id }
            | Self::Submitted { tx_id }
            | Self::Canceled { tx_id }
            | Self::Failed { tx_id, .. } => Some(tx_id),
        }
    }
}

pub struct RemoteSessionCoordinator {
    phase: Mutex<RemotePhase>,
    session: Mutex<Option<RemoteSession>>,
    pending: Arc<Mutex<PendingSignatures>>,
    wallet: Arc<dyn RemoteWallet>,
    submitter: Arc<dyn ExtrinsicSubmitter>,
    feedback: Arc<dyn BuilderFeedback>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RemoteSessionCoordinator {
    pub fn new(
        pending: Arc<Mutex<PendingSignatures>>,
        wallet: Arc<dyn RemoteWallet>,
        submitter: Arc<dyn ExtrinsicSubmitter>,
        feedback: Arc<dyn BuilderFeedback>,
    ) -> Self {
        Self {
            phase: Mutex::new(RemotePhase::Idle),
            session: Mutex::new(None),
            pending,
            wallet,
            submitter,
            feedback,
        }
    }

    pub fn phase(&self) -> RemotePhase {
        lock(&self.phase).clone()
    }

    pub fn session(&self) -> Option<RemoteSession> {
        lock(&self.session).clone()
    }

    pub async fn sign(&self, request: SigningRequest) -> Result<SigningOutcome, SigningError> {
        let tx_id = request.tx_id.clone();
        {
            let mut phase = lock(&self.phase);
            if phase.is_busy() {
                return Err(SigningError::Busy(
                    phase.tx_id().unwrap_or_default().to_owned(),
                ));
            }
            lock(&self.pending).begin(request.clone())?;
            *phase = RemotePhase::SessionEstablishing {
                tx_id: tx_id.clone(),
            };
        }
        self.feedback.building(&tx_id, true);

        let session = match self.cached_session() {
            Some(session) => session,
            None => {
                match self.wallet.establish(&request.chain_id).await {
                    Ok(session) => {
                        tracing::info!("wallet session {} established", session.topic);
                        *lock(&self.session) = Some(session.clone());
                        session
                    }
                    Err(e) => return Err(self.fail(&tx_id, e.into())),
                }
            }
        };
        if self.canceled(&tx_id) {
            return Ok(self.discard(&tx_id));
        }
        self.set_phase(RemotePhase::SessionReady {
            tx_id: tx_id.clone(),
        });

        if !session.approves(&request.from) {
            let err = SigningError::SignerNotApproved {
                address: request.from.clone(),
            };
            return Err(self.fail(&tx_id, err));
        }

        self.set_phase(RemotePhase::AwaitingApproval {
            tx_id: tx_id.clone(),
        });
        self.feedback.modal(&tx_id, true);
        tracing::debug!("{tx_id}: awaiting wallet approval");
        let approval = self.wallet.request_signature(&session, &request).await;

        // The user may have canceled while the wallet was deciding.
        if self.canceled(&tx_id) {
            return Ok(self.discard(&tx_id));
        }
        let signature = match approval {
            Ok(signature) => signature,
            Err(e) => {
                self.feedback.modal(&tx_id, false);
                return Err(self.fail(&tx_id, e.into()));
            }
        };
        // From here on a cancel is refused.
        if !lock(&self.pending).complete(&tx_id) {
            return Ok(self.discard(&tx_id));
        }
        self.feedback.modal(&tx_id, false);

        if let Err(reason) = self.submitter.submit(&request, &signature).await {
            return Err(self.fail(&tx_id, SigningError::Submit(reason)));
        }
        lock(&self.pending).finish(&tx_id);
        self.feedback.submitted(&tx_id);
        self.feedback.building(&tx_id, false);
        self.set_phase(RemotePhase::Submitted {
            tx_id: tx_id.clone(),
        });
        tracing::info!("{tx_id}: approved by wallet and submitted");
        Ok(SigningOutcome::Completed)
    }

    /// Cancel from the UI overlay: marks the request canceled and closes the
    /// modal and overlay at once. Returns `false` if it was not pending or
    /// is already being submitted.
    pub fn cancel(&self, tx_id: &str) -> bool {
        if !lock(&self.pending).cancel(tx_id) {
            return false;
        }
        tracing::debug!("{tx_id}: canceled by user");
        self.feedback.modal(tx_id, false);
        self.feedback.overlay_close();
        true
    }

    /// The wallet deleted its session. The next request re-establishes.
    pub fn on_session_deleted(&self, topic: &str) -> bool {
        let mut session = lock(&self.session);
        if session.as_ref().is_some_and(|s| s.topic == topic) {
            *session = None;
            tracing::info!("wallet session {topic} deleted");
            true
        } else {
            false
        }
    }

    fn cached_session(&self) -> Option<RemoteSession> {
        let mut session = lock(&self.session);
        if session.as_ref().is_some_and(|s| s.is_expired(Utc::now())) {
            tracing::debug!("cached wallet session expired");
            *session = None;
        }
        session.clone()
    }

    fn canceled(&self, tx_id: &str) -> bool {
        lock(&self.pending).is_canceled(tx_id)
    }

    fn set_phase(&self, phase: RemotePhase) {
        *lock(&self.phase) = phase;
    }

    /// Terminal cancel: nothing is submitted.
    fn discard(&self, tx_id: &str) -> SigningOutcome {
        tracing::debug!("{tx_id}: response discarded after cancel");
        lock(&self.pending).finish(tx_id);
        self.feedback.building(tx_id, false);
        self.set_phase(RemotePhase::Canceled {
            tx_id: tx_id.to_owned(),
        });
        SigningOutcome::Canceled
    }

    fn fail(&self, tx_id: &str, err: SigningError) -> SigningError {
        tracing::warn!("{tx_id}: {err}");
        lock(&self.pending).finish(tx_id);
        self.feedback.failed(tx_id, &err.to_string());
        self.feedback.building(tx_id, false);
        self.set_phase(RemotePhase::Failed {
            tx_id: tx_id.to_owned(),
            reason: err.to_string(),
        });
        err
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

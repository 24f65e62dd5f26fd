//! Channel registry: one live point-to-point endpoint per unordered pair of
//! window kinds.
//!
//! Each endpoint carries two inboxes (one per side) backed by unbounded
//! tokio mpsc channels, so delivery on one endpoint direction is FIFO.
//! Nothing orders messages across different endpoints.
//!
//! Endpoints are generation-stamped. Reconnecting a pair replaces the slot
//! with a new generation; sends through a handle from an older generation
//! fail with [`DeliveryError::Stale`] instead of reaching the new receivers.

use std::collections::HashMap;

use chainwatch_core::Envelope;
use chainwatch_core::types::WindowKind;
use tokio::sync::mpsc;

use crate::error::DeliveryError;

pub type EnvelopeReceiver = mpsc::UnboundedReceiver<Envelope>;

// ─── Endpoint ────────────────────────────────────────────────────────

/// Handle to a live (or formerly live) endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEndpoint {
    source: WindowKind,
    target: WindowKind,
    generation: u64,
}

impl ChannelEndpoint {
    pub fn source(&self) -> WindowKind {
        self.source
    }

    pub fn target(&self) -> WindowKind {
        self.target
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The opposite side of `side`, if `side` is a party of this endpoint.
    pub fn peer_of(&self, side: WindowKind) -> Option<WindowKind> {
        if side == self.source {
            Some(self.target)
        } else if side == self.target {
            Some(self.source)
        } else {
            None
        }
    }
}

/// Unordered pair key: `(a, b)` and `(b, a)` share a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PairKey(WindowKind, WindowKind);

impl PairKey {
    fn new(a: WindowKind, b: WindowKind) -> Self {
        if a <= b { Self(a, b) } else { Self(b, a) }
    }
}

/// Messages arriving at one side of an endpoint.
///
/// Until the first [`ChannelRegistry::on_receive`] the receiver is parked
/// here so early sends are buffered rather than lost.
#[derive(Debug)]
struct Inbox {
    tx: mpsc::UnboundedSender<Envelope>,
    parked: Option<EnvelopeReceiver>,
}

impl Inbox {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            parked: Some(rx),
        }
    }

    /// Take the parked receiver, or swap in a fresh channel so the previous
    /// receiver sees end-of-stream once it drains.
    fn bind(&mut self) -> EnvelopeReceiver {
        if let Some(rx) = self.parked.take() {
            return rx;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.tx = tx;
        rx
    }
}

#[derive(Debug)]
struct Slot {
    endpoint: ChannelEndpoint,
    at_source: Inbox,
    at_target: Inbox,
}

// ─── Registry ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ChannelRegistry {
    slots: HashMap<PairKey, Slot>,
    next_generation: u64,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Establish (or re-establish) the endpoint between `source` and `target`.
    ///
    /// An existing endpoint for the same unordered pair is replaced: its
    /// receivers see end-of-stream and its handle becomes stale.
    pub fn connect(
        &mut self,
        source: WindowKind,
        target: WindowKind,
    ) -> Result<ChannelEndpoint, DeliveryError> {
        if source == target {
            return Err(DeliveryError::SelfLoop(source));
        }
        self.next_generation += 1;
        let endpoint = ChannelEndpoint {
            source,
            target,
            generation: self.next_generation,
        };
        let replaced = self.slots.insert(
            PairKey::new(source, target),
            Slot {
                endpoint: endpoint.clone(),
                at_source: Inbox::new(),
                at_target: Inbox::new(),
            },
        );
        if let Some(old) = replaced {
            tracing::debug!(
                "replaced endpoint {source}<->{target} gen {} with gen {}",
                old.endpoint.generation,
                endpoint.generation
            );
        }
        Ok(endpoint)
    }

    /// Send `envelope` from `from` to the opposite side of `endpoint`.
    pub fn send(
        &self,
        endpoint: &ChannelEndpoint,
        from: WindowKind,
        envelope: Envelope,
    ) -> Result<(), DeliveryError> {
        let slot = self.live_slot(endpoint)?;
        let inbox = if from == slot.endpoint.source {
            &slot.at_target
        } else if from == slot.endpoint.target {
            &slot.at_source
        } else {
            return Err(not_a_party(from, &slot.endpoint));
        };
        let to = slot.endpoint.peer_of(from).unwrap_or(from);
        inbox
            .tx
            .send(envelope)
            .map_err(|_| DeliveryError::ReceiverGone(to))
    }

    /// Bind the receive stream for messages arriving at `side`.
    ///
    /// Binding again rebinds: the previously returned receiver stops
    /// receiving new messages.
    pub fn on_receive(
        &mut self,
        endpoint: &ChannelEndpoint,
        side: WindowKind,
    ) -> Result<EnvelopeReceiver, DeliveryError> {
        let key = PairKey::new(endpoint.source, endpoint.target);
        let live = self
            .slots
            .get(&key)
            .map(|s| s.endpoint.generation)
            .ok_or(DeliveryError::Closed(endpoint.source, endpoint.target))?;
        if live != endpoint.generation {
            return Err(DeliveryError::Stale {
                held: endpoint.generation,
                live,
            });
        }
        let slot = self
            .slots
            .get_mut(&key)
            .ok_or(DeliveryError::Closed(endpoint.source, endpoint.target))?;
        if side == slot.endpoint.source {
            Ok(slot.at_source.bind())
        } else if side == slot.endpoint.target {
            Ok(slot.at_target.bind())
        } else {
            Err(not_a_party(side, &slot.endpoint))
        }
    }

    /// Tear down every endpoint that names `kind`. Returns the count removed.
    pub fn teardown(&mut self, kind: WindowKind) -> usize {
        let before = self.slots.len();
        self.slots.retain(|key, _| key.0 != kind && key.1 != kind);
        before - self.slots.len()
    }

    /// Current live endpoint for the pair, in either order.
    pub fn endpoint(&self, a: WindowKind, b: WindowKind) -> Option<&ChannelEndpoint> {
        self.slots.get(&PairKey::new(a, b)).map(|s| &s.endpoint)
    }

    pub fn is_live(&self, endpoint: &ChannelEndpoint) -> bool {
        self.live_slot(endpoint).is_ok()
    }

    /// Number of live endpoints.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn live_slot(&self, endpoint: &ChannelEndpoint) -> Result<&Slot, DeliveryError> {
        let slot = self
            .slots
            .get(&PairKey::new(endpoint.source, endpoint.target))
            .ok_or(DeliveryError::Closed(endpoint.source, endpoint.target))?;
        if slot.endpoint.generation != endpoint.generation {
            return Err(DeliveryError::Stale {
                held: endpoint.generation,
                live: slot.endpoint.generation,
            });
        }
        Ok(slot)
    }
}

fn not_a_party(side: WindowKind, endpoint: &ChannelEndpoint) -> DeliveryError {
    DeliveryError::NotAParty {
        side,
        source_kind: endpoint.source,
        target_kind: endpoint.target,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

//! Switchboard: composes the window directory and the channel registry.
//!
//! The hub process plays the [`HUB`] window kind. Every other window is a
//! spoke linked to the hub by one endpoint. Broadcast targets are computed
//! from the directory listing filtered by each message's audience; the hub
//! never iterates ad hoc window references.

use std::collections::{BTreeSet, HashMap};

use chainwatch_core::types::{WindowHandle, WindowKind};
use chainwatch_core::{Envelope, RendererMessage};

use crate::channel::{ChannelEndpoint, ChannelRegistry, EnvelopeReceiver};
use crate::error::{DeliveryError, SwitchboardError};
use crate::window::{OpenArgs, OpenOutcome, WindowDirectory};

/// Window kind hosted by the hub process itself.
pub const HUB: WindowKind = WindowKind::Main;

/// Result of linking a spoke window to the hub.
#[derive(Debug)]
pub struct WindowLink {
    pub handle: WindowHandle,
    pub endpoint: ChannelEndpoint,
    /// Hub → window messages, consumed by the window bridge.
    pub to_window: EnvelopeReceiver,
    /// Window → hub messages, consumed by the hub dispatch loop.
    pub to_hub: EnvelopeReceiver,
}

/// Per-broadcast delivery report.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: Vec<WindowKind>,
    pub failed: Vec<(WindowKind, DeliveryError)>,
}

#[derive(Debug, Default)]
pub struct Switchboard {
    directory: WindowDirectory,
    channels: ChannelRegistry,
    links: HashMap<WindowKind, ChannelEndpoint>,
}

impl Switchboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directory(&self) -> &WindowDirectory {
        &self.directory
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Open (or focus) a spoke window.
    pub fn open_window(
        &mut self,
        kind: WindowKind,
        args: OpenArgs,
    ) -> Result<(WindowHandle, OpenOutcome), SwitchboardError> {
        if kind == HUB {
            return Err(SwitchboardError::HubKind(kind));
        }
        Ok(self.directory.open(kind, args))
    }

    /// Connect the hub to the window's kind, replacing any stale endpoint,
    /// and bind both receive streams.
    pub fn link(&mut self, handle: &WindowHandle) -> Result<WindowLink, SwitchboardError> {
        if !self.directory.is_open(handle.kind) {
            return Err(SwitchboardError::NotOpen(handle.kind));
        }
        let endpoint = self.channels.connect(handle.kind, HUB)?;
        let to_window = self.channels.on_receive(&endpoint, handle.kind)?;
        let to_hub = self.channels.on_receive(&endpoint, HUB)?;
        self.directory.mark_connected(handle);
        self.links.insert(handle.kind, endpoint.clone());
        tracing::info!("linked {} ({}) to hub", handle.kind, handle.id);
        Ok(WindowLink {
            handle: handle.clone(),
            endpoint,
            to_window,
            to_hub,
        })
    }

    /// Close a window. Endpoints naming its kind are torn down once no
    /// window of that kind remains.
    pub fn close_window(&mut self, handle: &WindowHandle) -> Option<WindowHandle> {
        let closed = self.directory.close(handle)?;
        if !self.directory.is_open(closed.kind) {
            let removed = self.channels.teardown(closed.kind);
            self.links.remove(&closed.kind);
            tracing::info!("{} closed, {removed} endpoint(s) torn down", closed.kind);
        }
        Some(closed)
    }

    /// Forward an envelope received from a window toward the hub.
    pub fn send_from(&self, kind: WindowKind, envelope: Envelope) -> Result<(), SwitchboardError> {
        let endpoint = self
            .links
            .get(&kind)
            .ok_or(SwitchboardError::NotLinked(kind))?;
        Ok(self.channels.send(endpoint, kind, envelope)?)
    }

    /// Send one message to one window kind regardless of audience.
    pub fn send_to(
        &self,
        kind: WindowKind,
        message: &RendererMessage,
    ) -> Result<(), SwitchboardError> {
        let endpoint = self
            .links
            .get(&kind)
            .ok_or(SwitchboardError::NotLinked(kind))?;
        Ok(self.channels.send(endpoint, HUB, message.encode()?)?)
    }

    /// Spoke kinds that are open, linked, and in the message's audience.
    pub fn targets(&self, message: &RendererMessage) -> Vec<WindowKind> {
        let audience = message.audience();
        let kinds: BTreeSet<WindowKind> = self
            .directory
            .list()
            .into_iter()
            .map(|h| h.kind)
            .filter(|k| *k != HUB && audience.contains(k))
            .filter(|k| self.directory.is_connected(*k) && self.links.contains_key(k))
            .collect();
        kinds.into_iter().collect()
    }

    /// Deliver `message` once to every interested window.
    pub fn broadcast(&self, message: &RendererMessage) -> Result<BroadcastReport, SwitchboardError> {
        let envelope = message.encode()?;
        let mut report = BroadcastReport::default();
        for kind in self.targets(message) {
            let Some(endpoint) = self.links.get(&kind) else {
                continue;
            };
            match self.channels.send(endpoint, HUB, envelope.clone()) {
                Ok(()) => report.delivered.push(kind),
                Err(e) => {
                    tracing::warn!("broadcast {} to {kind} failed: {e}", envelope.task);
                    report.failed.push((kind, e));
                }
            }
        }
        Ok(report)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn open_and_link(sb: &mut Switchboard, kind: WindowKind) -> WindowLink {
        let (handle, _) = sb.open_window(kind, OpenArgs::default()).expect("open");
        sb.link(&handle).expect("link")
    }

    #[test]
    fn hub_kind_cannot_be_opened() {
        let mut sb = Switchboard::new();
        assert!(matches!(
            sb.open_window(HUB, OpenArgs::default()),
            Err(SwitchboardError::HubKind(WindowKind::Main))
        ));
    }

    #[test]
    fn link_requires_open_window() {
        let mut sb = Switchboard::new();
        let (handle, _) = sb
            .open_window(WindowKind::Import, OpenArgs::default())
            .expect("open");
        sb.close_window(&handle);
        assert!(matches!(sb.link(&handle), Err(SwitchboardError::NotOpen(_))));
    }

    #[test]
    fn broadcast_reaches_only_interested_windows() {
        let mut sb = Switchboard::new();
        let mut import = open_and_link(&mut sb, WindowKind::Import);
        let mut open_gov = open_and_link(&mut sb, WindowKind::OpenGov);
        let mut settings = open_and_link(&mut sb, WindowKind::Settings);

        let report = sb
            .broadcast(&RendererMessage::Toast {
                message: "backup imported".to_owned(),
            })
            .expect("broadcast");
        assert_eq!(report.delivered, vec![WindowKind::Settings]);
        assert!(report.failed.is_empty());

        assert_eq!(settings.to_window.try_recv().expect("toast").task, "renderer:toast");
        assert!(import.to_window.try_recv().is_err());
        assert!(open_gov.to_window.try_recv().is_err());
    }

    #[test]
    fn broadcast_delivers_exactly_once_per_kind() {
        let mut sb = Switchboard::new();
        let mut tabs = open_and_link(&mut sb, WindowKind::Tabs);
        // Tab children share the host's endpoint.
        sb.open_window(WindowKind::Tabs, OpenArgs::tab("action"))
            .expect("open tab");
        sb.open_window(WindowKind::Tabs, OpenArgs::tab("open_gov"))
            .expect("open tab");

        let report = sb
            .broadcast(&RendererMessage::ConnectionStatus { online: true })
            .expect("broadcast");
        assert_eq!(report.delivered, vec![WindowKind::Tabs]);
        assert!(tabs.to_window.try_recv().is_ok());
        assert!(tabs.to_window.try_recv().is_err());
    }

    #[test]
    fn unlinked_window_is_not_a_target() {
        let mut sb = Switchboard::new();
        sb.open_window(WindowKind::Settings, OpenArgs::default())
            .expect("open");
        let msg = RendererMessage::ConnectionStatus { online: false };
        assert!(sb.targets(&msg).is_empty());
    }

    #[test]
    fn send_from_window_reaches_hub() {
        let mut sb = Switchboard::new();
        let mut link = open_and_link(&mut sb, WindowKind::Action);
        sb.send_from(
            WindowKind::Action,
            Envelope::new("main:wc:cancel", serde_json::json!({"tx_id": "t1"})),
        )
        .expect("send");
        assert_eq!(link.to_hub.try_recv().expect("msg").task, "main:wc:cancel");
    }

    #[test]
    fn closing_last_window_of_kind_tears_down_endpoint() {
        let mut sb = Switchboard::new();
        let link = open_and_link(&mut sb, WindowKind::Tabs);
        let (child, _) = sb
            .open_window(WindowKind::Tabs, OpenArgs::tab("settings"))
            .expect("open tab");

        sb.close_window(&child);
        assert!(sb.channels().is_live(&link.endpoint), "host still open");

        sb.close_window(&link.handle);
        assert!(!sb.channels().is_live(&link.endpoint));
        assert!(matches!(
            sb.send_to(WindowKind::Tabs, &RendererMessage::OverlayClose),
            Err(SwitchboardError::NotLinked(WindowKind::Tabs))
        ));
    }

    #[test]
    fn relink_replaces_endpoint() {
        let mut sb = Switchboard::new();
        let first = open_and_link(&mut sb, WindowKind::Import);
        let second = sb.link(&first.handle).expect("relink");
        assert!(!sb.channels().is_live(&first.endpoint));
        assert!(sb.channels().is_live(&second.endpoint));
        assert_eq!(sb.channels().len(), 1);
    }
}

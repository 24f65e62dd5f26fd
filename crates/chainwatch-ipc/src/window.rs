//! Window directory: which windows exist, their kind, and whether their
//! channel endpoint has been established.
//!
//! Windows are singletons per kind. The tab host's children are keyed by
//! `(Tabs, tab_id)`; the host itself is `(Tabs, None)`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use chainwatch_core::types::{WindowHandle, WindowId, WindowKind};

// ─── Types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenArgs {
    /// Tab identifier; only honored for [`WindowKind::Tabs`].
    pub tab: Option<String>,
    /// Initialization payload handed to the window on open.
    pub init: Option<serde_json::Value>,
}

impl OpenArgs {
    pub fn tab(tab: impl Into<String>) -> Self {
        Self {
            tab: Some(tab.into()),
            init: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Created,
    /// An existing window was reused and focused.
    Focused,
}

#[derive(Debug, Clone)]
struct WindowEntry {
    handle: WindowHandle,
    init: Option<serde_json::Value>,
    connected: bool,
    opened_at: DateTime<Utc>,
}

// ─── Directory ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct WindowDirectory {
    windows: BTreeMap<WindowId, WindowEntry>,
    next_id: u32,
    focused: Option<WindowId>,
}

impl WindowDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a window, or focus the existing instance for the same key.
    ///
    /// Reopening replaces the stored init args when new ones are given.
    pub fn open(&mut self, kind: WindowKind, args: OpenArgs) -> (WindowHandle, OpenOutcome) {
        let tab = if kind == WindowKind::Tabs { args.tab } else { None };

        if let Some(entry) = self
            .windows
            .values_mut()
            .find(|e| e.handle.kind == kind && e.handle.tab == tab)
        {
            if args.init.is_some() {
                entry.init = args.init;
            }
            self.focused = Some(entry.handle.id);
            return (entry.handle.clone(), OpenOutcome::Focused);
        }

        self.next_id += 1;
        let handle = WindowHandle {
            id: WindowId(self.next_id),
            kind,
            tab,
        };
        self.windows.insert(
            handle.id,
            WindowEntry {
                handle: handle.clone(),
                init: args.init,
                connected: false,
                opened_at: Utc::now(),
            },
        );
        self.focused = Some(handle.id);
        tracing::debug!("window {} opened as {kind}", handle.id);
        (handle, OpenOutcome::Created)
    }

    /// Close a window. Returns the removed handle, or `None` if unknown.
    pub fn close(&mut self, handle: &WindowHandle) -> Option<WindowHandle> {
        let entry = self.windows.remove(&handle.id)?;
        if self.focused == Some(handle.id) {
            self.focused = None;
        }
        tracing::debug!("window {} ({}) closed", handle.id, handle.kind);
        Some(entry.handle)
    }

    /// All open windows, ordered by id.
    pub fn list(&self) -> Vec<&WindowHandle> {
        self.windows.values().map(|e| &e.handle).collect()
    }

    pub fn is_open(&self, kind: WindowKind) -> bool {
        self.windows.values().any(|e| e.handle.kind == kind)
    }

    /// Number of open windows of `kind` (tab children included).
    pub fn count_of(&self, kind: WindowKind) -> usize {
        self.windows
            .values()
            .filter(|e| e.handle.kind == kind)
            .count()
    }

    /// The top-level window of `kind` (tab host rather than its children).
    pub fn find(&self, kind: WindowKind) -> Option<&WindowHandle> {
        self.windows
            .values()
            .find(|e| e.handle.kind == kind && e.handle.tab.is_none())
            .map(|e| &e.handle)
    }

    pub fn focus(&mut self, handle: &WindowHandle) -> bool {
        if self.windows.contains_key(&handle.id) {
            self.focused = Some(handle.id);
            true
        } else {
            false
        }
    }

    pub fn focused(&self) -> Option<&WindowHandle> {
        self.focused
            .and_then(|id| self.windows.get(&id))
            .map(|e| &e.handle)
    }

    /// Record that the window's channel endpoint is established.
    pub fn mark_connected(&mut self, handle: &WindowHandle) -> bool {
        match self.windows.get_mut(&handle.id) {
            Some(entry) => {
                entry.connected = true;
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self, kind: WindowKind) -> bool {
        self.windows
            .values()
            .any(|e| e.handle.kind == kind && e.connected)
    }

    pub fn init_args(&self, handle: &WindowHandle) -> Option<&serde_json::Value> {
        self.windows.get(&handle.id).and_then(|e| e.init.as_ref())
    }

    pub fn opened_at(&self, handle: &WindowHandle) -> Option<DateTime<Utc>> {
        self.windows.get(&handle.id).map(|e| e.opened_at)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_then_focuses() {
        let mut dir = WindowDirectory::new();
        let (first, outcome) = dir.open(WindowKind::Import, OpenArgs::default());
        assert_eq!(outcome, OpenOutcome::Created);

        dir.open(WindowKind::Settings, OpenArgs::default());
        assert_eq!(dir.focused().map(|h| h.kind), Some(WindowKind::Settings));

        let (again, outcome) = dir.open(WindowKind::Import, OpenArgs::default());
        assert_eq!(outcome, OpenOutcome::Focused);
        assert_eq!(again, first);
        assert_eq!(dir.count_of(WindowKind::Import), 1);
        assert_eq!(dir.focused(), Some(&first));
    }

    #[test]
    fn reopen_replaces_init_args() {
        let mut dir = WindowDirectory::new();
        let (handle, _) = dir.open(
            WindowKind::Action,
            OpenArgs {
                tab: None,
                init: Some(serde_json::json!({"tx": 1})),
            },
        );
        dir.open(WindowKind::Action, OpenArgs::default());
        assert_eq!(dir.init_args(&handle), Some(&serde_json::json!({"tx": 1})));

        dir.open(
            WindowKind::Action,
            OpenArgs {
                tab: None,
                init: Some(serde_json::json!({"tx": 2})),
            },
        );
        assert_eq!(dir.init_args(&handle), Some(&serde_json::json!({"tx": 2})));
    }

    #[test]
    fn tab_children_keyed_by_tab_id() {
        let mut dir = WindowDirectory::new();
        let (host, _) = dir.open(WindowKind::Tabs, OpenArgs::default());
        let (a, oa) = dir.open(WindowKind::Tabs, OpenArgs::tab("action"));
        let (b, ob) = dir.open(WindowKind::Tabs, OpenArgs::tab("open_gov"));
        let (a2, oa2) = dir.open(WindowKind::Tabs, OpenArgs::tab("action"));

        assert_eq!((oa, ob, oa2), (OpenOutcome::Created, OpenOutcome::Created, OpenOutcome::Focused));
        assert_ne!(a.id, b.id);
        assert_eq!(a, a2);
        assert_eq!(dir.count_of(WindowKind::Tabs), 3);
        assert_eq!(dir.find(WindowKind::Tabs), Some(&host));
    }

    #[test]
    fn tab_id_ignored_for_singletons() {
        let mut dir = WindowDirectory::new();
        let (h, _) = dir.open(WindowKind::Settings, OpenArgs::tab("x"));
        assert_eq!(h.tab, None);
        let (_, outcome) = dir.open(WindowKind::Settings, OpenArgs::tab("y"));
        assert_eq!(outcome, OpenOutcome::Focused);
    }

    #[test]
    fn close_clears_focus_and_listing() {
        let mut dir = WindowDirectory::new();
        let (h, _) = dir.open(WindowKind::OpenGov, OpenArgs::default());
        assert!(dir.is_open(WindowKind::OpenGov));
        assert_eq!(dir.close(&h), Some(h.clone()));
        assert!(!dir.is_open(WindowKind::OpenGov));
        assert!(dir.focused().is_none());
        assert!(dir.list().is_empty());
        assert_eq!(dir.close(&h), None);
    }

    #[test]
    fn connected_flag_tracks_endpoint() {
        let mut dir = WindowDirectory::new();
        let (h, _) = dir.open(WindowKind::Import, OpenArgs::default());
        assert!(!dir.is_connected(WindowKind::Import));
        assert!(dir.mark_connected(&h));
        assert!(dir.is_connected(WindowKind::Import));
        dir.close(&h);
        assert!(!dir.mark_connected(&h));
    }
}

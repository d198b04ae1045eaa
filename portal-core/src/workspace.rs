//! The editor side of a portal.
//!
//! Portals never touch an editor directly; they drive a [`Workspace`]. The
//! application implements it over its real buffers and panes, tests and the
//! CLI use [`MemoryWorkspace`].

use portal_types::{BufferId, SiteId, TextEdit};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::pane::{PaneOrder, Placement};
use crate::selection::SelectionSet;
use crate::text::{apply_edits, EditError};

/// Operations a portal performs on the local editor.
///
/// Calls for buffers that are not open are ignored.
pub trait Workspace: Send + Sync {
    /// Open a buffer in the pane. No-op if it is already open.
    fn open_buffer(&self, buffer_id: BufferId, title: &str, text: &str, placement: Placement);

    /// Focus an open buffer. Returns false if it is not open.
    fn activate_buffer(&self, buffer_id: BufferId) -> bool;

    /// The focused buffer.
    fn active_buffer(&self) -> Option<BufferId>;

    /// True if the buffer is open.
    fn is_open(&self, buffer_id: BufferId) -> bool;

    /// Replace the whole text.
    fn set_text(&self, buffer_id: BufferId, text: &str);

    /// Apply edits atomically.
    fn apply_edits(&self, buffer_id: BufferId, edits: &[TextEdit]) -> Result<(), EditError>;

    /// Change the title.
    fn set_title(&self, buffer_id: BufferId, title: &str);

    /// Change the modified flag.
    fn set_modified(&self, buffer_id: BufferId, modified: bool);

    /// Show another site's selections. An empty set clears them.
    fn set_decorations(&self, buffer_id: BufferId, site_id: SiteId, selections: &SelectionSet);

    /// Move the local cursor/selections.
    fn set_local_selections(&self, buffer_id: BufferId, selections: &SelectionSet);

    /// Close a buffer.
    fn close_buffer(&self, buffer_id: BufferId);
}

#[derive(Debug, Clone, Default)]
struct MemoryBuffer {
    title: String,
    text: String,
    modified: bool,
    decorations: BTreeMap<SiteId, SelectionSet>,
    local_selections: SelectionSet,
}

#[derive(Debug, Default)]
struct MemoryWorkspaceInner {
    buffers: HashMap<BufferId, MemoryBuffer>,
    pane: PaneOrder,
}

/// In-memory [`Workspace`]: one pane of text buffers.
///
/// Cloning shares the same state, so a test can keep a handle while a portal
/// drives another.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorkspace {
    inner: Arc<Mutex<MemoryWorkspaceInner>>,
}

impl MemoryWorkspace {
    /// An empty workspace.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryWorkspaceInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Text of a buffer.
    pub fn text(&self, buffer_id: BufferId) -> Option<String> {
        self.lock().buffers.get(&buffer_id).map(|b| b.text.clone())
    }

    /// Title of a buffer.
    pub fn title(&self, buffer_id: BufferId) -> Option<String> {
        self.lock().buffers.get(&buffer_id).map(|b| b.title.clone())
    }

    /// Modified flag of a buffer.
    pub fn is_modified(&self, buffer_id: BufferId) -> Option<bool> {
        self.lock().buffers.get(&buffer_id).map(|b| b.modified)
    }

    /// Open buffers in tab order.
    pub fn pane_items(&self) -> Vec<BufferId> {
        self.lock().pane.items().to_vec()
    }

    /// Selections of `site_id` shown in a buffer.
    pub fn decorations(&self, buffer_id: BufferId, site_id: SiteId) -> Option<SelectionSet> {
        self.lock()
            .buffers
            .get(&buffer_id)
            .and_then(|b| b.decorations.get(&site_id).cloned())
    }

    /// Local selections of a buffer.
    pub fn local_selections(&self, buffer_id: BufferId) -> Option<SelectionSet> {
        self.lock()
            .buffers
            .get(&buffer_id)
            .map(|b| b.local_selections.clone())
    }

    fn with_buffer(&self, buffer_id: BufferId, f: impl FnOnce(&mut MemoryBuffer)) {
        if let Some(buffer) = self.lock().buffers.get_mut(&buffer_id) {
            f(buffer);
        }
    }
}

impl Workspace for MemoryWorkspace {
    fn open_buffer(&self, buffer_id: BufferId, title: &str, text: &str, placement: Placement) {
        let mut inner = self.lock();
        if inner.pane.insert(buffer_id, placement) {
            inner.buffers.insert(
                buffer_id,
                MemoryBuffer {
                    title: title.to_string(),
                    text: text.to_string(),
                    ..MemoryBuffer::default()
                },
            );
        }
    }

    fn activate_buffer(&self, buffer_id: BufferId) -> bool {
        self.lock().pane.activate(buffer_id)
    }

    fn active_buffer(&self) -> Option<BufferId> {
        self.lock().pane.active()
    }

    fn is_open(&self, buffer_id: BufferId) -> bool {
        self.lock().pane.contains(buffer_id)
    }

    fn set_text(&self, buffer_id: BufferId, text: &str) {
        self.with_buffer(buffer_id, |b| {
            b.text = text.to_string();
            b.local_selections = b.local_selections.clamped(&b.text);
        });
    }

    fn apply_edits(&self, buffer_id: BufferId, edits: &[TextEdit]) -> Result<(), EditError> {
        let mut inner = self.lock();
        match inner.buffers.get_mut(&buffer_id) {
            Some(b) => {
                apply_edits(&mut b.text, edits)?;
                b.local_selections = b.local_selections.clamped(&b.text);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn set_title(&self, buffer_id: BufferId, title: &str) {
        self.with_buffer(buffer_id, |b| b.title = title.to_string());
    }

    fn set_modified(&self, buffer_id: BufferId, modified: bool) {
        self.with_buffer(buffer_id, |b| b.modified = modified);
    }

    fn set_decorations(&self, buffer_id: BufferId, site_id: SiteId, selections: &SelectionSet) {
        self.with_buffer(buffer_id, |b| {
            if selections.is_empty() {
                b.decorations.remove(&site_id);
            } else {
                b.decorations.insert(site_id, selections.clone());
            }
        });
    }

    fn set_local_selections(&self, buffer_id: BufferId, selections: &SelectionSet) {
        self.with_buffer(buffer_id, |b| {
            b.local_selections = selections.clamped(&b.text);
        });
    }

    fn close_buffer(&self, buffer_id: BufferId) {
        let mut inner = self.lock();
        inner.pane.remove(buffer_id);
        inner.buffers.remove(&buffer_id);
    }
}

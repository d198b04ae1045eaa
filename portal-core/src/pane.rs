//! Ordering of open buffers in a pane.

use portal_types::BufferId;

/// Where a newly opened buffer goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// After every other item.
    #[default]
    End,
    /// Right after the given buffer (at the end if it is not open).
    After(BufferId),
}

/// Open buffers of a pane, in tab order, plus the active one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaneOrder {
    items: Vec<BufferId>,
    active: Option<BufferId>,
}

impl PaneOrder {
    /// An empty pane.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `buffer_id` at `placement`. No-op if it is already open.
    ///
    /// Returns true if the buffer was inserted.
    pub fn insert(&mut self, buffer_id: BufferId, placement: Placement) -> bool {
        if self.items.contains(&buffer_id) {
            return false;
        }
        let index = match placement {
            Placement::End => self.items.len(),
            Placement::After(anchor) => self
                .position(anchor)
                .map_or(self.items.len(), |i| i + 1),
        };
        self.items.insert(index, buffer_id);
        true
    }

    /// Focus an open buffer. Returns false if it is not open.
    pub fn activate(&mut self, buffer_id: BufferId) -> bool {
        if !self.items.contains(&buffer_id) {
            return false;
        }
        self.active = Some(buffer_id);
        true
    }

    /// Close a buffer. If it was active, focus moves to its right neighbour,
    /// or the left one when it was last.
    pub fn remove(&mut self, buffer_id: BufferId) -> bool {
        let Some(index) = self.position(buffer_id) else {
            return false;
        };
        self.items.remove(index);
        if self.active == Some(buffer_id) {
            self.active = self
                .items
                .get(index)
                .or_else(|| index.checked_sub(1).and_then(|i| self.items.get(i)))
                .copied();
        }
        true
    }

    /// Open buffers in tab order.
    pub fn items(&self) -> &[BufferId] {
        &self.items
    }

    /// The focused buffer.
    pub fn active(&self) -> Option<BufferId> {
        self.active
    }

    /// Tab index of `buffer_id`.
    pub fn position(&self, buffer_id: BufferId) -> Option<usize> {
        self.items.iter().position(|id| *id == buffer_id)
    }

    /// True if `buffer_id` is open.
    pub fn contains(&self, buffer_id: BufferId) -> bool {
        self.items.contains(&buffer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_after_anchor() {
        let (a, b, c) = (BufferId::new(), BufferId::new(), BufferId::new());
        let mut pane = PaneOrder::new();
        pane.insert(a, Placement::End);
        pane.insert(b, Placement::End);
        pane.insert(c, Placement::After(a));

        assert_eq!(pane.items(), &[a, c, b]);
    }

    #[test]
    fn missing_anchor_appends() {
        let (a, b) = (BufferId::new(), BufferId::new());
        let mut pane = PaneOrder::new();
        pane.insert(a, Placement::End);
        pane.insert(b, Placement::After(BufferId::new()));

        assert_eq!(pane.items(), &[a, b]);
    }

    #[test]
    fn reinserting_keeps_position() {
        let (a, b) = (BufferId::new(), BufferId::new());
        let mut pane = PaneOrder::new();
        pane.insert(a, Placement::End);
        pane.insert(b, Placement::End);

        assert!(!pane.insert(a, Placement::After(b)));
        assert_eq!(pane.items(), &[a, b]);
    }

    #[test]
    fn activate_requires_open_buffer() {
        let a = BufferId::new();
        let mut pane = PaneOrder::new();
        assert!(!pane.activate(a));
        pane.insert(a, Placement::End);
        assert!(pane.activate(a));
        assert_eq!(pane.active(), Some(a));
    }

    #[test]
    fn removing_active_focuses_neighbour() {
        let (a, b, c) = (BufferId::new(), BufferId::new(), BufferId::new());
        let mut pane = PaneOrder::new();
        for id in [a, b, c] {
            pane.insert(id, Placement::End);
        }

        pane.activate(b);
        pane.remove(b);
        assert_eq!(pane.active(), Some(c));

        pane.remove(c);
        assert_eq!(pane.active(), Some(a));

        pane.remove(a);
        assert_eq!(pane.active(), None);
    }
}

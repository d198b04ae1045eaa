//! Selection sets and the per-(site, buffer) cursor store.
//!
//! Every site publishes its complete selection set on each change, tagged with
//! the revision of the buffer the positions refer to. Receivers keep only the
//! latest set per (site, buffer):
//! - an update older than what is stored for that site is stale and dropped
//! - an update referring to a revision the receiver has not reached yet is
//!   parked (latest only) until [`CursorStore::promote`] is called
//! - everything else replaces the stored set, clamped to the current text

use portal_types::{BufferId, CursorUpdate, Revision, SelectionRange, SiteId};
use serde::Serialize;
use std::collections::HashMap;

use crate::text::clamp_point;

/// Sorted, non-overlapping selection ranges of one site.
///
/// Construction sorts by (start row, start column) and merges overlapping
/// ranges, so two sets holding the same selections compare equal regardless
/// of the order they were reported in.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SelectionSet(Vec<SelectionRange>);

impl SelectionSet {
    /// Normalize `ranges` into a set.
    pub fn new(ranges: impl IntoIterator<Item = SelectionRange>) -> Self {
        let mut ranges: Vec<SelectionRange> = ranges
            .into_iter()
            .map(|r| SelectionRange::new(r.start, r.end))
            .collect();
        ranges.sort_by_key(|r| (r.start, r.end));

        let mut merged: Vec<SelectionRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if range.start < last.end || range == *last => {
                    if range.end > last.end {
                        last.end = range.end;
                    }
                }
                _ => merged.push(range),
            }
        }
        Self(merged)
    }

    /// The ranges, in order.
    pub fn ranges(&self) -> &[SelectionRange] {
        &self.0
    }

    /// Copy the ranges out.
    pub fn to_vec(&self) -> Vec<SelectionRange> {
        self.0.clone()
    }

    /// Number of ranges.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there are no ranges.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The set with every endpoint moved inside `text`.
    pub fn clamped(&self, text: &str) -> Self {
        Self::new(self.0.iter().map(|r| {
            SelectionRange::new(clamp_point(text, r.start), clamp_point(text, r.end))
        }))
    }
}

impl FromIterator<SelectionRange> for SelectionSet {
    fn from_iter<I: IntoIterator<Item = SelectionRange>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// What the store did with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOutcome {
    /// Became the site's current selections.
    Stored,
    /// Refers to a revision not reached yet; kept aside.
    Parked,
    /// Older than what is already stored; dropped.
    Stale,
}

#[derive(Debug, Clone)]
struct Tracked {
    revision: Revision,
    selections: SelectionSet,
}

/// Latest selections of every site, per buffer.
#[derive(Debug, Clone, Default)]
pub struct CursorStore {
    current: HashMap<(SiteId, BufferId), Tracked>,
    parked: HashMap<(SiteId, BufferId), Tracked>,
}

impl CursorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer an update received for a buffer at `buffer_revision` holding `text`.
    pub fn accept(
        &mut self,
        update: &CursorUpdate,
        buffer_revision: Revision,
        text: &str,
    ) -> CursorOutcome {
        let key = (update.site_id, update.buffer_id);

        if let Some(existing) = self.current.get(&key) {
            if update.revision < existing.revision {
                return CursorOutcome::Stale;
            }
        }

        let selections = SelectionSet::new(update.selections.iter().copied());

        if update.revision > buffer_revision {
            let newer = self
                .parked
                .get(&key)
                .map_or(true, |parked| update.revision >= parked.revision);
            if newer {
                self.parked.insert(
                    key,
                    Tracked {
                        revision: update.revision,
                        selections,
                    },
                );
            }
            return CursorOutcome::Parked;
        }

        self.current.insert(
            key,
            Tracked {
                revision: update.revision,
                selections: selections.clamped(text),
            },
        );
        if self
            .parked
            .get(&key)
            .is_some_and(|parked| parked.revision <= update.revision)
        {
            self.parked.remove(&key);
        }
        CursorOutcome::Stored
    }

    /// Move parked updates of `buffer_id` that `buffer_revision` has caught up to.
    ///
    /// Returns the sites whose current selections changed, sorted.
    pub fn promote(
        &mut self,
        buffer_id: BufferId,
        buffer_revision: Revision,
        text: &str,
    ) -> Vec<SiteId> {
        let ready: Vec<(SiteId, BufferId)> = self
            .parked
            .iter()
            .filter(|((_, buffer), tracked)| {
                *buffer == buffer_id && tracked.revision <= buffer_revision
            })
            .map(|(key, _)| *key)
            .collect();

        let mut promoted = Vec::new();
        for key in ready {
            if let Some(tracked) = self.parked.remove(&key) {
                let stale = self
                    .current
                    .get(&key)
                    .is_some_and(|existing| tracked.revision < existing.revision);
                if !stale {
                    self.current.insert(
                        key,
                        Tracked {
                            revision: tracked.revision,
                            selections: tracked.selections.clamped(text),
                        },
                    );
                    promoted.push(key.0);
                }
            }
        }
        promoted.sort();
        promoted
    }

    /// Current selections of `site_id` in `buffer_id`.
    pub fn get(&self, site_id: SiteId, buffer_id: BufferId) -> Option<&SelectionSet> {
        self.current.get(&(site_id, buffer_id)).map(|t| &t.selections)
    }

    /// Revision the stored selections of `site_id` refer to.
    pub fn revision_of(&self, site_id: SiteId, buffer_id: BufferId) -> Option<Revision> {
        self.current.get(&(site_id, buffer_id)).map(|t| t.revision)
    }

    /// Every site's selections in `buffer_id`, sorted by site.
    pub fn for_buffer(&self, buffer_id: BufferId) -> Vec<(SiteId, SelectionSet)> {
        let mut sites: Vec<(SiteId, SelectionSet)> = self
            .current
            .iter()
            .filter(|((_, buffer), _)| *buffer == buffer_id)
            .map(|((site, _), tracked)| (*site, tracked.selections.clone()))
            .collect();
        sites.sort_by_key(|(site, _)| *site);
        sites
    }

    /// Everything stored, as wire updates (for replay to a new site).
    pub fn updates(&self) -> Vec<CursorUpdate> {
        let mut updates: Vec<CursorUpdate> = self
            .current
            .iter()
            .map(|((site_id, buffer_id), tracked)| CursorUpdate {
                site_id: *site_id,
                buffer_id: *buffer_id,
                revision: tracked.revision,
                selections: tracked.selections.to_vec(),
            })
            .collect();
        updates.sort_by_key(|u| (u.site_id, *u.buffer_id.as_uuid()));
        updates
    }

    /// Forget a site (it left or was evicted). Returns the buffers it had selections in.
    pub fn remove_site(&mut self, site_id: SiteId) -> Vec<BufferId> {
        let mut buffers: Vec<BufferId> = self
            .current
            .keys()
            .filter(|(site, _)| *site == site_id)
            .map(|(_, buffer)| *buffer)
            .collect();
        self.current.retain(|(site, _), _| *site != site_id);
        self.parked.retain(|(site, _), _| *site != site_id);
        buffers.sort_by_key(|b| *b.as_uuid());
        buffers
    }

    /// Forget a buffer.
    pub fn remove_buffer(&mut self, buffer_id: BufferId) {
        self.current.retain(|(_, buffer), _| *buffer != buffer_id);
        self.parked.retain(|(_, buffer), _| *buffer != buffer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_types::Point;

    fn update(
        site: u32,
        buffer_id: BufferId,
        revision: u64,
        ranges: &[SelectionRange],
    ) -> CursorUpdate {
        CursorUpdate {
            site_id: SiteId::new(site),
            buffer_id,
            revision: Revision::new(revision),
            selections: ranges.to_vec(),
        }
    }

    #[test]
    fn sets_compare_equal_regardless_of_arrival_order() {
        let a = SelectionSet::new([
            SelectionRange::from_coords(0, 4, 0, 6),
            SelectionRange::from_coords(0, 0, 0, 2),
        ]);
        let b = SelectionSet::new([
            SelectionRange::from_coords(0, 0, 0, 2),
            SelectionRange::from_coords(0, 4, 0, 6),
        ]);
        assert_eq!(a, b);
        assert_eq!(a.ranges()[0], SelectionRange::from_coords(0, 0, 0, 2));
    }

    #[test]
    fn overlapping_ranges_merge() {
        let set = SelectionSet::new([
            SelectionRange::from_coords(0, 0, 0, 5),
            SelectionRange::from_coords(0, 3, 1, 0),
            SelectionRange::from_coords(2, 0, 2, 1),
        ]);
        assert_eq!(
            set.ranges(),
            &[
                SelectionRange::from_coords(0, 0, 1, 0),
                SelectionRange::from_coords(2, 0, 2, 1)
            ]
        );
    }

    #[test]
    fn duplicate_cursors_collapse() {
        let cursor = SelectionRange::cursor(Point::new(0, 4));
        let set = SelectionSet::new([cursor, cursor]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn touching_ranges_stay_separate() {
        let set = SelectionSet::new([
            SelectionRange::from_coords(0, 0, 0, 2),
            SelectionRange::from_coords(0, 2, 0, 4),
        ]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn clamped_moves_ranges_inside_text() {
        let set = SelectionSet::new([SelectionRange::from_coords(0, 2, 4, 9)]);
        let clamped = set.clamped("abc\nde");
        assert_eq!(clamped.ranges(), &[SelectionRange::from_coords(0, 2, 1, 2)]);
    }

    #[test]
    fn store_keeps_latest_per_site() {
        let mut store = CursorStore::new();
        let buffer = BufferId::new();
        let text = "const hello = \"world\"";

        let first = update(1, buffer, 1, &[SelectionRange::cursor(Point::new(0, 4))]);
        let second = update(1, buffer, 1, &[SelectionRange::from_coords(0, 0, 0, 2)]);

        assert_eq!(store.accept(&first, Revision::new(1), text), CursorOutcome::Stored);
        assert_eq!(store.accept(&second, Revision::new(1), text), CursorOutcome::Stored);
        assert_eq!(
            store.get(SiteId::new(1), buffer).unwrap().ranges(),
            &[SelectionRange::from_coords(0, 0, 0, 2)]
        );
    }

    #[test]
    fn older_revision_is_stale() {
        let mut store = CursorStore::new();
        let buffer = BufferId::new();

        store.accept(&update(2, buffer, 5, &[]), Revision::new(5), "x");
        let outcome = store.accept(
            &update(2, buffer, 4, &[SelectionRange::cursor(Point::zero())]),
            Revision::new(5),
            "x",
        );

        assert_eq!(outcome, CursorOutcome::Stale);
        assert!(store.get(SiteId::new(2), buffer).unwrap().is_empty());
    }

    #[test]
    fn future_revision_is_parked_then_promoted() {
        let mut store = CursorStore::new();
        let buffer = BufferId::new();
        let ahead = update(1, buffer, 3, &[SelectionRange::from_coords(0, 1, 0, 3)]);

        assert_eq!(store.accept(&ahead, Revision::new(2), "abcd"), CursorOutcome::Parked);
        assert!(store.get(SiteId::new(1), buffer).is_none());

        assert!(store.promote(buffer, Revision::new(2), "abcd").is_empty());
        assert_eq!(store.promote(buffer, Revision::new(3), "abcd"), vec![SiteId::new(1)]);
        assert_eq!(store.revision_of(SiteId::new(1), buffer), Some(Revision::new(3)));
    }

    #[test]
    fn only_latest_parked_update_survives() {
        let mut store = CursorStore::new();
        let buffer = BufferId::new();

        let newer = update(1, buffer, 4, &[SelectionRange::cursor(Point::new(0, 1))]);
        let older = update(1, buffer, 3, &[SelectionRange::cursor(Point::new(0, 2))]);
        store.accept(&newer, Revision::new(1), "abc");
        store.accept(&older, Revision::new(1), "abc");
        store.promote(buffer, Revision::new(4), "abc");

        assert_eq!(
            store.get(SiteId::new(1), buffer).unwrap().ranges(),
            &[SelectionRange::cursor(Point::new(0, 1))]
        );
    }

    #[test]
    fn remove_site_forgets_everything() {
        let mut store = CursorStore::new();
        let buffer = BufferId::new();
        store.accept(&update(3, buffer, 1, &[]), Revision::new(1), "");
        store.accept(&update(3, buffer, 9, &[]), Revision::new(1), "");

        assert_eq!(store.remove_site(SiteId::new(3)), vec![buffer]);
        assert!(store.for_buffer(buffer).is_empty());
        assert!(store.promote(buffer, Revision::new(9), "").is_empty());
    }

    #[test]
    fn updates_reproduce_stored_state() {
        let mut store = CursorStore::new();
        let buffer = BufferId::new();
        let ranges = [SelectionRange::from_coords(0, 0, 0, 2)];
        store.accept(&update(1, buffer, 2, &ranges), Revision::new(2), "hello");

        let updates = store.updates();
        assert_eq!(updates, vec![update(1, buffer, 2, &ranges)]);
    }
}

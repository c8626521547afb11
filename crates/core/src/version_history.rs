//! Version histories.
//!
//! A [`VersionHistory`] is one lineage of a run's events from the root to a
//! branch tip, compressed into `(event_id, version)` checkpoints: each item
//! marks the last event written at that version before the version changed.
//! A run that has been reset or has diverged across regions owns several
//! lineages; [`VersionHistories`] keeps them in an index-addressed arena with
//! one marked current. Branches only ever fork, never merge, so a flat
//! `Vec` indexed by position is all the structure needed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::branch::BranchToken;
use crate::EMPTY_EVENT_ID;

/// A `(event_id, version)` checkpoint. Two items name the same point iff
/// both fields are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionHistoryItem {
    pub event_id: i64,
    pub version: i64,
}

impl VersionHistoryItem {
    pub fn new(event_id: i64, version: i64) -> Self {
        VersionHistoryItem { event_id, version }
    }
}

impl fmt::Display for VersionHistoryItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(event {}, version {})", self.event_id, self.version)
    }
}

/// Errors raised while building or querying version histories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionHistoryError {
    /// The version history has no items.
    Empty,
    /// An item's version is lower than the version before it.
    VersionDecreased {
        last: VersionHistoryItem,
        incoming: VersionHistoryItem,
    },
    /// An item's event id does not advance past the previous item.
    EventIdNotIncreasing {
        last: VersionHistoryItem,
        incoming: VersionHistoryItem,
    },
    /// No history at the requested arena index.
    IndexOutOfBounds { index: usize, len: usize },
    /// The event id lies outside the lineage.
    EventNotFound { event_id: i64 },
    /// Two lineages share no version at all.
    NoCommonAncestor,
}

impl fmt::Display for VersionHistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionHistoryError::Empty => write!(f, "version history is empty"),
            VersionHistoryError::VersionDecreased { last, incoming } => write!(
                f,
                "version decreased: last item {}, incoming {}",
                last, incoming
            ),
            VersionHistoryError::EventIdNotIncreasing { last, incoming } => write!(
                f,
                "event id not increasing: last item {}, incoming {}",
                last, incoming
            ),
            VersionHistoryError::IndexOutOfBounds { index, len } => write!(
                f,
                "version history index {} out of bounds (have {})",
                index, len
            ),
            VersionHistoryError::EventNotFound { event_id } => {
                write!(f, "event {} not found in version history", event_id)
            }
            VersionHistoryError::NoCommonAncestor => {
                write!(f, "version histories share no common ancestor")
            }
        }
    }
}

impl std::error::Error for VersionHistoryError {}

// ──────────────────────────────────────────────
// VersionHistory
// ──────────────────────────────────────────────

/// One lineage of a run's history plus the branch that stores it.
///
/// Invariants (checked by [`VersionHistory::validate`] and maintained by
/// [`VersionHistory::add_or_update_item`]): event ids strictly increase and
/// versions never decrease along `items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawVersionHistory")]
pub struct VersionHistory {
    branch_token: BranchToken,
    items: Vec<VersionHistoryItem>,
}

/// Wire shape of [`VersionHistory`], validated on the way in.
#[derive(Deserialize)]
struct RawVersionHistory {
    branch_token: BranchToken,
    items: Vec<VersionHistoryItem>,
}

impl TryFrom<RawVersionHistory> for VersionHistory {
    type Error = VersionHistoryError;

    fn try_from(raw: RawVersionHistory) -> Result<Self, Self::Error> {
        let history = VersionHistory::new(raw.branch_token, raw.items);
        history.validate()?;
        Ok(history)
    }
}

impl VersionHistory {
    pub fn new(branch_token: BranchToken, items: Vec<VersionHistoryItem>) -> Self {
        VersionHistory {
            branch_token,
            items,
        }
    }

    pub fn branch_token(&self) -> &BranchToken {
        &self.branch_token
    }

    pub fn set_branch_token(&mut self, branch_token: BranchToken) {
        self.branch_token = branch_token;
    }

    pub fn items(&self) -> &[VersionHistoryItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn first_item(&self) -> Result<VersionHistoryItem, VersionHistoryError> {
        self.items.first().copied().ok_or(VersionHistoryError::Empty)
    }

    pub fn last_item(&self) -> Result<VersionHistoryItem, VersionHistoryError> {
        self.items.last().copied().ok_or(VersionHistoryError::Empty)
    }

    /// Check the ordering invariants over the whole item list.
    pub fn validate(&self) -> Result<(), VersionHistoryError> {
        if self.items.is_empty() {
            return Err(VersionHistoryError::Empty);
        }
        for pair in self.items.windows(2) {
            let (last, incoming) = (pair[0], pair[1]);
            if incoming.version < last.version {
                return Err(VersionHistoryError::VersionDecreased { last, incoming });
            }
            if incoming.event_id <= last.event_id {
                return Err(VersionHistoryError::EventIdNotIncreasing { last, incoming });
            }
        }
        Ok(())
    }

    /// Record that `item.event_id` was written at `item.version`.
    ///
    /// Same version as the tip extends the tip; a higher version opens a new
    /// item (a failover boundary). Lower versions and non-advancing event ids
    /// are rejected.
    pub fn add_or_update_item(
        &mut self,
        item: VersionHistoryItem,
    ) -> Result<(), VersionHistoryError> {
        let Some(last) = self.items.last_mut() else {
            self.items.push(item);
            return Ok(());
        };
        if item.version < last.version {
            return Err(VersionHistoryError::VersionDecreased {
                last: *last,
                incoming: item,
            });
        }
        if item.event_id <= last.event_id {
            return Err(VersionHistoryError::EventIdNotIncreasing {
                last: *last,
                incoming: item,
            });
        }
        if item.version == last.version {
            last.event_id = item.event_id;
        } else {
            self.items.push(item);
        }
        Ok(())
    }

    /// Whether `item` is a point on this lineage.
    ///
    /// Each stored item covers the events after the previous item up to and
    /// including its own event id, all at its version. An exact stored item
    /// always matches; `(E, V+1)` or `(E+1, V)` past the tip never does.
    pub fn contains_item(&self, item: VersionHistoryItem) -> bool {
        let mut prev_event_id = EMPTY_EVENT_ID;
        for current in &self.items {
            if item.version == current.version
                && prev_event_id < item.event_id
                && item.event_id <= current.event_id
            {
                return true;
            }
            prev_event_id = current.event_id;
        }
        false
    }

    /// Version that wrote `event_id` on this lineage.
    pub fn get_event_version(&self, event_id: i64) -> Result<i64, VersionHistoryError> {
        let last = self.last_item()?;
        if event_id <= EMPTY_EVENT_ID || event_id > last.event_id {
            return Err(VersionHistoryError::EventNotFound { event_id });
        }
        self.items
            .iter()
            .find(|item| event_id <= item.event_id)
            .map(|item| item.version)
            .ok_or(VersionHistoryError::EventNotFound { event_id })
    }

    /// Lowest common ancestor point with `other`: walk both lineages from
    /// their tips, stepping back the side with the higher version, until the
    /// versions agree.
    pub fn find_lca_item(
        &self,
        other: &VersionHistory,
    ) -> Result<VersionHistoryItem, VersionHistoryError> {
        let mut i = self.items.len();
        let mut j = other.items.len();
        while i > 0 && j > 0 {
            let ours = self.items[i - 1];
            let theirs = other.items[j - 1];
            if ours.version == theirs.version {
                return Ok(VersionHistoryItem::new(
                    ours.event_id.min(theirs.event_id),
                    ours.version,
                ));
            }
            if ours.version > theirs.version {
                i -= 1;
            } else {
                j -= 1;
            }
        }
        Err(VersionHistoryError::NoCommonAncestor)
    }

    /// True when `lca` is this lineage's tip, i.e. new events can be
    /// appended to it without forking.
    pub fn is_lca_appendable(&self, lca: VersionHistoryItem) -> bool {
        self.items.last() == Some(&lca)
    }
}

// ──────────────────────────────────────────────
// VersionHistories
// ──────────────────────────────────────────────

/// All lineages of one run, one of them current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawVersionHistories")]
pub struct VersionHistories {
    current_index: usize,
    histories: Vec<VersionHistory>,
}

/// Wire shape of [`VersionHistories`]. Each lineage is validated by its own
/// deserializer; the current index must name one of them.
#[derive(Deserialize)]
struct RawVersionHistories {
    current_index: usize,
    histories: Vec<VersionHistory>,
}

impl TryFrom<RawVersionHistories> for VersionHistories {
    type Error = VersionHistoryError;

    fn try_from(raw: RawVersionHistories) -> Result<Self, Self::Error> {
        if raw.current_index >= raw.histories.len() {
            return Err(VersionHistoryError::IndexOutOfBounds {
                index: raw.current_index,
                len: raw.histories.len(),
            });
        }
        Ok(VersionHistories {
            current_index: raw.current_index,
            histories: raw.histories,
        })
    }
}

impl VersionHistories {
    /// Start with a single lineage, which becomes current.
    pub fn new(initial: VersionHistory) -> Result<Self, VersionHistoryError> {
        initial.validate()?;
        Ok(VersionHistories {
            current_index: 0,
            histories: vec![initial],
        })
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current(&self) -> &VersionHistory {
        &self.histories[self.current_index]
    }

    pub fn current_mut(&mut self) -> &mut VersionHistory {
        &mut self.histories[self.current_index]
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VersionHistory> {
        self.histories.iter()
    }

    pub fn get(&self, index: usize) -> Result<&VersionHistory, VersionHistoryError> {
        self.histories
            .get(index)
            .ok_or(VersionHistoryError::IndexOutOfBounds {
                index,
                len: self.histories.len(),
            })
    }

    pub fn set_current_index(&mut self, index: usize) -> Result<(), VersionHistoryError> {
        self.get(index)?;
        self.current_index = index;
        Ok(())
    }

    /// Add a lineage. It becomes current when its tip carries a higher
    /// version than the current tip. Returns `(current_changed, index)`.
    pub fn add_version_history(
        &mut self,
        history: VersionHistory,
    ) -> Result<(bool, usize), VersionHistoryError> {
        history.validate()?;
        let incoming_version = history.last_item()?.version;
        let current_version = self.current().last_item()?.version;

        self.histories.push(history);
        let index = self.histories.len() - 1;
        let current_changed = incoming_version > current_version;
        if current_changed {
            self.current_index = index;
        }
        Ok((current_changed, index))
    }

    /// Index of the first lineage containing `item`, scanning in arena order.
    /// Duplicates across lineages resolve to the lowest index.
    pub fn find_first_index_by_item(&self, item: VersionHistoryItem) -> Option<usize> {
        self.histories
            .iter()
            .position(|history| history.contains_item(item))
    }

    /// The lineage sharing the deepest common point with `incoming`, and that
    /// point. Ties keep the lowest index.
    pub fn find_lca_index_and_item(
        &self,
        incoming: &VersionHistory,
    ) -> Result<(usize, VersionHistoryItem), VersionHistoryError> {
        let mut best: Option<(usize, VersionHistoryItem)> = None;
        for (index, history) in self.histories.iter().enumerate() {
            let lca = match history.find_lca_item(incoming) {
                Ok(lca) => lca,
                Err(VersionHistoryError::NoCommonAncestor) => continue,
                Err(e) => return Err(e),
            };
            match best {
                Some((_, found)) if found.event_id >= lca.event_id => {}
                _ => best = Some((index, lca)),
            }
        }
        best.ok_or(VersionHistoryError::NoCommonAncestor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(name: &str) -> BranchToken {
        BranchToken::new(name.as_bytes().to_vec())
    }

    fn items(pairs: &[(i64, i64)]) -> Vec<VersionHistoryItem> {
        pairs
            .iter()
            .map(|&(event_id, version)| VersionHistoryItem::new(event_id, version))
            .collect()
    }

    fn history(name: &str, pairs: &[(i64, i64)]) -> VersionHistory {
        VersionHistory::new(token(name), items(pairs))
    }

    // ── VersionHistory ──────────────────────────

    #[test]
    fn add_or_update_extends_same_version() {
        let mut h = VersionHistory::new(token("a"), Vec::new());
        h.add_or_update_item(VersionHistoryItem::new(1, 0)).unwrap();
        h.add_or_update_item(VersionHistoryItem::new(2, 0)).unwrap();
        h.add_or_update_item(VersionHistoryItem::new(3, 0)).unwrap();
        assert_eq!(h.items(), items(&[(3, 0)]).as_slice());
    }

    #[test]
    fn add_or_update_opens_item_on_failover() {
        let mut h = history("a", &[(3, 0)]);
        h.add_or_update_item(VersionHistoryItem::new(4, 10)).unwrap();
        h.add_or_update_item(VersionHistoryItem::new(5, 10)).unwrap();
        assert_eq!(h.items(), items(&[(3, 0), (5, 10)]).as_slice());
    }

    #[test]
    fn add_or_update_rejects_lower_version() {
        let mut h = history("a", &[(3, 10)]);
        let err = h
            .add_or_update_item(VersionHistoryItem::new(4, 2))
            .unwrap_err();
        assert!(matches!(err, VersionHistoryError::VersionDecreased { .. }));
    }

    #[test]
    fn add_or_update_rejects_stale_event_id() {
        let mut h = history("a", &[(3, 0)]);
        let err = h
            .add_or_update_item(VersionHistoryItem::new(3, 0))
            .unwrap_err();
        assert!(matches!(err, VersionHistoryError::EventIdNotIncreasing { .. }));
    }

    #[test]
    fn contains_exact_items() {
        let h = history("a", &[(1, 0), (2, 0), (3, 0)]);
        assert!(h.contains_item(VersionHistoryItem::new(2, 0)));
        assert!(h.contains_item(VersionHistoryItem::new(3, 0)));
    }

    #[test]
    fn contains_rejects_neighbours_of_tip() {
        let h = history("a", &[(1, 0), (2, 0)]);
        assert!(h.contains_item(VersionHistoryItem::new(2, 0)));
        assert!(!h.contains_item(VersionHistoryItem::new(2, 1)));
        assert!(!h.contains_item(VersionHistoryItem::new(3, 0)));
    }

    #[test]
    fn contains_interior_of_compressed_segment() {
        let h = history("a", &[(3, 0), (6, 5)]);
        assert!(h.contains_item(VersionHistoryItem::new(2, 0)));
        assert!(h.contains_item(VersionHistoryItem::new(4, 5)));
        assert!(!h.contains_item(VersionHistoryItem::new(4, 0)));
        assert!(!h.contains_item(VersionHistoryItem::new(3, 5)));
    }

    #[test]
    fn get_event_version_walks_segments() {
        let h = history("a", &[(3, 0), (6, 5)]);
        assert_eq!(h.get_event_version(1).unwrap(), 0);
        assert_eq!(h.get_event_version(3).unwrap(), 0);
        assert_eq!(h.get_event_version(4).unwrap(), 5);
        assert_eq!(
            h.get_event_version(7).unwrap_err(),
            VersionHistoryError::EventNotFound { event_id: 7 }
        );
    }

    #[test]
    fn lca_of_diverged_lineages() {
        let local = history("local", &[(3, 0), (5, 4), (7, 6)]);
        let remote = history("remote", &[(3, 0), (6, 4), (9, 8)]);
        assert_eq!(
            local.find_lca_item(&remote).unwrap(),
            VersionHistoryItem::new(5, 4)
        );
        assert!(!local.is_lca_appendable(VersionHistoryItem::new(5, 4)));
    }

    #[test]
    fn lca_without_shared_version() {
        let a = history("a", &[(3, 1)]);
        let b = history("b", &[(3, 2)]);
        assert_eq!(
            a.find_lca_item(&b).unwrap_err(),
            VersionHistoryError::NoCommonAncestor
        );
    }

    #[test]
    fn validate_checks_order() {
        assert_eq!(
            history("a", &[]).validate().unwrap_err(),
            VersionHistoryError::Empty
        );
        assert!(history("a", &[(2, 0), (2, 1)]).validate().is_err());
        assert!(history("a", &[(2, 3), (4, 1)]).validate().is_err());
        assert!(history("a", &[(2, 0), (4, 1)]).validate().is_ok());
    }

    // ── VersionHistories ────────────────────────

    #[test]
    fn new_rejects_empty_lineage() {
        assert!(VersionHistories::new(history("a", &[])).is_err());
    }

    #[test]
    fn higher_version_lineage_becomes_current() {
        let mut all = VersionHistories::new(history("a", &[(3, 0)])).unwrap();
        let (changed, index) = all
            .add_version_history(history("b", &[(2, 0), (4, 7)]))
            .unwrap();
        assert!(changed);
        assert_eq!(index, 1);
        assert_eq!(all.current().branch_token(), &token("b"));

        let (changed, index) = all
            .add_version_history(history("c", &[(3, 0), (5, 2)]))
            .unwrap();
        assert!(!changed);
        assert_eq!(index, 2);
        assert_eq!(all.current_index(), 1);
    }

    #[test]
    fn find_first_index_scans_in_order() {
        let mut all = VersionHistories::new(history("a", &[(2, 0)])).unwrap();
        all.add_version_history(history("b", &[(2, 0), (4, 3)]))
            .unwrap();
        all.add_version_history(history("c", &[(1, 0), (3, 5)]))
            .unwrap();

        assert_eq!(all.find_first_index_by_item(VersionHistoryItem::new(2, 0)), Some(0));
        assert_eq!(all.find_first_index_by_item(VersionHistoryItem::new(4, 3)), Some(1));
        assert_eq!(all.find_first_index_by_item(VersionHistoryItem::new(3, 5)), Some(2));
        assert_eq!(all.find_first_index_by_item(VersionHistoryItem::new(5, 3)), None);
    }

    #[test]
    fn get_out_of_bounds() {
        let all = VersionHistories::new(history("a", &[(2, 0)])).unwrap();
        assert_eq!(
            all.get(3).unwrap_err(),
            VersionHistoryError::IndexOutOfBounds { index: 3, len: 1 }
        );
    }

    #[test]
    fn lca_index_prefers_deepest_point() {
        let mut all = VersionHistories::new(history("a", &[(3, 0)])).unwrap();
        all.add_version_history(history("b", &[(3, 0), (8, 4)]))
            .unwrap();
        let incoming = history("in", &[(3, 0), (6, 4), (7, 9)]);
        let (index, item) = all.find_lca_index_and_item(&incoming).unwrap();
        assert_eq!(index, 1);
        assert_eq!(item, VersionHistoryItem::new(6, 4));
    }

    #[test]
    fn serde_keeps_valid_histories() {
        let mut all = VersionHistories::new(history("a", &[(3, 0)])).unwrap();
        all.add_version_history(history("b", &[(2, 0), (5, 1)]))
            .unwrap();
        let json = serde_json::to_string(&all).unwrap();
        let back: VersionHistories = serde_json::from_str(&json).unwrap();
        assert_eq!(back, all);
        assert_eq!(back.current_index(), 1);
    }

    #[test]
    fn deserialize_rejects_broken_invariants() {
        // no lineages, index past the end
        let err = serde_json::from_str::<VersionHistories>(r#"{"current_index":3,"histories":[]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("out of bounds"), "{err}");
        assert!(
            serde_json::from_str::<VersionHistories>(r#"{"current_index":0,"histories":[]}"#)
                .is_err()
        );

        let token_json = serde_json::to_value(token("a")).unwrap();
        let empty_lineage = serde_json::json!({
            "current_index": 0,
            "histories": [{"branch_token": token_json, "items": []}],
        });
        assert!(serde_json::from_value::<VersionHistories>(empty_lineage).is_err());

        let decreasing = serde_json::json!({
            "branch_token": token_json,
            "items": [{"event_id": 3, "version": 2}, {"event_id": 5, "version": 1}],
        });
        assert!(serde_json::from_value::<VersionHistory>(decreasing).is_err());
    }
}

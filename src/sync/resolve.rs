//! Current-description resolution.
//!
//! The current description of a task is the revision with the latest
//! creation timestamp. There is no locking: two near-simultaneous edits both
//! land as separate revisions and the later timestamp wins.

use crate::store::{Document, StoreError};
use crate::types::DescriptionRevision;

/// Pick the revision with the maximum `created_at`.
///
/// Equal timestamps fall back to the higher version, then the higher id, so
/// the result never depends on the order revisions were listed in.
pub fn current_revision(revisions: &[DescriptionRevision]) -> Option<&DescriptionRevision> {
    revisions.iter().max_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then(a.version.cmp(&b.version))
            .then(a.id.cmp(&b.id))
    })
}

/// Version number for the next revision: one past the highest seen, starting at 1.
pub fn next_version(revisions: &[DescriptionRevision]) -> u32 {
    revisions.iter().map(|r| r.version).max().unwrap_or(0) + 1
}

/// Decode revision documents, keeping their ids.
pub fn decode_revisions(documents: &[Document]) -> Result<Vec<DescriptionRevision>, StoreError> {
    documents
        .iter()
        .map(|doc| {
            let mut revision: DescriptionRevision = doc.decode()?;
            revision.id = doc.id.clone();
            Ok(revision)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn rev(id: &str, secs: i64, text: &str, version: u32) -> DescriptionRevision {
        DescriptionRevision {
            id: id.to_string(),
            text: text.to_string(),
            created_at: at(secs),
            updated_at: at(secs),
            version,
        }
    }

    #[test]
    fn test_latest_timestamp_wins_in_any_order() {
        let revisions = [rev("1", 5, "a", 1), rev("2", 9, "b", 2), rev("3", 7, "c", 3)];
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let shuffled: Vec<_> = order.iter().map(|&i| revisions[i].clone()).collect();
            assert_eq!(current_revision(&shuffled).unwrap().text, "b");
        }
    }

    #[test]
    fn test_no_revisions() {
        assert!(current_revision(&[]).is_none());
        assert_eq!(next_version(&[]), 1);
    }

    #[test]
    fn test_timestamp_beats_version() {
        // A later write with a stale version number still wins on timestamp.
        let revisions = [rev("1", 10, "newest", 1), rev("2", 3, "older", 2)];
        assert_eq!(current_revision(&revisions).unwrap().text, "newest");
    }

    #[test]
    fn test_tie_is_order_independent() {
        let a = rev("a", 4, "first", 2);
        let b = rev("b", 4, "second", 2);
        let forward = [a.clone(), b.clone()];
        let backward = [b, a];
        assert_eq!(
            current_revision(&forward).unwrap().id,
            current_revision(&backward).unwrap().id
        );
    }

    #[test]
    fn test_next_version_is_max_plus_one() {
        let revisions = [rev("1", 1, "a", 1), rev("2", 2, "b", 4), rev("3", 3, "c", 2)];
        assert_eq!(next_version(&revisions), 5);
    }
}

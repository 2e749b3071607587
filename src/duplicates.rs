//! Duplicate grouping and survivor selection

use crate::fingerprint::MessageFingerprint;
use crate::models::{ClassificationResult, Message};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Messages sharing one fingerprint. Always holds at least two members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub fingerprint: MessageFingerprint,
    pub member_ids: BTreeSet<String>,
    /// Earliest received, ties broken by smallest id
    pub survivor_id: String,
}

impl DuplicateGroup {
    pub fn contains(&self, message_id: &str) -> bool {
        self.member_ids.contains(message_id)
    }

    /// Members other than the survivor that are not priority-protected.
    ///
    /// Members without a classification are treated as unprotected.
    pub fn trash_candidates<'a>(
        &'a self,
        classifications: &'a HashMap<String, ClassificationResult>,
    ) -> impl Iterator<Item = &'a String> + 'a {
        self.member_ids.iter().filter(move |id| {
            *id != &self.survivor_id
                && !classifications
                    .get(id.as_str())
                    .is_some_and(ClassificationResult::is_priority)
        })
    }
}

/// Group live messages by fingerprint, dropping singletons.
///
/// Trashed messages never join a group, so a trashed copy cannot be chosen
/// as survivor over the last live one. Output is ordered by fingerprint so repeated runs over the same input
/// produce identical groups and survivors.
pub fn group_duplicates(messages: &[Message]) -> Vec<DuplicateGroup> {
    let mut buckets: BTreeMap<MessageFingerprint, Vec<&Message>> = BTreeMap::new();
    for message in messages.iter().filter(|m| !m.is_trashed) {
        buckets
            .entry(MessageFingerprint::of(message))
            .or_default()
            .push(message);
    }

    buckets
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .filter_map(|(fingerprint, members)| {
            let survivor = members
                .iter()
                .min_by(|a, b| {
                    a.received_at
                        .cmp(&b.received_at)
                        .then_with(|| a.id.cmp(&b.id))
                })?
                .id
                .clone();

            let member_ids: BTreeSet<String> = members.iter().map(|m| m.id.clone()).collect();
            // The same id listed twice is not a duplicate pair
            if member_ids.len() < 2 {
                return None;
            }

            tracing::debug!(
                "Duplicate group {} has {} members, survivor {}",
                fingerprint,
                member_ids.len(),
                survivor
            );

            Some(DuplicateGroup {
                fingerprint,
                member_ids,
                survivor_id: survivor,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn message(id: &str, subject: &str, days_ago: i64) -> Message {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        Message {
            id: id.to_string(),
            sender: "news@site.com".to_string(),
            subject: subject.to_string(),
            body_snippet: String::new(),
            received_at: base - Duration::days(days_ago),
            size_estimate: Some(3000),
            is_starred: false,
            is_trashed: false,
            existing_labels: Default::default(),
            list_unsubscribe: None,
        }
    }

    fn classification(id: &str, score: u32) -> ClassificationResult {
        ClassificationResult {
            message_id: id.to_string(),
            priority_score: score,
            category: crate::models::UNCATEGORIZED.to_string(),
            is_newsletter: false,
            unsubscribe_link: None,
        }
    }

    #[test]
    fn test_weekly_digest_pair() {
        let messages = vec![message("b", "Weekly Digest", 1), message("a", "Weekly Digest", 2)];
        let groups = group_duplicates(&messages);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].survivor_id, "a");
        assert_eq!(groups[0].member_ids.len(), 2);

        let none = HashMap::new();
        let candidates: Vec<_> = groups[0].trash_candidates(&none).collect();
        assert_eq!(candidates, vec!["b"]);
    }

    #[test]
    fn test_singletons_are_discarded() {
        let messages = vec![message("a", "One", 1), message("b", "Two", 1)];
        assert!(group_duplicates(&messages).is_empty());
    }

    #[test]
    fn test_survivor_tie_breaks_on_id() {
        let messages = vec![
            message("m3", "Digest", 5),
            message("m1", "Digest", 5),
            message("m2", "Digest", 5),
        ];
        let groups = group_duplicates(&messages);
        assert_eq!(groups[0].survivor_id, "m1");
    }

    #[test]
    fn test_survivor_is_stable_across_input_order() {
        let mut messages = vec![
            message("x", "Digest", 3),
            message("y", "Digest", 4),
            message("z", "Digest", 4),
        ];
        let first = group_duplicates(&messages);
        messages.reverse();
        let second = group_duplicates(&messages);
        assert_eq!(first, second);
        assert_eq!(first[0].survivor_id, "y");
    }

    #[test]
    fn test_priority_members_are_not_candidates() {
        let messages = vec![
            message("a", "Digest", 3),
            message("b", "Digest", 2),
            message("c", "Digest", 1),
        ];
        let groups = group_duplicates(&messages);
        let classifications: HashMap<String, ClassificationResult> = [
            ("a".to_string(), classification("a", 0)),
            ("b".to_string(), classification("b", 10)),
            ("c".to_string(), classification("c", 0)),
        ]
        .into_iter()
        .collect();

        let candidates: Vec<_> = groups[0].trash_candidates(&classifications).collect();
        assert_eq!(candidates, vec!["c"]);
        assert!(groups[0].contains("b"));
    }

    #[test]
    fn test_repeated_id_is_not_a_group() {
        let messages = vec![message("a", "Digest", 1), message("a", "Digest", 1)];
        assert!(group_duplicates(&messages).is_empty());
    }

    #[test]
    fn test_trashed_copy_is_never_survivor() {
        let mut trashed = message("a", "Weekly Digest", 3);
        trashed.is_trashed = true;
        let messages = vec![trashed, message("b", "Weekly Digest", 2)];

        assert!(group_duplicates(&messages).is_empty());
    }

    #[test]
    fn test_trashed_copy_leaves_live_copies_grouped() {
        let mut trashed = message("a", "Weekly Digest", 5);
        trashed.is_trashed = true;
        let messages = vec![
            trashed,
            message("b", "Weekly Digest", 3),
            message("c", "Weekly Digest", 1),
        ];
        let groups = group_duplicates(&messages);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].survivor_id, "b");
        assert!(!groups[0].contains("a"));
    }
}

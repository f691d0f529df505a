// Belief store behavior, run identically against both storage strategies.

mod common;

use common::{agent, belief, belief_in_category, bundles, tick};
use headkey::{BeliefConflict, ErrorKind};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;

#[tokio::test]
async fn put_then_get_round_trips() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let mut b = belief_in_category(&a1, "I like coffee", "preference", 0.6);
        b.tags.insert("coffee".to_string());
        b.evidence_memory_ids.insert("mem-1".to_string());

        let stored = bundle.beliefs.put(b.clone()).await.unwrap();
        let fetched = bundle.beliefs.get(&stored.id).await.unwrap().unwrap();

        assert_eq!(fetched.statement, "I like coffee", "{name}");
        assert_eq!(fetched.category.as_deref(), Some("preference"), "{name}");
        assert_eq!(fetched.tags, b.tags, "{name}");
        assert_eq!(fetched.confidence, 0.6, "{name}");
        assert!(fetched.version >= b.version, "{name}");
        assert!(fetched.active, "{name}");
    }
}

#[tokio::test]
async fn repeated_put_keeps_one_record_and_increases_version() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let b = belief(&a1, "The sky is blue", 0.7);

        let first = bundle.beliefs.put(b.clone()).await.unwrap();
        let second = bundle.beliefs.put(b.clone()).await.unwrap();

        assert_eq!(bundle.beliefs.count(Some(&a1), true).await.unwrap(), 1, "{name}");
        assert!(second.version > first.version, "{name}");
        assert_eq!(first.created_at, second.created_at, "{name}");
    }
}

#[tokio::test]
async fn out_of_range_confidence_is_clamped_on_put() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");

        let mut low = belief(&a1, "below range", 0.5);
        low.confidence = -1.0;
        let stored = bundle.beliefs.put(low).await.unwrap();
        assert_eq!(stored.confidence, 0.0, "{name}");
        let fetched = bundle.beliefs.get(&stored.id).await.unwrap().unwrap();
        assert_eq!(fetched.confidence, 0.0, "{name}");

        let mut high = belief(&a1, "above range", 0.5);
        high.confidence = 1.7;
        let stored = bundle.beliefs.put(high).await.unwrap();
        assert_eq!(stored.confidence, 1.0, "{name}");
    }
}

#[tokio::test]
async fn unused_agent_reads_empty_not_error() {
    for (name, bundle) in bundles() {
        let ghost = agent("never-used");
        assert!(bundle.beliefs.for_agent(&ghost, true).await.unwrap().is_empty(), "{name}");
        assert_eq!(bundle.beliefs.count(Some(&ghost), true).await.unwrap(), 0, "{name}");
        assert!(bundle
            .beliefs
            .unresolved_conflicts(Some(&ghost))
            .await
            .unwrap()
            .is_empty(), "{name}");
    }
}

#[tokio::test]
async fn active_count_never_exceeds_total_count() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        bundle.beliefs.put(belief(&a1, "active one", 0.5)).await.unwrap();
        let mut inactive = belief(&a1, "inactive one", 0.5);
        inactive.active = false;
        bundle.beliefs.put(inactive).await.unwrap();

        let active = bundle.beliefs.count(Some(&a1), false).await.unwrap();
        let total = bundle.beliefs.count(Some(&a1), true).await.unwrap();
        assert_eq!(active, 1, "{name}");
        assert_eq!(total, 2, "{name}");
        assert!(active <= total, "{name}");

        let listed = bundle.beliefs.for_agent(&a1, false).await.unwrap();
        assert!(listed.iter().all(|b| b.active), "{name}");
    }
}

#[tokio::test]
async fn search_text_ranks_by_confidence_desc() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let low = bundle
            .beliefs
            .put(belief(&a1, "vector search is useful", 0.4))
            .await
            .unwrap();
        let high = bundle
            .beliefs
            .put(belief(&a1, "a vector has direction", 0.9))
            .await
            .unwrap();
        bundle
            .beliefs
            .put(belief(&a1, "unrelated statement", 0.99))
            .await
            .unwrap();

        let hits = bundle.beliefs.search_text("vector", Some(&a1), 10).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|b| b.id.clone()).collect();
        assert_eq!(ids, vec![high.id, low.id], "{name}");

        let capped = bundle.beliefs.search_text("vector", Some(&a1), 1).await.unwrap();
        assert_eq!(capped.len(), 1, "{name}");

        let err = bundle.beliefs.search_text("  ", Some(&a1), 10).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput, "{name}");
    }
}

#[tokio::test]
async fn find_similar_with_threshold_one_returns_exact_matches_only() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let exact = bundle
            .beliefs
            .put(belief(&a1, "I like coffee", 0.6))
            .await
            .unwrap();
        // Normalization ignores case, punctuation and spacing, but not
        // word order or duplication: none of these are exact matches.
        bundle
            .beliefs
            .put(belief(&a1, "I like strong coffee", 0.6))
            .await
            .unwrap();
        bundle
            .beliefs
            .put(belief(&a1, "coffee like I", 0.6))
            .await
            .unwrap();
        bundle
            .beliefs
            .put(belief(&a1, "I like coffee coffee", 0.6))
            .await
            .unwrap();

        let matches = bundle
            .beliefs
            .find_similar("I like coffee", Some(&a1), 1.0, 10)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1, "{name}");
        assert_eq!(matches[0].0.id, exact.id, "{name}");
        assert_eq!(matches[0].1, 1.0, "{name}");

        // A casing and punctuation variant still qualifies as exact.
        let matches = bundle
            .beliefs
            .find_similar("i LIKE coffee.", Some(&a1), 1.0, 10)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1, "{name}");
        assert_eq!(matches[0].0.id, exact.id, "{name}");

        let err = bundle
            .beliefs
            .find_similar("I like coffee", Some(&a1), 1.5, 10)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput, "{name}");
    }
}

#[tokio::test]
async fn find_similar_orders_by_score() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let close = bundle
            .beliefs
            .put(belief(&a1, "the cat sat on the mat", 0.5))
            .await
            .unwrap();
        let far = bundle
            .beliefs
            .put(belief(&a1, "the cat sat on the red mat today", 0.5))
            .await
            .unwrap();

        let matches = bundle
            .beliefs
            .find_similar("the cat sat on the mat", Some(&a1), 0.1, 10)
            .await
            .unwrap();
        assert!(matches.len() >= 2, "{name}");
        assert_eq!(matches[0].0.id, close.id, "{name}");
        assert_eq!(matches[1].0.id, far.id, "{name}");
        assert!(matches[0].1 >= matches[1].1, "{name}");
    }
}

#[tokio::test]
async fn category_listing_and_distribution() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        for i in 0..3 {
            bundle
                .beliefs
                .put(belief_in_category(&a1, &format!("pref {i}"), "preference", 0.5))
                .await
                .unwrap();
        }
        bundle
            .beliefs
            .put(belief_in_category(&a1, "one fact", "fact", 0.5))
            .await
            .unwrap();

        let prefs = bundle
            .beliefs
            .in_category("preference", Some(&a1), false)
            .await
            .unwrap();
        assert_eq!(prefs.len(), 3, "{name}");

        let distribution = bundle.beliefs.distribution_by_category(Some(&a1)).await.unwrap();
        assert_eq!(distribution.get("preference"), Some(&3), "{name}");
        assert_eq!(distribution.get("fact"), Some(&1), "{name}");
    }
}

#[tokio::test]
async fn confidence_bucket_distribution_uses_canonical_boundaries() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        for confidence in [0.95, 0.8, 0.79, 0.5, 0.49, 0.1] {
            bundle
                .beliefs
                .put(belief(&a1, &format!("confidence {confidence}"), confidence))
                .await
                .unwrap();
        }

        let distribution = bundle
            .beliefs
            .distribution_by_confidence_bucket(Some(&a1))
            .await
            .unwrap();
        assert_eq!(distribution.get("high"), Some(&2), "{name}");
        assert_eq!(distribution.get("medium"), Some(&2), "{name}");
        assert_eq!(distribution.get("low"), Some(&2), "{name}");
    }
}

#[tokio::test]
async fn low_confidence_filters_below_threshold() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        bundle.beliefs.put(belief(&a1, "shaky", 0.2)).await.unwrap();
        bundle.beliefs.put(belief(&a1, "solid", 0.9)).await.unwrap();

        let shaky = bundle.beliefs.low_confidence(0.5, Some(&a1)).await.unwrap();
        assert_eq!(shaky.len(), 1, "{name}");
        assert_eq!(shaky[0].statement, "shaky", "{name}");

        let err = bundle.beliefs.low_confidence(-0.2, Some(&a1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput, "{name}");
    }
}

#[tokio::test]
async fn delete_is_hard_and_reports_absence() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let stored = bundle.beliefs.put(belief(&a1, "to be removed", 0.5)).await.unwrap();

        assert!(bundle.beliefs.delete(&stored.id).await.unwrap(), "{name}");
        assert!(bundle.beliefs.get(&stored.id).await.unwrap().is_none(), "{name}");
        assert!(!bundle.beliefs.delete(&stored.id).await.unwrap(), "{name}");
    }
}

#[tokio::test]
async fn get_many_returns_found_subset() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let b1 = bundle.beliefs.put(belief(&a1, "one", 0.5)).await.unwrap();
        let b2 = bundle.beliefs.put(belief(&a1, "two", 0.5)).await.unwrap();
        let ghost = headkey::BeliefId::generate();

        let found = bundle
            .beliefs
            .get_many(&[b1.id.clone(), b2.id.clone(), ghost.clone()])
            .await
            .unwrap();
        let ids: BTreeSet<_> = found.iter().map(|b| b.id.clone()).collect();
        assert!(ids.contains(&b1.id), "{name}");
        assert!(ids.contains(&b2.id), "{name}");
        assert!(!ids.contains(&ghost), "{name}");
    }
}

#[tokio::test]
async fn put_many_stores_the_batch() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let batch: Vec<_> = (0..7)
            .map(|i| belief(&a1, &format!("batch item {i}"), 0.5))
            .collect();
        let stored = bundle.beliefs.put_many(batch).await.unwrap();
        assert_eq!(stored.len(), 7, "{name}");
        assert_eq!(bundle.beliefs.count(Some(&a1), true).await.unwrap(), 7, "{name}");
    }
}

#[tokio::test]
async fn conflict_lifecycle() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let b1 = bundle.beliefs.put(belief(&a1, "The sky is blue", 0.7)).await.unwrap();
        let b2 = bundle
            .beliefs
            .put(belief(&a1, "The sky is not blue", 0.8))
            .await
            .unwrap();

        let members: BTreeSet<_> = [b1.id.clone(), b2.id.clone()].into_iter().collect();
        let conflict = BeliefConflict::new(a1.clone(), members, "sky color tension").unwrap();
        let stored = bundle.beliefs.put_conflict(conflict).await.unwrap();

        let fetched = bundle.beliefs.get_conflict(&stored.id).await.unwrap().unwrap();
        assert_eq!(fetched.conflicting_belief_ids.len(), 2, "{name}");
        assert!(!fetched.resolved, "{name}");

        let unresolved = bundle.beliefs.unresolved_conflicts(Some(&a1)).await.unwrap();
        assert_eq!(unresolved.len(), 1, "{name}");
        assert_eq!(unresolved[0].id, stored.id, "{name}");

        let mut resolved = fetched;
        resolved.resolve("kept the newer belief");
        bundle.beliefs.put_conflict(resolved).await.unwrap();
        assert!(bundle
            .beliefs
            .unresolved_conflicts(Some(&a1))
            .await
            .unwrap()
            .is_empty(), "{name}");

        assert!(bundle.beliefs.remove_conflict(&stored.id).await.unwrap(), "{name}");
        assert!(!bundle.beliefs.remove_conflict(&stored.id).await.unwrap(), "{name}");
    }
}

#[tokio::test]
async fn distinct_agents_lists_every_agent_with_data() {
    for (name, bundle) in bundles() {
        bundle.beliefs.put(belief(&agent("a1"), "one", 0.5)).await.unwrap();
        bundle.beliefs.put(belief(&agent("a2"), "two", 0.5)).await.unwrap();

        let agents = bundle.beliefs.distinct_agents().await.unwrap();
        assert_eq!(agents.len(), 2, "{name}");
        assert!(agents.contains(&agent("a1")), "{name}");
        assert!(agents.contains(&agent("a2")), "{name}");
    }
}

#[tokio::test]
async fn for_agent_orders_by_last_updated_desc() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let first = bundle.beliefs.put(belief(&a1, "older", 0.5)).await.unwrap();
        tick().await;
        let second = bundle.beliefs.put(belief(&a1, "newer", 0.5)).await.unwrap();

        let listed = bundle.beliefs.for_agent(&a1, true).await.unwrap();
        assert_eq!(listed[0].id, second.id, "{name}");
        assert_eq!(listed[1].id, first.id, "{name}");

        tick().await;
        // Touching the older belief moves it back to the front.
        bundle.beliefs.put(first.clone()).await.unwrap();
        let listed = bundle.beliefs.for_agent(&a1, true).await.unwrap();
        assert_eq!(listed[0].id, first.id, "{name}");
    }
}

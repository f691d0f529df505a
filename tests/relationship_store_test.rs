// Relationship store behavior across both storage strategies.

mod common;

use chrono::{Duration, Utc};
use common::{agent, belief, bundles, tick};
use headkey::{ErrorKind, RelationshipBuilder, RelationshipType};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn create_requires_known_endpoints() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let b1 = bundle.beliefs.put(belief(&a1, "known", 0.5)).await.unwrap();
        let ghost = headkey::BeliefId::generate();

        let err = bundle
            .relationships
            .create(&b1.id, &ghost, RelationshipType::Supports, 0.5, &a1, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BeliefMissing, "{name}");

        // Endpoints of another agent are just as missing.
        let a2 = agent("a2");
        let foreign = bundle.beliefs.put(belief(&a2, "foreign", 0.5)).await.unwrap();
        let err = bundle
            .relationships
            .create(&b1.id, &foreign.id, RelationshipType::Supports, 0.5, &a1, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BeliefMissing, "{name}");
    }
}

#[tokio::test]
async fn create_clamps_strength_and_stamps_identity() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let b1 = bundle.beliefs.put(belief(&a1, "one", 0.5)).await.unwrap();
        let b2 = bundle.beliefs.put(belief(&a1, "two", 0.5)).await.unwrap();

        let rel = bundle
            .relationships
            .create(&b1.id, &b2.id, RelationshipType::Supports, 1.8, &a1, None)
            .await
            .unwrap();
        assert!(rel.id.as_str().starts_with("rel_"), "{name}");
        assert_eq!(rel.strength, 1.0, "{name}");
        assert!(rel.active, "{name}");

        let fetched = bundle.relationships.get(&rel.id, &a1).await.unwrap().unwrap();
        assert_eq!(fetched, rel, "{name}");
    }
}

#[tokio::test]
async fn between_is_directed_and_for_belief_sees_both_sides() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let b1 = bundle.beliefs.put(belief(&a1, "src", 0.5)).await.unwrap();
        let b2 = bundle.beliefs.put(belief(&a1, "dst", 0.5)).await.unwrap();

        let rel = bundle
            .relationships
            .create(&b1.id, &b2.id, RelationshipType::Supports, 0.9, &a1, None)
            .await
            .unwrap();

        let forward = bundle.relationships.between(&b1.id, &b2.id, &a1).await.unwrap();
        assert_eq!(forward.len(), 1, "{name}");
        assert_eq!(forward[0].id, rel.id, "{name}");

        let reverse = bundle.relationships.between(&b2.id, &b1.id, &a1).await.unwrap();
        assert!(reverse.is_empty(), "{name}");

        for belief_id in [&b1.id, &b2.id] {
            let touching = bundle.relationships.for_belief(belief_id, &a1).await.unwrap();
            assert!(touching.iter().any(|r| r.id == rel.id), "{name}");
        }
        assert_eq!(bundle.relationships.outgoing(&b1.id, &a1).await.unwrap().len(), 1, "{name}");
        assert!(bundle.relationships.outgoing(&b2.id, &a1).await.unwrap().is_empty(), "{name}");
        assert_eq!(bundle.relationships.incoming(&b2.id, &a1).await.unwrap().len(), 1, "{name}");
    }
}

#[tokio::test]
async fn identical_shape_with_fresh_id_yields_two_edges() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let b1 = bundle.beliefs.put(belief(&a1, "one", 0.5)).await.unwrap();
        let b2 = bundle.beliefs.put(belief(&a1, "two", 0.5)).await.unwrap();

        let first = bundle
            .relationships
            .create(&b1.id, &b2.id, RelationshipType::Supports, 0.5, &a1, None)
            .await
            .unwrap();
        let second = bundle
            .relationships
            .create(&b1.id, &b2.id, RelationshipType::Supports, 0.5, &a1, None)
            .await
            .unwrap();

        assert_ne!(first.id, second.id, "{name}");
        assert_eq!(bundle.relationships.count(&a1).await.unwrap(), 2, "{name}");
    }
}

#[tokio::test]
async fn temporal_bounds_are_validated() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let b1 = bundle.beliefs.put(belief(&a1, "one", 0.5)).await.unwrap();
        let b2 = bundle.beliefs.put(belief(&a1, "two", 0.5)).await.unwrap();
        let now = Utc::now();

        // Equal bounds are accepted; the effective set is just empty.
        let rel = bundle
            .relationships
            .create_temporal(
                &b1.id,
                &b2.id,
                RelationshipType::Precedes,
                0.5,
                &a1,
                None,
                now,
                Some(now),
            )
            .await
            .unwrap();
        assert!(!rel.is_effective_at(now), "{name}");

        let err = bundle
            .relationships
            .create_temporal(
                &b1.id,
                &b2.id,
                RelationshipType::Precedes,
                0.5,
                &a1,
                None,
                now,
                Some(now - Duration::hours(1)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TemporalInvalid, "{name}");
    }
}

#[tokio::test]
async fn effective_and_expired_windows() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let b1 = bundle.beliefs.put(belief(&a1, "one", 0.5)).await.unwrap();
        let b2 = bundle.beliefs.put(belief(&a1, "two", 0.5)).await.unwrap();
        let now = Utc::now();

        let open = bundle
            .relationships
            .create(&b1.id, &b2.id, RelationshipType::Supports, 0.5, &a1, None)
            .await
            .unwrap();
        let windowed = bundle
            .relationships
            .create_temporal(
                &b1.id,
                &b2.id,
                RelationshipType::Enables,
                0.5,
                &a1,
                None,
                now - Duration::hours(2),
                Some(now - Duration::hours(1)),
            )
            .await
            .unwrap();

        let effective = bundle.relationships.effective_at(now, &a1).await.unwrap();
        let effective_ids: Vec<_> = effective.iter().map(|r| r.id.clone()).collect();
        assert!(effective_ids.contains(&open.id), "{name}");
        assert!(!effective_ids.contains(&windowed.id), "{name}");

        let expired = bundle.relationships.expired_before(now, &a1).await.unwrap();
        let expired_ids: Vec<_> = expired.iter().map(|r| r.id.clone()).collect();
        assert!(expired_ids.contains(&windowed.id), "{name}");
        assert!(!expired_ids.contains(&open.id), "{name}");
    }
}

#[tokio::test]
async fn update_strength_clamps_and_bumps_last_updated() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let b1 = bundle.beliefs.put(belief(&a1, "one", 0.5)).await.unwrap();
        let b2 = bundle.beliefs.put(belief(&a1, "two", 0.5)).await.unwrap();
        let rel = bundle
            .relationships
            .create(&b1.id, &b2.id, RelationshipType::Supports, 0.4, &a1, None)
            .await
            .unwrap();

        tick().await;
        let updated = bundle
            .relationships
            .update_strength(&rel.id, &a1, 2.0)
            .await
            .unwrap();
        assert_eq!(updated.strength, 1.0, "{name}");
        assert!(updated.last_updated > rel.last_updated, "{name}");

        let ghost = headkey::RelationshipId::generate();
        let err = bundle
            .relationships
            .update_strength(&ghost, &a1, 0.5)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{name}");

        let mut metadata = serde_json::Map::new();
        metadata.insert("note".into(), "revised".into());
        let updated = bundle
            .relationships
            .update(&rel.id, &a1, Some(0.7), Some(metadata))
            .await
            .unwrap();
        assert_eq!(updated.strength, 0.7, "{name}");
        assert_eq!(updated.metadata.get("note").unwrap(), "revised", "{name}");
    }
}

#[tokio::test]
async fn deactivate_reactivate_are_idempotent() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let b1 = bundle.beliefs.put(belief(&a1, "one", 0.5)).await.unwrap();
        let b2 = bundle.beliefs.put(belief(&a1, "two", 0.5)).await.unwrap();
        let rel = bundle
            .relationships
            .create(&b1.id, &b2.id, RelationshipType::Supports, 0.5, &a1, None)
            .await
            .unwrap();

        assert!(bundle.relationships.deactivate(&rel.id, &a1).await.unwrap(), "{name}");
        assert!(bundle.relationships.deactivate(&rel.id, &a1).await.unwrap(), "{name}");
        let fetched = bundle.relationships.get(&rel.id, &a1).await.unwrap().unwrap();
        assert!(!fetched.active, "{name}");

        assert!(bundle.relationships.reactivate(&rel.id, &a1).await.unwrap(), "{name}");
        let fetched = bundle.relationships.get(&rel.id, &a1).await.unwrap().unwrap();
        assert!(fetched.active, "{name}");

        let ghost = headkey::RelationshipId::generate();
        assert!(!bundle.relationships.deactivate(&ghost, &a1).await.unwrap(), "{name}");
    }
}

#[tokio::test]
async fn type_and_strength_queries() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let b1 = bundle.beliefs.put(belief(&a1, "one", 0.5)).await.unwrap();
        let b2 = bundle.beliefs.put(belief(&a1, "two", 0.5)).await.unwrap();

        bundle
            .relationships
            .create(&b1.id, &b2.id, RelationshipType::Supports, 0.9, &a1, None)
            .await
            .unwrap();
        bundle
            .relationships
            .create(&b1.id, &b2.id, RelationshipType::Contradicts, 0.3, &a1, None)
            .await
            .unwrap();
        bundle
            .relationships
            .create(&b2.id, &b1.id, RelationshipType::Supports, 0.7, &a1, None)
            .await
            .unwrap();

        let supports = bundle
            .relationships
            .by_type(RelationshipType::Supports, &a1)
            .await
            .unwrap();
        assert_eq!(supports.len(), 2, "{name}");

        let strong = bundle.relationships.by_strength_gte(0.7, &a1).await.unwrap();
        assert_eq!(strong.len(), 2, "{name}");
        assert!(strong.iter().all(|r| r.strength >= 0.7), "{name}");

        let distribution = bundle.relationships.type_distribution(&a1).await.unwrap();
        assert_eq!(distribution.get("SUPPORTS"), Some(&2), "{name}");
        assert_eq!(distribution.get("CONTRADICTS"), Some(&1), "{name}");

        let averages = bundle.relationships.avg_strength_by_type(&a1).await.unwrap();
        assert!((averages["SUPPORTS"] - 0.8).abs() < 1e-9, "{name}");
        assert!((averages["CONTRADICTS"] - 0.3).abs() < 1e-9, "{name}");
    }
}

#[tokio::test]
async fn bulk_create_and_batch_mutations() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let b1 = bundle.beliefs.put(belief(&a1, "one", 0.5)).await.unwrap();
        let b2 = bundle.beliefs.put(belief(&a1, "two", 0.5)).await.unwrap();
        let b3 = bundle.beliefs.put(belief(&a1, "three", 0.5)).await.unwrap();

        let specs = vec![
            RelationshipBuilder::new()
                .source(b1.id.as_str())
                .unwrap()
                .target(b2.id.as_str())
                .unwrap()
                .relationship_type(RelationshipType::RelatesTo)
                .strength(0.4)
                .build()
                .unwrap(),
            RelationshipBuilder::new()
                .source(b2.id.as_str())
                .unwrap()
                .target(b3.id.as_str())
                .unwrap()
                .relationship_type(RelationshipType::RelatesTo)
                .strength(0.6)
                .build()
                .unwrap(),
        ];
        let created = bundle.relationships.bulk_create(specs, &a1).await.unwrap();
        assert_eq!(created.len(), 2, "{name}");

        let ids: Vec<_> = created.iter().map(|r| r.id.clone()).collect();
        let updated = bundle
            .relationships
            .set_strength_many(&ids, &a1, 0.9)
            .await
            .unwrap();
        assert_eq!(updated, 2, "{name}");
        for id in &ids {
            let rel = bundle.relationships.get(id, &a1).await.unwrap().unwrap();
            assert_eq!(rel.strength, 0.9, "{name}");
        }

        assert_eq!(bundle.relationships.deactivate_many(&ids, &a1).await.unwrap(), 2, "{name}");
        assert_eq!(bundle.relationships.reactivate_many(&ids, &a1).await.unwrap(), 2, "{name}");
        assert_eq!(bundle.relationships.delete_many(&ids, &a1).await.unwrap(), 2, "{name}");
        assert_eq!(bundle.relationships.count(&a1).await.unwrap(), 0, "{name}");
    }
}

#[tokio::test]
async fn maintenance_sweep_removes_old_inactive_edges() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let b1 = bundle.beliefs.put(belief(&a1, "one", 0.5)).await.unwrap();
        let b2 = bundle.beliefs.put(belief(&a1, "two", 0.5)).await.unwrap();

        let stale = bundle
            .relationships
            .create(&b1.id, &b2.id, RelationshipType::Supports, 0.5, &a1, None)
            .await
            .unwrap();
        let live = bundle
            .relationships
            .create(&b1.id, &b2.id, RelationshipType::Enables, 0.5, &a1, None)
            .await
            .unwrap();

        bundle.relationships.deactivate(&stale.id, &a1).await.unwrap();
        tick().await;

        let removed = bundle.relationships.delete_old_inactive(&a1, 0).await.unwrap();
        assert_eq!(removed, 1, "{name}");
        assert!(bundle.relationships.get(&stale.id, &a1).await.unwrap().is_none(), "{name}");
        assert!(bundle.relationships.get(&live.id, &a1).await.unwrap().is_some(), "{name}");
    }
}

#[tokio::test]
async fn validation_queries_flag_orphans_and_self_refs() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let b1 = bundle.beliefs.put(belief(&a1, "one", 0.5)).await.unwrap();
        let b2 = bundle.beliefs.put(belief(&a1, "two", 0.5)).await.unwrap();

        let self_ref = bundle
            .relationships
            .create(&b1.id, &b1.id, RelationshipType::RelatesTo, 0.5, &a1, None)
            .await
            .unwrap();
        let doomed = bundle
            .relationships
            .create(&b1.id, &b2.id, RelationshipType::Supports, 0.5, &a1, None)
            .await
            .unwrap();

        assert!(bundle.beliefs.delete(&b2.id).await.unwrap(), "{name}");

        let orphans = bundle.relationships.orphans(&a1).await.unwrap();
        assert_eq!(orphans, vec![doomed.id.clone()], "{name}");

        let self_refs = bundle.relationships.self_refs(&a1).await.unwrap();
        assert_eq!(self_refs, vec![self_ref.id.clone()], "{name}");

        assert!(bundle
            .relationships
            .temporally_invalid(&a1)
            .await
            .unwrap()
            .is_empty(), "{name}");
    }
}

#[tokio::test]
async fn deprecate_creates_full_strength_edge_with_reason() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let old = bundle.beliefs.put(belief(&a1, "I like coffee", 0.6)).await.unwrap();
        let new = bundle
            .beliefs
            .put(belief(&a1, "I dislike coffee", 0.8))
            .await
            .unwrap();

        let edge = bundle
            .relationships
            .deprecate(&old.id, &new.id, "preference changed", &a1)
            .await
            .unwrap();

        assert_eq!(edge.relationship_type, RelationshipType::Deprecates, "{name}");
        assert_eq!(edge.strength, 1.0, "{name}");
        assert_eq!(edge.source_belief_id, old.id, "{name}");
        assert_eq!(edge.target_belief_id, new.id, "{name}");
        assert_eq!(edge.deprecation_reason.as_deref(), Some("preference changed"), "{name}");
        assert!(edge.is_deprecating(), "{name}");

        let err = bundle
            .relationships
            .deprecate(&old.id, &new.id, "  ", &a1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput, "{name}");
    }
}

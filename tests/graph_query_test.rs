// Graph query operations composed over both storage strategies.

mod common;

use common::{agent, belief, bundles};
use futures::StreamExt;
use headkey::{Direction, ErrorKind, KnowledgeGraphSnapshot, RelationshipType};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;

#[tokio::test]
async fn connected_deduplicates_in_first_seen_order() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let hub = bundle.beliefs.put(belief(&a1, "hub", 0.5)).await.unwrap();
        let n1 = bundle.beliefs.put(belief(&a1, "n1", 0.5)).await.unwrap();
        let n2 = bundle.beliefs.put(belief(&a1, "n2", 0.5)).await.unwrap();

        bundle
            .relationships
            .create(&hub.id, &n1.id, RelationshipType::Supports, 0.5, &a1, None)
            .await
            .unwrap();
        // A second edge to the same neighbor must not duplicate it.
        bundle
            .relationships
            .create(&hub.id, &n1.id, RelationshipType::Enables, 0.5, &a1, None)
            .await
            .unwrap();
        bundle
            .relationships
            .create(&n2.id, &hub.id, RelationshipType::Supports, 0.5, &a1, None)
            .await
            .unwrap();

        let both = bundle
            .graph
            .connected(&hub.id, &a1, Direction::Both, None, 10)
            .await
            .unwrap();
        let ids: BTreeSet<_> = both.iter().map(|b| b.id.clone()).collect();
        assert_eq!(both.len(), 2, "{name}");
        assert!(ids.contains(&n1.id) && ids.contains(&n2.id), "{name}");

        let outgoing = bundle
            .graph
            .connected(&hub.id, &a1, Direction::Outgoing, None, 10)
            .await
            .unwrap();
        assert_eq!(outgoing.len(), 1, "{name}");
        assert_eq!(outgoing[0].id, n1.id, "{name}");

        let typed = bundle
            .graph
            .connected(
                &hub.id,
                &a1,
                Direction::Both,
                Some(&[RelationshipType::Enables]),
                10,
            )
            .await
            .unwrap();
        assert_eq!(typed.len(), 1, "{name}");
        assert_eq!(typed[0].id, n1.id, "{name}");

        assert_eq!(
            bundle.graph.degree(&hub.id, &a1, Direction::Both).await.unwrap(),
            3,
            "{name}"
        );
        assert_eq!(
            bundle.graph.degree(&hub.id, &a1, Direction::Incoming).await.unwrap(),
            1,
            "{name}"
        );

        assert!(bundle
            .graph
            .directly_connected(&hub.id, &n2.id, &a1, None)
            .await
            .unwrap(), "{name}");
        assert!(!bundle
            .graph
            .directly_connected(&n1.id, &n2.id, &a1, None)
            .await
            .unwrap(), "{name}");
    }
}

#[tokio::test]
async fn deprecation_chain_walks_deprecating_edges() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let v1 = bundle.beliefs.put(belief(&a1, "version one", 0.5)).await.unwrap();
        let v2 = bundle.beliefs.put(belief(&a1, "version two", 0.6)).await.unwrap();
        let v3 = bundle.beliefs.put(belief(&a1, "version three", 0.7)).await.unwrap();
        let unrelated = bundle.beliefs.put(belief(&a1, "unrelated", 0.5)).await.unwrap();

        bundle
            .relationships
            .deprecate(&v1.id, &v2.id, "first revision", &a1)
            .await
            .unwrap();
        bundle
            .relationships
            .create(&v2.id, &v3.id, RelationshipType::Updates, 1.0, &a1, None)
            .await
            .unwrap();
        bundle
            .relationships
            .create(&v1.id, &unrelated.id, RelationshipType::RelatesTo, 0.5, &a1, None)
            .await
            .unwrap();

        let chain = bundle.graph.deprecation_chain(&v1.id, &a1, 0).await.unwrap();
        let ids: Vec<_> = chain.iter().map(|b| b.id.clone()).collect();
        assert_eq!(ids, vec![v1.id.clone(), v2.id.clone(), v3.id.clone()], "{name}");

        let bounded = bundle.graph.deprecation_chain(&v1.id, &a1, 1).await.unwrap();
        assert_eq!(bounded.len(), 2, "{name}");
    }
}

#[tokio::test]
async fn memory_estimate_and_average_strength() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let b1 = bundle.beliefs.put(belief(&a1, "one", 0.5)).await.unwrap();
        let b2 = bundle.beliefs.put(belief(&a1, "two", 0.5)).await.unwrap();
        let strong = bundle
            .relationships
            .create(&b1.id, &b2.id, RelationshipType::Supports, 1.0, &a1, None)
            .await
            .unwrap();
        bundle
            .relationships
            .create(&b1.id, &b2.id, RelationshipType::Enables, 0.5, &a1, None)
            .await
            .unwrap();

        assert_eq!(
            bundle.graph.memory_usage_estimate(&a1).await.unwrap(),
            2 * 1024 + 2 * 512,
            "{name}"
        );

        let avg = bundle
            .graph
            .average_relationship_strength(&a1, true)
            .await
            .unwrap();
        assert!((avg - 0.75).abs() < 1e-9, "{name}");

        bundle.relationships.deactivate(&strong.id, &a1).await.unwrap();
        let active_only = bundle
            .graph
            .average_relationship_strength(&a1, false)
            .await
            .unwrap();
        assert!((active_only - 0.5).abs() < 1e-9, "{name}");
    }
}

#[tokio::test]
async fn snapshots_hold_closure_and_filters() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let b1 = bundle.beliefs.put(belief(&a1, "one", 0.5)).await.unwrap();
        let b2 = bundle.beliefs.put(belief(&a1, "two", 0.5)).await.unwrap();
        let b3 = bundle.beliefs.put(belief(&a1, "three", 0.5)).await.unwrap();

        bundle
            .relationships
            .create(&b1.id, &b2.id, RelationshipType::Supports, 0.5, &a1, None)
            .await
            .unwrap();
        bundle
            .relationships
            .create(&b2.id, &b3.id, RelationshipType::Enables, 0.5, &a1, None)
            .await
            .unwrap();

        let snapshot = bundle.graph.snapshot(&a1, true).await.unwrap();
        assert_eq!(snapshot.beliefs.len(), 3, "{name}");
        assert_eq!(snapshot.relationships.len(), 2, "{name}");
        for rel in &snapshot.relationships {
            assert!(snapshot.belief_ids().contains(&rel.source_belief_id), "{name}");
            assert!(snapshot.belief_ids().contains(&rel.target_belief_id), "{name}");
        }

        // Restricting the beliefs drops edges that lose an endpoint.
        let filtered = bundle
            .graph
            .filtered_snapshot(&a1, Some(&[b1.id.clone(), b2.id.clone()]), None, 10)
            .await
            .unwrap();
        assert_eq!(filtered.beliefs.len(), 2, "{name}");
        assert_eq!(filtered.relationships.len(), 1, "{name}");

        let typed = bundle
            .graph
            .filtered_snapshot(&a1, None, Some(&[RelationshipType::Enables]), 10)
            .await
            .unwrap();
        assert_eq!(typed.relationships.len(), 1, "{name}");
        assert_eq!(
            typed.relationships[0].relationship_type,
            RelationshipType::Enables,
            "{name}"
        );

        let capped = bundle.graph.filtered_snapshot(&a1, None, None, 1).await.unwrap();
        assert_eq!(capped.beliefs.len(), 1, "{name}");
    }
}

#[tokio::test]
async fn export_snapshot_delegates_to_the_json_exporter() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        bundle.beliefs.put(belief(&a1, "exported", 0.5)).await.unwrap();

        let bytes = bundle.graph.export_snapshot(&a1, "json").await.unwrap();
        let parsed: KnowledgeGraphSnapshot = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.beliefs.len(), 1, "{name}");
        assert_eq!(parsed.agent_id, a1, "{name}");

        let err = bundle.graph.export_snapshot(&a1, "parquet").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput, "{name}");
    }
}

#[tokio::test]
async fn stream_beliefs_pages_through_everything() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        for i in 0..25 {
            bundle
                .beliefs
                .put(belief(&a1, &format!("streamed {i}"), 0.5))
                .await
                .unwrap();
        }

        let stream = bundle.graph.stream_beliefs(&a1, true, 10).await.unwrap();
        let collected: Vec<_> = stream.collect().await;
        assert_eq!(collected.len(), 25, "{name}");
        assert!(collected.iter().all(|item| item.is_ok()), "{name}");

        let ids: BTreeSet<_> = collected
            .into_iter()
            .map(|item| item.unwrap().id)
            .collect();
        assert_eq!(ids.len(), 25, "{name}");
    }
}

#[tokio::test]
async fn reachable_direction_and_type_filters() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let b1 = bundle.beliefs.put(belief(&a1, "one", 0.5)).await.unwrap();
        let b2 = bundle.beliefs.put(belief(&a1, "two", 0.5)).await.unwrap();
        let b3 = bundle.beliefs.put(belief(&a1, "three", 0.5)).await.unwrap();

        bundle
            .relationships
            .create(&b2.id, &b1.id, RelationshipType::Supports, 0.5, &a1, None)
            .await
            .unwrap();
        bundle
            .relationships
            .create(&b2.id, &b3.id, RelationshipType::Enables, 0.5, &a1, None)
            .await
            .unwrap();

        // Undirected projection reaches everything from b1.
        let all = bundle.graph.reachable(&b1.id, &a1, 0, None, None).await.unwrap();
        assert_eq!(all.len(), 2, "{name}");

        // Directed outgoing from b1 reaches nothing.
        let downstream = bundle
            .graph
            .reachable(&b1.id, &a1, 0, None, Some(Direction::Outgoing))
            .await
            .unwrap();
        assert!(downstream.is_empty(), "{name}");

        // Type filter prunes the Enables hop.
        let supports_only = bundle
            .graph
            .reachable(&b1.id, &a1, 0, Some(&[RelationshipType::Supports]), None)
            .await
            .unwrap();
        assert_eq!(supports_only.len(), 1, "{name}");
        assert!(supports_only.contains(&b2.id), "{name}");
    }
}

#[tokio::test]
async fn shortest_path_trivial_cases() {
    for (name, bundle) in bundles() {
        let a1 = agent("a1");
        let b1 = bundle.beliefs.put(belief(&a1, "one", 0.5)).await.unwrap();

        // Zero-length path to itself.
        let path = bundle.graph.shortest_path(&b1.id, &b1.id, &a1, 5).await.unwrap();
        assert!(path.is_empty(), "{name}");

        // Unknown endpoints have no path.
        let ghost = headkey::BeliefId::generate();
        let path = bundle.graph.shortest_path(&b1.id, &ghost, &a1, 5).await.unwrap();
        assert!(path.is_empty(), "{name}");
    }
}

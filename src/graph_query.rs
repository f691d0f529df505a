// Graph Query Service
// Read-only graph operations composed over a belief store and a
// relationship store. Works identically over both storage strategies and
// never issues writes.

use async_trait::async_trait;
use futures::stream::BoxStream;
use indexmap::IndexSet;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use crate::contracts::{
    Belief, BeliefRelationship, BeliefStore, GraphQuery, GraphStatistics, KnowledgeGraphSnapshot,
    RelationshipStore, StructureReport,
};
use crate::errors::{StorageError, StoreResult};
use crate::types::{AgentId, BeliefId, Direction, RelationshipType};

/// Serializes materialized snapshots. The format tag is opaque to the
/// graph layer; the snapshot builder itself never produces bytes.
pub trait SnapshotExporter: Send + Sync {
    fn export(&self, snapshot: &KnowledgeGraphSnapshot, format: &str) -> StoreResult<Vec<u8>>;
}

/// Default exporter over serde_json. Understands the `json` tag.
#[derive(Debug, Default)]
pub struct JsonSnapshotExporter;

impl SnapshotExporter for JsonSnapshotExporter {
    fn export(&self, snapshot: &KnowledgeGraphSnapshot, format: &str) -> StoreResult<Vec<u8>> {
        match format.trim().to_lowercase().as_str() {
            "json" => serde_json::to_vec_pretty(snapshot)
                .map_err(|e| StorageError::serialization(e.to_string())),
            other => Err(StorageError::invalid_input(
                "format",
                format!("unsupported export format '{other}'"),
            )),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn type_admitted(edge: &BeliefRelationship, types: Option<&[RelationshipType]>) -> bool {
    types
        .map(|allowed| allowed.contains(&edge.relationship_type))
        .unwrap_or(true)
}

/// The belief on the far side of an edge relative to `from`.
fn opposite_endpoint(edge: &BeliefRelationship, from: &BeliefId) -> BeliefId {
    if &edge.source_belief_id == from {
        edge.target_belief_id.clone()
    } else {
        edge.source_belief_id.clone()
    }
}

/// Composition of the two store contracts into the graph read surface.
pub struct GraphQueryService {
    beliefs: Arc<dyn BeliefStore>,
    relationships: Arc<dyn RelationshipStore>,
    exporter: Arc<dyn SnapshotExporter>,
}

impl GraphQueryService {
    pub fn new(beliefs: Arc<dyn BeliefStore>, relationships: Arc<dyn RelationshipStore>) -> Self {
        Self {
            beliefs,
            relationships,
            exporter: Arc::new(JsonSnapshotExporter),
        }
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn SnapshotExporter>) -> Self {
        self.exporter = exporter;
        self
    }

    async fn edges_for(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
        direction: Direction,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        match direction {
            Direction::Outgoing => self.relationships.outgoing(belief, agent).await,
            Direction::Incoming => self.relationships.incoming(belief, agent).await,
            Direction::Both => self.relationships.for_belief(belief, agent).await,
        }
    }

    /// Resolve ids to beliefs, preserving the id order.
    async fn resolve_ordered(&self, ids: &[BeliefId]) -> StoreResult<Vec<Belief>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let found = self.beliefs.get_many(ids).await?;
        let mut by_id: HashMap<BeliefId, Belief> =
            found.into_iter().map(|b| (b.id.clone(), b)).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Breadth-first expansion from `start`. Returns visited ids (start
    /// excluded) in first-seen order. A `max_depth` of zero is unbounded.
    async fn bfs(
        &self,
        start: &BeliefId,
        agent: &AgentId,
        max_depth: usize,
        types: Option<&[RelationshipType]>,
        direction: Direction,
        deprecating_only: bool,
    ) -> StoreResult<IndexSet<BeliefId>> {
        let mut visited: IndexSet<BeliefId> = IndexSet::new();
        let mut queue: VecDeque<(BeliefId, usize)> = VecDeque::new();
        queue.push_back((start.clone(), 0));
        let mut seen: BTreeSet<BeliefId> = BTreeSet::new();
        seen.insert(start.clone());

        while let Some((current, depth)) = queue.pop_front() {
            if max_depth > 0 && depth >= max_depth {
                continue;
            }
            let edges = self.edges_for(&current, agent, direction).await?;
            for edge in edges {
                if !edge.active {
                    continue;
                }
                if deprecating_only && !edge.is_deprecating() {
                    continue;
                }
                if !type_admitted(&edge, types) {
                    continue;
                }
                let next = opposite_endpoint(&edge, &current);
                if seen.insert(next.clone()) {
                    visited.insert(next.clone());
                    queue.push_back((next, depth + 1));
                }
            }
        }
        Ok(visited)
    }
}

#[async_trait]
impl GraphQuery for GraphQueryService {
    async fn statistics(&self, agent: &AgentId) -> StoreResult<GraphStatistics> {
        let total_beliefs = self.beliefs.count(Some(agent), true).await?;
        let active_beliefs = self.beliefs.count(Some(agent), false).await?;
        let edges = self.relationships.all(agent).await?;
        let total_relationships = edges.len() as u64;
        let active_relationships = edges.iter().filter(|r| r.active).count() as u64;
        let deprecated_beliefs = self.deprecated_belief_ids(agent, usize::MAX).await?.len() as u64;

        let density = if total_beliefs == 0 {
            0.0
        } else {
            round2(total_relationships as f64 / total_beliefs as f64)
        };

        Ok(GraphStatistics {
            total_beliefs,
            active_beliefs,
            total_relationships,
            active_relationships,
            deprecated_beliefs,
            density,
        })
    }

    async fn type_distribution(&self, agent: &AgentId) -> StoreResult<HashMap<String, u64>> {
        self.relationships.type_distribution(agent).await
    }

    async fn stream_beliefs(
        &self,
        agent: &AgentId,
        include_inactive: bool,
        page_size: usize,
    ) -> StoreResult<BoxStream<'static, StoreResult<Belief>>> {
        let page_size = page_size.max(1);
        let beliefs = Arc::clone(&self.beliefs);
        let agent = agent.clone();

        struct State {
            offset: usize,
            buffer: VecDeque<Belief>,
            exhausted: bool,
        }

        let stream = futures::stream::unfold(
            State {
                offset: 0,
                buffer: VecDeque::new(),
                exhausted: false,
            },
            move |mut state| {
                let beliefs = Arc::clone(&beliefs);
                let agent = agent.clone();
                async move {
                    loop {
                        if let Some(belief) = state.buffer.pop_front() {
                            return Some((Ok(belief), state));
                        }
                        if state.exhausted {
                            return None;
                        }
                        match beliefs
                            .for_agent_page(&agent, include_inactive, state.offset, page_size)
                            .await
                        {
                            Ok(page) => {
                                if page.len() < page_size {
                                    state.exhausted = true;
                                }
                                state.offset += page.len();
                                if page.is_empty() {
                                    return None;
                                }
                                state.buffer.extend(page);
                            }
                            Err(e) => {
                                state.exhausted = true;
                                return Some((Err(e), state));
                            }
                        }
                    }
                }
            },
        );
        Ok(Box::pin(stream))
    }

    async fn connected(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
        direction: Direction,
        types: Option<&[RelationshipType]>,
        limit: usize,
    ) -> StoreResult<Vec<Belief>> {
        let edges = self.edges_for(belief, agent, direction).await?;
        let mut neighbor_ids: IndexSet<BeliefId> = IndexSet::new();
        for edge in edges {
            if !type_admitted(&edge, types) {
                continue;
            }
            neighbor_ids.insert(opposite_endpoint(&edge, belief));
        }
        let ids: Vec<BeliefId> = neighbor_ids.into_iter().take(limit).collect();
        self.resolve_ordered(&ids).await
    }

    async fn degree(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
        direction: Direction,
    ) -> StoreResult<u64> {
        Ok(self.edges_for(belief, agent, direction).await?.len() as u64)
    }

    async fn directly_connected(
        &self,
        a: &BeliefId,
        b: &BeliefId,
        agent: &AgentId,
        types: Option<&[RelationshipType]>,
    ) -> StoreResult<bool> {
        let mut edges = self.relationships.between(a, b, agent).await?;
        edges.extend(self.relationships.between(b, a, agent).await?);
        Ok(edges.iter().any(|edge| type_admitted(edge, types)))
    }

    async fn deprecated_belief_ids(
        &self,
        agent: &AgentId,
        limit: usize,
    ) -> StoreResult<Vec<BeliefId>> {
        let edges = self
            .relationships
            .by_type(RelationshipType::Deprecates, agent)
            .await?;
        let mut ids: IndexSet<BeliefId> = IndexSet::new();
        for edge in edges {
            ids.insert(edge.target_belief_id);
        }
        Ok(ids.into_iter().take(limit).collect())
    }

    async fn superseding_belief_ids(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
    ) -> StoreResult<Vec<Belief>> {
        let edges = self.relationships.incoming(belief, agent).await?;
        let mut ids: IndexSet<BeliefId> = IndexSet::new();
        for edge in edges {
            if edge.is_deprecating() {
                ids.insert(edge.source_belief_id);
            }
        }
        let ids: Vec<BeliefId> = ids.into_iter().collect();
        self.resolve_ordered(&ids).await
    }

    async fn deprecation_chain(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
        max_depth: usize,
    ) -> StoreResult<Vec<Belief>> {
        let downstream = self
            .bfs(belief, agent, max_depth, None, Direction::Outgoing, true)
            .await?;
        let mut chain: Vec<BeliefId> = vec![belief.clone()];
        chain.extend(downstream);
        self.resolve_ordered(&chain).await
    }

    async fn reachable(
        &self,
        start: &BeliefId,
        agent: &AgentId,
        max_depth: usize,
        types: Option<&[RelationshipType]>,
        direction: Option<Direction>,
    ) -> StoreResult<BTreeSet<BeliefId>> {
        let direction = direction.unwrap_or(Direction::Both);
        let visited = self
            .bfs(start, agent, max_depth, types, direction, false)
            .await?;
        Ok(visited.into_iter().collect())
    }

    async fn shortest_path(
        &self,
        src: &BeliefId,
        dst: &BeliefId,
        agent: &AgentId,
        max_depth: usize,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        if src == dst {
            return Ok(Vec::new());
        }
        // A path only exists between beliefs that are actually stored.
        let endpoints = self.beliefs.get_many(&[src.clone(), dst.clone()]).await?;
        let present: BTreeSet<&BeliefId> = endpoints
            .iter()
            .filter(|b| &b.agent_id == agent)
            .map(|b| &b.id)
            .collect();
        if !present.contains(src) || !present.contains(dst) {
            return Ok(Vec::new());
        }

        let mut parent: HashMap<BeliefId, BeliefRelationship> = HashMap::new();
        let mut queue: VecDeque<(BeliefId, usize)> = VecDeque::new();
        let mut seen: BTreeSet<BeliefId> = BTreeSet::new();
        queue.push_back((src.clone(), 0));
        seen.insert(src.clone());

        'search: while let Some((current, depth)) = queue.pop_front() {
            if max_depth > 0 && depth >= max_depth {
                continue;
            }
            let edges = self.relationships.outgoing(&current, agent).await?;
            for edge in edges {
                if !edge.active {
                    continue;
                }
                let next = edge.target_belief_id.clone();
                if seen.insert(next.clone()) {
                    parent.insert(next.clone(), edge);
                    if &next == dst {
                        break 'search;
                    }
                    queue.push_back((next, depth + 1));
                }
            }
        }

        if !parent.contains_key(dst) {
            return Ok(Vec::new());
        }
        let mut path = Vec::new();
        let mut cursor = dst.clone();
        while &cursor != src {
            let edge = parent
                .remove(&cursor)
                .expect("path reconstruction follows recorded parents");
            cursor = edge.source_belief_id.clone();
            path.push(edge);
        }
        path.reverse();
        Ok(path)
    }

    async fn validate_structure(&self, agent: &AgentId) -> StoreResult<StructureReport> {
        Ok(StructureReport {
            orphaned: self.relationships.orphans(agent).await?,
            self_referential: self.relationships.self_refs(agent).await?,
            temporally_invalid: self.relationships.temporally_invalid(agent).await?,
        })
    }

    async fn memory_usage_estimate(&self, agent: &AgentId) -> StoreResult<u64> {
        let beliefs = self.beliefs.count(Some(agent), true).await?;
        let relationships = self.relationships.count(agent).await?;
        Ok(beliefs * 1024 + relationships * 512)
    }

    async fn average_relationship_strength(
        &self,
        agent: &AgentId,
        include_inactive: bool,
    ) -> StoreResult<f64> {
        let edges = self.relationships.all(agent).await?;
        let strengths: Vec<f64> = edges
            .iter()
            .filter(|r| include_inactive || r.active)
            .map(|r| r.strength)
            .collect();
        if strengths.is_empty() {
            return Ok(0.0);
        }
        Ok(strengths.iter().sum::<f64>() / strengths.len() as f64)
    }

    async fn snapshot(
        &self,
        agent: &AgentId,
        include_inactive: bool,
    ) -> StoreResult<KnowledgeGraphSnapshot> {
        let beliefs = self.beliefs.for_agent(agent, include_inactive).await?;
        let relationships = self
            .relationships
            .all(agent)
            .await?
            .into_iter()
            .filter(|r| include_inactive || r.active)
            .collect();
        Ok(KnowledgeGraphSnapshot::closed(
            agent.clone(),
            beliefs,
            relationships,
        ))
    }

    async fn filtered_snapshot(
        &self,
        agent: &AgentId,
        belief_ids: Option<&[BeliefId]>,
        types: Option<&[RelationshipType]>,
        max_beliefs: usize,
    ) -> StoreResult<KnowledgeGraphSnapshot> {
        let mut beliefs = match belief_ids {
            Some(ids) => {
                let found = self.beliefs.get_many(ids).await?;
                found
                    .into_iter()
                    .filter(|b| &b.agent_id == agent)
                    .collect()
            }
            None => self.beliefs.for_agent(agent, true).await?,
        };
        beliefs.truncate(max_beliefs);

        let relationships = self
            .relationships
            .all(agent)
            .await?
            .into_iter()
            .filter(|edge| type_admitted(edge, types))
            .collect();
        Ok(KnowledgeGraphSnapshot::closed(
            agent.clone(),
            beliefs,
            relationships,
        ))
    }

    async fn export_snapshot(&self, agent: &AgentId, format: &str) -> StoreResult<Vec<u8>> {
        let snapshot = self.snapshot(agent, true).await?;
        self.exporter.export(&snapshot, format)
    }
}

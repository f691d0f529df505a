// Shared harness for the integration suite: both storage strategies are
// exercised through the same store bundles.
#![allow(dead_code)]

use headkey::{
    create_in_memory_document_stores, create_in_memory_relational_stores, AgentId, Belief,
    BeliefId, StoreBundle, StoreConfig,
};

/// Both strategies over their in-memory reference engines.
pub fn bundles() -> Vec<(&'static str, StoreBundle)> {
    vec![
        ("document", create_in_memory_document_stores(StoreConfig::default())),
        (
            "relational",
            create_in_memory_relational_stores(StoreConfig::default()),
        ),
    ]
}

pub fn agent(name: &str) -> AgentId {
    AgentId::new(name).unwrap()
}

pub fn belief(agent_id: &AgentId, statement: &str, confidence: f64) -> Belief {
    Belief::new(BeliefId::generate(), agent_id.clone(), statement, confidence).unwrap()
}

pub fn belief_in_category(
    agent_id: &AgentId,
    statement: &str,
    category: &str,
    confidence: f64,
) -> Belief {
    let mut b = belief(agent_id, statement, confidence);
    b.category = Some(category.to_string());
    b
}

/// Small pause so consecutive writes land on distinct timestamps.
pub async fn tick() {
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
}

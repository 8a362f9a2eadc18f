//! Neo4j-backed [`EntityGraph`] (spec.md §4.4).
//!
//! Grounded on the teacher's `core/storage/neo4j.rs`: a `Graph` wrapped in
//! `Arc`, constraint-based schema init, `query().param()` Cypher calls.
//! Node labels are prefixed `MemoryX` the way the teacher prefixed its own
//! labels `Nexus`.

use anyhow::Result;
use async_trait::async_trait;
use neo4rs::{Graph, Node, query};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::traits::EntityGraph;
use crate::models::memory::{Entity, Relation};
use crate::models::owner::Owner;

#[derive(Clone, Debug)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

pub struct Neo4jEntityGraph {
    graph: Arc<Graph>,
}

impl Neo4jEntityGraph {
    pub async fn connect(config: GraphConfig) -> Result<Self> {
        info!("connecting to entity graph at {}", config.uri);
        let graph = Graph::new(&config.uri, &config.user, &config.password).await?;
        let store = Self {
            graph: Arc::new(graph),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        let constraints = [
            "CREATE CONSTRAINT memoryx_entity_id IF NOT EXISTS FOR (e:MemoryXEntity) REQUIRE e.id IS UNIQUE",
        ];
        for constraint in constraints {
            if let Err(e) = self.graph.run(query(constraint)).await {
                debug!("constraint creation result: {:?}", e);
            }
        }
        info!("entity graph schema initialized");
        Ok(())
    }
}

#[async_trait]
impl EntityGraph for Neo4jEntityGraph {
    async fn upsert_entity(&self, entity: &Entity) -> Result<Uuid> {
        let q = query(
            "MERGE (e:MemoryXEntity {user_id: $user_id, project_id: $project_id, canonical_name: $name})
             ON CREATE SET e.id = $id, e.entity_type = $entity_type, e.aliases = $aliases, e.created_at = datetime($now)
             ON MATCH SET e.aliases = $aliases
             RETURN e.id as id",
        )
        .param("user_id", entity.owner.user_id.clone())
        .param("project_id", entity.owner.project_id.clone())
        .param("name", entity.canonical_name.clone())
        .param("id", entity.id.to_string())
        .param("entity_type", entity.entity_type.clone())
        .param("aliases", entity.aliases.clone())
        .param("now", chrono::Utc::now().to_rfc3339());

        let mut result = self.graph.execute(q).await?;
        if let Some(row) = result.next().await? {
            let id: String = row.get("id")?;
            Ok(Uuid::parse_str(&id).unwrap_or(entity.id))
        } else {
            Ok(entity.id)
        }
    }

    async fn upsert_relation(&self, relation: &Relation) -> Result<()> {
        let q = query(
            "MATCH (src:MemoryXEntity {id: $src}), (dst:MemoryXEntity {id: $dst})
             MERGE (src)-[r:RELATES {relation_type: $relation_type}]->(dst)
             SET r.derived_from_memory_id = $memory_id",
        )
        .param("src", relation.source_entity_id.to_string())
        .param("dst", relation.target_entity_id.to_string())
        .param("relation_type", relation.relation_type.clone())
        .param("memory_id", relation.derived_from_memory_id.to_string());

        self.graph.run(q).await?;
        Ok(())
    }

    async fn link_memory(&self, owner: &Owner, memory_id: Uuid, entity_id: Uuid) -> Result<()> {
        let q = query(
            "MATCH (e:MemoryXEntity {id: $entity_id})
             MERGE (m:MemoryXMemory {id: $memory_id, user_id: $user_id, project_id: $project_id})
             MERGE (m)-[:MENTIONS]->(e)",
        )
        .param("entity_id", entity_id.to_string())
        .param("memory_id", memory_id.to_string())
        .param("user_id", owner.user_id.clone())
        .param("project_id", owner.project_id.clone());

        self.graph.run(q).await?;
        Ok(())
    }

    async fn unlink_memory(&self, owner: &Owner, memory_id: Uuid) -> Result<()> {
        let q = query(
            "MATCH (m:MemoryXMemory {id: $memory_id, user_id: $user_id, project_id: $project_id})
             DETACH DELETE m",
        )
        .param("memory_id", memory_id.to_string())
        .param("user_id", owner.user_id.clone())
        .param("project_id", owner.project_id.clone());

        self.graph.run(q).await?;
        Ok(())
    }

    async fn memory_is_linked(&self, owner: &Owner, memory_id: Uuid) -> Result<bool> {
        let q = query(
            "MATCH (m:MemoryXMemory {id: $memory_id, user_id: $user_id, project_id: $project_id})
             RETURN count(m) as c",
        )
        .param("memory_id", memory_id.to_string())
        .param("user_id", owner.user_id.clone())
        .param("project_id", owner.project_id.clone());

        let mut result = self.graph.execute(q).await?;
        if let Some(row) = result.next().await? {
            let count: i64 = row.get("c")?;
            Ok(count > 0)
        } else {
            Ok(false)
        }
    }

    async fn expand(
        &self,
        owner: &Owner,
        seed_entity_ids: &[Uuid],
        depth: u8,
    ) -> Result<Vec<(Uuid, Uuid)>> {
        if seed_entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let seeds: Vec<String> = seed_entity_ids.iter().map(|id| id.to_string()).collect();
        let depth = depth.clamp(1, 5);

        // Variable-length relationship bounds must be literals in Cypher,
        // not query parameters; `depth` is a small server-side config
        // value, never user input, so inlining it is safe.
        let cypher = format!(
            "MATCH (seed:MemoryXEntity) WHERE seed.id IN $seeds
             MATCH (seed)-[:RELATES*1..{depth}]-(nearby:MemoryXEntity)
             MATCH (m:MemoryXMemory {{user_id: $user_id, project_id: $project_id}})-[:MENTIONS]->(nearby)
             RETURN DISTINCT nearby.id as entity_id, m.id as memory_id"
        );

        let q = query(&cypher)
            .param("seeds", seeds)
            .param("user_id", owner.user_id.clone())
            .param("project_id", owner.project_id.clone());

        let mut result = self.graph.execute(q).await?;
        let mut pairs = Vec::new();
        while let Some(row) = result.next().await? {
            let entity_id: String = row.get("entity_id")?;
            let memory_id: String = row.get("memory_id")?;
            if let (Ok(e), Ok(m)) = (Uuid::parse_str(&entity_id), Uuid::parse_str(&memory_id)) {
                pairs.push((e, m));
            }
        }
        Ok(pairs)
    }

    async fn find_entity_by_name(&self, owner: &Owner, canonical_name: &str) -> Result<Option<Entity>> {
        let q = query(
            "MATCH (e:MemoryXEntity {user_id: $user_id, project_id: $project_id, canonical_name: $name})
             RETURN e",
        )
        .param("user_id", owner.user_id.clone())
        .param("project_id", owner.project_id.clone())
        .param("name", canonical_name);

        let mut result = self.graph.execute(q).await?;
        if let Some(row) = result.next().await? {
            let node: Node = row.get("e")?;
            let id: String = node.get("id")?;
            let entity_type: String = node.get("entity_type").unwrap_or_default();
            let aliases: Vec<String> = node.get("aliases").unwrap_or_default();
            let created_at_str: String = node.get("created_at").unwrap_or_default();
            let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now());

            return Ok(Some(Entity {
                id: Uuid::parse_str(&id).unwrap_or_default(),
                owner: owner.clone(),
                canonical_name: canonical_name.to_string(),
                entity_type,
                aliases,
                created_at,
            }));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Integration tests require a running Neo4j instance.
    #[tokio::test]
    #[ignore]
    async fn upsert_then_find_entity_round_trips() {
        let store = Neo4jEntityGraph::connect(GraphConfig {
            uri: "bolt://localhost:7687".into(),
            user: "neo4j".into(),
            password: "password".into(),
        })
        .await
        .unwrap();

        let owner = Owner::new("u1", "p1");
        let entity = Entity {
            id: Uuid::new_v4(),
            owner: owner.clone(),
            canonical_name: "Alice".into(),
            entity_type: "person".into(),
            aliases: vec![],
            created_at: chrono::Utc::now(),
        };
        store.upsert_entity(&entity).await.unwrap();
        let found = store.find_entity_by_name(&owner, "Alice").await.unwrap();
        assert!(found.is_some());
    }
}

//! The owner partition: every memory, fact, entity, relation and task is
//! scoped to exactly one `(user, project)` pair (spec.md Glossary,
//! "Owner partition"). All per-owner invariants — serialized
//! reconciliation, quota accounting, retrieval scoping — key off this
//! type.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    pub user_id: String,
    pub project_id: String,
}

impl Owner {
    pub fn new(user_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: project_id.into(),
        }
    }

    /// Stable string key for use as a map key or cache namespace, e.g. the
    /// per-owner serialization lock in the reconciler.
    pub fn key(&self) -> String {
        format!("{}:{}", self.user_id, self.project_id)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

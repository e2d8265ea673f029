//! Reference entity parameterized over its identifier type.

use std::fmt::Display;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Marker for types usable as an entity identifier
pub trait EntityId: Display + Clone + Eq + Hash + Send + Sync + 'static {}

impl<T> EntityId for T where T: Display + Clone + Eq + Hash + Send + Sync + 'static {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity<Id> {
    pub id: Id,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl<Id: EntityId> Entity<Id> {
    pub fn new(id: Id, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
        }
    }

    /// Subject for events about this entity, e.g. `demo.robot.123`
    pub fn subject(&self, prefix: &str) -> String {
        format!("{}.{}", prefix, self.id)
    }
}

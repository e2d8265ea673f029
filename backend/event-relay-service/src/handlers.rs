//! Demo subscribers projecting robot and person changes into an in-process
//! directory.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use event_envelope::{Entity, Envelope, ErrorHandling, ErrorPolicy, ExecutionContext};
use parking_lot::RwLock;
use serde::Deserialize;
use subscriber_host::{
    EventHandler, HandlerError, HandlerResult, HostResult, RawPayload, SubscriberRegistry,
};
use tracing::{debug, info};
use validator::Validate;

/// Read model the demo subscribers maintain
#[derive(Debug, Default)]
pub struct Directory {
    robots: RwLock<HashMap<i64, Entity<i64>>>,
    people: RwLock<HashMap<i64, Entity<i64>>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn robot(&self, id: i64) -> Option<Entity<i64>> {
        self.robots.read().get(&id).cloned()
    }

    pub fn person(&self, id: i64) -> Option<Entity<i64>> {
        self.people.read().get(&id).cloned()
    }

    pub fn robot_count(&self) -> usize {
        self.robots.read().len()
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RobotChanged {
    pub id: i64,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PersonChanged {
    pub id: i64,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    /// Robot this person operates, which must already be known
    pub robot_id: Option<i64>,
}

pub struct RobotProjection {
    directory: Arc<Directory>,
}

#[async_trait]
impl EventHandler for RobotProjection {
    type Payload = RobotChanged;

    async fn handle(
        &self,
        _ctx: &ExecutionContext,
        envelope: &Envelope,
        payload: RobotChanged,
    ) -> HandlerResult {
        let mut robot = Entity::new(payload.id, payload.name);
        robot.description = payload.description;

        debug!(subject = %envelope.subject(), robot_id = payload.id, "Projecting robot");
        self.directory.robots.write().insert(payload.id, robot);
        Ok(())
    }
}

pub struct RobotRemoval {
    directory: Arc<Directory>,
}

#[async_trait]
impl EventHandler for RobotRemoval {
    type Payload = RawPayload;

    async fn handle(
        &self,
        _ctx: &ExecutionContext,
        envelope: &Envelope,
        _payload: RawPayload,
    ) -> HandlerResult {
        let id: i64 = envelope
            .key_string()
            .and_then(|key| key.parse().ok())
            .ok_or_else(|| HandlerError::validation("deleted robot has no numeric key"))?;

        if self.directory.robots.write().remove(&id).is_none() {
            return Err(HandlerError::not_found(format!("robot {id} is not projected")));
        }
        info!(robot_id = id, "Robot removed from directory");
        Ok(())
    }
}

pub struct PersonProjection {
    directory: Arc<Directory>,
}

#[async_trait]
impl EventHandler for PersonProjection {
    type Payload = PersonChanged;

    async fn handle(
        &self,
        _ctx: &ExecutionContext,
        envelope: &Envelope,
        payload: PersonChanged,
    ) -> HandlerResult {
        if let Some(robot_id) = payload.robot_id {
            if self.directory.robot(robot_id).is_none() {
                return Err(HandlerError::not_found(format!(
                    "person {} references unknown robot {robot_id}",
                    payload.id
                )));
            }
        }

        let mut people = self.directory.people.write();
        if envelope.action().eq_ignore_ascii_case("updated") && !people.contains_key(&payload.id) {
            return Err(HandlerError::not_found(format!(
                "person {} was never created",
                payload.id
            )));
        }
        people.insert(payload.id, Entity::new(payload.id, payload.name));
        Ok(())
    }
}

/// Register the demo subscribers for subjects under `subject_prefix`.
pub fn register_demo_subscribers(
    registry: &mut SubscriberRegistry,
    directory: Arc<Directory>,
    subject_prefix: &str,
) -> HostResult<()> {
    let robots = format!("{subject_prefix}.robot.*");
    let people = format!("{subject_prefix}.person.*");

    registry
        .register(
            "robot-projection",
            &robots,
            &["created", "updated"],
            ErrorPolicy::default(),
            RobotProjection {
                directory: directory.clone(),
            },
        )?
        .register(
            "robot-removal",
            &robots,
            &["deleted"],
            // A removal for a robot never projected is harmless
            ErrorPolicy::default().with_not_found(ErrorHandling::ContinueWithAudit),
            RobotRemoval {
                directory: directory.clone(),
            },
        )?
        .register(
            "person-projection",
            &people,
            &["created", "updated"],
            ErrorPolicy::default().with_not_found(ErrorHandling::CompleteWithWarning),
            PersonProjection { directory },
        )?;
    Ok(())
}

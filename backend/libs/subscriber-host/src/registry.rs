//! Registration table built at startup, keyed by subject pattern and action.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use event_envelope::{ErrorPolicy, SubjectPattern};

use crate::error::HostResult;
use crate::handler::{ErasedHandler, EventHandler};

pub struct Subscription {
    name: String,
    pattern: SubjectPattern,
    /// Lower-cased; empty means every action
    actions: HashSet<String>,
    policy: ErrorPolicy,
    pub(crate) handler: Arc<dyn ErasedHandler>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &SubjectPattern {
        &self.pattern
    }

    pub fn policy(&self) -> &ErrorPolicy {
        &self.policy
    }

    pub fn matches(&self, subject: &str, action: &str) -> bool {
        self.pattern.matches(subject)
            && (self.actions.is_empty() || self.actions.contains(&action.to_ascii_lowercase()))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .field("actions", &self.actions)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Subscribers in registration order. The first match wins.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    subscriptions: Vec<Subscription>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for subjects matching `pattern` and the given
    /// actions (none means any action).
    pub fn register<H: EventHandler>(
        &mut self,
        name: impl Into<String>,
        pattern: &str,
        actions: &[&str],
        policy: ErrorPolicy,
        handler: H,
    ) -> HostResult<&mut Self> {
        let pattern = SubjectPattern::parse(pattern)?;
        self.subscriptions.push(Subscription {
            name: name.into(),
            pattern,
            actions: actions.iter().map(|a| a.to_ascii_lowercase()).collect(),
            policy,
            handler: Arc::new(handler),
        });
        Ok(self)
    }

    pub fn find(&self, subject: &str, action: &str) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .find(|s| s.matches(subject, action))
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

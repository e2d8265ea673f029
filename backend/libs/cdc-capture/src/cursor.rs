use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position in a change stream (log sequence number or row version)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ChangePosition(pub i64);

impl ChangePosition {
    pub const START: ChangePosition = ChangePosition(0);

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ChangePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Last change position handed to the outbox for one watched object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdcCursor {
    pub object_name: String,
    pub last_position: ChangePosition,
    pub updated_at_utc: DateTime<Utc>,
}

impl CdcCursor {
    /// Cursor of an object that has never been captured
    pub fn initial(object_name: impl Into<String>) -> Self {
        Self {
            object_name: object_name.into(),
            last_position: ChangePosition::START,
            updated_at_utc: DateTime::<Utc>::default(),
        }
    }

    pub(crate) fn advanced_to(&self, position: ChangePosition, now: DateTime<Utc>) -> Self {
        Self {
            object_name: self.object_name.clone(),
            last_position: position,
            updated_at_utc: now,
        }
    }
}

//! Public↔internal model name mapping record (spec §3, §6.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMapping {
    pub public_name: String,
    pub internal_name: String,
    pub created_at: DateTime<Utc>,
}

impl ModelMapping {
    pub fn new(public_name: impl Into<String>, internal_name: impl Into<String>) -> Self {
        Self {
            public_name: public_name.into(),
            internal_name: internal_name.into(),
            created_at: Utc::now(),
        }
    }
}

//! The capabilities the core consumes but does not implement: computations
//! and data sources.
//!
//! A [`Computation`] defines the algebra of one computation type: how a
//! participant combines the shares it collected into a partial result, and
//! how the coordinator aggregates all partials into the final answer. A
//! [`DataSource`] produces a participant's private input and splits it into
//! shares. The two are paired: shares produced by a source must sum to the
//! collected value under the paired computation's algebra.
//!
//! Both registries are populated at startup and never mutated afterwards,
//! which is why lookups need no locking.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::msg::Event;

/// Errors raised by [`Computation`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum ComputationError {
    #[error("invalid computation input: {0}")]
    InvalidData(String),
    #[error("computation failed: {0}")]
    Failed(String),
}

/// Errors raised by [`DataSource`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    #[error("data collection failed: {0}")]
    Collect(String),
    #[error("sharding failed: {0}")]
    Shard(String),
}

/// One computation type, keyed by `Event::computation_type`.
pub trait Computation: Send + Sync {
    /// Combine the shares a participant collected (one per event participant,
    /// own share included) into its partial result.
    ///
    /// Must be invariant under share arrival order; callers pass shares in
    /// the event's canonical participant order.
    fn combine(&self, shares: &[String], metadata: &Value) -> Result<String, ComputationError>;

    /// Aggregate every participant's partial into the final result.
    fn aggregate(&self, partials: &[String], metadata: &Value) -> Result<String, ComputationError>;
}

/// Produces a participant's private input for an event and shards it.
pub trait DataSource: Send + Sync {
    /// Collect the raw input value for this event.
    fn collect(&self, event: &Event) -> Result<String, DataSourceError>;

    /// Split `value` into `pieces` shares, one per event participant.
    ///
    /// The shares must reconstruct `value` under the paired computation's
    /// algebra; no piece alone may reveal it.
    fn shard(&self, value: &str, pieces: usize, event: &Event)
    -> Result<Vec<String>, DataSourceError>;
}

/// Startup-time registry of [`Computation`]s by type name.
#[derive(Default, Clone)]
pub struct ComputationRegistry {
    by_type: HashMap<String, Arc<dyn Computation>>,
}

impl ComputationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `computation` under `computation_type`, replacing any
    /// previous registration for that type.
    pub fn register(
        mut self,
        computation_type: impl Into<String>,
        computation: Arc<dyn Computation>,
    ) -> Self {
        self.by_type.insert(computation_type.into(), computation);
        self
    }

    pub fn get(&self, computation_type: &str) -> Option<Arc<dyn Computation>> {
        self.by_type.get(computation_type).cloned()
    }

    /// The registered type names, for startup logging.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.by_type.keys().map(String::as_str)
    }
}

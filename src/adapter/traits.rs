//! Adapter contracts the core consumes.

use crate::bot::Bot;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::message::Message;
use crate::nlu::NluResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Base contract every adapter implements.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Unique name for this adapter.
    fn name(&self) -> &str;

    /// Start the adapter. Message adapters begin feeding `bot.receive` here.
    async fn start(&self, bot: Arc<Bot>) -> Result<()>;

    /// Graceful shutdown.
    async fn shutdown(&self) -> Result<()>;
}

/// Outbound message delivery.
#[async_trait]
pub trait MessageAdapter: Adapter {
    /// Deliver one envelope to its target.
    async fn dispatch(&self, envelope: &Envelope) -> Result<()>;
}

/// Natural-language understanding.
#[async_trait]
pub trait NluAdapter: Adapter {
    /// Run a message through the vendor model.
    async fn process(&self, message: &Message) -> Result<NluResult>;
}

/// Durable key/collection persistence.
#[async_trait]
pub trait StorageAdapter: Adapter {
    /// Persist the full memory snapshot.
    async fn save_memory(&self, snapshot: serde_json::Value) -> Result<()>;

    /// Load the last memory snapshot.
    async fn load_memory(&self) -> Result<serde_json::Value>;

    /// Append a record to a collection.
    async fn keep(&self, collection: &str, record: serde_json::Value) -> Result<()>;

    /// Remove records matching the criteria.
    async fn lose(&self, collection: &str, criteria: serde_json::Value) -> Result<()>;

    /// Find records matching the criteria.
    async fn find(
        &self,
        collection: &str,
        criteria: serde_json::Value,
    ) -> Result<Vec<serde_json::Value>>;

    /// Find the first record matching the criteria.
    async fn find_one(
        &self,
        collection: &str,
        criteria: serde_json::Value,
    ) -> Result<Option<serde_json::Value>>;
}

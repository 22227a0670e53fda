//! SQLite-backed persistence for `Agent` and `AgentMessage`.

pub mod agent_store;
pub mod error;
pub mod message_store;
pub mod schema;

pub use agent_store::AgentStore;
pub use error::{StoreError, StoreResult};
pub use message_store::MessageStore;
pub use schema::{connect, connect_in_memory, init_schema};

/// Castline Core
///
/// Social notification fan-out and direct messaging: follow edges,
/// reactions, comments, conversation aggregation with read-state
/// tracking, device push-endpoint registration, and multi-channel
/// notification delivery with a durable queue backstop.

pub mod channels;
pub mod config;
pub mod context;
pub mod db;
pub mod directory;
pub mod error;
pub mod messages;
pub mod notify;
pub mod push;
pub mod social;

pub use config::CoreConfig;
pub use context::AppContext;
pub use error::{CoreError, CoreResult};

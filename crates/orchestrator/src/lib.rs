//! Agent orchestration: launch queue admission, runner lifecycles, event
//! parsing, and the streaming/persistence pipeline that turns raw provider
//! output into a durable, gap-free message log.

pub mod aggregator;
pub mod error;
pub mod gap;
pub mod launch_queue;
pub mod orchestrator;
pub mod parser;
pub mod runner;
pub mod streaming;
pub mod tracing_setup;

pub use aggregator::aggregate;
pub use error::{OrchestratorError, OrchestratorResult};
pub use gap::{GapOutcome, GapTracker, LOCAL_SENTINEL_SEQ};
pub use launch_queue::{LaunchFn, LaunchQueue};
pub use orchestrator::Orchestrator;
pub use parser::{ClaudeStyleParser, ParseError, ParsedEvent, Parser};
pub use runner::{HttpStreamSource, ProviderKind, RawEventSource, SseProxySource, SubprocessSource};
pub use streaming::{ObserverId, StreamingService};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

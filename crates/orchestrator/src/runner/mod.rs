//! Runner variants: the thing on the other end of an agent's line-delimited
//! event stream, whatever its transport.

mod http_stream;
mod sse_proxy;
mod subprocess;
mod synthetic;

pub use http_stream::HttpStreamSource;
pub use sse_proxy::SseProxySource;
pub use subprocess::{ProviderKind, SubprocessSource};
pub use synthetic::{ScriptedEvent, SyntheticSource};

use async_trait::async_trait;

use crate::error::OrchestratorResult;

/// A source of raw, line-delimited runner output, abstracting over
/// subprocess stdout, an HTTP NDJSON/SSE stream, or a synthetic schedule.
/// The streaming service drives every variant through this one interface.
#[async_trait]
pub trait RawEventSource: Send {
    /// Returns the next line, or `None` once the source is exhausted.
    async fn next_line(&mut self) -> OrchestratorResult<Option<String>>;

    /// Requests the underlying process/connection stop. For a subprocess
    /// this is SIGTERM followed by SIGKILL after a grace period; for an
    /// HTTP stream it drops the connection.
    async fn stop(&mut self) -> OrchestratorResult<()>;
}

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;

use super::RawEventSource;
use crate::error::OrchestratorResult;

/// One scheduled line with the delay to wait before emitting it.
#[derive(Debug, Clone)]
pub struct ScriptedEvent {
    pub delay: Duration,
    pub line: String,
}

impl ScriptedEvent {
    pub fn new(delay: Duration, line: impl Into<String>) -> Self {
        Self {
            delay,
            line: line.into(),
        }
    }
}

/// Plays back a fixed schedule of lines with no external process — the
/// primary test double for the streaming pipeline and the default runner
/// behind the `synthetic` agent type.
pub struct SyntheticSource {
    schedule: VecDeque<ScriptedEvent>,
    stopped: bool,
}

impl SyntheticSource {
    pub fn new(schedule: Vec<ScriptedEvent>) -> Self {
        Self {
            schedule: schedule.into(),
            stopped: false,
        }
    }
}

#[async_trait]
impl RawEventSource for SyntheticSource {
    async fn next_line(&mut self) -> OrchestratorResult<Option<String>> {
        if self.stopped {
            return Ok(None);
        }
        match self.schedule.pop_front() {
            Some(event) => {
                if !event.delay.is_zero() {
                    tokio::time::sleep(event.delay).await;
                }
                Ok(Some(event.line))
            }
            None => Ok(None),
        }
    }

    async fn stop(&mut self) -> OrchestratorResult<()> {
        self.stopped = true;
        self.schedule.clear();
        Ok(())
    }
}

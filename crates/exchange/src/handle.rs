use std::fmt;

use serde::{Deserialize, Serialize};
use spool_common::{QueryId, StageId, TaskId};

/// Names one spooled partition written by one attempt of a producing task.
///
/// Consumers treat handles as opaque and only compare them by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangeSourceHandle {
    pub query_id: QueryId,
    pub stage_id: StageId,
    pub map_task: TaskId,
    pub attempt: u32,
    pub partition: u32,
    pub data_size_bytes: u64,
}

impl fmt::Display for ExchangeSourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}#{}",
            self.query_id, self.stage_id, self.map_task, self.attempt, self.partition
        )
    }
}

/// Input of a spooling exchange: the full, fixed set of partitions to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoolingExchangeInput {
    handles: Vec<ExchangeSourceHandle>,
}

impl SpoolingExchangeInput {
    pub fn new(handles: Vec<ExchangeSourceHandle>) -> Self {
        Self { handles }
    }

    pub fn handles(&self) -> &[ExchangeSourceHandle] {
        &self.handles
    }
}

/// Input of a streaming exchange: one upstream task to pull from directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectExchangeInput {
    pub task_id: TaskId,
    pub location: String,
}

/// Input delivered to an exchange operator by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeInput {
    Spooling(SpoolingExchangeInput),
    Direct(DirectExchangeInput),
}

impl From<SpoolingExchangeInput> for ExchangeInput {
    fn from(input: SpoolingExchangeInput) -> Self {
        Self::Spooling(input)
    }
}

impl From<DirectExchangeInput> for ExchangeInput {
    fn from(input: DirectExchangeInput) -> Self {
        Self::Direct(input)
    }
}

/// Renders a handle list as `[a, b, ...]` for error messages.
pub(crate) fn display_handles(handles: &[ExchangeSourceHandle]) -> String {
    let parts = handles.iter().map(ToString::to_string).collect::<Vec<_>>();
    format!("[{}]", parts.join(", "))
}

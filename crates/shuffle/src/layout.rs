use serde::{Deserialize, Serialize};
use spool_common::{QueryId, StageId, TaskId};
use spool_exchange::ExchangeSourceHandle;

pub fn partition_path(
    query_id: QueryId,
    stage_id: StageId,
    map_task: TaskId,
    attempt: u32,
    partition: u32,
) -> String {
    format!("spool/{query_id}/{stage_id}/{map_task}/{attempt}/part-{partition}.ipc")
}

pub fn handle_path(handle: &ExchangeSourceHandle) -> String {
    partition_path(
        handle.query_id,
        handle.stage_id,
        handle.map_task,
        handle.attempt,
        handle.partition,
    )
}

pub fn map_task_base_dir(query_id: QueryId, stage_id: StageId, map_task: TaskId) -> String {
    format!("spool/{query_id}/{stage_id}/{map_task}")
}

pub fn map_task_dir(query_id: QueryId, stage_id: StageId, map_task: TaskId, attempt: u32) -> String {
    format!("{}/{attempt}", map_task_base_dir(query_id, stage_id, map_task))
}

pub fn index_json_path(
    query_id: QueryId,
    stage_id: StageId,
    map_task: TaskId,
    attempt: u32,
) -> String {
    format!(
        "{}/index.json",
        map_task_dir(query_id, stage_id, map_task, attempt)
    )
}

pub fn index_bin_path(
    query_id: QueryId,
    stage_id: StageId,
    map_task: TaskId,
    attempt: u32,
) -> String {
    format!(
        "{}/index.bin",
        map_task_dir(query_id, stage_id, map_task, attempt)
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoolPartitionMeta {
    pub partition: u32,
    pub file: String,
    pub bytes: u64,
    pub rows: u64,
    pub batches: u64,
}

/// Everything one attempt of a map task spooled, one entry per partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapTaskIndex {
    pub query_id: QueryId,
    pub stage_id: StageId,
    pub map_task: TaskId,
    pub attempt: u32,
    pub partitions: Vec<SpoolPartitionMeta>,
}

impl MapTaskIndex {
    /// Handles naming every partition of this attempt, in partition order.
    pub fn source_handles(&self) -> Vec<ExchangeSourceHandle> {
        self.partitions
            .iter()
            .map(|p| ExchangeSourceHandle {
                query_id: self.query_id,
                stage_id: self.stage_id,
                map_task: self.map_task,
                attempt: self.attempt,
                partition: p.partition,
                data_size_bytes: p.bytes,
            })
            .collect()
    }
}

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use spool_common::{QueryId, Result, SpoolError, StageId, TaskId};
use spool_exchange::ExchangeSourceHandle;

use crate::layout::{
    MapTaskIndex, handle_path, index_bin_path, index_json_path, map_task_base_dir,
};
use crate::writer::{INDEX_BIN_HEADER_LEN, INDEX_BIN_MAGIC, INDEX_BIN_VERSION};

const DEFAULT_FETCH_CHUNK_BYTES: usize = 64 * 1024;

/// Consumer side of the spool: locates and fetches spooled partitions.
#[derive(Debug, Clone)]
pub struct SpoolReader {
    root_dir: PathBuf,
    fetch_chunk_bytes: usize,
}

impl SpoolReader {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            fetch_chunk_bytes: DEFAULT_FETCH_CHUNK_BYTES,
        }
    }

    /// Chunk size used by [`Self::fetch_partition_chunks`]; clamped to at
    /// least one byte.
    pub fn with_fetch_chunk_bytes(mut self, bytes: usize) -> Self {
        self.fetch_chunk_bytes = bytes.max(1);
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Load the index committed by one attempt. The framed binary copy is
    /// preferred; the JSON copy is the fallback.
    pub fn read_map_task_index(
        &self,
        query_id: QueryId,
        stage_id: StageId,
        map_task: TaskId,
        attempt: u32,
    ) -> Result<MapTaskIndex> {
        let bin = self
            .root_dir
            .join(index_bin_path(query_id, stage_id, map_task, attempt));
        match fs::read(&bin) {
            Ok(framed) => return decode_index_frame(&framed),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let json = self
            .root_dir
            .join(index_json_path(query_id, stage_id, map_task, attempt));
        parse_index(&fs::read(json)?)
    }

    /// Attempt numbers present on disk for a map task, ascending. Entries
    /// that are not numeric directories are ignored.
    pub fn available_attempts(
        &self,
        query_id: QueryId,
        stage_id: StageId,
        map_task: TaskId,
    ) -> Result<Vec<u32>> {
        let base = self
            .root_dir
            .join(map_task_base_dir(query_id, stage_id, map_task));
        let entries = match fs::read_dir(&base) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut attempts = Vec::new();
        for entry in entries.flatten() {
            if !entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            if let Ok(attempt) = entry.file_name().to_string_lossy().parse::<u32>() {
                attempts.push(attempt);
            }
        }
        attempts.sort_unstable();
        Ok(attempts)
    }

    pub fn latest_attempt(
        &self,
        query_id: QueryId,
        stage_id: StageId,
        map_task: TaskId,
    ) -> Result<Option<u32>> {
        Ok(self
            .available_attempts(query_id, stage_id, map_task)?
            .last()
            .copied())
    }

    /// Handles of every partition committed by the latest attempt of a map
    /// task.
    pub fn latest_source_handles(
        &self,
        query_id: QueryId,
        stage_id: StageId,
        map_task: TaskId,
    ) -> Result<Vec<ExchangeSourceHandle>> {
        let Some(attempt) = self.latest_attempt(query_id, stage_id, map_task)? else {
            return Err(SpoolError::Execution(format!(
                "no spool attempts found for map task {query_id}/{stage_id}/{map_task}"
            )));
        };
        Ok(self
            .read_map_task_index(query_id, stage_id, map_task, attempt)?
            .source_handles())
    }

    /// Fetch the partition named by `handle` as a sequence of byte chunks of
    /// at most `fetch_chunk_bytes` each. Chunks share one allocation.
    pub fn fetch_partition_chunks(&self, handle: &ExchangeSourceHandle) -> Result<Vec<Bytes>> {
        let payload = Bytes::from(fs::read(self.root_dir.join(handle_path(handle)))?);
        let chunks = (0..payload.len())
            .step_by(self.fetch_chunk_bytes)
            .map(|start| {
                let end = (start + self.fetch_chunk_bytes).min(payload.len());
                payload.slice(start..end)
            })
            .collect();
        Ok(chunks)
    }

    /// Fetch the partition named by `handle` as one page.
    pub fn fetch_page(&self, handle: &ExchangeSourceHandle) -> Result<Bytes> {
        Ok(reassemble(self.fetch_partition_chunks(handle)?))
    }
}

/// Join streamed chunks back into one contiguous payload.
pub fn reassemble(chunks: Vec<Bytes>) -> Bytes {
    match <[Bytes; 1]>::try_from(chunks) {
        Ok([single]) => single,
        Err(chunks) => {
            let mut page = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
            for chunk in &chunks {
                page.extend_from_slice(chunk);
            }
            page.freeze()
        }
    }
}

fn parse_index(json: &[u8]) -> Result<MapTaskIndex> {
    serde_json::from_slice(json)
        .map_err(|e| SpoolError::Execution(format!("spool index decode failed: {e}")))
}

/// `magic(4) | version u32 LE | payload length u32 LE | json payload`
fn decode_index_frame(framed: &[u8]) -> Result<MapTaskIndex> {
    let Some((header, rest)) = framed.split_first_chunk::<INDEX_BIN_HEADER_LEN>() else {
        return Err(SpoolError::Execution(
            "spool index frame is truncated".to_string(),
        ));
    };
    let (magic, fields) = header.split_at(4);
    if magic != INDEX_BIN_MAGIC {
        return Err(SpoolError::Execution(
            "spool index frame has a bad magic".to_string(),
        ));
    }
    let word = |at: usize| {
        u32::from_le_bytes([fields[at], fields[at + 1], fields[at + 2], fields[at + 3]])
    };
    let version = word(0);
    if version != INDEX_BIN_VERSION {
        return Err(SpoolError::Unsupported(format!("spool index version {version}")));
    }
    let len = word(4) as usize;
    let payload = rest.get(..len).ok_or_else(|| {
        SpoolError::Execution(format!(
            "spool index frame declares {len} payload bytes, has {}",
            rest.len()
        ))
    })?;
    parse_index(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_truncated_and_foreign_index() {
        assert!(decode_index_frame(b"SPL").is_err());
        let err = decode_index_frame(b"XXXX\x01\0\0\0\0\0\0\0").expect_err("magic");
        assert!(err.to_string().contains("magic"));
        let err = decode_index_frame(b"SPLI\x02\0\0\0\0\0\0\0").expect_err("version");
        assert!(matches!(err, SpoolError::Unsupported(_)));
        let err = decode_index_frame(b"SPLI\x01\0\0\0\xff\0\0\0{}").expect_err("length");
        assert!(err.to_string().contains("255 payload bytes"));
    }

    #[test]
    fn missing_map_task_has_no_attempts() {
        let reader = SpoolReader::new(std::env::temp_dir().join("spool_reader_missing_root"));
        let attempts = reader
            .available_attempts(QueryId(1), StageId(1), TaskId(1))
            .expect("attempts");
        assert!(attempts.is_empty());
        assert!(
            reader
                .latest_source_handles(QueryId(1), StageId(1), TaskId(1))
                .is_err()
        );
    }

    #[test]
    fn reassemble_keeps_order() {
        let chunks = vec![
            Bytes::from_static(b"ab"),
            Bytes::from_static(b"c"),
            Bytes::new(),
        ];
        assert_eq!(reassemble(chunks), Bytes::from_static(b"abc"));
        assert_eq!(reassemble(vec![Bytes::from_static(b"xy")]), Bytes::from_static(b"xy"));
        assert!(reassemble(Vec::new()).is_empty());
    }
}

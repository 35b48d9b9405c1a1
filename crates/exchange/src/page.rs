//! Page codec: a page is one Arrow IPC stream payload.

use std::io::Cursor;

use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use spool_common::{Result, SpoolError};

/// Serialize `batches` (sharing one schema) into a single page.
pub fn encode_page(batches: &[RecordBatch]) -> Result<Bytes> {
    let schema = batches
        .first()
        .map(|b| b.schema())
        .ok_or_else(|| SpoolError::Execution("cannot encode an empty page".to_string()))?;

    let mut out = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut out, schema.as_ref())
            .map_err(|e| SpoolError::Execution(format!("ipc writer init failed: {e}")))?;
        for b in batches {
            writer
                .write(b)
                .map_err(|e| SpoolError::Execution(format!("ipc write failed: {e}")))?;
        }
        writer
            .finish()
            .map_err(|e| SpoolError::Execution(format!("ipc finish failed: {e}")))?;
    }
    Ok(Bytes::from(out))
}

pub fn decode_page(bytes: &[u8]) -> Result<Vec<RecordBatch>> {
    let reader = StreamReader::try_new(Cursor::new(bytes), None)
        .map_err(|e| SpoolError::Execution(format!("ipc reader init failed: {e}")))?;
    reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SpoolError::Execution(format!("ipc read failed: {e}")))
}

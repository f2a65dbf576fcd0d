//! Columnar row-batch encoding for pull payloads.
//!
//! A batch of rows is transposed into per-column value vectors and encoded
//! as CBOR. The column set is the sorted union over all rows; absent cells
//! are encoded as null and dropped again on decode.

use crate::error::{CodecError, CodecResult};
use crate::row::Row;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Serialize, Deserialize)]
struct ColumnarBatch {
    columns: Vec<String>,
    /// One vector per column, each holding one value per row.
    values: Vec<Vec<Value>>,
}

/// Encodes a batch of rows into a columnar CBOR payload.
pub fn encode_row_batch(rows: &[Row]) -> CodecResult<Bytes> {
    let columns: Vec<String> = rows
        .iter()
        .flat_map(|row| row.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let values = columns
        .iter()
        .map(|column| {
            rows.iter()
                .map(|row| row.get(column).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    let batch = ColumnarBatch { columns, values };
    let mut out = Vec::new();
    ciborium::into_writer(&batch, &mut out)
        .map_err(|e| CodecError::RowBatch(e.to_string()))?;
    Ok(Bytes::from(out))
}

/// Decodes a columnar CBOR payload back into rows.
///
/// # Errors
///
/// Returns an error on malformed CBOR or when a column's value count does
/// not match the batch's row count.
pub fn decode_row_batch(bytes: &[u8]) -> CodecResult<Vec<Row>> {
    let batch: ColumnarBatch =
        ciborium::from_reader(bytes).map_err(|e| CodecError::RowBatch(e.to_string()))?;

    let row_count = batch.values.first().map(Vec::len).unwrap_or(0);
    for (column, values) in batch.columns.iter().zip(&batch.values) {
        if values.len() != row_count {
            return Err(CodecError::ColumnMismatch {
                column: column.clone(),
                got: values.len(),
                expected: row_count,
            });
        }
    }

    let mut rows = vec![Row::new(); row_count];
    for (column, values) in batch.columns.into_iter().zip(batch.values) {
        for (row, value) in rows.iter_mut().zip(values) {
            if !value.is_null() {
                row.insert(column.clone(), value);
            }
        }
    }
    Ok(rows)
}

/// Estimated encoded size of a slice of rows, in bytes.
///
/// Used by the pull producer to adapt its batch size; a cheap JSON-text
/// length stands in for the CBOR size, which tracks it closely enough for
/// sizing purposes.
pub fn encoded_rows_size(rows: &[Row]) -> usize {
    rows.iter()
        .map(|row| serde_json::to_string(row).map(|s| s.len()).unwrap_or(0))
        .sum()
}

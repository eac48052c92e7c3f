//! Columnar embedding index backed by an Arrow IPC stream file.
//!
//! The file is a schema message, zero or more record-batch messages and an
//! 8-byte end-of-stream (EOS) marker. New rows are buffered in memory as
//! record batches and persisted by truncating the old EOS, appending only the
//! new batch messages and writing a fresh EOS. Previously written batch bytes
//! are never read back or rewritten during a flush.
//!
//! Each row is `(vector, norm, offset, length)`: an embedding, its L2 norm and
//! the byte range of the record log it was computed from.

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Float64Array, RecordBatch, UInt32Array, UInt64Array,
};
use arrow_ipc::reader::StreamReader;
use arrow_ipc::writer::StreamWriter;
use arrow_ipc::{root_as_message, MessageHeader};
use arrow_schema::{ArrowError, DataType, Field, Schema, SchemaRef};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use turnstore_core::{AppError, AppResult};

/// Index file name inside the storage directory.
pub const INDEX_FILE_NAME: &str = "index.arrows";

/// Continuation marker opening every encapsulated IPC message.
const CONTINUATION_MARKER: [u8; 4] = [0xFF; 4];

/// End-of-stream marker (continuation marker plus zero metadata length).
pub const EOS_MARKER: [u8; 8] = [0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00];

/// One row to be indexed. The norm is computed on append.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub vector: Vec<f32>,
    pub offset: u64,
    pub length: u32,
}

/// Parallel column arrays of every persisted and buffered row, in append order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSnapshot {
    pub vectors: Vec<Vec<f32>>,
    pub norms: Vec<f64>,
    pub offsets: Vec<u64>,
    pub lengths: Vec<u32>,
}

impl IndexSnapshot {
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    fn extend_from_batch(&mut self, batch: &RecordBatch) -> AppResult<()> {
        let vectors = column::<FixedSizeListArray>(batch, 0, "vector")?;
        let norms = column::<Float64Array>(batch, 1, "norm")?;
        let offsets = column::<UInt64Array>(batch, 2, "offset")?;
        let lengths = column::<UInt32Array>(batch, 3, "length")?;

        for row in 0..batch.num_rows() {
            let values = vectors.value(row);
            let values = values
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| AppError::Format("Invalid vector values".to_string()))?;

            self.vectors.push(values.values().to_vec());
            self.norms.push(norms.value(row));
            self.offsets.push(offsets.value(row));
            self.lengths.push(lengths.value(row));
        }

        Ok(())
    }
}

fn column<'a, T: Array + 'static>(
    batch: &'a RecordBatch,
    index: usize,
    name: &str,
) -> AppResult<&'a T> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| AppError::Format(format!("Invalid {} column", name)))
}

fn format_error(context: &str) -> impl Fn(ArrowError) -> AppError + '_ {
    move |e| AppError::Format(format!("{}: {}", context, e))
}

/// L2 norm, accumulated in f64.
pub fn l2_norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|&v| (v as f64) * (v as f64))
        .sum::<f64>()
        .sqrt()
}

/// Arrow schema of the index for a given dimensionality.
pub fn index_schema(dimensions: usize) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimensions as i32,
            ),
            false,
        ),
        Field::new("norm", DataType::Float64, false),
        Field::new("offset", DataType::UInt64, false),
        Field::new("length", DataType::UInt32, false),
    ]))
}

/// Serialize batches as a complete IPC stream (schema, batches, EOS).
fn encode_stream(schema: &SchemaRef, batches: &[RecordBatch]) -> AppResult<Vec<u8>> {
    let mut writer =
        StreamWriter::try_new(Vec::new(), schema).map_err(format_error("Failed to start stream"))?;
    for batch in batches {
        writer
            .write(batch)
            .map_err(format_error("Failed to encode batch"))?;
    }
    writer
        .finish()
        .map_err(format_error("Failed to finish stream"))?;
    writer
        .into_inner()
        .map_err(format_error("Failed to finish stream"))
}

/// Byte length of the schema header, derived from an empty stream.
///
/// The empty stream must end with [`EOS_MARKER`]; anything else means the IPC
/// writer produces a framing this index cannot splice.
fn measure_header_len(schema: &SchemaRef) -> AppResult<usize> {
    let empty = encode_stream(schema, &[])?;

    if empty.len() <= EOS_MARKER.len() || !empty.ends_with(&EOS_MARKER) {
        return Err(AppError::Format(format!(
            "IPC writer produced an unexpected end-of-stream marker ({} byte empty stream)",
            empty.len()
        )));
    }

    Ok(empty.len() - EOS_MARKER.len())
}

/// Outcome of walking the message frames of an index file.
#[derive(Debug, PartialEq)]
enum FrameScan {
    /// Schema, batches and EOS, nothing after.
    Complete { messages: usize },
    /// Well-formed up to `valid_end`; the rest is a torn message or a missing EOS.
    Torn { valid_end: u64, messages: usize },
}

/// Walk the encapsulated messages of an IPC stream file without decoding bodies.
fn scan_frames(file: &mut File, file_len: u64) -> AppResult<FrameScan> {
    let mut pos = 0u64;
    let mut messages = 0usize;

    loop {
        if file_len - pos < 8 {
            return Ok(FrameScan::Torn {
                valid_end: pos,
                messages,
            });
        }

        let mut prefix = [0u8; 8];
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut prefix)?;

        if prefix[..4] != CONTINUATION_MARKER {
            return Err(AppError::Format(format!(
                "Missing message continuation marker at byte {}",
                pos
            )));
        }

        let meta_len = i32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
        if meta_len == 0 {
            if messages == 0 {
                return Err(AppError::Format(
                    "Index stream has no schema message".to_string(),
                ));
            }
            if pos + 8 != file_len {
                return Err(AppError::Format(format!(
                    "{} trailing bytes after end-of-stream marker",
                    file_len - pos - 8
                )));
            }
            return Ok(FrameScan::Complete { messages });
        }
        if meta_len < 0 {
            return Err(AppError::Format(format!(
                "Negative metadata length at byte {}",
                pos
            )));
        }

        let meta_end = pos + 8 + meta_len as u64;
        if meta_end > file_len {
            return Ok(FrameScan::Torn {
                valid_end: pos,
                messages,
            });
        }

        let mut meta = vec![0u8; meta_len as usize];
        file.read_exact(&mut meta)?;
        let message = root_as_message(&meta).map_err(|e| {
            AppError::Format(format!("Unreadable message metadata at byte {}: {}", pos, e))
        })?;

        let expected = if messages == 0 {
            MessageHeader::Schema
        } else {
            MessageHeader::RecordBatch
        };
        if message.header_type() != expected {
            return Err(AppError::Format(format!(
                "Unexpected {:?} message at byte {}",
                message.header_type(),
                pos
            )));
        }

        let body_len = message.bodyLength();
        if body_len < 0 {
            return Err(AppError::Format(format!(
                "Negative body length at byte {}",
                pos
            )));
        }

        let end = meta_end + body_len as u64;
        if end > file_len {
            return Ok(FrameScan::Torn {
                valid_end: pos,
                messages,
            });
        }

        pos = end;
        messages += 1;
    }
}

/// Embedding index with buffered batches and incremental disk append.
#[derive(Debug)]
pub struct VectorIndex {
    path: PathBuf,
    dimensions: usize,
    schema: SchemaRef,
    header_len: usize,
    pending: Vec<RecordBatch>,
    persisted_rows: usize,
    buffered_rows: usize,
    indexed_end: u64,
    closed: bool,
}

impl VectorIndex {
    /// Open (or prepare to create) the index in `directory`.
    ///
    /// An existing file is validated against the expected schema and any torn
    /// tail left by a crash during flush is cut back to the last whole batch.
    pub fn open(directory: &Path, dimensions: usize) -> AppResult<Self> {
        if dimensions == 0 {
            return Err(AppError::Config(
                "Index dimensions must be greater than zero".to_string(),
            ));
        }

        let schema = index_schema(dimensions);
        let header_len = measure_header_len(&schema)?;

        let mut index = Self {
            path: directory.join(INDEX_FILE_NAME),
            dimensions,
            schema,
            header_len,
            pending: Vec::new(),
            persisted_rows: 0,
            buffered_rows: 0,
            indexed_end: 0,
            closed: false,
        };

        index.repair_tail()?;

        let persisted = index.read_persisted()?;
        index.persisted_rows = persisted.len();
        index.indexed_end = max_end(&persisted)?;

        tracing::debug!(
            "Opened vector index {:?}: {} rows, indexed end {}, header {} bytes",
            index.path,
            index.persisted_rows,
            index.indexed_end,
            index.header_len
        );

        Ok(index)
    }

    fn repair_tail(&self) -> AppResult<()> {
        let file_len = match self.file_len()? {
            Some(len) => len,
            None => return Ok(()),
        };

        if file_len == 0 {
            tracing::warn!("Removing empty index file {:?}", self.path);
            fs::remove_file(&self.path)?;
            return Ok(());
        }

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        match scan_frames(&mut file, file_len)? {
            FrameScan::Complete { messages } => {
                tracing::debug!("Index file {:?} holds {} messages", self.path, messages);
                Ok(())
            }
            FrameScan::Torn { messages: 0, .. } => {
                tracing::warn!("Index file {:?} has a torn schema header, removing it", self.path);
                drop(file);
                fs::remove_file(&self.path)?;
                Ok(())
            }
            FrameScan::Torn {
                valid_end,
                messages,
            } => {
                tracing::warn!(
                    "Index file {:?} has a torn tail after {} messages, truncating {} -> {} bytes",
                    self.path,
                    messages,
                    file_len,
                    valid_end
                );
                file.set_len(valid_end)?;
                file.seek(SeekFrom::End(0))?;
                file.write_all(&EOS_MARKER)?;
                file.sync_all()?;
                Ok(())
            }
        }
    }

    /// Buffer `entries` as one in-memory batch. Nothing touches disk.
    pub fn append(&mut self, entries: Vec<IndexEntry>) -> AppResult<()> {
        self.ensure_open()?;
        if entries.is_empty() {
            return Ok(());
        }

        let rows = entries.len();
        let mut values = Vec::with_capacity(rows * self.dimensions);
        let mut norms = Vec::with_capacity(rows);
        let mut offsets = Vec::with_capacity(rows);
        let mut lengths = Vec::with_capacity(rows);
        let mut batch_end = 0u64;

        for entry in &entries {
            if entry.vector.len() != self.dimensions {
                return Err(AppError::Format(format!(
                    "Vector dimension mismatch: expected {}, got {}",
                    self.dimensions,
                    entry.vector.len()
                )));
            }
            batch_end = batch_end.max(range_end(entry.offset, entry.length)?);
            values.extend_from_slice(&entry.vector);
            norms.push(l2_norm(&entry.vector));
            offsets.push(entry.offset);
            lengths.push(entry.length);
        }

        let vectors = FixedSizeListArray::try_new(
            Arc::new(Field::new("item", DataType::Float32, true)),
            self.dimensions as i32,
            Arc::new(Float32Array::from(values)),
            None,
        )
        .map_err(format_error("Failed to build vector column"))?;

        let batch = RecordBatch::try_new(
            self.schema.clone(),
            vec![
                Arc::new(vectors),
                Arc::new(Float64Array::from(norms)),
                Arc::new(UInt64Array::from(offsets)),
                Arc::new(UInt32Array::from(lengths)),
            ],
        )
        .map_err(format_error("Failed to build batch"))?;

        self.indexed_end = self.indexed_end.max(batch_end);
        self.buffered_rows += rows;
        self.pending.push(batch);

        Ok(())
    }

    /// Persist all buffered batches. A no-op when nothing is buffered.
    pub fn flush(&mut self) -> AppResult<()> {
        self.ensure_open()?;
        if self.pending.is_empty() {
            return Ok(());
        }

        let stream = encode_stream(&self.schema, &self.pending)?;
        let existing_len = self.file_len()?.unwrap_or(0);

        if existing_len == 0 {
            let mut file = File::create(&self.path)?;
            file.write_all(&stream)?;
            file.sync_all()?;
        } else {
            self.splice_batches(&stream[self.header_len..], existing_len)?;
        }

        tracing::debug!(
            "Flushed {} batches ({} rows) to {:?}",
            self.pending.len(),
            self.buffered_rows,
            self.path
        );

        self.persisted_rows += self.buffered_rows;
        self.buffered_rows = 0;
        self.pending.clear();
        Ok(())
    }

    /// Replace the trailing EOS of the existing file with `tail`
    /// (batch messages followed by a fresh EOS).
    fn splice_batches(&self, tail: &[u8], existing_len: u64) -> AppResult<()> {
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;

        let eos_len = EOS_MARKER.len() as u64;
        if existing_len < self.header_len as u64 + eos_len {
            return Err(AppError::Format(format!(
                "Index file {:?} is shorter than its header",
                self.path
            )));
        }

        let mut trailer = [0u8; 8];
        file.seek(SeekFrom::Start(existing_len - eos_len))?;
        file.read_exact(&mut trailer)?;
        if trailer != EOS_MARKER {
            return Err(AppError::Format(format!(
                "Index file {:?} does not end with an end-of-stream marker",
                self.path
            )));
        }

        file.set_len(existing_len - eos_len)?;
        file.seek(SeekFrom::End(0))?;
        file.write_all(tail)?;
        file.sync_all()?;
        Ok(())
    }

    fn file_len(&self) -> AppResult<Option<u64>> {
        match fs::metadata(&self.path) {
            Ok(metadata) => Ok(Some(metadata.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_persisted(&self) -> AppResult<IndexSnapshot> {
        let mut snapshot = IndexSnapshot::default();

        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(snapshot),
            Err(e) => return Err(e.into()),
        };
        if file.metadata()?.len() == 0 {
            return Ok(snapshot);
        }

        let reader = StreamReader::try_new(BufReader::new(file), None)
            .map_err(format_error("Failed to read index schema"))?;

        let schema = reader.schema();
        if schema.fields() != self.schema.fields() {
            return Err(AppError::Format(format!(
                "Index schema mismatch (expected {}-dimensional vectors): found {:?}",
                self.dimensions,
                schema.fields().first().map(|f| f.data_type())
            )));
        }

        for batch in reader {
            let batch = batch.map_err(format_error("Failed to read index batch"))?;
            snapshot.extend_from_batch(&batch)?;
        }

        Ok(snapshot)
    }

    /// All persisted rows followed by all buffered rows. A missing file is empty.
    pub fn read_all(&self) -> AppResult<IndexSnapshot> {
        self.ensure_open()?;
        let mut snapshot = self.read_persisted()?;
        for batch in &self.pending {
            snapshot.extend_from_batch(batch)?;
        }
        Ok(snapshot)
    }

    /// `max(offset + length)` over persisted and buffered rows, 0 when empty.
    pub fn last_indexed_end(&self) -> u64 {
        self.indexed_end
    }

    /// Persisted plus buffered rows.
    pub fn len(&self) -> usize {
        self.persisted_rows + self.buffered_rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of batches waiting for `flush`.
    pub fn pending_batches(&self) -> usize {
        self.pending.len()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush pending batches and release the index. Safe to call more than once.
    pub fn close(&mut self) -> AppResult<()> {
        if self.closed {
            return Ok(());
        }
        let result = self.flush();
        self.closed = true;
        result
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.closed {
            return Err(AppError::Closed);
        }
        Ok(())
    }
}

fn max_end(snapshot: &IndexSnapshot) -> AppResult<u64> {
    snapshot
        .offsets
        .iter()
        .zip(&snapshot.lengths)
        .try_fold(0u64, |end, (&offset, &length)| -> AppResult<u64> {
            Ok(end.max(range_end(offset, length)?))
        })
}

/// Exclusive end of a log range; a range past `u64::MAX` is corrupt.
fn range_end(offset: u64, length: u32) -> AppResult<u64> {
    offset.checked_add(length as u64).ok_or_else(|| {
        AppError::Format(format!(
            "Index row range at offset {} with length {} overflows u64",
            offset, length
        ))
    })
}

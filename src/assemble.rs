//! Result assembly: re-sequence indexed results and stream them into a
//! single JSON array file.
//!
//! Results arrive in completion order. [`Resequencer`] holds back anything
//! that is ahead of the next expected index, and [`JsonArrayWriter`] writes
//! each released element as soon as it is in order, so at most the
//! out-of-order window is ever held in memory.
//!
//! A [`ResultAssembler`] that is dropped or discarded before
//! [`finish`](ResultAssembler::finish) deletes its file, so nothing
//! downstream ever sees a truncated array.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::models::EnrichedSession;
use crate::pool::ResultSink;

/// Releases `(index, item)` pairs in index order starting from 0.
#[derive(Debug)]
pub struct Resequencer<T> {
    next: usize,
    pending: BTreeMap<usize, T>,
}

impl<T> Default for Resequencer<T> {
    fn default() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }
}

impl<T> Resequencer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one item and return every item now releasable, in order.
    pub fn push(&mut self, index: usize, item: T) -> Result<Vec<T>> {
        if index < self.next || self.pending.contains_key(&index) {
            bail!("duplicate result for index {}", index);
        }
        self.pending.insert(index, item);

        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next) {
            ready.push(item);
            self.next += 1;
        }
        Ok(ready)
    }

    /// Number of items released so far.
    pub fn released(&self) -> usize {
        self.next
    }

    /// Items received but still waiting for an earlier index.
    pub fn waiting(&self) -> usize {
        self.pending.len()
    }
}

/// Writes `[`, comma-separated JSON elements, then `]`.
pub struct JsonArrayWriter<W: Write> {
    inner: W,
    count: usize,
}

impl<W: Write> JsonArrayWriter<W> {
    pub fn new(mut inner: W) -> Result<Self> {
        inner.write_all(b"[")?;
        Ok(Self { inner, count: 0 })
    }

    pub fn push<T: Serialize>(&mut self, item: &T) -> Result<()> {
        if self.count > 0 {
            self.inner.write_all(b",")?;
        }
        self.inner.write_all(b"\n")?;
        serde_json::to_writer(&mut self.inner, item)?;
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Close the array and hand back the underlying writer, flushed.
    pub fn finish(mut self) -> Result<W> {
        if self.count > 0 {
            self.inner.write_all(b"\n")?;
        }
        self.inner.write_all(b"]\n")?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Streams enriched sessions into `path` in session order.
pub struct ResultAssembler {
    path: PathBuf,
    expected: usize,
    writer: Option<JsonArrayWriter<BufWriter<File>>>,
    order: Resequencer<EnrichedSession>,
}

impl ResultAssembler {
    /// Start a new artifact at `path` expecting `expected` results.
    pub fn create(path: &Path, expected: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create artifact: {}", path.display()))?;
        let writer = JsonArrayWriter::new(BufWriter::new(file))?;
        Ok(Self {
            path: path.to_path_buf(),
            expected,
            writer: Some(writer),
            order: Resequencer::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the array. Fails if any expected result never arrived.
    pub fn finish(mut self) -> Result<PathBuf> {
        if self.order.released() != self.expected || self.order.waiting() > 0 {
            bail!(
                "artifact incomplete: {} of {} results in order, {} waiting",
                self.order.released(),
                self.expected,
                self.order.waiting()
            );
        }
        let writer = self
            .writer
            .take()
            .ok_or_else(|| anyhow::anyhow!("assembler already closed"))?;
        let closed = writer.finish().and_then(|w| {
            let file = w.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            Ok(())
        });
        if let Err(e) = closed {
            let _ = std::fs::remove_file(&self.path);
            return Err(e.context(format!("Failed to close artifact: {}", self.path.display())));
        }
        Ok(self.path.clone())
    }

    /// Abandon the artifact and delete the partial file.
    pub fn discard(mut self) {
        self.remove_partial();
    }

    fn remove_partial(&mut self) {
        if self.writer.take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "could not delete partial artifact");
            }
        }
    }
}

impl ResultSink for ResultAssembler {
    fn accept(&mut self, index: usize, item: EnrichedSession) -> Result<()> {
        if index >= self.expected {
            bail!("result index {} out of range ({} expected)", index, self.expected);
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("assembler already closed"))?;
        for ready in self.order.push(index, item)? {
            writer.push(&ready)?;
        }
        Ok(())
    }
}

impl Drop for ResultAssembler {
    fn drop(&mut self) {
        self.remove_partial();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn enriched(id: &str) -> EnrichedSession {
        EnrichedSession {
            session_id: id.to_string(),
            outcome: "won".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_resequencer_releases_in_order() {
        let mut r = Resequencer::new();
        assert!(r.push(2, "c").unwrap().is_empty());
        assert!(r.push(1, "b").unwrap().is_empty());
        assert_eq!(r.waiting(), 2);
        assert_eq!(r.push(0, "a").unwrap(), vec!["a", "b", "c"]);
        assert_eq!(r.push(3, "d").unwrap(), vec!["d"]);
        assert_eq!(r.released(), 4);
    }

    #[test]
    fn test_resequencer_rejects_duplicates() {
        let mut r = Resequencer::new();
        r.push(0, 1).unwrap();
        assert!(r.push(0, 1).is_err());
        r.push(2, 3).unwrap();
        assert!(r.push(2, 3).is_err());
    }

    #[test]
    fn test_array_writer_empty_and_many() {
        let empty = JsonArrayWriter::new(Vec::new()).unwrap().finish().unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_slice(&empty).unwrap();
        assert!(parsed.is_empty());

        let mut w = JsonArrayWriter::new(Vec::new()).unwrap();
        for i in 0..3 {
            w.push(&serde_json::json!({ "i": i })).unwrap();
        }
        let bytes = w.finish().unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[2]["i"], 2);
    }

    #[test]
    fn test_assembler_writes_in_index_order() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.json");
        let mut asm = ResultAssembler::create(&path, 3).unwrap();

        asm.accept(1, enriched("b")).unwrap();
        asm.accept(2, enriched("c")).unwrap();
        asm.accept(0, enriched("a")).unwrap();
        let done = asm.finish().unwrap();

        let parsed: Vec<EnrichedSession> =
            serde_json::from_slice(&std::fs::read(&done).unwrap()).unwrap();
        let ids: Vec<&str> = parsed.iter().map(|e| e.session_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_assembler_incomplete_finish_fails_and_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.json");
        let mut asm = ResultAssembler::create(&path, 3).unwrap();
        asm.accept(0, enriched("a")).unwrap();
        asm.accept(2, enriched("c")).unwrap();

        assert!(asm.finish().is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_discard_and_drop_delete_partial_file() {
        let tmp = TempDir::new().unwrap();

        let path = tmp.path().join("discarded.json");
        let mut asm = ResultAssembler::create(&path, 2).unwrap();
        asm.accept(0, enriched("a")).unwrap();
        asm.discard();
        assert!(!path.exists());

        let path = tmp.path().join("dropped.json");
        {
            let _asm = ResultAssembler::create(&path, 2).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_index_out_of_range() {
        let tmp = TempDir::new().unwrap();
        let mut asm = ResultAssembler::create(&tmp.path().join("x.json"), 1).unwrap();
        assert!(asm.accept(5, enriched("z")).is_err());
    }
}

//! Greedy token-bounded batch packing (spec §4.3 step 5).

use pipeline_core::model::{Batch, BatchFile};
use uuid::Uuid;

/// Accumulates files into batches bounded by a token budget, emitting a
/// batch as soon as it closes rather than holding the whole run in
/// memory. Oversized single files are emitted alone immediately.
pub struct BatchPacker {
    run_id: String,
    budget: usize,
    current: Option<Batch>,
}

impl BatchPacker {
    pub fn new(run_id: impl Into<String>, budget: usize) -> Self {
        Self { run_id: run_id.into(), budget, current: None }
    }

    fn new_batch(&self) -> Batch {
        Batch::new(Uuid::new_v4().to_string(), self.run_id.clone())
    }

    /// Feed one file in; returns every batch that closed as a result
    /// (0, 1, or — when an oversized file forces the current batch to
    /// flush too — 2).
    pub fn push(&mut self, path: String, content: String, tokens: usize) -> Vec<Batch> {
        let mut completed = Vec::new();

        if tokens > self.budget {
            if let Some(current) = self.current.take() {
                completed.push(current);
            }
            let mut solo = self.new_batch();
            solo.push(BatchFile { path, content, tokens });
            completed.push(solo);
            return completed;
        }

        let would_overflow = self
            .current
            .as_ref()
            .map(|b| b.token_count + tokens > self.budget)
            .unwrap_or(false);

        if would_overflow {
            completed.push(self.current.take().unwrap());
        }

        if self.current.is_none() {
            self.current = Some(self.new_batch());
        }
        self.current.as_mut().unwrap().push(BatchFile { path, content, tokens });
        completed
    }

    /// Flush whatever batch is still accumulating at end of stream.
    pub fn finish(mut self) -> Option<Batch> {
        self.current.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_greedily_without_exceeding_budget() {
        let mut packer = BatchPacker::new("run1", 64_000);
        let sizes = [("a", 10_000usize), ("b", 20_000), ("c", 40_000), ("d", 5_000)];
        let mut closed = Vec::new();
        for (name, tokens) in sizes {
            closed.extend(packer.push(name.to_string(), "x".to_string(), tokens));
        }
        if let Some(last) = packer.finish() {
            closed.push(last);
        }

        for batch in &closed {
            assert!(batch.token_count <= 64_000);
        }
        let total_files: usize = closed.iter().map(|b| b.files.len()).sum();
        assert_eq!(total_files, 4);
    }

    #[test]
    fn oversized_file_becomes_its_own_batch() {
        let mut packer = BatchPacker::new("run1", 1_000);
        let closed = packer.push("huge".to_string(), "x".to_string(), 5_000);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].files.len(), 1);
        assert_eq!(closed[0].files[0].path, "huge");
    }

    #[test]
    fn pending_batch_flushes_before_oversized_file() {
        let mut packer = BatchPacker::new("run1", 1_000);
        packer.push("small".to_string(), "x".to_string(), 100);
        let closed = packer.push("huge".to_string(), "x".to_string(), 5_000);
        assert_eq!(closed.len(), 2);
        assert_eq!(closed[0].files[0].path, "small");
        assert_eq!(closed[1].files[0].path, "huge");
    }
}

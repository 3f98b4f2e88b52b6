//! Micro-batch accumulation and chunking
//!
//! A [`Batch`] collects records up to a fixed size. When full (or at end of
//! input) it is frozen into a shared slice and split into exactly
//! `concurrency` contiguous [`Chunk`]s, one per loader worker. Chunks share the
//! frozen slice, so splitting copies no rows.

use std::ops::Range;
use std::sync::Arc;

use crate::source::Record;

/// Bounded, in-memory group of records awaiting load
#[derive(Debug)]
pub struct Batch {
    records: Vec<Record>,
    max_len: usize,
}

impl Batch {
    pub fn new(max_len: usize) -> Self {
        let max_len = max_len.max(1);
        Self {
            records: Vec::with_capacity(max_len),
            max_len,
        }
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.max_len
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Move the accumulated records out, leaving an empty batch of the same bound
    pub fn take(&mut self) -> Batch {
        let records = std::mem::replace(&mut self.records, Vec::with_capacity(self.max_len));
        Batch {
            records,
            max_len: self.max_len,
        }
    }

    /// Freeze the batch and split it into `concurrency` chunks
    pub fn into_chunks(self, concurrency: usize) -> Vec<Chunk> {
        let rows: Arc<[Record]> = self.records.into();
        chunk_ranges(rows.len(), concurrency)
            .into_iter()
            .enumerate()
            .map(|(index, range)| Chunk {
                index,
                rows: Arc::clone(&rows),
                range,
            })
            .collect()
    }
}

impl FromIterator<Record> for Batch {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        let records: Vec<Record> = iter.into_iter().collect();
        let max_len = records.len().max(1);
        Self { records, max_len }
    }
}

/// Split `0..len` into exactly `concurrency` contiguous ranges of `ceil(len / concurrency)`
///
/// The last non-empty range may be shorter; ranges after it are empty when
/// there are fewer rows than workers. A `concurrency` of zero is treated as one.
pub fn chunk_ranges(len: usize, concurrency: usize) -> Vec<Range<usize>> {
    let concurrency = concurrency.max(1);
    let size = len.div_ceil(concurrency);

    (0..concurrency)
        .map(|i| {
            let start = (i * size).min(len);
            let end = (start + size).min(len);
            start..end
        })
        .collect()
}

/// Contiguous sub-range of a frozen batch, owned by exactly one worker
#[derive(Debug, Clone)]
pub struct Chunk {
    index: usize,
    rows: Arc<[Record]>,
    range: Range<usize>,
}

impl Chunk {
    /// Position of this chunk within its batch
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows[self.range.clone()]
    }

    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn batch_of(n: usize) -> Batch {
        (0..n)
            .map(|i| Record::from(vec![i.to_string(), format!("v{}", i)]))
            .collect()
    }

    #[test]
    fn test_even_split() {
        assert_eq!(chunk_ranges(10, 2), vec![0..5, 5..10]);
    }

    #[test]
    fn test_last_chunk_shorter() {
        assert_eq!(chunk_ranges(7, 3), vec![0..3, 3..6, 6..7]);
    }

    #[test]
    fn test_more_workers_than_rows_yields_empty_tail() {
        assert_eq!(chunk_ranges(2, 4), vec![0..1, 1..2, 2..2, 2..2]);
        assert_eq!(chunk_ranges(0, 3), vec![0..0, 0..0, 0..0]);
    }

    #[test]
    fn test_zero_concurrency_is_single_chunk() {
        assert_eq!(chunk_ranges(4, 0), vec![0..4]);
    }

    #[test]
    fn test_conservation_and_shape() {
        for len in 0..40 {
            for concurrency in 1..9 {
                let ranges = chunk_ranges(len, concurrency);
                let size = len.div_ceil(concurrency);

                assert_eq!(ranges.len(), concurrency);
                assert_eq!(ranges.iter().map(|r| r.len()).sum::<usize>(), len);

                // contiguous, disjoint, in order
                let mut next = 0;
                for r in &ranges {
                    assert_eq!(r.start, next);
                    next = r.end;
                }
                assert_eq!(next, len);

                // only the last non-empty chunk may be short
                let non_empty: Vec<_> = ranges.iter().filter(|r| !r.is_empty()).collect();
                if let Some((_, init)) = non_empty.split_last() {
                    assert!(init.iter().all(|r| r.len() == size));
                }
            }
        }
    }

    #[test]
    fn test_chunks_reconstruct_batch() {
        let chunks = batch_of(5).into_chunks(2);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].index(), 0);
        assert_eq!(chunks[1].range(), 3..5);

        let keys: Vec<String> = chunks
            .iter()
            .flat_map(|c| c.rows().iter().map(|r| r[0].to_string()))
            .collect();
        assert_eq!(keys, vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn test_take_resets_batch() {
        let mut batch = Batch::new(2);
        batch.push(Record::from(vec!["a"]));
        assert!(!batch.is_full());
        batch.push(Record::from(vec!["b"]));
        assert!(batch.is_full());

        let full = batch.take();
        assert_eq!(full.len(), 2);
        assert!(batch.is_empty());
        assert!(!batch.is_full());
    }
}

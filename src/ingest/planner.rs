//! Offset/limit chunk planning
//!
//! ## Algorithm
//!
//! - `total_chunks = ceil(row_count / chunk_size)`
//! - chunk `i`: `offset = i * chunk_size`, `limit = min(chunk_size, row_count - offset)`
//! - chunks are grouped in index order into batches of `max_parallel`
//!
//! The chunk ranges tile `[0, row_count)` exactly: no gaps, no overlaps, and only
//! the last chunk may be short.

use crate::types::ChunkDescriptor;

pub struct ChunkPlanner;

impl ChunkPlanner {
    /// Plan the batches for a result set of `row_count` rows
    ///
    /// Returns an empty plan for `row_count == 0` (nothing to sync). A zero
    /// `chunk_size` or `max_parallel` is treated as 1.
    pub fn plan(row_count: u64, chunk_size: u64, max_parallel: usize) -> Vec<Vec<ChunkDescriptor>> {
        let chunk_size = chunk_size.max(1);
        let max_parallel = max_parallel.max(1);

        let chunks = Self::chunks(row_count, chunk_size);
        chunks
            .chunks(max_parallel)
            .map(|batch| batch.to_vec())
            .collect()
    }

    /// Flat chunk list in index order
    pub fn chunks(row_count: u64, chunk_size: u64) -> Vec<ChunkDescriptor> {
        let chunk_size = chunk_size.max(1);
        let total_chunks = row_count.div_ceil(chunk_size) as usize;

        (0..total_chunks)
            .map(|index| {
                let offset = index as u64 * chunk_size;
                ChunkDescriptor {
                    index,
                    offset,
                    limit: chunk_size.min(row_count - offset),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_exact_cover(row_count: u64, chunk_size: u64, max_parallel: usize) {
        let batches = ChunkPlanner::plan(row_count, chunk_size, max_parallel);
        let flat: Vec<ChunkDescriptor> = batches.iter().flatten().copied().collect();

        let mut next = 0u64;
        for (i, chunk) in flat.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.offset, next, "gap or overlap at chunk {}", i);
            assert!(chunk.limit >= 1 && chunk.limit <= chunk_size);
            next = chunk.end();
        }
        assert_eq!(next, row_count);

        for batch in &batches {
            assert!(!batch.is_empty() && batch.len() <= max_parallel);
        }
    }

    #[test]
    fn test_example_split() {
        let batches = ChunkPlanner::plan(25_000, 10_000, 6);
        assert_eq!(batches.len(), 1);

        let ranges: Vec<(u64, u64)> = batches[0].iter().map(|c| (c.offset, c.end())).collect();
        assert_eq!(ranges, vec![(0, 10_000), (10_000, 20_000), (20_000, 25_000)]);
        assert_eq!(batches[0][2].limit, 5_000);
    }

    #[test]
    fn test_batch_grouping() {
        // 10 chunks, 6 in parallel
        let batches = ChunkPlanner::plan(100, 10, 6);
        assert_eq!(batches.len(), 2);

        let batch0: Vec<usize> = batches[0].iter().map(|c| c.index).collect();
        let batch1: Vec<usize> = batches[1].iter().map(|c| c.index).collect();
        assert_eq!(batch0, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(batch1, vec![6, 7, 8, 9]);
    }

    #[test]
    fn test_zero_rows_yields_empty_plan() {
        assert!(ChunkPlanner::plan(0, 10_000, 6).is_empty());
    }

    #[test]
    fn test_exact_cover_grid() {
        for row_count in [1, 2, 9, 10, 11, 99, 100, 101, 1_234] {
            for chunk_size in [1, 3, 10, 100, 5_000] {
                for max_parallel in [1, 2, 6] {
                    assert_exact_cover(row_count, chunk_size, max_parallel);
                }
            }
        }
    }

    #[test]
    fn test_zero_parameters_clamped() {
        let batches = ChunkPlanner::plan(3, 0, 0);
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() == 1 && b[0].limit == 1));
    }
}

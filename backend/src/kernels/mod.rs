use std::ops::Range;

use ash::vk;
use thiserror::Error;

use crate::{memory::VultenBuffer, pipeline::PipelineCreateError, queue::QueueError};

pub mod binary;
pub mod matmul;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("invalid kernel input: {0}")]
    InvalidInput(&'static str),
    #[error("failed to record kernel: {0}")]
    Record(&'static str),
    #[error(transparent)]
    Pipeline(#[from] PipelineCreateError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("kernel submission failed: {0}")]
    Vk(#[from] vk::Result),
}

#[derive(Clone, Copy)]
pub struct KernelInput<'a> {
    pub buff: &'a VultenBuffer<'a>,
    pub dims: &'a [i64],
}

impl KernelInput<'_> {
    pub fn num_elements(&self) -> i64 {
        self.dims.iter().product()
    }

    /// Whether the buffer can hold every element of `dims`.
    pub fn fits(&self, elem_size: usize) -> bool {
        let needed = self.num_elements().max(0) as u64 * elem_size as u64;
        needed <= self.buff.size
    }
}

pub(crate) trait Chunkable<T> {
    fn as_chunks(&self, chunk_size: T) -> Vec<Range<T>>;
}

impl Chunkable<i64> for Range<i64> {
    fn as_chunks(&self, chunk_size: i64) -> Vec<Range<i64>> {
        if chunk_size <= 0 || self.end <= self.start {
            return Vec::new();
        }

        let total = self.end - self.start;
        let total_chunks = (total + chunk_size - 1) / chunk_size;
        let mut chunks: Vec<Range<i64>> = Vec::with_capacity(total_chunks as usize);

        let mut start = self.start;
        while start < self.end {
            let end = (start + chunk_size).min(self.end);
            chunks.push(start..end);
            start = end;
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_cover_range() {
        let chunks = (0..10).as_chunks(4);
        assert_eq!(chunks, vec![0..4, 4..8, 8..10]);
    }

    #[test]
    fn chunks_respect_start() {
        let chunks = (5..12).as_chunks(5);
        assert_eq!(chunks, vec![5..10, 10..12]);
    }

    #[test]
    fn empty_range_has_no_chunks() {
        assert!((3..3).as_chunks(8).is_empty());
        assert!((0..8).as_chunks(0).is_empty());
    }

    #[test]
    fn exact_multiple() {
        let chunks = (0..28000).as_chunks(7000);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[3], 21000..28000);
    }
}

//! Fixed-size-block free-list allocator.
//!
//! A single backing slab is carved into `capacity` equal-size blocks of
//! `block_size` bytes, threaded as a singly-linked free list. `allocate` and
//! `deallocate` are O(1): push/pop the head of an index-based free list
//! rather than walking it. Blocks are addressed by opaque [`BlockHandle`]
//! rather than raw pointer, so a handle from one pool can never alias a
//! different pool's storage.

use thiserror::Error;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("pool exhausted")]
    OutOfMemory,
    #[error("requested size exceeds block size")]
    InvalidSize,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct BlockHandle(usize);

#[derive(Copy, Clone, Debug, Default)]
pub struct PoolDiagnostics {
    pub capacity: usize,
    pub used: usize,
    pub peak: usize,
    pub requests: u64,
    pub oom: u64,
}

pub struct BlockPool {
    block_size: usize,
    storage: Vec<u8>,
    // Free list of block indices; last element is the head.
    free: Vec<usize>,
    diagnostics: PoolDiagnostics,
}

impl BlockPool {
    pub fn new(block_size: usize, capacity: usize) -> Self {
        let storage = vec![0u8; block_size * capacity];
        let free = (0..capacity).rev().collect();
        Self {
            block_size,
            storage,
            free,
            diagnostics: PoolDiagnostics {
                capacity,
                ..Default::default()
            },
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn diagnostics(&self) -> PoolDiagnostics {
        self.diagnostics
    }

    pub fn allocate(&mut self, size: usize) -> Result<BlockHandle, PoolError> {
        self.diagnostics.requests += 1;

        if size > self.block_size {
            return Err(PoolError::InvalidSize);
        }

        match self.free.pop() {
            Some(index) => {
                self.diagnostics.used += 1;
                self.diagnostics.peak = self.diagnostics.peak.max(self.diagnostics.used);
                let start = index * self.block_size;
                self.storage[start..start + self.block_size].fill(0);
                Ok(BlockHandle(index))
            }
            None => {
                self.diagnostics.oom += 1;
                Err(PoolError::OutOfMemory)
            }
        }
    }

    pub fn deallocate(&mut self, handle: BlockHandle) {
        self.diagnostics.used = self.diagnostics.used.saturating_sub(1);
        self.free.push(handle.0);
    }

    pub fn block(&self, handle: BlockHandle) -> &[u8] {
        let start = handle.0 * self.block_size;
        &self.storage[start..start + self.block_size]
    }

    pub fn block_mut(&mut self, handle: BlockHandle) -> &mut [u8] {
        let start = handle.0 * self.block_size;
        &mut self.storage[start..start + self.block_size]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_deallocate_round_trips() {
        let mut pool = BlockPool::new(64, 4);
        let h1 = pool.allocate(10).unwrap();
        let h2 = pool.allocate(64).unwrap();
        assert_eq!(pool.diagnostics().used, 2);

        pool.block_mut(h1)[0] = 0xAB;
        assert_eq!(pool.block(h1)[0], 0xAB);

        pool.deallocate(h1);
        pool.deallocate(h2);
        assert_eq!(pool.diagnostics().used, 0);
    }

    #[test]
    fn oversize_request_is_rejected() {
        let mut pool = BlockPool::new(8, 2);
        assert!(matches!(pool.allocate(9), Err(PoolError::InvalidSize)));
    }

    #[test]
    fn exhausted_pool_increments_oom_counter() {
        let mut pool = BlockPool::new(8, 1);
        let _h = pool.allocate(8).unwrap();
        assert!(matches!(pool.allocate(8), Err(PoolError::OutOfMemory)));
        assert_eq!(pool.diagnostics().oom, 1);
    }

    #[test]
    fn no_leak_after_many_alloc_dealloc_cycles() {
        let mut pool = BlockPool::new(16, 2);
        let initial_used = pool.diagnostics().used;
        for _ in 0..1000 {
            let h = pool.allocate(16).unwrap();
            pool.deallocate(h);
        }
        assert_eq!(pool.diagnostics().used, initial_used);
    }
}

//! # Buffer Pool
//!
//! Pool of scratch buffers for the transform pipeline. Each pipeline run
//! borrows two buffers and ping-pongs between them, so steady-state traffic
//! reuses the same allocations instead of growing a new `Vec` per stage.
//!
//! ## Usage
//! ```rust
//! use network_comms::utils::buffer_pool::BufferPool;
//!
//! let pool = BufferPool::new(4);
//! let mut buffer = pool.acquire();
//! buffer.extend_from_slice(b"scratch");
//! drop(buffer); // returned to the pool, cleared
//! assert_eq!(pool.available(), 4);
//! ```

use std::sync::{Arc, Mutex};

/// Buffers that grew beyond this are released instead of pooled
const MAX_POOLED_BUFFER_SIZE: usize = 256 * 1024;

/// Default buffer capacity
const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// A pooled buffer that returns itself to the pool when dropped
pub struct PooledBuffer {
    buffer: Vec<u8>,
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl PooledBuffer {
    /// Take the contents out, leaving the (empty) allocation to go back to the pool
    pub fn take(&mut self) -> Vec<u8> {
        let replacement = Vec::with_capacity(self.buffer.capacity().min(DEFAULT_BUFFER_CAPACITY));
        std::mem::replace(&mut self.buffer, replacement)
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if self.buffer.capacity() <= MAX_POOLED_BUFFER_SIZE {
            self.buffer.clear();
            if let Ok(mut pool) = self.pool.lock() {
                pool.push(std::mem::take(&mut self.buffer));
            }
        }
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

/// Thread-safe buffer pool
pub struct BufferPool {
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
    initial_capacity: usize,
}

impl BufferPool {
    /// Create a new buffer pool with specified initial pool size
    pub fn new(pool_size: usize) -> Self {
        let pool = (0..pool_size)
            .map(|_| Vec::with_capacity(DEFAULT_BUFFER_CAPACITY))
            .collect();

        Self {
            pool: Arc::new(Mutex::new(pool)),
            initial_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }

    /// Acquire a buffer from the pool (or allocate a new one if pool is empty)
    pub fn acquire(&self) -> PooledBuffer {
        let buffer = self
            .pool
            .lock()
            .ok()
            .and_then(|mut pool| pool.pop())
            .unwrap_or_else(|| Vec::with_capacity(self.initial_capacity));

        PooledBuffer {
            buffer,
            pool: self.pool.clone(),
        }
    }

    /// Get the current number of available buffers in the pool
    pub fn available(&self) -> usize {
        self.pool.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(16)
    }
}

impl Clone for BufferPool {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            initial_capacity: self.initial_capacity,
        }
    }
}

//! Thread pool handle for tile operations.
//!
//! The caller builds one [`TilePool`] and passes it to every compress or
//! decompress call; the library never creates a pool on its own.

use crate::error::{Error, Result};

/// A fixed-size rayon pool dedicated to tile work.
pub struct TilePool {
    thread_pool: rayon::ThreadPool,
}

impl TilePool {
    /// Start a pool with `threads` workers; 0 picks one per CPU.
    pub fn new(threads: usize) -> Result<TilePool> {
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("fits_tile_{i}"))
            .build()
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        log::debug!("tile pool started with {} threads", thread_pool.current_num_threads());
        Ok(TilePool { thread_pool })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.thread_pool.current_num_threads()
    }

    /// Run `op` inside the pool; parallel iterators in `op` use its workers.
    pub fn install<R, OP>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.thread_pool.install(op)
    }

    /// Provides access to the underlying rayon pool.
    pub fn thread_pool(&self) -> &rayon::ThreadPool {
        &self.thread_pool
    }
}

impl std::fmt::Debug for TilePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TilePool").field("threads", &self.threads()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn runs_work_on_its_threads() {
        let pool = TilePool::new(3).unwrap();
        assert_eq!(pool.threads(), 3);
        let names: Vec<String> = pool.install(|| {
            (0..8)
                .into_par_iter()
                .map(|_| std::thread::current().name().unwrap_or("").to_string())
                .collect()
        });
        assert!(names.iter().all(|n| n.starts_with("fits_tile_")));
    }

    #[test]
    fn zero_means_default() {
        let pool = TilePool::new(0).unwrap();
        assert!(pool.threads() >= 1);
    }
}

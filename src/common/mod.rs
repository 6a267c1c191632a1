pub mod errors;

use std::sync::LazyLock;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tokio::runtime::{Builder, Runtime};

/// Priority given to a version without a numeric grade. Higher runs sooner.
pub const NORMAL_PRIORITY: i32 = 1024;

pub const DEFAULT_FIX_TTR_SECS: u64 = 10 * 60;

pub const DEFAULT_FLUX_TTR_SECS: u64 = 60 * 60;

pub const MAX_COPY_RETRIES: u32 = 3;

pub const MAX_DELETE_ATTEMPTS: u64 = 5;

/// Hex characters in the file name part of a generated target locator.
pub const TARGET_NAME_LENGTH: usize = 8;

pub const IMPORTED_DIR: &str = "imported";

pub const VERSIONS_DIR: &str = "versions";

pub static CURRENT_NUM_THREADS: LazyLock<usize> = LazyLock::new(|| rayon::current_num_threads());

// Runtime driving queue workers and the CLI. Blocking make steps run on its blocking pool.
pub static WORKER_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(*CURRENT_NUM_THREADS)
        .thread_name("version-worker")
        .enable_all()
        .build()
        .expect("Failed to build Worker Tokio runtime")
});

// Rayon thread pool for checksum sweeps (sync / verify).
// Kept apart from the global pool so it does not compete with tokio's blocking threads.
pub static WORKER_RAYON_POOL: LazyLock<ThreadPool> = LazyLock::new(|| {
    ThreadPoolBuilder::new()
        .num_threads(*CURRENT_NUM_THREADS)
        .thread_name(|i| format!("checksum-worker-{}", i))
        .build()
        .expect("Failed to build Worker Rayon pool")
});

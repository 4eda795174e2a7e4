/// Targets packed into one context when contexts are OS threads.
pub const FILES_PER_THREAD: usize = 8;

/// Targets packed into one context when contexts are OS processes.
/// Process spin-up is costlier, so each one should get more work.
pub const FILES_PER_PROCESS: usize = 32;

/// Estimate how many execution contexts a dispatch should use.
///
/// ```text
/// c = clamp(ceil(target_count / D), 1, host_parallelism)
/// D = FILES_PER_THREAD  if isolated threads are supported
///     FILES_PER_PROCESS otherwise
/// ```
///
/// # Examples
/// ```rust
/// use batchlint::parallel::estimate;
///
/// assert_eq!(estimate(0, 8, true), 1);
/// assert_eq!(estimate(17, 8, true), 3);
/// assert_eq!(estimate(17, 8, false), 1);
/// assert_eq!(estimate(10_000, 4, true), 4);
/// ```
pub fn estimate(target_count: usize, host_parallelism: usize, isolated_threads: bool) -> usize {
    let per_context = if isolated_threads {
        FILES_PER_THREAD
    } else {
        FILES_PER_PROCESS
    };
    let host_parallelism = host_parallelism.max(1);
    target_count.div_ceil(per_context).clamp(1, host_parallelism)
}

/// Parallelism available to a dispatch on this host.
///
/// ```text
/// 1. Detect available CPU cores: num_cpus::get()
/// 2. Apply percentage: cores * thread_percentage / 100 (at least 1)
/// 3. Apply config limit: min(max_threads, result) if max_threads > 0
/// ```
pub fn host_parallelism(max_threads: usize, thread_percentage: u8) -> usize {
    scale_parallelism(num_cpus::get(), max_threads, thread_percentage)
}

fn scale_parallelism(available_cores: usize, max_threads: usize, thread_percentage: u8) -> usize {
    let by_percentage = std::cmp::max(1, (available_cores * thread_percentage as usize) / 100);

    if max_threads > 0 {
        std::cmp::min(max_threads, by_percentage)
    } else {
        by_percentage
    }
}

/// Platform capabilities relevant to choosing an execution context backing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub isolated_threads: bool,
}

impl Capabilities {
    /// Detect what the current platform supports.
    pub fn probe() -> Self {
        Self {
            isolated_threads: cfg!(not(target_family = "wasm")),
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::probe()
    }
}

//! GC configuration parameters.
//!
//! All sizes are in bytes. Spaces are reserved up front at heap creation and
//! never grow, so the sizes here bound the heap for its whole lifetime.

/// Configuration for the young-generation heap and its scavenger.
///
/// # Example
///
/// ```
/// use quill_gc::GcConfig;
///
/// let config = GcConfig {
///     semispace_size: 8 * 1024 * 1024,
///     worker_threads: 4,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct GcConfig {
    // =========================================================================
    // Young Generation
    // =========================================================================
    /// Size of each semispace in bytes.
    ///
    /// Total young memory is 2x this value (from-space + to-space).
    ///
    /// Default: 4MB
    pub semispace_size: usize,

    /// Size of a worker's local allocation buffer in to-space.
    ///
    /// Objects larger than half a LAB are allocated directly in to-space.
    ///
    /// Default: 32KB
    pub lab_size: usize,

    /// Promote objects that already survived one scavenge.
    ///
    /// When set, anything below the previous cycle's age mark goes straight
    /// to old space. When clear, survivors are copied between semispaces
    /// until to-space fills up.
    ///
    /// Default: true
    pub promote_survivors: bool,

    // =========================================================================
    // Old Generation
    // =========================================================================
    /// Total size of the old generation in bytes.
    ///
    /// Default: 32MB
    pub old_space_size: usize,

    /// Size of an old-generation page.
    ///
    /// Pages are the unit of bump allocation in old space. The largest
    /// object that can be promoted is one page minus filler overhead.
    ///
    /// Default: 256KB
    pub page_size: usize,

    // =========================================================================
    // Parallelism
    // =========================================================================
    /// Number of scavenger worker threads.
    ///
    /// Default: Number of CPUs, capped at 8
    pub worker_threads: usize,

    // =========================================================================
    // Debugging
    // =========================================================================
    /// Log a summary of every scavenge at `info` level instead of `debug`.
    ///
    /// Default: false
    pub trace: bool,

    /// Verify heap integrity after each scavenge.
    ///
    /// Default: false (enabled in debug builds)
    pub verify_heap: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            semispace_size: 4 * 1024 * 1024, // 4MB
            lab_size: 32 * 1024,             // 32KB
            promote_survivors: true,

            old_space_size: 32 * 1024 * 1024, // 32MB
            page_size: 256 * 1024,            // 256KB

            worker_threads: num_cpus().min(8),

            trace: false,
            verify_heap: cfg!(debug_assertions),
        }
    }
}

impl GcConfig {
    /// Create a configuration optimized for low memory usage.
    pub fn low_memory() -> Self {
        Self {
            semispace_size: 512 * 1024,       // 512KB
            lab_size: 8 * 1024,               // 8KB
            old_space_size: 4 * 1024 * 1024,  // 4MB
            page_size: 64 * 1024,             // 64KB
            worker_threads: 1,
            ..Default::default()
        }
    }

    /// Create a configuration optimized for high throughput.
    pub fn high_throughput() -> Self {
        Self {
            semispace_size: 16 * 1024 * 1024,  // 16MB
            lab_size: 64 * 1024,               // 64KB
            old_space_size: 128 * 1024 * 1024, // 128MB
            page_size: 1024 * 1024,            // 1MB
            ..Default::default()
        }
    }

    /// Small, single-threaded, verifying configuration for tests.
    pub fn for_testing() -> Self {
        Self {
            semispace_size: 64 * 1024, // 64KB
            lab_size: 1024,            // 1KB
            promote_survivors: true,
            old_space_size: 256 * 1024, // 256KB
            page_size: 16 * 1024,       // 16KB
            worker_threads: 1,
            trace: false,
            verify_heap: true,
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.semispace_size < 16 * 1024 || self.semispace_size % 1024 != 0 {
            return Err(ConfigError::SemispaceTooSmall);
        }
        if self.page_size < 4096 || !self.page_size.is_power_of_two() {
            return Err(ConfigError::InvalidPageSize);
        }
        if self.old_space_size < self.page_size || self.old_space_size % self.page_size != 0 {
            return Err(ConfigError::InvalidOldSpaceSize);
        }
        if self.lab_size < 256 || self.lab_size % 8 != 0 || self.lab_size > self.semispace_size {
            return Err(ConfigError::InvalidLabSize);
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Semispace size is too small (minimum 16KB, multiple of 1KB).
    SemispaceTooSmall,
    /// Page size must be a power of two, minimum 4KB.
    InvalidPageSize,
    /// Old space must be a whole number of pages.
    InvalidOldSpaceSize,
    /// LAB size must be word aligned, at least 256 bytes, and fit a semispace.
    InvalidLabSize,
    /// At least one worker thread is required.
    NoWorkers,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::SemispaceTooSmall => {
                write!(f, "semispace size must be at least 16KB and a multiple of 1KB")
            }
            ConfigError::InvalidPageSize => {
                write!(f, "page size must be a power of two, minimum 4KB")
            }
            ConfigError::InvalidOldSpaceSize => {
                write!(f, "old space size must be a non-zero multiple of the page size")
            }
            ConfigError::InvalidLabSize => write!(
                f,
                "LAB size must be word aligned, at least 256 bytes, and fit a semispace"
            ),
            ConfigError::NoWorkers => write!(f, "at least one worker thread is required"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Get the number of available CPUs.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

//! Pass configuration types.
//!
//! Provides typed configuration for both passes with bon builders.
//! Supports both explicit configuration and environment variable fallbacks.

use bon::bon;
use smallvec::SmallVec;

/// Default herd extent per grid dimension.
pub const DEFAULT_HERD_DIM: i64 = 2;

/// Default L1 budget in bytes.
pub const DEFAULT_L1_SIZE: u32 = 32 * 1024;

// ============================================================================
// LOWERING
// ============================================================================

/// Configuration for the AIR lowering pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoweringOptions {
    /// Lower DMA operations to CPU-emulation library calls instead of
    /// hardware runtime operations.
    pub lower_to_cpu: bool,
}

#[bon]
impl LoweringOptions {
    /// Create lowering options with builder pattern.
    #[builder]
    pub fn builder(#[builder(default = false)] lower_to_cpu: bool) -> Self {
        Self { lower_to_cpu }
    }

    /// Create options from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `AIR_LOWER_TO_CPU` - Target the CPU-emulation library if set
    pub fn from_env() -> Self {
        Self { lower_to_cpu: std::env::var("AIR_LOWER_TO_CPU").is_ok() }
    }
}

// ============================================================================
// CODEGEN
// ============================================================================

/// Configuration for the tiling codegen pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenOptions {
    /// Run only the sub-view cleanup patterns, skipping the per-class
    /// pipelines. Used to exercise patterns in isolation.
    pub test_patterns: bool,
    /// Herd extent overrides; index `i` overrides grid dimension `i`.
    pub herd_size: SmallVec<[i64; 3]>,
    /// L1 budget in bytes. Informational: logged at pass start, tile shapes
    /// are currently fixed per operation class.
    pub l1_cache_size: u32,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            test_patterns: false,
            herd_size: SmallVec::new(),
            l1_cache_size: DEFAULT_L1_SIZE,
        }
    }
}

#[bon]
impl CodegenOptions {
    /// Create codegen options with builder pattern.
    #[builder]
    pub fn builder(
        #[builder(default = false)] test_patterns: bool,
        #[builder(default)] herd_size: Vec<i64>,
        #[builder(default = DEFAULT_L1_SIZE)] l1_cache_size: u32,
    ) -> Self {
        Self { test_patterns, herd_size: herd_size.into_iter().collect(), l1_cache_size }
    }

    /// Create options from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `AIR_TEST_PATTERNS` - Run only the cleanup patterns if set
    /// * `AIR_HERD_SIZE` - Comma-separated herd extents, e.g. `4,4`
    /// * `AIR_L1_SIZE` - L1 budget in bytes (default: 32768)
    pub fn from_env() -> Self {
        let test_patterns = std::env::var("AIR_TEST_PATTERNS").is_ok();
        let herd_size = std::env::var("AIR_HERD_SIZE")
            .ok()
            .map(|s| s.split(',').filter_map(|d| d.trim().parse().ok()).collect())
            .unwrap_or_default();
        let l1_cache_size = std::env::var("AIR_L1_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_L1_SIZE);

        Self { test_patterns, herd_size, l1_cache_size }
    }

    /// Effective herd extents: the defaults with any present override
    /// applied per index.
    pub fn herd_dims(&self) -> [i64; 3] {
        let mut dims = [DEFAULT_HERD_DIM; 3];
        for (slot, &d) in dims.iter_mut().zip(self.herd_size.iter()) {
            *slot = d;
        }
        dims
    }
}

// ============================================================================
// TESTS
// ============================================================================

//! Engine-wide tunables, constructed via a builder the way `fuel_vm`
//! constructs its `InterpreterParams`.

use lanevm_vmm::{VmmConfig, DEFAULT_COMMITTED_SIZE};

/// Initial size, in bytes, of the row splitter's copy-on-scan window
/// (spec §4.2).
pub const DEFAULT_SCRATCH_GRANULE: u32 = 32 * 1024;

/// Number of t-digest centroids kept per buffer (spec §6's sizing table:
/// `16 + 13*64`).
pub const TDIGEST_CENTROIDS: usize = 64;

/// Default HyperLogLog precision (bucket count `2^precision`) used by
/// `APPROX_COUNT_DISTINCT` when the query doesn't specify one.
pub const DEFAULT_HLL_PRECISION: u8 = 12;

/// Default cap on the number of distinct field paths the data-shape sink
/// will track before it starts dropping new ones.
pub const DEFAULT_DATASHAPE_FIELD_CAP: usize = 4096;

/// Tunables threaded through the VMM, row splitter, and aggregation
/// engines. Construct with [`EngineConfig::builder`].
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Size of the VMM's committed read/write window.
    pub vmm_committed_size: u32,
    /// Whether debug guard pages are enabled in the VMM.
    pub debug_guard_pages: bool,
    /// Initial size of the row splitter's copy-on-scan window.
    pub scratch_granule: u32,
    /// Default HLL precision for `APPROX_COUNT_DISTINCT` without an
    /// explicit precision argument.
    pub hll_precision: u8,
    /// Maximum number of distinct field paths the data-shape sink tracks.
    pub datashape_field_cap: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vmm_committed_size: DEFAULT_COMMITTED_SIZE,
            debug_guard_pages: cfg!(debug_assertions),
            scratch_granule: DEFAULT_SCRATCH_GRANULE,
            hll_precision: DEFAULT_HLL_PRECISION,
            datashape_field_cap: DEFAULT_DATASHAPE_FIELD_CAP,
        }
    }
}

impl EngineConfig {
    /// Start building a config from the defaults.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder(Self::default())
    }

    /// The VMM configuration this engine config implies.
    pub fn vmm_config(&self) -> VmmConfig {
        VmmConfig {
            committed_size: self.vmm_committed_size,
            debug_guards: self.debug_guard_pages,
        }
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone, Copy)]
pub struct EngineConfigBuilder(EngineConfig);

impl EngineConfigBuilder {
    /// Override the VMM committed window size.
    #[must_use]
    pub fn vmm_committed_size(mut self, bytes: u32) -> Self {
        self.0.vmm_committed_size = bytes;
        self
    }

    /// Override whether debug guard pages are enabled.
    #[must_use]
    pub fn debug_guard_pages(mut self, enabled: bool) -> Self {
        self.0.debug_guard_pages = enabled;
        self
    }

    /// Override the row splitter's initial scratch granule.
    #[must_use]
    pub fn scratch_granule(mut self, bytes: u32) -> Self {
        self.0.scratch_granule = bytes;
        self
    }

    /// Override the default HLL precision.
    #[must_use]
    pub fn hll_precision(mut self, precision: u8) -> Self {
        self.0.hll_precision = precision;
        self
    }

    /// Override the data-shape sink's field cap.
    #[must_use]
    pub fn datashape_field_cap(mut self, cap: usize) -> Self {
        self.0.datashape_field_cap = cap;
        self
    }

    /// Finish building.
    pub fn build(self) -> EngineConfig {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_only_requested_fields() {
        let cfg = EngineConfig::builder().hll_precision(8).build();
        assert_eq!(cfg.hll_precision, 8);
        assert_eq!(cfg.scratch_granule, DEFAULT_SCRATCH_GRANULE);
    }
}

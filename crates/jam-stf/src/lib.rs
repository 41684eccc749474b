//! Per-block state-transition functions.
//!
//! Every STF is a pure function `(pre_state, input) -> Result<(post_state,
//! output), Error>`: it never mutates its input state, and a fatal error means
//! the caller discards the candidate post-state entirely. External effects
//! (ring-VRF verification, PVM execution) are reached only through injected
//! traits so the transitions stay deterministic under test.
//!
//! The [`pipeline`] module chains the STFs in the fixed per-block order:
//! safrole, disputes, statistics, guarantees (with accumulation), assurances,
//! preimages, history, then the state-root commitment.

pub mod accumulate;
pub mod assurances;
pub mod disputes;
pub mod guarantees;
pub mod history;
pub mod pipeline;
pub mod preimages;
pub mod safrole;
pub mod statistics;

#[cfg(test)]
pub(crate) mod test_support;

pub use accumulate::{AccumulateItem, NoopPvm, PvmError, PvmOracle};
pub use pipeline::{process_block, BlockOutcome, PipelineError};

/// Protocol constants for the guarantees path.
pub mod constants {
    use jam_types::{Gas, TimeSlot};

    /// Maximum age, in slots, of a report's anchor block.
    pub const ANCHOR_MAX_AGE_SLOTS: TimeSlot = 24;

    /// Pending reports older than this are timed out; also bounds how old a
    /// report's own slot may be.
    pub const REPORT_TIMEOUT_SLOTS: TimeSlot = 5;

    /// Maximum prerequisite + segment-lookup dependencies per report.
    pub const MAX_DEPENDENCIES: usize = 8;

    /// Gas ceiling for one work-report.
    pub const MAX_WORK_REPORT_GAS: Gas = 10_000_000;

    /// Per-item accumulate-gas floor.
    pub const MIN_SERVICE_ITEM_GAS: Gas = 10;
}

//! Error taxonomy for the DRR core.

use thiserror::Error;

/// The three error kinds the core can report. A ray that misses the volume,
/// or one with `p1 == p2`, is *not* an error — it is an empty result.
#[derive(Debug, Error)]
pub enum Error {
    /// Non-positive spacing/energy/sdd/sid, a `cosines` slice whose length
    /// isn't 6, or a HU/length vector-length mismatch.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An index outside `[0, nx) x [0, ny) x [0, nz)` (or the flat
    /// equivalent `[0, nx*ny*nz)`).
    #[error("index ({i}, {j}, {k}) out of range for shape ({nx}, {ny}, {nz})")]
    OutOfRange {
        i: i64,
        j: i64,
        k: i64,
        nx: usize,
        ny: usize,
        nz: usize,
    },

    /// The Siddon step dispatch fell through: `alpha_min` matched none of
    /// `alpha_x`/`alpha_y`/`alpha_z`. This means the implementation has a
    /// bug, not that the caller supplied bad input.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

pub type Result<T> = std::result::Result<T, Error>;

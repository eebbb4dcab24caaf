//! MeshHaloError: unified error type for mesh-halo public APIs.
//!
//! Fallible operations return `Result<_, MeshHaloError>` instead of panicking.
//! Protocol violations in the exchange engine (size mismatches, foreign
//! handles) are reported as errors because continuing would corrupt
//! guard-cell data silently across the whole distributed computation.

use thiserror::Error;

use crate::field::CellLoc;

/// Unified error type for mesh-halo operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeshHaloError {
    /// Invalid geometry or option detected while constructing a mesh.
    #[error("invalid mesh configuration: {0}")]
    InvalidConfig(String),

    /// The processor grid does not divide the global grid evenly.
    #[error("cannot split {npoints} global points in {dir} over {npes} processors")]
    BadDecomposition {
        dir: &'static str,
        npoints: usize,
        npes: usize,
    },

    /// Guard width too small for the requested stencil.
    #[error("stencil of half-width {required} exceeds guard width {available} in {dir}")]
    StencilExceedsGuards {
        dir: &'static str,
        required: usize,
        available: usize,
    },

    /// Metric tensor is not positive definite at one grid point.
    #[error("metric tensor not positive definite at ({x},{y}): det = {det}")]
    SingularMetric { x: usize, y: usize, det: f64 },

    /// Supplied covariant and contravariant metric components disagree:
    /// `g^{ik} g_{kj}` deviates from the identity at one grid point.
    #[error("metric components inconsistent at ({x},{y}): residual = {residual}")]
    InconsistentMetric { x: usize, y: usize, residual: f64 },

    /// A communication handle was passed to a mesh that did not create it.
    #[error("communication handle from mesh {handle_mesh} waited on mesh {this_mesh}")]
    ForeignHandle { handle_mesh: u64, this_mesh: u64 },

    /// A received message did not have the negotiated length.
    #[error("message from rank {peer} has {got} bytes, expected {expected}")]
    MessageSizeMismatch {
        peer: usize,
        expected: usize,
        got: usize,
    },

    /// A receive completed without producing any data.
    #[error("receive from rank {peer} (tag {tag}) produced no data")]
    RecvFailed { peer: usize, tag: u16 },

    /// A field in a group does not match the mesh dimensions.
    #[error("field {index} in group has shape {got:?}, mesh local shape is {expected:?}")]
    FieldShapeMismatch {
        index: usize,
        expected: (usize, usize, usize),
        got: (usize, usize, usize),
    },

    /// Requested a staggered operation on a mesh without staggered grids.
    #[error("staggered output location {0:?} requested but staggered grids are disabled")]
    StaggerDisabled(CellLoc),

    /// A location shift with no stencil variant (e.g. staggered second derivative).
    #[error("no stencil variant for differentiating {from:?} onto {to:?}")]
    UnsupportedStagger { from: CellLoc, to: CellLoc },

    /// A named variable was requested from a source that cannot provide it
    /// and no default was supplied.
    #[error("grid source has no variable `{0}` and no default was given")]
    MissingVariable(String),

    /// Two fields in a binary operation have different cell locations.
    #[error("cell location mismatch: {0:?} vs {1:?}")]
    LocationMismatch(CellLoc, CellLoc),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MeshHaloError>;

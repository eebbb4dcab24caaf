//! Construction-time configuration for a mesh.
//!
//! Options are read exactly once when a [`crate::mesh::Mesh`] is built;
//! nothing in this module is consulted again at runtime. This mirrors the
//! policy that the decomposition, the derivative defaults and the parallel
//! transform strategy are fixed for the lifetime of a mesh.

use serde::{Deserialize, Serialize};

use crate::deriv::{FirstMethod, FluxMethod, SecondMethod, UpwindMethod};

/// Which parallel-transform strategy the mesh should install.
///
/// The choice is made here, at configuration time, and cannot change for
/// the lifetime of the mesh instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransformKind {
    /// Stored representation is already field aligned; transforms are no-ops.
    #[default]
    Identity,
    /// Shifted-metric: fields are shifted in Z by a per-(x,y) angle before
    /// parallel derivatives are taken.
    ShiftedMetric,
}

/// Default numerical methods, one per derivative family and direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DerivDefaults {
    pub first_x: FirstMethod,
    pub first_y: FirstMethod,
    pub first_z: FirstMethod,
    pub second_x: SecondMethod,
    pub second_y: SecondMethod,
    pub second_z: SecondMethod,
    pub upwind: UpwindMethod,
    pub flux: FluxMethod,
}

impl Default for DerivDefaults {
    fn default() -> Self {
        Self {
            first_x: FirstMethod::C2,
            first_y: FirstMethod::C2,
            first_z: FirstMethod::C2,
            second_x: SecondMethod::C2,
            second_y: SecondMethod::C2,
            second_z: SecondMethod::C2,
            upwind: UpwindMethod::U1,
            flux: FluxMethod::Split,
        }
    }
}

/// All options consumed at mesh construction.
///
/// `nx`, `ny`, `nz` are *global interior* sizes; the local arrays add
/// `mxg`/`myg` guard cells on each side. Z is always periodic and carries
/// no guard cells, matching the usual spectral/periodic treatment of the
/// toroidal direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshOptions {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    /// Guard cells on each X edge.
    pub mxg: usize,
    /// Guard cells on each Y edge.
    pub myg: usize,
    /// Number of processors in X.
    pub nxpe: usize,
    /// Number of processors in Y.
    pub nype: usize,
    /// Domain periodic in X?
    pub periodic_x: bool,
    /// Whole domain periodic in Y (all X indices, no twist shift)?
    pub periodic_y: bool,
    /// Enable staggered cell locations. When false every field is
    /// cell-centred and staggered output locations are rejected.
    pub stagger_grids: bool,
    /// Include the shift-torsion correction in Curl (set when X derivatives
    /// are taken in shifted coordinates).
    pub shift_x_derivs: bool,
    pub transform: TransformKind,
    pub derivs: DerivDefaults,
}

impl Default for MeshOptions {
    fn default() -> Self {
        Self {
            nx: 4,
            ny: 4,
            nz: 1,
            mxg: 2,
            myg: 2,
            nxpe: 1,
            nype: 1,
            periodic_x: false,
            periodic_y: false,
            stagger_grids: false,
            shift_x_derivs: false,
            transform: TransformKind::default(),
            derivs: DerivDefaults::default(),
        }
    }
}

impl MeshOptions {
    /// Single-processor options for a given interior size.
    pub fn serial(nx: usize, ny: usize, nz: usize) -> Self {
        Self {
            nx,
            ny,
            nz,
            ..Self::default()
        }
    }
}

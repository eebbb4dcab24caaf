//! # mesh-halo
//!
//! Structured-mesh domain decomposition for parallel PDE solvers:
//! topology descriptors, non-blocking guard-cell ("halo") exchange,
//! boundary-region enumeration, curvilinear coordinates with connection
//! coefficients, finite-difference operators and basis-aware vector
//! calculus.
//!
//! The crate is organised around one type, [`mesh::Mesh`]: it owns the
//! [`topology::Topology`] describing this process's subdomain, a
//! [`comm::Communicator`] for its neighbours, lazily-built
//! [`coords::Coordinates`], and the parallel transform used for
//! derivatives along the magnetic field. Fields ([`field::Field3D`],
//! [`field::Field2D`], [`field::FieldPerp`]) are plain data; every
//! operation that needs mesh context takes it explicitly.
//!
//! ## Exchange model
//!
//! Guard-cell exchange is split-phase: [`mesh::Mesh::send`] posts all
//! receives, packs and posts all sends, and returns a handle;
//! [`mesh::Mesh::wait`] completes the receives and unpacks into the guard
//! regions. The handle borrows the fields mutably for the duration, so
//! reading or re-communicating a field with an exchange in flight is a
//! compile error, and waiting twice is unrepresentable.
//!
//! ```
//! use mesh_halo::prelude::*;
//!
//! let mut opts = MeshOptions::serial(8, 8, 4);
//! opts.periodic_x = true;
//! let mesh = Mesh::serial(opts, Box::new(OptionsSource::new()))?;
//!
//! let mut f = Field3D::from_fn(mesh.topology(), |x, y, z| (x + y + z) as f64);
//! mesh.communicate(FieldGroup::new().add3d(&mut f))?;
//!
//! let coords = mesh.coordinates()?;
//! let ctx = mesh.diff_context(&coords);
//! let dfdx = ctx.ddx(&f, CellLoc::Centre, None)?;
//! # let _ = dfdx;
//! # Ok::<(), mesh_halo::error::MeshHaloError>(())
//! ```

pub mod comm;
pub mod coords;
pub mod deriv;
pub mod error;
pub mod field;
pub mod mesh;
pub mod options;
pub mod source;
pub mod topology;
pub mod vecops;

/// The common imports, for glob use.
pub mod prelude {
    pub use crate::comm::{Communicator, LocalComm, NoComm};
    pub use crate::coords::{Coordinates, ParallelTransform};
    pub use crate::deriv::{DiffContext, FirstMethod, FluxMethod, SecondMethod, UpwindMethod};
    pub use crate::error::{MeshHaloError, Result};
    pub use crate::field::{
        CellLoc, Field2D, Field3D, FieldGroup, FieldPerp, Vector2D, Vector3D,
    };
    pub use crate::mesh::Mesh;
    pub use crate::options::{DerivDefaults, MeshOptions, TransformKind};
    pub use crate::source::{GridDataSource, OptionsSource};
    pub use crate::topology::Topology;
    pub use crate::vecops::{curl, div, div_flux, grad, grad_perp, v_dot_grad, v_dot_grad_vec};
}

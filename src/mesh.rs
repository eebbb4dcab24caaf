//! Mesh: the owning facade that ties the pieces together.
//!
//! A [`Mesh`] owns a [`Topology`], a communicator, a grid source, the
//! lazily-built [`Coordinates`] and the parallel transform, and stamps
//! every communication handle with its own identity so a handle cannot be
//! completed by a different mesh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::info;

use crate::comm::exchange::{self, CommHandle};
use crate::comm::{Communicator, NoComm};
use crate::coords::{Coordinates, IdentityTransform, ParallelTransform, ShiftedTransform};
use crate::deriv::DiffContext;
use crate::error::{MeshHaloError, Result};
use crate::field::{CellLoc, Field2D, Field3D, FieldGroup, FieldPerp};
use crate::options::{MeshOptions, TransformKind};
use crate::source::{field2d_or, field3d_or, GridDataSource, LoadOutcome};
use crate::topology::Topology;

/// Monotone id generator; ids are process-unique, never reused.
static NEXT_MESH_ID: AtomicU64 = AtomicU64::new(1);

/// A structured mesh on one process of a decomposed domain.
pub struct Mesh<C: Communicator = NoComm> {
    id: u64,
    topo: Topology,
    comm: C,
    source: Box<dyn GridDataSource>,
    options: MeshOptions,
    /// Coordinate systems by cell location, built on first use.
    coords: DashMap<CellLoc, Arc<Coordinates>>,
    transform: Box<dyn ParallelTransform>,
}

impl Mesh<NoComm> {
    /// Single-process mesh; decomposition must be 1x1.
    pub fn serial(options: MeshOptions, source: Box<dyn GridDataSource>) -> Result<Self> {
        Self::new(options, source, NoComm)
    }
}

impl<C: Communicator> Mesh<C> {
    /// Build the mesh for this process of the communicator's group.
    ///
    /// # Errors
    /// Fails when the communicator size does not match the requested
    /// processor grid, when the decomposition does not divide the global
    /// grid, or when the transform's shift angles cannot be loaded.
    pub fn new(options: MeshOptions, source: Box<dyn GridDataSource>, comm: C) -> Result<Self> {
        if options.nxpe * options.nype != comm.size() {
            return Err(MeshHaloError::InvalidConfig(format!(
                "processor grid {}x{} needs {} processes, communicator has {}",
                options.nxpe,
                options.nype,
                options.nxpe * options.nype,
                comm.size()
            )));
        }
        let topo = Topology::new(&options, comm.rank())?;
        topo.debug_assert_invariants();

        let transform: Box<dyn ParallelTransform> = match options.transform {
            TransformKind::Identity => Box::new(IdentityTransform),
            TransformKind::ShiftedMetric => {
                let (zshift, outcome) = field2d_or(source.as_ref(), "zShift", &topo, 0.0);
                if outcome == LoadOutcome::Defaulted {
                    info!("shifted-metric transform with no zShift in source; shifts are zero");
                }
                let dz = source
                    .get_scalar("dz")
                    .unwrap_or(std::f64::consts::TAU / topo.local_nz as f64);
                Box::new(ShiftedTransform::new(&topo, zshift, dz))
            }
        };

        let id = NEXT_MESH_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            "mesh {id}: rank {}/{} local {:?}",
            comm.rank(),
            comm.size(),
            topo.shape()
        );
        Ok(Self {
            id,
            topo,
            comm,
            source,
            options,
            coords: DashMap::new(),
            transform,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topology(&self) -> &Topology {
        &self.topo
    }

    pub fn communicator(&self) -> &C {
        &self.comm
    }

    pub fn options(&self) -> &MeshOptions {
        &self.options
    }

    // -- guard-cell exchange --

    /// Begin a non-blocking exchange over `group`.
    pub fn send<'a>(&self, group: FieldGroup<'a>) -> Result<CommHandle<'a, C>> {
        exchange::send(&self.topo, &self.comm, self.id, group)
    }

    /// Complete an exchange begun with [`send`](Self::send).
    ///
    /// # Errors
    /// Rejects handles created by a different mesh.
    pub fn wait<'a>(&self, handle: CommHandle<'a, C>) -> Result<FieldGroup<'a>> {
        exchange::wait(&self.topo, self.id, handle)
    }

    /// Blocking exchange: send then wait.
    pub fn communicate<'a>(&self, group: FieldGroup<'a>) -> Result<FieldGroup<'a>> {
        exchange::communicate(&self.topo, &self.comm, self.id, group)
    }

    /// Blocking exchange of the X guards only.
    pub fn communicate_xz<'a>(&self, group: FieldGroup<'a>) -> Result<FieldGroup<'a>> {
        self.communicate(group.xz_only())
    }

    /// Exchange the X guards of a single perpendicular slice.
    pub fn communicate_perp(&self, f: &mut FieldPerp) -> Result<()> {
        exchange::communicate_perp(&self.topo, &self.comm, f)
    }

    // -- coordinates --

    /// The cell-centred coordinate system, built on first call.
    pub fn coordinates(&self) -> Result<Arc<Coordinates>> {
        self.coordinates_at(CellLoc::Centre)
    }

    /// Coordinate system at a staggered location.
    ///
    /// # Errors
    /// Staggered locations are rejected unless `stagger_grids` is set.
    pub fn coordinates_at(&self, loc: CellLoc) -> Result<Arc<Coordinates>> {
        if loc != CellLoc::Centre && !self.options.stagger_grids {
            return Err(MeshHaloError::StaggerDisabled(loc));
        }
        if let Some(c) = self.coords.get(&loc) {
            return Ok(Arc::clone(&c));
        }
        let built = Arc::new(Coordinates::from_source(&self.topo, self.source.as_ref(), loc)?);
        let entry = self.coords.entry(loc).or_insert(built);
        Ok(Arc::clone(entry.value()))
    }

    /// Assemble the borrow bundle the derivative and vector operators use.
    pub fn diff_context<'a>(&'a self, coords: &'a Coordinates) -> DiffContext<'a> {
        DiffContext {
            topo: &self.topo,
            coords,
            transform: self.transform.as_ref(),
            defaults: self.options.derivs,
            stagger_grids: self.options.stagger_grids,
            shift_x_derivs: self.options.shift_x_derivs,
        }
    }

    // -- parallel transform --

    pub fn to_field_aligned(&self, f: &Field3D) -> Result<Field3D> {
        self.transform.to_field_aligned(f)
    }

    pub fn from_field_aligned(&self, f: &Field3D) -> Result<Field3D> {
        self.transform.from_field_aligned(f)
    }

    // -- named variables --

    /// Load a named 2D field, defaulting where the source lacks it, and
    /// bring its guard cells up to date.
    pub fn load_field2d(&self, name: &str, default: f64) -> Result<(Field2D, LoadOutcome)> {
        let (mut f, outcome) = field2d_or(self.source.as_ref(), name, &self.topo, default);
        self.communicate(FieldGroup::new().add2d(&mut f))?;
        Ok((f, outcome))
    }

    /// 3D counterpart of [`load_field2d`](Self::load_field2d).
    pub fn load_field3d(&self, name: &str, default: f64) -> Result<(Field3D, LoadOutcome)> {
        let (mut f, outcome) = field3d_or(self.source.as_ref(), name, &self.topo, default);
        self.communicate(FieldGroup::new().add3d(&mut f))?;
        Ok((f, outcome))
    }

    pub fn get_scalar(&self, name: &str) -> Option<f64> {
        self.source.get_scalar(name)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.source.get_int(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::OptionsSource;

    fn serial_mesh(opts: MeshOptions) -> Mesh {
        Mesh::serial(opts, Box::new(OptionsSource::new())).unwrap()
    }

    #[test]
    fn ids_are_unique() {
        let a = serial_mesh(MeshOptions::serial(4, 4, 2));
        let b = serial_mesh(MeshOptions::serial(4, 4, 2));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn coordinates_built_once() {
        let m = serial_mesh(MeshOptions::serial(4, 4, 2));
        let a = m.coordinates().unwrap();
        let b = m.coordinates().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn staggered_coordinates_gated_by_option() {
        let m = serial_mesh(MeshOptions::serial(4, 4, 2));
        let err = m.coordinates_at(CellLoc::XLow).unwrap_err();
        assert!(matches!(err, MeshHaloError::StaggerDisabled(CellLoc::XLow)));

        let mut opts = MeshOptions::serial(4, 4, 2);
        opts.stagger_grids = true;
        let m = serial_mesh(opts);
        let c = m.coordinates_at(CellLoc::XLow).unwrap();
        assert_eq!(c.location, CellLoc::XLow);
    }

    #[test]
    fn wrong_communicator_size_rejected() {
        let mut opts = MeshOptions::serial(4, 4, 2);
        opts.nxpe = 2; // NoComm has size 1
        let err = match Mesh::serial(opts, Box::new(OptionsSource::new())) {
            Ok(_) => panic!("oversized processor grid accepted"),
            Err(e) => e,
        };
        assert!(matches!(err, MeshHaloError::InvalidConfig(_)));
    }

    #[test]
    fn serial_periodic_x_wraps_through_local_copy() {
        let mut opts = MeshOptions::serial(8, 4, 1);
        opts.periodic_x = true;
        let m = serial_mesh(opts);
        let topo = m.topology();
        let mut f = Field3D::from_fn(topo, |x, y, _| (10 * x + y) as f64);
        // poison the guards so the exchange has to overwrite them
        for x in 0..topo.xstart {
            for y in 0..topo.local_ny {
                f.set(x, y, 0, -1.0);
                f.set(topo.xend + 1 + x, y, 0, -1.0);
            }
        }
        m.communicate(FieldGroup::new().add3d(&mut f)).unwrap();
        let y = topo.ystart;
        // left guard mirrors the rightmost interior columns
        for g in 0..topo.mxg {
            let src = topo.xend + 1 - topo.mxg + g;
            assert_eq!(f.get(g, y, 0), (10 * src + y) as f64);
        }
        // right guard mirrors the leftmost interior columns
        for g in 0..topo.mxg {
            let src = topo.xstart + g;
            assert_eq!(f.get(topo.xend + 1 + g, y, 0), (10 * src + y) as f64);
        }
    }

    #[test]
    fn load_field2d_defaults_and_reports() {
        let mut src = OptionsSource::new();
        src.set_uniform2d("Rxy", 7.0);
        let m = Mesh::serial(MeshOptions::serial(4, 4, 1), Box::new(src)).unwrap();
        let (f, outcome) = m.load_field2d("Rxy", 0.0).unwrap();
        assert_eq!(outcome, LoadOutcome::FromSource);
        assert!(f.values().all(|v| v == 7.0));
        let (_, outcome) = m.load_field2d("not-there", 1.5).unwrap();
        assert_eq!(outcome, LoadOutcome::Defaulted);
    }

    #[test]
    fn foreign_handle_rejected_between_meshes() {
        let mut opts = MeshOptions::serial(8, 4, 1);
        opts.periodic_x = true;
        let a = serial_mesh(opts.clone());
        let b = serial_mesh(opts);
        let topo = a.topology().clone();
        let mut f = Field3D::zeros(&topo);
        let h = a.send(FieldGroup::new().add3d(&mut f)).unwrap();
        let err = b.wait(h).unwrap_err();
        assert!(matches!(err, MeshHaloError::ForeignHandle { .. }));
    }
}

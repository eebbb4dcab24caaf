//! Per-process topology descriptor for a logically-rectangular 3D grid.
//!
//! A [`Topology`] records how the global grid is split over a
//! `nxpe` × `nype` processor grid, where the local interior sits inside the
//! guard-cell-padded local arrays, and which ranks the Y edges connect to.
//! The upper and lower Y edges may each be *split* at an X index into two
//! differently-routed destination ranges (two divertor legs); cells below
//! the split route to the "in" destination, cells at or above it to the
//! "out" destination.
//!
//! # Invariants
//!
//! - The interior index range is strictly inside the local array bounds by
//!   exactly the guard width in each direction.
//! - `yup_xsplit`/`ydown_xsplit` never exceed `local_nx`, so the two
//!   destination ranges partition `0..local_nx` with no overlap.
//! - The per-X periodicity and twist-shift tables always have `local_nx`
//!   entries.
//!
//! These are checked after construction and mutation in debug builds and
//! when the `check-invariants` feature is enabled.

pub mod boundary;

use serde::{Deserialize, Serialize};

use crate::error::{MeshHaloError, Result};
use crate::options::MeshOptions;

/// Geometry of one process's subdomain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    /// Global interior sizes.
    pub global_nx: usize,
    pub global_ny: usize,
    pub global_nz: usize,
    /// Local sizes including guard cells.
    pub local_nx: usize,
    pub local_ny: usize,
    pub local_nz: usize,
    /// Guard widths.
    pub mxg: usize,
    pub myg: usize,
    /// Interior bounds, inclusive.
    pub xstart: usize,
    pub xend: usize,
    pub ystart: usize,
    pub yend: usize,
    /// Processor grid.
    pub nxpe: usize,
    pub nype: usize,
    pub pe_xind: usize,
    pub pe_yind: usize,
    /// Offset of the local interior origin in the global index space.
    pub offset_x: usize,
    pub offset_y: usize,
    pub periodic_x: bool,
    /// Upper-Y split: local X indices `< yup_xsplit` route to
    /// `yup_indest`, the rest to `yup_outdest`.
    pub yup_xsplit: usize,
    pub ydown_xsplit: usize,
    /// Destination ranks; `None` marks a physical boundary.
    pub yup_indest: Option<usize>,
    pub yup_outdest: Option<usize>,
    pub ydown_indest: Option<usize>,
    pub ydown_outdest: Option<usize>,
    /// Per-local-X: is this flux surface periodic in Y?
    y_periodic: Vec<bool>,
    /// Per-local-X twist-shift angle applied on the Y branch cut.
    ts_angle: Vec<f64>,
}

impl Topology {
    /// Build the descriptor for `rank` of an `opts.nxpe * opts.nype` grid.
    ///
    /// The default Y connection is the simple stacked layout: each process
    /// talks to the processes directly above and below in the processor
    /// grid, with no split (everything routes to the "in" destination).
    /// Divertor-like topologies install splits afterwards with
    /// [`set_yup_split`](Self::set_yup_split) /
    /// [`set_ydown_split`](Self::set_ydown_split).
    ///
    /// # Errors
    /// Fails when the processor grid does not divide the global grid, or
    /// when a subdomain would be thinner than its guard cells.
    pub fn new(opts: &MeshOptions, rank: usize) -> Result<Self> {
        let npes = opts.nxpe * opts.nype;
        if npes == 0 || rank >= npes {
            return Err(MeshHaloError::InvalidConfig(format!(
                "rank {rank} outside processor grid {}x{}",
                opts.nxpe, opts.nype
            )));
        }
        if opts.nx % opts.nxpe != 0 {
            return Err(MeshHaloError::BadDecomposition {
                dir: "x",
                npoints: opts.nx,
                npes: opts.nxpe,
            });
        }
        if opts.ny % opts.nype != 0 {
            return Err(MeshHaloError::BadDecomposition {
                dir: "y",
                npoints: opts.ny,
                npes: opts.nype,
            });
        }
        if opts.nz == 0 {
            return Err(MeshHaloError::InvalidConfig("nz must be >= 1".into()));
        }
        let sub_nx = opts.nx / opts.nxpe;
        let sub_ny = opts.ny / opts.nype;
        if sub_nx < opts.mxg || sub_ny < opts.myg {
            return Err(MeshHaloError::InvalidConfig(format!(
                "subdomain {sub_nx}x{sub_ny} thinner than guard region {}x{}",
                opts.mxg, opts.myg
            )));
        }

        let pe_xind = rank % opts.nxpe;
        let pe_yind = rank / opts.nxpe;
        let local_nx = sub_nx + 2 * opts.mxg;
        let local_ny = sub_ny + 2 * opts.myg;

        // Default stacked Y connections, wrapping only when fully periodic.
        let below = if pe_yind > 0 {
            Some(rank - opts.nxpe)
        } else if opts.periodic_y {
            Some(proc_num(opts.nxpe, pe_xind, opts.nype - 1))
        } else {
            None
        };
        let above = if pe_yind + 1 < opts.nype {
            Some(rank + opts.nxpe)
        } else if opts.periodic_y {
            Some(proc_num(opts.nxpe, pe_xind, 0))
        } else {
            None
        };

        let topo = Self {
            global_nx: opts.nx,
            global_ny: opts.ny,
            global_nz: opts.nz,
            local_nx,
            local_ny,
            local_nz: opts.nz,
            mxg: opts.mxg,
            myg: opts.myg,
            xstart: opts.mxg,
            xend: opts.mxg + sub_nx - 1,
            ystart: opts.myg,
            yend: opts.myg + sub_ny - 1,
            nxpe: opts.nxpe,
            nype: opts.nype,
            pe_xind,
            pe_yind,
            offset_x: pe_xind * sub_nx,
            offset_y: pe_yind * sub_ny,
            periodic_x: opts.periodic_x,
            yup_xsplit: local_nx,
            ydown_xsplit: local_nx,
            yup_indest: above,
            yup_outdest: None,
            ydown_indest: below,
            ydown_outdest: None,
            y_periodic: vec![opts.periodic_y; local_nx],
            ts_angle: vec![0.0; local_nx],
        };
        topo.debug_assert_invariants();
        Ok(topo)
    }

    /// Single-process descriptor, ignoring any processor-grid options.
    pub fn serial(opts: &MeshOptions) -> Result<Self> {
        let mut one = opts.clone();
        one.nxpe = 1;
        one.nype = 1;
        Self::new(&one, 0)
    }

    /// This process's rank in the flattened processor grid.
    #[inline]
    pub fn rank(&self) -> usize {
        proc_num(self.nxpe, self.pe_xind, self.pe_yind)
    }

    /// Total number of processes.
    #[inline]
    pub fn nprocs(&self) -> usize {
        self.nxpe * self.nype
    }

    /// Local array shape including guard cells.
    #[inline]
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.local_nx, self.local_ny, self.local_nz)
    }

    /// Is there a physical boundary to the left in X?
    #[inline]
    pub fn first_x(&self) -> bool {
        self.pe_xind == 0 && !self.periodic_x
    }

    /// Is there a physical boundary to the right in X?
    #[inline]
    pub fn last_x(&self) -> bool {
        self.pe_xind + 1 == self.nxpe && !self.periodic_x
    }

    /// Rank of the X-inner (left) neighbour, if any.
    pub fn x_in_rank(&self) -> Option<usize> {
        if self.pe_xind > 0 {
            Some(proc_num(self.nxpe, self.pe_xind - 1, self.pe_yind))
        } else if self.periodic_x {
            Some(proc_num(self.nxpe, self.nxpe - 1, self.pe_yind))
        } else {
            None
        }
    }

    /// Rank of the X-outer (right) neighbour, if any.
    pub fn x_out_rank(&self) -> Option<usize> {
        if self.pe_xind + 1 < self.nxpe {
            Some(proc_num(self.nxpe, self.pe_xind + 1, self.pe_yind))
        } else if self.periodic_x {
            Some(proc_num(self.nxpe, 0, self.pe_yind))
        } else {
            None
        }
    }

    /// Destination rank for the upper Y edge at local X index `xpos`.
    #[inline]
    pub fn yup_dest(&self, xpos: usize) -> Option<usize> {
        if xpos < self.yup_xsplit {
            self.yup_indest
        } else {
            self.yup_outdest
        }
    }

    /// Destination rank for the lower Y edge at local X index `xpos`.
    #[inline]
    pub fn ydown_dest(&self, xpos: usize) -> Option<usize> {
        if xpos < self.ydown_xsplit {
            self.ydown_indest
        } else {
            self.ydown_outdest
        }
    }

    /// Physical boundary at lower Y for X index `xpos`?
    #[inline]
    pub fn first_y_at(&self, xpos: usize) -> bool {
        self.ydown_dest(xpos).is_none()
    }

    /// Physical boundary at upper Y for X index `xpos`?
    #[inline]
    pub fn last_y_at(&self, xpos: usize) -> bool {
        self.yup_dest(xpos).is_none()
    }

    /// Physical boundary at lower Y anywhere on this process?
    pub fn first_y(&self) -> bool {
        (0..self.local_nx).any(|x| self.first_y_at(x))
    }

    /// Physical boundary at upper Y anywhere on this process?
    pub fn last_y(&self) -> bool {
        (0..self.local_nx).any(|x| self.last_y_at(x))
    }

    /// Split the upper Y edge: X indices `< xsplit` route to `indest`,
    /// the rest to `outdest`. `None` marks a physical boundary leg.
    pub fn set_yup_split(
        &mut self,
        xsplit: usize,
        indest: Option<usize>,
        outdest: Option<usize>,
    ) -> Result<()> {
        if xsplit > self.local_nx {
            return Err(MeshHaloError::InvalidConfig(format!(
                "upper Y split {xsplit} beyond local_nx {}",
                self.local_nx
            )));
        }
        self.yup_xsplit = xsplit;
        self.yup_indest = indest;
        self.yup_outdest = outdest;
        self.debug_assert_invariants();
        Ok(())
    }

    /// Split the lower Y edge; see [`set_yup_split`](Self::set_yup_split).
    pub fn set_ydown_split(
        &mut self,
        xsplit: usize,
        indest: Option<usize>,
        outdest: Option<usize>,
    ) -> Result<()> {
        if xsplit > self.local_nx {
            return Err(MeshHaloError::InvalidConfig(format!(
                "lower Y split {xsplit} beyond local_nx {}",
                self.local_nx
            )));
        }
        self.ydown_xsplit = xsplit;
        self.ydown_indest = indest;
        self.ydown_outdest = outdest;
        self.debug_assert_invariants();
        Ok(())
    }

    /// Is the flux surface at local X index `jx` periodic in Y?
    #[inline]
    pub fn periodic_y(&self, jx: usize) -> bool {
        self.y_periodic[jx]
    }

    /// Periodicity and twist-shift angle at local X index `jx`.
    ///
    /// The angle is only meaningful when the surface is periodic; the
    /// exchange engine never applies it directly, the shift belongs to the
    /// field-aligned representation handled by the parallel transform.
    #[inline]
    pub fn periodic_y_ts(&self, jx: usize) -> (bool, f64) {
        (self.y_periodic[jx], self.ts_angle[jx])
    }

    /// Mark local X indices `xrange` as Y-periodic with the given
    /// twist-shift angles (one per index in the range).
    pub fn set_periodic_y(&mut self, xrange: std::ops::Range<usize>, angles: &[f64]) -> Result<()> {
        if xrange.end > self.local_nx || xrange.len() != angles.len() {
            return Err(MeshHaloError::InvalidConfig(format!(
                "periodic Y range {xrange:?} with {} angles does not fit local_nx {}",
                angles.len(),
                self.local_nx
            )));
        }
        for (jx, &a) in xrange.clone().zip(angles) {
            self.y_periodic[jx] = true;
            self.ts_angle[jx] = a;
        }
        self.debug_assert_invariants();
        Ok(())
    }

    /// Global X index of local index `xloc`.
    #[inline]
    pub fn x_global(&self, xloc: usize) -> isize {
        xloc as isize - self.xstart as isize + self.offset_x as isize
    }

    /// Global Y index of local index `yloc`.
    #[inline]
    pub fn y_global(&self, yloc: usize) -> isize {
        yloc as isize - self.ystart as isize + self.offset_y as isize
    }

    /// Continuous global X coordinate in `[0, 1)` of local index `xloc`.
    #[inline]
    pub fn global_x(&self, xloc: usize) -> f64 {
        self.x_global(xloc) as f64 / self.global_nx as f64
    }

    /// Continuous global Y coordinate in `[0, 1)` of local index `yloc`.
    #[inline]
    pub fn global_y(&self, yloc: usize) -> f64 {
        self.y_global(yloc) as f64 / self.global_ny as f64
    }

    /// Number of interior points in Y at fixed X (whole Y domain).
    #[inline]
    pub fn y_size(&self) -> usize {
        self.global_ny
    }

    /// Assert invariants in debug builds or with `check-invariants`.
    pub fn debug_assert_invariants(&self) {
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        if let Err(e) = self.validate_invariants() {
            panic!("[invariants] Topology invalid: {e}");
        }
    }

    /// Validate invariants, returning the first violation found.
    pub fn validate_invariants(&self) -> Result<()> {
        if self.xstart != self.mxg || self.xend + self.mxg + 1 != self.local_nx {
            return Err(MeshHaloError::InvalidConfig(format!(
                "x interior [{},{}] not inset by guard width {} in 0..{}",
                self.xstart, self.xend, self.mxg, self.local_nx
            )));
        }
        if self.ystart != self.myg || self.yend + self.myg + 1 != self.local_ny {
            return Err(MeshHaloError::InvalidConfig(format!(
                "y interior [{},{}] not inset by guard width {} in 0..{}",
                self.ystart, self.yend, self.myg, self.local_ny
            )));
        }
        if self.yup_xsplit > self.local_nx || self.ydown_xsplit > self.local_nx {
            return Err(MeshHaloError::InvalidConfig(format!(
                "Y split ({}, {}) beyond local_nx {}",
                self.yup_xsplit, self.ydown_xsplit, self.local_nx
            )));
        }
        if self.y_periodic.len() != self.local_nx || self.ts_angle.len() != self.local_nx {
            return Err(MeshHaloError::InvalidConfig(
                "per-X periodicity tables out of step with local_nx".into(),
            ));
        }
        for r in [
            self.yup_indest,
            self.yup_outdest,
            self.ydown_indest,
            self.ydown_outdest,
        ]
        .into_iter()
        .flatten()
        {
            if r >= self.nprocs() {
                return Err(MeshHaloError::InvalidConfig(format!(
                    "Y destination rank {r} outside processor grid of {}",
                    self.nprocs()
                )));
            }
        }
        Ok(())
    }
}

#[inline]
fn proc_num(nxpe: usize, xind: usize, yind: usize) -> usize {
    yind * nxpe + xind
}

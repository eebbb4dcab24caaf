//! Boundary-region enumeration.
//!
//! Boundary-condition code (external to this crate) consumes these
//! descriptors read-only; the exchange engine uses them to tell physical
//! edges from inter-process edges. Each region iterates a lazy, finite,
//! restartable sequence of local `(x, y)` index pairs. The traversal order
//! is row-major and stable across repeated calls, so boundary code can rely
//! on deterministic ordering.

use serde::{Deserialize, Serialize};

use super::Topology;

/// Where a boundary region sits on the local subdomain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BndryLoc {
    Xin,
    Xout,
    LowerY,
    UpperY,
    /// Lower Y, inboard of the split index.
    LowerInnerY,
    /// Lower Y, outboard of the split index.
    LowerOuterY,
    UpperInnerY,
    UpperOuterY,
}

/// An index-range descriptor for one boundary patch.
///
/// Ranges are half-open in both directions. `width` is the number of guard
/// rows/columns the patch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryRegion {
    pub location: BndryLoc,
    pub width: usize,
    pub xs: usize,
    pub xe: usize,
    pub ys: usize,
    pub ye: usize,
}

impl BoundaryRegion {
    /// Is there anything to iterate?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.xs >= self.xe || self.ys >= self.ye
    }

    /// Restartable row-major iterator over local `(x, y)` pairs.
    pub fn iter(&self) -> BoundaryIter {
        BoundaryIter {
            region: *self,
            x: self.xs,
            y: self.ys,
        }
    }
}

/// Iterator state for [`BoundaryRegion::iter`].
#[derive(Debug, Clone)]
pub struct BoundaryIter {
    region: BoundaryRegion,
    x: usize,
    y: usize,
}

impl Iterator for BoundaryIter {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<(usize, usize)> {
        if self.region.is_empty() || self.y >= self.region.ye {
            return None;
        }
        let out = (self.x, self.y);
        self.x += 1;
        if self.x >= self.region.xe {
            self.x = self.region.xs;
            self.y += 1;
        }
        Some(out)
    }
}

/// End of the field line a parallel boundary sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParLoc {
    Ydown,
    Yup,
}

/// A parallel (Y) boundary: the last interior row before a physical Y edge,
/// with the twist-shift angle for each X index on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryRegionPar {
    pub location: ParLoc,
    /// Local Y index of the boundary row.
    pub y: usize,
    xs: usize,
    xe: usize,
    angles: Vec<f64>,
}

impl BoundaryRegionPar {
    /// Iterate `(x, y, twist_shift_angle)` along the boundary row.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (self.xs..self.xe).map(move |x| (x, self.y, self.angles[x - self.xs]))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.xs >= self.xe
    }
}

impl Topology {
    /// All X and Y boundary regions present on this process.
    ///
    /// Regions are listed in a fixed order (Xin, Xout, lower-Y legs,
    /// upper-Y legs) and empty patches are skipped.
    pub fn boundaries(&self) -> Vec<BoundaryRegion> {
        let mut out = Vec::new();
        if self.first_x() {
            out.push(BoundaryRegion {
                location: BndryLoc::Xin,
                width: self.mxg,
                xs: 0,
                xe: self.xstart,
                ys: self.ystart,
                ye: self.yend + 1,
            });
        }
        if self.last_x() {
            out.push(BoundaryRegion {
                location: BndryLoc::Xout,
                width: self.mxg,
                xs: self.xend + 1,
                xe: self.local_nx,
                ys: self.ystart,
                ye: self.yend + 1,
            });
        }
        out.extend(self.bndry_lower_y());
        out.extend(self.bndry_upper_y());
        out.retain(|r| !r.is_empty());
        out
    }

    /// Lower-Y boundary legs, split at `ydown_xsplit` when the two legs
    /// differ in kind.
    pub fn bndry_lower_y(&self) -> Vec<BoundaryRegion> {
        y_legs(
            self.ydown_xsplit,
            self.ydown_indest,
            self.ydown_outdest,
            self.local_nx,
            self.myg,
            0,
            self.ystart,
            [BndryLoc::LowerY, BndryLoc::LowerInnerY, BndryLoc::LowerOuterY],
        )
    }

    /// Upper-Y boundary legs, split at `yup_xsplit` when the two legs
    /// differ in kind.
    pub fn bndry_upper_y(&self) -> Vec<BoundaryRegion> {
        y_legs(
            self.yup_xsplit,
            self.yup_indest,
            self.yup_outdest,
            self.local_nx,
            self.myg,
            self.yend + 1,
            self.local_ny,
            [BndryLoc::UpperY, BndryLoc::UpperInnerY, BndryLoc::UpperOuterY],
        )
    }

    /// Does this process hold any lower-Y physical boundary cells?
    pub fn has_bndry_lower_y(&self) -> bool {
        self.bndry_lower_y().iter().any(|r| !r.is_empty())
    }

    /// Does this process hold any upper-Y physical boundary cells?
    pub fn has_bndry_upper_y(&self) -> bool {
        self.bndry_upper_y().iter().any(|r| !r.is_empty())
    }

    /// Parallel (Y) boundaries with twist-shift data, in lower-then-upper
    /// order.
    pub fn boundaries_par(&self) -> Vec<BoundaryRegionPar> {
        let mut out = Vec::new();
        self.par_runs(ParLoc::Ydown, self.ystart, &mut out);
        self.par_runs(ParLoc::Yup, self.yend, &mut out);
        out
    }

    /// Contiguous runs of physical-edge X indices on one Y end, each run
    /// becoming one parallel boundary region.
    fn par_runs(&self, location: ParLoc, y: usize, out: &mut Vec<BoundaryRegionPar>) {
        let is_edge = |x: usize| match location {
            ParLoc::Ydown => self.ydown_dest(x).is_none(),
            ParLoc::Yup => self.yup_dest(x).is_none(),
        };
        let mut run: Option<(usize, Vec<f64>)> = None;
        for x in 0..self.local_nx {
            if is_edge(x) {
                let (_, angles) = run.get_or_insert((x, Vec::new()));
                angles.push(self.periodic_y_ts(x).1);
            } else if let Some((xs, angles)) = run.take() {
                out.push(BoundaryRegionPar {
                    location,
                    y,
                    xs,
                    xe: xs + angles.len(),
                    angles,
                });
            }
        }
        if let Some((xs, angles)) = run {
            out.push(BoundaryRegionPar {
                location,
                y,
                xs,
                xe: xs + angles.len(),
                angles,
            });
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn y_legs(
    xsplit: usize,
    indest: Option<usize>,
    outdest: Option<usize>,
    local_nx: usize,
    myg: usize,
    ys: usize,
    ye: usize,
    [whole, inner, outer]: [BndryLoc; 3],
) -> Vec<BoundaryRegion> {
    let mk = |location, xs, xe| BoundaryRegion {
        location,
        width: myg,
        xs,
        xe,
        ys,
        ye,
    };
    match (indest, outdest) {
        // Both legs physical: one unsplit region.
        (None, None) => vec![mk(whole, 0, local_nx)],
        (None, Some(_)) => vec![mk(inner, 0, xsplit)],
        (Some(_), None) => vec![mk(outer, xsplit, local_nx)],
        (Some(_), Some(_)) => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::MeshOptions;

    fn topo() -> Topology {
        Topology::serial(&MeshOptions::serial(4, 4, 2)).unwrap()
    }

    #[test]
    fn serial_process_has_all_edges() {
        let t = topo();
        let locs: Vec<_> = t.boundaries().iter().map(|r| r.location).collect();
        assert_eq!(
            locs,
            vec![
                BndryLoc::Xin,
                BndryLoc::Xout,
                BndryLoc::LowerY,
                BndryLoc::UpperY
            ]
        );
        assert!(t.has_bndry_lower_y() && t.has_bndry_upper_y());
    }

    #[test]
    fn iteration_is_row_major_and_restartable() {
        let r = BoundaryRegion {
            location: BndryLoc::Xin,
            width: 2,
            xs: 0,
            xe: 2,
            ys: 2,
            ye: 4,
        };
        let first: Vec<_> = r.iter().collect();
        assert_eq!(first, vec![(0, 2), (1, 2), (0, 3), (1, 3)]);
        // restart gives the identical sequence
        assert_eq!(r.iter().collect::<Vec<_>>(), first);
    }

    #[test]
    fn split_upper_y_yields_inner_leg_only() {
        let mut t = topo();
        // outboard half connects to another process, inboard is physical
        t.set_yup_split(4, None, Some(0)).unwrap();
        let regions = t.bndry_upper_y();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].location, BndryLoc::UpperInnerY);
        assert_eq!((regions[0].xs, regions[0].xe), (0, 4));
        assert!(t.has_bndry_upper_y());
    }

    #[test]
    fn fully_connected_edge_has_no_boundary() {
        let mut t = topo();
        t.set_yup_split(4, Some(0), Some(0)).unwrap();
        assert!(t.bndry_upper_y().is_empty());
        assert!(!t.has_bndry_upper_y());
        // lower edge untouched
        assert!(t.has_bndry_lower_y());
    }

    #[test]
    fn parallel_boundaries_carry_twist_shift() {
        let mut t = topo();
        t.set_periodic_y(0..8, &[0.5; 8]).unwrap();
        let pars = t.boundaries_par();
        assert_eq!(pars.len(), 2);
        let down = &pars[0];
        assert_eq!(down.location, ParLoc::Ydown);
        assert_eq!(down.y, t.ystart);
        let entries: Vec<_> = down.iter().collect();
        assert_eq!(entries.len(), t.local_nx);
        assert!(entries.iter().all(|&(_, y, a)| y == t.ystart && a == 0.5));
    }
}

//! Curvilinear coordinate system: metric tensor, Jacobian and connection
//! coefficients at one cell location.
//!
//! A `Coordinates` object is created by the mesh (lazily, once per cell
//! location) from a [`GridDataSource`], and is read-only to every consumer
//! afterwards. All components are axisymmetric (`Field2D`); Z is assumed a
//! symmetry direction of the geometry.
//!
//! Missing variables fall back to the identity metric, so a source that
//! provides nothing yields Cartesian-orthogonal coordinates with `J = 1`
//! and vanishing connection coefficients.

pub mod transform;

pub use transform::{IdentityTransform, ParallelTransform, ShiftedTransform};

use itertools::iproduct;
use log::debug;

use crate::error::{MeshHaloError, Result};
use crate::field::{CellLoc, Field2D};
use crate::source::{field2d_or, scalar_or, GridDataSource, LoadOutcome};
use crate::topology::Topology;

/// Relative tolerance for the metric consistency check.
const METRIC_CHECK_TOL: f64 = 1e-8;

/// Christoffel-symbol contraction coefficients `Γ^i_{jk}`, symmetric in
/// the lower pair. Named `gammaI_JK` after the upper and lower indices.
#[derive(Debug, Clone)]
pub struct Christoffel {
    pub gamma1_11: Field2D,
    pub gamma1_12: Field2D,
    pub gamma1_13: Field2D,
    pub gamma1_22: Field2D,
    pub gamma1_23: Field2D,
    pub gamma1_33: Field2D,
    pub gamma2_11: Field2D,
    pub gamma2_12: Field2D,
    pub gamma2_13: Field2D,
    pub gamma2_22: Field2D,
    pub gamma2_23: Field2D,
    pub gamma2_33: Field2D,
    pub gamma3_11: Field2D,
    pub gamma3_12: Field2D,
    pub gamma3_13: Field2D,
    pub gamma3_22: Field2D,
    pub gamma3_23: Field2D,
    pub gamma3_33: Field2D,
}

/// Metric tensor, Jacobian and derived geometric factors at one location.
#[derive(Debug, Clone)]
pub struct Coordinates {
    pub location: CellLoc,
    /// Grid spacing in X and Y; Z spacing is uniform.
    pub dx: Field2D,
    pub dy: Field2D,
    pub dz: f64,
    /// Non-uniform grid corrections `d/di (1/dx)`, `d/di (1/dy)`; zero on
    /// uniform grids.
    pub d1_dx: Field2D,
    pub d1_dy: Field2D,
    // Contravariant metric components g^{ij}.
    pub g11: Field2D,
    pub g12: Field2D,
    pub g13: Field2D,
    pub g22: Field2D,
    pub g23: Field2D,
    pub g33: Field2D,
    // Covariant metric components g_{ij}.
    pub g_11: Field2D,
    pub g_12: Field2D,
    pub g_13: Field2D,
    pub g_22: Field2D,
    pub g_23: Field2D,
    pub g_33: Field2D,
    /// Coordinate Jacobian.
    pub j: Field2D,
    /// Magnitude of the equilibrium magnetic field.
    pub bxy: Field2D,
    /// Shift torsion coefficient, used by Curl when X derivatives are
    /// taken in shifted coordinates.
    pub shift_torsion: Field2D,
    pub christoffel: Christoffel,
}

impl Coordinates {
    /// Build a coordinate system from a grid source.
    ///
    /// Variables follow the conventional names (`dx`, `g11`, `g_11`, `J`,
    /// `Bxy`, `G1_11`, `ShiftTorsion`, ...). Anything absent defaults to
    /// the identity geometry. When the covariant components are absent
    /// they are completed by pointwise inversion of the contravariant
    /// tensor; the Jacobian defaults to `1/sqrt(det g^{ij})`.
    ///
    /// # Errors
    /// Fails when the metric is not positive definite somewhere, or when
    /// supplied covariant and contravariant components are inconsistent.
    pub fn from_source(
        topo: &Topology,
        src: &dyn GridDataSource,
        location: CellLoc,
    ) -> Result<Self> {
        let f = |name: &str, def: f64| field2d_or(src, name, topo, def).0;

        let dx = f("dx", 1.0);
        let dy = f("dy", 1.0);
        let dz = scalar_or(src, "dz", std::f64::consts::TAU / topo.local_nz as f64).0;
        let d1_dx = f("d1_dx", 0.0);
        let d1_dy = f("d1_dy", 0.0);

        let g11 = f("g11", 1.0);
        let g22 = f("g22", 1.0);
        let g33 = f("g33", 1.0);
        let g12 = f("g12", 0.0);
        let g13 = f("g13", 0.0);
        let g23 = f("g23", 0.0);

        let have_covariant = src.has_var("g_11");
        let (g_11, g_12, g_13, g_22, g_23, g_33) = if have_covariant {
            (
                f("g_11", 1.0),
                f("g_12", 0.0),
                f("g_13", 0.0),
                f("g_22", 1.0),
                f("g_23", 0.0),
                f("g_33", 1.0),
            )
        } else {
            invert_metric(topo, &g11, &g12, &g13, &g22, &g23, &g33)?
        };

        // Jacobian: loaded, or derived from the contravariant determinant.
        let (j, j_outcome) = field2d_or(src, "J", topo, 0.0);
        let j = if j_outcome == LoadOutcome::FromSource {
            j
        } else {
            let mut out = Field2D::zeros(topo);
            for (x, y) in iproduct!(0..topo.local_nx, 0..topo.local_ny) {
                let det = sym_det(
                    g11.get(x, y),
                    g12.get(x, y),
                    g13.get(x, y),
                    g22.get(x, y),
                    g23.get(x, y),
                    g33.get(x, y),
                );
                if det <= 0.0 {
                    return Err(MeshHaloError::SingularMetric { x, y, det });
                }
                out.set(x, y, 1.0 / det.sqrt());
            }
            out
        };

        let (bxy, bxy_outcome) = field2d_or(src, "Bxy", topo, 0.0);
        let bxy = if bxy_outcome == LoadOutcome::FromSource {
            bxy
        } else {
            g_22.zip_map(&j, |g, jj| g.sqrt() / jj)
        };

        let shift_torsion = f("ShiftTorsion", 0.0);

        let christoffel = Christoffel {
            gamma1_11: f("G1_11", 0.0),
            gamma1_12: f("G1_12", 0.0),
            gamma1_13: f("G1_13", 0.0),
            gamma1_22: f("G1_22", 0.0),
            gamma1_23: f("G1_23", 0.0),
            gamma1_33: f("G1_33", 0.0),
            gamma2_11: f("G2_11", 0.0),
            gamma2_12: f("G2_12", 0.0),
            gamma2_13: f("G2_13", 0.0),
            gamma2_22: f("G2_22", 0.0),
            gamma2_23: f("G2_23", 0.0),
            gamma2_33: f("G2_33", 0.0),
            gamma3_11: f("G3_11", 0.0),
            gamma3_12: f("G3_12", 0.0),
            gamma3_13: f("G3_13", 0.0),
            gamma3_22: f("G3_22", 0.0),
            gamma3_23: f("G3_23", 0.0),
            gamma3_33: f("G3_33", 0.0),
        };

        let coords = Self {
            location,
            dx,
            dy,
            dz,
            d1_dx,
            d1_dy,
            g11,
            g12,
            g13,
            g22,
            g23,
            g33,
            g_11,
            g_12,
            g_13,
            g_22,
            g_23,
            g_33,
            j,
            bxy,
            shift_torsion,
            christoffel,
        };
        coords.check_consistency(topo)?;
        debug!(
            "coordinates at {location:?} built (covariant {} source)",
            if have_covariant { "from" } else { "not in" }
        );
        Ok(coords)
    }

    /// Verify `g^{ik} g_{kj} = δ^i_j` at every point.
    fn check_consistency(&self, topo: &Topology) -> Result<()> {
        for (x, y) in iproduct!(0..topo.local_nx, 0..topo.local_ny) {
            let up = [
                [self.g11.get(x, y), self.g12.get(x, y), self.g13.get(x, y)],
                [self.g12.get(x, y), self.g22.get(x, y), self.g23.get(x, y)],
                [self.g13.get(x, y), self.g23.get(x, y), self.g33.get(x, y)],
            ];
            let down = [
                [self.g_11.get(x, y), self.g_12.get(x, y), self.g_13.get(x, y)],
                [self.g_12.get(x, y), self.g_22.get(x, y), self.g_23.get(x, y)],
                [self.g_13.get(x, y), self.g_23.get(x, y), self.g_33.get(x, y)],
            ];
            for (i, jdx) in iproduct!(0..3, 0..3) {
                let mut s = 0.0;
                for k in 0..3 {
                    s += up[i][k] * down[k][jdx];
                }
                let want = if i == jdx { 1.0 } else { 0.0 };
                if (s - want).abs() > METRIC_CHECK_TOL {
                    return Err(MeshHaloError::InconsistentMetric {
                        x,
                        y,
                        residual: s - want,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Determinant of a symmetric 3x3 tensor given its upper triangle.
#[inline]
fn sym_det(a11: f64, a12: f64, a13: f64, a22: f64, a23: f64, a33: f64) -> f64 {
    a11 * (a22 * a33 - a23 * a23) - a12 * (a12 * a33 - a23 * a13)
        + a13 * (a12 * a23 - a22 * a13)
}

/// Pointwise inversion of a symmetric positive-definite metric.
#[allow(clippy::too_many_arguments)]
fn invert_metric(
    topo: &Topology,
    g11: &Field2D,
    g12: &Field2D,
    g13: &Field2D,
    g22: &Field2D,
    g23: &Field2D,
    g33: &Field2D,
) -> Result<(Field2D, Field2D, Field2D, Field2D, Field2D, Field2D)> {
    let mut o11 = Field2D::zeros(topo);
    let mut o12 = Field2D::zeros(topo);
    let mut o13 = Field2D::zeros(topo);
    let mut o22 = Field2D::zeros(topo);
    let mut o23 = Field2D::zeros(topo);
    let mut o33 = Field2D::zeros(topo);
    for (x, y) in iproduct!(0..topo.local_nx, 0..topo.local_ny) {
        let (a11, a12, a13) = (g11.get(x, y), g12.get(x, y), g13.get(x, y));
        let (a22, a23, a33) = (g22.get(x, y), g23.get(x, y), g33.get(x, y));
        let det = sym_det(a11, a12, a13, a22, a23, a33);
        if det <= 0.0 {
            return Err(MeshHaloError::SingularMetric { x, y, det });
        }
        o11.set(x, y, (a22 * a33 - a23 * a23) / det);
        o12.set(x, y, (a13 * a23 - a12 * a33) / det);
        o13.set(x, y, (a12 * a23 - a13 * a22) / det);
        o22.set(x, y, (a11 * a33 - a13 * a13) / det);
        o23.set(x, y, (a12 * a13 - a11 * a23) / det);
        o33.set(x, y, (a11 * a22 - a12 * a12) / det);
    }
    Ok((o11, o12, o13, o22, o23, o33))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::MeshOptions;
    use crate::source::OptionsSource;

    fn topo() -> Topology {
        Topology::serial(&MeshOptions::serial(4, 4, 4)).unwrap()
    }

    #[test]
    fn empty_source_gives_cartesian_identity() {
        let t = topo();
        let c = Coordinates::from_source(&t, &OptionsSource::new(), CellLoc::Centre).unwrap();
        assert!(c.g11.values().all(|v| v == 1.0));
        assert!(c.g_33.values().all(|v| v == 1.0));
        assert!(c.g12.values().all(|v| v == 0.0));
        assert!(c.j.values().all(|v| v == 1.0));
        assert!(c.shift_torsion.values().all(|v| v == 0.0));
        assert!(c.christoffel.gamma2_23.values().all(|v| v == 0.0));
    }

    #[test]
    fn covariant_completed_by_inversion() {
        let t = topo();
        let mut src = OptionsSource::new();
        // diagonal metric g^xx = 4 => g_xx = 1/4, J = 1/sqrt(det) = 1/2
        src.set_uniform2d("g11", 4.0);
        let c = Coordinates::from_source(&t, &src, CellLoc::Centre).unwrap();
        assert!(c.g_11.values().all(|v| (v - 0.25).abs() < 1e-14));
        assert!(c.j.values().all(|v| (v - 0.5).abs() < 1e-14));
    }

    #[test]
    fn degenerate_metric_rejected() {
        let t = topo();
        let mut src = OptionsSource::new();
        src.set_uniform2d("g11", 0.0);
        let err = Coordinates::from_source(&t, &src, CellLoc::Centre).unwrap_err();
        assert!(matches!(err, MeshHaloError::SingularMetric { .. }));
    }

    #[test]
    fn inconsistent_covariant_pair_rejected() {
        let t = topo();
        let mut src = OptionsSource::new();
        src.set_uniform2d("g11", 2.0);
        src.set_uniform2d("g_11", 1.0); // should be 0.5
        let err = Coordinates::from_source(&t, &src, CellLoc::Centre).unwrap_err();
        assert!(matches!(
            err,
            MeshHaloError::InconsistentMetric { residual, .. } if (residual - 1.0).abs() < 1e-12
        ));
    }

    #[test]
    fn default_bxy_from_metric() {
        let t = topo();
        let c = Coordinates::from_source(&t, &OptionsSource::new(), CellLoc::Centre).unwrap();
        // identity metric: Bxy = sqrt(g_22)/J = 1
        assert!(c.bxy.values().all(|v| (v - 1.0).abs() < 1e-14));
    }
}

//! Vector fields with covariant/contravariant bookkeeping.
//!
//! The component basis is tracked by a flag and converted through the
//! metric tensor of a [`Coordinates`] object. Converting to the basis a
//! vector is already in is a no-op, so conversions are idempotent.

use crate::coords::Coordinates;
use crate::field::{Field2D, Field3D};

/// A 3D vector field: three scalar components plus the basis flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector3D {
    pub x: Field3D,
    pub y: Field3D,
    pub z: Field3D,
    /// True when the components are covariant (lower index).
    pub covariant: bool,
}

impl Vector3D {
    /// Contravariant zero vector with the shapes of `f`.
    pub fn zeros_like(f: &Field3D) -> Self {
        Self {
            x: f.zeros_like(),
            y: f.zeros_like(),
            z: f.zeros_like(),
            covariant: false,
        }
    }

    /// Convert the components to covariant form in place. No-op when
    /// already covariant.
    pub fn to_covariant(&mut self, metric: &Coordinates) {
        if self.covariant {
            return;
        }
        let gx = &(&self.x.mul_2d(&metric.g_11) + &self.y.mul_2d(&metric.g_12))
            + &self.z.mul_2d(&metric.g_13);
        let gy = &(&self.x.mul_2d(&metric.g_12) + &self.y.mul_2d(&metric.g_22))
            + &self.z.mul_2d(&metric.g_23);
        let gz = &(&self.x.mul_2d(&metric.g_13) + &self.y.mul_2d(&metric.g_23))
            + &self.z.mul_2d(&metric.g_33);
        self.x = gx;
        self.y = gy;
        self.z = gz;
        self.covariant = true;
    }

    /// Convert the components to contravariant form in place. No-op when
    /// already contravariant.
    pub fn to_contravariant(&mut self, metric: &Coordinates) {
        if !self.covariant {
            return;
        }
        let gx = &(&self.x.mul_2d(&metric.g11) + &self.y.mul_2d(&metric.g12))
            + &self.z.mul_2d(&metric.g13);
        let gy = &(&self.x.mul_2d(&metric.g12) + &self.y.mul_2d(&metric.g22))
            + &self.z.mul_2d(&metric.g23);
        let gz = &(&self.x.mul_2d(&metric.g13) + &self.y.mul_2d(&metric.g23))
            + &self.z.mul_2d(&metric.g33);
        self.x = gx;
        self.y = gy;
        self.z = gz;
        self.covariant = false;
    }
}

/// An axisymmetric vector field.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector2D {
    pub x: Field2D,
    pub y: Field2D,
    pub z: Field2D,
    pub covariant: bool,
}

impl Vector2D {
    pub fn zeros_like(f: &Field2D) -> Self {
        Self {
            x: f.zeros_like(),
            y: f.zeros_like(),
            z: f.zeros_like(),
            covariant: false,
        }
    }

    pub fn to_covariant(&mut self, metric: &Coordinates) {
        if self.covariant {
            return;
        }
        let gx = &(&(&self.x * &metric.g_11) + &(&self.y * &metric.g_12)) + &(&self.z * &metric.g_13);
        let gy = &(&(&self.x * &metric.g_12) + &(&self.y * &metric.g_22)) + &(&self.z * &metric.g_23);
        let gz = &(&(&self.x * &metric.g_13) + &(&self.y * &metric.g_23)) + &(&self.z * &metric.g_33);
        self.x = gx;
        self.y = gy;
        self.z = gz;
        self.covariant = true;
    }

    pub fn to_contravariant(&mut self, metric: &Coordinates) {
        if !self.covariant {
            return;
        }
        let gx = &(&(&self.x * &metric.g11) + &(&self.y * &metric.g12)) + &(&self.z * &metric.g13);
        let gy = &(&(&self.x * &metric.g12) + &(&self.y * &metric.g22)) + &(&self.z * &metric.g23);
        let gz = &(&(&self.x * &metric.g13) + &(&self.y * &metric.g23)) + &(&self.z * &metric.g33);
        self.x = gx;
        self.y = gy;
        self.z = gz;
        self.covariant = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Coordinates;
    use crate::options::MeshOptions;
    use crate::source::OptionsSource;
    use crate::topology::Topology;

    fn cartesian() -> (Topology, Coordinates) {
        let topo = Topology::serial(&MeshOptions::serial(4, 4, 2)).unwrap();
        let coords = Coordinates::from_source(&topo, &OptionsSource::new(), Default::default())
            .unwrap();
        (topo, coords)
    }

    #[test]
    fn conversion_is_idempotent() {
        let (topo, metric) = cartesian();
        let f = Field3D::from_fn(&topo, |x, y, z| (x + 2 * y + 3 * z) as f64);
        let mut v = Vector3D::zeros_like(&f);
        v.x = f.clone();
        v.to_contravariant(&metric);
        let once = v.clone();
        v.to_contravariant(&metric);
        assert_eq!(v, once);
    }

    #[test]
    fn cartesian_conversion_preserves_components() {
        // identity metric: covariant and contravariant components coincide
        let (topo, metric) = cartesian();
        let f = Field3D::from_fn(&topo, |x, _, _| x as f64);
        let mut v = Vector3D::zeros_like(&f);
        v.y = f.clone();
        let before = v.y.clone();
        v.to_covariant(&metric);
        assert_eq!(v.y, before);
        assert!(v.covariant);
        v.to_contravariant(&metric);
        assert_eq!(v.y, before);
        assert!(!v.covariant);
    }
}

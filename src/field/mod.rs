//! Dense field storage over the local index space.
//!
//! A field owns its storage and knows its own shape; the mesh only
//! describes the indexing. Guard cells are part of the allocation but are
//! written exclusively by communication or by boundary-condition code,
//! never by interior stencil evaluation.

pub mod group;
pub mod vector;

pub use group::{FieldGroup, FieldRef};
pub use vector::{Vector2D, Vector3D};

use serde::{Deserialize, Serialize};

use crate::topology::Topology;

/// Cell-centering location of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CellLoc {
    #[default]
    Centre,
    /// Staggered to the lower X cell face.
    XLow,
    /// Staggered to the lower Y cell face.
    YLow,
    /// Staggered to the lower Z cell face.
    ZLow,
}

/// A scalar field over the local 3D index space (guard cells included).
#[derive(Debug, Clone, PartialEq)]
pub struct Field3D {
    nx: usize,
    ny: usize,
    nz: usize,
    loc: CellLoc,
    data: Vec<f64>,
}

impl Field3D {
    /// Zero-filled field with the mesh's local shape, cell centred.
    pub fn zeros(topo: &Topology) -> Self {
        let (nx, ny, nz) = topo.shape();
        Self {
            nx,
            ny,
            nz,
            loc: CellLoc::Centre,
            data: vec![0.0; nx * ny * nz],
        }
    }

    /// Field initialised from a function of local indices.
    pub fn from_fn(topo: &Topology, mut f: impl FnMut(usize, usize, usize) -> f64) -> Self {
        let mut out = Self::zeros(topo);
        for x in 0..out.nx {
            for y in 0..out.ny {
                for z in 0..out.nz {
                    let i = out.idx(x, y, z);
                    out.data[i] = f(x, y, z);
                }
            }
        }
        out
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.nx, self.ny, self.nz)
    }

    #[inline]
    pub fn location(&self) -> CellLoc {
        self.loc
    }

    pub fn set_location(&mut self, loc: CellLoc) {
        self.loc = loc;
    }

    /// Same shape and location, zero data.
    pub fn zeros_like(&self) -> Self {
        Self {
            nx: self.nx,
            ny: self.ny,
            nz: self.nz,
            loc: self.loc,
            data: vec![0.0; self.data.len()],
        }
    }

    #[inline]
    fn idx(&self, x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < self.nx && y < self.ny && z < self.nz);
        (x * self.ny + y) * self.nz + z
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> f64 {
        self.data[self.idx(x, y, z)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, v: f64) {
        let i = self.idx(x, y, z);
        self.data[i] = v;
    }

    /// Z access with periodic wrap; `z` may be negative or beyond `nz`.
    #[inline]
    pub fn get_zwrap(&self, x: usize, y: usize, z: isize) -> f64 {
        let nz = self.nz as isize;
        let zw = z.rem_euclid(nz) as usize;
        self.data[self.idx(x, y, zw)]
    }

    pub fn fill(&mut self, v: f64) {
        self.data.fill(v);
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().copied()
    }

    pub(crate) fn raw(&self) -> &[f64] {
        &self.data
    }

    pub(crate) fn raw_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Elementwise combination; panics on shape mismatch.
    pub fn zip_map(&self, other: &Self, mut f: impl FnMut(f64, f64) -> f64) -> Self {
        assert_eq!(self.shape(), other.shape(), "field shape mismatch");
        let mut out = self.zeros_like();
        for (o, (&a, &b)) in out
            .data
            .iter_mut()
            .zip(self.data.iter().zip(other.data.iter()))
        {
            *o = f(a, b);
        }
        out
    }

    pub fn map(&self, mut f: impl FnMut(f64) -> f64) -> Self {
        let mut out = self.zeros_like();
        for (o, &a) in out.data.iter_mut().zip(self.data.iter()) {
            *o = f(a);
        }
        out
    }

    /// Multiply by a 2D field, broadcast over Z.
    pub fn mul_2d(&self, other: &Field2D) -> Self {
        assert_eq!((self.nx, self.ny), other.shape(), "field shape mismatch");
        let mut out = self.zeros_like();
        for x in 0..self.nx {
            for y in 0..self.ny {
                let w = other.get(x, y);
                for z in 0..self.nz {
                    let i = self.idx(x, y, z);
                    out.data[i] = self.data[i] * w;
                }
            }
        }
        out
    }

    /// Divide by a 2D field, broadcast over Z. Near-zero divisors are not
    /// guarded; inf/NaN propagate to the caller.
    pub fn div_2d(&self, other: &Field2D) -> Self {
        assert_eq!((self.nx, self.ny), other.shape(), "field shape mismatch");
        let mut out = self.zeros_like();
        for x in 0..self.nx {
            for y in 0..self.ny {
                let w = other.get(x, y);
                for z in 0..self.nz {
                    let i = self.idx(x, y, z);
                    out.data[i] = self.data[i] / w;
                }
            }
        }
        out
    }
}

/// An axisymmetric (X-Y) field; broadcast over Z where combined with 3D.
#[derive(Debug, Clone, PartialEq)]
pub struct Field2D {
    nx: usize,
    ny: usize,
    loc: CellLoc,
    data: Vec<f64>,
}

impl Field2D {
    pub fn zeros(topo: &Topology) -> Self {
        let (nx, ny, _) = topo.shape();
        Self {
            nx,
            ny,
            loc: CellLoc::Centre,
            data: vec![0.0; nx * ny],
        }
    }

    pub fn from_scalar(topo: &Topology, v: f64) -> Self {
        let mut f = Self::zeros(topo);
        f.fill(v);
        f
    }

    pub fn from_fn(topo: &Topology, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut out = Self::zeros(topo);
        for x in 0..out.nx {
            for y in 0..out.ny {
                out.data[x * out.ny + y] = f(x, y);
            }
        }
        out
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    #[inline]
    pub fn location(&self) -> CellLoc {
        self.loc
    }

    pub fn set_location(&mut self, loc: CellLoc) {
        self.loc = loc;
    }

    pub fn zeros_like(&self) -> Self {
        Self {
            nx: self.nx,
            ny: self.ny,
            loc: self.loc,
            data: vec![0.0; self.data.len()],
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f64 {
        debug_assert!(x < self.nx && y < self.ny);
        self.data[x * self.ny + y]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: f64) {
        debug_assert!(x < self.nx && y < self.ny);
        self.data[x * self.ny + y] = v;
    }

    pub fn fill(&mut self, v: f64) {
        self.data.fill(v);
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().copied()
    }

    pub(crate) fn raw(&self) -> &[f64] {
        &self.data
    }

    pub(crate) fn raw_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn zip_map(&self, other: &Self, mut f: impl FnMut(f64, f64) -> f64) -> Self {
        assert_eq!(self.shape(), other.shape(), "field shape mismatch");
        let mut out = self.zeros_like();
        for (o, (&a, &b)) in out
            .data
            .iter_mut()
            .zip(self.data.iter().zip(other.data.iter()))
        {
            *o = f(a, b);
        }
        out
    }

    pub fn map(&self, mut f: impl FnMut(f64) -> f64) -> Self {
        let mut out = self.zeros_like();
        for (o, &a) in out.data.iter_mut().zip(self.data.iter()) {
            *o = f(a);
        }
        out
    }

    /// Broadcast this 2D field into a 3D one (copied along Z).
    pub fn broadcast_z(&self, nz: usize) -> Field3D {
        let mut out = Field3D {
            nx: self.nx,
            ny: self.ny,
            nz,
            loc: self.loc,
            data: vec![0.0; self.nx * self.ny * nz],
        };
        for x in 0..self.nx {
            for y in 0..self.ny {
                let v = self.get(x, y);
                for z in 0..nz {
                    out.set(x, y, z, v);
                }
            }
        }
        out
    }
}

/// A perpendicular slice: one X-Z plane at a fixed Y index.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPerp {
    nx: usize,
    nz: usize,
    yindex: usize,
    loc: CellLoc,
    data: Vec<f64>,
}

impl FieldPerp {
    pub fn zeros(topo: &Topology, yindex: usize) -> Self {
        let (nx, _, nz) = topo.shape();
        Self {
            nx,
            nz,
            yindex,
            loc: CellLoc::Centre,
            data: vec![0.0; nx * nz],
        }
    }

    pub fn from_fn(topo: &Topology, yindex: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut out = Self::zeros(topo, yindex);
        for x in 0..out.nx {
            for z in 0..out.nz {
                out.data[x * out.nz + z] = f(x, z);
            }
        }
        out
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.nx, self.nz)
    }

    #[inline]
    pub fn yindex(&self) -> usize {
        self.yindex
    }

    #[inline]
    pub fn location(&self) -> CellLoc {
        self.loc
    }

    #[inline]
    pub fn get(&self, x: usize, z: usize) -> f64 {
        debug_assert!(x < self.nx && z < self.nz);
        self.data[x * self.nz + z]
    }

    #[inline]
    pub fn set(&mut self, x: usize, z: usize, v: f64) {
        debug_assert!(x < self.nx && z < self.nz);
        self.data[x * self.nz + z] = v;
    }
}

macro_rules! field_ops {
    ($ty:ty) => {
        impl std::ops::Add for &$ty {
            type Output = $ty;
            fn add(self, rhs: &$ty) -> $ty {
                self.zip_map(rhs, |a, b| a + b)
            }
        }
        impl std::ops::Sub for &$ty {
            type Output = $ty;
            fn sub(self, rhs: &$ty) -> $ty {
                self.zip_map(rhs, |a, b| a - b)
            }
        }
        impl std::ops::Mul for &$ty {
            type Output = $ty;
            fn mul(self, rhs: &$ty) -> $ty {
                self.zip_map(rhs, |a, b| a * b)
            }
        }
        impl std::ops::Div for &$ty {
            type Output = $ty;
            fn div(self, rhs: &$ty) -> $ty {
                self.zip_map(rhs, |a, b| a / b)
            }
        }
        impl std::ops::Mul<f64> for &$ty {
            type Output = $ty;
            fn mul(self, rhs: f64) -> $ty {
                self.map(|a| a * rhs)
            }
        }
        impl std::ops::Neg for &$ty {
            type Output = $ty;
            fn neg(self) -> $ty {
                self.map(|a| -a)
            }
        }
    };
}

field_ops!(Field2D);
field_ops!(Field3D);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::MeshOptions;

    fn topo() -> Topology {
        Topology::serial(&MeshOptions::serial(4, 4, 3)).unwrap()
    }

    #[test]
    fn indexing_round_trip() {
        let t = topo();
        let mut f = Field3D::zeros(&t);
        f.set(3, 2, 1, 7.5);
        assert_eq!(f.get(3, 2, 1), 7.5);
        assert_eq!(f.location(), CellLoc::Centre);
    }

    #[test]
    fn from_fn_matches_indices() {
        let t = topo();
        let f = Field3D::from_fn(&t, |x, y, z| (x * 100 + y * 10 + z) as f64);
        assert_eq!(f.get(5, 3, 2), 532.0);
    }

    #[test]
    fn z_wraparound() {
        let t = topo();
        let f = Field3D::from_fn(&t, |_, _, z| z as f64);
        assert_eq!(f.get_zwrap(0, 0, -1), 2.0);
        assert_eq!(f.get_zwrap(0, 0, 3), 0.0);
    }

    #[test]
    fn arithmetic_is_elementwise() {
        let t = topo();
        let a = Field3D::from_fn(&t, |x, _, _| x as f64);
        let b = Field3D::from_fn(&t, |_, y, _| y as f64);
        let s = &a + &b;
        assert_eq!(s.get(3, 4, 0), 7.0);
        let p = &(&a * &b) * 2.0;
        assert_eq!(p.get(3, 4, 0), 24.0);
    }

    #[test]
    fn broadcast_from_2d() {
        let t = topo();
        let f2 = Field2D::from_fn(&t, |x, y| (x + y) as f64);
        let f3 = Field3D::from_fn(&t, |_, _, z| z as f64);
        let prod = f3.mul_2d(&f2);
        assert_eq!(prod.get(2, 3, 2), 10.0);
        let b = f2.broadcast_z(3);
        assert_eq!(b.get(2, 3, 1), 5.0);
    }
}

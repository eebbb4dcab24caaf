//! FieldGroup: the ordered set of fields taking part in one exchange.
//!
//! The group borrows its fields mutably for its whole lifetime, so the
//! borrow checker statically rules out touching a field, or adding it to a
//! second group, while an exchange over it is still pending.

use super::{Field2D, Field3D};

/// A borrowed reference to one field in a group.
///
/// The enum keeps 2D and 3D fields in a single ordered list so the packing
/// and unpacking passes walk them in exactly the same order.
#[derive(Debug)]
pub enum FieldRef<'a> {
    F2(&'a mut Field2D),
    F3(&'a mut Field3D),
}

impl FieldRef<'_> {
    /// Number of Z points this field contributes per (x, y) pair.
    #[inline]
    pub fn z_len(&self) -> usize {
        match self {
            FieldRef::F2(_) => 1,
            FieldRef::F3(f) => f.shape().2,
        }
    }

    /// Local (nx, ny, nz) shape, with nz = 1 for 2D fields.
    #[inline]
    pub fn shape(&self) -> (usize, usize, usize) {
        match self {
            FieldRef::F2(f) => {
                let (nx, ny) = f.shape();
                (nx, ny, 1)
            }
            FieldRef::F3(f) => f.shape(),
        }
    }
}

/// An ordered set of field references assembled for one exchange call.
#[derive(Debug, Default)]
pub struct FieldGroup<'a> {
    fields: Vec<FieldRef<'a>>,
    xz_only: bool,
}

impl<'a> FieldGroup<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request X-Z-only communication (no Y exchange) for this group.
    pub fn xz_only(mut self) -> Self {
        self.xz_only = true;
        self
    }

    pub fn add2d(mut self, f: &'a mut Field2D) -> Self {
        self.fields.push(FieldRef::F2(f));
        self
    }

    pub fn add3d(mut self, f: &'a mut Field3D) -> Self {
        self.fields.push(FieldRef::F3(f));
        self
    }

    #[inline]
    pub fn is_xz_only(&self) -> bool {
        self.xz_only
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldRef<'a>> {
        self.fields.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FieldRef<'a>> {
        self.fields.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::MeshOptions;
    use crate::topology::Topology;

    #[test]
    fn group_preserves_insertion_order() {
        let topo = Topology::serial(&MeshOptions::serial(4, 4, 2)).unwrap();
        let mut a = Field3D::zeros(&topo);
        let mut b = Field2D::zeros(&topo);
        let g = FieldGroup::new().add3d(&mut a).add2d(&mut b);
        let lens: Vec<_> = g.iter().map(|f| f.z_len()).collect();
        assert_eq!(lens, vec![2, 1]);
        assert!(!g.is_xz_only());
    }
}

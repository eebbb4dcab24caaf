//! Narrow interface to the grid-loading collaborator.
//!
//! The core never parses files. Everything it knows about the geometry
//! arrives through [`GridDataSource`]: named scalars and named per-point
//! arrays, with caller-supplied defaults when a variable is absent.
//! A lookup miss is a *recoverable* condition signalled through the return
//! value, never an abort.

use std::collections::HashMap;

use crate::error::{MeshHaloError, Result};
use crate::field::{Field2D, Field3D};
use crate::topology::Topology;

/// Outcome of a named-variable load: did the value come from the source or
/// from the supplied default?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    FromSource,
    Defaulted,
}

/// Source of named grid variables.
///
/// Implementations wrap a grid file reader, an options tree, or (in tests)
/// a plain map. Array variables are delivered already sliced to the local
/// subdomain described by the [`Topology`].
pub trait GridDataSource: Send + Sync {
    /// Does the source define `name`?
    fn has_var(&self, name: &str) -> bool;

    /// Fetch a named scalar, if present.
    fn get_scalar(&self, name: &str) -> Option<f64>;

    /// Fetch a named integer, if present.
    fn get_int(&self, name: &str) -> Option<i64>;

    /// Fill `out` with the local slice of the named 2D array.
    ///
    /// Returns `false` (leaving `out` untouched) when the variable is
    /// absent; implementations must not partially write on failure.
    fn get_field2d(&self, name: &str, topo: &Topology, out: &mut Field2D) -> bool;

    /// Fill `out` with the local slice of the named 3D array. Same
    /// contract as [`get_field2d`](Self::get_field2d).
    fn get_field3d(&self, name: &str, topo: &Topology, out: &mut Field3D) -> bool;
}

/// Load a scalar with a default, reporting where the value came from.
pub fn scalar_or(src: &dyn GridDataSource, name: &str, default: f64) -> (f64, LoadOutcome) {
    match src.get_scalar(name) {
        Some(v) => (v, LoadOutcome::FromSource),
        None => (default, LoadOutcome::Defaulted),
    }
}

/// Load a scalar that must be present.
pub fn scalar_required(src: &dyn GridDataSource, name: &str) -> Result<f64> {
    src.get_scalar(name)
        .ok_or_else(|| MeshHaloError::MissingVariable(name.to_string()))
}

/// Load a 2D field, filling with `default` when the source lacks it.
pub fn field2d_or(
    src: &dyn GridDataSource,
    name: &str,
    topo: &Topology,
    default: f64,
) -> (Field2D, LoadOutcome) {
    let mut f = Field2D::from_scalar(topo, default);
    if src.get_field2d(name, topo, &mut f) {
        (f, LoadOutcome::FromSource)
    } else {
        (f, LoadOutcome::Defaulted)
    }
}

/// Load a 3D field, filling with `default` when the source lacks it.
pub fn field3d_or(
    src: &dyn GridDataSource,
    name: &str,
    topo: &Topology,
    default: f64,
) -> (Field3D, LoadOutcome) {
    let mut f = Field3D::from_fn(topo, |_, _, _| default);
    if src.get_field3d(name, topo, &mut f) {
        (f, LoadOutcome::FromSource)
    } else {
        (f, LoadOutcome::Defaulted)
    }
}

/// In-memory source backed by maps; the configuration collaborator and the
/// unit tests both use this.
#[derive(Debug, Default, Clone)]
pub struct OptionsSource {
    scalars: HashMap<String, f64>,
    ints: HashMap<String, i64>,
    /// Uniform value per named field (enough for analytic test grids).
    uniform2d: HashMap<String, f64>,
    uniform3d: HashMap<String, f64>,
}

impl OptionsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_scalar(&mut self, name: &str, value: f64) -> &mut Self {
        self.scalars.insert(name.to_string(), value);
        self
    }

    pub fn set_int(&mut self, name: &str, value: i64) -> &mut Self {
        self.ints.insert(name.to_string(), value);
        self
    }

    pub fn set_uniform2d(&mut self, name: &str, value: f64) -> &mut Self {
        self.uniform2d.insert(name.to_string(), value);
        self
    }

    pub fn set_uniform3d(&mut self, name: &str, value: f64) -> &mut Self {
        self.uniform3d.insert(name.to_string(), value);
        self
    }
}

impl GridDataSource for OptionsSource {
    fn has_var(&self, name: &str) -> bool {
        self.scalars.contains_key(name)
            || self.ints.contains_key(name)
            || self.uniform2d.contains_key(name)
            || self.uniform3d.contains_key(name)
    }

    fn get_scalar(&self, name: &str) -> Option<f64> {
        self.scalars.get(name).copied()
    }

    fn get_int(&self, name: &str) -> Option<i64> {
        self.ints.get(name).copied()
    }

    fn get_field2d(&self, name: &str, _topo: &Topology, out: &mut Field2D) -> bool {
        match self.uniform2d.get(name) {
            Some(&v) => {
                out.fill(v);
                true
            }
            None => false,
        }
    }

    fn get_field3d(&self, name: &str, _topo: &Topology, out: &mut Field3D) -> bool {
        match self.uniform3d.get(name) {
            Some(&v) => {
                out.fill(v);
                true
            }
            None => false,
        }
    }
}

//! Finite-difference engine.
//!
//! Every operator here is a pure function of already-communicated fields:
//! the engine reads guard cells but never triggers an exchange, so callers
//! are responsible for communicating first. Index-space kernels
//! (`index_*`) difference with respect to the grid index; the physical
//! operators on [`DiffContext`] divide by the grid spacing from the
//! coordinate system.
//!
//! Output values are produced only where the stencil has data: interior
//! points in the differenced direction, the full local range in the other
//! directions. Z has no guard cells and wraps periodically instead.

use serde::{Deserialize, Serialize};

use crate::coords::{Coordinates, ParallelTransform};
use crate::error::{MeshHaloError, Result};
use crate::field::{CellLoc, Field2D, Field3D};
use crate::options::DerivDefaults;
use crate::topology::Topology;

/// First-derivative schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirstMethod {
    /// Second-order central.
    C2,
    /// Fourth-order central.
    C4,
}

/// Second-derivative schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecondMethod {
    C2,
    C4,
}

/// Advection (`v · ∂f`) schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpwindMethod {
    /// First-order upwind.
    U1,
    /// Second-order central.
    C2,
    /// Fourth-order central.
    C4,
}

/// Flux (`∂(v f)`) schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FluxMethod {
    /// Split into advection plus compression, each with its own default.
    Split,
    /// First-order upwind on face-averaged velocities.
    U1,
    C2,
    C4,
}

/// Five-point window along the differenced direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stencil {
    pub mm: f64,
    pub m: f64,
    pub c: f64,
    pub p: f64,
    pub pp: f64,
}

impl FirstMethod {
    fn half_width(self) -> usize {
        match self {
            Self::C2 => 1,
            Self::C4 => 2,
        }
    }

    fn eval(self, s: Stencil) -> f64 {
        match self {
            Self::C2 => 0.5 * (s.p - s.m),
            Self::C4 => (8.0 * (s.p - s.m) - (s.pp - s.mm)) / 12.0,
        }
    }

    /// Staggered variant on the half-offset window.
    fn eval_stag(self, s: Stencil) -> f64 {
        match self {
            Self::C2 => s.p - s.m,
            Self::C4 => (27.0 * (s.p - s.m) - (s.pp - s.mm)) / 24.0,
        }
    }
}

impl SecondMethod {
    fn half_width(self) -> usize {
        match self {
            Self::C2 => 1,
            Self::C4 => 2,
        }
    }

    fn eval(self, s: Stencil) -> f64 {
        match self {
            Self::C2 => s.p + s.m - 2.0 * s.c,
            Self::C4 => (-s.pp + 16.0 * s.p - 30.0 * s.c + 16.0 * s.m - s.mm) / 12.0,
        }
    }
}

impl UpwindMethod {
    fn half_width(self) -> usize {
        match self {
            Self::U1 | Self::C2 => 1,
            Self::C4 => 2,
        }
    }

    fn eval(self, v: f64, s: Stencil) -> f64 {
        match self {
            Self::U1 => {
                if v >= 0.0 {
                    v * (s.c - s.m)
                } else {
                    v * (s.p - s.c)
                }
            }
            Self::C2 => v * 0.5 * (s.p - s.m),
            Self::C4 => v * (8.0 * (s.p - s.m) - (s.pp - s.mm)) / 12.0,
        }
    }
}

impl FluxMethod {
    fn half_width(self) -> usize {
        match self {
            Self::Split => 2, // resolved before use; conservative bound
            Self::U1 | Self::C2 => 1,
            Self::C4 => 2,
        }
    }

    fn eval(self, v: Stencil, f: Stencil) -> f64 {
        match self {
            Self::Split => unreachable!("Split is expanded before evaluation"),
            Self::U1 => {
                // face-averaged velocities, first-order donor cell
                let vs_lo = 0.5 * (v.m + v.c);
                let vs_hi = 0.5 * (v.c + v.p);
                let lo = if vs_lo >= 0.0 { vs_lo * f.m } else { vs_lo * f.c };
                let hi = if vs_hi >= 0.0 { vs_hi * f.c } else { vs_hi * f.p };
                hi - lo
            }
            Self::C2 => 0.5 * (v.p * f.p - v.m * f.m),
            Self::C4 => (8.0 * (v.p * f.p - v.m * f.m) - (v.pp * f.pp - v.mm * f.mm)) / 12.0,
        }
    }
}

/// Direction of differencing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dir {
    X,
    Y,
    Z,
}

impl Dir {
    fn name(self) -> &'static str {
        match self {
            Dir::X => "x",
            Dir::Y => "y",
            Dir::Z => "z",
        }
    }

    fn staggered_loc(self) -> CellLoc {
        match self {
            Dir::X => CellLoc::XLow,
            Dir::Y => CellLoc::YLow,
            Dir::Z => CellLoc::ZLow,
        }
    }
}

/// How the stencil window is placed relative to the output point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shift {
    Aligned,
    /// Output sits half a cell below the input (centre -> low).
    Low,
    /// Output sits half a cell above the input (low -> centre).
    High,
}

/// Resolve an input/output location pair into a stencil shift.
fn resolve_shift(dir: Dir, inloc: CellLoc, outloc: CellLoc, stagger: bool) -> Result<Shift> {
    if inloc == outloc {
        return Ok(Shift::Aligned);
    }
    if !stagger {
        return Err(MeshHaloError::StaggerDisabled(outloc));
    }
    let low = dir.staggered_loc();
    match (inloc, outloc) {
        (CellLoc::Centre, to) if to == low => Ok(Shift::Low),
        (from, CellLoc::Centre) if from == low => Ok(Shift::High),
        (from, to) => Err(MeshHaloError::UnsupportedStagger { from, to }),
    }
}

fn check_guards(dir: Dir, required: usize, available: usize) -> Result<()> {
    // Z wraps periodically and never consumes guard cells.
    if dir != Dir::Z && required > available {
        return Err(MeshHaloError::StencilExceedsGuards {
            dir: dir.name(),
            required,
            available,
        });
    }
    Ok(())
}

/// Sample a five-point window along `dir` at output index `(x, y, z)`.
///
/// For the staggered shifts the window is offset by half a cell, so its
/// integer samples straddle the output point. Only the taps a method of
/// half-width `width` evaluates are sampled; the outermost taps of a
/// narrow window stay zero so a width-1 method never reads past a
/// single-cell guard region.
fn window3(f: &Field3D, dir: Dir, shift: Shift, width: usize, x: usize, y: usize, z: usize) -> Stencil {
    let (ix, iy, iz) = (x as isize, y as isize, z as isize);
    let at = |o: isize| -> f64 {
        match dir {
            Dir::X => f.get((ix + o) as usize, y, z),
            Dir::Y => f.get(x, (iy + o) as usize, z),
            Dir::Z => f.get_zwrap(x, y, iz + o),
        }
    };
    let outer = |o: isize| if width >= 2 { at(o) } else { 0.0 };
    match shift {
        Shift::Aligned => Stencil {
            mm: outer(-2),
            m: at(-1),
            c: at(0),
            p: at(1),
            pp: outer(2),
        },
        Shift::Low => Stencil {
            mm: outer(-2),
            m: at(-1),
            c: at(0),
            p: at(0),
            pp: outer(1),
        },
        Shift::High => Stencil {
            mm: outer(-1),
            m: at(0),
            c: at(0),
            p: at(1),
            pp: outer(2),
        },
    }
}

fn window2(f: &Field2D, dir: Dir, shift: Shift, width: usize, x: usize, y: usize) -> Stencil {
    let (ix, iy) = (x as isize, y as isize);
    let at = |o: isize| -> f64 {
        match dir {
            Dir::X => f.get((ix + o) as usize, y),
            Dir::Y => f.get(x, (iy + o) as usize),
            Dir::Z => f.get(x, y),
        }
    };
    let outer = |o: isize| if width >= 2 { at(o) } else { 0.0 };
    match shift {
        Shift::Aligned => Stencil {
            mm: outer(-2),
            m: at(-1),
            c: at(0),
            p: at(1),
            pp: outer(2),
        },
        Shift::Low => Stencil {
            mm: outer(-2),
            m: at(-1),
            c: at(0),
            p: at(0),
            pp: outer(1),
        },
        Shift::High => Stencil {
            mm: outer(-1),
            m: at(0),
            c: at(0),
            p: at(1),
            pp: outer(2),
        },
    }
}

/// Output index ranges for a derivative along `dir`.
///
/// The differenced direction is restricted to the interior; the other
/// directions cover the whole local array. `include_x_bndry` widens the X
/// range to everything, which is only valid for Z derivatives (no X
/// neighbours are read).
fn out_ranges(
    topo: &Topology,
    dir: Dir,
    include_x_bndry: bool,
) -> (std::ops::RangeInclusive<usize>, std::ops::RangeInclusive<usize>) {
    let all_x = 0..=topo.local_nx - 1;
    let all_y = 0..=topo.local_ny - 1;
    match dir {
        Dir::X => (topo.xstart..=topo.xend, all_y),
        Dir::Y => (all_x, topo.ystart..=topo.yend),
        Dir::Z => {
            if include_x_bndry {
                (all_x, all_y)
            } else {
                (topo.xstart..=topo.xend, all_y)
            }
        }
    }
}

fn apply3(
    topo: &Topology,
    f: &Field3D,
    dir: Dir,
    shift: Shift,
    width: usize,
    outloc: CellLoc,
    include_x_bndry: bool,
    eval: impl Fn(Stencil) -> f64,
) -> Field3D {
    let mut out = f.zeros_like();
    out.set_location(outloc);
    let (xr, yr) = out_ranges(topo, dir, include_x_bndry);
    for x in xr {
        for y in yr.clone() {
            for z in 0..topo.local_nz {
                out.set(x, y, z, eval(window3(f, dir, shift, width, x, y, z)));
            }
        }
    }
    out
}

fn apply2(
    topo: &Topology,
    f: &Field2D,
    dir: Dir,
    shift: Shift,
    width: usize,
    outloc: CellLoc,
    eval: impl Fn(Stencil) -> f64,
) -> Field2D {
    let mut out = f.zeros_like();
    out.set_location(outloc);
    let (xr, yr) = out_ranges(topo, dir, false);
    for x in xr {
        for y in yr.clone() {
            out.set(x, y, eval(window2(f, dir, shift, width, x, y)));
        }
    }
    out
}

fn guard_width(topo: &Topology, dir: Dir) -> usize {
    match dir {
        Dir::X => topo.mxg,
        Dir::Y => topo.myg,
        Dir::Z => usize::MAX,
    }
}

// --- index-space kernels, 3D ---

fn index_first3(
    topo: &Topology,
    f: &Field3D,
    dir: Dir,
    method: FirstMethod,
    outloc: CellLoc,
    stagger: bool,
    include_x_bndry: bool,
) -> Result<Field3D> {
    let shift = resolve_shift(dir, f.location(), outloc, stagger)?;
    check_guards(dir, method.half_width(), guard_width(topo, dir))?;
    let eval = move |s| match shift {
        Shift::Aligned => method.eval(s),
        _ => method.eval_stag(s),
    };
    Ok(apply3(
        topo,
        f,
        dir,
        shift,
        method.half_width(),
        outloc,
        include_x_bndry,
        eval,
    ))
}

fn index_second3(
    topo: &Topology,
    f: &Field3D,
    dir: Dir,
    method: SecondMethod,
    outloc: CellLoc,
    stagger: bool,
) -> Result<Field3D> {
    match resolve_shift(dir, f.location(), outloc, stagger)? {
        Shift::Aligned => {}
        // no half-offset variant exists for second derivatives
        _ => {
            return Err(MeshHaloError::UnsupportedStagger {
                from: f.location(),
                to: outloc,
            })
        }
    }
    check_guards(dir, method.half_width(), guard_width(topo, dir))?;
    Ok(apply3(
        topo,
        f,
        dir,
        Shift::Aligned,
        method.half_width(),
        outloc,
        false,
        move |s| method.eval(s),
    ))
}

fn index_fourth3(topo: &Topology, f: &Field3D, dir: Dir) -> Result<Field3D> {
    check_guards(dir, 2, guard_width(topo, dir))?;
    Ok(apply3(topo, f, dir, Shift::Aligned, 2, f.location(), false, |s| {
        s.pp - 4.0 * s.p + 6.0 * s.c - 4.0 * s.m + s.mm
    }))
}

fn index_upwind3(
    topo: &Topology,
    v: &Field3D,
    f: &Field3D,
    dir: Dir,
    method: UpwindMethod,
) -> Result<Field3D> {
    if v.location() != f.location() {
        return Err(MeshHaloError::LocationMismatch(v.location(), f.location()));
    }
    check_guards(dir, method.half_width(), guard_width(topo, dir))?;
    let mut out = f.zeros_like();
    let (xr, yr) = out_ranges(topo, dir, false);
    for x in xr {
        for y in yr.clone() {
            for z in 0..topo.local_nz {
                let s = window3(f, dir, Shift::Aligned, method.half_width(), x, y, z);
                out.set(x, y, z, method.eval(v.get(x, y, z), s));
            }
        }
    }
    Ok(out)
}

fn index_flux3(
    topo: &Topology,
    v: &Field3D,
    f: &Field3D,
    dir: Dir,
    method: FluxMethod,
    defaults: &DerivDefaults,
) -> Result<Field3D> {
    if v.location() != f.location() {
        return Err(MeshHaloError::LocationMismatch(v.location(), f.location()));
    }
    if method == FluxMethod::Split {
        // d(vf) = v df + f dv
        let adv = index_upwind3(topo, v, f, dir, defaults.upwind)?;
        let first = match dir {
            Dir::X => defaults.first_x,
            Dir::Y => defaults.first_y,
            Dir::Z => defaults.first_z,
        };
        let dv = index_first3(topo, v, dir, first, v.location(), false, false)?;
        return Ok(&adv + &f.zip_map(&dv, |a, b| a * b));
    }
    check_guards(dir, method.half_width(), guard_width(topo, dir))?;
    let mut out = f.zeros_like();
    let (xr, yr) = out_ranges(topo, dir, false);
    for x in xr {
        for y in yr.clone() {
            for z in 0..topo.local_nz {
                let sv = window3(v, dir, Shift::Aligned, method.half_width(), x, y, z);
                let sf = window3(f, dir, Shift::Aligned, method.half_width(), x, y, z);
                out.set(x, y, z, method.eval(sv, sf));
            }
        }
    }
    Ok(out)
}

// --- index-space kernels, 2D ---

fn index_first2(
    topo: &Topology,
    f: &Field2D,
    dir: Dir,
    method: FirstMethod,
    outloc: CellLoc,
    stagger: bool,
) -> Result<Field2D> {
    if dir == Dir::Z {
        // axisymmetric: d/dz vanishes identically
        let mut out = f.zeros_like();
        out.set_location(outloc);
        return Ok(out);
    }
    let shift = resolve_shift(dir, f.location(), outloc, stagger)?;
    check_guards(dir, method.half_width(), guard_width(topo, dir))?;
    let eval = move |s| match shift {
        Shift::Aligned => method.eval(s),
        _ => method.eval_stag(s),
    };
    Ok(apply2(topo, f, dir, shift, method.half_width(), outloc, eval))
}

fn index_second2(
    topo: &Topology,
    f: &Field2D,
    dir: Dir,
    method: SecondMethod,
) -> Result<Field2D> {
    if dir == Dir::Z {
        return Ok(f.zeros_like());
    }
    check_guards(dir, method.half_width(), guard_width(topo, dir))?;
    Ok(apply2(
        topo,
        f,
        dir,
        Shift::Aligned,
        method.half_width(),
        f.location(),
        move |s| method.eval(s),
    ))
}

fn index_upwind2(
    topo: &Topology,
    v: &Field2D,
    f: &Field2D,
    dir: Dir,
    method: UpwindMethod,
) -> Result<Field2D> {
    if v.location() != f.location() {
        return Err(MeshHaloError::LocationMismatch(v.location(), f.location()));
    }
    if dir == Dir::Z {
        return Ok(f.zeros_like());
    }
    check_guards(dir, method.half_width(), guard_width(topo, dir))?;
    let mut out = f.zeros_like();
    let (xr, yr) = out_ranges(topo, dir, false);
    for x in xr {
        for y in yr.clone() {
            let s = window2(f, dir, Shift::Aligned, method.half_width(), x, y);
            out.set(x, y, method.eval(v.get(x, y), s));
        }
    }
    Ok(out)
}

/// Everything the physical operators need, borrowed from one mesh.
///
/// Holding a `DiffContext` pins the coordinate system and the transform;
/// the mesh hands one out per call so the borrow cannot outlive either.
pub struct DiffContext<'a> {
    pub topo: &'a Topology,
    pub coords: &'a Coordinates,
    pub transform: &'a dyn ParallelTransform,
    pub defaults: DerivDefaults,
    pub stagger_grids: bool,
    /// X derivatives are taken in shifted coordinates; Curl must apply
    /// the shift-torsion correction.
    pub shift_x_derivs: bool,
}

impl<'a> DiffContext<'a> {
    /// Y differencing of 3D fields happens in the field-aligned basis.
    fn along_y3(
        &self,
        f: &Field3D,
        op: impl Fn(&Field3D) -> Result<Field3D>,
    ) -> Result<Field3D> {
        if self.transform.is_identity() {
            return op(f);
        }
        let fa = self.transform.to_field_aligned(f)?;
        let dfa = op(&fa)?;
        self.transform.from_field_aligned(&dfa)
    }

    // -- first derivatives --

    pub fn ddx(&self, f: &Field3D, outloc: CellLoc, method: Option<FirstMethod>) -> Result<Field3D> {
        let m = method.unwrap_or(self.defaults.first_x);
        let d = index_first3(self.topo, f, Dir::X, m, outloc, self.stagger_grids, false)?;
        Ok(d.div_2d(&self.coords.dx))
    }

    pub fn ddy(&self, f: &Field3D, outloc: CellLoc, method: Option<FirstMethod>) -> Result<Field3D> {
        let m = method.unwrap_or(self.defaults.first_y);
        let d = self.along_y3(f, |g| {
            index_first3(self.topo, g, Dir::Y, m, outloc, self.stagger_grids, false)
        })?;
        Ok(d.div_2d(&self.coords.dy))
    }

    pub fn ddz(
        &self,
        f: &Field3D,
        outloc: CellLoc,
        method: Option<FirstMethod>,
        include_x_bndry: bool,
    ) -> Result<Field3D> {
        let m = method.unwrap_or(self.defaults.first_z);
        let d = index_first3(
            self.topo,
            f,
            Dir::Z,
            m,
            outloc,
            self.stagger_grids,
            include_x_bndry,
        )?;
        Ok(&d * (1.0 / self.coords.dz))
    }

    pub fn ddx_2d(&self, f: &Field2D, outloc: CellLoc, method: Option<FirstMethod>) -> Result<Field2D> {
        let m = method.unwrap_or(self.defaults.first_x);
        let d = index_first2(self.topo, f, Dir::X, m, outloc, self.stagger_grids)?;
        Ok(d.zip_map(&self.coords.dx, |a, b| a / b))
    }

    pub fn ddy_2d(&self, f: &Field2D, outloc: CellLoc, method: Option<FirstMethod>) -> Result<Field2D> {
        let m = method.unwrap_or(self.defaults.first_y);
        let d = index_first2(self.topo, f, Dir::Y, m, outloc, self.stagger_grids)?;
        Ok(d.zip_map(&self.coords.dy, |a, b| a / b))
    }

    pub fn ddz_2d(&self, f: &Field2D) -> Result<Field2D> {
        index_first2(
            self.topo,
            f,
            Dir::Z,
            self.defaults.first_z,
            f.location(),
            self.stagger_grids,
        )
    }

    // -- second derivatives --

    pub fn d2dx2(&self, f: &Field3D, method: Option<SecondMethod>) -> Result<Field3D> {
        let m = method.unwrap_or(self.defaults.second_x);
        let d = index_second3(self.topo, f, Dir::X, m, f.location(), self.stagger_grids)?;
        let mut out = d.div_2d(&self.coords.dx.zip_map(&self.coords.dx, |a, b| a * b));
        // chain-rule correction for non-uniform spacing
        if self.coords.d1_dx.values().any(|v| v != 0.0) {
            let d1 = index_first3(
                self.topo,
                f,
                Dir::X,
                self.defaults.first_x,
                f.location(),
                self.stagger_grids,
                false,
            )?;
            out = &out + &d1.mul_2d(&self.coords.d1_dx);
        }
        Ok(out)
    }

    pub fn d2dy2(&self, f: &Field3D, method: Option<SecondMethod>) -> Result<Field3D> {
        let m = method.unwrap_or(self.defaults.second_y);
        let d = self.along_y3(f, |g| {
            index_second3(self.topo, g, Dir::Y, m, g.location(), self.stagger_grids)
        })?;
        let mut out = d.div_2d(&self.coords.dy.zip_map(&self.coords.dy, |a, b| a * b));
        if self.coords.d1_dy.values().any(|v| v != 0.0) {
            let d1 = self.along_y3(f, |g| {
                index_first3(
                    self.topo,
                    g,
                    Dir::Y,
                    self.defaults.first_y,
                    g.location(),
                    self.stagger_grids,
                    false,
                )
            })?;
            out = &out + &d1.mul_2d(&self.coords.d1_dy);
        }
        Ok(out)
    }

    pub fn d2dz2(&self, f: &Field3D, method: Option<SecondMethod>) -> Result<Field3D> {
        let m = method.unwrap_or(self.defaults.second_z);
        let d = index_second3(self.topo, f, Dir::Z, m, f.location(), self.stagger_grids)?;
        Ok(&d * (1.0 / (self.coords.dz * self.coords.dz)))
    }

    pub fn d2dx2_2d(&self, f: &Field2D, method: Option<SecondMethod>) -> Result<Field2D> {
        let m = method.unwrap_or(self.defaults.second_x);
        let d = index_second2(self.topo, f, Dir::X, m)?;
        let mut out = d.zip_map(&self.coords.dx, |a, b| a / (b * b));
        if self.coords.d1_dx.values().any(|v| v != 0.0) {
            let d1 = index_first2(
                self.topo,
                f,
                Dir::X,
                self.defaults.first_x,
                f.location(),
                self.stagger_grids,
            )?;
            out = &out + &d1.zip_map(&self.coords.d1_dx, |a, b| a * b);
        }
        Ok(out)
    }

    pub fn d2dy2_2d(&self, f: &Field2D, method: Option<SecondMethod>) -> Result<Field2D> {
        let m = method.unwrap_or(self.defaults.second_y);
        let d = index_second2(self.topo, f, Dir::Y, m)?;
        let mut out = d.zip_map(&self.coords.dy, |a, b| a / (b * b));
        if self.coords.d1_dy.values().any(|v| v != 0.0) {
            let d1 = index_first2(
                self.topo,
                f,
                Dir::Y,
                self.defaults.first_y,
                f.location(),
                self.stagger_grids,
            )?;
            out = &out + &d1.zip_map(&self.coords.d1_dy, |a, b| a * b);
        }
        Ok(out)
    }

    // -- fourth derivatives (index-space numerators over h^4) --

    pub fn d4dx4(&self, f: &Field3D) -> Result<Field3D> {
        let d = index_fourth3(self.topo, f, Dir::X)?;
        Ok(d.div_2d(&self.coords.dx.map(|h| h * h * h * h)))
    }

    pub fn d4dy4(&self, f: &Field3D) -> Result<Field3D> {
        let d = self.along_y3(f, |g| index_fourth3(self.topo, g, Dir::Y))?;
        Ok(d.div_2d(&self.coords.dy.map(|h| h * h * h * h)))
    }

    pub fn d4dz4(&self, f: &Field3D) -> Result<Field3D> {
        let d = index_fourth3(self.topo, f, Dir::Z)?;
        Ok(&d * (1.0 / self.coords.dz.powi(4)))
    }

    // -- advection --

    pub fn vddx(&self, v: &Field3D, f: &Field3D, method: Option<UpwindMethod>) -> Result<Field3D> {
        let m = method.unwrap_or(self.defaults.upwind);
        let d = index_upwind3(self.topo, v, f, Dir::X, m)?;
        Ok(d.div_2d(&self.coords.dx))
    }

    pub fn vddy(&self, v: &Field3D, f: &Field3D, method: Option<UpwindMethod>) -> Result<Field3D> {
        let m = method.unwrap_or(self.defaults.upwind);
        if v.location() != f.location() {
            return Err(MeshHaloError::LocationMismatch(v.location(), f.location()));
        }
        let d = if self.transform.is_identity() {
            index_upwind3(self.topo, v, f, Dir::Y, m)?
        } else {
            let va = self.transform.to_field_aligned(v)?;
            let fa = self.transform.to_field_aligned(f)?;
            let da = index_upwind3(self.topo, &va, &fa, Dir::Y, m)?;
            self.transform.from_field_aligned(&da)?
        };
        Ok(d.div_2d(&self.coords.dy))
    }

    pub fn vddz(&self, v: &Field3D, f: &Field3D, method: Option<UpwindMethod>) -> Result<Field3D> {
        let m = method.unwrap_or(self.defaults.upwind);
        let d = index_upwind3(self.topo, v, f, Dir::Z, m)?;
        Ok(&d * (1.0 / self.coords.dz))
    }

    pub fn vddx_2d(&self, v: &Field2D, f: &Field2D, method: Option<UpwindMethod>) -> Result<Field2D> {
        let m = method.unwrap_or(self.defaults.upwind);
        let d = index_upwind2(self.topo, v, f, Dir::X, m)?;
        Ok(d.zip_map(&self.coords.dx, |a, b| a / b))
    }

    pub fn vddy_2d(&self, v: &Field2D, f: &Field2D, method: Option<UpwindMethod>) -> Result<Field2D> {
        let m = method.unwrap_or(self.defaults.upwind);
        let d = index_upwind2(self.topo, v, f, Dir::Y, m)?;
        Ok(d.zip_map(&self.coords.dy, |a, b| a / b))
    }

    // -- flux --

    pub fn fddx(&self, v: &Field3D, f: &Field3D, method: Option<FluxMethod>) -> Result<Field3D> {
        let m = method.unwrap_or(self.defaults.flux);
        let d = index_flux3(self.topo, v, f, Dir::X, m, &self.defaults)?;
        Ok(d.div_2d(&self.coords.dx))
    }

    pub fn fddy(&self, v: &Field3D, f: &Field3D, method: Option<FluxMethod>) -> Result<Field3D> {
        let m = method.unwrap_or(self.defaults.flux);
        if v.location() != f.location() {
            return Err(MeshHaloError::LocationMismatch(v.location(), f.location()));
        }
        let d = if self.transform.is_identity() {
            index_flux3(self.topo, v, f, Dir::Y, m, &self.defaults)?
        } else {
            let va = self.transform.to_field_aligned(v)?;
            let fa = self.transform.to_field_aligned(f)?;
            let da = index_flux3(self.topo, &va, &fa, Dir::Y, m, &self.defaults)?;
            self.transform.from_field_aligned(&da)?
        };
        Ok(d.div_2d(&self.coords.dy))
    }

    pub fn fddz(&self, v: &Field3D, f: &Field3D, method: Option<FluxMethod>) -> Result<Field3D> {
        let m = method.unwrap_or(self.defaults.flux);
        let d = index_flux3(self.topo, v, f, Dir::Z, m, &self.defaults)?;
        Ok(&d * (1.0 / self.coords.dz))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::IdentityTransform;
    use crate::options::MeshOptions;
    use crate::source::OptionsSource;

    fn fixture(nz: usize) -> (Topology, Coordinates) {
        let topo = Topology::serial(&MeshOptions::serial(8, 8, nz)).unwrap();
        let mut src = OptionsSource::new();
        src.set_scalar("dz", 1.0);
        let coords = Coordinates::from_source(&topo, &src, CellLoc::Centre).unwrap();
        (topo, coords)
    }

    fn ctx<'a>(topo: &'a Topology, coords: &'a Coordinates) -> DiffContext<'a> {
        DiffContext {
            topo,
            coords,
            transform: &IdentityTransform,
            defaults: DerivDefaults::default(),
            stagger_grids: false,
            shift_x_derivs: false,
        }
    }

    #[test]
    fn ddx_exact_on_linear_field() {
        let (topo, coords) = fixture(4);
        let c = ctx(&topo, &coords);
        let f = Field3D::from_fn(&topo, |x, _, _| 3.0 * x as f64 + 1.0);
        let d = c.ddx(&f, CellLoc::Centre, None).unwrap();
        for x in topo.xstart..=topo.xend {
            assert!((d.get(x, 3, 0) - 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn c4_beats_c2_on_cubic() {
        let (topo, coords) = fixture(1);
        let c = ctx(&topo, &coords);
        let f = Field3D::from_fn(&topo, |x, _, _| (x as f64).powi(3));
        let d4 = c.ddx(&f, CellLoc::Centre, Some(FirstMethod::C4)).unwrap();
        // C4 is exact for cubics
        for x in topo.xstart..=topo.xend {
            let want = 3.0 * (x as f64).powi(2);
            assert!((d4.get(x, 2, 0) - want).abs() < 1e-9);
        }
    }

    #[test]
    fn d2dz2_on_harmonic_wraps_periodically() {
        let (topo, _) = fixture(16);
        let mut src = OptionsSource::new();
        src.set_scalar("dz", std::f64::consts::TAU / 16.0);
        let coords = Coordinates::from_source(&topo, &src, CellLoc::Centre).unwrap();
        let c = ctx(&topo, &coords);
        let dz = coords.dz;
        let f = Field3D::from_fn(&topo, |_, _, z| (dz * z as f64).sin());
        let d2 = c.d2dz2(&f, None).unwrap();
        // second difference of sin(kz): -(2 - 2 cos(k dz))/dz^2 * sin(kz)
        let factor = -(2.0 - 2.0 * dz.cos()) / (dz * dz);
        for z in 0..16 {
            let want = factor * (dz * z as f64).sin();
            assert!((d2.get(3, 3, z) - want).abs() < 1e-10);
        }
    }

    #[test]
    fn upwind_picks_side_by_velocity_sign() {
        let (topo, coords) = fixture(1);
        let c = ctx(&topo, &coords);
        let f = Field3D::from_fn(&topo, |x, _, _| (x * x) as f64);
        let vpos = Field3D::from_fn(&topo, |_, _, _| 2.0);
        let vneg = Field3D::from_fn(&topo, |_, _, _| -2.0);
        let x = topo.xstart + 1;
        let up = c.vddx(&vpos, &f, Some(UpwindMethod::U1)).unwrap();
        let dn = c.vddx(&vneg, &f, Some(UpwindMethod::U1)).unwrap();
        let fx = |x: usize| (x * x) as f64;
        assert_eq!(up.get(x, 2, 0), 2.0 * (fx(x) - fx(x - 1)));
        assert_eq!(dn.get(x, 2, 0), -2.0 * (fx(x + 1) - fx(x)));
    }

    #[test]
    fn flux_split_matches_product_rule_on_smooth_fields() {
        let (topo, coords) = fixture(1);
        let c = ctx(&topo, &coords);
        // constant v: flux reduces to v * df/dx for every scheme
        let v = Field3D::from_fn(&topo, |_, _, _| 1.5);
        let f = Field3D::from_fn(&topo, |x, _, _| 2.0 * x as f64);
        let split = c.fddx(&v, &f, Some(FluxMethod::Split)).unwrap();
        let central = c.fddx(&v, &f, Some(FluxMethod::C2)).unwrap();
        for x in topo.xstart..=topo.xend {
            assert!((split.get(x, 3, 0) - 3.0).abs() < 1e-12);
            assert!((central.get(x, 3, 0) - 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn staggered_requests_rejected_when_disabled() {
        let (topo, coords) = fixture(1);
        let c = ctx(&topo, &coords);
        let f = Field3D::zeros(&topo);
        let err = c.ddx(&f, CellLoc::XLow, None).unwrap_err();
        assert!(matches!(err, MeshHaloError::StaggerDisabled(CellLoc::XLow)));
    }

    #[test]
    fn staggered_first_derivative_centre_to_xlow() {
        let (topo, coords) = fixture(1);
        let mut c = ctx(&topo, &coords);
        c.stagger_grids = true;
        let f = Field3D::from_fn(&topo, |x, _, _| x as f64 * x as f64);
        let d = c.ddx(&f, CellLoc::XLow, Some(FirstMethod::C2)).unwrap();
        assert_eq!(d.location(), CellLoc::XLow);
        // derivative of x^2 at x - 1/2 is 2x - 1, exact for C2 stag
        for x in topo.xstart..=topo.xend {
            assert!((d.get(x, 2, 0) - (2.0 * x as f64 - 1.0)).abs() < 1e-12);
        }
    }

    #[test]
    fn staggered_second_derivative_unsupported() {
        let (topo, coords) = fixture(1);
        let mut c = ctx(&topo, &coords);
        c.stagger_grids = true;
        let mut f = Field3D::zeros(&topo);
        f.set_location(CellLoc::XLow);
        let err = c.d2dx2(&f, None);
        // d2dx2 differentiates onto the input location, so force a shift
        // through the generic entry point instead
        assert!(err.is_ok());
        let e = index_second3(&topo, &f, Dir::X, SecondMethod::C2, CellLoc::Centre, true)
            .unwrap_err();
        assert!(matches!(e, MeshHaloError::UnsupportedStagger { .. }));
    }

    #[test]
    fn narrow_guards_reject_wide_stencil() {
        let mut opts = MeshOptions::serial(8, 8, 1);
        opts.mxg = 1;
        opts.myg = 1;
        let topo = Topology::serial(&opts).unwrap();
        let coords =
            Coordinates::from_source(&topo, &OptionsSource::new(), CellLoc::Centre).unwrap();
        let c = ctx(&topo, &coords);
        let f = Field3D::zeros(&topo);
        let err = c.ddx(&f, CellLoc::Centre, Some(FirstMethod::C4)).unwrap_err();
        assert!(matches!(
            err,
            MeshHaloError::StencilExceedsGuards {
                dir: "x",
                required: 2,
                available: 1
            }
        ));
    }

    #[test]
    fn narrow_methods_work_with_single_guard_cell() {
        let mut opts = MeshOptions::serial(8, 8, 2);
        opts.mxg = 1;
        opts.myg = 1;
        let topo = Topology::serial(&opts).unwrap();
        let mut src = OptionsSource::new();
        src.set_scalar("dz", 1.0);
        let coords = Coordinates::from_source(&topo, &src, CellLoc::Centre).unwrap();
        let c = ctx(&topo, &coords);

        let f = Field3D::from_fn(&topo, |x, y, _| (3 * x + 2 * y) as f64);
        let dx = c.ddx(&f, CellLoc::Centre, Some(FirstMethod::C2)).unwrap();
        let dy = c.ddy(&f, CellLoc::Centre, Some(FirstMethod::C2)).unwrap();
        for x in topo.xstart..=topo.xend {
            assert!((dx.get(x, topo.ystart, 0) - 3.0).abs() < 1e-12);
        }
        for y in topo.ystart..=topo.yend {
            assert!((dy.get(topo.xstart, y, 0) - 2.0).abs() < 1e-12);
        }

        let v = Field3D::from_fn(&topo, |_, _, _| 1.0);
        let a = c.vddx(&v, &f, Some(UpwindMethod::U1)).unwrap();
        assert!((a.get(topo.xstart, topo.ystart, 0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn axisymmetric_z_derivative_vanishes() {
        let (topo, coords) = fixture(4);
        let c = ctx(&topo, &coords);
        let f = Field2D::from_fn(&topo, |x, y| (x + y) as f64);
        let d = c.ddz_2d(&f).unwrap();
        assert!(d.values().all(|v| v == 0.0));
    }
}

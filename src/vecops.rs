//! Differential operators on scalar and vector fields.
//!
//! All operators are basis-aware: gradients come out covariant, Curl comes
//! out contravariant, and inputs are converted to whatever basis the
//! operator contracts in. The formulas are the standard curvilinear ones
//! built from the metric, the Jacobian and the connection coefficients of
//! the [`Coordinates`] in the supplied [`DiffContext`].
//!
//! Like the derivative engine underneath, nothing here communicates;
//! guard cells must be up to date before calling.

use crate::deriv::DiffContext;
use crate::error::Result;
use crate::field::{CellLoc, Field2D, Field3D, Vector2D, Vector3D};

/// Covariant gradient of a scalar.
pub fn grad(ctx: &DiffContext, f: &Field3D, outloc: CellLoc) -> Result<Vector3D> {
    Ok(Vector3D {
        x: ctx.ddx(f, outloc, None)?,
        y: ctx.ddy(f, outloc, None)?,
        z: ctx.ddz(f, outloc, None, false)?,
        covariant: true,
    })
}

/// Covariant gradient of an axisymmetric scalar.
pub fn grad_2d(ctx: &DiffContext, f: &Field2D) -> Result<Vector2D> {
    Ok(Vector2D {
        x: ctx.ddx_2d(f, f.location(), None)?,
        y: ctx.ddy_2d(f, f.location(), None)?,
        z: f.zeros_like(),
        covariant: true,
    })
}

/// Gradient with the parallel (Y) part projected out.
///
/// The X and Z covariant components pick up the metric cross-terms
/// `g_12 ∂f/∂y / (J Bxy)²` and `g_23 ∂f/∂y / (J Bxy)²`; the Y component
/// is dropped entirely.
pub fn grad_perp(ctx: &DiffContext, f: &Field3D) -> Result<Vector3D> {
    let c = ctx.coords;
    let loc = f.location();
    let dfdx = ctx.ddx(f, loc, None)?;
    let dfdy = ctx.ddy(f, loc, None)?;
    let dfdz = ctx.ddz(f, loc, None, false)?;

    let jb2 = c.j.zip_map(&c.bxy, |j, b| (j * b) * (j * b));
    let ratio_x = c.g_12.zip_map(&jb2, |a, b| a / b);
    let ratio_z = c.g_23.zip_map(&jb2, |a, b| a / b);
    Ok(Vector3D {
        x: &dfdx - &dfdy.mul_2d(&ratio_x),
        y: dfdx.zeros_like(),
        z: &dfdz - &dfdy.mul_2d(&ratio_z),
        covariant: true,
    })
}

/// Divergence of a vector field.
///
/// Contracts in the contravariant basis: `Div v = (1/J) ∂_i (J v^i)`.
/// The Jacobian weighting is applied *before* differencing, so the
/// discrete operator telescopes (conservation form).
pub fn div(ctx: &DiffContext, v: &Vector3D) -> Result<Field3D> {
    let c = ctx.coords;
    let mut vcn = v.clone();
    vcn.to_contravariant(c);
    let loc = vcn.x.location();

    let dx = ctx.ddx(&vcn.x.mul_2d(&c.j), loc, None)?;
    let dy = ctx.ddy(&vcn.y.mul_2d(&c.j), loc, None)?;
    let dz = ctx.ddz(&vcn.z.mul_2d(&c.j), loc, None, false)?;
    Ok((&(&dx + &dy) + &dz).div_2d(&c.j))
}

/// Divergence of an axisymmetric vector field.
pub fn div_2d(ctx: &DiffContext, v: &Vector2D) -> Result<Field2D> {
    let c = ctx.coords;
    let mut vcn = v.clone();
    vcn.to_contravariant(c);
    let loc = vcn.x.location();

    let dx = ctx.ddx_2d(&(&vcn.x * &c.j), loc, None)?;
    let dy = ctx.ddy_2d(&(&vcn.y * &c.j), loc, None)?;
    // Z derivative of an axisymmetric field vanishes
    Ok((&dx + &dy).zip_map(&c.j, |a, b| a / b))
}

/// Conservative divergence of the flux `v f`, using the flux schemes.
pub fn div_flux(ctx: &DiffContext, v: &Vector3D, f: &Field3D) -> Result<Field3D> {
    let c = ctx.coords;
    let mut vcn = v.clone();
    vcn.to_contravariant(c);

    let fx = ctx.fddx(&vcn.x.mul_2d(&c.j), f, None)?;
    let fy = ctx.fddy(&vcn.y.mul_2d(&c.j), f, None)?;
    let fz = ctx.fddz(&vcn.z.mul_2d(&c.j), f, None)?;
    Ok((&(&fx + &fy) + &fz).div_2d(&c.j))
}

/// Curl of a vector field; result is contravariant.
///
/// When X derivatives are taken in shifted coordinates the Z component
/// picks up the shift-torsion correction.
pub fn curl(ctx: &DiffContext, v: &Vector3D) -> Result<Vector3D> {
    let c = ctx.coords;
    let mut vco = v.clone();
    vco.to_covariant(c);
    let loc = vco.x.location();

    let x = &ctx.ddy(&vco.z, loc, None)? - &ctx.ddz(&vco.y, loc, None, false)?;
    let y = &ctx.ddz(&vco.x, loc, None, false)? - &ctx.ddx(&vco.z, loc, None)?;
    let mut z = &ctx.ddx(&vco.y, loc, None)? - &ctx.ddy(&vco.x, loc, None)?;
    if ctx.shift_x_derivs {
        z = &z - &vco.z.mul_2d(&c.shift_torsion);
    }
    Ok(Vector3D {
        x: x.div_2d(&c.j),
        y: y.div_2d(&c.j),
        z: z.div_2d(&c.j),
        covariant: false,
    })
}

/// Curl of an axisymmetric vector field; result is contravariant.
pub fn curl_2d(ctx: &DiffContext, v: &Vector2D) -> Result<Vector2D> {
    let c = ctx.coords;
    let mut vco = v.clone();
    vco.to_covariant(c);
    let loc = vco.x.location();

    // Z derivatives of axisymmetric components vanish
    let x = ctx.ddy_2d(&vco.z, loc, None)?;
    let y = -&ctx.ddx_2d(&vco.z, loc, None)?;
    let mut z = &ctx.ddx_2d(&vco.y, loc, None)? - &ctx.ddy_2d(&vco.x, loc, None)?;
    if ctx.shift_x_derivs {
        z = &z - &(&vco.z * &c.shift_torsion);
    }
    Ok(Vector2D {
        x: x.zip_map(&c.j, |a, b| a / b),
        y: y.zip_map(&c.j, |a, b| a / b),
        z: z.zip_map(&c.j, |a, b| a / b),
        covariant: false,
    })
}

/// Advection of a scalar: `v · ∇f`, contracting with contravariant `v`.
pub fn v_dot_grad(ctx: &DiffContext, v: &Vector3D, f: &Field3D) -> Result<Field3D> {
    let mut vcn = v.clone();
    vcn.to_contravariant(ctx.coords);
    let ax = ctx.vddx(&vcn.x, f, None)?;
    let ay = ctx.vddy(&vcn.y, f, None)?;
    let az = ctx.vddz(&vcn.z, f, None)?;
    Ok(&(&ax + &ay) + &az)
}

/// Advection of an axisymmetric scalar.
pub fn v_dot_grad_2d(ctx: &DiffContext, v: &Vector2D, f: &Field2D) -> Result<Field2D> {
    let mut vcn = v.clone();
    vcn.to_contravariant(ctx.coords);
    let ax = ctx.vddx_2d(&vcn.x, f, None)?;
    let ay = ctx.vddy_2d(&vcn.y, f, None)?;
    Ok(&ax + &ay)
}

/// Advection of a vector: `(v · ∇) a`.
///
/// The connection-coefficient terms depend on the basis of `a`, and the
/// result is delivered in that same basis.
pub fn v_dot_grad_vec(ctx: &DiffContext, v: &Vector3D, a: &Vector3D) -> Result<Vector3D> {
    let c = ctx.coords;
    let mut vcn = v.clone();
    vcn.to_contravariant(c);

    let adv = |comp: &Field3D| -> Result<Field3D> {
        let ax = ctx.vddx(&vcn.x, comp, None)?;
        let ay = ctx.vddy(&vcn.y, comp, None)?;
        let az = ctx.vddz(&vcn.z, comp, None)?;
        Ok(&(&ax + &ay) + &az)
    };

    let g = &c.christoffel;
    // contraction of one connection row with the components of `a`
    let row = |g1: &Field2D, g2: &Field2D, g3: &Field2D| -> Field3D {
        &(&a.x.mul_2d(g1) + &a.y.mul_2d(g2)) + &a.z.mul_2d(g3)
    };

    if a.covariant {
        // (v·∇a)_i = v^j ∂_j a_i - v^j Γ^k_{ji} a_k
        let x = &adv(&a.x)?
            - &(&(&vcn.x.zip_map(&row(&g.gamma1_11, &g.gamma2_11, &g.gamma3_11), |u, w| u * w)
                + &vcn.y.zip_map(&row(&g.gamma1_12, &g.gamma2_12, &g.gamma3_12), |u, w| u * w))
                + &vcn.z.zip_map(&row(&g.gamma1_13, &g.gamma2_13, &g.gamma3_13), |u, w| u * w));
        let y = &adv(&a.y)?
            - &(&(&vcn.x.zip_map(&row(&g.gamma1_12, &g.gamma2_12, &g.gamma3_12), |u, w| u * w)
                + &vcn.y.zip_map(&row(&g.gamma1_22, &g.gamma2_22, &g.gamma3_22), |u, w| u * w))
                + &vcn.z.zip_map(&row(&g.gamma1_23, &g.gamma2_23, &g.gamma3_23), |u, w| u * w));
        let z = &adv(&a.z)?
            - &(&(&vcn.x.zip_map(&row(&g.gamma1_13, &g.gamma2_13, &g.gamma3_13), |u, w| u * w)
                + &vcn.y.zip_map(&row(&g.gamma1_23, &g.gamma2_23, &g.gamma3_23), |u, w| u * w))
                + &vcn.z.zip_map(&row(&g.gamma1_33, &g.gamma2_33, &g.gamma3_33), |u, w| u * w));
        Ok(Vector3D {
            x,
            y,
            z,
            covariant: true,
        })
    } else {
        // (v·∇a)^i = v^j ∂_j a^i + v^j Γ^i_{jk} a^k
        let x = &adv(&a.x)?
            + &(&(&vcn.x.zip_map(&row(&g.gamma1_11, &g.gamma1_12, &g.gamma1_13), |u, w| u * w)
                + &vcn.y.zip_map(&row(&g.gamma1_12, &g.gamma1_22, &g.gamma1_23), |u, w| u * w))
                + &vcn.z.zip_map(&row(&g.gamma1_13, &g.gamma1_23, &g.gamma1_33), |u, w| u * w));
        let y = &adv(&a.y)?
            + &(&(&vcn.x.zip_map(&row(&g.gamma2_11, &g.gamma2_12, &g.gamma2_13), |u, w| u * w)
                + &vcn.y.zip_map(&row(&g.gamma2_12, &g.gamma2_22, &g.gamma2_23), |u, w| u * w))
                + &vcn.z.zip_map(&row(&g.gamma2_13, &g.gamma2_23, &g.gamma2_33), |u, w| u * w));
        let z = &adv(&a.z)?
            + &(&(&vcn.x.zip_map(&row(&g.gamma3_11, &g.gamma3_12, &g.gamma3_13), |u, w| u * w)
                + &vcn.y.zip_map(&row(&g.gamma3_12, &g.gamma3_22, &g.gamma3_23), |u, w| u * w))
                + &vcn.z.zip_map(&row(&g.gamma3_13, &g.gamma3_23, &g.gamma3_33), |u, w| u * w));
        Ok(Vector3D {
            x,
            y,
            z,
            covariant: false,
        })
    }
}

/// Advection of an axisymmetric vector by an axisymmetric flow.
pub fn v_dot_grad_vec_2d(ctx: &DiffContext, v: &Vector2D, a: &Vector2D) -> Result<Vector2D> {
    let c = ctx.coords;
    let mut vcn = v.clone();
    vcn.to_contravariant(c);

    let adv = |comp: &Field2D| -> Result<Field2D> {
        let ax = ctx.vddx_2d(&vcn.x, comp, None)?;
        let ay = ctx.vddy_2d(&vcn.y, comp, None)?;
        // Z advection of an axisymmetric component vanishes
        Ok(&ax + &ay)
    };

    let g = &c.christoffel;
    let row = |g1: &Field2D, g2: &Field2D, g3: &Field2D| -> Field2D {
        &(&(&a.x * g1) + &(&a.y * g2)) + &(&a.z * g3)
    };
    // contract the three row sums with v^1, v^2, v^3
    let contract = |r1: &Field2D, r2: &Field2D, r3: &Field2D| -> Field2D {
        &(&(&vcn.x * r1) + &(&vcn.y * r2)) + &(&vcn.z * r3)
    };

    if a.covariant {
        // (v·∇a)_i = v^j ∂_j a_i - v^j Γ^k_{ji} a_k
        let x = &adv(&a.x)?
            - &contract(
                &row(&g.gamma1_11, &g.gamma2_11, &g.gamma3_11),
                &row(&g.gamma1_12, &g.gamma2_12, &g.gamma3_12),
                &row(&g.gamma1_13, &g.gamma2_13, &g.gamma3_13),
            );
        let y = &adv(&a.y)?
            - &contract(
                &row(&g.gamma1_12, &g.gamma2_12, &g.gamma3_12),
                &row(&g.gamma1_22, &g.gamma2_22, &g.gamma3_22),
                &row(&g.gamma1_23, &g.gamma2_23, &g.gamma3_23),
            );
        let z = &adv(&a.z)?
            - &contract(
                &row(&g.gamma1_13, &g.gamma2_13, &g.gamma3_13),
                &row(&g.gamma1_23, &g.gamma2_23, &g.gamma3_23),
                &row(&g.gamma1_33, &g.gamma2_33, &g.gamma3_33),
            );
        Ok(Vector2D {
            x,
            y,
            z,
            covariant: true,
        })
    } else {
        // (v·∇a)^i = v^j ∂_j a^i + v^j Γ^i_{jk} a^k
        let x = &adv(&a.x)?
            + &contract(
                &row(&g.gamma1_11, &g.gamma1_12, &g.gamma1_13),
                &row(&g.gamma1_12, &g.gamma1_22, &g.gamma1_23),
                &row(&g.gamma1_13, &g.gamma1_23, &g.gamma1_33),
            );
        let y = &adv(&a.y)?
            + &contract(
                &row(&g.gamma2_11, &g.gamma2_12, &g.gamma2_13),
                &row(&g.gamma2_12, &g.gamma2_22, &g.gamma2_23),
                &row(&g.gamma2_13, &g.gamma2_23, &g.gamma2_33),
            );
        let z = &adv(&a.z)?
            + &contract(
                &row(&g.gamma3_11, &g.gamma3_12, &g.gamma3_13),
                &row(&g.gamma3_12, &g.gamma3_22, &g.gamma3_23),
                &row(&g.gamma3_13, &g.gamma3_23, &g.gamma3_33),
            );
        Ok(Vector2D {
            x,
            y,
            z,
            covariant: false,
        })
    }
}

fn broadcast_vec(v: &Vector2D, nz: usize) -> Vector3D {
    Vector3D {
        x: v.x.broadcast_z(nz),
        y: v.y.broadcast_z(nz),
        z: v.z.broadcast_z(nz),
        covariant: v.covariant,
    }
}

/// Advection of a 3D vector by an axisymmetric flow.
pub fn v_dot_grad_vec_2d3d(ctx: &DiffContext, v: &Vector2D, a: &Vector3D) -> Result<Vector3D> {
    v_dot_grad_vec(ctx, &broadcast_vec(v, ctx.topo.local_nz), a)
}

/// Advection of an axisymmetric vector by a 3D flow.
pub fn v_dot_grad_vec_3d2d(ctx: &DiffContext, v: &Vector3D, a: &Vector2D) -> Result<Vector3D> {
    v_dot_grad_vec(ctx, v, &broadcast_vec(a, ctx.topo.local_nz))
}

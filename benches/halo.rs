use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use mesh_halo::prelude::*;
use mesh_halo::vecops;

fn periodic_mesh(nx: usize, ny: usize, nz: usize) -> Mesh {
    let mut opts = MeshOptions::serial(nx, ny, nz);
    opts.periodic_x = true;
    opts.periodic_y = true;
    let mut src = OptionsSource::new();
    src.set_scalar("dz", 1.0);
    Mesh::serial(opts, Box::new(src)).unwrap()
}

fn bench_communicate(c: &mut Criterion) {
    let mesh = periodic_mesh(64, 64, 16);
    let topo = mesh.topology().clone();
    let mut rng = StdRng::seed_from_u64(7);
    let mut f = Field3D::from_fn(&topo, |_, _, _| rng.gen::<f64>());

    c.bench_function("communicate 64x64x16 periodic", |b| {
        b.iter(|| {
            mesh.communicate(FieldGroup::new().add3d(black_box(&mut f)))
                .unwrap();
        })
    });
}

fn bench_ddx(c: &mut Criterion) {
    let mesh = periodic_mesh(64, 64, 16);
    let topo = mesh.topology().clone();
    let coords = mesh.coordinates().unwrap();
    let ctx = mesh.diff_context(&coords);
    let f = Field3D::from_fn(&topo, |x, y, z| ((x * y) as f64).sin() + z as f64);

    c.bench_function("ddx C2 64x64x16", |b| {
        b.iter(|| ctx.ddx(black_box(&f), CellLoc::Centre, None).unwrap())
    });
}

fn bench_div_grad(c: &mut Criterion) {
    let mesh = periodic_mesh(32, 32, 8);
    let topo = mesh.topology().clone();
    let coords = mesh.coordinates().unwrap();
    let ctx = mesh.diff_context(&coords);
    let f = Field3D::from_fn(&topo, |x, y, z| (x * x + y * y + z) as f64);

    c.bench_function("div(grad) 32x32x8", |b| {
        b.iter(|| {
            let g = vecops::grad(&ctx, black_box(&f), CellLoc::Centre).unwrap();
            vecops::div(&ctx, &g).unwrap()
        })
    });
}

criterion_group!(benches, bench_communicate, bench_ddx, bench_div_grad);
criterion_main!(benches);

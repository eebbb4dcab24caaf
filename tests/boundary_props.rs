//! Property tests for boundary-region enumeration and Y routing.

use proptest::prelude::*;

use mesh_halo::prelude::*;
use mesh_halo::topology::boundary::BndryLoc;

fn arb_serial_topo() -> impl Strategy<Value = Topology> {
    // guard widths go up to 3, so the subdomain must be at least that wide
    (4usize..24, 4usize..24, 1usize..4, 1usize..4).prop_map(|(nx, ny, mxg, myg)| {
        let mut opts = MeshOptions::serial(nx, ny, 2);
        opts.mxg = mxg;
        opts.myg = myg;
        Topology::serial(&opts).unwrap()
    })
}

proptest! {
    #[test]
    fn regions_stay_out_of_the_interior(topo in arb_serial_topo()) {
        for region in topo.boundaries() {
            prop_assert!(region.xe <= topo.local_nx);
            prop_assert!(region.ye <= topo.local_ny);
            for (x, y) in region.iter() {
                let in_interior = (topo.xstart..=topo.xend).contains(&x)
                    && (topo.ystart..=topo.yend).contains(&y);
                prop_assert!(!in_interior, "boundary point ({x},{y}) inside interior");
            }
        }
    }

    #[test]
    fn region_iteration_count_matches_extent(topo in arb_serial_topo()) {
        for region in topo.boundaries() {
            let n = region.iter().count();
            prop_assert_eq!(n, (region.xe - region.xs) * (region.ye - region.ys));
            // restartable: second pass sees the same count
            prop_assert_eq!(region.iter().count(), n);
        }
    }

    #[test]
    fn x_guard_regions_have_guard_width(topo in arb_serial_topo()) {
        let regions = topo.boundaries();
        let xin = regions.iter().find(|r| r.location == BndryLoc::Xin).unwrap();
        let xout = regions.iter().find(|r| r.location == BndryLoc::Xout).unwrap();
        prop_assert_eq!(xin.xe - xin.xs, topo.mxg);
        prop_assert_eq!(xout.xe - xout.xs, topo.mxg);
    }

    #[test]
    fn split_routing_partitions_x_range(
        topo in arb_serial_topo(),
        split_frac in 0.0f64..=1.0,
    ) {
        let mut topo = topo;
        let xsplit = ((topo.local_nx as f64) * split_frac) as usize;
        topo.set_yup_split(xsplit, Some(0), None).unwrap();

        // every X index routes to exactly one destination kind
        let mut routed_in = 0;
        for x in 0..topo.local_nx {
            match topo.yup_dest(x) {
                Some(0) => {
                    prop_assert!(x < xsplit);
                    routed_in += 1;
                }
                None => prop_assert!(x >= xsplit),
                Some(r) => prop_assert!(false, "unexpected destination rank {r}"),
            }
        }
        prop_assert_eq!(routed_in, xsplit);

        // the boundary enumeration covers exactly the unrouted part
        let upper: Vec<_> = topo
            .bndry_upper_y()
            .into_iter()
            .filter(|r| !r.is_empty())
            .collect();
        prop_assert_eq!(upper.len(), usize::from(xsplit < topo.local_nx));
        if let Some(r) = upper.first() {
            prop_assert_eq!((r.xs, r.xe), (xsplit, topo.local_nx));
        }
    }
}

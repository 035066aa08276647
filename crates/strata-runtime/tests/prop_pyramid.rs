use proptest::prelude::*;
use strata_runtime::{TileBounds, zoom_levels};

proptest! {
    // The pyramid is just deep enough for one top tile to cover the extent
    #[test]
    fn zoom_levels_are_minimal(extent in 1i32..1_000_000) {
        let levels = zoom_levels(extent);
        prop_assert!(levels >= 1);
        prop_assert!((1i64 << levels) >= extent as i64);
        if levels > 1 {
            prop_assert!((1i64 << (levels - 1)) < extent as i64);
        }
    }

    // Even expansion never loses a tile, and every parent covers its children
    #[test]
    fn expansion_covers_and_halving_maps_children(
        a in -5000i32..5000, b in -5000i32..5000,
        c in -5000i32..5000, d in -5000i32..5000,
        px in -5000i32..5000, pz in -5000i32..5000,
    ) {
        let bounds = TileBounds::new(a, b, c, d);
        let even = bounds.expand_even();
        prop_assert_eq!(even.min_x % 2, 0);
        prop_assert_eq!(even.max_z % 2, 0);
        prop_assert!(even.min_x <= bounds.min_x && even.max_x >= bounds.max_x);
        prop_assert!(even.min_z <= bounds.min_z && even.max_z >= bounds.max_z);

        let x = px.clamp(bounds.min_x, bounds.max_x);
        let z = pz.clamp(bounds.min_z, bounds.max_z);
        let parent = even.halve();
        let (qx, qz) = (x.div_euclid(2), z.div_euclid(2));
        prop_assert!(qx >= parent.min_x && qx <= parent.max_x);
        prop_assert!(qz >= parent.min_z && qz <= parent.max_z);
    }
}

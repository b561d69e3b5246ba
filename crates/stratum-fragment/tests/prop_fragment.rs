use proptest::prelude::*;
use stratum_blocks::{Block, MaterialEquivalence};
use stratum_fragment::{RegionFragment, compare_fragments};
use stratum_geom::{CellBox, CellPos, OrientationTransform};
use stratum_world::MemoryWorld;

fn world_with(blocks: &[u16], size: (usize, usize, usize)) -> MemoryWorld {
    let (xs, ys, _) = size;
    let mut w = MemoryWorld::new(-16, 64);
    let b = CellBox::from_origin_size(CellPos::ZERO, size);
    w.fill_box(&b, |p| {
        let i = (p.z as usize * ys + p.y as usize) * xs + p.x as usize;
        Block::new(blocks[i % blocks.len()], (i & 0xF) as u8)
    });
    w
}

fn arb_case() -> impl Strategy<Value = ((usize, usize, usize), Vec<u16>, u8, bool)> {
    (1usize..6, 1usize..4, 1usize..6).prop_flat_map(|size| {
        (
            Just(size),
            proptest::collection::vec(0u16..20, size.0 * size.1 * size.2),
            0u8..4,
            any::<bool>(),
        )
    })
}

proptest! {
    // writing under any orientation puts each stored cell at its mapped position
    #[test]
    fn oriented_write_lands_on_mapped_cells((size, blocks, rot, mirrored) in arb_case()) {
        let mut world = world_with(&blocks, size);
        let mut src = RegionFragment::new(size.0, size.1, size.2);
        src.read_from_world(&mut world, CellPos::ZERO, None);

        let t = OrientationTransform::new(size.0, size.2, rot, mirrored);
        let dest = CellPos::new(40, 2, -30);
        src.write_to_world(&mut world, dest, None, t);

        let (ow, od) = t.oriented_footprint();
        let mut back = RegionFragment::new(ow, size.1, od);
        back.read_from_world(&mut world, dest, None);
        for z in 0..size.2 {
            for y in 0..size.1 {
                for x in 0..size.0 {
                    let (mx, mz) = t.map_xz(x as i32, z as i32);
                    prop_assert_eq!(back.block(mx as usize, y, mz as usize), src.block(x, y, z));
                }
            }
        }
    }

    // identity write then read reproduces the fragment exactly
    #[test]
    fn identity_round_trip_compares_equal((size, blocks, _rot, _m) in arb_case()) {
        let mut world = world_with(&blocks, size);
        let mut src = RegionFragment::new(size.0, size.1, size.2);
        src.read_from_world(&mut world, CellPos::ZERO, None);
        let dest = CellPos::new(-20, 0, 7);
        src.write_to_world(&mut world, dest, None, src.identity_transform());
        let mut back = RegionFragment::new(size.0, size.1, size.2);
        back.read_from_world(&mut world, dest, None);
        prop_assert_eq!(compare_fragments(&src, &back, &MaterialEquivalence::new()), Ok(()));
    }
}

use proptest::prelude::*;
use stratum_blocks::{Block, MaterialEquivalence};
use stratum_fragment::{RegionFragment, compare_fragments};
use stratum_geom::{CellBox, CellPos, OrientationTransform};
use stratum_task::step_until_complete;
use stratum_undo::UndoLayer;
use stratum_world::MemoryWorld;

fn make_world() -> MemoryWorld {
    let mut w = MemoryWorld::new(0, 16);
    w.fill_box(&CellBox::new(CellPos::new(-4, 0, -4), CellPos::new(19, 3, 19)), |p| {
        Block::new(1 + ((p.x * 3 + p.y * 5 + p.z) % 7) as u16, (p.z & 0xF) as u8)
    });
    w
}

fn snapshot(world: &mut MemoryWorld) -> RegionFragment {
    let mut f = RegionFragment::new(24, 10, 24);
    f.read_from_world(world, CellPos::new(-4, 0, -4), None);
    f
}

fn arb_write() -> impl Strategy<Value = ((usize, usize, usize), Vec<Option<u16>>, (i32, i32, i32), u8, bool)> {
    (1usize..5, 1usize..4, 1usize..5).prop_flat_map(|size| {
        (
            Just(size),
            proptest::collection::vec(proptest::option::weighted(0.8, 0u16..12), size.0 * size.1 * size.2),
            (0i32..12, 0i32..5, 0i32..12),
            0u8..4,
            any::<bool>(),
        )
    })
}

fn fragment_of(size: (usize, usize, usize), cells: &[Option<u16>]) -> RegionFragment {
    let mut f = RegionFragment::new(size.0, size.1, size.2);
    for z in 0..size.2 {
        for y in 0..size.1 {
            for x in 0..size.0 {
                if let Some(id) = cells[(z * size.1 + y) * size.0 + x] {
                    f.set_block(x, y, z, Block::new(id, (x & 0xF) as u8));
                }
            }
        }
    }
    f
}

proptest! {
    // capture-and-write followed by its undo leaves the world as it was
    #[test]
    fn undo_restores_world_under_any_orientation((size, cells, dest, rot, mirrored) in arb_write()) {
        let mut world = make_world();
        let before = snapshot(&mut world);
        let f = fragment_of(size, &cells);
        let t = OrientationTransform::new(size.0, size.2, rot, mirrored);

        let mut capture = UndoLayer::capture_and_write(&f, CellPos::new(dest.0, dest.1, dest.2), t);
        step_until_complete(&mut capture, &mut world);
        let layer = capture.into_layer().expect("capture finished").into_shared();
        prop_assert!(layer.borrow().changed_mask().set_count() <= f.stored_mask().set_count());

        let mut undo = UndoLayer::undo_changes(&layer, Vec::new());
        step_until_complete(&mut undo, &mut world);
        let after = snapshot(&mut world);
        prop_assert_eq!(compare_fragments(&before, &after, &MaterialEquivalence::new()), Ok(()));
    }
}

use std::rc::Rc;

use stratum_blocks::{Block, MaterialEquivalence, TilePayload};
use stratum_fragment::{RegionFragment, compare_fragments};
use stratum_geom::{CellBox, CellPos, OrientationTransform};
use stratum_task::{run_to_completion, step_until_complete};
use stratum_undo::{SharedUndoLayer, UndoLayer, WorldHistory};
use stratum_world::{MemoryWorld, WorldAccess};

fn make_world() -> MemoryWorld {
    let mut w = MemoryWorld::new(0, 32);
    w.fill_box(&CellBox::new(CellPos::new(0, 0, 0), CellPos::new(31, 1, 15)), |p| {
        Block::new(3 + ((p.x * 7 + p.z) % 5) as u16, (p.x % 4) as u8)
    });
    w
}

fn snapshot(world: &mut MemoryWorld, origin: CellPos, size: (usize, usize, usize)) -> RegionFragment {
    let mut f = RegionFragment::new(size.0, size.1, size.2);
    f.read_from_world(world, origin, None);
    f
}

fn checkerboard(size: usize) -> RegionFragment {
    let mut f = RegionFragment::new(size, size, size);
    for z in 0..size {
        for y in 0..size {
            for x in 0..size {
                f.set_block(x, y, z, Block::new(1 + ((x + y + z) % 2) as u16, 0));
            }
        }
    }
    f
}

fn apply(world: &mut MemoryWorld, f: &RegionFragment, dest: CellPos, t: OrientationTransform) -> SharedUndoLayer {
    let mut task = UndoLayer::capture_and_write(f, dest, t);
    step_until_complete(&mut task, world);
    task.into_layer().expect("capture finished").into_shared()
}

fn assert_same(expected: &RegionFragment, actual: &RegionFragment) {
    if let Err(m) = compare_fragments(expected, actual, &MaterialEquivalence::new()) {
        panic!("{m}");
    }
}

#[test]
fn rotated_write_then_undo_restores_destination() {
    let mut world = make_world();
    let tile_at = CellPos::new(22, 1, 2);
    world.set_tile_payload(tile_at, Some(TilePayload::new(tile_at, b"sign:hello".to_vec())));
    let source = checkerboard(8);
    source.write_to_world(&mut world, CellPos::new(0, 0, 0), None, source.identity_transform());

    let snap_origin = CellPos::new(18, 0, -2);
    let before = snapshot(&mut world, snap_origin, (12, 11, 12));
    let source_before = snapshot(&mut world, CellPos::ZERO, (8, 8, 8));

    let mut read = RegionFragment::new(8, 8, 8);
    read.read_from_world(&mut world, CellPos::ZERO, None);
    let quarter = OrientationTransform::new(8, 8, 1, false);
    let layer = apply(&mut world, &read, CellPos::new(20, 0, 0), quarter);

    // x' = 7 - z, z' = x
    for (x, y, z) in [(0, 0, 0), (1, 2, 3), (7, 7, 0), (4, 5, 6)] {
        let p = CellPos::new(20 + 7 - z as i32, y as i32, x as i32);
        assert_eq!(world.voxel(p), read.block(x, y, z), "cell {x},{y},{z}");
    }
    assert!(world.tile_payload(tile_at).is_none());

    let mut undo = UndoLayer::undo_changes(&layer, Vec::new());
    step_until_complete(&mut undo, &mut world);

    let after = snapshot(&mut world, snap_origin, (12, 11, 12));
    assert_same(&before, &after);
    assert_same(&source_before, &snapshot(&mut world, CellPos::ZERO, (8, 8, 8)));
    let tile = world.tile_payload(tile_at).expect("tile restored");
    assert_eq!(tile.data, b"sign:hello".to_vec());
}

#[test]
fn undoing_older_layer_keeps_newer_layer_in_place() {
    let mut world = make_world();
    let region = (CellPos::new(0, 0, 0), (12, 4, 12));
    let w0 = snapshot(&mut world, region.0, region.1);

    let mut a = RegionFragment::new(6, 2, 6);
    let mut b = RegionFragment::new(6, 2, 6);
    for z in 0..6 {
        for y in 0..2 {
            for x in 0..6 {
                a.set_block(x, y, z, Block::new(20, 0));
                b.set_block(x, y, z, Block::new(21, 0));
            }
        }
    }
    let la = apply(&mut world, &a, CellPos::new(1, 0, 1), a.identity_transform());
    let lb = apply(&mut world, &b, CellPos::new(4, 1, 4), b.identity_transform());

    // expected state: W0 with only B replayed on top
    let mut replay = MemoryWorld::new(0, 32);
    replay.fill_box(&CellBox::new(CellPos::new(0, 0, 0), CellPos::new(31, 1, 15)), |p| {
        Block::new(3 + ((p.x * 7 + p.z) % 5) as u16, (p.x % 4) as u8)
    });
    b.write_to_world(&mut replay, CellPos::new(4, 1, 4), None, b.identity_transform());
    let expected = snapshot(&mut replay, region.0, region.1);

    let mut undo_a = UndoLayer::undo_changes(&la, vec![Rc::clone(&lb)]);
    run_to_completion(&mut undo_a, &mut world);
    assert!(undo_a.transferred() > 0);
    assert_same(&expected, &snapshot(&mut world, region.0, region.1));

    let mut undo_b = UndoLayer::undo_changes(&lb, Vec::new());
    run_to_completion(&mut undo_b, &mut world);
    assert_same(&w0, &snapshot(&mut world, region.0, region.1));
}

#[test]
fn permanent_layer_survives_undo_of_older_layer() {
    let mut world = make_world();
    let a = checkerboard(4);
    let mut b = RegionFragment::new(2, 2, 2);
    for z in 0..2 {
        for y in 0..2 {
            for x in 0..2 {
                b.set_block(x, y, z, Block::new(30, 0));
            }
        }
    }
    let la = apply(&mut world, &a, CellPos::new(2, 0, 2), a.identity_transform());
    let lb = apply(&mut world, &b, CellPos::new(3, 0, 3), b.identity_transform());
    lb.borrow().make_permanent(&[Rc::clone(&la)]);

    let mut undo = UndoLayer::undo_changes(&la, Vec::new());
    run_to_completion(&mut undo, &mut world);
    assert_eq!(world.voxel(CellPos::new(3, 0, 3)), Block::new(30, 0));
    assert_eq!(world.voxel(CellPos::new(4, 1, 4)), Block::new(30, 0));
    let outside = CellPos::new(2, 0, 2);
    assert_eq!(world.voxel(outside), Block::new(3 + ((2 * 7 + 2) % 5) as u16, 2));
}

// Breakage caused by undoing one layer is not repaired by a later layer that was
// already applied and undone: nothing tracks the dependency between them.
#[test]
fn breakage_inside_an_already_undone_layer_is_not_restored() {
    let mut world = make_world();
    let mut history = WorldHistory::new(8, 8);
    let support = CellPos::new(10, 2, 10);
    let decoration = CellPos::new(10, 3, 10);

    let mut a = RegionFragment::new(1, 1, 1);
    a.set_block(0, 0, 0, Block::new(40, 0));
    let mut task = UndoLayer::capture_and_write(&a, support, a.identity_transform());
    run_to_completion(&mut task, &mut world);
    history.record(1, 1, task.into_layer().expect("capture finished"));

    let mut b = RegionFragment::new(1, 1, 1);
    b.set_block(0, 0, 0, Block::new(41, 0));
    let mut task = UndoLayer::capture_and_write(&b, decoration, b.identity_transform());
    run_to_completion(&mut task, &mut world);
    history.record(1, 2, task.into_layer().expect("capture finished"));

    // B is applied and undone first
    let (tx, mut undo_b) = history.begin_undo_last(1).expect("layer B");
    assert_eq!(tx, 2);
    run_to_completion(&mut undo_b, &mut world);
    // the host places a decoration resting on A's support
    world.set_voxel(decoration, Block::new(42, 0));

    let (_, mut undo_a) = history.begin_undo_last(1).expect("layer A");
    run_to_completion(&mut undo_a, &mut world);
    assert!(world.voxel(support).is_air());
    assert_eq!(world.voxel(decoration), Block::new(42, 0));
    // the host breaks the unsupported decoration
    world.set_voxel(decoration, Block::AIR);

    assert!(history.is_empty());
    assert!(world.voxel(decoration).is_air());
}

#[test]
fn history_undo_follows_chronology_across_owners() {
    let mut world = make_world();
    let region = (CellPos::new(0, 0, 0), (10, 3, 10));
    let w0 = snapshot(&mut world, region.0, region.1);
    let mut history = WorldHistory::new(16, 4);
    for (i, (owner, dest)) in [(1, CellPos::new(1, 0, 1)), (2, CellPos::new(2, 0, 2)), (1, CellPos::new(3, 1, 3))]
        .into_iter()
        .enumerate()
    {
        let f = checkerboard(3);
        let mut task = UndoLayer::capture_and_write(&f, dest, f.identity_transform());
        step_until_complete(&mut task, &mut world);
        history.record(owner, i as u64, task.into_layer().expect("capture finished"));
    }
    for owner in [2, 1, 1] {
        let (_, mut undo) = history.begin_undo_last(owner).expect("entry");
        step_until_complete(&mut undo, &mut world);
    }
    assert!(history.is_empty());
    assert_same(&w0, &snapshot(&mut world, region.0, region.1));
}

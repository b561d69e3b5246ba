use stratum_blocks::MaterialEquivalence;
use thiserror::Error;

use crate::fragment::RegionFragment;

/// First difference found between two fragments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason} at [{x}, {y}, {z}]")]
pub struct FragmentMismatch {
    pub x: usize,
    pub y: usize,
    pub z: usize,
    pub reason: String,
}

impl FragmentMismatch {
    fn at(x: usize, y: usize, z: usize, reason: impl Into<String>) -> Self {
        Self {
            x,
            y,
            z,
            reason: reason.into(),
        }
    }
}

/// Cell-by-cell comparison for tests and diagnostics. Types the host silently
/// converts on placement are accepted through `equivalence`; variants are only
/// compared when the types are identical.
pub fn compare_fragments(
    expected: &RegionFragment,
    actual: &RegionFragment,
    equivalence: &MaterialEquivalence,
) -> Result<(), FragmentMismatch> {
    if expected.size() != actual.size() {
        return Err(FragmentMismatch::at(0, 0, 0, "Fragment Size Mismatch"));
    }
    let (x_count, y_count, z_count) = expected.size();
    for y in 0..y_count {
        for z in 0..z_count {
            for x in 0..x_count {
                let (xi, yi, zi) = (x as i32, y as i32, z as i32);
                let stored = expected.is_stored(xi, yi, zi);
                if stored != actual.is_stored(xi, yi, zi) {
                    return Err(FragmentMismatch::at(x, y, z, "Stored Mask Mismatch"));
                }
                if !stored {
                    continue;
                }
                let (e, a) = (expected.block(x, y, z), actual.block(x, y, z));
                if e.id != a.id && !equivalence.is_equivalent(e.id, a.id) {
                    return Err(FragmentMismatch::at(
                        x,
                        y,
                        z,
                        format!("Block Type Mismatch: expected {} got {}", e.id, a.id),
                    ));
                }
                if e.id == a.id && e.variant != a.variant {
                    return Err(FragmentMismatch::at(
                        x,
                        y,
                        z,
                        format!("Variant Mismatch: expected {} got {}", e.variant, a.variant),
                    ));
                }
                let tiles_match = match (expected.tile_payload(x, y, z), actual.tile_payload(x, y, z)) {
                    (None, None) => true,
                    (Some(p), Some(q)) => p.same_content(&q),
                    _ => false,
                };
                if !tiles_match {
                    return Err(FragmentMismatch::at(x, y, z, "Tile Payload Mismatch"));
                }
                let mut eo = expected.floating_objects_at(x, y, z);
                let mut ao = actual.floating_objects_at(x, y, z);
                eo.sort_by_key(|o| (o.facing.index(), o.width, o.payload.clone()));
                ao.sort_by_key(|o| (o.facing.index(), o.width, o.payload.clone()));
                if eo != ao {
                    return Err(FragmentMismatch::at(x, y, z, "Floating Object Mismatch"));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_blocks::{Block, FloatingObject, TilePayload};
    use stratum_geom::{CellPos, Facing};

    fn pair() -> (RegionFragment, RegionFragment) {
        let mut a = RegionFragment::new(2, 2, 2);
        for z in 0..2 {
            for y in 0..2 {
                for x in 0..2 {
                    a.set_block(x, y, z, Block::new(1 + x as u16, y as u8));
                }
            }
        }
        let b = a.deep_copy();
        (a, b)
    }

    #[test]
    fn identical_fragments_match() {
        let (a, b) = pair();
        assert_eq!(compare_fragments(&a, &b, &MaterialEquivalence::new()), Ok(()));
    }

    #[test]
    fn size_mismatch_is_reported_first() {
        let (a, _) = pair();
        let b = RegionFragment::new(2, 2, 3);
        let err = compare_fragments(&a, &b, &MaterialEquivalence::new()).unwrap_err();
        assert_eq!(err.reason, "Fragment Size Mismatch");
    }

    #[test]
    fn type_mismatch_names_the_cell() {
        let (a, mut b) = pair();
        b.set_block(1, 1, 0, Block::new(9, 1));
        let err = compare_fragments(&a, &b, &MaterialEquivalence::new()).unwrap_err();
        assert_eq!((err.x, err.y, err.z), (1, 1, 0));
        assert!(err.to_string().ends_with("at [1, 1, 0]"));
    }

    #[test]
    fn equivalent_types_skip_the_variant_check() {
        let (mut a, mut b) = pair();
        a.set_block(0, 0, 0, Block::new(9, 3));
        b.set_block(0, 0, 0, Block::new(8, 0));
        let eq = MaterialEquivalence::new().with_pair(9, 8);
        assert!(compare_fragments(&a, &b, &eq).is_ok());
        // equivalence is directional
        assert!(compare_fragments(&b, &a, &eq).is_err());
    }

    #[test]
    fn variant_payload_and_object_differences_are_found() {
        let (a, mut b) = pair();
        b.set_variant(0, 1, 1, 7);
        assert!(compare_fragments(&a, &b, &MaterialEquivalence::new()).unwrap_err().reason.starts_with("Variant"));

        let (a, mut b) = pair();
        b.set_tile_payload(1, 0, 1, Some(TilePayload::new(CellPos::ZERO, vec![1])));
        let err = compare_fragments(&a, &b, &MaterialEquivalence::new()).unwrap_err();
        assert_eq!(err.reason, "Tile Payload Mismatch");

        let (a, mut b) = pair();
        b.add_floating_object(FloatingObject::new(CellPos::new(1, 1, 1), Facing::West, 1, vec![2]));
        let err = compare_fragments(&a, &b, &MaterialEquivalence::new()).unwrap_err();
        assert_eq!(err.reason, "Floating Object Mismatch");
    }
}

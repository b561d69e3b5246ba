use proptest::prelude::*;
use stratum_blocks::{Block, VariantRules};
use stratum_geom::OrientationTransform;

fn arb_block() -> impl Strategy<Value = Block> {
    (0u16..=0xFFF, 0u8..=0xF).prop_map(|(id, v)| Block::new(id, v))
}

proptest! {
    // the packed value orders by id first
    #[test]
    fn packed_orders_by_id(a in arb_block(), b in arb_block()) {
        if a.id < b.id {
            prop_assert!(a.pack() < b.pack());
        }
    }

    // rotating r turns and then 4 - r turns is the identity
    #[test]
    fn complementary_turns_cancel(v in 0u8..16, r in 0u8..4) {
        let rules = VariantRules::new().with_facing_rule(53);
        let b = Block::new(53, v);
        let there = rules.apply(b, &OrientationTransform::new(1, 1, r, false));
        let back = rules.apply(there, &OrientationTransform::new(1, 1, (4 - r) % 4, false));
        prop_assert_eq!(back, b);
    }

    // mirroring twice is the identity
    #[test]
    fn double_mirror_is_identity(v in 0u8..16) {
        let rules = VariantRules::new().with_facing_rule(53);
        let b = Block::new(53, v);
        prop_assert_eq!(rules.mirror_x(rules.mirror_x(b)), b);
    }
}

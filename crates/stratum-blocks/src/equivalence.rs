use crate::types::BlockId;

/// Pairs of block types that count as "no real difference" when comparing an
/// expected voxel with what the world actually holds, e.g. a still liquid that
/// starts flowing on its own after placement. Pairs are directional.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MaterialEquivalence {
    pairs: Vec<(BlockId, BlockId)>,
}

impl MaterialEquivalence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (BlockId, BlockId)>) -> Self {
        Self {
            pairs: pairs.into_iter().collect(),
        }
    }

    pub fn with_pair(mut self, expected: BlockId, actual: BlockId) -> Self {
        self.pairs.push((expected, actual));
        self
    }

    /// `expected` found as `actual` is acceptable.
    #[inline]
    pub fn is_equivalent(&self, expected: BlockId, actual: BlockId) -> bool {
        expected == actual || self.pairs.contains(&(expected, actual))
    }

    pub fn pairs(&self) -> &[(BlockId, BlockId)] {
        &self.pairs
    }
}

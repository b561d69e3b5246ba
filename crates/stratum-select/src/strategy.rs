use stratum_blocks::Block;
use stratum_geom::{CellBox, CellPos};

/// Axis normal to a contour plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    #[inline]
    fn component(self, p: CellPos) -> i32 {
        match self {
            Axis::X => p.x,
            Axis::Y => p.y,
            Axis::Z => p.z,
        }
    }
}

/// Which cells a fill accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FillMatcher {
    #[default]
    AnyNonAir,
    /// Same type and variant as the block at the start position.
    SameAsStart,
}

impl FillMatcher {
    pub(crate) fn accepts(self, start: Block, candidate: Block) -> bool {
        match self {
            FillMatcher::AnyNonAir => !candidate.is_air(),
            FillMatcher::SameAsStart => candidate == start,
        }
    }
}

/// How a selection grows. `bounds: None` derives a box around the start position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillStrategy {
    Box {
        corner1: CellPos,
        corner2: CellPos,
    },
    FloodFill {
        start: CellPos,
        bounds: Option<CellBox>,
        diagonal: bool,
        matcher: FillMatcher,
    },
    /// Flood fill confined to the plane through `start` perpendicular to `normal`.
    Contour {
        start: CellPos,
        bounds: Option<CellBox>,
        normal: Axis,
        diagonal: bool,
        matcher: FillMatcher,
    },
}

impl FillStrategy {
    pub fn start(&self) -> CellPos {
        match *self {
            FillStrategy::Box { corner1, corner2 } => CellBox::spanning(corner1, corner2).min,
            FillStrategy::FloodFill { start, .. } | FillStrategy::Contour { start, .. } => start,
        }
    }

    pub fn matcher(&self) -> FillMatcher {
        match *self {
            FillStrategy::Box { .. } => FillMatcher::AnyNonAir,
            FillStrategy::FloodFill { matcher, .. } | FillStrategy::Contour { matcher, .. } => matcher,
        }
    }

    pub fn is_fill(&self) -> bool {
        !matches!(self, FillStrategy::Box { .. })
    }

    /// Step offsets a fill may take from one accepted cell to the next.
    pub(crate) fn neighbour_offsets(&self) -> Vec<CellPos> {
        let (diagonal, plane) = match *self {
            FillStrategy::Box { .. } => return Vec::new(),
            FillStrategy::FloodFill { diagonal, .. } => (diagonal, None),
            FillStrategy::Contour { diagonal, normal, .. } => (diagonal, Some(normal)),
        };
        let mut out = Vec::with_capacity(26);
        for dy in -1..=1 {
            for dz in -1..=1 {
                for dx in -1..=1 {
                    let d = CellPos::new(dx, dy, dz);
                    let taxicab = dx.abs() + dy.abs() + dz.abs();
                    if taxicab == 0 || (!diagonal && taxicab > 1) {
                        continue;
                    }
                    if plane.is_some_and(|axis| axis.component(d) != 0) {
                        continue;
                    }
                    out.push(d);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(diagonal: bool) -> FillStrategy {
        FillStrategy::FloodFill {
            start: CellPos::ZERO,
            bounds: None,
            diagonal,
            matcher: FillMatcher::AnyNonAir,
        }
    }

    #[test]
    fn neighbour_counts() {
        assert_eq!(fill(false).neighbour_offsets().len(), 6);
        assert_eq!(fill(true).neighbour_offsets().len(), 26);
        let contour = FillStrategy::Contour {
            start: CellPos::ZERO,
            bounds: None,
            normal: Axis::Y,
            diagonal: false,
            matcher: FillMatcher::AnyNonAir,
        };
        let offs = contour.neighbour_offsets();
        assert_eq!(offs.len(), 4);
        assert!(offs.iter().all(|d| d.y == 0));
    }

    #[test]
    fn same_as_start_compares_variant() {
        let start = Block::new(4, 2);
        assert!(FillMatcher::SameAsStart.accepts(start, Block::new(4, 2)));
        assert!(!FillMatcher::SameAsStart.accepts(start, Block::new(4, 3)));
        assert!(!FillMatcher::AnyNonAir.accepts(start, Block::AIR));
    }
}

//! Integer cell geometry and X/Z orientation transforms.
#![forbid(unsafe_code)]

use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Horizontal size of a chunk column, in cells.
pub const CHUNK_SIZE: i32 = 16;
const CHUNK_SHIFT: u32 = 4;

/// Chunk coordinate containing world coordinate `w` (floor division).
#[inline]
pub const fn chunk_of(w: i32) -> i32 {
    w >> CHUNK_SHIFT
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl CellPos {
    pub const ZERO: CellPos = CellPos { x: 0, y: 0, z: 0 };

    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// The six face-adjacent neighbours.
    pub fn face_neighbors(self) -> [CellPos; 6] {
        [
            self.offset(-1, 0, 0),
            self.offset(1, 0, 0),
            self.offset(0, -1, 0),
            self.offset(0, 1, 0),
            self.offset(0, 0, -1),
            self.offset(0, 0, 1),
        ]
    }

    #[inline]
    pub fn chunk_xz(self) -> (i32, i32) {
        (chunk_of(self.x), chunk_of(self.z))
    }
}

impl Add for CellPos {
    type Output = CellPos;
    #[inline]
    fn add(self, rhs: CellPos) -> CellPos {
        CellPos::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for CellPos {
    #[inline]
    fn add_assign(&mut self, rhs: CellPos) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}

impl Sub for CellPos {
    type Output = CellPos;
    #[inline]
    fn sub(self, rhs: CellPos) -> CellPos {
        CellPos::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl SubAssign for CellPos {
    #[inline]
    fn sub_assign(&mut self, rhs: CellPos) {
        self.x -= rhs.x;
        self.y -= rhs.y;
        self.z -= rhs.z;
    }
}

impl Neg for CellPos {
    type Output = CellPos;
    #[inline]
    fn neg(self) -> CellPos {
        CellPos::new(-self.x, -self.y, -self.z)
    }
}

impl From<(i32, i32, i32)> for CellPos {
    fn from(value: (i32, i32, i32)) -> Self {
        Self::new(value.0, value.1, value.2)
    }
}

impl From<CellPos> for (i32, i32, i32) {
    fn from(value: CellPos) -> Self {
        (value.x, value.y, value.z)
    }
}

/// Axis-aligned cuboid of cells; both corners are inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CellBox {
    pub min: CellPos,
    pub max: CellPos,
}

impl CellBox {
    #[inline]
    pub const fn new(min: CellPos, max: CellPos) -> Self {
        Self { min, max }
    }

    /// Box covering `size` cells starting at `origin`. Sizes must be at least 1.
    pub fn from_origin_size(origin: CellPos, size: (usize, usize, usize)) -> Self {
        let max = origin.offset(size.0 as i32 - 1, size.1 as i32 - 1, size.2 as i32 - 1);
        Self { min: origin, max }
    }

    /// Smallest box containing both corners, in any order.
    pub fn spanning(a: CellPos, b: CellPos) -> Self {
        Self {
            min: CellPos::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: CellPos::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    #[inline]
    pub fn contains(&self, p: CellPos) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// True if the boxes share at least one cell.
    #[inline]
    pub fn overlaps(&self, other: &CellBox) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn expanded(&self, by: i32) -> CellBox {
        CellBox {
            min: self.min.offset(-by, -by, -by),
            max: self.max.offset(by, by, by),
        }
    }

    pub fn size(&self) -> (usize, usize, usize) {
        (
            (self.max.x - self.min.x + 1) as usize,
            (self.max.y - self.min.y + 1) as usize,
            (self.max.z - self.min.z + 1) as usize,
        )
    }
}

/// Horizontal facing, ordered clockwise when viewed from above (+Y).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Facing {
    #[default]
    North,
    East,
    South,
    West,
}

impl Facing {
    pub const ALL: [Facing; 4] = [Facing::North, Facing::East, Facing::South, Facing::West];

    #[inline]
    pub fn index(self) -> u8 {
        match self {
            Facing::North => 0,
            Facing::East => 1,
            Facing::South => 2,
            Facing::West => 3,
        }
    }

    #[inline]
    pub fn from_index(i: u8) -> Facing {
        Facing::ALL[(i & 3) as usize]
    }

    #[inline]
    pub fn rotated_cw(self, quarter_turns: u8) -> Facing {
        Facing::from_index(self.index().wrapping_add(quarter_turns))
    }

    /// Mirror across the X axis: east and west swap.
    #[inline]
    pub fn mirrored_x(self) -> Facing {
        match self {
            Facing::East => Facing::West,
            Facing::West => Facing::East,
            other => other,
        }
    }

    /// Unit step (dx, dz) pointing in this direction.
    #[inline]
    pub fn step(self) -> (i32, i32) {
        match self {
            Facing::North => (0, -1),
            Facing::East => (1, 0),
            Facing::South => (0, 1),
            Facing::West => (-1, 0),
        }
    }
}

/// Rotation about the vertical axis (0..=3 clockwise quarter turns), applied after an
/// optional mirror of X, over a footprint of `x_size` by `z_size` cells. Mapped
/// coordinates always land inside the oriented footprint starting at (0, 0).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OrientationTransform {
    x_size: i32,
    z_size: i32,
    rotation: u8,
    mirrored: bool,
}

impl OrientationTransform {
    pub fn identity(x_size: usize, z_size: usize) -> Self {
        Self::new(x_size, z_size, 0, false)
    }

    pub fn new(x_size: usize, z_size: usize, rotation: u8, mirrored: bool) -> Self {
        Self {
            x_size: x_size as i32,
            z_size: z_size as i32,
            rotation: rotation & 3,
            mirrored,
        }
    }

    /// All eight rotate/mirror combinations over the given footprint.
    pub fn all_variants(x_size: usize, z_size: usize) -> impl Iterator<Item = OrientationTransform> {
        [false, true].into_iter().flat_map(move |mirrored| {
            (0u8..4).map(move |rotation| Self::new(x_size, z_size, rotation, mirrored))
        })
    }

    #[inline]
    pub fn rotation_count(&self) -> u8 {
        self.rotation
    }

    #[inline]
    pub fn is_mirrored(&self) -> bool {
        self.mirrored
    }

    #[inline]
    pub fn is_identity(&self) -> bool {
        self.rotation == 0 && !self.mirrored
    }

    pub fn footprint(&self) -> (usize, usize) {
        (self.x_size as usize, self.z_size as usize)
    }

    /// Footprint after orientation; 90 and 270 degree turns swap width and depth.
    pub fn oriented_footprint(&self) -> (usize, usize) {
        if self.rotation % 2 == 1 {
            (self.z_size as usize, self.x_size as usize)
        } else {
            (self.x_size as usize, self.z_size as usize)
        }
    }

    pub fn map_xz(&self, x: i32, z: i32) -> (i32, i32) {
        let (mut x, mut z) = (x, z);
        let (mut w, mut d) = (self.x_size, self.z_size);
        if self.mirrored {
            x = w - 1 - x;
        }
        for _ in 0..self.rotation {
            let nx = d - 1 - z;
            let nz = x;
            x = nx;
            z = nz;
            core::mem::swap(&mut w, &mut d);
        }
        (x, z)
    }

    pub fn inverse_xz(&self, x: i32, z: i32) -> (i32, i32) {
        let (mut x, mut z) = (x, z);
        let (ow, od) = self.oriented_footprint();
        let (mut w, mut d) = (ow as i32, od as i32);
        for _ in 0..self.rotation {
            let px = z;
            let pz = w - 1 - x;
            x = px;
            z = pz;
            core::mem::swap(&mut w, &mut d);
        }
        if self.mirrored {
            x = self.x_size - 1 - x;
        }
        (x, z)
    }

    /// Image of the inclusive rectangle `x_range` by `z_range`.
    pub fn remap_bounding_box(&self, x_range: (i32, i32), z_range: (i32, i32)) -> ((i32, i32), (i32, i32)) {
        let a = self.map_xz(x_range.0, z_range.0);
        let b = self.map_xz(x_range.1, z_range.1);
        ((a.0.min(b.0), a.0.max(b.0)), (a.1.min(b.1), a.1.max(b.1)))
    }

    /// Direction-only part of the transform.
    pub fn map_facing(&self, facing: Facing) -> Facing {
        let f = if self.mirrored { facing.mirrored_x() } else { facing };
        f.rotated_cw(self.rotation)
    }

    /// Linear part of the transform applied to a step vector.
    pub fn map_step(&self, dx: i32, dz: i32) -> (i32, i32) {
        let (mut x, mut z) = (dx, dz);
        if self.mirrored {
            x = -x;
        }
        for _ in 0..self.rotation {
            let nx = -z;
            let nz = x;
            x = nx;
            z = nz;
        }
        (x, z)
    }
}

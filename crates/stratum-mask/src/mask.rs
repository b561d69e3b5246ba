use bitvec::prelude::*;
use core::fmt;
use stratum_geom::{CellPos, OrientationTransform};

/// Largest size along any axis.
pub const MAX_DIM: usize = 256;

/// One bit per cell of an `x_size` by `y_size` by `z_size` cuboid, indexed
/// `x + x_size * (y + y_size * z)`. Reads outside the cuboid return false and
/// writes outside it are ignored, so neighbour probes at the edges need no checks.
#[derive(Clone, PartialEq, Eq)]
pub struct VoxelMask {
    x_size: usize,
    y_size: usize,
    z_size: usize,
    bits: BitVec<u64, Lsb0>,
}

impl fmt::Debug for VoxelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoxelMask")
            .field("size", &(self.x_size, self.y_size, self.z_size))
            .field("set", &self.set_count())
            .finish()
    }
}

impl VoxelMask {
    /// Empty mask. Invalid sizes are logged and replaced by 1x1x1.
    pub fn new(x_size: usize, y_size: usize, z_size: usize) -> Self {
        let mut m = VoxelMask {
            x_size: 1,
            y_size: 1,
            z_size: 1,
            bits: BitVec::repeat(false, 1),
        };
        m.resize_and_clear(x_size, y_size, z_size);
        m
    }

    /// Mask with every cell set.
    pub fn filled(x_size: usize, y_size: usize, z_size: usize) -> Self {
        let mut m = Self::new(x_size, y_size, z_size);
        m.set_all();
        m
    }

    #[inline]
    pub fn is_valid_size(x_size: usize, y_size: usize, z_size: usize) -> bool {
        (1..=MAX_DIM).contains(&x_size)
            && (1..=MAX_DIM).contains(&y_size)
            && (1..=MAX_DIM).contains(&z_size)
    }

    pub fn resize_and_clear(&mut self, x_size: usize, y_size: usize, z_size: usize) {
        let (x_size, y_size, z_size) = if Self::is_valid_size(x_size, y_size, z_size) {
            (x_size, y_size, z_size)
        } else {
            log::error!(
                "VoxelMask: invalid size [{}, {}, {}], using [1, 1, 1]",
                x_size,
                y_size,
                z_size
            );
            (1, 1, 1)
        };
        self.x_size = x_size;
        self.y_size = y_size;
        self.z_size = z_size;
        self.bits = BitVec::repeat(false, x_size * y_size * z_size);
    }

    #[inline]
    pub fn size(&self) -> (usize, usize, usize) {
        (self.x_size, self.y_size, self.z_size)
    }

    #[inline]
    pub fn x_size(&self) -> usize {
        self.x_size
    }

    #[inline]
    pub fn y_size(&self) -> usize {
        self.y_size
    }

    #[inline]
    pub fn z_size(&self) -> usize {
        self.z_size
    }

    #[inline]
    pub fn volume(&self) -> usize {
        self.bits.len()
    }

    #[inline]
    fn index(&self, x: i32, y: i32, z: i32) -> Option<usize> {
        if x < 0 || y < 0 || z < 0 {
            return None;
        }
        let (x, y, z) = (x as usize, y as usize, z as usize);
        if x >= self.x_size || y >= self.y_size || z >= self.z_size {
            return None;
        }
        Some(x + self.x_size * (y + self.y_size * z))
    }

    #[inline]
    fn coords(&self, idx: usize) -> (usize, usize, usize) {
        let x = idx % self.x_size;
        let rest = idx / self.x_size;
        (x, rest % self.y_size, rest / self.y_size)
    }

    #[inline]
    pub fn get(&self, x: i32, y: i32, z: i32) -> bool {
        self.index(x, y, z).is_some_and(|i| self.bits[i])
    }

    #[inline]
    pub fn get_at(&self, p: CellPos) -> bool {
        self.get(p.x, p.y, p.z)
    }

    #[inline]
    pub fn set(&mut self, x: i32, y: i32, z: i32) {
        if let Some(i) = self.index(x, y, z) {
            self.bits.set(i, true);
        }
    }

    #[inline]
    pub fn clear(&mut self, x: i32, y: i32, z: i32) {
        if let Some(i) = self.index(x, y, z) {
            self.bits.set(i, false);
        }
    }

    pub fn set_all(&mut self) {
        self.bits.fill(true);
    }

    pub fn clear_all(&mut self) {
        self.bits.fill(false);
    }

    pub fn set_count(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }

    /// Local coordinates of every set cell, in index order.
    pub fn iter_set(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        self.bits.iter_ones().map(move |i| self.coords(i))
    }

    /// OR `other` into this mask. Sizes must match.
    pub fn union(&mut self, other: &VoxelMask) {
        assert_eq!(self.size(), other.size(), "union of differently sized masks");
        for (a, b) in self
            .bits
            .as_raw_mut_slice()
            .iter_mut()
            .zip(other.bits.as_raw_slice())
        {
            *a |= *b;
        }
    }

    /// True iff every cell set in `other` is also set here. Sizes must match.
    pub fn contains_all(&self, other: &VoxelMask) -> bool {
        assert_eq!(self.size(), other.size(), "containment of differently sized masks");
        self.bits
            .as_raw_slice()
            .iter()
            .zip(other.bits.as_raw_slice())
            .all(|(a, b)| b & !a == 0)
    }

    /// Cells that are clear here but have at least one set face neighbour.
    pub fn border_mask(&self) -> VoxelMask {
        let mut border = VoxelMask::new(self.x_size, self.y_size, self.z_size);
        for (x, y, z) in self.iter_set() {
            let p = CellPos::new(x as i32, y as i32, z as i32);
            for n in p.face_neighbors() {
                if self.index(n.x, n.y, n.z).is_some() && !self.get_at(n) {
                    border.set(n.x, n.y, n.z);
                }
            }
        }
        border
    }

    /// Clear every cell whose y lies outside `[y_min, y_max]`.
    pub fn clip_to_y_range(&mut self, y_min: i32, y_max: i32) {
        for y in 0..self.y_size as i32 {
            if y >= y_min && y <= y_max {
                continue;
            }
            for z in 0..self.z_size as i32 {
                for x in 0..self.x_size as i32 {
                    self.clear(x, y, z);
                }
            }
        }
    }

    /// Larger mask with `width` clear cells on every face; content moves by (width, width, width).
    pub fn copy_with_empty_border(&self, width: usize) -> VoxelMask {
        let mut out = VoxelMask::new(
            self.x_size + 2 * width,
            self.y_size + 2 * width,
            self.z_size + 2 * width,
        );
        let w = width as i32;
        for (x, y, z) in self.iter_set() {
            out.set(x as i32 + w, y as i32 + w, z as i32 + w);
        }
        out
    }

    /// Like [`copy_with_empty_border`](Self::copy_with_empty_border) but with X/Z remapped
    /// through `transform`. Also returns the minimum of the remapped X/Z range, which
    /// shifts the caller's world origin.
    pub fn reoriented_copy_with_border(
        &self,
        transform: &OrientationTransform,
        width: usize,
    ) -> (VoxelMask, (i32, i32)) {
        let (xr, zr) = transform.remap_bounding_box(
            (0, self.x_size as i32 - 1),
            (0, self.z_size as i32 - 1),
        );
        let new_x = (xr.1 - xr.0 + 1) as usize;
        let new_z = (zr.1 - zr.0 + 1) as usize;
        let mut out = VoxelMask::new(new_x + 2 * width, self.y_size + 2 * width, new_z + 2 * width);
        let w = width as i32;
        for (x, y, z) in self.iter_set() {
            let (mx, mz) = transform.map_xz(x as i32, z as i32);
            out.set(mx - xr.0 + w, y as i32 + w, mz - zr.0 + w);
        }
        (out, (xr.0, zr.0))
    }

    /// Move every set cell that is also set in `locked` out of this mask and into the
    /// returned mask (same size). `locked_offset` is `locked`'s origin in this mask's
    /// coordinates. The two results are disjoint and together equal the original.
    pub fn split_by_mask(&mut self, locked: &VoxelMask, locked_offset: CellPos) -> VoxelMask {
        let mut removed = VoxelMask::new(self.x_size, self.y_size, self.z_size);
        let hits: Vec<usize> = self
            .bits
            .iter_ones()
            .filter(|&i| {
                let (x, y, z) = self.coords(i);
                let p = CellPos::new(x as i32, y as i32, z as i32) - locked_offset;
                locked.get_at(p)
            })
            .collect();
        for i in hits {
            self.bits.set(i, false);
            removed.bits.set(i, true);
        }
        removed
    }

    pub(crate) fn raw_bits(&self) -> &BitSlice<u64, Lsb0> {
        &self.bits
    }

    pub(crate) fn raw_bits_mut(&mut self) -> &mut BitSlice<u64, Lsb0> {
        &mut self.bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_access_is_tolerated() {
        let mut m = VoxelMask::new(2, 2, 2);
        m.set(-1, 0, 0);
        m.set(2, 0, 0);
        m.set(0, 0, 5);
        assert!(m.is_empty());
        assert!(!m.get(-1, -1, -1));
        assert!(!m.get(9, 0, 0));
    }

    #[test]
    fn invalid_size_falls_back_to_single_cell() {
        let m = VoxelMask::new(0, 4, 4);
        assert_eq!(m.size(), (1, 1, 1));
        let m = VoxelMask::new(257, 1, 1);
        assert_eq!(m.size(), (1, 1, 1));
    }

    #[test]
    fn index_order_is_x_then_y_then_z() {
        let mut m = VoxelMask::new(3, 4, 5);
        m.set(2, 1, 3);
        let idx = 2 + 3 * (1 + 4 * 3);
        assert!(m.raw_bits()[idx]);
        assert_eq!(m.iter_set().collect::<Vec<_>>(), vec![(2, 1, 3)]);
    }

    #[test]
    fn border_of_single_cell_is_its_six_neighbours() {
        let mut m = VoxelMask::new(3, 3, 3);
        m.set(1, 1, 1);
        let b = m.border_mask();
        assert_eq!(b.set_count(), 6);
        assert!(!b.get(1, 1, 1));
        assert!(b.get(0, 1, 1) && b.get(2, 1, 1));
        assert!(b.get(1, 0, 1) && b.get(1, 2, 1));
        assert!(b.get(1, 1, 0) && b.get(1, 1, 2));
        assert!(!b.get(0, 0, 1));
    }

    #[test]
    fn clip_keeps_inclusive_range() {
        let mut m = VoxelMask::filled(2, 6, 2);
        m.clip_to_y_range(1, 3);
        assert_eq!(m.set_count(), 2 * 3 * 2);
        assert!(!m.get(0, 0, 0));
        assert!(m.get(0, 1, 0));
        assert!(m.get(1, 3, 1));
        assert!(!m.get(1, 4, 1));
    }

    #[test]
    fn empty_border_copy_translates_content() {
        let mut m = VoxelMask::new(2, 1, 1);
        m.set(1, 0, 0);
        let c = m.copy_with_empty_border(2);
        assert_eq!(c.size(), (6, 5, 5));
        assert_eq!(c.iter_set().collect::<Vec<_>>(), vec![(3, 2, 2)]);
    }

    #[test]
    fn reoriented_copy_swaps_width_and_depth() {
        let mut m = VoxelMask::new(3, 1, 2);
        m.set(0, 0, 0);
        let t = OrientationTransform::new(3, 2, 1, false);
        let (c, min) = m.reoriented_copy_with_border(&t, 1);
        assert_eq!(min, (0, 0));
        assert_eq!(c.size(), (2 + 2, 3, 3 + 2));
        // (0,0) maps to (1,0) under a quarter turn of a 3x2 footprint
        assert!(c.get(1 + 1, 1, 1));
        assert_eq!(c.set_count(), 1);
    }

    #[test]
    fn union_and_containment() {
        let mut a = VoxelMask::new(4, 4, 4);
        let mut b = VoxelMask::new(4, 4, 4);
        a.set(0, 0, 0);
        b.set(3, 3, 3);
        assert!(!a.contains_all(&b));
        a.union(&b);
        assert!(a.contains_all(&b));
        assert_eq!(a.set_count(), 2);
    }

    #[test]
    fn split_moves_locked_cells_with_offset() {
        let mut m = VoxelMask::filled(4, 1, 1);
        let mut locked = VoxelMask::new(2, 1, 1);
        locked.set(0, 0, 0);
        // locked starts at x=2 in this mask's coordinates
        let removed = m.split_by_mask(&locked, CellPos::new(2, 0, 0));
        assert_eq!(removed.iter_set().collect::<Vec<_>>(), vec![(2, 0, 0)]);
        assert_eq!(m.set_count(), 3);
        assert!(!m.get(2, 0, 0));
    }
}

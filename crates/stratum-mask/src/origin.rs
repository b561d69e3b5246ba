use stratum_geom::{CellBox, CellPos};

use crate::codec::{MaskDecodeError, put_i32};
use crate::mask::VoxelMask;

/// A mask anchored at a world-space origin: local (0,0,0) sits at `origin`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoxelMaskWithOrigin {
    origin: CellPos,
    mask: VoxelMask,
}

impl VoxelMaskWithOrigin {
    pub fn new(origin: CellPos, x_size: usize, y_size: usize, z_size: usize) -> Self {
        Self {
            origin,
            mask: VoxelMask::new(x_size, y_size, z_size),
        }
    }

    pub fn from_mask(origin: CellPos, mask: VoxelMask) -> Self {
        Self { origin, mask }
    }

    #[inline]
    pub fn origin(&self) -> CellPos {
        self.origin
    }

    pub fn set_origin(&mut self, origin: CellPos) {
        self.origin = origin;
    }

    #[inline]
    pub fn mask(&self) -> &VoxelMask {
        &self.mask
    }

    #[inline]
    pub fn mask_mut(&mut self) -> &mut VoxelMask {
        &mut self.mask
    }

    pub fn into_mask(self) -> VoxelMask {
        self.mask
    }

    #[inline]
    pub fn to_local(&self, world: CellPos) -> CellPos {
        world - self.origin
    }

    #[inline]
    pub fn get_world(&self, world: CellPos) -> bool {
        self.mask.get_at(world - self.origin)
    }

    pub fn set_world(&mut self, world: CellPos) {
        let p = world - self.origin;
        self.mask.set(p.x, p.y, p.z);
    }

    pub fn clear_world(&mut self, world: CellPos) {
        let p = world - self.origin;
        self.mask.clear(p.x, p.y, p.z);
    }

    /// World-space cuboid covered by the mask.
    pub fn world_box(&self) -> CellBox {
        CellBox::from_origin_size(self.origin, self.mask.size())
    }

    /// World positions of every set cell.
    pub fn iter_world(&self) -> impl Iterator<Item = CellPos> + '_ {
        self.mask
            .iter_set()
            .map(move |(x, y, z)| self.origin.offset(x as i32, y as i32, z as i32))
    }

    /// Partition by a locked region given in world space: cells set in `locked` move
    /// to the returned mask, which shares this mask's origin and size.
    pub fn split_by_mask(&mut self, locked: &VoxelMaskWithOrigin) -> VoxelMaskWithOrigin {
        let offset = locked.origin - self.origin;
        let removed = self.mask.split_by_mask(&locked.mask, offset);
        VoxelMaskWithOrigin {
            origin: self.origin,
            mask: removed,
        }
    }

    /// Origin as three big-endian `i32`s, then the mask encoding.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_i32(&mut out, self.origin.x);
        put_i32(&mut out, self.origin.y);
        put_i32(&mut out, self.origin.z);
        out.extend_from_slice(&self.mask.encode());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MaskDecodeError> {
        if bytes.len() < 12 {
            return Err(MaskDecodeError::Truncated {
                needed: 12,
                available: bytes.len(),
            });
        }
        let word = |at: usize| i32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let origin = CellPos::new(word(0), word(4), word(8));
        let mask = VoxelMask::decode(&bytes[12..])?;
        Ok(Self { origin, mask })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_access_respects_origin() {
        let mut m = VoxelMaskWithOrigin::new(CellPos::new(10, 64, -5), 4, 4, 4);
        m.set_world(CellPos::new(11, 65, -4));
        assert!(m.mask().get(1, 1, 1));
        assert!(m.get_world(CellPos::new(11, 65, -4)));
        assert!(!m.get_world(CellPos::new(0, 0, 0)));
        assert_eq!(m.iter_world().collect::<Vec<_>>(), vec![CellPos::new(11, 65, -4)]);
    }

    #[test]
    fn split_aligns_world_origins() {
        let mut a = VoxelMaskWithOrigin::new(CellPos::new(0, 0, 0), 4, 1, 1);
        a.mask_mut().set_all();
        let mut locked = VoxelMaskWithOrigin::new(CellPos::new(3, 0, 0), 2, 1, 1);
        locked.mask_mut().set_all();
        let removed = a.split_by_mask(&locked);
        assert_eq!(removed.iter_world().collect::<Vec<_>>(), vec![CellPos::new(3, 0, 0)]);
        assert_eq!(a.mask().set_count(), 3);
    }

    #[test]
    fn origin_survives_wire_format() {
        let mut m = VoxelMaskWithOrigin::new(CellPos::new(-300, 7, 42), 3, 2, 1);
        m.set_world(CellPos::new(-298, 8, 42));
        let back = VoxelMaskWithOrigin::decode(&m.encode()).unwrap();
        assert_eq!(back, m);
    }
}

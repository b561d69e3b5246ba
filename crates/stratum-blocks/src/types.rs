use stratum_geom::{CellPos, Facing};

pub type BlockId = u16;
pub type Variant = u8;

/// Host-assigned handle for a floating object living in the world.
pub type ObjectId = u64;

pub const MAX_BLOCK_ID: BlockId = 0xFFF;
pub const MAX_VARIANT: Variant = 0xF;

// 12-bit type id plus 4-bit variant, packed as `id << 4 | variant`
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default, Debug)]
pub struct Block {
    pub id: BlockId,
    pub variant: Variant,
}

impl Block {
    pub const AIR: Block = Block { id: 0, variant: 0 };

    #[inline]
    pub fn new(id: BlockId, variant: Variant) -> Self {
        assert!(id <= MAX_BLOCK_ID, "block id {id} exceeds 12 bits");
        assert!(variant <= MAX_VARIANT, "variant {variant} exceeds 4 bits");
        Self { id, variant }
    }

    #[inline]
    pub fn is_air(self) -> bool {
        self.id == 0
    }

    #[inline]
    pub fn pack(self) -> u16 {
        (self.id << 4) | u16::from(self.variant)
    }

    #[inline]
    pub fn unpack(packed: u16) -> Self {
        Self {
            id: packed >> 4,
            variant: (packed & 0xF) as Variant,
        }
    }
}

/// Extra structured state attached to a voxel (container contents and the like).
/// `pos` is where the payload believes it lives; `data` is opaque.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TilePayload {
    pub pos: CellPos,
    pub data: Vec<u8>,
}

impl TilePayload {
    pub fn new(pos: CellPos, data: impl Into<Vec<u8>>) -> Self {
        Self {
            pos,
            data: data.into(),
        }
    }

    /// Copy of this payload relocated to `pos`.
    pub fn relocated(&self, pos: CellPos) -> Self {
        Self {
            pos,
            data: self.data.clone(),
        }
    }

    /// Byte comparison with positions normalised to the origin.
    pub fn same_content(&self, other: &TilePayload) -> bool {
        self.data == other.data
    }
}

/// A non-grid object anchored to a cell, e.g. a wall hanging. A wide object covers
/// `width` cells starting at `anchor` and stepping along `facing` turned clockwise.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FloatingObject {
    pub id: Option<ObjectId>,
    pub anchor: CellPos,
    pub facing: Facing,
    pub width: u8,
    pub payload: Vec<u8>,
}

impl FloatingObject {
    pub fn new(anchor: CellPos, facing: Facing, width: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: None,
            anchor,
            facing,
            width: width.max(1),
            payload: payload.into(),
        }
    }

    /// Step from one covered cell to the next.
    pub fn span_step(&self) -> (i32, i32) {
        self.facing.rotated_cw(1).step()
    }

    pub fn covered_cells(&self) -> impl Iterator<Item = CellPos> + '_ {
        let (dx, dz) = self.span_step();
        (0..i32::from(self.width)).map(move |k| self.anchor.offset(dx * k, 0, dz * k))
    }

    /// Same object content, detached from any host handle.
    pub fn detached(&self) -> Self {
        Self {
            id: None,
            ..self.clone()
        }
    }
}

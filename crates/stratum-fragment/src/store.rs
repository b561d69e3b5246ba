use hashbrown::HashMap;
use stratum_blocks::Block;

/// Per-voxel (packed block, light) storage. Dense for mostly-filled selections,
/// sparse otherwise; unset entries read as air with zero light.
#[derive(Clone, Debug)]
pub(crate) enum VoxelStore {
    Dense { blocks: Vec<u16>, light: Vec<u8> },
    Sparse(HashMap<usize, (u16, u8)>),
}

impl VoxelStore {
    pub(crate) fn dense(volume: usize) -> Self {
        VoxelStore::Dense {
            blocks: vec![0; volume],
            light: vec![0; volume],
        }
    }

    pub(crate) fn sparse() -> Self {
        VoxelStore::Sparse(HashMap::new())
    }

    pub(crate) fn is_dense(&self) -> bool {
        matches!(self, VoxelStore::Dense { .. })
    }

    #[inline]
    pub(crate) fn block(&self, idx: usize) -> Block {
        match self {
            VoxelStore::Dense { blocks, .. } => Block::unpack(blocks[idx]),
            VoxelStore::Sparse(m) => m.get(&idx).map(|e| Block::unpack(e.0)).unwrap_or(Block::AIR),
        }
    }

    #[inline]
    pub(crate) fn light(&self, idx: usize) -> u8 {
        match self {
            VoxelStore::Dense { light, .. } => light[idx],
            VoxelStore::Sparse(m) => m.get(&idx).map(|e| e.1).unwrap_or(0),
        }
    }

    #[inline]
    pub(crate) fn set_block(&mut self, idx: usize, b: Block) {
        match self {
            VoxelStore::Dense { blocks, .. } => blocks[idx] = b.pack(),
            VoxelStore::Sparse(m) => m.entry(idx).or_insert((0, 0)).0 = b.pack(),
        }
    }

    #[inline]
    pub(crate) fn set_light(&mut self, idx: usize, l: u8) {
        match self {
            VoxelStore::Dense { light, .. } => light[idx] = l,
            VoxelStore::Sparse(m) => m.entry(idx).or_insert((0, 0)).1 = l,
        }
    }
}

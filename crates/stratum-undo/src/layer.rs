use std::cell::RefCell;
use std::rc::Rc;

use stratum_blocks::Variant;
use stratum_fragment::RegionFragment;
use stratum_geom::{CellBox, CellPos, OrientationTransform};
use stratum_mask::{VoxelMask, VoxelMaskWithOrigin};

use crate::capture::CaptureAndWrite;
use crate::rollback::UndoChanges;

/// Handle shared between the history and in-flight undo tasks.
pub type SharedUndoLayer = Rc<RefCell<UndoLayer>>;

/// Pre-image and change footprint of one region write.
///
/// `undo_image` and `changed` share a frame whose local (0,0,0) sits at `origin`.
/// Every changed cell is stored in the image.
#[derive(Debug)]
pub struct UndoLayer {
    pub(crate) origin: CellPos,
    pub(crate) undo_image: RegionFragment,
    pub(crate) changed: VoxelMask,
}

impl UndoLayer {
    /// Layer that changed nothing.
    pub(crate) fn empty(origin: CellPos) -> Self {
        Self {
            origin,
            undo_image: RegionFragment::new(1, 1, 1),
            changed: VoxelMask::new(1, 1, 1),
        }
    }

    /// Start writing `fragment` at `dest` under `transform`, recording what it replaces.
    ///
    /// # Panics
    ///
    /// If any side of `fragment` exceeds `MAX_DIM - 2 * BORDER_WIDTH`; callers refuse
    /// such selections before reading them.
    pub fn capture_and_write(
        fragment: &RegionFragment,
        dest: CellPos,
        transform: OrientationTransform,
    ) -> CaptureAndWrite {
        CaptureAndWrite::new(fragment, dest, transform)
    }

    /// Start rolling `layer` back. `subsequent` must hold every layer recorded after it.
    pub fn undo_changes(layer: &SharedUndoLayer, subsequent: Vec<SharedUndoLayer>) -> UndoChanges {
        UndoChanges::new(Rc::clone(layer), subsequent)
    }

    pub fn into_shared(self) -> SharedUndoLayer {
        Rc::new(RefCell::new(self))
    }

    #[inline]
    pub fn origin(&self) -> CellPos {
        self.origin
    }

    pub fn changed_mask(&self) -> &VoxelMask {
        &self.changed
    }

    /// Changed cells in world space.
    pub fn changed_region(&self) -> VoxelMaskWithOrigin {
        VoxelMaskWithOrigin::from_mask(self.origin, self.changed.clone())
    }

    pub fn undo_image(&self) -> &RegionFragment {
        &self.undo_image
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn bounding_box(&self) -> CellBox {
        CellBox::from_origin_size(self.origin, self.changed.size())
    }

    /// Whether this layer will restore the voxel at world position `p`.
    pub fn claims(&self, p: CellPos) -> bool {
        self.changed.get_at(p - self.origin)
    }

    /// Variant this layer would restore at world position `p`, for debugging.
    pub fn stored_variant_at(&self, p: CellPos) -> Option<Variant> {
        let local = p - self.origin;
        if !self.changed.get_at(local) {
            return None;
        }
        Some(self.undo_image.variant(local.x as usize, local.y as usize, local.z as usize))
    }

    /// Make this layer's changes permanent with respect to `preceding` layers: none of
    /// them will ever restore a voxel this layer changed. Origins are aligned in world
    /// space. A handle to this same layer in `preceding` is skipped.
    pub fn make_permanent(&self, preceding: &[SharedUndoLayer]) {
        let bounds = self.bounding_box();
        for shared in preceding {
            if std::ptr::eq(shared.as_ptr(), self) {
                continue;
            }
            let mut other = shared.borrow_mut();
            if !bounds.overlaps(&other.bounding_box()) {
                continue;
            }
            let shift = self.origin - other.origin;
            let mut cleared = 0usize;
            for (x, y, z) in self.changed.iter_set() {
                let p = CellPos::new(x as i32, y as i32, z as i32) + shift;
                if other.changed.get_at(p) {
                    other.changed.clear(p.x, p.y, p.z);
                    cleared += 1;
                }
            }
            log::debug!(target: "undo", "permanent layer at {:?} hid {} cells of layer at {:?}", self.origin, cleared, other.origin);
        }
    }

    /// Split on a locked region given in world space. This layer keeps the changed
    /// cells inside `locked`; the returned layer shares the undo image and holds the
    /// cells outside it.
    pub fn split_by_locked_region(&mut self, locked: &VoxelMaskWithOrigin) -> UndoLayer {
        let inside = self.changed.split_by_mask(locked.mask(), locked.origin() - self.origin);
        let outside = std::mem::replace(&mut self.changed, inside);
        UndoLayer {
            origin: self.origin,
            undo_image: self.undo_image.shallow_copy(),
            changed: outside,
        }
    }
}

use stratum_blocks::{Block, FloatingObject, ObjectId, TilePayload};
use stratum_geom::{CellBox, CellPos, OrientationTransform};

pub type ClientId = u32;

/// The narrow set of world operations region reads and writes need. Every
/// coordinate is in world space.
pub trait WorldAccess {
    /// Valid vertical range `[y_min, y_max_exclusive)`.
    fn vertical_range(&self) -> (i32, i32);

    /// False for columns the host has not loaded; selection treats those as unavailable.
    fn is_column_loaded(&self, _x: i32, _z: i32) -> bool {
        true
    }

    fn voxel(&self, p: CellPos) -> Block;

    /// Returns false if the host refused the change.
    fn set_voxel(&mut self, p: CellPos, block: Block) -> bool;

    fn tile_payload(&self, p: CellPos) -> Option<TilePayload>;

    fn set_tile_payload(&mut self, p: CellPos, payload: Option<TilePayload>);

    fn light(&self, p: CellPos) -> u8;

    fn set_light(&mut self, p: CellPos, light: u8);

    fn floating_objects_in_box(&self, bounds: &CellBox) -> Vec<FloatingObject>;

    fn remove_floating_object(&mut self, id: ObjectId) -> bool;

    /// Returns the new object's handle, or `None` if it could not be placed.
    fn spawn_floating_object(&mut self, object: FloatingObject) -> Option<ObjectId>;

    fn notify_neighbors_changed(&mut self, p: CellPos);

    fn recompute_derived_lighting(&mut self, chunk_x: i32, chunk_z: i32);

    fn interested_clients(&self, chunk_x: i32, chunk_z: i32) -> Vec<ClientId>;

    fn queue_chunk_resend(&mut self, chunk_x: i32, chunk_z: i32, clients: &[ClientId]);

    /// Let a freshly placed voxel run one logic tick.
    fn settle_tick(&mut self, p: CellPos, block: Block);

    /// Variant data of `block` as seen after `transform`. Hosts without
    /// direction-dependent variants keep the default.
    fn orient_variant(&self, block: Block, _transform: &OrientationTransform) -> Block {
        block
    }
}

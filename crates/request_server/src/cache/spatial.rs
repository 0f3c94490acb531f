//! The spatial cache proper: indices, placement rules, and LOS queries.
//!
//! Every operation acquires the single cache mutex once and delegates to
//! inner routines on the locked state, so helpers can call each other
//! without re-entrant locking. The update tick holds the lock for its whole
//! pass through [`UpdateGuard`]; queries return deep clones.

use super::object::{CacheObject, Coord, ObjectId, OwnerId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// The grid this cache manages, plus the LOS radius its queries use.
///
/// `width`/`height` are inclusive cell counts; `start_x + width` is
/// exclusive. The LOS box around a point is the axis-aligned square of
/// radius `los_radius`, clamped to these bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheBounds {
    pub start_x: Coord,
    pub start_y: Coord,
    pub width: u32,
    pub height: u32,
    pub los_radius: u32,
}

impl Default for CacheBounds {
    fn default() -> Self {
        Self {
            start_x: 0,
            start_y: 0,
            width: 1024,
            height: 1024,
            los_radius: 16,
        }
    }
}

impl CacheBounds {
    fn end_x(&self) -> Coord {
        self.start_x + self.width as Coord
    }

    fn end_y(&self) -> Coord {
        self.start_y + self.height as Coord
    }

    /// Forces `start ≥ origin` and `end ≤ origin + extent − 1` on both axes.
    fn clamp(
        &self,
        start_x: Coord,
        start_y: Coord,
        end_x: Coord,
        end_y: Coord,
    ) -> (Coord, Coord, Coord, Coord) {
        (
            start_x.max(self.start_x),
            start_y.max(self.start_y),
            end_x.min(self.end_x() - 1),
            end_y.min(self.end_y() - 1),
        )
    }

    /// Whether the rectangle lies entirely inside the bounds.
    pub fn contains_rect(&self, x: Coord, y: Coord, width: u32, height: u32) -> bool {
        x >= self.start_x
            && y >= self.start_y
            && x + width as Coord <= self.end_x()
            && y + height as Coord <= self.end_y()
    }
}

struct CacheState {
    bounds: CacheBounds,
    id_idx: HashMap<ObjectId, Box<dyn CacheObject>>,
    owner_idx: HashMap<OwnerId, Vec<ObjectId>>,
    /// One slot per cell, row-major from `(start_x, start_y)`. Every cell of
    /// a placed object's footprint points at the same id.
    loc_idx: Vec<Option<ObjectId>>,
    updatable_idx: Vec<ObjectId>,
}

impl CacheState {
    fn cell(&self, x: Coord, y: Coord) -> Option<ObjectId> {
        let index = self.cell_index(x, y)?;
        self.loc_idx[index]
    }

    fn set_cell(&mut self, x: Coord, y: Coord, value: Option<ObjectId>) {
        if let Some(index) = self.cell_index(x, y) {
            self.loc_idx[index] = value;
        }
    }

    fn cell_index(&self, x: Coord, y: Coord) -> Option<usize> {
        if x < self.bounds.start_x
            || y < self.bounds.start_y
            || x >= self.bounds.end_x()
            || y >= self.bounds.end_y()
        {
            return None;
        }
        let column = (x - self.bounds.start_x) as usize;
        let row = (y - self.bounds.start_y) as usize;
        Some(column * self.bounds.height as usize + row)
    }

    /// Root-cell objects in the clamped rectangle, each at most once.
    fn in_area(&self, x: Coord, y: Coord, width: u32, height: u32) -> Vec<Box<dyn CacheObject>> {
        let (start_x, start_y, end_x, end_y) =
            self.bounds
                .clamp(x, y, x + width as Coord, y + height as Coord);
        let mut result = Vec::new();
        for cell_x in start_x..end_x {
            for cell_y in start_y..end_y {
                let Some(id) = self.cell(cell_x, cell_y) else {
                    continue;
                };
                let Some(object) = self.id_idx.get(&id) else {
                    continue;
                };
                if object
                    .footprint()
                    .is_some_and(|fp| fp.is_root(cell_x, cell_y))
                {
                    result.push(object.clone_object());
                }
            }
        }
        result
    }

    /// Root-cell objects inside the union of the LOS boxes around every
    /// map-placed object the owner holds.
    fn in_owner_los(&self, owner: OwnerId) -> Vec<Box<dyn CacheObject>> {
        let mut seen: HashSet<ObjectId> = HashSet::new();
        let mut result = Vec::new();
        let Some(owned) = self.owner_idx.get(&owner) else {
            return result;
        };
        let radius = self.bounds.los_radius as Coord;

        for owned_id in owned {
            let Some(fp) = self.id_idx.get(owned_id).and_then(|o| o.footprint()) else {
                continue;
            };
            let (start_x, start_y, end_x, end_y) = self.bounds.clamp(
                fp.x - radius,
                fp.y - radius,
                fp.x + radius,
                fp.y + radius,
            );
            for cell_x in start_x..end_x {
                for cell_y in start_y..end_y {
                    let Some(id) = self.cell(cell_x, cell_y) else {
                        continue;
                    };
                    let Some(object) = self.id_idx.get(&id) else {
                        continue;
                    };
                    let is_root = object
                        .footprint()
                        .is_some_and(|fp| fp.is_root(cell_x, cell_y));
                    if is_root && seen.insert(id) {
                        result.push(object.clone_object());
                    }
                }
            }
        }
        result
    }
}

/// The spatial object cache.
///
/// Owned by the node for its lifetime; shared with handlers by reference.
/// Nothing persists across restarts and no coherence exists across nodes:
/// each processor owns a disjoint area.
pub struct SpatialCache {
    state: Mutex<CacheState>,
}

impl SpatialCache {
    /// Creates an empty cache over the given bounds.
    pub fn new(bounds: CacheBounds) -> Self {
        let cells = bounds.width as usize * bounds.height as usize;
        Self {
            state: Mutex::new(CacheState {
                bounds,
                id_idx: HashMap::new(),
                owner_idx: HashMap::new(),
                loc_idx: vec![None; cells],
                updatable_idx: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts an object, painting its footprint if it has one.
    ///
    /// Fails with `false` and no state change when the id is already
    /// present, the footprint leaves the bounds, or any footprint cell is
    /// occupied.
    pub fn add(&self, mut object: Box<dyn CacheObject>) -> bool {
        let mut state = self.state();
        let id = object.id();
        if state.id_idx.contains_key(&id) {
            return false;
        }

        if let Some(fp) = object.footprint() {
            if !state.bounds.contains_rect(fp.x, fp.y, fp.width, fp.height) {
                return false;
            }
            if fp.cells().any(|(x, y)| state.cell(x, y).is_some()) {
                return false;
            }
            for (x, y) in fp.cells() {
                state.set_cell(x, y, Some(id));
            }
        }

        let owner = object.owner();
        if owner != 0 {
            state.owner_idx.entry(owner).or_default().push(id);
        }
        if object.as_updatable().is_some() {
            state.updatable_idx.push(id);
        }
        state.id_idx.insert(id, object);
        true
    }

    /// Removes an object, clearing every cell of its footprint.
    pub fn remove(&self, id: ObjectId) -> bool {
        let mut state = self.state();
        let Some(object) = state.id_idx.remove(&id) else {
            return false;
        };

        if let Some(fp) = object.footprint() {
            for (x, y) in fp.cells() {
                state.set_cell(x, y, None);
            }
        }

        let owner = object.owner();
        if owner != 0 {
            if let Some(owned) = state.owner_idx.get_mut(&owner) {
                owned.retain(|entry| *entry != id);
                if owned.is_empty() {
                    state.owner_idx.remove(&owner);
                }
            }
        }
        state.updatable_idx.retain(|entry| *entry != id);
        true
    }

    /// A clone of the object with the given id.
    pub fn get_by_id(&self, id: ObjectId) -> Option<Box<dyn CacheObject>> {
        let state = self.state();
        state.id_idx.get(&id).map(|object| object.clone_object())
    }

    /// A clone of whatever occupies `(x, y)`, root cell or not.
    pub fn get_at_location(&self, x: Coord, y: Coord) -> Option<Box<dyn CacheObject>> {
        let state = self.state();
        let id = state.cell(x, y)?;
        state.id_idx.get(&id).map(|object| object.clone_object())
    }

    /// Clones of the root-cell objects in the clamped rectangle, each at
    /// most once regardless of footprint size.
    pub fn get_in_area(
        &self,
        x: Coord,
        y: Coord,
        width: u32,
        height: u32,
    ) -> Vec<Box<dyn CacheObject>> {
        self.state().in_area(x, y, width, height)
    }

    /// Clones of the owner's objects, in insertion order.
    pub fn get_by_owner(&self, owner: OwnerId) -> Vec<Box<dyn CacheObject>> {
        let state = self.state();
        let Some(owned) = state.owner_idx.get(&owner) else {
            return Vec::new();
        };
        owned
            .iter()
            .filter_map(|id| state.id_idx.get(id))
            .map(|object| object.clone_object())
            .collect()
    }

    /// The distinct nonzero owners with any object occupying the LOS box
    /// around `(x, y)`.
    pub fn get_users_with_los_at(&self, x: Coord, y: Coord) -> HashSet<OwnerId> {
        let state = self.state();
        let radius = state.bounds.los_radius as Coord;
        let (start_x, start_y, end_x, end_y) =
            state.bounds.clamp(x - radius, y - radius, x + radius, y + radius);

        let mut owners = HashSet::new();
        for cell_x in start_x..end_x {
            for cell_y in start_y..end_y {
                let Some(id) = state.cell(cell_x, cell_y) else {
                    continue;
                };
                if let Some(object) = state.id_idx.get(&id) {
                    if object.owner() != 0 {
                        owners.insert(object.owner());
                    }
                }
            }
        }
        owners
    }

    /// Everything visible to the owner: root-cell objects inside the union
    /// of the LOS boxes around each of the owner's placed objects.
    pub fn get_in_owner_los(&self, owner: OwnerId) -> Vec<Box<dyn CacheObject>> {
        self.state().in_owner_los(owner)
    }

    /// [`Self::get_in_owner_los`] restricted to objects whose origin falls
    /// inside the given box.
    pub fn get_in_owner_los_in_area(
        &self,
        owner: OwnerId,
        x: Coord,
        y: Coord,
        width: u32,
        height: u32,
    ) -> Vec<Box<dyn CacheObject>> {
        let state = self.state();
        state
            .in_owner_los(owner)
            .into_iter()
            .filter(|object| {
                object.footprint().is_some_and(|fp| {
                    fp.x >= x
                        && fp.y >= y
                        && fp.x <= x + width as Coord
                        && fp.y <= y + height as Coord
                })
            })
            .collect()
    }

    /// Whether no cell in the clamped rectangle is occupied.
    pub fn is_area_empty(&self, x: Coord, y: Coord, width: u32, height: u32) -> bool {
        let state = self.state();
        let (start_x, start_y, end_x, end_y) =
            state
                .bounds
                .clamp(x, y, x + width as Coord, y + height as Coord);
        for cell_x in start_x..end_x {
            for cell_y in start_y..end_y {
                if state.cell(cell_x, cell_y).is_some() {
                    return false;
                }
            }
        }
        true
    }

    /// Whether the owner has a root cell inside the LOS box around `(x, y)`.
    pub fn is_location_in_los(&self, x: Coord, y: Coord, owner: OwnerId) -> bool {
        let state = self.state();
        let radius = state.bounds.los_radius as Coord;
        let (start_x, start_y, end_x, end_y) =
            state.bounds.clamp(x - radius, y - radius, x + radius, y + radius);

        for cell_x in start_x..end_x {
            for cell_y in start_y..end_y {
                let Some(id) = state.cell(cell_x, cell_y) else {
                    continue;
                };
                let Some(object) = state.id_idx.get(&id) else {
                    continue;
                };
                let is_root = object
                    .footprint()
                    .is_some_and(|fp| fp.is_root(cell_x, cell_y));
                if is_root && object.owner() == owner {
                    return true;
                }
            }
        }
        false
    }

    /// Whether the rectangle lies entirely inside the cache bounds.
    pub fn is_location_in_bounds(&self, x: Coord, y: Coord, width: u32, height: u32) -> bool {
        self.state().bounds.contains_rect(x, y, width, height)
    }

    /// Whether any cached object belongs to the given owner.
    pub fn is_user_present(&self, user: OwnerId) -> bool {
        let state = self.state();
        state.owner_idx.get(&user).is_some_and(|owned| !owned.is_empty())
    }

    /// Locks the cache for an update pass. The lock is held until the guard
    /// drops; iterate with [`UpdateGuard::next_updatable`].
    pub fn begin_update(&self) -> UpdateGuard<'_> {
        UpdateGuard {
            state: self.state(),
        }
    }
}

/// Holds the cache lock for the duration of one update pass.
///
/// Iteration without the lock is unrepresentable: the only way to reach the
/// updatables is through this guard, and dropping it is `end_update`.
pub struct UpdateGuard<'a> {
    state: MutexGuard<'a, CacheState>,
}

impl UpdateGuard<'_> {
    /// Mutable access to the updatable at `position` in iteration order, or
    /// `None` past the end.
    pub fn next_updatable(&mut self, position: usize) -> Option<&mut dyn super::Updatable> {
        let state = &mut *self.state;
        let id = *state.updatable_idx.get(position)?;
        state.id_idx.get_mut(&id)?.as_updatable()
    }
}

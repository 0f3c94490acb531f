//! Process-local spatial object cache.
//!
//! An in-memory store of game objects indexed by id, by owner, and by 2D
//! location, answering placement and line-of-sight queries for the
//! game-simulation handlers. All operations run under one lock; queries
//! return deep clones so callers can never alias live cache state.

mod object;
mod spatial;

pub use object::{CacheObject, Coord, Footprint, ObjectId, OwnerId, Updatable};
pub use spatial::{CacheBounds, SpatialCache, UpdateGuard};

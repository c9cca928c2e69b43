use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock, Weak};

/// Rigid transform between two reference frames
///
/// `rotation` is a column-major 3x3 matrix; a point maps as `R * p + t`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extrinsics {
    pub rotation: [f32; 9],
    pub translation: [f32; 3],
}

impl Extrinsics {
    pub fn identity() -> Self {
        from_pose(&Pose::identity())
    }

    /// Transform going the opposite way
    pub fn inverse(&self) -> Self {
        from_pose(&to_pose(self).inverse())
    }

    pub fn transform_point(&self, point: [f32; 3]) -> [f32; 3] {
        to_pose(self).transform_point(point)
    }
}

impl Default for Extrinsics {
    fn default() -> Self {
        Self::identity()
    }
}

/// Row-major rotation plus translation, used for composition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub orientation: [[f32; 3]; 3],
    pub position: [f32; 3],
}

impl Pose {
    pub fn identity() -> Self {
        Self {
            orientation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            position: [0.0; 3],
        }
    }

    pub fn inverse(&self) -> Self {
        let mut orientation = [[0.0f32; 3]; 3];
        for (r, row) in orientation.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = self.orientation[c][r];
            }
        }
        let mut position = [0.0f32; 3];
        for (r, value) in position.iter_mut().enumerate() {
            *value = -(0..3).map(|c| orientation[r][c] * self.position[c]).sum::<f32>();
        }
        Self { orientation, position }
    }

    /// `self * other`: apply `other` first, then `self`
    pub fn compose(&self, other: &Pose) -> Self {
        let mut orientation = [[0.0f32; 3]; 3];
        for (r, row) in orientation.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = (0..3).map(|k| self.orientation[r][k] * other.orientation[k][c]).sum();
            }
        }
        let moved = self.transform_point(other.position);
        Self {
            orientation,
            position: moved,
        }
    }

    pub fn transform_point(&self, point: [f32; 3]) -> [f32; 3] {
        let mut out = self.position;
        for (r, value) in out.iter_mut().enumerate() {
            *value += (0..3).map(|c| self.orientation[r][c] * point[c]).sum::<f32>();
        }
        out
    }
}

pub fn to_pose(extrinsics: &Extrinsics) -> Pose {
    let mut orientation = [[0.0f32; 3]; 3];
    for (r, row) in orientation.iter_mut().enumerate() {
        for (c, value) in row.iter_mut().enumerate() {
            *value = extrinsics.rotation[c * 3 + r];
        }
    }
    Pose {
        orientation,
        position: extrinsics.translation,
    }
}

pub fn from_pose(pose: &Pose) -> Extrinsics {
    let mut rotation = [0.0f32; 9];
    for r in 0..3 {
        for c in 0..3 {
            rotation[c * 3 + r] = pose.orientation[r][c];
        }
    }
    Extrinsics {
        rotation,
        translation: pose.position,
    }
}

/// Extrinsics computed on first request
pub struct LazyExtrinsics {
    fetch: Box<dyn Fn() -> Extrinsics + Send + Sync>,
    value: OnceLock<Extrinsics>,
}

impl LazyExtrinsics {
    pub fn new<F>(fetch: F) -> Self
    where
        F: Fn() -> Extrinsics + Send + Sync + 'static,
    {
        Self {
            fetch: Box::new(fetch),
            value: OnceLock::new(),
        }
    }

    pub fn get(&self) -> Extrinsics {
        *self.value.get_or_init(|| (self.fetch)())
    }
}

/// Table of stream-to-stream transforms keyed by unique stream ids
///
/// Holds weak references only: whoever registers a link must keep the
/// `Arc<LazyExtrinsics>` alive for as long as lookups should succeed.
#[derive(Default)]
pub struct ExtrinsicsRegistry {
    links: RwLock<HashMap<(u32, u32), Weak<LazyExtrinsics>>>,
}

impl ExtrinsicsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, from: u32, to: u32, link: &Arc<LazyExtrinsics>) {
        let mut links = self.links.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        links.insert((from, to), Arc::downgrade(link));
    }

    /// Look up `from -> to`, falling back to the inverse of `to -> from`
    pub fn fetch(&self, from: u32, to: u32) -> Option<Extrinsics> {
        if from == to {
            return Some(Extrinsics::identity());
        }
        let links = self.links.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(link) = links.get(&(from, to)).and_then(Weak::upgrade) {
            return Some(link.get());
        }
        links
            .get(&(to, from))
            .and_then(Weak::upgrade)
            .map(|link| link.get().inverse())
    }

    pub fn len(&self) -> usize {
        self.links.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

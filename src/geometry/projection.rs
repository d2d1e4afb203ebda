// SPDX-License-Identifier: GPL-3.0-only

//! Per-pixel projection rays for the depth camera
//!
//! The table trades one division per pixel per frame for a one-off build:
//! ray(u, v) = ((u - cx) / fx, (v - cy) / fy, 1). Scaling a ray by the metric
//! depth of its pixel gives the 3D point in the depth camera's optical frame.

use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use super::Point3;
use super::intrinsics::{CalibrationInfo, CameraIntrinsics};

/// Dense table of unit-depth rays, indexed like the raw depth buffer
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionTable {
    width: usize,
    height: usize,
    intrinsics: CameraIntrinsics,
    rays: Vec<Point3>,
}

impl ProjectionTable {
    /// Build the table for `width` x `height` pixels
    ///
    /// Returns `None` when the intrinsics cannot produce rays (zero or
    /// non-finite focal lengths).
    pub fn build(intrinsics: &CameraIntrinsics, width: usize, height: usize) -> Option<Self> {
        if !intrinsics.is_usable() {
            return None;
        }

        let inv_fx = 1.0 / intrinsics.fx;
        let inv_fy = 1.0 / intrinsics.fy;
        let mut rays = Vec::with_capacity(width * height);
        for v in 0..height {
            let y = (v as f64 - intrinsics.cy) * inv_fy;
            for u in 0..width {
                let x = (u as f64 - intrinsics.cx) * inv_fx;
                rays.push(Point3::new(x as f32, y as f32, 1.0));
            }
        }

        Some(Self {
            width,
            height,
            intrinsics: *intrinsics,
            rays,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.rays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rays.is_empty()
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    /// Ray for pixel (u, v); `None` outside the table
    #[inline]
    pub fn ray(&self, u: usize, v: usize) -> Option<&Point3> {
        if u >= self.width || v >= self.height {
            return None;
        }
        self.rays.get(v * self.width + u)
    }

    /// One row of rays
    #[inline]
    pub fn row(&self, v: usize) -> &[Point3] {
        let start = v * self.width;
        &self.rays[start..start + self.width]
    }

    /// Whether this table was built from exactly these inputs
    pub fn matches(&self, intrinsics: &CameraIntrinsics, width: usize, height: usize) -> bool {
        self.width == width && self.height == height && self.intrinsics == *intrinsics
    }
}

/// Readiness of the projection model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    /// A table matching the current calibration is available
    Ready,
    /// No usable calibration has been seen yet
    NotReady,
}

/// Holder that rebuilds the projection table when its inputs change
///
/// Readers take an `Arc` snapshot of the table; a rebuild swaps in a new
/// table and never touches one that is being read.
#[derive(Debug, Default)]
pub struct ProjectionModel {
    table: RwLock<Option<Arc<ProjectionTable>>>,
}

impl ProjectionModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current table, if one is ready
    pub fn table(&self) -> Option<Arc<ProjectionTable>> {
        match self.table.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn status(&self) -> ModelStatus {
        if self.table().is_some() {
            ModelStatus::Ready
        } else {
            ModelStatus::NotReady
        }
    }

    /// Make sure the table matches `calibration` at the given resolution
    ///
    /// Rebuilds only when the intrinsics or the resolution changed. Without a
    /// calibration record the model drops its table and reports not ready.
    pub fn refresh(
        &self,
        calibration: Option<&CalibrationInfo>,
        width: usize,
        height: usize,
    ) -> Option<Arc<ProjectionTable>> {
        let Some(info) = calibration else {
            if self.replace(None) {
                warn!("Depth calibration unavailable, point clouds withheld");
            }
            return None;
        };

        let intrinsics = info.intrinsics_for(width, height);
        if let Some(current) = self.table() {
            if current.matches(&intrinsics, width, height) {
                return Some(current);
            }
        }

        match ProjectionTable::build(&intrinsics, width, height) {
            Some(table) => {
                info!(
                    width,
                    height,
                    fx = intrinsics.fx,
                    fy = intrinsics.fy,
                    cx = intrinsics.cx,
                    cy = intrinsics.cy,
                    "Built depth projection table"
                );
                let table = Arc::new(table);
                self.replace(Some(Arc::clone(&table)));
                Some(table)
            }
            None => {
                if self.replace(None) {
                    warn!(?intrinsics, "Unusable depth intrinsics, point clouds withheld");
                } else {
                    debug!(?intrinsics, "Depth intrinsics still unusable");
                }
                None
            }
        }
    }

    /// Swap the table, returning whether a table was previously present
    fn replace(&self, table: Option<Arc<ProjectionTable>>) -> bool {
        let mut guard = match self.table.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let had = guard.is_some();
        *guard = table;
        had
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_size_and_entries() {
        let k = CameraIntrinsics::new(500.0, 400.0, 31.5, 23.5);
        let table = ProjectionTable::build(&k, 64, 48).unwrap();
        assert_eq!(table.len(), 64 * 48);

        for (u, v) in [(0, 0), (63, 0), (0, 47), (63, 47), (31, 23), (10, 40)] {
            let ray = table.ray(u, v).unwrap();
            let ex = (u as f64 - k.cx) / k.fx;
            let ey = (v as f64 - k.cy) / k.fy;
            assert!((ray.x as f64 - ex).abs() < 1e-6, "x at ({}, {})", u, v);
            assert!((ray.y as f64 - ey).abs() < 1e-6, "y at ({}, {})", u, v);
            assert_eq!(ray.z, 1.0);
        }
        assert!(table.ray(64, 0).is_none());
    }

    #[test]
    fn test_unusable_intrinsics_produce_no_table() {
        let k = CameraIntrinsics::new(0.0, 0.0, 0.0, 0.0);
        assert!(ProjectionTable::build(&k, 4, 4).is_none());
    }

    #[test]
    fn test_model_rebuilds_on_change_only() {
        let model = ProjectionModel::new();
        assert_eq!(model.status(), ModelStatus::NotReady);

        let info = CalibrationInfo::kinect_depth();
        let first = model.refresh(Some(&info), 640, 480).unwrap();
        let again = model.refresh(Some(&info), 640, 480).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let mut changed = info.clone();
        changed.intrinsics.fx += 1.0;
        let rebuilt = model.refresh(Some(&changed), 640, 480).unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));

        let resized = model.refresh(Some(&changed), 320, 240).unwrap();
        assert_eq!(resized.len(), 320 * 240);
        // Calibrated at 640x480, the half-size table uses halved intrinsics
        assert_eq!(resized.intrinsics(), &changed.intrinsics_for(320, 240));
        assert!((resized.intrinsics().fx - changed.intrinsics.fx / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_model_not_ready_without_calibration() {
        let model = ProjectionModel::new();
        model.refresh(Some(&CalibrationInfo::kinect_depth()), 8, 8);
        assert_eq!(model.status(), ModelStatus::Ready);
        assert!(model.refresh(None, 8, 8).is_none());
        assert_eq!(model.status(), ModelStatus::NotReady);
    }
}

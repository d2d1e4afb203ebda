// SPDX-License-Identifier: GPL-3.0-only

//! Depth frame to point cloud conversion
//!
//! Both cloud forms scan the region of interest row-major from its top-left
//! pixel. The unordered form keeps valid points only; the structured form
//! keeps one entry per ROI pixel so it lines up with the image grid.

use serde::{Deserialize, Serialize};

use super::Point3;
use super::depth::DepthRange;
use super::projection::ProjectionTable;
use crate::errors::ConfigError;

/// Rectangular pixel subrange of the depth frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl RegionOfInterest {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// ROI covering a whole `width` x `height` frame
    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Check the ROI lies inside a `frame_width` x `frame_height` frame
    ///
    /// A zero-area ROI is valid as long as its origin is inside the frame.
    pub fn validate(&self, frame_width: usize, frame_height: usize) -> Result<(), ConfigError> {
        if self.x >= frame_width {
            return Err(ConfigError::new(
                "roi_horiz_start",
                format!("{} is outside a {} pixel wide frame", self.x, frame_width),
            ));
        }
        if self.x + self.width > frame_width {
            return Err(ConfigError::new(
                "roi_horiz_width",
                format!(
                    "start {} + width {} exceeds frame width {}",
                    self.x, self.width, frame_width
                ),
            ));
        }
        if self.y >= frame_height {
            return Err(ConfigError::new(
                "roi_vert_start",
                format!("{} is outside a {} pixel high frame", self.y, frame_height),
            ));
        }
        if self.y + self.height > frame_height {
            return Err(ConfigError::new(
                "roi_vert_height",
                format!(
                    "start {} + height {} exceeds frame height {}",
                    self.y, self.height, frame_height
                ),
            ));
        }
        Ok(())
    }

    fn fits(&self, frame_width: usize, frame_height: usize) -> bool {
        self.x + self.width <= frame_width && self.y + self.height <= frame_height
    }
}

/// Point cloud that keeps the ROI's row/column layout
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructuredCloud {
    /// ROI this cloud was built from (origin in image coordinates)
    pub roi: RegionOfInterest,
    /// `roi.width * roi.height` entries, invalid ones set to [`Point3::INVALID`]
    pub points: Vec<Point3>,
}

impl StructuredCloud {
    pub fn width(&self) -> usize {
        self.roi.width
    }

    pub fn height(&self) -> usize {
        self.roi.height
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Entry at ROI-relative column `col`, row `row`
    pub fn get(&self, col: usize, row: usize) -> Option<&Point3> {
        if col >= self.roi.width || row >= self.roi.height {
            return None;
        }
        self.points.get(row * self.roi.width + col)
    }

    /// Image coordinates of the entry at `index`
    pub fn pixel_of(&self, index: usize) -> Option<(usize, usize)> {
        if self.roi.width == 0 || index >= self.points.len() {
            return None;
        }
        Some((
            self.roi.x + index % self.roi.width,
            self.roi.y + index / self.roi.width,
        ))
    }

    pub fn valid_count(&self) -> usize {
        self.points.iter().filter(|p| p.is_valid()).count()
    }

    pub fn invalid_count(&self) -> usize {
        self.points.len() - self.valid_count()
    }

    /// Packed little-endian xyz float triplets, 12 bytes per entry
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.points)
    }
}

/// Convert depth frames into point clouds
///
/// Borrows the depth buffer and projection table for the duration of one
/// frame. Mismatched buffer sizes or an ROI outside the frame produce empty
/// clouds.
pub struct PointCloudBuilder<'a> {
    depth: &'a [u16],
    table: Option<&'a ProjectionTable>,
    roi: RegionOfInterest,
    range: DepthRange,
}

impl<'a> PointCloudBuilder<'a> {
    pub fn new(
        depth: &'a [u16],
        table: Option<&'a ProjectionTable>,
        roi: RegionOfInterest,
        range: DepthRange,
    ) -> Self {
        Self {
            depth,
            table,
            roi,
            range,
        }
    }

    /// The table, if it can be used with this depth buffer and ROI
    fn usable_table(&self) -> Option<&'a ProjectionTable> {
        let table = self.table?;
        if self.roi.is_empty()
            || self.depth.len() != table.len()
            || !self.roi.fits(table.width(), table.height())
        {
            return None;
        }
        Some(table)
    }

    /// Scan the ROI, handing each pixel's point (or `None`) to `f`
    fn scan(&self, table: &ProjectionTable, mut f: impl FnMut(Option<Point3>)) {
        let width = table.width();
        for v in self.roi.y..self.roi.y + self.roi.height {
            let rays = &table.row(v)[self.roi.x..self.roi.x + self.roi.width];
            let depth_row = &self.depth[v * width + self.roi.x..v * width + self.roi.x + self.roi.width];
            for (ray, &raw) in rays.iter().zip(depth_row) {
                f(self.range.decode(raw).map(|d| ray.scaled(d as f32)));
            }
        }
    }

    /// Valid points only
    pub fn unordered(&self) -> Vec<Point3> {
        let Some(table) = self.usable_table() else {
            return Vec::new();
        };
        let mut points = Vec::with_capacity(self.roi.area());
        self.scan(table, |p| {
            if let Some(p) = p {
                points.push(p);
            }
        });
        points
    }

    /// One entry per ROI pixel
    pub fn structured(&self) -> StructuredCloud {
        let Some(table) = self.usable_table() else {
            return StructuredCloud::default();
        };
        let mut points = Vec::with_capacity(self.roi.area());
        self.scan(table, |p| points.push(p.unwrap_or(Point3::INVALID)));
        StructuredCloud {
            roi: self.roi,
            points,
        }
    }
}

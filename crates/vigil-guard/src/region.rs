//! Region lock: the bounded rectangle all action coordinates are
//! confined to.
//!
//! Violations are rejected, never silently clamped to a different
//! location -- a clamped click would land somewhere the operator did not
//! approve.

use vigil_core::error::VigilError;
use vigil_core::types::{ActionStep, Point, Rect};

/// Validates coordinates against the configured region rectangle.
#[derive(Debug, Clone)]
pub struct RegionLock {
    region: Rect,
}

impl RegionLock {
    pub fn new(region: Rect) -> Self {
        Self { region }
    }

    pub fn region(&self) -> Rect {
        self.region
    }

    /// Reject a point outside the locked region.
    pub fn validate_point(&self, p: Point) -> Result<(), VigilError> {
        if self.region.contains(p) {
            Ok(())
        } else {
            Err(VigilError::OutOfRegion { x: p.x, y: p.y })
        }
    }

    /// Reject a rectangle not fully contained in the locked region.
    pub fn validate_rect(&self, r: &Rect) -> Result<(), VigilError> {
        if self.region.contains_rect(r) {
            Ok(())
        } else {
            Err(VigilError::OutOfRegion { x: r.x, y: r.y })
        }
    }

    /// Validate an action step's target. Steps without a coordinate
    /// (key presses, waits) are inherently region-safe: they act on the
    /// focused window inside the captured region.
    pub fn validate_action(&self, action: &ActionStep) -> Result<(), VigilError> {
        match action.coord() {
            Some(p) => self.validate_point(p),
            None => Ok(()),
        }
    }
}

use nalgebra::{Matrix2, Vector2};
use thiserror::Error;

use crate::zeroing::LocalPose;

/// Baselines shorter than this are rejected as degenerate before any
/// normalization happens, so a repeated capture can never divide by zero.
const MIN_BASELINE_M: f64 = 1e-9;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("incomplete calibration: capture points A, B and C first")]
    Incomplete,
    #[error("degenerate calibration: points must be distinct and non-collinear")]
    Degenerate,
    #[error("no local pose available to capture yet")]
    NoPose,
}

/// Local-frame to world-frame mapping: `world = R * local + T`.
///
/// Fully defined or absent; a partial point set never produces one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationTransform {
    rotation: Matrix2<f64>,
    translation: Vector2<f64>,
}

impl CalibrationTransform {
    pub fn apply(&self, dx: f64, dy: f64) -> (f64, f64) {
        let world = self.rotation * Vector2::new(dx, dy) + self.translation;
        (world.x, world.y)
    }
}

/// The three captured local-frame points. A is the world origin, B marks
/// the +X (lateral) direction and C the +Y (forward) direction.
#[derive(Debug, Default)]
pub struct CalibrationPoints {
    a: Option<Vector2<f64>>,
    b: Option<Vector2<f64>>,
    c: Option<Vector2<f64>>,
}

impl CalibrationPoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture_a(&mut self, pose: &LocalPose) {
        self.a = Some(Vector2::new(pose.dx, pose.dy));
        log::info!("[CAL] point A captured at ({:.3}, {:.3})", pose.dx, pose.dy);
    }

    pub fn capture_b(&mut self, pose: &LocalPose) {
        self.b = Some(Vector2::new(pose.dx, pose.dy));
        log::info!("[CAL] point B captured at ({:.3}, {:.3})", pose.dx, pose.dy);
    }

    pub fn capture_c(&mut self, pose: &LocalPose) {
        self.c = Some(Vector2::new(pose.dx, pose.dy));
        log::info!("[CAL] point C captured at ({:.3}, {:.3})", pose.dx, pose.dy);
    }

    /// Solve the local-to-world transform from the captured points.
    ///
    /// `ux = normalize(B - A)` is the lateral axis, `uy = normalize(C - A)`
    /// the forward axis; the transform maps A to the world origin.
    pub fn finish(&self) -> Result<CalibrationTransform, CalibrationError> {
        let a = self.a.ok_or(CalibrationError::Incomplete)?;
        let b = self.b.ok_or(CalibrationError::Incomplete)?;
        let c = self.c.ok_or(CalibrationError::Incomplete)?;

        let ab = b - a;
        let ac = c - a;
        if ab.norm() < MIN_BASELINE_M || ac.norm() < MIN_BASELINE_M {
            return Err(CalibrationError::Degenerate);
        }

        let ux = ab / ab.norm();
        let uy = ac / ac.norm();

        let rotation = Matrix2::new(ux.x, uy.x, ux.y, uy.y);
        // Collinear captures leave the matrix singular.
        if rotation.determinant().abs() < MIN_BASELINE_M {
            return Err(CalibrationError::Degenerate);
        }

        let translation = -(rotation * a);
        Ok(CalibrationTransform {
            rotation,
            translation,
        })
    }
}

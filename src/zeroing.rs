use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::telemetry::PoseSample;

/// Yaw readings at or below this magnitude are treated as the tracker
/// still warming up, so they never anchor the heading reference.
pub const YAW_DEADBAND_DEG: f64 = 0.1;

/// Drone displacement relative to the zeroed origin, in meters, with yaw
/// in degrees normalized to (-180, 180].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalPose {
    pub dx: f64,
    pub dy: f64,
    pub yaw: f64,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("yaw origin not anchored yet, sample dropped")]
pub struct YawNotYetValid;

/// Origin and heading reference for the raw VIO stream.
///
/// The position origin latches on the first sample seen. The yaw origin
/// waits for the first sample whose raw yaw clears the deadband, since
/// the tracker reports zero/garbage yaw for a while after startup.
#[derive(Debug, Default)]
pub struct ReferenceFrame {
    origin_pos: Option<(f64, f64)>,
    origin_yaw: Option<f64>,
}

impl ReferenceFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a raw sample into a drone-local displacement.
    ///
    /// Returns `Err(YawNotYetValid)` while the heading reference is still
    /// pending; the caller must drop the sample, not zero it against zero.
    pub fn zero(&mut self, sample: &PoseSample) -> Result<LocalPose, YawNotYetValid> {
        let (origin_x, origin_y) = *self
            .origin_pos
            .get_or_insert((sample.raw_x, sample.raw_y));

        let origin_yaw = match self.origin_yaw {
            Some(yaw) => yaw,
            None => {
                if sample.raw_yaw_deg.abs() <= YAW_DEADBAND_DEG {
                    return Err(YawNotYetValid);
                }
                log::info!(
                    "[ZERO] yaw reference anchored at {:.2} deg",
                    sample.raw_yaw_deg
                );
                self.origin_yaw = Some(sample.raw_yaw_deg);
                sample.raw_yaw_deg
            }
        };

        Ok(LocalPose {
            dx: sample.raw_x - origin_x,
            dy: sample.raw_y - origin_y,
            yaw: normalize_deg(sample.raw_yaw_deg - origin_yaw),
        })
    }

    /// Drop only the heading reference. The next valid-yaw sample
    /// re-anchors heading without disturbing the translational origin.
    pub fn rezero_yaw(&mut self) {
        self.origin_yaw = None;
        log::info!("[ZERO] yaw reference cleared, re-anchoring on next valid sample");
    }

    pub fn is_anchored(&self) -> bool {
        self.origin_pos.is_some() && self.origin_yaw.is_some()
    }
}

/// Map an angle in degrees into (-180, 180] by repeated +/-360 adjustment.
pub fn normalize_deg(mut angle: f64) -> f64 {
    while angle > 180.0 {
        angle -= 360.0;
    }
    while angle <= -180.0 {
        angle += 360.0;
    }
    angle
}

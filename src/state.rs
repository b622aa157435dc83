use std::sync::{Arc, Mutex};

use crate::calibration::{CalibrationError, CalibrationPoints, CalibrationTransform};
use crate::controller::{self, ControlMode, ControlState, Gains, MotorCommand};
use crate::telemetry::PoseSample;
use crate::zeroing::{LocalPose, ReferenceFrame};

/// Pose in the shared world frame (identity pass-through before a
/// calibration exists). This is what goes out to observers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldPose {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
    pub quality: f64,
}

impl WorldPose {
    /// Compact text record pushed to every observer.
    pub fn csv_record(&self) -> String {
        format!(
            "{:.3},{:.3},{:.3},{:.3},{:.0}",
            self.timestamp, self.x, self.y, self.yaw, self.quality
        )
    }
}

pub type SharedState = Arc<Mutex<TrackerState>>;

pub fn shared(quality_min: f64) -> SharedState {
    Arc::new(Mutex::new(TrackerState::new(quality_min)))
}

/// All mutable tracker state, guarded by one mutex. The three runtime
/// activities (ingestion, control tick, command ingress) only ever talk
/// to each other through this struct, with short critical sections and
/// no awaiting while locked.
pub struct TrackerState {
    quality_min: f64,
    reference: ReferenceFrame,
    points: CalibrationPoints,
    calibration: Option<CalibrationTransform>,
    current_local: Option<LocalPose>,

    pub drone_x: f64,
    pub drone_y: f64,
    pub drone_yaw: f64,
    pub quality: f64,
    pub last_good_x: f64,
    pub last_good_y: f64,

    pub control: ControlState,
}

impl TrackerState {
    pub fn new(quality_min: f64) -> Self {
        TrackerState {
            quality_min,
            reference: ReferenceFrame::new(),
            points: CalibrationPoints::new(),
            calibration: None,
            current_local: None,
            drone_x: 0.0,
            drone_y: 0.0,
            drone_yaw: 0.0,
            quality: 100.0,
            last_good_x: 0.0,
            last_good_y: 0.0,
            control: ControlState::default(),
        }
    }

    /// Feed one raw sample from the local odometry process. Returns the
    /// world pose to broadcast when the sample was accepted.
    pub fn apply_vio_sample(&mut self, sample: &PoseSample) -> Option<WorldPose> {
        let local = match self.reference.zero(sample) {
            Ok(local) => local,
            Err(_) => {
                log::debug!("[VIO] sample dropped, yaw reference still pending");
                return None;
            }
        };
        self.accept_local(sample.timestamp, local, sample.quality.unwrap_or(100.0), false)
    }

    /// Feed one pose record received over the command port. These arrive
    /// already zeroed by the remote sender, so they skip the reference
    /// frame and go straight through the calibration transform.
    pub fn apply_remote_pose(
        &mut self,
        timestamp: f64,
        x: f64,
        y: f64,
        quality: f64,
        reset_flag: bool,
    ) -> Option<WorldPose> {
        let local = LocalPose { dx: x, dy: y, yaw: 0.0 };
        self.accept_local(timestamp, local, quality, reset_flag)
    }

    fn accept_local(
        &mut self,
        timestamp: f64,
        local: LocalPose,
        quality: f64,
        reset_flag: bool,
    ) -> Option<WorldPose> {
        self.current_local = Some(local);

        if quality < self.quality_min {
            // Untrusted sample: the tracked position freezes at the last
            // good pose, only the quality field follows the stream.
            self.quality = quality;
            log::warn!(
                "[WARN] low VIO quality ({:.0}), holding last good position",
                quality
            );
            return None;
        }

        // Latch the recovery target before this (already re-zeroed) sample
        // overwrites the last good pose.
        if reset_flag && self.control.reset_anchor.is_none() {
            self.control.reset_anchor = Some((self.last_good_x, self.last_good_y));
            log::info!(
                "[SYNC] upstream VIO reset detected, driving to ({:.3}, {:.3})",
                self.last_good_x,
                self.last_good_y
            );
        }

        let (x, y) = self.to_world(local.dx, local.dy);
        self.drone_x = x;
        self.drone_y = y;
        self.drone_yaw = local.yaw;
        self.quality = quality;
        self.last_good_x = x;
        self.last_good_y = y;

        Some(WorldPose {
            timestamp,
            x,
            y,
            yaw: local.yaw,
            quality,
        })
    }

    fn to_world(&self, dx: f64, dy: f64) -> (f64, f64) {
        match &self.calibration {
            Some(transform) => transform.apply(dx, dy),
            None => (dx, dy),
        }
    }

    pub fn calibrated(&self) -> bool {
        self.calibration.is_some()
    }

    pub fn control_tick(&mut self, gains: &Gains) -> MotorCommand {
        controller::tick(
            &mut self.control,
            (self.drone_x, self.drone_y),
            (self.last_good_x, self.last_good_y),
            gains,
        )
    }

    // --- command ingress mutations ---

    pub fn set_continuous(&mut self) {
        self.control.mode = ControlMode::ContinuousFollow;
        self.control.trigger_pending = false;
        log::info!("[MODE] FOLLOW MODE");
    }

    pub fn set_wait(&mut self) {
        self.control.mode = ControlMode::WaitForTrigger;
        self.control.trigger_pending = false;
        log::info!("[MODE] WAIT MODE, waiting for trigger");
    }

    pub fn trigger_once(&mut self) {
        self.control.trigger_pending = true;
        log::info!("[CMD] COME-TO-ME TRIGGERED");
    }

    pub fn goto(&mut self, x: f64, y: f64) {
        self.control.goto_target = Some((x, y));
        log::info!("[GOTO] target set to ({:.3}, {:.3})", x, y);
    }

    pub fn cancel_goto(&mut self) {
        if self.control.goto_target.take().is_some() {
            log::info!("[GOTO] cancelled");
        }
    }

    pub fn capture_a(&mut self) -> Result<LocalPose, CalibrationError> {
        let pose = self.current_local.ok_or(CalibrationError::NoPose)?;
        self.points.capture_a(&pose);
        Ok(pose)
    }

    pub fn capture_b(&mut self) -> Result<LocalPose, CalibrationError> {
        let pose = self.current_local.ok_or(CalibrationError::NoPose)?;
        self.points.capture_b(&pose);
        Ok(pose)
    }

    pub fn capture_c(&mut self) -> Result<LocalPose, CalibrationError> {
        let pose = self.current_local.ok_or(CalibrationError::NoPose)?;
        self.points.capture_c(&pose);
        Ok(pose)
    }

    /// Solve and atomically install the calibration. On failure the
    /// previous transform (or pass-through) stays in effect.
    pub fn finish_calibration(&mut self) -> Result<(), CalibrationError> {
        let transform = self.points.finish()?;
        self.calibration = Some(transform);
        log::info!("[CAL] calibration complete, world frame active");
        Ok(())
    }

    pub fn rezero_yaw(&mut self) {
        self.reference.rezero_yaw();
    }
}

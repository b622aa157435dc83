use serde::Serialize;

/// Base follow mode. A pending goto target overrides either mode until
/// it is reached or cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlMode {
    ContinuousFollow,
    WaitForTrigger,
}

/// Differential-drive command sent to the rover: forward throttle plus
/// per-track outputs, each clamped to [-1, 1].
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MotorCommand {
    #[serde(rename = "T")]
    pub throttle: f64,
    #[serde(rename = "L")]
    pub left: f64,
    #[serde(rename = "R")]
    pub right: f64,
}

impl MotorCommand {
    pub const STOP: MotorCommand = MotorCommand {
        throttle: 0.0,
        left: 0.0,
        right: 0.0,
    };

    pub fn is_stop(&self) -> bool {
        self.throttle == 0.0 && self.left == 0.0 && self.right == 0.0
    }

    /// Wire form carries three decimals, matching the rover firmware's
    /// expectations.
    pub fn rounded(&self) -> MotorCommand {
        MotorCommand {
            throttle: round3(self.throttle),
            left: round3(self.left),
            right: round3(self.right),
        }
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Proportional gains and loop constants.
#[derive(Clone, Copy, Debug)]
pub struct Gains {
    /// Forward gain on the y error.
    pub kt: f64,
    /// Turn gain on the x error.
    pub kr: f64,
    /// Arrival radius in meters.
    pub stop_distance: f64,
    /// Dead-reckoning integrator step, used only while no measured rover
    /// position feed exists.
    pub sim_step: f64,
}

impl Default for Gains {
    fn default() -> Self {
        Gains {
            kt: 0.8,
            kr: 1.2,
            stop_distance: 0.05,
            sim_step: 0.1,
        }
    }
}

/// Mode flags plus the controller's own rover position estimate.
#[derive(Clone, Copy, Debug)]
pub struct ControlState {
    pub mode: ControlMode,
    pub trigger_pending: bool,
    pub goto_target: Option<(f64, f64)>,
    /// Pre-reset pose latched the moment an upstream reset is detected.
    /// The post-reset stream keeps refreshing `last_good`, so the target
    /// of the recovery drive has to be frozen here.
    pub reset_anchor: Option<(f64, f64)>,
    pub rover_x: f64,
    pub rover_y: f64,
}

impl Default for ControlState {
    fn default() -> Self {
        ControlState {
            mode: ControlMode::ContinuousFollow,
            trigger_pending: false,
            goto_target: None,
            reset_anchor: None,
            rover_x: 0.0,
            rover_y: 0.0,
        }
    }
}

/// One control tick.
///
/// Target priority: goto target, then the latched pre-reset pose while an
/// upstream reset is being recovered, then the last known-good pose while
/// a trigger is pending, then the live pose in follow mode, else the
/// rover holds station on its own position.
///
/// Within the arrival radius the command is exactly zero and the one-shot
/// condition that supplied this tick's target completes; unrelated
/// pending conditions stay armed. Otherwise a proportional law produces
/// the command and the dead-reckoning estimate advances by
/// `sim_step * error`.
pub fn tick(
    ctl: &mut ControlState,
    drone: (f64, f64),
    last_good: (f64, f64),
    gains: &Gains,
) -> MotorCommand {
    let target = if let Some(t) = ctl.goto_target {
        t
    } else if let Some(anchor) = ctl.reset_anchor {
        anchor
    } else if ctl.trigger_pending {
        last_good
    } else if ctl.mode == ControlMode::ContinuousFollow {
        drone
    } else {
        (ctl.rover_x, ctl.rover_y)
    };

    let ex = target.0 - ctl.rover_x;
    let ey = target.1 - ctl.rover_y;
    let distance = ex.hypot(ey);

    if distance < gains.stop_distance {
        if ctl.goto_target.is_some() {
            ctl.goto_target = None;
            log::info!("[GOTO] target reached");
        } else if ctl.reset_anchor.is_some() {
            // The upstream odometry silently re-zeroed; now that the rover
            // estimate has converged on the pre-reset pose, restart the
            // local bookkeeping from the origin.
            ctl.reset_anchor = None;
            ctl.rover_x = 0.0;
            ctl.rover_y = 0.0;
            log::info!("[SYNC] reached last valid pose, resetting rover estimate to origin");
        } else if ctl.trigger_pending {
            ctl.trigger_pending = false;
            log::info!("[CMD] arrived, completing come-to-me");
        }
        return MotorCommand::STOP;
    }

    let throttle = clamp_unit(gains.kt * ey);
    let turn = clamp_unit(gains.kr * ex);
    let command = MotorCommand {
        throttle,
        left: clamp_unit(throttle - turn),
        right: clamp_unit(throttle + turn),
    };

    ctl.rover_x += gains.sim_step * ex;
    ctl.rover_y += gains.sim_step * ey;

    command
}

fn clamp_unit(v: f64) -> f64 {
    v.clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_convergence_to_target() {
        let mut ctl = ControlState {
            goto_target: Some((1.0, 0.0)),
            ..Default::default()
        };
        let gains = Gains::default();

        let mut prev_distance = f64::INFINITY;
        for _ in 0..200 {
            let cmd = tick(&mut ctl, (0.0, 0.0), (0.0, 0.0), &gains);
            let distance = (1.0 - ctl.rover_x).hypot(ctl.rover_y);
            if cmd.is_stop() {
                assert_eq!(cmd, MotorCommand::STOP);
                assert!(ctl.goto_target.is_none());
                return;
            }
            assert!(distance < prev_distance, "distance must strictly decrease");
            prev_distance = distance;
        }
        panic!("controller never arrived");
    }

    #[test]
    fn test_proportional_law() {
        let mut ctl = ControlState::default();
        let cmd = tick(&mut ctl, (1.0, 0.0), (1.0, 0.0), &Gains::default());

        // Pure lateral error: no forward term, full opposing tracks.
        assert_relative_eq!(cmd.throttle, 0.0);
        assert_relative_eq!(cmd.left, -1.0);
        assert_relative_eq!(cmd.right, 1.0);
    }

    #[test]
    fn test_wait_mode_holds_station() {
        let mut ctl = ControlState {
            mode: ControlMode::WaitForTrigger,
            ..Default::default()
        };
        let gains = Gains::default();

        // Drone keeps moving, rover must not drift.
        for i in 0..50 {
            let drone = (i as f64 * 0.1, 1.0);
            let cmd = tick(&mut ctl, drone, drone, &gains);
            assert!(cmd.is_stop());
            assert_relative_eq!(ctl.rover_x, 0.0);
            assert_relative_eq!(ctl.rover_y, 0.0);
        }
    }

    #[test]
    fn test_trigger_targets_last_good_and_clears_on_arrival() {
        let mut ctl = ControlState {
            mode: ControlMode::WaitForTrigger,
            trigger_pending: true,
            ..Default::default()
        };
        let gains = Gains::default();

        // Live pose is elsewhere; the trigger drives toward last-good.
        let last_good = (0.0, 1.0);
        for _ in 0..200 {
            let cmd = tick(&mut ctl, (5.0, 5.0), last_good, &gains);
            if cmd.is_stop() {
                assert!(!ctl.trigger_pending, "one-shot trigger must clear");
                assert!(ctl.rover_y > 0.9);
                return;
            }
        }
        panic!("trigger never completed");
    }

    #[test]
    fn test_reset_sync_returns_estimate_to_origin() {
        let mut ctl = ControlState {
            reset_anchor: Some((1.0, 1.0)),
            rover_x: 0.5,
            rover_y: 0.5,
            ..Default::default()
        };
        let gains = Gains::default();

        for _ in 0..200 {
            let cmd = tick(&mut ctl, (0.0, 0.0), (0.0, 0.0), &gains);
            if cmd.is_stop() {
                assert!(ctl.reset_anchor.is_none());
                assert_relative_eq!(ctl.rover_x, 0.0);
                assert_relative_eq!(ctl.rover_y, 0.0);
                return;
            }
        }
        panic!("reset sync never completed");
    }

    #[test]
    fn test_reset_recovery_ignores_post_reset_stream() {
        let mut ctl = ControlState {
            reset_anchor: Some((5.0, 5.0)),
            ..Default::default()
        };
        let gains = Gains::default();

        // The re-zeroed stream sits near the origin; last_good follows it.
        // The recovery drive must still head for the latched anchor, not
        // stop on the spot.
        let cmd = tick(&mut ctl, (0.02, 0.0), (0.02, 0.0), &gains);
        assert!(!cmd.is_stop());
        assert!(cmd.throttle > 0.0);
        assert!(ctl.rover_x > 0.0 && ctl.rover_y > 0.0);
    }

    #[test]
    fn test_goto_arrival_leaves_pending_trigger_armed() {
        let mut ctl = ControlState {
            mode: ControlMode::WaitForTrigger,
            trigger_pending: true,
            goto_target: Some((0.0, 0.0)),
            ..Default::default()
        };
        let gains = Gains::default();

        // Already inside the arrival radius of the goto target: the goto
        // completes, the unrelated trigger stays armed.
        let cmd = tick(&mut ctl, (5.0, 5.0), (3.0, 3.0), &gains);
        assert!(cmd.is_stop());
        assert!(ctl.goto_target.is_none());
        assert!(ctl.trigger_pending);

        // The very next tick serves the trigger toward last-good.
        let cmd = tick(&mut ctl, (5.0, 5.0), (3.0, 3.0), &gains);
        assert!(!cmd.is_stop());
    }

    #[test]
    fn test_goto_overrides_follow() {
        let mut ctl = ControlState {
            goto_target: Some((0.0, 2.0)),
            ..Default::default()
        };
        let cmd = tick(&mut ctl, (-2.0, 0.0), (-2.0, 0.0), &Gains::default());

        // Moving toward +y, not toward the live drone pose at -x.
        assert!(cmd.throttle > 0.0);
        assert!(ctl.rover_y > 0.0);
        assert_relative_eq!(ctl.rover_x, 0.0);
    }

    #[test]
    fn test_command_rounding() {
        let cmd = MotorCommand {
            throttle: 0.123456,
            left: -0.999999,
            right: 1.0,
        }
        .rounded();
        assert_relative_eq!(cmd.throttle, 0.123);
        assert_relative_eq!(cmd.left, -1.0);
        assert_relative_eq!(cmd.right, 1.0);
    }
}

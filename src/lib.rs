//! Drone VIO to rover follow bridge.
//!
//! Fuses the drone's visual-inertial odometry stream into a stable,
//! zero-referenced, world-calibrated pose, broadcasts it to WebSocket
//! observers, and drives a ground rover toward it under a follow / wait /
//! goto mode state machine with quality gating and reset recovery.
//!
//! Pipeline: [`telemetry`] parses raw odometry lines, [`zeroing`]
//! anchors the origin and heading, [`calibration`] maps the drone-local
//! frame into the shared world frame, [`controller`] turns the target
//! into motor commands, and [`ws`] / [`rover_link`] carry the results to
//! observers and the rover. [`ingress`] feeds external commands into
//! [`state`], the single mutex-guarded home of all mutable state.

pub mod calibration;
pub mod controller;
pub mod ingress;
pub mod rover_link;
pub mod state;
pub mod telemetry;
pub mod ws;
pub mod zeroing;

//! Command ingress: plain-text datagrams carrying mode changes, goto and
//! calibration triggers, and pose records from a remote zeroed sender.
//! Unrecognized tokens are ignored, never errors.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::UdpSocket;

use crate::state::{SharedState, WorldPose};
use crate::ws::ObserverHub;

#[derive(Clone, Debug, PartialEq)]
pub enum IngressCommand {
    SetContinuous,
    SetWait,
    TriggerOnce,
    CancelGoto,
    Goto { x: f64, y: f64 },
    CaptureA,
    CaptureB,
    CaptureC,
    FinishCalibration,
    RezeroYaw,
    Pose {
        timestamp: f64,
        x: f64,
        y: f64,
        quality: f64,
        reset: bool,
    },
}

/// Decode one datagram. Anything that is neither a known token nor a
/// pose record yields `None`.
pub fn parse_datagram(msg: &str) -> Option<IngressCommand> {
    let msg = msg.trim();
    match msg {
        "MODE_CONTINUOUS" => return Some(IngressCommand::SetContinuous),
        "MODE_COME_TO_ME" => return Some(IngressCommand::SetWait),
        "CMD_COME_TO_ME" => return Some(IngressCommand::TriggerOnce),
        "CMD_CANCEL_GOTO" => return Some(IngressCommand::CancelGoto),
        "CAL_A" => return Some(IngressCommand::CaptureA),
        "CAL_B" => return Some(IngressCommand::CaptureB),
        "CAL_C" => return Some(IngressCommand::CaptureC),
        "CAL_FINISH" => return Some(IngressCommand::FinishCalibration),
        "CAL_REZERO_YAW" => return Some(IngressCommand::RezeroYaw),
        _ => {}
    }

    if let Some(rest) = msg.strip_prefix("GOTO ") {
        let mut fields = rest.split_whitespace();
        let x = fields.next()?.parse().ok()?;
        let y = fields.next()?.parse().ok()?;
        return Some(IngressCommand::Goto { x, y });
    }

    parse_pose_record(msg)
}

/// Pose records are `ts,x,y,q` with an optional trailing reset flag. A
/// sender that batches lines only has its newest line honored.
fn parse_pose_record(msg: &str) -> Option<IngressCommand> {
    let line = msg.lines().last()?.trim();
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 4 {
        return None;
    }

    let timestamp = fields[0].trim().parse().ok()?;
    let x = fields[1].trim().parse().ok()?;
    let y = fields[2].trim().parse().ok()?;
    // The sender writes `-` when the tracker reported no quality column;
    // an absent quality is treated as trusted.
    let quality_field = fields[3].trim().trim_end_matches('%');
    let quality = if quality_field == "-" {
        100.0
    } else {
        quality_field.parse().ok()?
    };
    let reset = fields.get(4).map(|f| f.trim() == "1").unwrap_or(false);

    Some(IngressCommand::Pose {
        timestamp,
        x,
        y,
        quality,
        reset,
    })
}

/// Listener task. Each datagram is decoded and applied to shared state
/// immediately, so the state always holds the newest value and no drain
/// loop is needed. Calibration triggers answer the sender with one
/// success/failure line.
pub async fn listen(socket: UdpSocket, state: SharedState, hub: Arc<ObserverHub>) -> Result<()> {
    let mut buf = [0u8; 1024];
    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        let msg = String::from_utf8_lossy(&buf[..len]);

        let Some(command) = parse_datagram(&msg) else {
            continue;
        };

        let (broadcast, reply) = apply(&command, &state);
        if let Some(pose) = broadcast {
            hub.broadcast(&pose.csv_record()).await;
        }
        if let Some(text) = reply {
            // Best effort: the sender may already be gone.
            let _ = socket.send_to(text.as_bytes(), peer).await;
        }
    }
}

/// Apply one command under the state lock. Returns the pose to broadcast
/// (for accepted pose records) and the reply text (for calibration
/// triggers).
fn apply(command: &IngressCommand, state: &SharedState) -> (Option<WorldPose>, Option<String>) {
    let mut st = state.lock().unwrap();
    match command {
        IngressCommand::SetContinuous => {
            st.set_continuous();
            (None, None)
        }
        IngressCommand::SetWait => {
            st.set_wait();
            (None, None)
        }
        IngressCommand::TriggerOnce => {
            st.trigger_once();
            (None, None)
        }
        IngressCommand::CancelGoto => {
            st.cancel_goto();
            (None, None)
        }
        IngressCommand::Goto { x, y } => {
            st.goto(*x, *y);
            (None, None)
        }
        IngressCommand::CaptureA => (None, Some(capture_reply("A", st.capture_a()))),
        IngressCommand::CaptureB => (None, Some(capture_reply("B", st.capture_b()))),
        IngressCommand::CaptureC => (None, Some(capture_reply("C", st.capture_c()))),
        IngressCommand::FinishCalibration => {
            let reply = match st.finish_calibration() {
                Ok(()) => "OK calibrated".to_string(),
                Err(e) => format!("ERR {e}"),
            };
            (None, Some(reply))
        }
        IngressCommand::RezeroYaw => {
            st.rezero_yaw();
            (None, Some("OK yaw reference cleared".to_string()))
        }
        IngressCommand::Pose {
            timestamp,
            x,
            y,
            quality,
            reset,
        } => (
            st.apply_remote_pose(*timestamp, *x, *y, *quality, *reset),
            None,
        ),
    }
}

fn capture_reply(slot: &str, result: Result<crate::zeroing::LocalPose, crate::calibration::CalibrationError>) -> String {
    match result {
        Ok(pose) => format!("OK {slot} ({:.3}, {:.3})", pose.dx, pose.dy),
        Err(e) => format!("ERR {e}"),
    }
}

use std::io;

use tokio::net::UdpSocket;

use crate::controller::MotorCommand;

/// Fire-and-forget UDP bridge to the rover's motor endpoint.
///
/// Commands go out as JSON `{"T":..,"L":..,"R":..}` with three decimals.
/// There is no acknowledgment and no retry; the next control tick
/// supersedes any dropped packet.
pub struct RoverLink {
    socket: UdpSocket,
    target: String,
}

impl RoverLink {
    pub async fn connect(target: &str) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(target).await?;
        Ok(RoverLink {
            socket,
            target: target.to_string(),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Best-effort send; never blocks the control tick.
    pub fn send(&self, command: &MotorCommand) {
        let payload = match serde_json::to_vec(&command.rounded()) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("[ROVER] failed to encode command: {e}");
                return;
            }
        };
        if let Err(e) = self.socket.try_send(&payload) {
            log::debug!("[ROVER] send to {} failed: {e}", self.target);
        }
    }
}

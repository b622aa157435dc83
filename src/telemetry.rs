use serde::{Deserialize, Serialize};

/// One pose sample parsed out of the odometry tool's table output.
///
/// Immutable once created. `quality` is the 0-100 confidence column when
/// the line carries one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoseSample {
    pub timestamp: f64,
    pub raw_x: f64,
    pub raw_y: f64,
    pub raw_yaw_deg: f64,
    pub quality: Option<f64>,
}

/// Parse one line of odometry output.
///
/// The tool prints a table with vertical-bar separated cells. The first
/// cell holding exactly three floats is the position (x, y, z - z is
/// discarded), the second is roll/pitch/yaw (only yaw is kept), and a
/// cell like `85%` carries the tracking quality. Most lines are
/// diagnostics without a pose; those return `None` and are not an error.
pub fn parse_line(line: &str, timestamp: f64) -> Option<PoseSample> {
    let mut triplets: Vec<[f64; 3]> = Vec::new();
    let mut quality: Option<f64> = None;

    for cell in line.split('|') {
        let tokens: Vec<&str> = cell.split_whitespace().collect();

        if tokens.len() == 3 {
            if let (Ok(a), Ok(b), Ok(c)) = (
                tokens[0].parse::<f64>(),
                tokens[1].parse::<f64>(),
                tokens[2].parse::<f64>(),
            ) {
                triplets.push([a, b, c]);
                continue;
            }
        }

        for token in &tokens {
            if let Some(num) = token.strip_suffix('%') {
                if let Ok(q) = num.parse::<f64>() {
                    quality = Some(q);
                }
            }
        }
    }

    let position = triplets.first()?;
    // A line without the attitude triplet still yields a usable sample;
    // callers must tolerate yaw-less poses.
    let raw_yaw_deg = triplets.get(1).map(|rpy| rpy[2]).unwrap_or(0.0);

    Some(PoseSample {
        timestamp,
        raw_x: position[0],
        raw_y: position[1],
        raw_yaw_deg,
        quality,
    })
}

pub fn now_timestamp() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

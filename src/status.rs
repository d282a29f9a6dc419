use serde::{Deserialize, Serialize};
use tracing::debug;

/// One decoded `/status` payload from the fan controller.
///
/// Equality deliberately ignores `timer`: the controller counts the timer
/// down continuously, and a timer change alone does not warrant a republish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanStatus {
    pub power: bool,
    pub speed: i32,
    pub oscillate: bool,
    pub oscillate_speed: i32,
    pub timer: i32,
}

impl PartialEq for FanStatus {
    fn eq(&self, other: &Self) -> bool {
        self.power == other.power
            && self.speed == other.speed
            && self.oscillate == other.oscillate
            && self.oscillate_speed == other.oscillate_speed
    }
}

impl FanStatus {
    /// Decode a raw response body. Malformed or absent input yields `None`;
    /// decoding never raises.
    pub fn decode(body: Option<&str>) -> Option<Self> {
        let body = body?;
        match serde_json::from_str(body) {
            Ok(status) => Some(status),
            Err(e) => {
                debug!(error = %e, "could not decode status payload");
                None
            }
        }
    }
}

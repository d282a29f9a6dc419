use serde::Deserialize;

pub const SPEED_STEPS: u8 = 3;
pub const OSCILLATE_SPEED_STEPS: u8 = 1;
pub const TIMEOUT_SECONDS: u64 = 5;
pub const DEFAULT_REFRESH_SECONDS: u64 = 3;

/// The channels a fan controller exposes to the host framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Power,
    Oscillate,
    Speed,
    OscillateSpeed,
    Timer,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Power => "power",
            Channel::Oscillate => "oscillate",
            Channel::Speed => "speed",
            Channel::OscillateSpeed => "oscillate_speed",
            Channel::Timer => "timer",
        }
    }
}

/// Inbound command for a channel. Percent values are in the 0-100 domain;
/// conversion to device steps happens inside the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Force an immediate status fetch and republish, bypassing change detection.
    Refresh,
    Switch(bool),
    Percent(u8),
}

/// State pushed back to the host framework, one variant per channel.
/// Speed, oscillation speed and timer are all percent-domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateUpdate {
    Power(bool),
    Oscillate(bool),
    Speed(u8),
    OscillateSpeed(u8),
    Timer(u8),
}

impl StateUpdate {
    pub fn channel(&self) -> Channel {
        match self {
            StateUpdate::Power(_) => Channel::Power,
            StateUpdate::Oscillate(_) => Channel::Oscillate,
            StateUpdate::Speed(_) => Channel::Speed,
            StateUpdate::OscillateSpeed(_) => Channel::OscillateSpeed,
            StateUpdate::Timer(_) => Channel::Timer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineReason {
    ConfigurationError,
}

/// Lifecycle status reported to the host framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleStatus {
    Online,
    Offline {
        reason: OfflineReason,
        message: String,
    },
}

/// Configuration supplied by the host framework, one load per lifecycle.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    pub authentication_key: String,
    /// Poll period in seconds. Defaults to [`DEFAULT_REFRESH_SECONDS`] when absent.
    #[serde(default)]
    pub refresh: Option<u64>,
}

/// Identity of a discovered fan, supplied by the host framework.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceIdentity {
    pub host: String,
    pub serial_number: String,
}

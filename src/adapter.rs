use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::client::DeviceClient;
use crate::convert::{percent_to_steps, steps_to_percent};
use crate::logger::{WireLogMode, WireLogger};
use crate::status::FanStatus;
use crate::types::{
    AdapterConfig, Channel, Command, DeviceIdentity, LifecycleStatus, OfflineReason, StateUpdate,
    DEFAULT_REFRESH_SECONDS, OSCILLATE_SPEED_STEPS, SPEED_STEPS, TIMEOUT_SECONDS,
};

type UpdateCallback = Box<dyn Fn(&StateUpdate) + Send + Sync>;
type StatusCallback = Box<dyn Fn(&LifecycleStatus) + Send + Sync>;

pub struct FanAdapterBuilder {
    identity: DeviceIdentity,
    config: AdapterConfig,
    timeout: Duration,
    update_callbacks: Vec<UpdateCallback>,
    status_callbacks: Vec<StatusCallback>,
    log_mode: Option<WireLogMode>,
    log_path: Option<String>,
}

impl FanAdapterBuilder {
    pub fn new(identity: DeviceIdentity, config: AdapterConfig) -> Self {
        Self {
            identity,
            config,
            timeout: Duration::from_secs(TIMEOUT_SECONDS),
            update_callbacks: Vec::new(),
            status_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    /// Per-request HTTP timeout. Defaults to 5 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Called for every channel state republished to the host framework.
    pub fn on_update(mut self, f: impl Fn(&StateUpdate) + Send + Sync + 'static) -> Self {
        self.update_callbacks.push(Box::new(f));
        self
    }

    /// Called on lifecycle transitions (online / offline).
    pub fn on_status(mut self, f: impl Fn(&LifecycleStatus) + Send + Sync + 'static) -> Self {
        self.status_callbacks.push(Box::new(f));
        self
    }

    pub fn wire_log(mut self, mode: WireLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> FanAdapter {
        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => {
                Some(WireLogger::new(mode, &path).expect("failed to open wire log file"))
            }
            _ => None,
        };

        FanAdapter {
            shared: Arc::new(Shared {
                identity: self.identity,
                timeout: self.timeout,
                update_callbacks: self.update_callbacks,
                status_callbacks: self.status_callbacks,
                state: Mutex::new(AdapterState {
                    config: Some(self.config),
                    base_url: None,
                    client: None,
                    refresh: Duration::from_secs(DEFAULT_REFRESH_SECONDS),
                    last_status: None,
                    poll: None,
                    disposed: false,
                    logger,
                }),
            }),
        }
    }
}

struct PollHandle {
    token: CancellationToken,
    #[allow(dead_code)]
    task: JoinHandle<()>,
}

struct AdapterState {
    config: Option<AdapterConfig>,
    base_url: Option<String>,
    client: Option<DeviceClient>,
    refresh: Duration,
    last_status: Option<FanStatus>,
    poll: Option<PollHandle>,
    disposed: bool,
    logger: Option<WireLogger>,
}

struct Shared {
    identity: DeviceIdentity,
    timeout: Duration,
    update_callbacks: Vec<UpdateCallback>,
    status_callbacks: Vec<StatusCallback>,
    state: Mutex<AdapterState>,
}

/// Adapter for one physical fan controller.
///
/// Owns the poll task and the HTTP client, and serializes poll bookkeeping
/// and command handling through a single lock. The lock is never held across
/// an HTTP call: commands cancel the scheduled poll first, run their request
/// on a cloned client handle, then re-arm polling whatever the outcome.
///
/// All operations are best effort. Failures are absorbed and logged; the
/// only externally visible failure mode is the configuration-error
/// lifecycle status.
pub struct FanAdapter {
    shared: Arc<Shared>,
}

impl FanAdapter {
    pub fn builder(identity: DeviceIdentity, config: AdapterConfig) -> FanAdapterBuilder {
        FanAdapterBuilder::new(identity, config)
    }

    /// Bring the adapter up: create the HTTP client, validate configuration,
    /// and start polling. A blank authentication key reports
    /// offline (configuration error) and polling never starts.
    ///
    /// Must be called from within a tokio runtime (the poll task is spawned
    /// on it).
    pub fn initialize(&self) {
        let status = {
            let mut state = self.lock_state();
            self.configure(&mut state)
        };
        if let Some(status) = status {
            self.emit_status(&status);
        }
    }

    /// Replace the configuration and rerun the configure path. This is the
    /// only way out of a configuration-error offline state.
    pub fn reconfigure(&self, config: AdapterConfig) {
        {
            let mut state = self.lock_state();
            if state.disposed {
                return;
            }
            state.config = Some(config);
        }
        self.initialize();
    }

    /// Handle one inbound command. Polling is suspended for the duration and
    /// re-armed afterwards on every path; the poll cadence restarts from the
    /// moment the command completes. Never returns an error.
    pub async fn handle_command(&self, channel: Channel, command: Command) {
        {
            let mut state = self.lock_state();
            if state.disposed {
                debug!("ignoring command on disposed adapter");
                return;
            }
            clear_polling(&mut state);
        }

        info!(
            serial = %self.shared.identity.serial_number,
            channel = channel.as_str(),
            command = ?command,
            "handling command"
        );

        match (channel, command) {
            (_, Command::Refresh) => {
                refresh_status(&self.shared, true, None).await;
            }
            (Channel::Power, Command::Switch(on)) => {
                info!(on, "switching fan power");
                self.switch_command("/power", on).await;
            }
            (Channel::Oscillate, Command::Switch(on)) => {
                info!(on, "switching fan oscillation");
                self.switch_command("/oscillate", on).await;
            }
            (Channel::Speed, Command::Percent(percent)) => {
                self.stepped_command(Channel::Speed, percent, SPEED_STEPS).await;
            }
            (Channel::OscillateSpeed, Command::Percent(percent)) => {
                self.stepped_command(Channel::OscillateSpeed, percent, OSCILLATE_SPEED_STEPS)
                    .await;
            }
            (Channel::Timer, Command::Percent(percent)) => {
                self.timer_command(percent).await;
            }
            _ => {
                info!(channel = channel.as_str(), "unknown command for channel");
            }
        }

        let mut state = self.lock_state();
        // Only re-arm polling when the adapter was successfully configured;
        // otherwise there is no base URL to poll.
        if state.base_url.is_some() {
            self.init_polling(&mut state, Duration::ZERO);
        }
    }

    /// Shut the adapter down permanently: stop polling, drop the stored
    /// credential and the HTTP client. Idempotent.
    pub fn dispose(&self) {
        let mut state = self.lock_state();
        state.disposed = true;

        debug!("adapter disposed");
        clear_polling(&mut state);

        state.config = None;
        state.client = None;
    }

    pub fn last_status(&self) -> Option<FanStatus> {
        self.lock_state().last_status.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, AdapterState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validate config, derive the base URL and start polling. Returns the
    /// lifecycle status to report, to be emitted outside the lock.
    fn configure(&self, state: &mut AdapterState) -> Option<LifecycleStatus> {
        if state.disposed {
            return None;
        }

        clear_polling(state);

        if state.client.is_none() {
            match DeviceClient::new(self.shared.timeout) {
                Ok(client) => state.client = Some(client),
                Err(e) => {
                    error!(error = %e, "could not build HTTP client");
                    return None;
                }
            }
        }

        let config = state.config.clone()?;

        if config.authentication_key.trim().is_empty() {
            // Device calls must be unreachable after a configuration error,
            // including a reconfigure away from a previously valid config.
            state.base_url = None;
            return Some(LifecycleStatus::Offline {
                reason: OfflineReason::ConfigurationError,
                message: "authentication_key must not be empty".to_string(),
            });
        }

        let refresh = config.refresh.unwrap_or(DEFAULT_REFRESH_SECONDS);
        state.refresh = Duration::from_secs(refresh);
        state.base_url = Some(base_url_for(&self.shared.identity.host));

        info!(
            serial = %self.shared.identity.serial_number,
            base_url = state.base_url.as_deref().unwrap_or(""),
            refresh,
            "fan adapter configured"
        );

        self.init_polling(state, Duration::ZERO);
        Some(LifecycleStatus::Online)
    }

    /// Start the recurring poll task. Must be called with the state lock
    /// held; no-op once disposed. At most one task is live at a time.
    fn init_polling(&self, state: &mut AdapterState, initial_delay: Duration) {
        if state.disposed {
            return;
        }

        clear_polling(state);

        let token = CancellationToken::new();
        let poll_token = token.clone();
        let shared = Arc::clone(&self.shared);
        let period = state.refresh;

        let task = tokio::spawn(async move {
            if !initial_delay.is_zero() {
                tokio::select! {
                    _ = poll_token.cancelled() => return,
                    _ = tokio::time::sleep(initial_delay) => {}
                }
            }
            loop {
                if poll_token.is_cancelled() {
                    break;
                }
                poll_fan_device(&shared, &poll_token).await;
                tokio::select! {
                    _ = poll_token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
            }
        });

        state.poll = Some(PollHandle { token, task });
    }

    async fn switch_command(&self, path: &str, on: bool) {
        let leaf = if on { "on" } else { "off" };
        // Fire and forget: the response body is not applied, the next poll
        // reconciles the channel state.
        match self.post(&format!("{path}/{leaf}")).await {
            Some(body) => debug!(body = %body, "switch response"),
            None => debug!("switch command got no response"),
        }
    }

    async fn stepped_command(&self, channel: Channel, percent: u8, steps: u8) {
        let value = percent_to_steps(f64::from(percent), steps);
        info!(
            serial = %self.shared.identity.serial_number,
            channel = channel.as_str(),
            percent,
            steps = value,
            "setting stepped channel"
        );

        let body = self.post(&format!("/{}/{}", channel.as_str(), value)).await;
        let Some(response) = FanStatus::decode(body.as_deref()) else {
            error!("error parsing command result");
            return;
        };

        let reported = match channel {
            Channel::Speed => response.speed,
            Channel::OscillateSpeed => response.oscillate_speed,
            _ => return,
        };

        // The device may clamp or round the requested step. Push one
        // corrective update when its view differs from the commanded value.
        let reported_percent = steps_to_percent(reported, steps);
        if reported_percent != i32::from(percent) {
            match percent_update(channel, reported_percent) {
                Some(update) => self.emit_update(&update),
                None => warn!(
                    channel = channel.as_str(),
                    value = reported_percent,
                    "device reported out-of-range value, skipping correction"
                ),
            }
        }
    }

    async fn timer_command(&self, percent: u8) {
        info!(
            serial = %self.shared.identity.serial_number,
            percent,
            "setting fan timer"
        );
        // Timer is already percent-domain; the response is decoded for the
        // wire log but no correction is pushed.
        let body = self.post(&format!("/timer/{percent}")).await;
        let response = FanStatus::decode(body.as_deref());
        trace!(response = ?response, "timer response");
    }

    /// POST helper for command handling: grab the client under the lock,
    /// run the request outside it, absorb failures into a log entry.
    async fn post(&self, path: &str) -> Option<String> {
        let (client, base_url) = {
            let mut state = self.lock_state();
            if let Some(ref mut logger) = state.logger {
                logger.log_request("POST", path);
            }
            match (state.client.clone(), state.base_url.clone()) {
                (Some(client), Some(base_url)) => (client, base_url),
                _ => {
                    debug!("adapter not configured, dropping command");
                    return None;
                }
            }
        };

        match client.post(&base_url, path).await {
            Ok(body) => Some(body),
            Err(e) => {
                info!(error = %e, "could not reach fan device");
                None
            }
        }
    }

    fn emit_update(&self, update: &StateUpdate) {
        for cb in &self.shared.update_callbacks {
            cb(update);
        }
    }

    fn emit_status(&self, status: &LifecycleStatus) {
        for cb in &self.shared.status_callbacks {
            cb(status);
        }
    }
}

impl Drop for FanAdapter {
    fn drop(&mut self) {
        // Cancel the poll task without requiring an explicit dispose().
        if let Ok(mut state) = self.shared.state.lock() {
            clear_polling(&mut state);
        }
    }
}

fn base_url_for(host: &str) -> String {
    // Controllers listen on port 80; an identity that already names a port
    // is used verbatim.
    if host.contains(':') {
        format!("http://{host}")
    } else {
        format!("http://{host}:80")
    }
}

fn clear_polling(state: &mut AdapterState) {
    if let Some(handle) = state.poll.take() {
        trace!("canceling poll task");
        handle.token.cancel();
    }
}

async fn poll_fan_device(shared: &Arc<Shared>, token: &CancellationToken) {
    trace!("polling fan device");
    refresh_status(shared, false, Some(token)).await;
}

/// One fetch/decode/diff/emit cycle, shared by the poll task and forced
/// refresh. With `force` the change-detection suppression is bypassed and a
/// successful decode always republishes every channel.
async fn refresh_status(shared: &Arc<Shared>, force: bool, token: Option<&CancellationToken>) {
    let (client, base_url) = {
        let mut state = lock_shared(shared);
        if let Some(ref mut logger) = state.logger {
            logger.log_request("GET", "/status");
        }
        match (state.client.clone(), state.base_url.clone()) {
            (Some(client), Some(base_url)) => (client, base_url),
            _ => return,
        }
    };

    let body = match client.get(&base_url, "/status").await {
        Ok(body) => Some(body),
        Err(e) => {
            debug!(error = %e, "status fetch failed");
            None
        }
    };

    let decoded = FanStatus::decode(body.as_deref());

    let updates = {
        let mut state = lock_shared(shared);
        if let Some(ref mut logger) = state.logger {
            logger.log_status(decoded.as_ref());
        }
        // A tick may finish after dispose, or after a command cancelled it
        // and already pushed a corrective update; re-check under the lock
        // before publishing.
        if state.disposed || token.is_some_and(|t| t.is_cancelled()) {
            return;
        }
        match decoded {
            Some(status) => {
                let changed = state.last_status.as_ref() != Some(&status);
                if force || changed {
                    let updates = channel_updates(&status);
                    state.last_status = Some(status);
                    updates
                } else {
                    Vec::new()
                }
            }
            None => Vec::new(),
        }
    };

    for update in &updates {
        for cb in &shared.update_callbacks {
            cb(update);
        }
    }
}

fn lock_shared(shared: &Arc<Shared>) -> MutexGuard<'_, AdapterState> {
    shared
        .state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn channel_updates(status: &FanStatus) -> Vec<StateUpdate> {
    let mut updates = vec![
        StateUpdate::Power(status.power),
        StateUpdate::Oscillate(status.oscillate),
    ];
    let percents = [
        (Channel::Speed, steps_to_percent(status.speed, SPEED_STEPS)),
        (
            Channel::OscillateSpeed,
            steps_to_percent(status.oscillate_speed, OSCILLATE_SPEED_STEPS),
        ),
        (Channel::Timer, status.timer),
    ];
    for (channel, value) in percents {
        match percent_update(channel, value) {
            Some(update) => updates.push(update),
            None => warn!(
                channel = channel.as_str(),
                value,
                "device reported out-of-range value, skipping republish"
            ),
        }
    }
    updates
}

/// Build a percent-domain update, rejecting values outside 0-100 so a
/// misbehaving device produces a log line instead of a wrapped value.
fn percent_update(channel: Channel, value: i32) -> Option<StateUpdate> {
    let percent = u8::try_from(value).ok().filter(|p| *p <= 100)?;
    match channel {
        Channel::Speed => Some(StateUpdate::Speed(percent)),
        Channel::OscillateSpeed => Some(StateUpdate::OscillateSpeed(percent)),
        Channel::Timer => Some(StateUpdate::Timer(percent)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_appends_default_port() {
        assert_eq!(base_url_for("10.0.0.5"), "http://10.0.0.5:80");
    }

    #[test]
    fn base_url_keeps_explicit_port() {
        assert_eq!(base_url_for("10.0.0.5:8080"), "http://10.0.0.5:8080");
    }

    #[test]
    fn channel_updates_cover_all_five_channels() {
        let status = FanStatus {
            power: true,
            speed: 1,
            oscillate: false,
            oscillate_speed: 1,
            timer: 40,
        };
        let updates = channel_updates(&status);
        assert_eq!(updates.len(), 5);
        assert!(updates.contains(&StateUpdate::Power(true)));
        assert!(updates.contains(&StateUpdate::Oscillate(false)));
        assert!(updates.contains(&StateUpdate::Speed(33)));
        assert!(updates.contains(&StateUpdate::OscillateSpeed(100)));
        assert!(updates.contains(&StateUpdate::Timer(40)));
    }

    #[test]
    fn out_of_range_device_values_are_skipped() {
        let status = FanStatus {
            power: true,
            speed: 4,
            oscillate: false,
            oscillate_speed: 0,
            timer: 300,
        };
        // speed 4 maps to 133% and timer 300 is past full scale; neither
        // may wrap into a bogus channel value.
        let updates = channel_updates(&status);
        assert_eq!(updates.len(), 3);
        assert!(!updates
            .iter()
            .any(|u| matches!(u, StateUpdate::Speed(_) | StateUpdate::Timer(_))));
        assert!(updates.contains(&StateUpdate::OscillateSpeed(0)));
    }

    #[test]
    fn percent_update_rejects_out_of_range_values() {
        assert_eq!(percent_update(Channel::Speed, 33), Some(StateUpdate::Speed(33)));
        assert_eq!(percent_update(Channel::Timer, 100), Some(StateUpdate::Timer(100)));
        assert_eq!(percent_update(Channel::Speed, 133), None);
        assert_eq!(percent_update(Channel::Timer, -1), None);
        assert_eq!(percent_update(Channel::Timer, 300), None);
    }
}

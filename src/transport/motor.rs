use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Commands the motor controller accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotorDirection {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

impl MotorDirection {
    pub const ALL: [MotorDirection; 5] = [
        MotorDirection::Forward,
        MotorDirection::Backward,
        MotorDirection::Left,
        MotorDirection::Right,
        MotorDirection::Stop,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MotorDirection::Forward => "forward",
            MotorDirection::Backward => "backward",
            MotorDirection::Left => "left",
            MotorDirection::Right => "right",
            MotorDirection::Stop => "stop",
        }
    }
}

impl fmt::Display for MotorDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MotorDirection {
    type Err = MotorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MotorDirection::ALL
            .into_iter()
            .find(|dir| dir.as_str() == s)
            .ok_or_else(|| MotorError::InvalidDirection(s.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum MotorError {
    #[error("Not connected to Pi")]
    NotConfigured,

    #[error("Invalid direction: {0}")]
    InvalidDirection(String),

    #[error("Pi connection timeout")]
    Timeout,

    #[error("Pi returned error")]
    Upstream(u16),

    #[error("{0}")]
    Transport(String),
}

impl MotorError {
    /// HTTP status the API answers with for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            MotorError::NotConfigured | MotorError::InvalidDirection(_) => 400,
            MotorError::Timeout => 504,
            MotorError::Upstream(status) => *status,
            MotorError::Transport(_) => 500,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MotorSettings {
    /// Port used when the controller address does not name one.
    pub default_port: u16,
    pub move_timeout_ms: u64,
    pub health_timeout_ms: u64,
}

impl Default for MotorSettings {
    fn default() -> Self {
        Self {
            default_port: 5000,
            move_timeout_ms: 1_000,
            health_timeout_ms: 2_000,
        }
    }
}

/// Thin HTTP relay to the motor controller.
#[derive(Clone)]
pub struct MotorProxy {
    agent: ureq::Agent,
    settings: MotorSettings,
}

impl MotorProxy {
    pub fn new(settings: MotorSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_millis(settings.health_timeout_ms))
            .build();
        Self { agent, settings }
    }

    /// Relay `direction` to the controller. `controller` is the address
    /// given at connect time; `None` means no session was ever configured.
    pub fn move_motor(
        &self,
        controller: Option<&str>,
        direction: &str,
    ) -> Result<MotorDirection, MotorError> {
        let controller = controller.ok_or(MotorError::NotConfigured)?;
        let direction: MotorDirection = direction.parse()?;
        let url = self.endpoint(controller, &format!("move/{}", direction))?;
        self.get(&url, self.settings.move_timeout_ms)?;
        log::info!("motor {} relayed to {}", direction, controller);
        Ok(direction)
    }

    /// Probe the controller's health endpoint.
    pub fn test_connection(&self, controller: Option<&str>) -> Result<(), MotorError> {
        let controller = controller.ok_or(MotorError::NotConfigured)?;
        let url = self.endpoint(controller, "health")?;
        match self
            .agent
            .get(url.as_str())
            .timeout(Duration::from_millis(self.settings.health_timeout_ms))
            .call()
        {
            // Any answer means the controller is reachable.
            Ok(_) | Err(ureq::Error::Status(_, _)) => Ok(()),
            Err(ureq::Error::Transport(err)) => Err(classify_transport(err)),
        }
    }

    /// Base URL for a controller address, adding the default port when the
    /// address has none.
    pub fn endpoint(&self, controller: &str, path: &str) -> Result<Url, MotorError> {
        let controller = controller.trim();
        if controller.is_empty() {
            return Err(MotorError::NotConfigured);
        }
        let base = if controller.contains("://") {
            controller.to_string()
        } else {
            format!("http://{}", controller)
        };
        let mut url = Url::parse(&base)
            .map_err(|e| MotorError::Transport(format!("invalid controller address '{}': {}", controller, e)))?;
        if url.port().is_none() {
            url.set_port(Some(self.settings.default_port))
                .map_err(|_| MotorError::Transport(format!("invalid controller address '{}'", controller)))?;
        }
        url.set_path(path);
        Ok(url)
    }

    fn get(&self, url: &Url, timeout_ms: u64) -> Result<(), MotorError> {
        match self
            .agent
            .get(url.as_str())
            .timeout(Duration::from_millis(timeout_ms))
            .call()
        {
            Ok(response) if response.status() == 200 => Ok(()),
            Ok(response) => Err(MotorError::Upstream(response.status())),
            Err(ureq::Error::Status(status, _)) => {
                log::warn!("controller answered {} for {}", status, url);
                Err(MotorError::Upstream(status))
            }
            Err(ureq::Error::Transport(err)) => Err(classify_transport(err)),
        }
    }
}

fn classify_transport(err: ureq::Transport) -> MotorError {
    if is_timeout(&err) {
        return MotorError::Timeout;
    }
    MotorError::Transport(err.to_string())
}

fn is_timeout(err: &ureq::Transport) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ) {
                return true;
            }
        }
        source = inner.source();
    }
    err.to_string().contains("timed out")
}

//! Commands and the requests hosts send to trigger them.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::errors::Error;
use crate::types::Color;

type Result<T> = std::result::Result<T, Error>;

/// The kinds of command a host can request, with their stable external ids.
///
/// ```
/// use std::str::FromStr;
/// use lux_relay::ActionKind;
///
/// assert_eq!(ActionKind::from_str("Color Pulse").unwrap(), ActionKind::Pulse);
/// assert_eq!(ActionKind::Toggle.to_string(), "Power Toggle");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, Display, IntoStaticStr,
)]
pub enum ActionKind {
    #[strum(serialize = "Power On")]
    PowerOn,
    #[strum(serialize = "Power Off")]
    PowerOff,
    #[strum(serialize = "Power Toggle")]
    Toggle,
    #[strum(serialize = "Color Set")]
    SetColor,
    #[strum(serialize = "Color Pulse")]
    Pulse,
}

impl ActionKind {
    /// Every external action id, in menu order.
    pub fn ids() -> Vec<&'static str> {
        ActionKind::iter().map(|kind| kind.id()).collect()
    }

    pub fn id(self) -> &'static str {
        self.into()
    }

    pub fn needs_color(self) -> bool {
        matches!(self, ActionKind::SetColor | ActionKind::Pulse)
    }
}

/// A validated command, ready for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    PowerOn,
    PowerOff,
    Toggle,
    SetColor(Color),
    Pulse { color: Color, hold: Duration },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::PowerOn => ActionKind::PowerOn,
            Action::PowerOff => ActionKind::PowerOff,
            Action::Toggle => ActionKind::Toggle,
            Action::SetColor(_) => ActionKind::SetColor,
            Action::Pulse { .. } => ActionKind::Pulse,
        }
    }
}

/// An action id plus the parameters a host collected for it.
///
/// ```
/// use lux_relay::{Action, Color, Request};
/// use std::time::Duration;
///
/// let request = Request::from_json(
///     r#"{"action": "Color Set", "bulbs": ["Desk", "Hall"], "color": {"red": 255, "green": 0, "blue": 0}}"#,
/// ).unwrap();
/// assert_eq!(request.describe(), "Color Set: 2 bulbs, #FF0000");
/// assert_eq!(
///     request.to_action(Duration::from_millis(1500)).unwrap(),
///     Action::SetColor(Color::RED)
/// );
/// ```
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub action: String,
    #[serde(default)]
    pub bulbs: Vec<String>,
    pub color: Option<Color>,
    pub duration_ms: Option<u64>,
}

impl Request {
    pub fn new<S: Into<String>>(kind: ActionKind, bulbs: impl IntoIterator<Item = S>) -> Self {
        Request {
            action: kind.id().to_string(),
            bulbs: bulbs.into_iter().map(Into::into).collect(),
            color: None,
            duration_ms: None,
        }
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Error::JsonLoad)
    }

    pub fn kind(&self) -> Result<ActionKind> {
        ActionKind::from_str(self.action.trim())
            .map_err(|_| Error::UnknownAction(self.action.clone()))
    }

    /// Validate the parameters and build the [`Action`] they describe.
    ///
    /// `default_hold` is used for a pulse without an explicit duration.
    pub fn to_action(&self, default_hold: Duration) -> Result<Action> {
        let kind = self.kind()?;
        validate_bulbs(&self.bulbs)?;

        Ok(match kind {
            ActionKind::PowerOn => Action::PowerOn,
            ActionKind::PowerOff => Action::PowerOff,
            ActionKind::Toggle => Action::Toggle,
            ActionKind::SetColor => Action::SetColor(validate_color(self.color)?),
            ActionKind::Pulse => Action::Pulse {
                color: validate_color(self.color)?,
                hold: validate_hold(self.duration_ms, default_hold)?,
            },
        })
    }

    /// Short human-readable description, e.g. "Color Set: 2 bulbs, #FF0000".
    pub fn describe(&self) -> String {
        let mut parts = vec![describe_bulbs(&self.bulbs)];
        if let Ok(kind) = self.kind()
            && kind.needs_color()
            && let Some(color) = self.color
        {
            parts.push(color.to_string());
        }
        if let Some(ms) = self.duration_ms {
            parts.push(format!("{ms}ms"));
        }
        format!("{}: {}", self.action, parts.join(", "))
    }
}

fn validate_bulbs(bulbs: &[String]) -> Result<()> {
    if bulbs.is_empty() {
        return Err(Error::invalid_request("no bulbs selected"));
    }
    if bulbs.iter().any(|b| b.trim().is_empty()) {
        return Err(Error::invalid_request("empty bulb name"));
    }
    Ok(())
}

fn validate_color(color: Option<Color>) -> Result<Color> {
    color.ok_or_else(|| Error::invalid_request("no color given"))
}

fn validate_hold(duration_ms: Option<u64>, default_hold: Duration) -> Result<Duration> {
    checked_hold(duration_ms.map(Duration::from_millis), default_hold)
}

/// The hold of a pulse, falling back to `default_hold`. A zero hold is
/// rejected.
pub(crate) fn checked_hold(hold: Option<Duration>, default_hold: Duration) -> Result<Duration> {
    match hold {
        None => Ok(default_hold),
        Some(hold) if hold.is_zero() => {
            Err(Error::invalid_request("pulse duration must be positive"))
        }
        Some(hold) => Ok(hold),
    }
}

fn describe_bulbs(bulbs: &[String]) -> String {
    match bulbs.len() {
        1 => "1 bulb".to_string(),
        n => format!("{n} bulbs"),
    }
}

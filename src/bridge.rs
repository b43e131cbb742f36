//! Message-bus bridge.
//!
//! Commands arrive on `{domain}/light/{device}[_{model}]/command` with a JSON
//! body; confirmed state goes out on the matching `/state` topic. The device
//! part is the address without separators, e.g. `A4C1380D1E2F_H6072`.

use crate::controller::LightController;
use crate::domain::color;
use crate::domain::error::{ControllerError, ValidationError};
use crate::domain::models::{LightConfig, LightId, Rgb, StateEvent};
use crate::domain::registry::DEFAULT_MODEL;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid topic {0:?}")]
    InvalidTopic(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Controller(#[from] ControllerError),
}

/// Device and model addressed by a command topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTopic {
    pub id: LightId,
    pub model: String,
}

pub fn parse_topic(domain: &str, topic: &str) -> Result<CommandTopic, BridgeError> {
    let invalid = || BridgeError::InvalidTopic(topic.to_string());

    let device = topic
        .strip_prefix(domain)
        .and_then(|rest| rest.strip_prefix("/light/"))
        .and_then(|rest| rest.strip_suffix("/command"))
        .ok_or_else(invalid)?;

    let (address, model) = match device.split_once('_') {
        Some((address, model)) if !model.is_empty() => (address, model),
        Some((address, _)) => (address, DEFAULT_MODEL),
        None => (device, DEFAULT_MODEL),
    };
    if address.is_empty() || address.contains('/') {
        return Err(invalid());
    }

    Ok(CommandTopic {
        id: LightId::new(address),
        model: model.to_string(),
    })
}

pub fn state_topic(domain: &str, id: &LightId, model: &str) -> String {
    if model.eq_ignore_ascii_case(DEFAULT_MODEL) {
        format!("{}/light/{}/state", domain, id.compact())
    } else {
        format!("{}/light/{}_{}/state", domain, id.compact(), model)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorPayload {
    pub r: i64,
    pub g: i64,
    pub b: i64,
}

/// Incoming command body. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CommandPayload {
    pub state: Option<String>,
    pub brightness: Option<i64>,
    pub color: Option<ColorPayload>,
    /// Mired.
    pub color_temp: Option<i64>,
}

/// A command checked against the value ranges, ready to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    pub power: Option<bool>,
    pub brightness: Option<u8>,
    pub rgb: Option<Rgb>,
    pub color_temp_kelvin: Option<u32>,
}

fn byte(field: &'static str, value: i64) -> Result<u8, ValidationError> {
    u8::try_from(value).map_err(|_| ValidationError::out_of_range(field, value, 0, 255))
}

impl CommandPayload {
    pub fn validate(&self) -> Result<Command, ValidationError> {
        let power = match self.state.as_deref() {
            None => None,
            Some(state) if state.eq_ignore_ascii_case("ON") => Some(true),
            Some(state) if state.eq_ignore_ascii_case("OFF") => Some(false),
            Some(state) => return Err(ValidationError::InvalidPowerState(state.to_string())),
        };

        let brightness = self
            .brightness
            .map(|value| byte("brightness", value))
            .transpose()?;

        let rgb = match self.color {
            Some(color) => Some(Rgb::new(
                byte("color.r", color.r)?,
                byte("color.g", color.g)?,
                byte("color.b", color.b)?,
            )),
            None => None,
        };

        let color_temp_kelvin = match self.color_temp {
            Some(mired) => {
                let kelvin = u32::try_from(mired)
                    .ok()
                    .and_then(color::mired_to_kelvin)
                    .ok_or_else(|| {
                        ValidationError::out_of_range("color_temp", mired, 1, i64::from(u32::MAX))
                    })?;
                Some(kelvin)
            }
            None => None,
        };

        Ok(Command {
            power,
            brightness,
            rgb,
            color_temp_kelvin,
        })
    }
}

/// Outgoing state body, built from confirmed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatePayload {
    pub state: &'static str,
    pub brightness: u8,
    pub color: ColorPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<u32>,
}

impl StatePayload {
    pub fn from_event(event: &StateEvent) -> Self {
        let confirmed = &event.confirmed;
        Self {
            state: if confirmed.power { "ON" } else { "OFF" },
            brightness: confirmed.brightness_normalized.unwrap_or_else(|| {
                color::to_normalized_brightness(confirmed.brightness, event.brightness_max)
            }),
            color: ColorPayload {
                r: i64::from(confirmed.rgb.r),
                g: i64::from(confirmed.rgb.g),
                b: i64::from(confirmed.rgb.b),
            },
            color_temp: confirmed
                .color_temp_kelvin
                .and_then(|kelvin| color::kelvin_to_mired(u32::from(kelvin))),
        }
    }
}

/// Routes bus messages into a [`LightController`].
pub struct Bridge {
    domain: String,
    controller: LightController,
}

impl Bridge {
    pub fn new(domain: &str, controller: LightController) -> Self {
        Self {
            domain: domain.to_string(),
            controller,
        }
    }

    pub fn command_filter(&self) -> String {
        format!("{}/light/+/command", self.domain)
    }

    /// Apply one command message. Unknown devices are registered with the
    /// model named in the topic. Nothing is applied if any field is invalid.
    pub fn handle(&self, topic: &str, payload: &str) -> Result<LightId, BridgeError> {
        let target = parse_topic(&self.domain, topic)?;
        let command = serde_json::from_str::<CommandPayload>(payload)?.validate()?;
        debug!("{} <- {:?}", target.id, command);

        if !self.controller.is_registered(&target.id) {
            info!("Creating new device {} ({})", target.id, target.model);
            self.controller
                .register(LightConfig::new(target.id.as_str(), &target.model));
        }

        let id = &target.id;
        if let Some(on) = command.power {
            self.controller.set_desired_power(id, on)?;
        }
        if let Some(brightness) = command.brightness {
            self.controller.set_desired_brightness(id, brightness)?;
        }
        if let Some(kelvin) = command.color_temp_kelvin {
            self.controller.set_desired_color_temp_kelvin(id, kelvin)?;
        }
        if let Some(rgb) = command.rgb {
            self.controller.set_desired_rgb(id, rgb)?;
        }
        self.controller.request_update(id)?;

        Ok(target.id)
    }

    /// Topic and JSON body for a state event.
    pub fn render_state(&self, event: &StateEvent) -> Result<(String, String), BridgeError> {
        let topic = state_topic(&self.domain, &event.id, &event.model);
        let body = serde_json::to_string(&StatePayload::from_event(event))?;
        Ok((topic, body))
    }
}

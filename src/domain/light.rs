//! Light State / Dirty Tracker
//!
//! Holds what the caller wants (`desired`), what the peripheral is known to
//! have acknowledged (`confirmed`) and which attributes still need sending.

use crate::domain::color::{self, MAX_COLOR_TEMP_KELVIN, MIN_COLOR_TEMP_KELVIN};
use crate::domain::error::ValidationError;
use crate::domain::models::{
    Attr, AttrFlags, AttrValue, ConnectionStatus, LightId, LightStatus, LightValues, Rgb,
};
use crate::domain::registry::ModelDescriptor;
use std::time::SystemTime;

#[derive(Debug, Clone)]
pub struct LightState {
    id: LightId,
    name: String,
    model: String,
    descriptor: ModelDescriptor,
    desired: LightValues,
    confirmed: LightValues,
    dirty: AttrFlags,
    connection_status: ConnectionStatus,
    reconnect_count: u32,
    send_attempts: u32,
    session_id: Option<u64>,
    last_activity: Option<SystemTime>,
    last_connection_attempt: Option<SystemTime>,
    last_packet_sent: Option<SystemTime>,
    last_command: Option<u8>,
}

impl LightState {
    pub fn new(id: LightId, name: String, model: String, descriptor: ModelDescriptor) -> Self {
        Self {
            id,
            name,
            model,
            descriptor,
            desired: LightValues::default(),
            confirmed: LightValues::default(),
            dirty: AttrFlags::default(),
            connection_status: ConnectionStatus::Disconnected,
            reconnect_count: 0,
            send_attempts: 0,
            session_id: None,
            last_activity: None,
            last_connection_attempt: None,
            last_packet_sent: None,
            last_command: None,
        }
    }

    pub fn id(&self) -> &LightId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn desired(&self) -> &LightValues {
        &self.desired
    }

    pub fn confirmed(&self) -> &LightValues {
        &self.confirmed
    }

    pub fn dirty(&self) -> AttrFlags {
        self.dirty
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.any()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count
    }

    /// `"Name (address)"`, for logs.
    pub fn debug_name(&self) -> String {
        format!("{} ({})", self.name, self.id)
    }

    /// Validate and store a desired value, marking the attribute dirty.
    /// Repeated calls before a send simply overwrite (last write wins).
    pub fn set_desired(&mut self, value: AttrValue) -> Result<(), ValidationError> {
        match value {
            AttrValue::Power(on) => self.desired.power = on,
            AttrValue::Brightness(level) => {
                let max = self.descriptor.brightness_max;
                if level > max {
                    return Err(ValidationError::out_of_range(
                        "brightness",
                        i64::from(level),
                        0,
                        i64::from(max),
                    ));
                }
                self.desired.brightness = level;
                self.desired.brightness_normalized = None;
            }
            AttrValue::Rgb(rgb) => {
                self.desired.rgb = rgb;
                self.desired.color_temp_kelvin = None;
            }
        }
        self.dirty.set(value.attr(), true);
        self.touch();
        Ok(())
    }

    /// Scale a 0..=255 brightness to device units, remembering the request
    /// so it can be reported back unchanged.
    pub fn set_desired_brightness(&mut self, brightness: u8) {
        self.desired.brightness =
            color::to_device_brightness(brightness, self.descriptor.brightness_max);
        self.desired.brightness_normalized = Some(brightness);
        self.dirty.brightness = true;
        self.touch();
    }

    /// Clamp to the supported range and store as an RGB approximation.
    pub fn set_desired_color_temp(&mut self, kelvin: u32) {
        let kelvin = kelvin.clamp(
            u32::from(MIN_COLOR_TEMP_KELVIN),
            u32::from(MAX_COLOR_TEMP_KELVIN),
        );
        let kelvin = u16::try_from(kelvin).unwrap_or(MAX_COLOR_TEMP_KELVIN);
        self.desired.rgb = color::kelvin_to_rgb(kelvin);
        self.desired.color_temp_kelvin = Some(kelvin);
        self.dirty.rgb = true;
        self.touch();
    }

    /// Highest-priority dirty attribute: power, then brightness, then rgb.
    pub fn pick_next_dirty(&self) -> Option<Attr> {
        Attr::PRIORITY
            .into_iter()
            .find(|attr| self.dirty.get(*attr))
    }

    /// The desired value to send for the next dirty attribute.
    pub fn next_pending(&self) -> Option<AttrValue> {
        self.pick_next_dirty().map(|attr| self.desired.value(attr))
    }

    /// Mark `attr` as acknowledged with its current desired value.
    pub fn commit(&mut self, attr: Attr) {
        let value = self.desired.value(attr);
        self.store_confirmed(value);
        self.dirty.set(attr, false);
    }

    /// Mark `sent` as acknowledged. The attribute stays dirty when the
    /// caller changed it while the packet was in flight.
    pub fn commit_sent(&mut self, sent: AttrValue) {
        self.store_confirmed(sent);
        let attr = sent.attr();
        if self.desired.value(attr) == sent {
            self.dirty.set(attr, false);
        }
    }

    fn store_confirmed(&mut self, value: AttrValue) {
        match value {
            AttrValue::Power(on) => self.confirmed.power = on,
            AttrValue::Brightness(level) => {
                self.confirmed.brightness = level;
                self.confirmed.brightness_normalized = if self.desired.brightness == level {
                    self.desired.brightness_normalized
                } else {
                    None
                };
            }
            AttrValue::Rgb(rgb) => {
                self.confirmed.rgb = rgb;
                self.confirmed.color_temp_kelvin = if self.desired.rgb == rgb {
                    self.desired.color_temp_kelvin
                } else {
                    None
                };
            }
        }
    }

    /// Keep-alive packet for the `roll`-th ping: confirmed power, brightness
    /// and color in turn. A light that is off only ever gets power.
    pub fn keep_alive_value(&self, roll: u32) -> AttrValue {
        if !self.confirmed.power {
            return AttrValue::Power(false);
        }
        match roll % 3 {
            0 => AttrValue::Power(self.confirmed.power),
            1 => AttrValue::Brightness(self.confirmed.brightness),
            _ => AttrValue::Rgb(self.confirmed.rgb),
        }
    }

    pub fn mark_connecting(&mut self) {
        self.connection_status = ConnectionStatus::Connecting;
        self.last_connection_attempt = Some(SystemTime::now());
    }

    pub fn mark_connected(&mut self, session_id: u64) {
        self.connection_status = ConnectionStatus::Connected;
        self.reconnect_count = 0;
        self.session_id = Some(session_id);
        self.touch();
    }

    pub fn mark_connect_failed(&mut self) {
        self.connection_status = ConnectionStatus::Failed;
        self.reconnect_count = self.reconnect_count.saturating_add(1);
        self.session_id = None;
    }

    /// Peripheral-initiated disconnect. Returns `false` when the
    /// notification belongs to a session that was already replaced.
    pub fn mark_disconnected(&mut self, session_id: u64) -> bool {
        if self.session_id != Some(session_id) {
            return false;
        }
        self.session_id = None;
        self.connection_status = ConnectionStatus::Disconnected;
        true
    }

    /// Local teardown of whatever session was held.
    pub fn clear_session(&mut self) {
        self.session_id = None;
        if self.connection_status == ConnectionStatus::Connected
            || self.connection_status == ConnectionStatus::Connecting
        {
            self.connection_status = ConnectionStatus::Disconnected;
        }
    }

    pub fn is_session_alive(&self, session_id: u64) -> bool {
        self.session_id == Some(session_id) && self.connection_status == ConnectionStatus::Connected
    }

    pub fn record_packet(&mut self, command: u8) {
        self.last_command = Some(command);
        self.last_packet_sent = Some(SystemTime::now());
        self.touch();
    }

    pub fn set_send_attempts(&mut self, attempts: u32) {
        self.send_attempts = attempts;
    }

    fn touch(&mut self) {
        self.last_activity = Some(SystemTime::now());
    }

    pub fn status(&self) -> LightStatus {
        LightStatus {
            id: self.id.clone(),
            name: self.name.clone(),
            model: self.model.clone(),
            connection_status: self.connection_status,
            reconnect_count: self.reconnect_count,
            send_attempts: self.send_attempts,
            dirty: self.dirty,
            desired: self.desired,
            confirmed: self.confirmed,
            brightness_max: self.descriptor.brightness_max,
            last_activity: self.last_activity,
            last_connection_attempt: self.last_connection_attempt,
            last_packet_sent: self.last_packet_sent,
            last_command: self.last_command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::registry::ModelRegistry;

    fn light(model: &str) -> LightState {
        let descriptor = ModelRegistry::builtin().lookup(model);
        LightState::new(
            LightId::new("A4:C1:38:00:00:01"),
            "Desk".to_string(),
            model.to_string(),
            descriptor,
        )
    }

    #[test]
    fn test_new_light_is_clean() {
        let light = light("default");
        assert!(!light.is_dirty());
        assert_eq!(light.pick_next_dirty(), None);
        assert_eq!(light.connection_status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_brightness_out_of_range_is_rejected() {
        let mut light = light("H6046");
        let err = light.set_desired(AttrValue::Brightness(101)).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { max: 100, .. }));
        assert!(!light.dirty().brightness);
        assert_eq!(light.desired().brightness, 0);

        light.set_desired(AttrValue::Brightness(100)).unwrap();
        assert!(light.dirty().brightness);
    }

    #[test]
    fn test_power_takes_priority_over_color() {
        let mut light = light("default");
        light.set_desired(AttrValue::Rgb(Rgb::new(1, 1, 1))).unwrap();
        light.set_desired(AttrValue::Power(true)).unwrap();
        assert_eq!(light.pick_next_dirty(), Some(Attr::Power));

        light.commit(Attr::Power);
        light.set_desired(AttrValue::Brightness(10)).unwrap();
        assert_eq!(light.pick_next_dirty(), Some(Attr::Brightness));
        light.commit(Attr::Brightness);
        assert_eq!(light.pick_next_dirty(), Some(Attr::Rgb));
    }

    #[test]
    fn test_commit_confirms_only_sent_attribute() {
        let mut light = light("default");
        light.set_desired(AttrValue::Power(true)).unwrap();
        light.set_desired(AttrValue::Brightness(200)).unwrap();
        light.set_desired(AttrValue::Rgb(Rgb::new(10, 20, 30))).unwrap();

        light.commit(Attr::Brightness);

        assert_eq!(light.confirmed().brightness, 200);
        assert!(!light.dirty().brightness);
        assert!(light.dirty().power);
        assert!(light.dirty().rgb);
        assert!(!light.confirmed().power);
        assert_eq!(light.confirmed().rgb, Rgb::WHITE);
    }

    #[test]
    fn test_last_write_wins() {
        let mut light = light("default");
        light.set_desired(AttrValue::Rgb(Rgb::new(1, 2, 3))).unwrap();
        light.set_desired(AttrValue::Rgb(Rgb::new(4, 5, 6))).unwrap();
        assert_eq!(light.next_pending(), Some(AttrValue::Rgb(Rgb::new(4, 5, 6))));
    }

    #[test]
    fn test_commit_sent_keeps_racing_write_dirty() {
        let mut light = light("default");
        light.set_desired(AttrValue::Brightness(50)).unwrap();
        let sent = light.next_pending().unwrap();

        light.set_desired(AttrValue::Brightness(80)).unwrap();
        light.commit_sent(sent);

        assert_eq!(light.confirmed().brightness, 50);
        assert!(light.dirty().brightness);
        assert_eq!(light.next_pending(), Some(AttrValue::Brightness(80)));
    }

    #[test]
    fn test_normalized_brightness_is_remembered() {
        let mut light = light("H6046");
        light.set_desired_brightness(128);
        assert_eq!(light.desired().brightness, 51);
        assert!(light.dirty().brightness);

        let sent = light.next_pending().unwrap();
        light.commit_sent(sent);
        assert_eq!(light.confirmed().brightness, 51);
        assert_eq!(light.confirmed().brightness_normalized, Some(128));

        light.set_desired(AttrValue::Brightness(20)).unwrap();
        light.commit(Attr::Brightness);
        assert_eq!(light.confirmed().brightness_normalized, None);
    }

    #[test]
    fn test_color_temp_sets_rgb_and_remembers_kelvin() {
        let mut light = light("default");
        light.set_desired_color_temp(1000);
        assert_eq!(light.desired().color_temp_kelvin, Some(MIN_COLOR_TEMP_KELVIN));
        assert!(light.dirty().rgb);

        light.commit(Attr::Rgb);
        assert_eq!(light.confirmed().color_temp_kelvin, Some(MIN_COLOR_TEMP_KELVIN));

        light.set_desired(AttrValue::Rgb(Rgb::new(0, 0, 255))).unwrap();
        assert_eq!(light.desired().color_temp_kelvin, None);
    }

    #[test]
    fn test_keep_alive_round_robin() {
        let mut light = light("default");
        assert_eq!(light.keep_alive_value(1), AttrValue::Power(false));

        light.set_desired(AttrValue::Power(true)).unwrap();
        light.set_desired(AttrValue::Brightness(7)).unwrap();
        light.commit(Attr::Power);
        light.commit(Attr::Brightness);

        assert_eq!(light.keep_alive_value(0), AttrValue::Power(true));
        assert_eq!(light.keep_alive_value(1), AttrValue::Brightness(7));
        assert_eq!(light.keep_alive_value(2), AttrValue::Rgb(Rgb::WHITE));
    }

    #[test]
    fn test_connection_bookkeeping() {
        let mut light = light("default");
        light.mark_connecting();
        light.mark_connect_failed();
        light.mark_connect_failed();
        assert_eq!(light.reconnect_count(), 2);
        assert_eq!(light.connection_status(), ConnectionStatus::Failed);

        light.mark_connected(7);
        assert_eq!(light.reconnect_count(), 0);
        assert!(light.is_session_alive(7));

        assert!(!light.mark_disconnected(6));
        assert_eq!(light.connection_status(), ConnectionStatus::Connected);
        assert!(light.mark_disconnected(7));
        assert_eq!(light.connection_status(), ConnectionStatus::Disconnected);
    }
}

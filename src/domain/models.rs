use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Device address, normalised to upper-case colon-separated hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct LightId(String);

impl LightId {
    /// Accepts `a4:c1:38:0d:1e:2f`, `A4-C1-38-0D-1E-2F` or `A4C1380D1E2F`.
    /// Anything else is kept as given, upper-cased.
    pub fn new(address: &str) -> Self {
        let address = address.trim();
        match mac_octets(address) {
            Some(octets) => Self(octets.join(":").to_ascii_uppercase()),
            None => Self(address.to_ascii_uppercase()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address without separators, as used in bridge topics.
    pub fn compact(&self) -> String {
        self.0.replace(':', "")
    }
}

/// Six hex pairs, either bare or with a `:`/`-` between every pair.
fn mac_octets(address: &str) -> Option<Vec<&str>> {
    if !address.is_ascii() {
        return None;
    }
    let octets: Vec<&str> = match address.len() {
        12 => (0..6).map(|i| &address[i * 2..i * 2 + 2]).collect(),
        17 => {
            let bytes = address.as_bytes();
            let separated = (2..17)
                .step_by(3)
                .all(|i| bytes[i] == b':' || bytes[i] == b'-');
            if !separated {
                return None;
            }
            (0..6).map(|i| &address[i * 3..i * 3 + 2]).collect()
        }
        _ => return None,
    };
    octets
        .iter()
        .all(|octet| octet.chars().all(|c| c.is_ascii_hexdigit()))
        .then_some(octets)
}

impl fmt::Display for LightId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LightId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for LightId {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<LightId> for String {
    fn from(value: LightId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn to_array(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self { r, g, b }
    }
}

/// A light attribute that can be dirty.
///
/// Variant order is send priority: an on/off toggle is never delayed
/// behind a color update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attr {
    Power,
    Brightness,
    Rgb,
}

impl Attr {
    pub const PRIORITY: [Attr; 3] = [Attr::Power, Attr::Brightness, Attr::Rgb];
}

/// A value for one attribute. Brightness is in device units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrValue {
    Power(bool),
    Brightness(u16),
    Rgb(Rgb),
}

impl AttrValue {
    pub fn attr(&self) -> Attr {
        match self {
            Self::Power(_) => Attr::Power,
            Self::Brightness(_) => Attr::Brightness,
            Self::Rgb(_) => Attr::Rgb,
        }
    }
}

/// One boolean per attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrFlags {
    pub power: bool,
    pub brightness: bool,
    pub rgb: bool,
}

impl AttrFlags {
    pub fn get(&self, attr: Attr) -> bool {
        match attr {
            Attr::Power => self.power,
            Attr::Brightness => self.brightness,
            Attr::Rgb => self.rgb,
        }
    }

    pub fn set(&mut self, attr: Attr, value: bool) {
        match attr {
            Attr::Power => self.power = value,
            Attr::Brightness => self.brightness = value,
            Attr::Rgb => self.rgb = value,
        }
    }

    pub fn any(&self) -> bool {
        self.power || self.brightness || self.rgb
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightValues {
    pub power: bool,
    /// Device units, `0..=brightness_max`.
    pub brightness: u16,
    /// The 0..=255 value `brightness` was scaled from, if it came from one.
    #[serde(default)]
    pub brightness_normalized: Option<u8>,
    pub rgb: Rgb,
    /// Set when the color was derived from a color temperature.
    pub color_temp_kelvin: Option<u16>,
}

impl Default for LightValues {
    fn default() -> Self {
        Self {
            power: false,
            brightness: 0,
            brightness_normalized: None,
            rgb: Rgb::WHITE,
            color_temp_kelvin: None,
        }
    }
}

impl LightValues {
    pub fn value(&self, attr: Attr) -> AttrValue {
        match attr {
            Attr::Power => AttrValue::Power(self.power),
            Attr::Brightness => AttrValue::Brightness(self.brightness),
            Attr::Rgb => AttrValue::Rgb(self.rgb),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// A configured peripheral, as produced by discovery/configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightConfig {
    pub address: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_model() -> String {
    "default".to_string()
}

impl LightConfig {
    pub fn new(address: &str, model: &str) -> Self {
        Self {
            address: address.to_string(),
            model: model.to_string(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

/// Read-only snapshot of one light.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LightStatus {
    pub id: LightId,
    pub name: String,
    pub model: String,
    pub connection_status: ConnectionStatus,
    pub reconnect_count: u32,
    pub send_attempts: u32,
    pub dirty: AttrFlags,
    pub desired: LightValues,
    pub confirmed: LightValues,
    pub brightness_max: u16,
    pub last_activity: Option<SystemTime>,
    pub last_connection_attempt: Option<SystemTime>,
    pub last_packet_sent: Option<SystemTime>,
    pub last_command: Option<u8>,
}

/// Broadcast after every successful attribute send.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEvent {
    pub id: LightId,
    pub model: String,
    pub attr: Attr,
    pub confirmed: LightValues,
    pub brightness_max: u16,
}

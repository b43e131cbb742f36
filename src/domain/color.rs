//! Color and brightness conversions.

use crate::domain::models::Rgb;

/// Color temperature range accepted by the Update API, in Kelvin.
pub const MIN_COLOR_TEMP_KELVIN: u16 = 2000;
pub const MAX_COLOR_TEMP_KELVIN: u16 = 9000;

/// Approximate the color of a black body at `kelvin` (1000K..40000K).
///
/// Peripherals driven here only speak RGB, so color temperature is always
/// sent as this approximation.
#[allow(
    clippy::cast_lossless,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn kelvin_to_rgb(kelvin: u16) -> Rgb {
    let temp = (f32::from(kelvin) / 100.0).clamp(10.0, 400.0);

    let red = if temp <= 66.0 {
        255.0
    } else {
        329.698_73 * (temp - 60.0).powf(-0.133_204_76)
    };

    let green = if temp <= 66.0 {
        99.470_8 * temp.ln() - 161.119_57
    } else {
        288.122_17 * (temp - 60.0).powf(-0.075_514_85)
    };

    let blue = if temp >= 66.0 {
        255.0
    } else if temp <= 19.0 {
        0.0
    } else {
        138.517_73 * (temp - 10.0).ln() - 305.044_8
    };

    Rgb::new(
        red.clamp(0.0, 255.0) as u8,
        green.clamp(0.0, 255.0) as u8,
        blue.clamp(0.0, 255.0) as u8,
    )
}

/// Mired (micro reciprocal degrees) to Kelvin. `None` for zero.
pub fn mired_to_kelvin(mired: u32) -> Option<u32> {
    (mired > 0).then(|| 1_000_000 / mired)
}

/// Kelvin to mired. `None` for zero.
pub fn kelvin_to_mired(kelvin: u32) -> Option<u32> {
    (kelvin > 0).then(|| 1_000_000 / kelvin)
}

/// Scale a normalized 0..=255 brightness into `0..=brightness_max` device
/// units, rounding up so any non-zero request stays visible.
pub fn to_device_brightness(brightness: u8, brightness_max: u16) -> u16 {
    let scaled = (u32::from(brightness) * u32::from(brightness_max)).div_ceil(255);
    u16::try_from(scaled).unwrap_or(brightness_max)
}

/// Device units back to 0..=255, rounding down. Feeding the result to
/// [`to_device_brightness`] yields `level` again.
pub fn to_normalized_brightness(level: u16, brightness_max: u16) -> u8 {
    if brightness_max == 0 {
        return 0;
    }
    let scaled = u32::from(level) * 255 / u32::from(brightness_max);
    u8::try_from(scaled.min(255)).unwrap_or(u8::MAX)
}

//! RGB color representation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// An RGB color with red, green, and blue components (0-255 each).
///
/// # Examples
///
/// ```
/// use std::str::FromStr;
/// use lux_relay::Color;
///
/// let orange = Color::from_str("255,128,0").unwrap();
/// assert_eq!(orange, Color::from_str("#FF8000").unwrap());
/// assert_eq!(orange.to_string(), "#FF8000");
/// ```
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub(crate) red: u8,
    pub(crate) green: u8,
    pub(crate) blue: u8,
}

impl Color {
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const GREEN: Color = Color::rgb(0, 255, 0);
    pub const BLUE: Color = Color::rgb(0, 0, 255);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    /// Create a color with the given RGB values.
    pub const fn rgb(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Create a default color (black: 0,0,0).
    pub fn new() -> Self {
        Self::default()
    }

    /// Unpack a `0xAARRGGBB` integer. The alpha byte is ignored.
    ///
    /// ```
    /// use lux_relay::Color;
    ///
    /// assert_eq!(Color::from_packed(0xFF00FF00), Color::GREEN);
    /// ```
    pub const fn from_packed(packed: u32) -> Self {
        Self::rgb(
            ((packed >> 16) & 0xFF) as u8,
            ((packed >> 8) & 0xFF) as u8,
            (packed & 0xFF) as u8,
        )
    }

    /// Pack into `0xAARRGGBB` with a fully opaque alpha byte.
    pub const fn to_packed(self) -> u32 {
        0xFF00_0000 | (self.red as u32) << 16 | (self.green as u32) << 8 | self.blue as u32
    }

    pub fn red(&self) -> u8 {
        self.red
    }

    pub fn green(&self) -> u8 {
        self.green
    }

    pub fn blue(&self) -> u8 {
        self.blue
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.red, self.green, self.blue)
    }
}

impl FromStr for Color {
    type Err = Error;

    /// Parse from a comma-separated string (e.g., "255,128,0") or a hex
    /// string (e.g., "#FF8000").
    fn from_str(s: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidColorString(s.to_string());
        let s = s.trim();

        if let Some(hex) = s.strip_prefix('#') {
            if hex.len() != 6 || !hex.is_ascii() {
                return Err(invalid());
            }
            let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
            return Ok(Self::rgb(channel(0)?, channel(2)?, channel(4)?));
        }

        let parts = s
            .split(',')
            .map(|c| c.trim().parse::<u8>().map_err(|_| invalid()))
            .collect::<Result<Vec<u8>, Error>>()?;
        match parts.as_slice() {
            [red, green, blue] => Ok(Self::rgb(*red, *green, *blue)),
            _ => Err(invalid()),
        }
    }
}

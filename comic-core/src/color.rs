//! CSS color values used for gutters and panel backgrounds.

use std::fmt;

/// Gutter color stored on new pages.
pub const DEFAULT_GUTTER_COLOR: &str = "#cccccc";

/// Panel background used when the template declares none.
pub const DEFAULT_PANEL_BACKGROUND: Rgba = Rgba::WHITE;

/// An 8-bit RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgba {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
    /// Alpha channel (255 = opaque).
    pub a: u8,
}

impl Rgba {
    /// Opaque white.
    pub const WHITE: Self = Self::opaque(255, 255, 255);
    /// Opaque black.
    pub const BLACK: Self = Self::opaque(0, 0, 0);
    /// Fully transparent black.
    pub const TRANSPARENT: Self = Self {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };

    /// Build an opaque color.
    #[must_use]
    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// True when the alpha channel is zero.
    #[must_use]
    pub const fn is_transparent(self) -> bool {
        self.a == 0
    }

    /// Parse a CSS color: `#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa`,
    /// `rgb()`/`rgba()`, `transparent` and a handful of keywords.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let value = input.trim().to_ascii_lowercase();
        if let Some(hex) = value.strip_prefix('#') {
            return parse_hex(hex);
        }
        if let Some(args) = value
            .strip_prefix("rgba(")
            .or_else(|| value.strip_prefix("rgb("))
        {
            return parse_rgb_function(args.strip_suffix(')')?);
        }
        named(&value)
    }

    /// Parse a gutter color for rendering. Missing, unparseable and
    /// transparent values paint white.
    #[must_use]
    pub fn gutter_or_default(input: Option<&str>) -> Self {
        input
            .and_then(Self::parse)
            .filter(|c| !c.is_transparent())
            .unwrap_or(Self::WHITE)
    }

    /// Lowercase `#rrggbb` form (alpha dropped).
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a == 255 {
            write!(f, "{}", self.to_hex())
        } else {
            write!(f, "{}{:02x}", self.to_hex(), self.a)
        }
    }
}

fn parse_hex(hex: &str) -> Option<Rgba> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let nibble = |i: usize| u8::from_str_radix(&hex[i..=i], 16).ok().map(|v| v * 17);
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    match hex.len() {
        3 => Some(Rgba::opaque(nibble(0)?, nibble(1)?, nibble(2)?)),
        4 => Some(Rgba {
            r: nibble(0)?,
            g: nibble(1)?,
            b: nibble(2)?,
            a: nibble(3)?,
        }),
        6 => Some(Rgba::opaque(byte(0)?, byte(2)?, byte(4)?)),
        8 => Some(Rgba {
            r: byte(0)?,
            g: byte(2)?,
            b: byte(4)?,
            a: byte(6)?,
        }),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_rgb_function(args: &str) -> Option<Rgba> {
    let parts: Vec<&str> = args
        .split(|c: char| c == ',' || c == '/' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() != 3 && parts.len() != 4 {
        return None;
    }
    let channel = |s: &str| -> Option<u8> {
        let v: f64 = s.parse().ok()?;
        Some(v.clamp(0.0, 255.0).round() as u8)
    };
    let alpha = match parts.get(3) {
        Some(s) => {
            let v: f64 = match s.strip_suffix('%') {
                Some(pct) => pct.parse::<f64>().ok()? / 100.0,
                None => s.parse().ok()?,
            };
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        }
        None => 255,
    };
    Some(Rgba {
        r: channel(parts[0])?,
        g: channel(parts[1])?,
        b: channel(parts[2])?,
        a: alpha,
    })
}

fn named(value: &str) -> Option<Rgba> {
    let color = match value {
        "transparent" => Rgba::TRANSPARENT,
        "white" => Rgba::WHITE,
        "black" => Rgba::BLACK,
        "red" => Rgba::opaque(255, 0, 0),
        "green" => Rgba::opaque(0, 128, 0),
        "blue" => Rgba::opaque(0, 0, 255),
        "gray" | "grey" => Rgba::opaque(128, 128, 128),
        "lightgray" | "lightgrey" => Rgba::opaque(211, 211, 211),
        "darkgray" | "darkgrey" => Rgba::opaque(169, 169, 169),
        _ => return None,
    };
    Some(color)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_forms() {
        assert_eq!(Rgba::parse("#fff"), Some(Rgba::WHITE));
        assert_eq!(Rgba::parse("#CCCCCC"), Some(Rgba::opaque(204, 204, 204)));
        assert_eq!(
            Rgba::parse("#00000080"),
            Some(Rgba {
                r: 0,
                g: 0,
                b: 0,
                a: 128
            })
        );
        assert_eq!(Rgba::parse("#12345"), None);
        assert_eq!(Rgba::parse("#gggggg"), None);
    }

    #[test]
    fn test_parse_rgb_function() {
        assert_eq!(Rgba::parse("rgb(10, 20, 30)"), Some(Rgba::opaque(10, 20, 30)));
        let c = Rgba::parse("rgba(0, 0, 0, 0)").expect("rgba");
        assert!(c.is_transparent());
    }

    #[test]
    fn test_gutter_falls_back_when_transparent() {
        assert_eq!(Rgba::gutter_or_default(Some("transparent")), Rgba::WHITE);
        assert_eq!(Rgba::gutter_or_default(Some("rgba(0, 0, 0, 0)")), Rgba::WHITE);
        assert_eq!(Rgba::gutter_or_default(Some("")), Rgba::WHITE);
        assert_eq!(Rgba::gutter_or_default(None), Rgba::WHITE);
        assert_eq!(Rgba::gutter_or_default(Some(DEFAULT_GUTTER_COLOR)).to_hex(), DEFAULT_GUTTER_COLOR);
        assert_eq!(Rgba::gutter_or_default(Some("#102030")).to_hex(), "#102030");
    }
}

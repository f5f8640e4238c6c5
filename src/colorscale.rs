//! Continuous color scales over the observed range of a metric.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScaleError {
    #[error("no non-null values to build a color scale from")]
    EmptyRange,
    #[error("invalid color {0:?}, expected #rrggbb")]
    InvalidColor(String),
    #[error("unknown palette {0:?}")]
    UnknownPalette(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const GRAY: Self = Self::new(128, 128, 128);

    const fn hex(v: u32) -> Self {
        Self::new((v >> 16) as u8, (v >> 8) as u8, v as u8)
    }

    fn lerp(self, other: Color, t: f64) -> Color {
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Color::new(mix(self.r, other.r), mix(self.g, other.g), mix(self.b, other.b))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = ScaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(ScaleError::InvalidColor(s.to_string()));
        }
        u32::from_str_radix(hex, 16)
            .map(Color::hex)
            .map_err(|_| ScaleError::InvalidColor(s.to_string()))
    }
}

impl TryFrom<String> for Color {
    type Error = ScaleError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

// ColorBrewer sequential schemes, 9 classes
const YL_GN_BU: &[Color] = &[
    Color::hex(0xffffd9),
    Color::hex(0xedf8b1),
    Color::hex(0xc7e9b4),
    Color::hex(0x7fcdbb),
    Color::hex(0x41b6c4),
    Color::hex(0x1d91c0),
    Color::hex(0x225ea8),
    Color::hex(0x253494),
    Color::hex(0x081d58),
];

const YL_OR_RD: &[Color] = &[
    Color::hex(0xffffcc),
    Color::hex(0xffeda0),
    Color::hex(0xfed976),
    Color::hex(0xfeb24c),
    Color::hex(0xfd8d3c),
    Color::hex(0xfc4e2a),
    Color::hex(0xe31a1c),
    Color::hex(0xbd0026),
    Color::hex(0x800026),
];

const BLUES: &[Color] = &[
    Color::hex(0xf7fbff),
    Color::hex(0xdeebf7),
    Color::hex(0xc6dbef),
    Color::hex(0x9ecae1),
    Color::hex(0x6baed6),
    Color::hex(0x4292c6),
    Color::hex(0x2171b5),
    Color::hex(0x08519c),
    Color::hex(0x08306b),
];

const GREENS: &[Color] = &[
    Color::hex(0xf7fcf5),
    Color::hex(0xe5f5e0),
    Color::hex(0xc7e9c0),
    Color::hex(0xa1d99b),
    Color::hex(0x74c476),
    Color::hex(0x41ab5d),
    Color::hex(0x238b45),
    Color::hex(0x006d2c),
    Color::hex(0x00441b),
];

const VIRIDIS: &[Color] = &[
    Color::hex(0x440154),
    Color::hex(0x3b528b),
    Color::hex(0x21918c),
    Color::hex(0x5ec962),
    Color::hex(0xfde725),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Palette {
    #[default]
    YlGnBu,
    YlOrRd,
    Blues,
    Greens,
    Viridis,
}

impl Palette {
    pub const ALL: &'static [Palette] = &[
        Palette::YlGnBu,
        Palette::YlOrRd,
        Palette::Blues,
        Palette::Greens,
        Palette::Viridis,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Palette::YlGnBu => "YlGnBu",
            Palette::YlOrRd => "YlOrRd",
            Palette::Blues => "Blues",
            Palette::Greens => "Greens",
            Palette::Viridis => "Viridis",
        }
    }

    fn stops(&self) -> &'static [Color] {
        match self {
            Palette::YlGnBu => YL_GN_BU,
            Palette::YlOrRd => YL_OR_RD,
            Palette::Blues => BLUES,
            Palette::Greens => GREENS,
            Palette::Viridis => VIRIDIS,
        }
    }

    /// Evenly spaced multi-stop interpolation at `t` in [0, 1].
    pub fn evaluate(&self, t: f64) -> Color {
        let stops = self.stops();
        let last = stops.len() - 1;
        if t.is_nan() || t <= 0.0 {
            return stops[0];
        }
        if t >= 1.0 {
            return stops[last];
        }
        let pos = t * last as f64;
        let i = pos.floor() as usize;
        stops[i].lerp(stops[i + 1], pos - i as f64)
    }
}

impl FromStr for Palette {
    type Err = ScaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Palette::ALL
            .iter()
            .copied()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ScaleError::UnknownPalette(s.to_string()))
    }
}

impl TryFrom<String> for Palette {
    type Error = ScaleError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LegendStop {
    pub value: f64,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorScale {
    min: f64,
    max: f64,
    palette: Palette,
    no_data: Color,
}

impl ColorScale {
    /// Builds a scale over the finite, non-null values.
    pub fn from_values<I>(values: I, palette: Palette, no_data: Color) -> Result<Self, ScaleError>
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        let (min, max) = values
            .into_iter()
            .flatten()
            .filter(|v| v.is_finite())
            .fold(None, |acc: Option<(f64, f64)>, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
            .ok_or(ScaleError::EmptyRange)?;

        Ok(Self {
            min,
            max,
            palette,
            no_data,
        })
    }

    pub fn range(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    pub fn palette(&self) -> Palette {
        self.palette
    }

    pub fn no_data(&self) -> Color {
        self.no_data
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Position of `value` in [0, 1]. A constant scale maps to the midpoint.
    fn position(&self, value: f64) -> f64 {
        let span = self.max - self.min;
        if span == 0.0 {
            0.5
        } else {
            (value - self.min) / span
        }
    }

    pub fn color_for(&self, value: Option<f64>) -> Color {
        match value {
            Some(v) if self.contains(v) => self.palette.evaluate(self.position(v)),
            _ => self.no_data,
        }
    }

    /// `count` evenly spaced stops from min to max, for the legend gradient.
    pub fn legend_stops(&self, count: usize) -> Vec<LegendStop> {
        let count = count.max(2);
        (0..count)
            .map(|i| {
                let value = self.min + (self.max - self.min) * i as f64 / (count - 1) as f64;
                LegendStop {
                    value,
                    color: self.color_for(Some(value)),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale(values: &[Option<f64>]) -> Result<ColorScale, ScaleError> {
        ColorScale::from_values(values.iter().copied(), Palette::YlGnBu, Color::GRAY)
    }

    #[test]
    fn range_ignores_nulls() {
        let s = scale(&[Some(3.5), None, Some(19.0), Some(1.0), None]).unwrap();
        assert_eq!(s.range(), (1.0, 19.0));
    }

    #[test]
    fn all_null_is_empty_range() {
        assert_eq!(scale(&[None, None]), Err(ScaleError::EmptyRange));
        assert_eq!(scale(&[]), Err(ScaleError::EmptyRange));
        assert_eq!(scale(&[Some(f64::NAN)]), Err(ScaleError::EmptyRange));
    }

    #[test]
    fn endpoints_map_to_palette_ends() {
        let s = scale(&[Some(1.0), Some(20.0)]).unwrap();
        assert_eq!(s.color_for(Some(1.0)), YL_GN_BU[0]);
        assert_eq!(s.color_for(Some(20.0)), YL_GN_BU[8]);
    }

    #[test]
    fn null_and_out_of_range_get_no_data_color() {
        let s = scale(&[Some(1.0), Some(20.0)]).unwrap();
        assert_eq!(s.color_for(None), Color::GRAY);
        assert_eq!(s.color_for(Some(0.5)), Color::GRAY);
        assert_eq!(s.color_for(Some(20.5)), Color::GRAY);
        assert_ne!(s.color_for(Some(10.0)), Color::GRAY);
    }

    #[test]
    fn constant_metric_still_has_a_color() {
        let s = scale(&[Some(7.0), Some(7.0), None]).unwrap();
        assert_eq!(s.range(), (7.0, 7.0));
        let c = s.color_for(Some(7.0));
        assert_eq!(c, Palette::YlGnBu.evaluate(0.5));
        assert_eq!(c, s.color_for(Some(7.0)));
    }

    #[test]
    fn interpolation_is_between_neighbouring_stops() {
        // Halfway between the first two stops of a 9-stop ramp
        let c = Palette::YlGnBu.evaluate(0.0625);
        assert_eq!(c, YL_GN_BU[0].lerp(YL_GN_BU[1], 0.5));
    }

    #[test]
    fn legend_stops_span_the_range() {
        let s = scale(&[Some(2.0), Some(18.0)]).unwrap();
        let stops = s.legend_stops(5);
        assert_eq!(stops.len(), 5);
        assert_eq!(stops[0].value, 2.0);
        assert_eq!(stops[4].value, 18.0);
        assert_eq!(stops[2].value, 10.0);
    }

    #[test]
    fn parses_colors_and_palettes() {
        assert_eq!("#808080".parse::<Color>().unwrap(), Color::GRAY);
        assert_eq!(Color::new(8, 29, 88).to_string(), "#081d58");
        assert!("gray".parse::<Color>().is_err());
        assert_eq!("ylgnbu".parse::<Palette>().unwrap(), Palette::YlGnBu);
        assert!("Rainbow".parse::<Palette>().is_err());
    }
}

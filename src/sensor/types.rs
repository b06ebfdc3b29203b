//! Typed measurement values and the per-type-code slot classification.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementType {
    Temperature,
    Humidity,
    Wetness,
    AirQuality,
    AirPressure,
    Rain,
    TimeSpan,
    Alarm,
    WindSpeed,
    Gust,
    WindDirection,
    DoorWindow,
    KeyPressed,
    KeyPressType,
}

impl MeasurementType {
    fn base_name(self) -> &'static str {
        match self {
            MeasurementType::Temperature => "Temperature",
            MeasurementType::Humidity => "Humidity",
            MeasurementType::Wetness => "Wetness",
            MeasurementType::AirQuality => "Air quality",
            MeasurementType::AirPressure => "Air pressure",
            MeasurementType::Rain => "Rain",
            MeasurementType::TimeSpan => "Time span",
            MeasurementType::Alarm => "Alarm",
            MeasurementType::WindSpeed => "Wind speed",
            MeasurementType::Gust => "Gust",
            MeasurementType::WindDirection => "Wind direction",
            MeasurementType::DoorWindow => "Door/Window",
            MeasurementType::KeyPressed => "Key pressed",
            MeasurementType::KeyPressType => "Key press type",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFlag {
    Error,
    Overflow,
    NotCalculated,
}

impl ErrorFlag {
    fn as_str(self) -> &'static str {
        match self {
            ErrorFlag::Error => "error",
            ErrorFlag::Overflow => "overflow",
            ErrorFlag::NotCalculated => "not calculated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindDirection {
    N,
    Nne,
    Ne,
    Ene,
    E,
    Ese,
    Se,
    Sse,
    S,
    Ssw,
    Sw,
    Wsw,
    W,
    Wnw,
    Nw,
    Nnw,
}

impl WindDirection {
    pub fn from_nibble(value: u8) -> Self {
        use WindDirection::*;
        match value & 0x0F {
            0 => N,
            1 => Nne,
            2 => Ne,
            3 => Ene,
            4 => E,
            5 => Ese,
            6 => Se,
            7 => Sse,
            8 => S,
            9 => Ssw,
            10 => Sw,
            11 => Wsw,
            12 => W,
            13 => Wnw,
            14 => Nw,
            _ => Nnw,
        }
    }

    fn full_name(self) -> &'static str {
        use WindDirection::*;
        match self {
            N => "North",
            Nne => "North-northeast",
            Ne => "Northeast",
            Ene => "East-northeast",
            E => "East",
            Ese => "East-southeast",
            Se => "Southeast",
            Sse => "South-Southeast",
            S => "South",
            Ssw => "South-southwest",
            Sw => "Southwest",
            Wsw => "West-southwest",
            W => "West",
            Wnw => "West-northwest",
            Nw => "Northwest",
            Nnw => "Northnorthwest",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPressed {
    None,
    Green,
    Orange,
    Red,
    Yellow,
}

impl KeyPressed {
    pub fn from_nibble(value: u8) -> Self {
        use KeyPressed::*;
        match value & 0x0F {
            1 => Green,
            2 => Orange,
            3 => Red,
            4 => Yellow,
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            KeyPressed::None => "none",
            KeyPressed::Green => "green",
            KeyPressed::Orange => "orange",
            KeyPressed::Red => "red",
            KeyPressed::Yellow => "yellow",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPressType {
    None,
    Short,
    Double,
    Long,
}

impl KeyPressType {
    pub fn from_nibble(value: u8) -> Self {
        use KeyPressType::*;
        match value & 0x0F {
            1 => Short,
            2 => Double,
            3 => Long,
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            KeyPressType::None => "none",
            KeyPressType::Short => "short",
            KeyPressType::Double => "double",
            KeyPressType::Long => "long",
        }
    }
}

/// A decoded measurement value. The rendering of a `Numeric`/`Boolean` value
/// depends on its parent measurement's `MeasurementType`, so `Value` carries
/// no `Display` impl of its own — see `Measurement::value_str`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Numeric(f64),
    /// A whole-number reading (humidity percentage, air quality ppm) — the
    /// original stores these as Python `int`s, so `str()` never appends a
    /// trailing `.0` the way it does for the `float`-typed readings above.
    Integer(i64),
    /// Seconds, for `TimeSpan` slots.
    Duration(i64),
    Boolean(bool),
    WindDirection(WindDirection),
    KeyPressed(KeyPressed),
    KeyPressType(KeyPressType),
    Error(ErrorFlag),
}

impl Value {
    fn render(self, mtype: MeasurementType) -> String {
        match self {
            Value::Error(e) => e.as_str().to_string(),
            Value::Numeric(v) => match mtype {
                MeasurementType::Temperature | MeasurementType::Humidity => {
                    format!("{}{}", round1(v), unit_suffix(mtype))
                }
                _ => format!("{} {}", round1(v), unit_suffix(mtype)),
            },
            Value::Integer(v) => match mtype {
                MeasurementType::Temperature | MeasurementType::Humidity => {
                    format!("{v}{}", unit_suffix(mtype))
                }
                _ => format!("{v} {}", unit_suffix(mtype)),
            },
            Value::Duration(seconds) => format_timedelta(seconds),
            Value::Boolean(b) => bool_label(mtype, b).to_string(),
            Value::WindDirection(d) => d.full_name().to_string(),
            Value::KeyPressed(k) => k.label().to_string(),
            Value::KeyPressType(k) => k.label().to_string(),
        }
    }
}

fn round1(v: f64) -> String {
    format!("{:.1}", (v * 10.0).round() / 10.0)
}

fn unit_suffix(mtype: MeasurementType) -> &'static str {
    match mtype {
        MeasurementType::Temperature => "°C",
        MeasurementType::Humidity => "%",
        MeasurementType::AirQuality => "ppm",
        MeasurementType::AirPressure => "hPa",
        MeasurementType::Rain => "mm",
        MeasurementType::WindSpeed | MeasurementType::Gust => "m/s",
        _ => "",
    }
}

fn bool_label(mtype: MeasurementType, value: bool) -> &'static str {
    match mtype {
        MeasurementType::Wetness => {
            if value {
                "wet"
            } else {
                "dry"
            }
        }
        MeasurementType::Alarm => {
            if value {
                "alarm"
            } else {
                "calm"
            }
        }
        MeasurementType::DoorWindow => {
            if value {
                "opened"
            } else {
                "closed"
            }
        }
        _ => {
            if value {
                "true"
            } else {
                "false"
            }
        }
    }
}

/// Renders a non-negative seconds count the way Python's `timedelta.__str__`
/// does, since spec test vectors assert against that exact textual form.
fn format_timedelta(total_seconds: i64) -> String {
    let days = total_seconds / 86_400;
    let remainder = total_seconds % 86_400;
    let hh = remainder / 3600;
    let mm = (remainder % 3600) / 60;
    let ss = remainder % 60;
    let hms = format!("{hh}:{mm:02}:{ss:02}");
    if days != 0 {
        let plural = if days.abs() == 1 { "" } else { "s" };
        format!("{days} day{plural}, {hms}")
    } else {
        hms
    }
}

/// Prior-sample value: absent, a single prior, or an ordered list (time-span
/// and wind-sample slots accumulate up to several priors per frame).
#[derive(Debug, Clone, PartialEq)]
pub enum Prior {
    None,
    One(Value),
    Many(Vec<Value>),
}

impl Prior {
    pub fn is_present(&self) -> bool {
        !matches!(self, Prior::None)
    }
}

/// One typed measurement slot belonging to a sensor.
#[derive(Debug, Clone)]
pub struct Measurement {
    pub mtype: MeasurementType,
    pub prefix: &'static str,
    pub index: u8,
    pub value: Option<Value>,
    pub prior: Prior,
}

impl Measurement {
    pub fn new(mtype: MeasurementType, prefix: &'static str, index: u8) -> Self {
        Measurement {
            mtype,
            prefix,
            index,
            value: None,
            prior: Prior::None,
        }
    }

    pub fn name(&self) -> String {
        let base = self.mtype.base_name();
        let named = if self.prefix.is_empty() {
            base.to_string()
        } else {
            format!("{} {}", self.prefix, base.to_lowercase())
        };
        if self.index > 0 {
            format!("{named} {}", self.index)
        } else {
            named
        }
    }

    fn value_str(&self) -> String {
        match self.value {
            None => "unknown".to_string(),
            Some(v) => v.render(self.mtype),
        }
    }

    fn prior_value_str(&self) -> String {
        match &self.prior {
            Prior::None => "unknown".to_string(),
            Prior::One(v) => v.render(self.mtype),
            Prior::Many(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.render(self.mtype)).collect();
                format!("[{}]", parts.join("; "))
            }
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.value_str())?;
        if self.prior.is_present() {
            write!(f, "; previous: {}", self.prior_value_str())?;
        }
        Ok(())
    }
}

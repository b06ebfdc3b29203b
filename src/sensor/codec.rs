//! Per-sensor-type frame decoding: slot construction, primitive field
//! decoders, and the `parse_packet` dispatch table.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{ProxyError, Result};
use crate::sensor::types::{
    ErrorFlag, KeyPressType, KeyPressed, Measurement, MeasurementType, Prior, Value,
    WindDirection,
};

pub const SUBFRAME_LEN: usize = 63;
pub const RECORD_LEN: usize = 64;

/// Sum of the sub-frame's 63 octets, masked to 7 bits, per the checksum
/// invariant; `record` must be exactly [`RECORD_LEN`] bytes.
pub fn checksum_valid(record: &[u8]) -> bool {
    if record.len() != RECORD_LEN {
        return false;
    }
    let sum: u32 = record[..SUBFRAME_LEN].iter().map(|&b| b as u32).sum();
    (sum & 0x7F) as u8 == record[SUBFRAME_LEN]
}

pub fn sensor_id_from_subframe(subframe: &[u8]) -> Result<[u8; 6]> {
    subframe
        .get(6..12)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| ProxyError::MalformedFrame("sub-frame too short for sensor id".into()))
}

fn be16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn parse_temperature(bytes: &[u8], attr: bool) -> Value {
    let raw = be16(bytes) as u32;
    if attr {
        if raw & (1 << 12) != 0 {
            return Value::Error(ErrorFlag::Error);
        }
        if raw & (1 << 13) != 0 {
            return Value::Error(ErrorFlag::Overflow);
        }
    }
    let negative = raw & (1 << 10) != 0;
    let mut magnitude = (raw & 0x3FF) as i32;
    if negative {
        magnitude -= 1024;
    }
    Value::Numeric(magnitude as f64 * 0.1)
}

fn parse_humidity(byte: u8, average: bool) -> Value {
    if average && byte & 0x80 != 0 {
        return Value::Error(ErrorFlag::NotCalculated);
    }
    Value::Integer((byte & 0x7F) as i64)
}

fn parse_humidity_hr(bytes: &[u8]) -> Value {
    Value::Numeric((be16(bytes) & 0x1FF) as f64 / 10.0)
}

fn parse_air_pressure(bytes: &[u8]) -> Value {
    Value::Numeric(be16(bytes) as f64 / 10.0)
}

fn parse_air_quality(bytes: &[u8]) -> Value {
    let raw = be16(bytes);
    if raw & 0x100 != 0 {
        Value::Error(ErrorFlag::Overflow)
    } else {
        Value::Integer((raw & 0xFF) as i64 * 50)
    }
}

fn parse_rain(bytes: &[u8]) -> Value {
    Value::Numeric(be16(bytes) as f64 * 0.25)
}

fn parse_rain_time_span_raw(value: u16) -> i64 {
    let unit = (value & 0xC000) >> 14;
    let mult: i64 = match unit {
        1 => 3600,
        2 => 60,
        _ => 1,
    };
    (value & 0x3FFF) as i64 * mult
}

fn parse_door_window_time_span_raw(value: u16) -> i64 {
    let unit = (value & 0x6000) >> 13;
    let mult: i64 = match unit {
        1 => 3600,
        2 => 60,
        _ => 1,
    };
    (value & 0x1FFF) as i64 * mult
}

fn parse_wetness(byte: u8) -> bool {
    (byte & 0x02) != 0 || (byte & 0x01) == 0
}

fn parse_boolean(bytes: &[u8], mask: u16) -> bool {
    be16(bytes) & mask != 0
}

fn parse_wind_direction(byte: u8) -> WindDirection {
    WindDirection::from_nibble(byte >> 4)
}

/// `value` is the 8-bit magnitude; `hibit`/`himask` locate the shared high
/// bit that extends it to 9 bits.
fn parse_wind_speed(value: u8, hibit: u8, himask: u8) -> f64 {
    let hi = if hibit & himask != 0 { 0x100 } else { 0 };
    ((value as u32) | hi) as f64 / 10.0
}

fn parse_wind_time_span(value: u8) -> i64 {
    value as i64 * 2
}

fn parse_key_pressed(byte: u8) -> KeyPressed {
    KeyPressed::from_nibble((byte >> 4) & 0x0F)
}

fn parse_key_press_type(byte: u8) -> KeyPressType {
    KeyPressType::from_nibble(byte & 0x0F)
}

/// Decodes a current value plus a single-prior value at a fixed offset.
fn set_with_single_prior(
    slot: &mut Measurement,
    value: Value,
    prior: Option<Value>,
) {
    slot.value = Some(value);
    slot.prior = match prior {
        Some(v) => Prior::One(v),
        None => Prior::None,
    };
}

/// Decodes a current time-span value plus a variable-length prior list,
/// stopping at the first zero-valued span. `values` holds the current span
/// at `[0..2]` followed by up to `(values.len()-2)/2` prior spans.
fn set_time_span(slot: &mut Measurement, values: &[u8], decode: impl Fn(u16) -> i64) {
    let current = decode(be16(&values[0..2]));
    let mut priors = Vec::new();
    let mut idx = 4usize;
    while idx < values.len() {
        let raw = be16(&values[idx - 2..idx]);
        if raw == 0 {
            break;
        }
        let decoded = decode(raw);
        if decoded == 0 {
            break;
        }
        priors.push(Value::Duration(decoded));
        idx += 2;
    }
    slot.value = Some(Value::Duration(current));
    slot.prior = if priors.is_empty() {
        Prior::None
    } else {
        Prior::Many(priors)
    };
}

/// A single decoded sensor, with its typed measurement slots and replay
/// guard state.
#[derive(Debug, Clone)]
pub struct Sensor {
    id: [u8; 6],
    type_id: u8,
    counter: Option<u32>,
    low_battery: bool,
    by_event: bool,
    timestamp: u32,
    three_byte_counter: bool,
    measurements: Vec<Measurement>,
    /// Best-effort display name from the vendor lookup; not part of the
    /// text rendering (the source's own rendering never includes it).
    pub display_name: Option<String>,
}

impl Sensor {
    /// Builds the slot layout for `id`'s type code (`id[0]`). Unknown type
    /// codes get an empty slot list; callers are expected to check
    /// `measurements().is_empty()` or rely on `update` returning
    /// `UnknownType`.
    pub fn new(id: [u8; 6]) -> Self {
        let type_id = id[0];
        let mut sensor = Sensor {
            id,
            type_id,
            counter: None,
            low_battery: false,
            by_event: false,
            timestamp: 0,
            three_byte_counter: matches!(type_id, 0x0B | 0x18),
            measurements: Vec::new(),
            display_name: None,
        };
        sensor.build_slots();
        sensor
    }

    fn append(&mut self, mtype: MeasurementType, prefix: &'static str, index: u8) {
        self.measurements.push(Measurement::new(mtype, prefix, index));
    }

    fn build_slots(&mut self) {
        use MeasurementType::*;
        match self.type_id {
            0x01 | 0x0F => {
                self.append(Temperature, "", 0);
                self.append(Temperature, "Cable", 0);
            }
            0x02 => self.append(Temperature, "", 0),
            0x03 | 0x0E => {
                self.append(Temperature, "", 0);
                self.append(Humidity, "", 0);
            }
            0x04 => {
                self.append(Temperature, "", 0);
                self.append(Humidity, "", 0);
                self.append(Wetness, "", 0);
            }
            0x05 => {
                self.append(Temperature, "", 0);
                self.append(Humidity, "", 0);
                self.append(AirQuality, "", 0);
                self.append(Temperature, "Outdoor", 0);
            }
            0x06 => {
                self.append(Temperature, "", 0);
                self.append(Humidity, "", 0);
                self.append(Temperature, "Pool", 0);
            }
            0x07 => {
                self.append(Temperature, "", 0);
                self.append(Humidity, "", 0);
                self.append(Temperature, "Outdoor", 0);
                self.append(Humidity, "Outdoor", 0);
            }
            0x08 => {
                self.append(Temperature, "", 0);
                self.append(Rain, "", 0);
                self.append(TimeSpan, "", 0);
            }
            0x09 => {
                self.append(Temperature, "", 0);
                self.append(Humidity, "", 0);
                self.append(Temperature, "External", 0);
            }
            0x0A => {
                self.append(Alarm, "", 1);
                self.append(Alarm, "", 2);
                self.append(Alarm, "", 3);
                self.append(Alarm, "", 4);
                self.append(Temperature, "", 0);
            }
            0x0B => {
                self.append(WindDirection, "", 0);
                self.append(WindSpeed, "", 0);
                self.append(Gust, "", 0);
                self.append(TimeSpan, "", 0);
            }
            0x10 => {
                self.append(DoorWindow, "", 0);
                self.append(TimeSpan, "", 0);
            }
            0x11 => {
                self.append(Temperature, "", 0);
                self.append(Humidity, "", 0);
                self.append(Temperature, "External", 1);
                self.append(Humidity, "External", 1);
                self.append(Temperature, "External", 2);
                self.append(Humidity, "External", 2);
                self.append(Temperature, "External", 3);
                self.append(Humidity, "External", 3);
            }
            0x12 => {
                self.append(Temperature, "", 0);
                self.append(Humidity, "", 0);
                self.append(Humidity, "3h average", 0);
                self.append(Humidity, "24h average", 0);
                self.append(Humidity, "7d average", 0);
                self.append(Humidity, "30d average", 0);
            }
            0x15 => {
                self.append(KeyPressed, "", 0);
                self.append(KeyPressType, "", 0);
            }
            0x18 => {
                self.append(Temperature, "", 0);
                self.append(Humidity, "", 0);
                self.append(AirPressure, "", 0);
            }
            _ => {}
        }
    }

    pub fn id(&self) -> [u8; 6] {
        self.id
    }

    pub fn id_hex(&self) -> String {
        self.id.iter().map(|b| format!("{b:02X}")).collect()
    }

    pub fn type_id(&self) -> u8 {
        self.type_id
    }

    pub fn counter(&self) -> Option<u32> {
        self.counter
    }

    pub fn low_battery(&self) -> bool {
        self.low_battery
    }

    pub fn by_event(&self) -> bool {
        self.by_event
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    fn parse_header(&mut self, packet: &[u8]) -> bool {
        self.timestamp = u32::from_be_bytes(packet[1..5].try_into().unwrap());
        let counter = if self.three_byte_counter {
            let raw = u32::from_be_bytes([0, packet[12], packet[13], packet[14]]);
            self.low_battery = raw & 0x800000 != 0;
            self.by_event = raw & 0x400000 != 0;
            raw & 0x3FFFFF
        } else {
            let raw = u16::from_be_bytes([packet[12], packet[13]]) as u32;
            self.low_battery = raw & 0x8000 != 0;
            self.by_event = raw & 0x4000 != 0;
            raw & 0x3FFF
        };
        let changed = self.counter != Some(counter);
        if changed {
            self.counter = Some(counter);
        }
        changed
    }

    /// Decodes a 63-octet sub-frame into this sensor's measurement slots.
    /// Returns `Ok(true)` if applied, `Ok(false)` if the frame was a replay
    /// (counter unchanged) and therefore ignored.
    pub fn update(&mut self, packet: &[u8]) -> Result<bool> {
        if packet.len() != SUBFRAME_LEN {
            return Err(ProxyError::MalformedFrame(format!(
                "sub-frame length {} != {SUBFRAME_LEN}",
                packet.len()
            )));
        }
        if !self.parse_header(packet) {
            return Ok(false);
        }
        self.decode_body(packet)?;
        Ok(true)
    }

    fn decode_body(&mut self, p: &[u8]) -> Result<()> {
        match self.type_id {
            0x01 | 0x0F => {
                set_with_single_prior(
                    &mut self.measurements[0],
                    parse_temperature(&p[14..16], true),
                    Some(parse_temperature(&p[18..20], true)),
                );
                set_with_single_prior(
                    &mut self.measurements[1],
                    parse_temperature(&p[16..18], true),
                    Some(parse_temperature(&p[20..22], true)),
                );
            }
            0x02 => {
                set_with_single_prior(
                    &mut self.measurements[0],
                    parse_temperature(&p[14..16], true),
                    Some(parse_temperature(&p[16..18], true)),
                );
            }
            0x03 => {
                set_with_single_prior(
                    &mut self.measurements[0],
                    parse_temperature(&p[14..16], true),
                    Some(parse_temperature(&p[18..20], true)),
                );
                set_with_single_prior(
                    &mut self.measurements[1],
                    parse_humidity(p[17], false),
                    Some(parse_humidity(p[21], false)),
                );
            }
            0x04 => {
                set_with_single_prior(
                    &mut self.measurements[0],
                    parse_temperature(&p[14..16], true),
                    Some(parse_temperature(&p[19..21], true)),
                );
                set_with_single_prior(
                    &mut self.measurements[1],
                    parse_humidity(p[17], false),
                    Some(parse_humidity(p[23], false)),
                );
                self.measurements[2].value = Some(Value::Boolean(parse_wetness(p[18])));
            }
            0x05 => {
                set_with_single_prior(
                    &mut self.measurements[0],
                    parse_temperature(&p[16..18], true),
                    Some(parse_temperature(&p[24..26], true)),
                );
                set_with_single_prior(
                    &mut self.measurements[1],
                    parse_humidity(p[19], false),
                    Some(parse_humidity(p[27], false)),
                );
                self.measurements[2].value = Some(parse_air_quality(&p[20..22]));
                set_with_single_prior(
                    &mut self.measurements[3],
                    parse_temperature(&p[14..16], true),
                    Some(parse_temperature(&p[22..24], true)),
                );
            }
            0x06 => {
                set_with_single_prior(
                    &mut self.measurements[0],
                    parse_temperature(&p[14..16], true),
                    Some(parse_temperature(&p[20..22], true)),
                );
                set_with_single_prior(
                    &mut self.measurements[1],
                    parse_humidity(p[19], false),
                    Some(parse_humidity(p[25], false)),
                );
                set_with_single_prior(
                    &mut self.measurements[2],
                    parse_temperature(&p[16..18], true),
                    Some(parse_temperature(&p[22..24], true)),
                );
            }
            0x07 => {
                set_with_single_prior(
                    &mut self.measurements[0],
                    parse_temperature(&p[14..16], true),
                    Some(parse_temperature(&p[22..24], true)),
                );
                set_with_single_prior(
                    &mut self.measurements[1],
                    parse_humidity(p[17], false),
                    Some(parse_humidity(p[25], false)),
                );
                set_with_single_prior(
                    &mut self.measurements[2],
                    parse_temperature(&p[18..20], true),
                    Some(parse_temperature(&p[26..28], true)),
                );
                set_with_single_prior(
                    &mut self.measurements[3],
                    parse_humidity(p[21], false),
                    Some(parse_humidity(p[29], false)),
                );
            }
            0x08 => {
                set_with_single_prior(
                    &mut self.measurements[0],
                    parse_temperature(&p[14..16], false),
                    None,
                );
                self.measurements[1].value = Some(parse_rain(&p[16..18]));
                set_time_span(&mut self.measurements[2], &p[18..28], parse_rain_time_span_raw);
            }
            0x09 => {
                // REDESIGNED: bind humidity to the declared slot 1 (see
                // the design notes), not the source's slot 2.
                set_with_single_prior(
                    &mut self.measurements[0],
                    parse_temperature(&p[14..16], true),
                    Some(parse_temperature(&p[20..22], true)),
                );
                set_with_single_prior(
                    &mut self.measurements[1],
                    parse_humidity(p[19], false),
                    Some(parse_humidity(p[25], false)),
                );
                set_with_single_prior(
                    &mut self.measurements[2],
                    parse_temperature(&p[16..18], true),
                    Some(parse_temperature(&p[22..24], true)),
                );
            }
            0x0A => {
                self.measurements[0].value = Some(Value::Boolean(parse_boolean(&p[14..16], 0x8000)));
                self.measurements[1].value = Some(Value::Boolean(parse_boolean(&p[14..16], 0x4000)));
                self.measurements[2].value = Some(Value::Boolean(parse_boolean(&p[14..16], 0x2000)));
                self.measurements[3].value = Some(Value::Boolean(parse_boolean(&p[14..16], 0x1000)));
                set_with_single_prior(
                    &mut self.measurements[4],
                    parse_temperature(&p[16..18], false),
                    None,
                );
            }
            0x0B => {
                let mut directions = Vec::new();
                let mut speeds = Vec::new();
                let mut gusts = Vec::new();
                let mut spans = Vec::new();
                let mut pos = 15usize;
                for _ in 0..5 {
                    directions.push(parse_wind_direction(p[pos + 3]));
                    speeds.push(parse_wind_speed(p[pos + 2], p[pos + 3], 0x02));
                    gusts.push(parse_wind_speed(p[pos + 1], p[pos + 3], 0x01));
                    spans.push(parse_wind_time_span(p[pos]));
                    pos += 4;
                }
                self.measurements[0].value = Some(Value::WindDirection(directions[0]));
                self.measurements[0].prior = Prior::Many(
                    directions[1..].iter().copied().map(Value::WindDirection).collect(),
                );
                self.measurements[1].value = Some(Value::Numeric(speeds[0]));
                self.measurements[1].prior =
                    Prior::Many(speeds[1..].iter().copied().map(Value::Numeric).collect());
                self.measurements[2].value = Some(Value::Numeric(gusts[0]));
                self.measurements[2].prior =
                    Prior::Many(gusts[1..].iter().copied().map(Value::Numeric).collect());
                self.measurements[3].value = Some(Value::Duration(spans[0]));
                self.measurements[3].prior =
                    Prior::Many(spans[1..].iter().copied().map(Value::Duration).collect());
            }
            0x0E => {
                self.measurements[0].value = Some(parse_temperature(&p[14..16], true));
                self.measurements[0].prior = Prior::Many(vec![
                    parse_temperature(&p[19..21], true),
                    parse_temperature(&p[24..26], true),
                ]);
                self.measurements[1].value = Some(parse_humidity_hr(&p[16..18]));
                self.measurements[1].prior = Prior::Many(vec![
                    parse_humidity_hr(&p[21..23]),
                    parse_humidity_hr(&p[26..28]),
                ]);
            }
            0x10 => {
                self.measurements[0].value = Some(Value::Boolean(parse_boolean(&p[14..16], 0x8000)));
                set_time_span(
                    &mut self.measurements[1],
                    &p[14..22],
                    parse_door_window_time_span_raw,
                );
            }
            0x11 => {
                set_with_single_prior(
                    &mut self.measurements[2],
                    parse_temperature(&p[14..16], true),
                    Some(parse_temperature(&p[30..32], true)),
                );
                set_with_single_prior(
                    &mut self.measurements[3],
                    parse_humidity(p[17], false),
                    Some(parse_humidity(p[33], false)),
                );
                set_with_single_prior(
                    &mut self.measurements[4],
                    parse_temperature(&p[18..20], true),
                    Some(parse_temperature(&p[34..36], true)),
                );
                set_with_single_prior(
                    &mut self.measurements[5],
                    parse_humidity(p[21], false),
                    Some(parse_humidity(p[37], false)),
                );
                set_with_single_prior(
                    &mut self.measurements[6],
                    parse_temperature(&p[22..24], true),
                    Some(parse_temperature(&p[38..40], true)),
                );
                set_with_single_prior(
                    &mut self.measurements[7],
                    parse_humidity(p[25], false),
                    Some(parse_humidity(p[41], false)),
                );
                set_with_single_prior(
                    &mut self.measurements[0],
                    parse_temperature(&p[26..28], true),
                    Some(parse_temperature(&p[42..44], true)),
                );
                set_with_single_prior(
                    &mut self.measurements[1],
                    parse_humidity(p[29], false),
                    Some(parse_humidity(p[45], false)),
                );
            }
            0x12 => {
                set_with_single_prior(
                    &mut self.measurements[0],
                    parse_temperature(&p[18..20], true),
                    Some(parse_temperature(&p[25..27], true)),
                );
                set_with_single_prior(
                    &mut self.measurements[1],
                    parse_humidity(p[20], false),
                    Some(parse_humidity(p[27], false)),
                );
                set_with_single_prior(
                    &mut self.measurements[2],
                    parse_humidity(p[14], true),
                    Some(parse_humidity(p[21], true)),
                );
                set_with_single_prior(
                    &mut self.measurements[3],
                    parse_humidity(p[15], true),
                    Some(parse_humidity(p[22], true)),
                );
                set_with_single_prior(
                    &mut self.measurements[4],
                    parse_humidity(p[16], true),
                    Some(parse_humidity(p[23], true)),
                );
                set_with_single_prior(
                    &mut self.measurements[5],
                    parse_humidity(p[17], true),
                    Some(parse_humidity(p[24], true)),
                );
            }
            0x15 => {
                self.measurements[0].value = Some(Value::KeyPressed(parse_key_pressed(p[14])));
                self.measurements[1].value = Some(Value::KeyPressType(parse_key_press_type(p[14])));
            }
            0x18 => {
                set_with_single_prior(
                    &mut self.measurements[0],
                    parse_temperature(&p[15..17], true),
                    Some(parse_temperature(&p[20..22], true)),
                );
                set_with_single_prior(
                    &mut self.measurements[1],
                    parse_humidity(p[17], false),
                    Some(parse_humidity(p[22], false)),
                );
                set_with_single_prior(
                    &mut self.measurements[2],
                    parse_air_pressure(&p[18..20]),
                    Some(parse_air_pressure(&p[23..25])),
                );
            }
            other => return Err(ProxyError::UnknownType(other)),
        }
        Ok(())
    }
}

impl fmt::Display for Sensor {
    /// Renders the sensor using UTC timestamps, matching the vendor app's
    /// `str_utc` form used by the spec's end-to-end test vectors.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let when = DateTime::<Utc>::from_timestamp(self.timestamp as i64, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        write!(
            f,
            "id: {} (battery {}, last {}: {})",
            self.id_hex(),
            if self.low_battery { "low" } else { "good" },
            if self.by_event { "event" } else { "seen" },
            when
        )?;
        for measurement in &self.measurements {
            write!(f, "\n{measurement}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn sensor_from_subframe(raw: &[u8]) -> Sensor {
        let id: [u8; 6] = raw[6..12].try_into().unwrap();
        let mut sensor = Sensor::new(id);
        sensor.update(raw).expect("decodes");
        sensor
    }

    #[test]
    fn checksum_detects_corruption() {
        let mut record = [0u8; RECORD_LEN];
        record[0] = 5;
        record[1] = 10;
        let sum: u32 = record[..SUBFRAME_LEN].iter().map(|&b| b as u32).sum();
        record[SUBFRAME_LEN] = (sum & 0x7F) as u8;
        assert!(checksum_valid(&record));
        record[0] ^= 0xFF;
        assert!(!checksum_valid(&record));
    }

    // Vectors below are taken verbatim from the project's own sensor decode
    // fixtures; expected text uses UTC rendering rather than the original's
    // local-time (CEST) rendering.

    #[test]
    fn type_0x18_temperature_humidity_pressure() {
        let raw = decode_hex(
            "E0618FBA0D241829EFCB988D403D1300FC26282100FC2628210203030404040101010101014000000000000000000000000000000000000000000000000000",
        );
        let sensor = sensor_from_subframe(&raw);
        assert_eq!(
            sensor.to_string(),
            "id: 1829EFCB988D (battery good, last event: 2021-11-13 13:13:49)\n\
             Temperature: 25.2°C; previous: 25.2°C\n\
             Humidity: 38%; previous: 38%\n\
             Air pressure: 1027.3 hPa; previous: 1027.3 hPa"
        );
    }

    #[test]
    fn type_0x02_single_temperature() {
        let raw = decode_hex(
            "CE618FBA69120215C1B2E3EF3697003300351A2F00C813AA0A2F1A020202020102020203064000000000000000000000000000000000000000000000000000",
        );
        let sensor = sensor_from_subframe(&raw);
        assert_eq!(
            sensor.to_string(),
            "id: 0215C1B2E3EF (battery good, last seen: 2021-11-13 13:15:21)\n\
             Temperature: 5.1°C; previous: 5.3°C"
        );
    }

    #[test]
    fn type_0x03_temperature_and_humidity() {
        let raw = decode_hex(
            "D2618FBA9116036ADF5B1C8A1BBE00C40A3000C40A301A00000000000000000000000000000000000000000000000000000000000000000000000000000000",
        );
        let sensor = sensor_from_subframe(&raw);
        assert_eq!(
            sensor.to_string(),
            "id: 036ADF5B1C8A (battery good, last seen: 2021-11-13 13:16:01)\n\
             Temperature: 19.6°C; previous: 19.6°C\n\
             Humidity: 48%; previous: 48%"
        );
    }

    #[test]
    fn type_0x06_pool_temperature_overflow() {
        let raw = decode_hex(
            "D6618FBBFE1A065526A17A61342A00C813AA0A2F00C913AA0A2F1A000000000000000000000000000000000000000000000000000000000000000000000000",
        );
        let sensor = sensor_from_subframe(&raw);
        assert_eq!(
            sensor.to_string(),
            "id: 065526A17A61 (battery good, last seen: 2021-11-13 13:22:06)\n\
             Temperature: 20.0°C; previous: 20.1°C\n\
             Humidity: 47%; previous: 47%\n\
             Pool temperature: error; previous: error"
        );
    }

    #[test]
    fn type_0x08_rain_gauge_with_variable_prior_list() {
        // Temperature 0.9°C (no error/overflow check for this slot), rain
        // 56.0mm, and a time span with three priors spanning mixed hour- and
        // minute-unit encodings, stopping at the first zero-valued entry.
        let raw = decode_hex(
            "E0618FBA0D00083F2CAA2B420001000900E0405A9BAD83E58C6A0000000000000000000000000000000000000000000000000000000000000000000000",
        );
        let sensor = sensor_from_subframe(&raw);
        assert_eq!(
            sensor.to_string(),
            "id: 083F2CAA2B42 (battery good, last event: 2021-11-13 13:13:49)\n\
             Temperature: 0.9°C\n\
             Rain: 56.0 mm\n\
             Time span: 3 days, 18:00:00; previous: [4 days, 22:05:00; 16:37:00; 2 days, 4:58:00]"
        );
    }

    #[test]
    fn type_0x11_reverses_payload_channel_order() {
        // The fourth payload channel (offset 26) fills the indoor slot; the
        // first three fill the external slots in order, not payload order.
        let raw = decode_hex(
            "E0618FBA0D00111EC6FFB789000100D2002800DC002D00E6003200BE003700D3002900DD002E00E7003300BF00380000000000000000000000000000000000",
        );
        let sensor = sensor_from_subframe(&raw);
        let text = sensor.to_string();
        assert!(text.contains("Temperature: 19.0°C; previous: 19.1°C"));
        assert!(text.contains("Humidity: 55%; previous: 56%"));
        assert!(text.contains("External temperature 1: 21.0°C; previous: 21.1°C"));
        assert!(text.contains("External humidity 1: 40%; previous: 41%"));
        assert!(text.contains("External temperature 2: 22.0°C; previous: 22.1°C"));
        assert!(text.contains("External humidity 2: 45%; previous: 46%"));
        assert!(text.contains("External temperature 3: 23.0°C; previous: 23.1°C"));
        assert!(text.contains("External humidity 3: 50%; previous: 51%"));
    }

    #[test]
    fn type_0x15_key_pressed_and_press_type() {
        // packet[14] = 0x12: upper nibble 1 -> Green, lower nibble 2 -> Double.
        let mut raw = vec![0u8; SUBFRAME_LEN];
        raw[0] = 0x15;
        raw[1..5].copy_from_slice(&1_636_809_229u32.to_be_bytes());
        raw[6..12].copy_from_slice(&decode_hex("15FFFFFFFFFF"));
        raw[12..14].copy_from_slice(&1u16.to_be_bytes());
        raw[14] = 0x12;
        let sensor = sensor_from_subframe(&raw);
        let text = sensor.to_string();
        assert!(text.contains("Key pressed: green"));
        assert!(text.contains("Key press type: double"));
    }

    #[test]
    fn type_0x15_duplicate_counter_suppresses_update() {
        let mut raw = vec![0u8; SUBFRAME_LEN];
        raw[0] = 0x15;
        raw[6..12].copy_from_slice(&decode_hex("15FFFFFFFFFF"));
        raw[12..14].copy_from_slice(&7u16.to_be_bytes());
        raw[14] = 0x12;
        let id: [u8; 6] = raw[6..12].try_into().unwrap();
        let mut sensor = Sensor::new(id);
        assert!(sensor.update(&raw).unwrap());
        assert!(!sensor.update(&raw).unwrap());
    }

    #[test]
    fn wind_direction_uses_upper_nibble_not_source_bug() {
        assert_eq!(parse_wind_direction(0x30), WindDirection::Ene);
    }

    #[test]
    fn wind_speed_ors_high_bit_not_source_bug() {
        let v = parse_wind_speed(0xFF, 0x02, 0x02);
        assert_eq!(v, ((0xFF | 0x100) as f64) / 10.0);
    }

    #[test]
    fn key_pressed_uses_corrected_shift() {
        assert_eq!(parse_key_pressed(0x06), KeyPressed::None);
        assert_eq!(parse_key_pressed(0x16), KeyPressed::Green);
        assert_eq!(parse_key_press_type(0x16), KeyPressType::Double);
    }
}

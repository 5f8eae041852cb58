//! Serial sensor line grammar
//!
//! The microcontroller prints one reading per line:
//!
//! ```text
//! Humidity: 45.00%, Temp: 24.00°C / 75.20°F, Heat index: 25.00°C / 77.00°F, Light: 345, Soil Moisture: 689
//! ```
//!
//! Grammar:
//!
//! ```text
//! line     := segment ("," segment)*
//! segment  := label ":" quantity ("/" quantity)*
//! quantity := number unit?
//! ```
//!
//! [`parse_line`] checks the structure; [`SensorLine::reading`] then picks
//! out the known measurements, each of which may be missing on its own. A
//! quantity that is not a number (a DHT read failure prints `nan`) is kept
//! as a [`QuantityError`] in its segment and only costs that measurement.

use std::fmt;
use thiserror::Error;

pub const HUMIDITY: &str = "humidity";
pub const TEMPERATURE: &str = "temperature";
pub const TEMPERATURE_F: &str = "temperature_f";
pub const LIGHT_INTENSITY: &str = "light_intensity";
pub const SOIL_MOISTURE: &str = "soil_moisture";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    #[error("empty line")]
    Empty,

    #[error("segment '{0}' has no ':'")]
    MissingColon(String),

    #[error("segment '{0}' has an empty label")]
    EmptyLabel(String),

    #[error("label '{0}' appears more than once")]
    DuplicateLabel(String),
}

/// A quantity that did not start with a finite number
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{label}' has a non-numeric quantity '{quantity}'")]
pub struct QuantityError {
    pub label: String,
    pub quantity: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub unit: Option<String>,
}

impl Quantity {
    fn has_unit(&self, unit: &str) -> bool {
        self.unit.as_deref() == Some(unit)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub label: String,
    /// In line order, so `a / b` keeps its positions when `a` is unreadable
    pub quantities: Vec<Result<Quantity, QuantityError>>,
}

impl Segment {
    fn parsed(&self) -> impl Iterator<Item = &Quantity> {
        self.quantities.iter().filter_map(|q| q.as_ref().ok())
    }

    /// First quantity carrying one of `units`, else the unitless one at `position`
    fn pick(&self, units: &[&str], position: usize) -> Option<&Quantity> {
        self.parsed()
            .find(|q| units.iter().any(|unit| q.has_unit(unit)))
            .or_else(|| {
                self.quantities
                    .get(position)
                    .and_then(|q| q.as_ref().ok())
                    .filter(|q| q.unit.is_none())
            })
    }
}

/// A structurally valid line
#[derive(Debug, Clone, PartialEq)]
pub struct SensorLine {
    segments: Vec<Segment>,
}

pub fn parse_line(line: &str) -> Result<SensorLine, LineError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(LineError::Empty);
    }

    let mut segments: Vec<Segment> = Vec::new();
    for raw in line.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (label, rest) = raw
            .split_once(':')
            .ok_or_else(|| LineError::MissingColon(raw.to_string()))?;
        let label = label.trim();
        if label.is_empty() {
            return Err(LineError::EmptyLabel(raw.to_string()));
        }
        if segments.iter().any(|s| s.label.eq_ignore_ascii_case(label)) {
            return Err(LineError::DuplicateLabel(label.to_string()));
        }

        let quantities = rest.split('/').map(|q| parse_quantity(label, q)).collect();

        segments.push(Segment {
            label: label.to_string(),
            quantities,
        });
    }

    if segments.is_empty() {
        return Err(LineError::Empty);
    }

    Ok(SensorLine { segments })
}

fn parse_quantity(label: &str, raw: &str) -> Result<Quantity, QuantityError> {
    let raw = raw.trim();
    let bad = || QuantityError {
        label: label.to_string(),
        quantity: raw.to_string(),
    };

    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number.parse().map_err(|_| bad())?;
    if !value.is_finite() {
        return Err(bad());
    }
    let unit = unit.trim();

    Ok(Quantity {
        value,
        unit: (!unit.is_empty()).then(|| unit.to_string()),
    })
}

impl SensorLine {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn get(&self, label: &str) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|s| s.label.eq_ignore_ascii_case(label))
    }

    /// Quantities that were present but not numeric
    pub fn quantity_errors(&self) -> impl Iterator<Item = &QuantityError> {
        self.segments
            .iter()
            .flat_map(|s| s.quantities.iter())
            .filter_map(|q| q.as_ref().err())
    }

    pub fn reading(&self) -> SensorReading {
        let temp = self.get("Temp");
        let celsius = temp.and_then(|s| s.pick(&["°C", "C"], 0));
        let fahrenheit = temp.and_then(|s| s.pick(&["°F", "F"], 1));

        SensorReading {
            humidity: self.first_value("Humidity", HUMIDITY),
            temperature: celsius.map(|q| q.value).ok_or(FieldMissing(TEMPERATURE)),
            temperature_f: fahrenheit.map(|q| q.value).ok_or(FieldMissing(TEMPERATURE_F)),
            light_intensity: self.first_value("Light", LIGHT_INTENSITY),
            soil_moisture: self.first_value("Soil Moisture", SOIL_MOISTURE),
        }
    }

    fn first_value(&self, label: &str, measurement: &'static str) -> Result<f64, FieldMissing> {
        self.get(label)
            .and_then(|s| s.quantities.first())
            .and_then(|q| q.as_ref().ok())
            .map(|q| q.value)
            .ok_or(FieldMissing(measurement))
    }
}

/// A measurement the line did not carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMissing(pub &'static str);

impl fmt::Display for FieldMissing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} missing from sensor line", self.0)
    }
}

impl std::error::Error for FieldMissing {}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub humidity: Result<f64, FieldMissing>,
    pub temperature: Result<f64, FieldMissing>,
    pub temperature_f: Result<f64, FieldMissing>,
    pub light_intensity: Result<f64, FieldMissing>,
    pub soil_moisture: Result<f64, FieldMissing>,
}

impl SensorReading {
    /// `(measurement, value)` for every field that parsed
    pub fn measurements(&self) -> Vec<(&'static str, f64)> {
        [
            (HUMIDITY, &self.humidity),
            (TEMPERATURE, &self.temperature),
            (TEMPERATURE_F, &self.temperature_f),
            (LIGHT_INTENSITY, &self.light_intensity),
            (SOIL_MOISTURE, &self.soil_moisture),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.ok().map(|v| (name, v)))
        .collect()
    }

    pub fn missing(&self) -> Vec<FieldMissing> {
        [
            &self.humidity,
            &self.temperature,
            &self.temperature_f,
            &self.light_intensity,
            &self.soil_moisture,
        ]
        .into_iter()
        .filter_map(|value| value.err())
        .collect()
    }
}

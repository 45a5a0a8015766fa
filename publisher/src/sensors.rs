//! Sensor sources.
//!
//! Hardware is read through the Linux IIO/hwmon sysfs attributes that the
//! kernel drivers (bmp280/bmp380, bme680, sht3x, ...) expose, so the
//! publisher never speaks I2C itself.

use crate::errors::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::ops::Range;
use std::path::PathBuf;

/// A synchronous scalar source for one metric.
pub trait Sensor: Send {
    fn metric(&self) -> &str;
    fn read(&mut self) -> Result<f64>;
}

/// One `[[sensors]]` entry of the settings file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorConfig {
    Sysfs {
        metric: String,
        path: PathBuf,
        #[serde(default = "default_scale")]
        scale: f64,
        #[serde(default)]
        offset: f64,
    },
    Simulated {
        metric: String,
        min: Option<f64>,
        max: Option<f64>,
        #[serde(default)]
        failure_rate: f64,
    },
}

fn default_scale() -> f64 {
    1.0
}

impl SensorConfig {
    pub fn metric(&self) -> &str {
        match self {
            SensorConfig::Sysfs { metric, .. } | SensorConfig::Simulated { metric, .. } => metric,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.metric().trim().is_empty() {
            return Err(Error::Config("Sensor metric name cannot be empty".to_string()));
        }
        match self {
            SensorConfig::Sysfs { scale, offset, .. } => {
                if !scale.is_finite() || *scale == 0.0 || !offset.is_finite() {
                    return Err(Error::Config(format!(
                        "Sensor {}: scale must be finite and non-zero, offset finite",
                        self.metric()
                    )));
                }
            }
            SensorConfig::Simulated {
                failure_rate, ..
            } => {
                if !(0.0..=1.0).contains(failure_rate) {
                    return Err(Error::Config(format!(
                        "Sensor {}: failure_rate {} out of range [0, 1]",
                        self.metric(),
                        failure_rate
                    )));
                }
                let range = simulated_range(self);
                if !range.start.is_finite() || !range.end.is_finite() {
                    return Err(Error::Config(format!(
                        "Sensor {}: min and max must be finite numbers",
                        self.metric()
                    )));
                }
                if range.start >= range.end {
                    return Err(Error::Config(format!(
                        "Sensor {}: min must be below max",
                        self.metric()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn build(&self) -> Box<dyn Sensor> {
        match self {
            SensorConfig::Sysfs {
                metric,
                path,
                scale,
                offset,
            } => Box::new(SysfsSensor {
                metric: metric.clone(),
                path: path.clone(),
                scale: *scale,
                offset: *offset,
            }),
            SensorConfig::Simulated {
                metric,
                failure_rate,
                ..
            } => Box::new(SimulatedSensor::new(
                metric.clone(),
                simulated_range(self),
                *failure_rate,
            )),
        }
    }
}

fn simulated_range(config: &SensorConfig) -> Range<f64> {
    let SensorConfig::Simulated {
        metric, min, max, ..
    } = config
    else {
        return 0.0..0.0;
    };
    let default = default_range(metric);
    min.unwrap_or(default.start)..max.unwrap_or(default.end)
}

/// Plausible outdoor ranges for the usual metrics.
fn default_range(metric: &str) -> Range<f64> {
    match metric {
        "temperature" => 15.0..35.0,
        "humidity" => 30.0..80.0,
        "pressure" => 980.0..1040.0,
        _ => 0.0..100.0,
    }
}

/// Validate and build every configured sensor.
pub fn build_all(configs: &[SensorConfig]) -> Result<Vec<Box<dyn Sensor>>> {
    configs
        .iter()
        .map(|config| {
            config.validate()?;
            Ok(config.build())
        })
        .collect()
}

/// Reads a sysfs attribute and converts it as `(raw + offset) * scale`.
///
/// `in_temp_input` of an IIO pressure sensor is in milli-degrees Celsius, so
/// it wants `scale = 0.001`; `in_pressure_input` is in kPa and wants `10.0`
/// for hPa.
#[derive(Debug)]
pub struct SysfsSensor {
    metric: String,
    path: PathBuf,
    scale: f64,
    offset: f64,
}

impl Sensor for SysfsSensor {
    fn metric(&self) -> &str {
        &self.metric
    }

    fn read(&mut self) -> Result<f64> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| Error::Sensor {
            metric: self.metric.clone(),
            reason: format!("{}: {}", self.path.display(), e),
        })?;
        let raw: f64 = raw.trim().parse().map_err(|e| Error::Sensor {
            metric: self.metric.clone(),
            reason: format!("{}: unreadable value {:?}: {}", self.path.display(), raw.trim(), e),
        })?;
        Ok((raw + self.offset) * self.scale)
    }
}

/// Random values in a range, failing now and then when asked to.
#[derive(Debug)]
pub struct SimulatedSensor {
    metric: String,
    range: Range<f64>,
    failure_rate: f64,
    rng: StdRng,
}

impl SimulatedSensor {
    pub fn new(metric: String, range: Range<f64>, failure_rate: f64) -> Self {
        Self {
            metric,
            range,
            failure_rate,
            rng: StdRng::from_entropy(),
        }
    }
}

impl Sensor for SimulatedSensor {
    fn metric(&self) -> &str {
        &self.metric
    }

    fn read(&mut self) -> Result<f64> {
        if self.failure_rate > 0.0 && self.rng.gen_bool(self.failure_rate) {
            return Err(Error::Sensor {
                metric: self.metric.clone(),
                reason: "simulated I/O fault".to_string(),
            });
        }
        Ok(self.rng.gen_range(self.range.clone()))
    }
}

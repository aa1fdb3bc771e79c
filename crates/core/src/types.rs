//! Telemetry types shared across the pipeline.
//!
//! A [`Sample`] is the typed form of one wire token. It is produced once by
//! the parser and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Monitored vital-sign or event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    /// Heart rate in beats per minute
    #[serde(rename = "heart_rate")]
    HeartRate,
    /// Blood oxygen saturation in percent
    #[serde(rename = "spo2")]
    SpO2,
    /// Body temperature in degrees Celsius
    #[serde(rename = "temperature")]
    Temperature,
    /// Fall event from the motion sensor
    #[serde(rename = "fall")]
    Fall,
    /// Sensor fault reported by the wearable
    #[serde(rename = "device_error")]
    DeviceError,
}

impl Channel {
    /// Every channel, in subscription order.
    pub const ALL: [Channel; 5] = [
        Channel::HeartRate,
        Channel::SpO2,
        Channel::Temperature,
        Channel::Fall,
        Channel::DeviceError,
    ];

    /// Stable lowercase tag used in stored records and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::HeartRate => "heart_rate",
            Channel::SpO2 => "spo2",
            Channel::Temperature => "temperature",
            Channel::Fall => "fall",
            Channel::DeviceError => "device_error",
        }
    }

    /// Well-known characteristic UUID the wearable publishes this channel on.
    pub fn characteristic_id(&self) -> Uuid {
        match self {
            Channel::Fall => Uuid::from_u128(0x0000abcd_0000_1000_8000_00805f9b34fb),
            Channel::HeartRate => Uuid::from_u128(0x0000abce_0000_1000_8000_00805f9b34fb),
            Channel::SpO2 => Uuid::from_u128(0x0000abcf_0000_1000_8000_00805f9b34fb),
            Channel::Temperature => Uuid::from_u128(0x0000abd0_0000_1000_8000_00805f9b34fb),
            Channel::DeviceError => Uuid::from_u128(0x0000abd1_0000_1000_8000_00805f9b34fb),
        }
    }

    /// Reverse lookup of [`Channel::characteristic_id`].
    pub fn from_characteristic_id(id: &Uuid) -> Option<Channel> {
        Channel::ALL
            .iter()
            .copied()
            .find(|c| c.characteristic_id() == *id)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which on-board sensor reported a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceFault {
    /// Inertial measurement unit (`MPU_ERROR`)
    Motion,
    /// Pulse oximetry front-end (`MAX_ERROR`)
    Optical,
}

/// One decoded telemetry reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Channel the reading belongs to
    pub channel: Channel,
    /// Numeric value, absent for event channels
    pub value: Option<f64>,
    /// Arrival time (Unix epoch milliseconds)
    pub observed_at_ms: u64,
    /// Faulting sensor, only set on [`Channel::DeviceError`]
    pub fault: Option<DeviceFault>,
}

impl Sample {
    /// Numeric reading on a vital-sign channel.
    pub fn reading(channel: Channel, value: f64, observed_at_ms: u64) -> Self {
        Self {
            channel,
            value: Some(value),
            observed_at_ms,
            fault: None,
        }
    }

    /// Fall event.
    pub fn fall(observed_at_ms: u64) -> Self {
        Self {
            channel: Channel::Fall,
            value: None,
            observed_at_ms,
            fault: None,
        }
    }

    /// Sensor fault event.
    pub fn device_fault(fault: DeviceFault, observed_at_ms: u64) -> Self {
        Self {
            channel: Channel::DeviceError,
            value: None,
            observed_at_ms,
            fault: Some(fault),
        }
    }
}

/// Kind of alert the threshold engine can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    /// Fall detected
    Fall,
    /// Sustained tachycardia
    HeartRateHigh,
    /// Sustained bradycardia
    HeartRateLow,
    /// Sustained desaturation
    SpO2Low,
    /// Sustained fever
    TemperatureHigh,
    /// Motion sensor fault
    MotionSensorFault,
    /// Optical sensor fault
    OpticalSensorFault,
}

impl AlertKind {
    /// Tag stored in the `alertType` field.
    pub fn tag(&self) -> &'static str {
        match self {
            AlertKind::Fall => "fall",
            AlertKind::HeartRateHigh => "hr_high",
            AlertKind::HeartRateLow => "hr_low",
            AlertKind::SpO2Low => "spo2_low",
            AlertKind::TemperatureHigh => "temp_high",
            AlertKind::MotionSensorFault => "mpu_error",
            AlertKind::OpticalSensorFault => "max_error",
        }
    }

    /// Reverse lookup of [`AlertKind::tag`].
    pub fn from_tag(tag: &str) -> Option<AlertKind> {
        [
            AlertKind::Fall,
            AlertKind::HeartRateHigh,
            AlertKind::HeartRateLow,
            AlertKind::SpO2Low,
            AlertKind::TemperatureHigh,
            AlertKind::MotionSensorFault,
            AlertKind::OpticalSensorFault,
        ]
        .into_iter()
        .find(|k| k.tag() == tag)
    }

    /// Short notification title.
    pub fn title(&self) -> &'static str {
        match self {
            AlertKind::Fall => "Fall detected",
            AlertKind::HeartRateHigh | AlertKind::HeartRateLow => "Abnormal heart rate",
            AlertKind::SpO2Low => "Low blood oxygen",
            AlertKind::TemperatureHigh => "High body temperature",
            AlertKind::MotionSensorFault | AlertKind::OpticalSensorFault => "Wearable sensor fault",
        }
    }

    /// Human-readable description used as notification body.
    pub fn description(&self) -> &'static str {
        match self {
            AlertKind::Fall => "A fall was detected for the monitored user.",
            AlertKind::HeartRateHigh => "Heart rate has stayed above the safe range.",
            AlertKind::HeartRateLow => "Heart rate has stayed below the safe range.",
            AlertKind::SpO2Low => "Blood oxygen saturation has stayed below the safe range.",
            AlertKind::TemperatureHigh => "Body temperature has stayed above the safe range.",
            AlertKind::MotionSensorFault => "The wearable reported a motion sensor error.",
            AlertKind::OpticalSensorFault => "The wearable reported a pulse oximeter error.",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Get current timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_characteristic_ids_are_distinct() {
        let mut ids: Vec<Uuid> = Channel::ALL.iter().map(|c| c.characteristic_id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), Channel::ALL.len());
    }

    #[test]
    fn test_characteristic_id_round_trip() {
        for channel in Channel::ALL {
            assert_eq!(
                Channel::from_characteristic_id(&channel.characteristic_id()),
                Some(channel)
            );
        }
        assert_eq!(Channel::from_characteristic_id(&Uuid::nil()), None);
    }

    #[test]
    fn test_alert_kind_tags() {
        assert_eq!(AlertKind::Fall.tag(), "fall");
        assert_eq!(AlertKind::SpO2Low.tag(), "spo2_low");
        assert_eq!(AlertKind::from_tag("max_error"), Some(AlertKind::OpticalSensorFault));
        assert_eq!(AlertKind::from_tag("nope"), None);
    }

    #[test]
    fn test_channel_serde_names() {
        let json = serde_json_like(Channel::SpO2);
        assert_eq!(json, "spo2");
    }

    fn serde_json_like(channel: Channel) -> String {
        // toml only serializes tables, so wrap the value
        #[derive(Serialize)]
        struct Wrap {
            c: Channel,
        }
        let out = toml::to_string(&Wrap { c: channel }).unwrap();
        out.trim()
            .trim_start_matches("c = ")
            .trim_matches('"')
            .to_string()
    }

    #[test]
    fn test_sample_constructors() {
        let s = Sample::reading(Channel::HeartRate, 72.0, 10);
        assert_eq!(s.value, Some(72.0));
        assert!(s.fault.is_none());

        let f = Sample::device_fault(DeviceFault::Optical, 20);
        assert_eq!(f.channel, Channel::DeviceError);
        assert_eq!(f.fault, Some(DeviceFault::Optical));
        assert!(f.value.is_none());
    }
}

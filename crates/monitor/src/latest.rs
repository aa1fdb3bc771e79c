//! Most recent value per channel, for display.

use careband_core::{Channel, DeviceFault, Sample};
use serde::{Deserialize, Serialize};

/// Display snapshot. Updated on every sample, artifacts included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatestVitals {
    /// Heart rate (bpm)
    pub heart_rate: Option<f64>,
    /// Oxygen saturation (%)
    pub spo2: Option<f64>,
    /// Body temperature (°C)
    pub temperature: Option<f64>,
    /// Last fall event (ms)
    pub last_fall_at_ms: Option<u64>,
    /// Last reported sensor fault
    pub last_fault: Option<DeviceFault>,
    /// Wearable reported sleep mode since the last sample
    pub sleeping: bool,
    /// Time of the last sample (ms)
    pub updated_at_ms: Option<u64>,
}

impl LatestVitals {
    /// Fold one sample into the snapshot.
    pub fn apply(&mut self, sample: &Sample) {
        match sample.channel {
            Channel::HeartRate => self.heart_rate = sample.value,
            Channel::SpO2 => self.spo2 = sample.value,
            Channel::Temperature => self.temperature = sample.value,
            Channel::Fall => self.last_fall_at_ms = Some(sample.observed_at_ms),
            Channel::DeviceError => self.last_fault = sample.fault,
        }
        self.sleeping = false;
        self.updated_at_ms = Some(sample.observed_at_ms);
    }
}

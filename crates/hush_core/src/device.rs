//! Audio Device Enumeration and Lookup

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Sample rates probed against each device's supported ranges
const PROBED_RATES: [u32; 7] = [8000, 16000, 32000, 44100, 48000, 96000, 192000];

/// Direction of an audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Input,
    Output,
}

/// Description of a capture or playback device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDevice {
    /// Device name, also used to select it
    pub name: String,

    pub device_type: DeviceType,

    /// Whether this is the system default for its direction
    pub is_default: bool,

    /// Probed sample rates the device accepts (may be empty if querying failed)
    pub sample_rates: Vec<u32>,

    /// Maximum supported channels
    pub max_channels: u16,
}

impl AudioDevice {
    /// Enumerate capture and playback devices on the default host
    pub fn enumerate_all() -> EngineResult<Vec<AudioDevice>> {
        let mut devices = Self::enumerate(DeviceType::Input)?;
        devices.extend(Self::enumerate(DeviceType::Output)?);

        if devices.is_empty() {
            return Err(EngineError::NoDevicesFound);
        }
        Ok(devices)
    }

    pub fn enumerate_inputs() -> EngineResult<Vec<AudioDevice>> {
        Self::enumerate(DeviceType::Input)
    }

    pub fn enumerate_outputs() -> EngineResult<Vec<AudioDevice>> {
        Self::enumerate(DeviceType::Output)
    }

    fn enumerate(device_type: DeviceType) -> EngineResult<Vec<AudioDevice>> {
        let host = cpal::default_host();
        let default_name = default_device(&host, device_type).and_then(|d| d.name().ok());

        let devices = match device_type {
            DeviceType::Input => host.input_devices(),
            DeviceType::Output => host.output_devices(),
        }
        .map_err(|e| EngineError::DeviceNotFound(e.to_string()))?;

        Ok(devices
            .filter_map(|device| {
                Self::from_cpal_device(&device, device_type, default_name.as_deref()).ok()
            })
            .collect())
    }

    /// Describe the system default device for `device_type`
    pub fn default_for(device_type: DeviceType) -> EngineResult<AudioDevice> {
        let host = cpal::default_host();
        let device = default_device(&host, device_type).ok_or(EngineError::NoDevicesFound)?;
        let mut described = Self::from_cpal_device(&device, device_type, None)?;
        described.is_default = true;
        Ok(described)
    }

    /// Whether the device advertises `sample_rate` with at least `channels`
    pub fn supports(&self, sample_rate: u32, channels: u16) -> bool {
        self.sample_rates.contains(&sample_rate) && self.max_channels >= channels
    }

    fn from_cpal_device(
        device: &cpal::Device,
        device_type: DeviceType,
        default_name: Option<&str>,
    ) -> EngineResult<Self> {
        let name = device
            .name()
            .map_err(|e| EngineError::DeviceNotFound(e.to_string()))?;
        let is_default = default_name == Some(name.as_str());

        let (sample_rates, max_channels) = match device_type {
            DeviceType::Input => device
                .supported_input_configs()
                .map(probe_ranges)
                .unwrap_or_default(),
            DeviceType::Output => device
                .supported_output_configs()
                .map(probe_ranges)
                .unwrap_or_default(),
        };

        Ok(AudioDevice {
            name,
            device_type,
            is_default,
            sample_rates,
            max_channels,
        })
    }
}

/// Find a cpal device by exact name, or the host default when `name` is `None`
pub fn resolve_device(device_type: DeviceType, name: Option<&str>) -> EngineResult<cpal::Device> {
    let host = cpal::default_host();

    let Some(name) = name else {
        return default_device(&host, device_type).ok_or(EngineError::NoDevicesFound);
    };

    let mut devices = match device_type {
        DeviceType::Input => host.input_devices(),
        DeviceType::Output => host.output_devices(),
    }
    .map_err(|e| EngineError::DeviceNotFound(e.to_string()))?;

    devices
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| EngineError::DeviceNotFound(name.to_string()))
}

fn default_device(host: &cpal::Host, device_type: DeviceType) -> Option<cpal::Device> {
    match device_type {
        DeviceType::Input => host.default_input_device(),
        DeviceType::Output => host.default_output_device(),
    }
}

fn probe_ranges(configs: impl Iterator<Item = cpal::SupportedStreamConfigRange>) -> (Vec<u32>, u16) {
    let mut sample_rates = Vec::new();
    let mut max_channels = 0u16;

    for config in configs {
        max_channels = max_channels.max(config.channels());

        let min = config.min_sample_rate().0;
        let max = config.max_sample_rate().0;
        for rate in PROBED_RATES {
            if (min..=max).contains(&rate) && !sample_rates.contains(&rate) {
                sample_rates.push(rate);
            }
        }
    }

    sample_rates.sort_unstable();
    (sample_rates, max_channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mic() -> AudioDevice {
        AudioDevice {
            name: "USB Mic".to_string(),
            device_type: DeviceType::Input,
            is_default: true,
            sample_rates: vec![16000, 48000],
            max_channels: 1,
        }
    }

    #[test]
    fn test_device_type_serialization() {
        let json = serde_json::to_string(&DeviceType::Input).unwrap();
        let deserialized: DeviceType = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, DeviceType::Input);
    }

    #[test]
    fn test_audio_device_serialization() {
        let device = mic();
        let json = serde_json::to_string(&device).unwrap();
        let deserialized: AudioDevice = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, device);
    }

    #[test]
    fn test_supports() {
        let device = mic();
        assert!(device.supports(48000, 1));
        assert!(!device.supports(48000, 2));
        assert!(!device.supports(44100, 1));
    }

    // Hardware-dependent tests: cargo test -- --ignored

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_enumerate_all_devices() {
        assert!(AudioDevice::enumerate_all().is_ok());
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_default_input() {
        let device = AudioDevice::default_for(DeviceType::Input).unwrap();
        assert!(device.is_default);
        assert_eq!(device.device_type, DeviceType::Input);
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_resolve_unknown_device() {
        let result = resolve_device(DeviceType::Output, Some("no such device"));
        assert!(matches!(result, Err(EngineError::DeviceNotFound(_))));
    }
}

//! Audio device lookup

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleRate, StreamConfig};

use crate::error::AudioError;

/// Summary of a device for listing on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
}

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Input config running at exactly `sample_rate`, preferring mono
    pub fn input_config_at(&self, sample_rate: u32) -> Result<StreamConfig, AudioError> {
        let rate = SampleRate(sample_rate);
        let mut ranges: Vec<_> = self
            .inner
            .supported_input_configs()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
            .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
            .collect();
        ranges.sort_by_key(|c| c.channels());

        ranges
            .into_iter()
            .next()
            .map(|c| c.with_sample_rate(rate).config())
            .ok_or_else(|| {
                AudioError::UnsupportedFormat(format!("{} cannot capture at {} Hz", self.name, sample_rate))
            })
    }

    /// Output config at `sample_rate` if supported, else the device default
    pub fn output_config_near(&self, sample_rate: u32) -> Result<StreamConfig, AudioError> {
        let rate = SampleRate(sample_rate);
        let exact = self
            .inner
            .supported_output_configs()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
            .filter(|c| c.channels() <= 2)
            .find(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate);

        match exact {
            Some(range) => Ok(range.with_sample_rate(rate).config()),
            None => self
                .inner
                .default_output_config()
                .map(|c| c.config())
                .map_err(|e| AudioError::DeviceNotFound(e.to_string())),
        }
    }
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let is_default = default_input_name.as_ref() == Some(&name);
                devices.push(AudioDeviceInfo {
                    name,
                    is_input: true,
                    is_output: false,
                    is_default,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                } else {
                    devices.push(AudioDeviceInfo {
                        name,
                        is_input: false,
                        is_output: true,
                        is_default,
                    });
                }
            }
        }
    }

    devices
}

/// Input device by name, or the default input when `name` is `None`
pub fn get_input_device(name: Option<&str>) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .map(AudioDevice::from_cpal)
            .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string())),
        Some(name) => {
            let devices = host
                .input_devices()
                .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
            find_by_name(devices, name)
        }
    }
}

/// Output device by name, or the default output when `name` is `None`
pub fn get_output_device(name: Option<&str>) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .map(AudioDevice::from_cpal)
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string())),
        Some(name) => {
            let devices = host
                .output_devices()
                .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
            find_by_name(devices, name)
        }
    }
}

fn find_by_name(
    devices: impl Iterator<Item = cpal::Device>,
    name: &str,
) -> Result<AudioDevice, AudioError> {
    devices
        .filter(|d| d.name().map(|n| n == name).unwrap_or(false))
        .map(AudioDevice::from_cpal)
        .next()
        .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))
}

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, SampleFormat, StreamConfig};
use vocord_foundation::AudioError;

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
}

pub struct DeviceManager {
    host: Host,
}

impl DeviceManager {
    pub fn new() -> Result<Self, AudioError> {
        Ok(Self {
            host: cpal::default_host(),
        })
    }

    pub fn host_id(&self) -> cpal::HostId {
        self.host.id()
    }

    pub fn enumerate_input_devices(&self) -> Vec<DeviceInfo> {
        let default_name = self
            .host
            .default_input_device()
            .and_then(|d| d.name().ok());

        let mut devices = Vec::new();
        if let Ok(inputs) = self.host.input_devices() {
            for device in inputs {
                if let Ok(name) = device.name() {
                    let is_default = Some(&name) == default_name.as_ref();
                    devices.push(DeviceInfo { name, is_default });
                }
            }
        }
        devices
    }

    /// Candidate device names in priority order: default device first, then
    /// the rest of the enumeration. Used by the capture thread's fallback.
    pub fn candidate_device_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for info in self.enumerate_input_devices() {
            if info.is_default {
                names.insert(0, info.name);
            } else {
                names.push(info.name);
            }
        }
        names
    }

    /// Open an input device by name (exact match first, then substring), or
    /// the host default when no name is given.
    pub fn open_input_device(&self, name: Option<&str>) -> Result<Device, AudioError> {
        match name {
            None => self
                .host
                .default_input_device()
                .ok_or(AudioError::DeviceNotFound { name: None }),
            Some(requested) => {
                let inputs = self
                    .host
                    .input_devices()
                    .map_err(|e| AudioError::Fatal(format!("Failed to enumerate devices: {}", e)))?;

                let mut substring_match = None;
                for device in inputs {
                    if let Ok(device_name) = device.name() {
                        if device_name == requested {
                            return Ok(device);
                        }
                        if substring_match.is_none() && device_name.contains(requested) {
                            substring_match = Some(device);
                        }
                    }
                }
                substring_match.ok_or_else(|| AudioError::DeviceNotFound {
                    name: Some(requested.to_string()),
                })
            }
        }
    }

    pub fn open_output_device(&self, name: Option<&str>) -> Result<Device, AudioError> {
        match name {
            None => self
                .host
                .default_output_device()
                .ok_or(AudioError::DeviceNotFound { name: None }),
            Some(requested) => {
                let outputs = self
                    .host
                    .output_devices()
                    .map_err(|e| AudioError::Fatal(format!("Failed to enumerate devices: {}", e)))?;

                let mut substring_match = None;
                for device in outputs {
                    if let Ok(device_name) = device.name() {
                        if device_name == requested {
                            return Ok(device);
                        }
                        if substring_match.is_none() && device_name.contains(requested) {
                            substring_match = Some(device);
                        }
                    }
                }
                substring_match.ok_or_else(|| AudioError::DeviceNotFound {
                    name: Some(requested.to_string()),
                })
            }
        }
    }

    pub fn negotiate_input_config(
        &self,
        device: &Device,
    ) -> Result<(StreamConfig, SampleFormat), AudioError> {
        if let Ok(default_config) = device.default_input_config() {
            return Ok((
                StreamConfig {
                    channels: default_config.channels(),
                    sample_rate: default_config.sample_rate(),
                    buffer_size: cpal::BufferSize::Default,
                },
                default_config.sample_format(),
            ));
        }

        if let Ok(configs) = device.supported_input_configs() {
            if let Some(config) = configs.into_iter().next() {
                let sample_format = config.sample_format();
                return Ok((config.with_max_sample_rate().into(), sample_format));
            }
        }

        Err(AudioError::FormatNotSupported {
            format: "No supported input formats".to_string(),
        })
    }

    pub fn negotiate_output_config(
        &self,
        device: &Device,
    ) -> Result<(StreamConfig, SampleFormat), AudioError> {
        if let Ok(default_config) = device.default_output_config() {
            return Ok((
                StreamConfig {
                    channels: default_config.channels(),
                    sample_rate: default_config.sample_rate(),
                    buffer_size: cpal::BufferSize::Default,
                },
                default_config.sample_format(),
            ));
        }

        if let Ok(configs) = device.supported_output_configs() {
            if let Some(config) = configs.into_iter().next() {
                let sample_format = config.sample_format();
                return Ok((config.with_max_sample_rate().into(), sample_format));
            }
        }

        Err(AudioError::FormatNotSupported {
            format: "No supported output formats".to_string(),
        })
    }
}

/// Some backends report permission problems as opaque backend errors; keep the
/// sniffing in one place so capture and playback agree on the mapping.
pub(crate) fn classify_build_error(err: cpal::BuildStreamError) -> AudioError {
    let text = err.to_string().to_lowercase();
    if text.contains("permission") || text.contains("access denied") {
        AudioError::PermissionDenied
    } else {
        AudioError::BuildStream(err)
    }
}

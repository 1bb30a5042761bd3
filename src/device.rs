//! Audio device enumeration and virtual-cable detection

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use crate::error::{AudioError, AudioResult};

/// Name fragments that identify VB-Cable-style virtual devices
const VIRTUAL_CABLE_KEYWORDS: &[&str] = &["cable", "vb-audio", "virtual cable"];

/// One enumerated device, addressed by its position in the host's
/// device list. The index is what settings persist and what the engine
/// is handed back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub index: usize,
    pub name: String,
    pub channels: u16,
    pub is_default: bool,
}

/// List playback devices on the default host
pub fn list_output_devices() -> AudioResult<Vec<AudioDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceEnumeration(e.to_string()))?;

    let mut result = Vec::new();
    for (index, device) in devices.enumerate() {
        if let Ok(name) = device.name() {
            let channels = device
                .default_output_config()
                .map(|c| c.channels())
                .unwrap_or(0);
            result.push(AudioDeviceInfo {
                index,
                is_default: Some(&name) == default_name.as_ref(),
                channels,
                name,
            });
        }
    }
    Ok(result)
}

/// List capture devices on the default host
pub fn list_input_devices() -> AudioResult<Vec<AudioDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| AudioError::DeviceEnumeration(e.to_string()))?;

    let mut result = Vec::new();
    for (index, device) in devices.enumerate() {
        if let Ok(name) = device.name() {
            let channels = device
                .default_input_config()
                .map(|c| c.channels())
                .unwrap_or(0);
            result.push(AudioDeviceInfo {
                index,
                is_default: Some(&name) == default_name.as_ref(),
                channels,
                name,
            });
        }
    }
    Ok(result)
}

/// Get a playback device by index, or the system default for `None`
pub fn output_device_at(index: Option<usize>) -> AudioResult<cpal::Device> {
    let host = cpal::default_host();
    match index {
        Some(i) => host
            .output_devices()
            .map_err(|e| AudioError::DeviceEnumeration(e.to_string()))?
            .nth(i)
            .ok_or_else(|| AudioError::DeviceNotFound(format!("output device #{}", i))),
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::NoDefaultDevice("no default output device".to_string())),
    }
}

/// Get a capture device by index, or the system default for `None`
pub fn input_device_at(index: Option<usize>) -> AudioResult<cpal::Device> {
    let host = cpal::default_host();
    match index {
        Some(i) => host
            .input_devices()
            .map_err(|e| AudioError::DeviceEnumeration(e.to_string()))?
            .nth(i)
            .ok_or_else(|| AudioError::DeviceNotFound(format!("input device #{}", i))),
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::NoDefaultDevice("no default input device".to_string())),
    }
}

/// Native rate of a playback device, from its default stream config
pub fn output_native_rate(device: &cpal::Device) -> Option<u32> {
    device.default_output_config().ok().map(|c| c.sample_rate().0)
}

/// Native rate of a capture device
pub fn input_native_rate(device: &cpal::Device) -> Option<u32> {
    device.default_input_config().ok().map(|c| c.sample_rate().0)
}

/// Detected virtual-cable endpoints.
///
/// A cable driver installs two devices: a render endpoint (typically
/// "CABLE Input") the engine writes to, and a capture endpoint
/// (typically "CABLE Output") that voice-chat apps record from as if it
/// were a microphone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VirtualCableInfo {
    pub installed: bool,
    /// Render endpoint index among output devices
    pub playback_index: Option<usize>,
    pub playback_name: String,
    /// Capture endpoint index among input devices
    pub capture_index: Option<usize>,
    pub capture_name: String,
}

fn is_cable_name(lower: &str) -> bool {
    VIRTUAL_CABLE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Scan the default host for a virtual cable
pub fn detect_virtual_cable() -> VirtualCableInfo {
    let mut info = VirtualCableInfo::default();
    let host = cpal::default_host();

    match host.output_devices() {
        Ok(devices) => {
            for (index, device) in devices.enumerate() {
                if let Ok(name) = device.name() {
                    let lower = name.to_lowercase();
                    if !is_cable_name(&lower) {
                        continue;
                    }
                    log::info!("virtual cable candidate [{}]: '{}' (playback)", index, name);
                    // The render side is usually labelled "... Input";
                    // a cable name without "output" in it also qualifies
                    if info.playback_index.is_none()
                        && (lower.contains("input") || !lower.contains("output"))
                    {
                        info.playback_index = Some(index);
                        info.playback_name = name;
                    }
                }
            }
        }
        Err(e) => log::error!("failed to scan output devices for virtual cable: {}", e),
    }

    match host.input_devices() {
        Ok(devices) => {
            for (index, device) in devices.enumerate() {
                if let Ok(name) = device.name() {
                    let lower = name.to_lowercase();
                    if !is_cable_name(&lower) {
                        continue;
                    }
                    log::info!("virtual cable candidate [{}]: '{}' (capture)", index, name);
                    if info.capture_index.is_none()
                        && (lower.contains("output") || !lower.contains("input"))
                    {
                        info.capture_index = Some(index);
                        info.capture_name = name;
                    }
                }
            }
        }
        Err(e) => log::error!("failed to scan input devices for virtual cable: {}", e),
    }

    info.installed = info.playback_index.is_some();
    log::info!(
        "virtual cable detected: {} (playback={}, capture={})",
        info.installed,
        if info.playback_name.is_empty() { "none" } else { &info.playback_name },
        if info.capture_name.is_empty() { "none" } else { &info.capture_name },
    );
    info
}

//! Stream lifecycle for the speaker, cable, and mic roles
//!
//! A session opens up to three streams against one effective sample
//! rate: speaker output, virtual-cable output, and microphone input.
//! Each role is independently optional - a failed open is logged and
//! that role stays silent, the others are unaffected.

use std::fmt;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
use parking_lot::Mutex;
use serde::Serialize;

use crate::buffer::{MicReader, MicRelay, MicWriter, StereoSample};
use crate::config::{
    OutputMode, BLOCK_SIZE, CHANNELS, DEFAULT_SAMPLE_RATE, MAX_BLOCK_SIZE, MIC_RING_BLOCKS,
};
use crate::device;
use crate::error::{AudioError, AudioResult};
use crate::mixer::Mixer;

/// The three stream roles a session can hold open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamRole {
    Speaker,
    Cable,
    Mic,
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamRole::Speaker => write!(f, "speaker"),
            StreamRole::Cable => write!(f, "cable"),
            StreamRole::Mic => write!(f, "mic"),
        }
    }
}

/// Advisory report of a device running at a different native rate than
/// the session's effective rate. Surfaced for user diagnostics only;
/// the engine keeps operating at its chosen rate.
#[derive(Debug, Clone, Serialize)]
pub struct RateMismatch {
    pub role: StreamRole,
    pub device_name: String,
    pub native_rate: u32,
}

/// Owns the open streams and the state their callbacks share.
///
/// `cpal::Stream` is not `Send`, so the session lives on the thread
/// that created it; the `Mixer` handle and the mic relay halves are the
/// pieces that cross into the callback threads.
pub struct DeviceSession {
    mixer: Mixer,

    speaker_device: Option<usize>,
    cable_device: Option<usize>,
    mic_device: Option<usize>,
    output_mode: OutputMode,
    mic_passthrough: bool,

    effective_rate: u32,

    /// Mixed block cached by the speaker callback for the cable
    /// callback in Both mode, so one tick never advances cursors twice
    shared_mix: Arc<Mutex<Vec<StereoSample>>>,

    speaker_stream: Option<Stream>,
    cable_stream: Option<Stream>,
    mic_stream: Option<Stream>,
}

impl DeviceSession {
    pub fn new(
        mixer: Mixer,
        speaker_device: Option<usize>,
        mic_device: Option<usize>,
        cable_device: Option<usize>,
        output_mode: OutputMode,
        mic_passthrough: bool,
    ) -> Self {
        Self {
            mixer,
            speaker_device,
            cable_device,
            mic_device,
            output_mode,
            mic_passthrough,
            effective_rate: DEFAULT_SAMPLE_RATE,
            shared_mix: Arc::new(Mutex::new(Vec::with_capacity(MAX_BLOCK_SIZE))),
            speaker_stream: None,
            cable_stream: None,
            mic_stream: None,
        }
    }

    pub fn set_devices(
        &mut self,
        speaker: Option<usize>,
        mic: Option<usize>,
        cable: Option<usize>,
    ) {
        self.speaker_device = speaker;
        self.mic_device = mic;
        self.cable_device = cable;
    }

    pub fn set_output_mode(&mut self, mode: OutputMode) {
        self.output_mode = mode;
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    pub fn set_mic_passthrough(&mut self, enabled: bool) {
        self.mic_passthrough = enabled;
    }

    pub fn mic_passthrough(&self) -> bool {
        self.mic_passthrough
    }

    /// Whether a virtual-cable playback device is configured at all
    pub fn cable_configured(&self) -> bool {
        self.cable_device.is_some()
    }

    pub fn effective_rate(&self) -> u32 {
        self.effective_rate
    }

    pub fn is_running(&self) -> bool {
        self.speaker_stream.is_some() || self.cable_stream.is_some() || self.mic_stream.is_some()
    }

    pub fn speaker_active(&self) -> bool {
        self.speaker_stream.is_some()
    }

    pub fn cable_active(&self) -> bool {
        self.cable_stream.is_some()
    }

    pub fn mic_active(&self) -> bool {
        self.mic_stream.is_some()
    }

    /// Tear down and reopen every stream the current mode calls for.
    ///
    /// Re-detects the effective rate first and returns it so the caller
    /// can purge stale cached clips. Each role tolerates failure on its
    /// own; the session is "running" if at least one stream opened.
    pub fn start(&mut self) -> u32 {
        self.stop();

        let rate = self.detect_effective_rate();
        self.shared_mix.lock().clear();

        // Relay halves exist only when the mic will feed the cable
        let mut mic_writer: Option<MicWriter> = None;
        let mut mic_reader: Option<MicReader> = None;
        if self.mic_passthrough && self.cable_device.is_some() {
            let (writer, reader) = MicRelay::with_capacity(BLOCK_SIZE * MIC_RING_BLOCKS);
            mic_writer = Some(writer);
            mic_reader = Some(reader);
        }

        if self.output_mode.needs_speaker() {
            match self.open_speaker(rate) {
                Ok(stream) => self.speaker_stream = Some(stream),
                Err(e) => log::error!("failed to open speaker stream: {}", e),
            }
        }

        if self.output_mode.needs_cable() && self.cable_device.is_some() {
            match self.open_cable(rate, mic_reader) {
                Ok(stream) => self.cable_stream = Some(stream),
                Err(e) => log::error!("failed to open virtual cable stream: {}", e),
            }
        }

        if let Some(writer) = mic_writer {
            match self.open_mic(rate, writer) {
                Ok(stream) => self.mic_stream = Some(stream),
                Err(e) => log::error!("failed to open mic stream: {}", e),
            }
        }

        rate
    }

    /// Close every open stream (dropping a cpal stream closes it)
    pub fn stop(&mut self) {
        if self.is_running() {
            log::info!("closing audio streams");
        }
        self.speaker_stream = None;
        self.cable_stream = None;
        self.mic_stream = None;
    }

    /// The effective rate adapts to the virtual cable's native rate so
    /// the cable never resamples behind our back; without a cable the
    /// engine default stands.
    fn detect_effective_rate(&mut self) -> u32 {
        self.effective_rate = match self.cable_device {
            None => DEFAULT_SAMPLE_RATE,
            Some(index) => match device::output_device_at(Some(index)) {
                Ok(dev) => match device::output_native_rate(&dev) {
                    Some(native) if native > 0 => {
                        if native != DEFAULT_SAMPLE_RATE {
                            log::info!(
                                "virtual cable native rate is {} Hz - adapting all streams to match",
                                native
                            );
                        }
                        native
                    }
                    _ => DEFAULT_SAMPLE_RATE,
                },
                Err(e) => {
                    log::warn!("cable device unavailable for rate detection: {}", e);
                    DEFAULT_SAMPLE_RATE
                }
            },
        };
        self.effective_rate
    }

    /// Compare each open role's device against the effective rate
    pub fn check_rate_mismatches(&self) -> Vec<RateMismatch> {
        let mut mismatches = Vec::new();

        if self.speaker_stream.is_some() {
            if let Ok(dev) = device::output_device_at(self.speaker_device) {
                push_mismatch(
                    &mut mismatches,
                    StreamRole::Speaker,
                    &dev,
                    device::output_native_rate(&dev),
                    self.effective_rate,
                );
            }
        }
        if self.cable_stream.is_some() {
            if let Ok(dev) = device::output_device_at(self.cable_device) {
                push_mismatch(
                    &mut mismatches,
                    StreamRole::Cable,
                    &dev,
                    device::output_native_rate(&dev),
                    self.effective_rate,
                );
            }
        }
        if self.mic_stream.is_some() {
            if let Ok(dev) = device::input_device_at(self.mic_device) {
                push_mismatch(
                    &mut mismatches,
                    StreamRole::Mic,
                    &dev,
                    device::input_native_rate(&dev),
                    self.effective_rate,
                );
            }
        }

        mismatches
    }

    fn open_speaker(&self, rate: u32) -> AudioResult<Stream> {
        let device = device::output_device_at(self.speaker_device)?;
        log_native_rate(StreamRole::Speaker, &device, rate, false);

        let config = output_config(rate);
        let mixer = self.mixer.clone();
        let shared_mix = Arc::clone(&self.shared_mix);
        let share_with_cable = self.output_mode == OutputMode::Both;
        let mut scratch = vec![StereoSample::silence(); MAX_BLOCK_SIZE];

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let frames = (data.len() / CHANNELS).min(MAX_BLOCK_SIZE);
                    let block = &mut scratch[..frames];
                    mixer.tick(block);
                    write_interleaved(block, data);

                    if share_with_cable {
                        let mut cached = shared_mix.lock();
                        cached.clear();
                        cached.extend_from_slice(block);
                    }
                },
                move |err| log::error!("speaker stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::StreamBuild {
                role: StreamRole::Speaker,
                reason: e.to_string(),
            })?;

        stream.play().map_err(|e| AudioError::StreamStart {
            role: StreamRole::Speaker,
            reason: e.to_string(),
        })?;
        log::info!("speaker stream started ({} Hz, {} frame blocks)", rate, BLOCK_SIZE);
        Ok(stream)
    }

    fn open_cable(&self, rate: u32, mut mic_reader: Option<MicReader>) -> AudioResult<Stream> {
        let device = device::output_device_at(self.cable_device)?;
        log_native_rate(StreamRole::Cable, &device, rate, false);

        let config = output_config(rate);
        let mixer = self.mixer.clone();
        let shared_mix = Arc::clone(&self.shared_mix);
        let reuse_speaker_mix = self.output_mode == OutputMode::Both;
        let mut scratch = vec![StereoSample::silence(); MAX_BLOCK_SIZE];
        let mut mic_scratch = vec![StereoSample::silence(); MAX_BLOCK_SIZE];

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let frames = (data.len() / CHANNELS).min(MAX_BLOCK_SIZE);
                    let block = &mut scratch[..frames];

                    // In Both mode the speaker callback already mixed
                    // this tick; reuse it so cursors advance once
                    let mut used_cache = false;
                    if reuse_speaker_mix {
                        let cached = shared_mix.lock();
                        if cached.len() == frames {
                            block.copy_from_slice(&cached);
                            used_cache = true;
                        }
                    }
                    if !used_cache {
                        mixer.tick(block);
                    }

                    if let Some(reader) = mic_reader.as_mut() {
                        let mic = &mut mic_scratch[..frames];
                        reader.read_fresh(mic);
                        for (dst, m) in block.iter_mut().zip(mic.iter()) {
                            dst.left = (dst.left + m.left).clamp(-1.0, 1.0);
                            dst.right = (dst.right + m.right).clamp(-1.0, 1.0);
                        }
                    }

                    write_interleaved(block, data);
                },
                move |err| log::error!("cable stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::StreamBuild {
                role: StreamRole::Cable,
                reason: e.to_string(),
            })?;

        stream.play().map_err(|e| AudioError::StreamStart {
            role: StreamRole::Cable,
            reason: e.to_string(),
        })?;
        log::info!("cable stream started ({} Hz, {} frame blocks)", rate, BLOCK_SIZE);
        Ok(stream)
    }

    fn open_mic(&self, rate: u32, mut writer: MicWriter) -> AudioResult<Stream> {
        let device = device::input_device_at(self.mic_device)?;
        log_native_rate(StreamRole::Mic, &device, rate, true);

        // Capture at the device's own channel count and fold to stereo
        // in the callback
        let input_channels = device
            .default_input_config()
            .map(|c| c.channels())
            .unwrap_or(CHANNELS as u16)
            .max(1) as usize;

        let config = StreamConfig {
            channels: input_channels as u16,
            sample_rate: SampleRate(rate),
            buffer_size: BufferSize::Fixed(BLOCK_SIZE as u32),
        };
        let mut scratch = vec![StereoSample::silence(); MAX_BLOCK_SIZE];

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let frames = (data.len() / input_channels).min(MAX_BLOCK_SIZE);
                    let block = &mut scratch[..frames];
                    for (dst, frame) in block.iter_mut().zip(data.chunks_exact(input_channels)) {
                        let left = frame[0];
                        let right = if input_channels > 1 { frame[1] } else { left };
                        *dst = StereoSample::new(left, right);
                    }
                    writer.write(block);
                },
                move |err| log::error!("mic stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::StreamBuild {
                role: StreamRole::Mic,
                reason: e.to_string(),
            })?;

        stream.play().map_err(|e| AudioError::StreamStart {
            role: StreamRole::Mic,
            reason: e.to_string(),
        })?;
        log::info!(
            "mic stream started ({} Hz, {} input channels)",
            rate,
            input_channels
        );
        Ok(stream)
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn output_config(rate: u32) -> StreamConfig {
    StreamConfig {
        channels: CHANNELS as u16,
        sample_rate: SampleRate(rate),
        buffer_size: BufferSize::Fixed(BLOCK_SIZE as u32),
    }
}

/// Copy a mixed block into the device's interleaved buffer, silencing
/// any frames past the scratch bound
fn write_interleaved(block: &[StereoSample], data: &mut [f32]) {
    let mut frames = data.chunks_mut(CHANNELS);
    for (out, s) in (&mut frames).zip(block) {
        out[0] = s.left;
        if out.len() > 1 {
            out[1] = s.right;
        }
    }
    for out in frames {
        for ch in out.iter_mut() {
            *ch = 0.0;
        }
    }
}

fn push_mismatch(
    mismatches: &mut Vec<RateMismatch>,
    role: StreamRole,
    device: &cpal::Device,
    native: Option<u32>,
    effective: u32,
) {
    if let Some(native_rate) = native {
        if native_rate != effective {
            mismatches.push(RateMismatch {
                role,
                device_name: device.name().unwrap_or_else(|_| "unknown".to_string()),
                native_rate,
            });
        }
    }
}

fn log_native_rate(role: StreamRole, device: &cpal::Device, effective: u32, input: bool) {
    let native = if input {
        device::input_native_rate(device)
    } else {
        device::output_native_rate(device)
    };
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    match native {
        Some(rate) => log::info!(
            "{} device '{}' native sample rate: {} Hz (using: {} Hz)",
            role,
            name,
            rate,
            effective
        ),
        None => log::debug!("{} device '{}' has no default config", role, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> DeviceSession {
        DeviceSession::new(Mixer::new(1.0), None, None, None, OutputMode::Both, true)
    }

    #[test]
    fn test_new_session_is_closed() {
        let s = session();
        assert!(!s.is_running());
        assert!(!s.speaker_active());
        assert!(!s.cable_active());
        assert!(!s.mic_active());
        assert_eq!(s.effective_rate(), DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn test_stop_on_closed_session_is_noop() {
        let mut s = session();
        s.stop();
        assert!(!s.is_running());
    }

    #[test]
    fn test_no_cable_means_default_rate() {
        let mut s = session();
        assert_eq!(s.detect_effective_rate(), DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn test_start_without_devices_degrades_gracefully() {
        // On a machine with no audio hardware every role fails to open;
        // start() must not panic and must leave a consistent session
        let mut s = session();
        let rate = s.start();
        assert_eq!(rate, DEFAULT_SAMPLE_RATE);
        s.stop();
        assert!(!s.is_running());
    }

    #[test]
    fn test_no_mismatches_while_closed() {
        let s = session();
        assert!(s.check_rate_mismatches().is_empty());
    }

    #[test]
    fn test_write_interleaved_pads_with_silence() {
        let block = [StereoSample::new(0.1, -0.1), StereoSample::new(0.2, -0.2)];
        let mut data = [9.0f32; 8];
        write_interleaved(&block, &mut data);
        assert_eq!(&data[..4], &[0.1, -0.1, 0.2, -0.2]);
        assert_eq!(&data[4..], &[0.0; 4]);
    }
}

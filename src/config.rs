//! Engine constants and externally supplied settings

use serde::{Deserialize, Serialize};

/// Default sample rate, used when no virtual cable dictates one
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// All buffers are interleaved stereo
pub const CHANNELS: usize = 2;

/// Frames per callback block (~21ms at 48kHz)
pub const BLOCK_SIZE: usize = 1024;

/// Mic relay ring capacity, in callback blocks
pub const MIC_RING_BLOCKS: usize = 8;

/// Upper bound on frames handled per callback without allocating.
/// Devices that insist on larger blocks get the first MAX_BLOCK_SIZE
/// frames and silence for the rest.
pub const MAX_BLOCK_SIZE: usize = 8192;

/// Where the mixed output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Physical speakers only
    Speakers,
    /// Virtual cable only (other apps hear it as a microphone)
    Mic,
    /// Speakers and virtual cable simultaneously
    Both,
}

impl OutputMode {
    pub fn needs_speaker(self) -> bool {
        matches!(self, OutputMode::Speakers | OutputMode::Both)
    }

    pub fn needs_cable(self) -> bool {
        matches!(self, OutputMode::Mic | OutputMode::Both)
    }
}

impl Default for OutputMode {
    fn default() -> Self {
        OutputMode::Both
    }
}

/// Snapshot of persisted audio settings, supplied by the configuration
/// layer at engine construction. The engine never persists anything
/// itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Speaker device index, `None` for the system default
    pub speaker_device: Option<usize>,
    /// Microphone device index, `None` for the system default
    pub mic_device: Option<usize>,
    /// Virtual cable playback device index (the "CABLE Input" endpoint)
    pub virtual_cable_device: Option<usize>,
    pub output_mode: OutputMode,
    /// Master volume, 0.0 to 1.0
    pub master_volume: f32,
    /// Mix live microphone input into the cable output
    pub mic_passthrough: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            speaker_device: None,
            mic_device: None,
            virtual_cable_device: None,
            output_mode: OutputMode::Both,
            master_volume: 0.8,
            mic_passthrough: true,
        }
    }
}

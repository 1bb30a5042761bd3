//! Soundboard audio engine
//!
//! Plays short clips on demand and routes the mixed result to physical
//! speakers and/or a virtual audio cable that other applications use as
//! a microphone, optionally blending live mic input into the cable feed:
//! - Clip decoding via Symphonia, cached per file at the effective rate
//! - Concurrent mixing of any number of playing instances, hard-clipped
//! - Speaker / cable / mic stream lifecycle over CPAL
//! - Lock-free SPSC mic relay for passthrough

pub mod buffer;
pub mod clip;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod mixer;
pub mod session;

pub use buffer::StereoSample;
pub use clip::{ClipCache, SoundClip};
pub use config::{AudioSettings, OutputMode, BLOCK_SIZE, CHANNELS, DEFAULT_SAMPLE_RATE};
pub use device::{
    detect_virtual_cable, list_input_devices, list_output_devices, AudioDeviceInfo,
    VirtualCableInfo,
};
pub use engine::AudioEngine;
pub use error::{AudioError, AudioResult};
pub use session::{RateMismatch, StreamRole};

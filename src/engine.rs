//! The engine facade - the operation surface external collaborators call

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::clip::ClipCache;
use crate::config::{AudioSettings, OutputMode};
use crate::error::AudioResult;
use crate::mixer::Mixer;
use crate::session::{DeviceSession, RateMismatch};

/// The soundboard audio engine.
///
/// Owns the mix bus, the clip cache, and the device session. Constructed
/// by the application layer from persisted settings and held on its
/// thread for the application's lifetime (`cpal` streams are not `Send`,
/// so the engine is not either - only the mix bus handle crosses into
/// the audio callbacks).
///
/// `play`, `stop_sound`, `set_master_volume` and the query operations
/// are cheap and safe to call from UI event handlers; `start`, `stop`,
/// `set_output_mode` and the device setters tear streams down and back
/// up, which blocks briefly.
pub struct AudioEngine {
    mixer: Mixer,
    clips: ClipCache,
    session: DeviceSession,
}

impl AudioEngine {
    /// Build an engine from persisted settings. No device I/O happens
    /// until `start` (or the first `play`).
    pub fn new(settings: AudioSettings) -> Self {
        let mixer = Mixer::new(settings.master_volume);
        let session = DeviceSession::new(
            mixer.clone(),
            settings.speaker_device,
            settings.mic_device,
            settings.virtual_cable_device,
            settings.output_mode,
            settings.mic_passthrough,
        );
        let clips = ClipCache::new(session.effective_rate());
        Self {
            mixer,
            clips,
            session,
        }
    }

    /// Open the streams the current mode calls for. Re-detects the
    /// effective rate; if it changed, every cached clip is evicted
    /// (they were resampled for the old rate).
    pub fn start(&mut self) {
        let rate = self.session.start();
        self.clips.set_target_rate(rate);
    }

    /// Close all streams and silence everything
    pub fn stop(&mut self) {
        self.session.stop();
        self.mixer.stop_all();
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    /// Fire-and-forget play. Decode or stream failures are logged with
    /// the file path and never reach the caller.
    pub fn play(&mut self, path: &Path, volume: f32) {
        if let Err(e) = self.try_play(path, volume) {
            log::error!("failed to play '{}': {}", path.display(), e);
        }
    }

    /// Fallible play: decode-or-fetch the clip, add a voice at the given
    /// instance volume, and auto-start any needed stream role that is
    /// not up. Decoding happens here on the caller's thread, never
    /// under the mix-bus lock.
    pub fn try_play(&mut self, path: &Path, volume: f32) -> AudioResult<()> {
        let clip = self.clips.load(path)?;
        self.mixer.play(clip, volume);
        self.ensure_streams();
        Ok(())
    }

    fn ensure_streams(&mut self) {
        let mode = self.session.output_mode();
        let speaker_missing = mode.needs_speaker() && !self.session.speaker_active();
        let cable_missing = mode.needs_cable()
            && self.session.cable_configured()
            && !self.session.cable_active();
        if speaker_missing || cable_missing {
            self.start();
        }
    }

    /// Stop every playing instance of one file
    pub fn stop_sound(&mut self, path: &Path) {
        self.mixer.stop_path(path);
    }

    /// Stop everything that is playing
    pub fn stop_all(&mut self) {
        self.mixer.stop_all();
    }

    /// Master volume, clamped to 0.0-1.0
    pub fn set_master_volume(&mut self, volume: f32) {
        self.mixer.set_master_volume(volume);
    }

    pub fn master_volume(&self) -> f32 {
        self.mixer.master_volume()
    }

    /// Switch output routing. Streams are fully stopped and reopened;
    /// play cursors are untouched, so a clip playing across the switch
    /// keeps its position.
    pub fn set_output_mode(&mut self, mode: OutputMode) {
        self.session.set_output_mode(mode);
        self.start();
    }

    pub fn output_mode(&self) -> OutputMode {
        self.session.output_mode()
    }

    /// Toggle mic passthrough, restarting streams if any are open
    pub fn set_mic_passthrough(&mut self, enabled: bool) {
        self.session.set_mic_passthrough(enabled);
        if self.session.is_running() {
            self.start();
        }
    }

    pub fn mic_passthrough(&self) -> bool {
        self.session.mic_passthrough()
    }

    /// Point the engine at different devices (`None` = system default),
    /// restarting streams if any are open
    pub fn set_devices(
        &mut self,
        speaker: Option<usize>,
        mic: Option<usize>,
        cable: Option<usize>,
    ) {
        self.session.set_devices(speaker, mic, cable);
        if self.session.is_running() {
            self.start();
        }
    }

    /// Decode a clip ahead of its first play
    pub fn preload(&mut self, path: &Path) -> AudioResult<()> {
        self.clips.load(path).map(|_| ())
    }

    /// Drop one cached clip, or the whole cache. Used when files are
    /// deleted or renamed underneath the engine.
    pub fn invalidate_cache(&mut self, path: Option<&Path>) {
        self.clips.invalidate(path);
    }

    /// Number of instances still playing
    pub fn playing_count(&self) -> usize {
        self.mixer.playing_count()
    }

    /// Paths with at least one playing instance
    pub fn playing_paths(&self) -> HashSet<PathBuf> {
        self.mixer.playing_paths()
    }

    /// Seconds left per playing path, at the effective rate
    pub fn playing_remaining(&self) -> HashMap<PathBuf, f32> {
        self.mixer.playing_remaining(self.session.effective_rate())
    }

    /// Advisory: open devices whose native rate differs from the
    /// effective rate (candidates for crackle/pitch complaints)
    pub fn check_rate_mismatches(&self) -> Vec<RateMismatch> {
        self.session.check_rate_mismatches()
    }

    /// The rate all streams and cached clips are bound to
    pub fn effective_rate(&self) -> u32 {
        self.session.effective_rate()
    }
}

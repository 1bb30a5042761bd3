//! Playback instances and the shared mix bus

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::StereoSample;
use crate::clip::SoundClip;

/// One playing instance of a clip: a read cursor plus an instance volume.
///
/// Voices share their clip read-only; several voices may play the same
/// clip concurrently at different positions.
pub struct Voice {
    clip: Arc<SoundClip>,
    volume: f32,
    position: usize,
    finished: bool,
}

impl Voice {
    pub fn new(clip: Arc<SoundClip>, volume: f32) -> Self {
        Self {
            clip,
            volume: volume.clamp(0.0, 2.0),
            position: 0,
            finished: false,
        }
    }

    /// Accumulate up to `out.len()` volume-scaled frames into `out`.
    ///
    /// Contributes exact silence (adds nothing) once exhausted, and
    /// stays exhausted - the cursor never passes the clip's end.
    pub fn mix_into(&mut self, out: &mut [StereoSample]) {
        if self.finished {
            return;
        }

        let remaining = self.clip.frame_count() - self.position;
        let count = out.len().min(remaining);

        let src = &self.clip.frames[self.position..self.position + count];
        for (dst, s) in out.iter_mut().zip(src) {
            dst.left += s.left * self.volume;
            dst.right += s.right * self.volume;
        }

        self.position += count;
        if self.position >= self.clip.frame_count() {
            self.finished = true;
        }
    }

    pub fn path(&self) -> &Path {
        &self.clip.path
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn remaining_frames(&self) -> usize {
        self.clip.frame_count() - self.position
    }
}

struct MixState {
    voices: Vec<Voice>,
    master_volume: f32,
}

/// The live set of voices plus the master volume, shared between the
/// audio callbacks and the control surface.
///
/// Cloning yields another handle to the same bus. The critical section
/// in `tick` covers only vector accumulation and compaction - it runs
/// inside hardware callbacks with a real-time deadline, so decoding and
/// I/O stay outside (clips arrive here already decoded).
#[derive(Clone)]
pub struct Mixer {
    state: Arc<Mutex<MixState>>,
}

impl Mixer {
    pub fn new(master_volume: f32) -> Self {
        Self {
            state: Arc::new(Mutex::new(MixState {
                voices: Vec::new(),
                master_volume: master_volume.clamp(0.0, 1.0),
            })),
        }
    }

    /// Add a voice for `clip` at the given instance volume (0.0-2.0)
    pub fn play(&self, clip: Arc<SoundClip>, volume: f32) {
        let mut state = self.state.lock();
        state.voices.push(Voice::new(clip, volume));
    }

    /// Remove every voice playing the given path
    pub fn stop_path(&self, path: &Path) {
        let mut state = self.state.lock();
        state.voices.retain(|v| v.path() != path);
    }

    /// Remove every voice
    pub fn stop_all(&self) {
        let mut state = self.state.lock();
        state.voices.clear();
    }

    /// Set master volume, clamped to 0.0-1.0. Does not touch cursors:
    /// voices keep advancing silently at volume zero.
    pub fn set_master_volume(&self, volume: f32) {
        let mut state = self.state.lock();
        state.master_volume = volume.clamp(0.0, 1.0);
    }

    pub fn master_volume(&self) -> f32 {
        self.state.lock().master_volume
    }

    /// Number of voices whose cursor has not yet reached end-of-clip
    pub fn playing_count(&self) -> usize {
        let state = self.state.lock();
        state.voices.iter().filter(|v| !v.is_finished()).count()
    }

    /// Paths with at least one unfinished voice
    pub fn playing_paths(&self) -> HashSet<PathBuf> {
        let state = self.state.lock();
        state
            .voices
            .iter()
            .filter(|v| !v.is_finished())
            .map(|v| v.path().to_path_buf())
            .collect()
    }

    /// Seconds left per playing path. With several voices on one path,
    /// the longest remaining time wins.
    pub fn playing_remaining(&self, sample_rate: u32) -> HashMap<PathBuf, f32> {
        let state = self.state.lock();
        let mut remaining: HashMap<PathBuf, f32> = HashMap::new();
        for voice in state.voices.iter().filter(|v| !v.is_finished()) {
            let secs = voice.remaining_frames() as f32 / sample_rate as f32;
            let entry = remaining.entry(voice.path().to_path_buf()).or_insert(0.0);
            if secs > *entry {
                *entry = secs;
            }
        }
        remaining
    }

    /// Mix one block: accumulate every live voice, drop the ones that
    /// just finished, then scale by master volume and hard-clip to
    /// [-1.0, 1.0]. Simultaneous loud sounds saturate instead of
    /// wrapping.
    ///
    /// Callable from an audio callback; the lock is held only for the
    /// accumulate-and-compact span.
    pub fn tick(&self, out: &mut [StereoSample]) {
        for frame in out.iter_mut() {
            *frame = StereoSample::silence();
        }

        let master = {
            let mut state = self.state.lock();
            for voice in state.voices.iter_mut() {
                voice.mix_into(out);
            }
            state.voices.retain(|v| !v.is_finished());
            state.master_volume
        };

        for frame in out.iter_mut() {
            frame.left = (frame.left * master).clamp(-1.0, 1.0);
            frame.right = (frame.right * master).clamp(-1.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(name: &str, frames: Vec<StereoSample>) -> Arc<SoundClip> {
        Arc::new(SoundClip {
            path: PathBuf::from(name),
            sample_rate: 48_000,
            frames,
        })
    }

    // Ramp over i/1024: exactly representable in f32, so tests can
    // compare samples with ==
    fn ramp_clip(name: &str, len: usize) -> Arc<SoundClip> {
        clip(name, (0..len).map(|i| StereoSample::mono(i as f32 / 1024.0)).collect())
    }

    #[test]
    fn test_voice_pads_tail_with_silence_and_finishes() {
        let mut voice = Voice::new(ramp_clip("a.wav", 10), 1.0);
        let mut out = vec![StereoSample::silence(); 4];

        voice.mix_into(&mut out);
        assert_eq!(out[0], StereoSample::mono(0.0));
        assert_eq!(out[3], StereoSample::mono(3.0 / 1024.0));
        assert!(!voice.is_finished());

        voice.mix_into(&mut out);
        assert!(!voice.is_finished());

        // Only 2 frames left: remainder plus untouched (zero) padding
        out.fill(StereoSample::silence());
        voice.mix_into(&mut out);
        assert_eq!(out[0], StereoSample::mono(8.0 / 1024.0));
        assert_eq!(out[1], StereoSample::mono(9.0 / 1024.0));
        assert_eq!(out[2], StereoSample::silence());
        assert!(voice.is_finished());

        // Idempotent after exhaustion
        out.fill(StereoSample::silence());
        voice.mix_into(&mut out);
        assert!(out.iter().all(|f| *f == StereoSample::silence()));
        assert_eq!(voice.remaining_frames(), 0);
    }

    #[test]
    fn test_overflow_hard_clips_to_unity() {
        let mixer = Mixer::new(1.0);
        let full = clip("loud.wav", vec![StereoSample::mono(1.0); 8]);
        mixer.play(Arc::clone(&full), 1.0);
        mixer.play(full, 1.0);

        let mut out = vec![StereoSample::silence(); 8];
        mixer.tick(&mut out);
        // Unclipped sum is 2.0; it must read back as exactly 1.0
        for frame in &out {
            assert_eq!(frame.left, 1.0);
            assert_eq!(frame.right, 1.0);
        }
    }

    #[test]
    fn test_negative_overflow_clips_to_negative_unity() {
        let mixer = Mixer::new(1.0);
        let full = clip("low.wav", vec![StereoSample::mono(-0.8); 8]);
        mixer.play(Arc::clone(&full), 1.0);
        mixer.play(full, 1.0);

        let mut out = vec![StereoSample::silence(); 8];
        mixer.tick(&mut out);
        for frame in &out {
            assert_eq!(frame.left, -1.0);
        }
    }

    #[test]
    fn test_instance_volume_scales_contribution() {
        let mixer = Mixer::new(1.0);
        mixer.play(clip("half.wav", vec![StereoSample::mono(0.5); 4]), 0.5);

        let mut out = vec![StereoSample::silence(); 4];
        mixer.tick(&mut out);
        assert_eq!(out[0].left, 0.25);
    }

    #[test]
    fn test_instance_volume_clamped_to_two() {
        let mixer = Mixer::new(1.0);
        mixer.play(clip("boost.wav", vec![StereoSample::mono(0.25); 4]), 5.0);

        let mut out = vec![StereoSample::silence(); 4];
        mixer.tick(&mut out);
        assert_eq!(out[0].left, 0.5);
    }

    #[test]
    fn test_master_zero_silences_without_resetting_cursors() {
        let mixer = Mixer::new(1.0);
        mixer.play(ramp_clip("ramp.wav", 100), 1.0);

        let mut out = vec![StereoSample::silence(); 10];
        mixer.tick(&mut out);
        assert_eq!(out[5], StereoSample::mono(5.0 / 1024.0));

        mixer.set_master_volume(0.0);
        mixer.tick(&mut out);
        assert!(out.iter().all(|f| *f == StereoSample::silence()));

        // Back at full volume the cursor has kept advancing - playback
        // resumes from frame 20, not from the start
        mixer.set_master_volume(1.0);
        mixer.tick(&mut out);
        assert_eq!(out[0], StereoSample::mono(20.0 / 1024.0));
    }

    #[test]
    fn test_playing_count_tracks_unfinished_voices() {
        let mixer = Mixer::new(1.0);
        let short = clip("short.wav", vec![StereoSample::mono(0.1); 4]);
        let long = ramp_clip("long.wav", 64);
        mixer.play(short, 1.0);
        mixer.play(long, 1.0);
        assert_eq!(mixer.playing_count(), 2);

        let mut out = vec![StereoSample::silence(); 16];
        mixer.tick(&mut out);
        // Short clip exhausted within the block and was compacted away
        assert_eq!(mixer.playing_count(), 1);

        for _ in 0..3 {
            mixer.tick(&mut out);
        }
        assert_eq!(mixer.playing_count(), 0);
    }

    #[test]
    fn test_concurrent_instances_of_same_path() {
        let mixer = Mixer::new(1.0);
        let c = ramp_clip("same.wav", 256);
        mixer.play(Arc::clone(&c), 0.5);
        mixer.play(c, 1.0);
        assert_eq!(mixer.playing_count(), 2);
        assert_eq!(mixer.playing_paths().len(), 1);
    }

    #[test]
    fn test_stop_path_and_stop_all() {
        let mixer = Mixer::new(1.0);
        mixer.play(ramp_clip("a.wav", 64), 1.0);
        mixer.play(ramp_clip("b.wav", 64), 1.0);
        mixer.play(ramp_clip("a.wav", 64), 1.0);

        mixer.stop_path(Path::new("a.wav"));
        assert_eq!(mixer.playing_count(), 1);
        assert!(mixer.playing_paths().contains(Path::new("b.wav")));

        mixer.stop_all();
        assert_eq!(mixer.playing_count(), 0);
    }

    #[test]
    fn test_playing_remaining_takes_longest_instance() {
        let mixer = Mixer::new(1.0);
        let c = ramp_clip("dup.wav", 48_000);
        mixer.play(Arc::clone(&c), 1.0);

        // Advance the first instance by one block before starting the second
        let mut out = vec![StereoSample::silence(); 24_000];
        mixer.tick(&mut out);
        mixer.play(c, 1.0);

        let remaining = mixer.playing_remaining(48_000);
        let secs = remaining[Path::new("dup.wav")];
        assert!((secs - 1.0).abs() < 1e-3, "expected ~1.0s, got {}", secs);
    }

    #[test]
    fn test_master_volume_clamped() {
        let mixer = Mixer::new(2.5);
        assert_eq!(mixer.master_volume(), 1.0);
        mixer.set_master_volume(-1.0);
        assert_eq!(mixer.master_volume(), 0.0);
    }
}

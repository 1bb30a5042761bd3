//! Sound clip decoding, resampling, and caching

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::buffer::StereoSample;
use crate::error::{AudioError, AudioResult};

/// A decoded sound, fixed at stereo and a single sample rate.
///
/// Immutable once decoded: the mix bus shares clips across playback
/// instances via `Arc` and never writes to them.
#[derive(Debug)]
pub struct SoundClip {
    pub path: PathBuf,
    /// Rate the frames were resampled to (the engine's effective rate)
    pub sample_rate: u32,
    pub frames: Vec<StereoSample>,
}

impl SoundClip {
    /// Decode a sound file to stereo frames at `target_rate`.
    ///
    /// Mono sources are duplicated to both channels, sources with more
    /// than two channels keep only the first two. A native rate other
    /// than `target_rate` goes through the linear resampler.
    pub fn load(path: &Path, target_rate: u32) -> AudioResult<Self> {
        let (native_frames, native_rate) = decode_file(path)?;

        let frames = if native_rate != target_rate {
            resample_linear(&native_frames, native_rate, target_rate)
        } else {
            native_frames
        };

        if frames.is_empty() {
            log::warn!("clip {} decoded to zero frames", path.display());
        } else {
            log::debug!(
                "loaded {}: {} frames at {}Hz (native {}Hz)",
                path.display(),
                frames.len(),
                target_rate,
                native_rate
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            sample_rate: target_rate,
            frames,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn duration_secs(&self) -> f32 {
        self.frames.len() as f32 / self.sample_rate as f32
    }
}

/// Decode a whole file to stereo frames at its native rate
fn decode_file(path: &Path) -> AudioResult<(Vec<StereoSample>, u32)> {
    let file = File::open(path).map_err(|e| AudioError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| AudioError::NoAudioTrack {
            path: path.to_path_buf(),
        })?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let mut frames: Vec<StereoSample> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut channels = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                return Err(AudioError::DecodeFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                if channels == 0 {
                    channels = spec.channels.count();
                    if sample_rate == 0 {
                        sample_rate = spec.rate;
                    }
                }

                // One conversion buffer for the whole file, regrown only
                // if a packet decodes longer than any before it
                let required = decoded.capacity() * channels;
                if sample_buf.as_ref().map_or(true, |b| b.capacity() < required) {
                    sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    fold_to_stereo(buf.samples(), channels, &mut frames);
                }
            }
            Err(SymphoniaError::DecodeError(e)) => {
                // Corrupt packet mid-stream; keep what we have
                log::debug!("skipping undecodable packet in {}: {}", path.display(), e);
                continue;
            }
            Err(e) => {
                return Err(AudioError::DecodeFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }
    }

    if sample_rate == 0 {
        return Err(AudioError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: "unknown sample rate".to_string(),
        });
    }

    Ok((frames, sample_rate))
}

/// Fold interleaved samples of any channel count down to stereo frames
fn fold_to_stereo(interleaved: &[f32], channels: usize, out: &mut Vec<StereoSample>) {
    if channels == 0 {
        return;
    }
    out.reserve(interleaved.len() / channels);
    for frame in interleaved.chunks_exact(channels) {
        let left = frame[0];
        let right = if channels > 1 { frame[1] } else { left };
        out.push(StereoSample::new(left, right));
    }
}

/// Linear-interpolation resampler.
///
/// Output index i maps to source position `i * native/target`; the two
/// neighboring frames are blended by the fractional part. Deterministic
/// and allocation-bounded, which is what short effect clips need -
/// this is not a hi-fi resampler and is not meant to become one.
fn resample_linear(frames: &[StereoSample], native_rate: u32, target_rate: u32) -> Vec<StereoSample> {
    if native_rate == target_rate || frames.is_empty() {
        return frames.to_vec();
    }

    let step = native_rate as f64 / target_rate as f64;
    let new_len = (frames.len() as f64 * target_rate as f64 / native_rate as f64).round() as usize;
    let last = frames.len() - 1;

    let mut out = Vec::with_capacity(new_len);
    for i in 0..new_len {
        let pos = i as f64 * step;
        let lo = (pos.floor() as usize).min(last);
        let hi = (lo + 1).min(last);
        let frac = (pos - lo as f64) as f32;

        let a = frames[lo];
        let b = frames[hi];
        out.push(StereoSample::new(
            a.left + (b.left - a.left) * frac,
            a.right + (b.right - a.right) * frac,
        ));
    }
    out
}

/// Decoded-clip cache keyed by source path.
///
/// Every cached clip is resampled to the cache's target rate, so a rate
/// change invalidates everything at once.
pub struct ClipCache {
    target_rate: u32,
    clips: HashMap<PathBuf, Arc<SoundClip>>,
}

impl ClipCache {
    pub fn new(target_rate: u32) -> Self {
        Self {
            target_rate,
            clips: HashMap::new(),
        }
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Change the target rate, purging every cached clip if it differs -
    /// they were all resampled for the old rate.
    pub fn set_target_rate(&mut self, rate: u32) {
        if rate == self.target_rate {
            return;
        }
        log::info!(
            "sample rate changed from {} to {} Hz - clearing {} cached clips",
            self.target_rate,
            rate,
            self.clips.len()
        );
        self.clips.clear();
        self.target_rate = rate;
    }

    /// Return the cached clip for `path`, decoding it on first use
    pub fn load(&mut self, path: &Path) -> AudioResult<Arc<SoundClip>> {
        if let Some(clip) = self.clips.get(path) {
            return Ok(Arc::clone(clip));
        }
        let clip = Arc::new(SoundClip::load(path, self.target_rate)?);
        self.clips.insert(path.to_path_buf(), Arc::clone(&clip));
        Ok(clip)
    }

    /// Drop one cached entry, or all of them
    pub fn invalidate(&mut self, path: Option<&Path>) {
        match path {
            Some(p) => {
                self.clips.remove(p);
            }
            None => self.clips.clear(),
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.clips.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};

    fn write_wav_f32(dir: &Path, name: &str, rate: u32, channels: u16, frames: &[f32]) -> PathBuf {
        let path = dir.join(name);
        let spec = WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for &s in frames {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn test_mono_wav_folds_to_identical_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 / 1000.0) - 0.5).collect();
        let path = write_wav_f32(dir.path(), "mono.wav", 48_000, 1, &samples);

        let clip = SoundClip::load(&path, 48_000).unwrap();
        assert_eq!(clip.frame_count(), 1000);
        assert_eq!(clip.sample_rate, 48_000);
        for (i, frame) in clip.frames.iter().enumerate() {
            assert_eq!(frame.left, frame.right, "channels differ at frame {}", i);
            assert_eq!(frame.left, samples[i]);
        }
    }

    #[test]
    fn test_one_second_44100_mono_to_48000() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<f32> = (0..44_100)
            .map(|i| (i as f32 * 0.01).sin() * 0.25)
            .collect();
        let path = write_wav_f32(dir.path(), "tone.wav", 44_100, 1, &samples);

        let clip = SoundClip::load(&path, 48_000).unwrap();
        let expected = (44_100f64 * 48_000.0 / 44_100.0).round() as usize;
        assert_eq!(clip.frame_count(), expected);
        // Mono source: both channels stay byte-identical through the resampler
        for frame in &clip.frames {
            assert_eq!(frame.left.to_bits(), frame.right.to_bits());
        }
    }

    #[test]
    fn test_stereo_same_rate_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        // Interleaved L/R with distinct channel content
        let mut samples = Vec::new();
        for i in 0..500 {
            samples.push(i as f32 / 500.0);
            samples.push(-(i as f32) / 500.0);
        }
        let path = write_wav_f32(dir.path(), "stereo.wav", 48_000, 2, &samples);

        let clip = SoundClip::load(&path, 48_000).unwrap();
        assert_eq!(clip.frame_count(), 500);
        assert_eq!(clip.frames[100].left, 100.0 / 500.0);
        assert_eq!(clip.frames[100].right, -100.0 / 500.0);
    }

    #[test]
    fn test_fold_truncates_extra_channels() {
        // 4-channel interleaved: only the first two survive
        let interleaved = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8];
        let mut out = Vec::new();
        fold_to_stereo(&interleaved, 4, &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], StereoSample::new(0.1, 0.2));
        assert_eq!(out[1], StereoSample::new(0.5, 0.6));
    }

    #[test]
    fn test_resample_identity_and_length() {
        let frames: Vec<StereoSample> = (0..100).map(|i| StereoSample::mono(i as f32)).collect();
        assert_eq!(resample_linear(&frames, 48_000, 48_000).len(), 100);

        let doubled = resample_linear(&frames, 24_000, 48_000);
        assert_eq!(doubled.len(), 200);
        // First output frame is the first input frame
        assert_eq!(doubled[0], StereoSample::mono(0.0));
        // Odd indices fall halfway between neighbors
        assert_eq!(doubled[1].left, 0.5);

        let halved = resample_linear(&frames, 48_000, 24_000);
        assert_eq!(halved.len(), 50);
        assert_eq!(halved[10], StereoSample::mono(20.0));
    }

    #[test]
    fn test_cache_hit_returns_shared_clip() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav_f32(dir.path(), "hit.wav", 48_000, 1, &[0.5; 64]);

        let mut cache = ClipCache::new(48_000);
        let first = cache.load(&path).unwrap();
        let second = cache.load(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_rate_change_purges_and_redecodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav_f32(dir.path(), "purge.wav", 48_000, 1, &[0.5; 480]);

        let mut cache = ClipCache::new(48_000);
        let old = cache.load(&path).unwrap();
        assert_eq!(old.frame_count(), 480);

        cache.set_target_rate(44_100);
        assert!(cache.is_empty());

        let fresh = cache.load(&path).unwrap();
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert_eq!(fresh.frame_count(), (480f64 * 44_100.0 / 48_000.0).round() as usize);

        // Same rate again is a no-op
        cache.set_target_rate(44_100);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_single_and_all() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_wav_f32(dir.path(), "a.wav", 48_000, 1, &[0.1; 32]);
        let b = write_wav_f32(dir.path(), "b.wav", 48_000, 1, &[0.2; 32]);

        let mut cache = ClipCache::new(48_000);
        cache.load(&a).unwrap();
        cache.load(&b).unwrap();

        cache.invalidate(Some(&a));
        assert!(!cache.contains(&a));
        assert!(cache.contains(&b));

        cache.invalidate(None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = SoundClip::load(Path::new("/nonexistent/nope.wav"), 48_000).unwrap_err();
        assert!(matches!(err, AudioError::Io { .. }));
    }

    #[test]
    fn test_garbage_file_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.wav");
        std::fs::write(&path, b"this is not audio data at all").unwrap();

        let err = SoundClip::load(&path, 48_000).unwrap_err();
        assert!(matches!(err, AudioError::UnsupportedFormat { .. }));
    }
}

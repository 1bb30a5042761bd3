//! Headless smoke test: play the given files through the engine
//!
//! Usage: clipcast-demo <file> [<file>...]
//! RUST_LOG=debug for decode and stream detail.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clipcast::{detect_virtual_cable, AudioEngine, AudioSettings};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let files: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if files.is_empty() {
        eprintln!("usage: clipcast-demo <file> [<file>...]");
        std::process::exit(2);
    }

    let cable = detect_virtual_cable();
    let settings = AudioSettings {
        virtual_cable_device: cable.playback_index,
        ..AudioSettings::default()
    };

    let mut engine = AudioEngine::new(settings);
    engine.start();
    log::info!("effective sample rate: {} Hz", engine.effective_rate());

    for mismatch in engine.check_rate_mismatches() {
        log::warn!(
            "{} device '{}' runs natively at {} Hz",
            mismatch.role,
            mismatch.device_name,
            mismatch.native_rate
        );
    }

    for file in &files {
        engine.play(file, 1.0);
        thread::sleep(Duration::from_millis(250));
    }

    while engine.playing_count() > 0 {
        for (path, secs) in engine.playing_remaining() {
            log::info!("{}: {:.2}s left", path.display(), secs);
        }
        thread::sleep(Duration::from_millis(500));
    }

    engine.stop();
}

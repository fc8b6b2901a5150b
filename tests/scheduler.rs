//! Playback scheduling integration tests
//!
//! Drives the scheduler against the in-memory mixer, advancing the output
//! clock by rendering.

use voice_studio::voice::{AudioOutput, Mixer, OUTPUT_SAMPLE_RATE, PlaybackScheduler};

mod common;

use common::pcm;

fn scheduler() -> PlaybackScheduler<Mixer> {
    PlaybackScheduler::new(Mixer::new(OUTPUT_SAMPLE_RATE))
}

fn advance(scheduler: &mut PlaybackScheduler<Mixer>, samples: usize) -> Vec<f32> {
    let mut out = vec![0.0; samples];
    scheduler.output_mut().render(&mut out);
    out
}

#[test]
fn test_consecutive_chunks_are_gapless() {
    let mut scheduler = scheduler();
    let sizes = [2400, 480, 1200, 24];

    let scheduled: Vec<_> = sizes
        .iter()
        .map(|&n| scheduler.on_audio_chunk(&pcm(n, 1000)).unwrap())
        .collect();

    assert!(scheduled[0].start.abs() < 1e-12);
    for pair in scheduled.windows(2) {
        assert!((pair[1].start - pair[0].end()).abs() < 1e-9);
    }
    assert_eq!(scheduler.active_count(), sizes.len());
}

#[test]
fn test_cursor_never_behind_clock() {
    let mut scheduler = scheduler();
    scheduler.on_audio_chunk(&pcm(240, 1000));
    advance(&mut scheduler, 100);

    let next = scheduler.on_audio_chunk(&pcm(240, 1000)).unwrap();
    assert!(next.start >= scheduler.output().current_time());
    assert!((next.start - 0.01).abs() < 1e-9);
}

#[test]
fn test_rendered_audio_has_no_gap() {
    let mut scheduler = scheduler();
    scheduler.on_audio_chunk(&pcm(100, 8192));
    scheduler.on_audio_chunk(&pcm(100, 8192));

    let out = advance(&mut scheduler, 200);
    assert!(out.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    assert!(scheduler.is_idle());
}

#[test]
fn test_underrun_reanchors_to_now() {
    let mut scheduler = scheduler();
    scheduler.on_audio_chunk(&pcm(240, 1000));

    // Clock runs well past the end of the only buffer
    advance(&mut scheduler, 2400);
    let now = scheduler.output().current_time();
    assert!(scheduler.next_start_time().unwrap() < now);

    let late = scheduler.on_audio_chunk(&pcm(240, 1000)).unwrap();
    assert!((late.start - now).abs() < 1e-12);
    assert!((scheduler.next_start_time().unwrap() - (now + 0.01)).abs() < 1e-9);
}

#[test]
fn test_interruption_clears_state() {
    let mut scheduler = scheduler();
    for _ in 0..5 {
        scheduler.on_audio_chunk(&pcm(2400, 1000));
    }
    advance(&mut scheduler, 1200);

    assert_eq!(scheduler.on_interrupted(), 5);
    assert!(scheduler.is_idle());
    assert!(scheduler.next_start_time().is_none());
    assert_eq!(scheduler.output().active_voices(), 0);

    // Nothing plays after the interruption
    let out = advance(&mut scheduler, 2400);
    assert!(out.iter().all(|&s| s == 0.0));

    // The next chunk starts from the current time
    let now = scheduler.output().current_time();
    let resumed = scheduler.on_audio_chunk(&pcm(240, 1000)).unwrap();
    assert!((resumed.start - now).abs() < 1e-12);
}

#[test]
fn test_interruption_is_idempotent() {
    let mut scheduler = scheduler();
    assert_eq!(scheduler.on_interrupted(), 0);

    scheduler.on_audio_chunk(&pcm(240, 1000));
    assert_eq!(scheduler.on_interrupted(), 1);
    assert_eq!(scheduler.on_interrupted(), 0);
}

#[test]
fn test_malformed_chunk_does_not_disturb_timeline() {
    let mut scheduler = scheduler();
    let first = scheduler.on_audio_chunk(&pcm(240, 1000)).unwrap();

    assert!(scheduler.on_audio_chunk(&[0, 1, 2]).is_none());

    let second = scheduler.on_audio_chunk(&pcm(240, 1000)).unwrap();
    assert!((second.start - first.end()).abs() < 1e-9);
}

#[test]
fn test_recent_samples_follow_output() {
    let mut scheduler = scheduler();
    scheduler.on_audio_chunk(&pcm(256, 16384));
    advance(&mut scheduler, 256);

    let recent = scheduler.recent_samples();
    assert_eq!(recent.len(), 128);
    assert!(recent.iter().all(|&s| (s - 0.5).abs() < 1e-6));
}

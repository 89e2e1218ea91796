//! # Voice Activity Detection
//!
//! Energy-based speech/silence classification with duration hysteresis.
//! A block of samples is classified by its RMS energy against a fixed
//! threshold, then debounced: the detector only enters the speaking state
//! after a minimum duration of continuous speech, and only leaves it after
//! a minimum duration of continuous silence. Short bursts in either
//! direction never flip the state.
//!
//! The detector is an optional upstream gate — the pipeline runs without it
//! by default, and the gateway inserts it in front of audio forwarding when
//! `audio.vad_enabled` is set.

use crate::audio::samples_for_duration;

/// Stateful per-stream voice activity detector.
pub struct VoiceActivityDetector {
    threshold: f64,
    min_speech_samples: usize,
    min_silence_samples: usize,
    speech_samples: usize,
    silent_samples: usize,
    is_speaking: bool,
}

impl VoiceActivityDetector {
    /// Create a detector.
    ///
    /// ## Parameters:
    /// - **threshold**: RMS energy above which a block counts as speech
    /// - **min_speech_ms**: continuous speech required to enter speaking
    /// - **min_silence_ms**: continuous silence required to exit speaking
    pub fn new(threshold: f64, min_speech_ms: u32, min_silence_ms: u32) -> Self {
        Self {
            threshold,
            min_speech_samples: samples_for_duration(min_speech_ms),
            min_silence_samples: samples_for_duration(min_silence_ms),
            speech_samples: 0,
            silent_samples: 0,
            is_speaking: false,
        }
    }

    /// Feed one block of samples and return the debounced speaking state.
    pub fn process(&mut self, samples: &[i16]) -> bool {
        let energy = rms_energy(samples);

        if energy > self.threshold {
            self.speech_samples += samples.len();
            self.silent_samples = 0;
        } else {
            self.silent_samples += samples.len();
        }

        if !self.is_speaking && self.speech_samples >= self.min_speech_samples {
            self.is_speaking = true;
        }

        if self.is_speaking && self.silent_samples >= self.min_silence_samples {
            self.is_speaking = false;
            self.speech_samples = 0;
        }

        self.is_speaking
    }

    /// Current debounced state without feeding new samples.
    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    /// Clear all accumulators and return to the silent state.
    pub fn reset(&mut self) {
        self.speech_samples = 0;
        self.silent_samples = 0;
        self.is_speaking = false;
    }
}

/// Root-mean-square energy of a sample block. Empty blocks have zero energy.
fn rms_energy(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

//! Audio level diagnostics: RMS, peak and silence classification.
//!
//! Used in two places: debug-level chunk diagnostics in the recorder, and
//! the silence detector that ends a wake-mode utterance.  All functions
//! operate on mono i16 PCM.

/// Summary statistics for a block of samples.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioStats {
    /// Root mean square amplitude.
    pub rms: f64,
    /// Largest absolute sample value.
    pub peak: i32,
    /// Samples whose absolute value is at or below the silence threshold.
    pub silent_samples: usize,
    /// Total samples analysed.
    pub total_samples: usize,
    /// `silent_samples / total_samples`, or 0 for empty input.
    pub silence_ratio: f64,
}

/// RMS amplitude of `samples`.  Empty input yields 0.
pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| {
        let v = s as f64;
        v * v
    }).sum();
    (sum / samples.len() as f64).sqrt()
}

/// Compute [`AudioStats`] over `samples`, counting samples at or below
/// `silence_threshold` (absolute value) as silent.
pub fn analyze(samples: &[i16], silence_threshold: i32) -> AudioStats {
    let mut stats = AudioStats {
        total_samples: samples.len(),
        ..AudioStats::default()
    };
    if samples.is_empty() {
        return stats;
    }

    let mut sum = 0.0f64;
    let mut peak = 0i32;
    let mut silent = 0usize;
    for &sample in samples {
        let v = sample as f64;
        sum += v * v;

        let abs = (sample as i32).abs();
        if abs > peak {
            peak = abs;
        }
        if abs <= silence_threshold {
            silent += 1;
        }
    }

    stats.rms = (sum / samples.len() as f64).sqrt();
    stats.peak = peak;
    stats.silent_samples = silent;
    stats.silence_ratio = silent as f64 / samples.len() as f64;
    stats
}

/// Classify a block of samples as silent.
///
/// A block is silent when its RMS falls below `rms_threshold` (typical
/// values 100..500), or when the fraction of samples quieter than half the
/// RMS threshold exceeds `silence_ratio_threshold` (0..1).  The second rule
/// catches blocks where a single click or pop lifts the RMS above the
/// threshold even though the block is otherwise quiet.
///
/// Empty input is silent.
pub fn is_silent(samples: &[i16], rms_threshold: f64, silence_ratio_threshold: f64) -> bool {
    if samples.is_empty() {
        return true;
    }

    if rms(samples) < rms_threshold {
        return true;
    }

    let silence_threshold = (rms_threshold * 0.5) as i32;
    let stats = analyze(samples, silence_threshold);
    stats.silence_ratio > silence_ratio_threshold
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Linear-interpolation sample rate conversion for mono i16 PCM.
//!
//! Capture devices often refuse to open at the 16 kHz rate the service
//! expects, so recording runs at whatever rate the hardware accepts
//! (typically 48 kHz) and is converted here before chunking.  Linear
//! interpolation is deliberate: it is cheap enough to run inside the capture
//! callback path, and speech intelligibility does not need a polyphase
//! filter.

/// Resample mono i16 PCM from `from_rate` to `to_rate` Hz.
///
/// Equal rates return a copy of the input unchanged.  The output length is
/// `floor(input.len() * to_rate / from_rate)`; each output sample is the
/// linear interpolation of the two source samples its fractional position
/// falls between, with positions at or past the final source sample clamped
/// to that sample.
///
/// An empty input or a zero rate yields an empty output.
///
/// # Example
///
/// ```rust
/// use voice_intercom::audio::resample;
///
/// // 48 kHz -> 16 kHz keeps every third sample.
/// let hi: Vec<i16> = (0..480).map(|i| i as i16).collect();
/// let lo = resample(&hi, 48_000, 16_000);
/// assert_eq!(lo.len(), 160);
/// assert_eq!(lo[1], 3);
/// ```
pub fn resample(input: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    if input.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (input.len() as f64 / ratio) as usize;
    let last = input.len() - 1;

    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let src_idx = src_pos as usize;
        if src_idx >= last {
            out.push(input[last]);
            continue;
        }
        let frac = src_pos - src_idx as f64;
        let a = input[src_idx] as f64;
        let b = input[src_idx + 1] as f64;
        out.push((a + (b - a) * frac) as i16);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

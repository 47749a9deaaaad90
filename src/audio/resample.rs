use crate::log_debug;
use anyhow::{anyhow, Result};
#[cfg(feature = "high-quality-audio")]
use rubato::{InterpolationParameters, InterpolationType, Resampler, SincFixedIn, WindowFunction};
use std::cmp::Ordering as CmpOrdering;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) const MIN_RATE: u32 = 2_000;
pub(crate) const MAX_RATE: u32 = 384_000;
const MAX_RATIO: f64 = 64.0;
const MAX_DOWNSAMPLING_TAPS: usize = 129;

static FALLBACK_WARNING_SHOWN: AtomicBool = AtomicBool::new(false);

/// Convert mono samples between rates. Used for capture (device rate to wire
/// rate) and for playback (decoded clip rate to output device rate).
pub(crate) fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if input.is_empty() || from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return input.to_vec();
    }

    #[cfg(feature = "high-quality-audio")]
    {
        match resample_with_rubato(input, from_rate, to_rate) {
            Ok(output) => return output,
            Err(err) => {
                if !FALLBACK_WARNING_SHOWN.swap(true, Ordering::AcqRel) {
                    log_debug(&format!(
                        "high-quality resampler failed ({err}); falling back to basic path"
                    ));
                }
            }
        }
    }

    #[cfg(not(feature = "high-quality-audio"))]
    if !FALLBACK_WARNING_SHOWN.swap(true, Ordering::AcqRel) {
        log_debug("high-quality-audio disabled; using linear resampler");
    }

    basic_resample(input, from_rate, to_rate)
}

fn check_rates(from_rate: u32, to_rate: u32) -> Result<f64> {
    for rate in [from_rate, to_rate] {
        if !(MIN_RATE..=MAX_RATE).contains(&rate) {
            return Err(anyhow!("unsupported sample rate {rate}Hz for resampling"));
        }
    }
    let ratio = to_rate as f64 / from_rate as f64;
    if !(1.0 / MAX_RATIO..=MAX_RATIO).contains(&ratio) {
        return Err(anyhow!("invalid resample ratio {ratio}"));
    }
    Ok(ratio)
}

#[cfg(feature = "high-quality-audio")]
fn resample_with_rubato(input: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    let ratio = check_rates(from_rate, to_rate)?;

    let chunk = 256usize;
    let params = InterpolationParameters {
        sinc_len: 64,
        f_cutoff: 0.90,
        interpolation: InterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut rs = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk, 1)
        .map_err(|e| anyhow!("failed to construct sinc resampler: {e:?}"))?;

    let expect = ((input.len() as f64) * ratio).round().max(1.0) as usize;
    let mut out = Vec::with_capacity(expect + 8);

    let mut seg = vec![0.0f32; chunk];
    for window in input.chunks(chunk) {
        let pad = window.last().copied().unwrap_or(0.0);
        seg.fill(pad);
        seg[..window.len()].copy_from_slice(window);
        let produced = rs
            .process(std::slice::from_ref(&seg), None)
            .map_err(|e| anyhow!("resampler process failed: {e:?}"))?;
        if let Some(channel) = produced.first() {
            out.extend_from_slice(channel);
        }
    }

    Ok(fit_length(out, expect))
}

pub(crate) fn basic_resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    let Ok(ratio) = check_rates(from_rate, to_rate) else {
        return input.to_vec();
    };
    let filtered = if from_rate > to_rate {
        let taps = downsampling_tap_count(from_rate, to_rate);
        low_pass_fir(input, from_rate, to_rate, taps)
    } else {
        input.to_vec()
    };
    resample_linear(&filtered, ratio as f32)
}

pub(crate) fn resample_linear(input: &[f32], ratio: f32) -> Vec<f32> {
    let input_len = input.len();
    let output_len = (input_len as f32 * ratio).round() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f32 / ratio;
        let idx = src_idx.floor() as usize;
        let frac = src_idx - idx as f32;

        if idx + 1 < input_len {
            output.push(input[idx] * (1.0 - frac) + input[idx + 1] * frac);
        } else {
            output.push(input.last().copied().unwrap_or(0.0));
        }
    }

    output
}

/// Longer filters for steeper decimation, odd so the kernel stays centered.
pub(crate) fn downsampling_tap_count(from_rate: u32, to_rate: u32) -> usize {
    let decimation = from_rate as f32 / to_rate.max(1) as f32;
    let mut taps = (decimation * 4.0).ceil().max(11.0) as usize;
    if taps % 2 == 0 {
        taps += 1;
    }
    taps.min(MAX_DOWNSAMPLING_TAPS)
}

fn low_pass_fir(input: &[f32], from_rate: u32, to_rate: u32, taps: usize) -> Vec<f32> {
    if input.is_empty() || taps <= 1 {
        return input.to_vec();
    }

    let cutoff = (to_rate as f32 * 0.5 / from_rate as f32).min(0.499);
    let coeffs = design_low_pass(cutoff, taps);
    let half = taps / 2;
    let mut output = Vec::with_capacity(input.len());

    for n in 0..input.len() {
        let mut acc = 0.0;
        for (k, coeff) in coeffs.iter().enumerate() {
            if let Some(sample) = (n + k).checked_sub(half).and_then(|idx| input.get(idx)) {
                acc += *sample * coeff;
            }
        }
        output.push(acc);
    }

    output
}

/// Normalized Hamming-windowed sinc kernel.
pub(crate) fn design_low_pass(normalized_cutoff: f32, taps: usize) -> Vec<f32> {
    let m = (taps.max(2) - 1) as f32;
    let mut coeffs: Vec<f32> = (0..taps)
        .map(|n| {
            let centered = n as f32 - m / 2.0;
            let x = 2.0 * PI * normalized_cutoff * centered;
            let sinc = if centered == 0.0 {
                2.0 * normalized_cutoff
            } else {
                (2.0 * normalized_cutoff * x.sin()) / x
            };
            let window = 0.54 - 0.46 * ((2.0 * PI * n as f32) / m).cos();
            sinc * window
        })
        .collect();

    let sum: f32 = coeffs.iter().sum();
    if sum != 0.0 {
        coeffs.iter_mut().for_each(|coeff| *coeff /= sum);
    }
    coeffs
}

pub(crate) fn fit_length(mut data: Vec<f32>, desired: usize) -> Vec<f32> {
    match data.len().cmp(&desired) {
        CmpOrdering::Greater => data.truncate(desired),
        CmpOrdering::Less => {
            let pad = data.last().copied().unwrap_or(0.0);
            data.resize(desired, pad);
        }
        CmpOrdering::Equal => {}
    }
    data
}

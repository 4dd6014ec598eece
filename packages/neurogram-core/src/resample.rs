use crate::error::{CoreError, Result};
use crate::types::{sample_count, Matrix};
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

/// Resample every channel from `from_rate` to `to_rate` in the frequency domain.
///
/// The spectrum is truncated or zero-padded to `round(N * to_rate / from_rate)`
/// bins. For even lengths the Nyquist bin is split (upsampling) or folded
/// (downsampling) so real input stays real.
pub fn resample(data: &[Vec<f64>], from_rate: f64, to_rate: f64) -> Result<Matrix> {
    if !(from_rate > 0.0) || !(to_rate > 0.0) {
        return Err(CoreError::InvalidParameter(format!(
            "sample rates must be positive, got {} -> {}",
            from_rate, to_rate
        )));
    }

    if from_rate == to_rate {
        return Ok(data.to_vec());
    }

    let n = sample_count(data);
    let m = (n as f64 * to_rate / from_rate).round() as usize;
    if n == 0 || m == 0 {
        return Ok(vec![Vec::new(); data.len()]);
    }

    log::debug!(
        "Resampling {} channels from {} Hz ({} samples) to {} Hz ({} samples)",
        data.len(),
        from_rate,
        n,
        to_rate,
        m
    );

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(m);

    Ok(data
        .par_iter()
        .map(|channel| {
            let mut spectrum: Vec<Complex<f64>> =
                channel.iter().map(|&x| Complex::new(x, 0.0)).collect();
            forward.process(&mut spectrum);

            let mut resized = resize_spectrum(&spectrum, m);
            inverse.process(&mut resized);

            // rustfft does not normalize; dividing by the input length also
            // applies the m / n amplitude correction
            resized.iter().map(|c| c.re / n as f64).collect()
        })
        .collect())
}

fn resize_spectrum(spectrum: &[Complex<f64>], m: usize) -> Vec<Complex<f64>> {
    let n = spectrum.len();
    let shared = n.min(m);
    let mut out = vec![Complex::new(0.0, 0.0); m];

    // Bins strictly below the shared Nyquist frequency, both signs
    let half = (shared - 1) / 2;
    out[0] = spectrum[0];
    for k in 1..=half {
        out[k] = spectrum[k];
        out[m - k] = spectrum[n - k];
    }

    if shared % 2 == 0 && shared > 0 {
        let h = shared / 2;
        if m > n {
            let split = spectrum[h] * 0.5;
            out[h] = split;
            out[m - h] = split;
        } else if m < n {
            out[h] = spectrum[h] + spectrum[n - h];
        } else {
            out[h] = spectrum[h];
        }
    }

    out
}

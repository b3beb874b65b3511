//! Vector kernels used by the layer implementations.
//!
//! Buffers follow the engine's layout: a batch of `batch` items, each holding
//! `filters` channels of `spatial` contiguous values, i.e. the index of value `s`
//! of channel `f` in item `b` is `(b * filters + f) * spatial + s`.

/// Sets every element of `x` to `value`.
pub fn fill(x: &mut [f32], value: f32) {
    for v in x.iter_mut() {
        *v = value;
    }
}

/// Copies `src` into the front of `dst`.
pub fn copy(src: &[f32], dst: &mut [f32]) {
    dst[..src.len()].copy_from_slice(src);
}

/// `x *= alpha`.
pub fn scal(x: &mut [f32], alpha: f32) {
    for v in x.iter_mut() {
        *v *= alpha;
    }
}

/// `y += alpha * x`.
pub fn axpy(alpha: f32, x: &[f32], y: &mut [f32]) {
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

/// `y *= x` elementwise.
pub fn mul(x: &[f32], y: &mut [f32]) {
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi *= xi;
    }
}

/// `y = x^power` elementwise.
pub fn pow(x: &[f32], power: f32, y: &mut [f32]) {
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi = xi.powf(power);
    }
}

/// `out = s * a + (1 - s) * b`, with a missing `b` treated as zero.
pub fn weighted_sum(a: &[f32], b: Option<&[f32]>, s: &[f32], out: &mut [f32]) {
    for i in 0..out.len() {
        let other = b.map_or(0.0, |b| b[i]);
        out[i] = s[i] * a[i] + (1.0 - s[i]) * other;
    }
}

/// Gradient of [`weighted_sum`] given the output gradient `dc`.
pub fn weighted_delta(
    a: &[f32],
    b: Option<&[f32]>,
    s: &[f32],
    da: Option<&mut [f32]>,
    db: Option<&mut [f32]>,
    ds: &mut [f32],
    dc: &[f32],
) {
    if let Some(da) = da {
        for i in 0..dc.len() {
            da[i] += dc[i] * s[i];
        }
    }
    if let Some(db) = db {
        for i in 0..dc.len() {
            db[i] += dc[i] * (1.0 - s[i]);
        }
    }
    for i in 0..dc.len() {
        let other = b.map_or(0.0, |b| b[i]);
        ds[i] += dc[i] * (a[i] - other);
    }
}

/// `c += a * b` elementwise.
pub fn mult_add_into(a: &[f32], b: &[f32], c: &mut [f32]) {
    for i in 0..c.len() {
        c[i] += a[i] * b[i];
    }
}

/// Per-channel mean over batch and spatial positions.
pub fn mean(x: &[f32], batch: usize, filters: usize, spatial: usize, mean: &mut [f32]) {
    let scale = 1.0 / (batch * spatial) as f32;
    for f in 0..filters {
        let mut sum = 0.0;
        for b in 0..batch {
            let start = (b * filters + f) * spatial;
            sum += x[start..start + spatial].iter().sum::<f32>();
        }
        mean[f] = sum * scale;
    }
}

/// Per-channel unbiased variance around `mean`.
///
/// With a single sample per channel the divisor falls back to 1 so the result
/// is zero instead of NaN.
pub fn variance(
    x: &[f32],
    mean: &[f32],
    batch: usize,
    filters: usize,
    spatial: usize,
    variance: &mut [f32],
) {
    let count = batch * spatial;
    let scale = 1.0 / count.saturating_sub(1).max(1) as f32;
    for f in 0..filters {
        let mut sum = 0.0;
        for b in 0..batch {
            let start = (b * filters + f) * spatial;
            for &v in &x[start..start + spatial] {
                sum += (v - mean[f]).powi(2);
            }
        }
        variance[f] = sum * scale;
    }
}

/// `x = (x - mean) / (sqrt(variance) + 1e-6)` per channel.
pub fn normalize(
    x: &mut [f32],
    mean: &[f32],
    variance: &[f32],
    batch: usize,
    filters: usize,
    spatial: usize,
) {
    for b in 0..batch {
        for f in 0..filters {
            let start = (b * filters + f) * spatial;
            let denom = variance[f].sqrt() + 0.000001;
            for v in &mut x[start..start + spatial] {
                *v = (*v - mean[f]) / denom;
            }
        }
    }
}

/// Multiplies every value of channel `i` by `scales[i]`.
pub fn scale_bias(output: &mut [f32], scales: &[f32], batch: usize, n: usize, size: usize) {
    for b in 0..batch {
        for i in 0..n {
            let start = (b * n + i) * size;
            for v in &mut output[start..start + size] {
                *v *= scales[i];
            }
        }
    }
}

/// Adds `biases[i]` to every value of channel `i`.
pub fn add_bias(output: &mut [f32], biases: &[f32], batch: usize, n: usize, size: usize) {
    for b in 0..batch {
        for i in 0..n {
            let start = (b * n + i) * size;
            for v in &mut output[start..start + size] {
                *v += biases[i];
            }
        }
    }
}

/// Accumulates the summed delta of each channel into `bias_updates`.
pub fn backward_bias(bias_updates: &mut [f32], delta: &[f32], batch: usize, n: usize, size: usize) {
    for b in 0..batch {
        for i in 0..n {
            let start = (b * n + i) * size;
            bias_updates[i] += delta[start..start + size].iter().sum::<f32>();
        }
    }
}

/// Accumulates `Σ delta * x_norm` per channel into `scale_updates`.
pub fn backward_scale(
    x_norm: &[f32],
    delta: &[f32],
    batch: usize,
    n: usize,
    size: usize,
    scale_updates: &mut [f32],
) {
    for f in 0..n {
        let mut sum = 0.0;
        for b in 0..batch {
            let start = (b * n + f) * size;
            for i in start..start + size {
                sum += delta[i] * x_norm[i];
            }
        }
        scale_updates[f] += sum;
    }
}

/// Gradient of the loss with respect to the per-channel mean.
pub fn mean_delta(
    delta: &[f32],
    variance: &[f32],
    batch: usize,
    filters: usize,
    spatial: usize,
    mean_delta: &mut [f32],
) {
    for f in 0..filters {
        let mut sum = 0.0;
        for b in 0..batch {
            let start = (b * filters + f) * spatial;
            sum += delta[start..start + spatial].iter().sum::<f32>();
        }
        mean_delta[f] = sum * (-1.0 / (variance[f] + 0.00001).sqrt());
    }
}

/// Gradient of the loss with respect to the per-channel variance.
#[allow(clippy::too_many_arguments)]
pub fn variance_delta(
    x: &[f32],
    delta: &[f32],
    mean: &[f32],
    variance: &[f32],
    batch: usize,
    filters: usize,
    spatial: usize,
    variance_delta: &mut [f32],
) {
    for f in 0..filters {
        let mut sum = 0.0;
        for b in 0..batch {
            let start = (b * filters + f) * spatial;
            for i in start..start + spatial {
                sum += delta[i] * (x[i] - mean[f]);
            }
        }
        variance_delta[f] = sum * -0.5 * (variance[f] + 0.00001).powf(-1.5);
    }
}

/// Rewrites `delta` (gradient at the normalized value) into the gradient at the
/// raw input of the normalization.
#[allow(clippy::too_many_arguments)]
pub fn normalize_delta(
    x: &[f32],
    mean: &[f32],
    variance: &[f32],
    mean_delta: &[f32],
    variance_delta: &[f32],
    batch: usize,
    filters: usize,
    spatial: usize,
    delta: &mut [f32],
) {
    let count = (batch * spatial) as f32;
    for b in 0..batch {
        for f in 0..filters {
            let start = (b * filters + f) * spatial;
            let inv_std = 1.0 / (variance[f] + 0.00001).sqrt();
            for i in start..start + spatial {
                delta[i] = delta[i] * inv_std
                    + variance_delta[f] * 2.0 * (x[i] - mean[f]) / count
                    + mean_delta[f] / count;
            }
        }
    }
}

/// Temperature-scaled softmax over `n` values read with `stride`.
pub fn softmax(input: &[f32], n: usize, temperature: f32, stride: usize, output: &mut [f32]) {
    let mut largest = f32::NEG_INFINITY;
    for i in 0..n {
        largest = largest.max(input[i * stride]);
    }
    let mut sum = 0.0;
    for i in 0..n {
        let e = ((input[i * stride] - largest) / temperature).exp();
        sum += e;
        output[i * stride] = e;
    }
    for i in 0..n {
        output[i * stride] /= sum;
    }
}

/// Applies [`softmax`] to every group of every batch item.
#[allow(clippy::too_many_arguments)]
pub fn softmax_batch(
    input: &[f32],
    n: usize,
    batch: usize,
    batch_offset: usize,
    groups: usize,
    group_offset: usize,
    stride: usize,
    temperature: f32,
    output: &mut [f32],
) {
    for b in 0..batch {
        for g in 0..groups {
            let offset = b * batch_offset + g * group_offset;
            softmax(
                &input[offset..],
                n,
                temperature,
                stride,
                &mut output[offset..],
            );
        }
    }
}

/// Adds `add` (shape `w1 × h1 × c1`) into `out` (shape `w2 × h2 × c2`) with
/// nearest-stride sampling when the spatial sizes differ.
///
/// Only the common channels are combined.
#[allow(clippy::too_many_arguments)]
pub fn shortcut(
    batch: usize,
    w1: usize,
    h1: usize,
    c1: usize,
    add: &[f32],
    w2: usize,
    h2: usize,
    c2: usize,
    out: &mut [f32],
) {
    let stride = (w1 / w2).max(1);
    let sample = (w2 / w1).max(1);
    let min_w = w1.min(w2);
    let min_h = h1.min(h2);
    let min_c = c1.min(c2);

    for b in 0..batch {
        for k in 0..min_c {
            for j in 0..min_h {
                for i in 0..min_w {
                    let out_index = i * sample + w2 * (j * sample + h2 * (k + c2 * b));
                    let add_index = i * stride + w1 * (j * stride + h1 * (k + c1 * b));
                    out[out_index] += add[add_index];
                }
            }
        }
    }
}

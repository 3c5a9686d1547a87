use std::f32::consts::PI;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    /// Inverse transform, normalized by `1/N`.
    Inverse,
}

/// Transform `real`/`imag` in place. Both slices must have the same
/// power-of-two length.
pub fn transform(real: &mut [f32], imag: &mut [f32], direction: Direction) {
    let n = real.len();
    debug_assert_eq!(n, imag.len());
    debug_assert!(n.is_power_of_two());
    if n < 2 {
        return;
    }

    bit_reverse_permute(real, imag);

    let sign = match direction {
        Direction::Forward => -1.0,
        Direction::Inverse => 1.0,
    };

    let mut l = 1;
    while l < n {
        let step = l * 2;
        for m in 0..l {
            let angle = sign * PI * m as f32 / l as f32;
            let (w_im, w_re) = angle.sin_cos();

            let mut i = m;
            while i < n {
                let j = i + l;
                let t_re = w_re * real[j] - w_im * imag[j];
                let t_im = w_re * imag[j] + w_im * real[j];
                real[j] = real[i] - t_re;
                imag[j] = imag[i] - t_im;
                real[i] += t_re;
                imag[i] += t_im;
                i += step;
            }
        }
        l = step;
    }

    if direction == Direction::Inverse {
        let scale = 1.0 / n as f32;
        for (re, im) in real.iter_mut().zip(imag.iter_mut()) {
            *re *= scale;
            *im *= scale;
        }
    }
}

/// Reorder both buffers into bit-reversed index order using an incremental
/// reversed counter.
fn bit_reverse_permute(real: &mut [f32], imag: &mut [f32]) {
    let n = real.len();
    let mut j = 0;
    for i in 0..n - 1 {
        if i < j {
            real.swap(i, j);
            imag.swap(i, j);
        }
        let mut k = n >> 1;
        while k <= j {
            j -= k;
            k >>= 1;
        }
        j += k;
    }
}

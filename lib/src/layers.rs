//! Convolutional building blocks for the encoder and decoder networks.
//!
//! All feature maps are CHW `Array3<f32>` tensors. Convolutions are 3x3
//! with reflection padding of 1, so spatial dimensions are preserved.
//! The forward and gradient passes fan out across channel chunks with
//! scoped threads; every channel is computed independently, so results
//! are identical regardless of the thread count.

use ndarray::{Array1, Array3, Array4, Axis};
use rand::Rng;
use rand_pcg::Pcg32;

pub(crate) const KERNEL: usize = 3;
pub(crate) const PAD: usize = 1;

#[inline]
fn reflect(i: isize, n: usize) -> usize {
    let n = n as isize;
    let i = if i < 0 {
        -i
    } else if i >= n {
        2 * n - 2 - i
    } else {
        i
    };

    i.max(0).min(n - 1) as usize
}

#[inline]
fn chunk_size(items: usize, threads: usize) -> usize {
    ((items + threads - 1) / threads.max(1)).max(1)
}

/// Pads a tensor by 1 pixel on each spatial border, mirroring without
/// repeating the edge row/column.
pub(crate) fn pad_reflect(input: &Array3<f32>) -> Array3<f32> {
    let (channels, h, w) = input.dim();
    let mut out = Array3::zeros((channels, h + 2 * PAD, w + 2 * PAD));

    for c in 0..channels {
        for y in 0..h + 2 * PAD {
            let sy = reflect(y as isize - PAD as isize, h);
            for x in 0..w + 2 * PAD {
                let sx = reflect(x as isize - PAD as isize, w);
                out[[c, y, x]] = input[[c, sy, sx]];
            }
        }
    }

    out
}

/// Folds a gradient w.r.t. a padded tensor back onto the unpadded one,
/// accumulating the mirrored border contributions.
pub(crate) fn pad_reflect_grad(grad_padded: &Array3<f32>) -> Array3<f32> {
    let (channels, hp, wp) = grad_padded.dim();
    let (h, w) = (hp - 2 * PAD, wp - 2 * PAD);
    let mut out = Array3::zeros((channels, h, w));

    for c in 0..channels {
        for y in 0..hp {
            let sy = reflect(y as isize - PAD as isize, h);
            for x in 0..wp {
                let sx = reflect(x as isize - PAD as isize, w);
                out[[c, sy, sx]] += grad_padded[[c, y, x]];
            }
        }
    }

    out
}

/// A 3x3 convolution. Inputs are expected pre-padded (`pad_reflect`),
/// outputs have the same spatial dimensions as the unpadded input.
pub(crate) struct Conv2d {
    pub(crate) weights: Array4<f32>,
    pub(crate) bias: Array1<f32>,
}

impl Conv2d {
    /// He-uniform initialization from a caller-seeded generator.
    pub(crate) fn seeded(in_channels: usize, out_channels: usize, rng: &mut Pcg32) -> Self {
        let bound = (6.0 / (in_channels * KERNEL * KERNEL) as f32).sqrt();
        let mut weights = Array4::zeros((out_channels, in_channels, KERNEL, KERNEL));
        for w in weights.iter_mut() {
            *w = (rng.gen::<f32>() * 2.0 - 1.0) * bound;
        }

        Self {
            weights,
            bias: Array1::zeros(out_channels),
        }
    }

    pub(crate) fn from_parts(weights: Array4<f32>, bias: Array1<f32>) -> Self {
        Self { weights, bias }
    }

    pub(crate) fn in_channels(&self) -> usize {
        self.weights.dim().1
    }

    pub(crate) fn out_channels(&self) -> usize {
        self.weights.dim().0
    }

    pub(crate) fn forward(&self, padded: &Array3<f32>, threads: usize) -> Array3<f32> {
        let (cin, hp, wp) = padded.dim();
        debug_assert_eq!(cin, self.in_channels());
        let (h, w) = (hp - 2 * PAD, wp - 2 * PAD);
        let cout = self.out_channels();

        let mut out = Array3::zeros((cout, h, w));
        let chunk = chunk_size(cout, threads);

        crossbeam_utils::thread::scope(|scope| {
            for ((w_chunk, b_chunk), o_chunk) in self
                .weights
                .axis_chunks_iter(Axis(0), chunk)
                .zip(self.bias.axis_chunks_iter(Axis(0), chunk))
                .zip(out.axis_chunks_iter_mut(Axis(0), chunk))
            {
                scope.spawn(move |_| {
                    let mut o_chunk = o_chunk;
                    for ((mut plane, kernel), bias) in o_chunk
                        .axis_iter_mut(Axis(0))
                        .zip(w_chunk.axis_iter(Axis(0)))
                        .zip(b_chunk.iter())
                    {
                        for y in 0..h {
                            for x in 0..w {
                                let mut acc = *bias;
                                for c in 0..cin {
                                    for ky in 0..KERNEL {
                                        for kx in 0..KERNEL {
                                            acc += kernel[[c, ky, kx]]
                                                * padded[[c, y + ky, x + kx]];
                                        }
                                    }
                                }
                                plane[[y, x]] = acc;
                            }
                        }
                    }
                });
            }
        })
        .unwrap();

        out
    }

    /// Gradient w.r.t. the unpadded input.
    pub(crate) fn grad_input(&self, grad_out: &Array3<f32>, threads: usize) -> Array3<f32> {
        let (cout, h, w) = grad_out.dim();
        debug_assert_eq!(cout, self.out_channels());
        let cin = self.in_channels();

        let mut grad_padded = Array3::zeros((cin, h + 2 * PAD, w + 2 * PAD));
        let chunk = chunk_size(cin, threads);
        let weights = &self.weights;

        crossbeam_utils::thread::scope(|scope| {
            for (chunk_index, g_chunk) in
                grad_padded.axis_chunks_iter_mut(Axis(0), chunk).enumerate()
            {
                scope.spawn(move |_| {
                    let mut g_chunk = g_chunk;
                    let c_base = chunk_index * chunk;
                    for (c_local, mut plane) in g_chunk.axis_iter_mut(Axis(0)).enumerate() {
                        let c = c_base + c_local;
                        for o in 0..cout {
                            for y in 0..h {
                                for x in 0..w {
                                    let g = grad_out[[o, y, x]];
                                    for ky in 0..KERNEL {
                                        for kx in 0..KERNEL {
                                            plane[[y + ky, x + kx]] +=
                                                weights[[o, c, ky, kx]] * g;
                                        }
                                    }
                                }
                            }
                        }
                    }
                });
            }
        })
        .unwrap();

        pad_reflect_grad(&grad_padded)
    }

    /// Gradients w.r.t. the weights and bias, given the padded input the
    /// forward pass saw.
    pub(crate) fn grad_params(
        &self,
        padded: &Array3<f32>,
        grad_out: &Array3<f32>,
        threads: usize,
    ) -> (Array4<f32>, Array1<f32>) {
        let (cout, h, w) = grad_out.dim();
        let cin = self.in_channels();

        let mut grad_w = Array4::zeros((cout, cin, KERNEL, KERNEL));
        let mut grad_b = Array1::zeros(cout);
        let chunk = chunk_size(cout, threads);

        crossbeam_utils::thread::scope(|scope| {
            for ((gw_chunk, gb_chunk), go_chunk) in grad_w
                .axis_chunks_iter_mut(Axis(0), chunk)
                .zip(grad_b.axis_chunks_iter_mut(Axis(0), chunk))
                .zip(grad_out.axis_chunks_iter(Axis(0), chunk))
            {
                scope.spawn(move |_| {
                    let mut gw_chunk = gw_chunk;
                    let mut gb_chunk = gb_chunk;
                    for ((mut gw, gb), go) in gw_chunk
                        .axis_iter_mut(Axis(0))
                        .zip(gb_chunk.iter_mut())
                        .zip(go_chunk.axis_iter(Axis(0)))
                    {
                        for y in 0..h {
                            for x in 0..w {
                                let g = go[[y, x]];
                                *gb += g;
                                for c in 0..cin {
                                    for ky in 0..KERNEL {
                                        for kx in 0..KERNEL {
                                            gw[[c, ky, kx]] += g * padded[[c, y + ky, x + kx]];
                                        }
                                    }
                                }
                            }
                        }
                    }
                });
            }
        })
        .unwrap();

        (grad_w, grad_b)
    }
}

pub(crate) fn relu_inplace(x: &mut Array3<f32>) {
    x.mapv_inplace(|v| v.max(0.0));
}

/// Masks a gradient by the activations the forward ReLU produced.
pub(crate) fn relu_grad_inplace(grad: &mut Array3<f32>, relu_out: &Array3<f32>) {
    ndarray::Zip::from(grad).and(relu_out).for_each(|g, &o| {
        if o <= 0.0 {
            *g = 0.0;
        }
    });
}

/// 2x2 max pooling with stride 2, flooring odd dimensions. Returns the
/// pooled tensor and the in-window argmax (0..=3, `dy * 2 + dx`) needed
/// to route gradients back.
pub(crate) fn max_pool(input: &Array3<f32>) -> (Array3<f32>, Array3<u8>) {
    let (channels, h, w) = input.dim();
    let (ho, wo) = (h / 2, w / 2);
    let mut out = Array3::zeros((channels, ho, wo));
    let mut argmax = Array3::<u8>::zeros((channels, ho, wo));

    for c in 0..channels {
        for y in 0..ho {
            for x in 0..wo {
                let mut best = f32::NEG_INFINITY;
                let mut best_at = 0u8;
                for dy in 0..2 {
                    for dx in 0..2 {
                        let v = input[[c, y * 2 + dy, x * 2 + dx]];
                        if v > best {
                            best = v;
                            best_at = (dy * 2 + dx) as u8;
                        }
                    }
                }
                out[[c, y, x]] = best;
                argmax[[c, y, x]] = best_at;
            }
        }
    }

    (out, argmax)
}

pub(crate) fn max_pool_grad(
    grad_out: &Array3<f32>,
    argmax: &Array3<u8>,
    input_dim: (usize, usize, usize),
) -> Array3<f32> {
    let (channels, ho, wo) = grad_out.dim();
    let mut grad_in = Array3::zeros(input_dim);

    for c in 0..channels {
        for y in 0..ho {
            for x in 0..wo {
                let at = argmax[[c, y, x]] as usize;
                grad_in[[c, y * 2 + at / 2, x * 2 + at % 2]] += grad_out[[c, y, x]];
            }
        }
    }

    grad_in
}

/// Nearest-neighbor 2x upsampling.
pub(crate) fn upsample_nearest(input: &Array3<f32>) -> Array3<f32> {
    let (channels, h, w) = input.dim();
    let mut out = Array3::zeros((channels, h * 2, w * 2));

    for c in 0..channels {
        for y in 0..h * 2 {
            for x in 0..w * 2 {
                out[[c, y, x]] = input[[c, y / 2, x / 2]];
            }
        }
    }

    out
}

pub(crate) fn upsample_nearest_grad(grad_out: &Array3<f32>) -> Array3<f32> {
    let (channels, h, w) = grad_out.dim();
    let mut grad_in = Array3::zeros((channels, h / 2, w / 2));

    for c in 0..channels {
        for y in 0..h {
            for x in 0..w {
                grad_in[[c, y / 2, x / 2]] += grad_out[[c, y, x]];
            }
        }
    }

    grad_in
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> Pcg32 {
        Pcg32::seed_from_u64(7)
    }

    fn random_tensor(dim: (usize, usize, usize), rng: &mut Pcg32) -> Array3<f32> {
        let mut t = Array3::zeros(dim);
        for v in t.iter_mut() {
            *v = rng.gen::<f32>() * 2.0 - 1.0;
        }
        t
    }

    #[test]
    fn reflection_pad_mirrors_without_edge_repeat() {
        let mut input = Array3::zeros((1, 3, 3));
        for y in 0..3 {
            for x in 0..3 {
                input[[0, y, x]] = (y * 3 + x) as f32;
            }
        }

        let padded = pad_reflect(&input);
        assert_eq!(padded.dim(), (1, 5, 5));
        // corner reflects both axes: input[1][1]
        assert_eq!(padded[[0, 0, 0]], input[[0, 1, 1]]);
        // top border reflects the second row
        assert_eq!(padded[[0, 0, 2]], input[[0, 1, 1]]);
        assert_eq!(padded[[0, 0, 1]], input[[0, 1, 0]]);
        // bottom-right corner
        assert_eq!(padded[[0, 4, 4]], input[[0, 1, 1]]);
        // interior is untouched
        assert_eq!(padded[[0, 2, 2]], input[[0, 1, 1]]);
    }

    #[test]
    fn conv_identity_kernel_passes_through() {
        let mut conv = Conv2d::seeded(1, 1, &mut rng());
        conv.weights.fill(0.0);
        conv.weights[[0, 0, 1, 1]] = 1.0;
        conv.bias.fill(0.0);

        let input = random_tensor((1, 4, 4), &mut rng());
        let out = conv.forward(&pad_reflect(&input), 1);
        assert_eq!(out.dim(), input.dim());
        for (a, b) in out.iter().zip(input.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn conv_forward_matches_across_thread_counts() {
        let conv = Conv2d::seeded(3, 5, &mut rng());
        let padded = pad_reflect(&random_tensor((3, 6, 6), &mut rng()));

        let serial = conv.forward(&padded, 1);
        let parallel = conv.forward(&padded, 4);
        assert_eq!(serial, parallel);
    }

    /// Central-difference check of the analytic input gradient, with the
    /// scalar objective L = 0.5 * sum(out^2).
    #[test]
    fn conv_input_gradient_matches_finite_difference() {
        let conv = Conv2d::seeded(2, 3, &mut rng());
        let mut input = random_tensor((2, 4, 4), &mut rng());

        let out = conv.forward(&pad_reflect(&input), 1);
        let analytic = conv.grad_input(&out, 1);

        let eps = 1e-3;
        for idx in [[0usize, 0, 0], [1, 2, 3], [0, 3, 1], [1, 1, 2]] {
            let orig = input[idx];

            input[idx] = orig + eps;
            let plus: f32 = conv
                .forward(&pad_reflect(&input), 1)
                .iter()
                .map(|v| 0.5 * v * v)
                .sum();

            input[idx] = orig - eps;
            let minus: f32 = conv
                .forward(&pad_reflect(&input), 1)
                .iter()
                .map(|v| 0.5 * v * v)
                .sum();

            input[idx] = orig;
            let numeric = (plus - minus) / (2.0 * eps);
            assert!(
                (analytic[idx] - numeric).abs() < 1e-2 * numeric.abs().max(1.0),
                "at {:?}: analytic {} vs numeric {}",
                idx,
                analytic[idx],
                numeric
            );
        }
    }

    #[test]
    fn conv_weight_gradient_matches_finite_difference() {
        let mut conv = Conv2d::seeded(2, 2, &mut rng());
        let input = random_tensor((2, 4, 4), &mut rng());
        let padded = pad_reflect(&input);

        let out = conv.forward(&padded, 1);
        let (grad_w, grad_b) = conv.grad_params(&padded, &out, 1);

        let eps = 1e-3;
        for idx in [[0usize, 0, 0, 0], [1, 1, 2, 2], [0, 1, 1, 0]] {
            let orig = conv.weights[idx];

            conv.weights[idx] = orig + eps;
            let plus: f32 = conv.forward(&padded, 1).iter().map(|v| 0.5 * v * v).sum();
            conv.weights[idx] = orig - eps;
            let minus: f32 = conv.forward(&padded, 1).iter().map(|v| 0.5 * v * v).sum();
            conv.weights[idx] = orig;

            let numeric = (plus - minus) / (2.0 * eps);
            assert!(
                (grad_w[idx] - numeric).abs() < 1e-2 * numeric.abs().max(1.0),
                "weight {:?}: analytic {} vs numeric {}",
                idx,
                grad_w[idx],
                numeric
            );
        }

        let orig = conv.bias[0];
        conv.bias[0] = orig + eps;
        let plus: f32 = conv.forward(&padded, 1).iter().map(|v| 0.5 * v * v).sum();
        conv.bias[0] = orig - eps;
        let minus: f32 = conv.forward(&padded, 1).iter().map(|v| 0.5 * v * v).sum();
        conv.bias[0] = orig;

        let numeric = (plus - minus) / (2.0 * eps);
        assert!((grad_b[0] - numeric).abs() < 1e-2 * numeric.abs().max(1.0));
    }

    #[test]
    fn max_pool_routes_gradient_to_argmax() {
        let mut input = Array3::zeros((1, 2, 2));
        input[[0, 0, 0]] = 1.0;
        input[[0, 0, 1]] = 3.0;
        input[[0, 1, 0]] = 2.0;
        input[[0, 1, 1]] = 0.0;

        let (out, argmax) = max_pool(&input);
        assert_eq!(out[[0, 0, 0]], 3.0);
        assert_eq!(argmax[[0, 0, 0]], 1);

        let mut grad_out = Array3::zeros((1, 1, 1));
        grad_out[[0, 0, 0]] = 5.0;
        let grad_in = max_pool_grad(&grad_out, &argmax, input.dim());
        assert_eq!(grad_in[[0, 0, 1]], 5.0);
        assert_eq!(grad_in.sum(), 5.0);
    }

    #[test]
    fn upsample_gradient_sums_each_block() {
        let input = random_tensor((2, 3, 3), &mut rng());
        let up = upsample_nearest(&input);
        assert_eq!(up.dim(), (2, 6, 6));
        assert_eq!(up[[1, 5, 4]], input[[1, 2, 2]]);

        let grad = upsample_nearest_grad(&Array3::ones((2, 6, 6)));
        assert_eq!(grad.dim(), (2, 3, 3));
        for v in grad.iter() {
            assert_eq!(*v, 4.0);
        }
    }
}

//! Training losses and their gradients at the encoder taps.
//!
//! The content term compares the relu4_1 features of the decoded image
//! against the AdaIN target itself, so the decoder is pushed to invert
//! the encoder around the stylized statistics. The style term matches
//! per-channel mean/std against the style image at every tap.

use crate::{
    adain::Moments,
    encoder::TAP_COUNT,
};
use ndarray::{Array3, Axis};

/// Mean squared error between the decoded relu4_1 features and the
/// AdaIN target.
pub(crate) fn content_loss(decoded: &Array3<f32>, target: &Array3<f32>) -> f32 {
    let n = decoded.len() as f32;
    decoded
        .iter()
        .zip(target.iter())
        .map(|(a, t)| (a - t) * (a - t))
        .sum::<f32>()
        / n
}

fn content_grad(decoded: &Array3<f32>, target: &Array3<f32>) -> Array3<f32> {
    let n = decoded.len() as f32;
    let mut grad = decoded - target;
    grad.mapv_inplace(|v| 2.0 * v / n);
    grad
}

/// Style loss at a single tap and its gradient w.r.t. the tap
/// activations. The loss is the channel-averaged squared distance of
/// means plus that of standard deviations; the std term differentiates
/// through both the variance and the mean.
pub(crate) fn style_term(tap: &Array3<f32>, style: &Moments) -> (f32, Array3<f32>) {
    let stats = Moments::measure(tap);
    let (channels, h, w) = tap.dim();
    let n = (h * w) as f32;
    let cn = channels as f32;

    let mut loss = 0.0;
    let mut grad = Array3::zeros(tap.dim());
    for (c, (plane, mut grad_plane)) in tap
        .axis_iter(Axis(0))
        .zip(grad.axis_iter_mut(Axis(0)))
        .enumerate()
    {
        let d_mean = stats.mean[c] - style.mean[c];
        let d_std = stats.std[c] - style.std[c];
        loss += (d_mean * d_mean + d_std * d_std) / cn;

        let mean_coeff = 2.0 * d_mean / (n * cn);
        let std_coeff = 2.0 * d_std / (n * cn * stats.std[c]);
        for (v, g) in plane.iter().zip(grad_plane.iter_mut()) {
            *g = mean_coeff + std_coeff * (v - stats.mean[c]);
        }
    }

    (loss, grad)
}

pub(crate) struct LossTerms {
    pub(crate) content: f32,
    pub(crate) style: f32,
    pub(crate) tap_grads: [Array3<f32>; TAP_COUNT],
}

/// Evaluates `L = Lc + style_weight * Ls` over the decoded image's tap
/// activations and produces the gradient to inject at each tap.
pub(crate) fn evaluate(
    decoded_taps: &[Array3<f32>],
    target: &Array3<f32>,
    style_moments: &[Moments],
    style_weight: f32,
) -> LossTerms {
    debug_assert_eq!(decoded_taps.len(), TAP_COUNT);
    debug_assert_eq!(style_moments.len(), TAP_COUNT);

    let content = content_loss(&decoded_taps[TAP_COUNT - 1], target);

    let mut style = 0.0;
    let mut weighted = |i: usize| {
        let (term, mut grad) = style_term(&decoded_taps[i], &style_moments[i]);
        style += term;
        grad.mapv_inplace(|v| v * style_weight);
        grad
    };
    let mut tap_grads = [weighted(0), weighted(1), weighted(2), weighted(3)];

    tap_grads[TAP_COUNT - 1] += &content_grad(&decoded_taps[TAP_COUNT - 1], target);

    LossTerms {
        content,
        style,
        tap_grads,
    }
}

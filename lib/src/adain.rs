//! Adaptive instance normalization: aligning the per-channel mean and
//! standard deviation of content features to those of style features.
//! The transform has no learned parameters.

use ndarray::{Array1, Array3, Axis};

/// Stabilizes the standard deviation of near-constant channels.
pub(crate) const EPSILON: f32 = 1e-5;

/// Per-channel first and second moments of a feature map.
#[derive(Clone, Debug)]
pub struct Moments {
    pub(crate) mean: Array1<f32>,
    pub(crate) std: Array1<f32>,
}

impl Moments {
    /// Measures the channel-wise mean and epsilon-stabilized standard
    /// deviation of a CHW feature map.
    pub fn measure(features: &Array3<f32>) -> Self {
        let (channels, h, w) = features.dim();
        let n = (h * w) as f32;

        let mut mean = Array1::zeros(channels);
        let mut std = Array1::zeros(channels);

        for (c, plane) in features.axis_iter(Axis(0)).enumerate() {
            let mu = plane.sum() / n;
            let var = plane.fold(0.0, |acc, &v| acc + (v - mu) * (v - mu)) / n;
            mean[c] = mu;
            std[c] = (var + EPSILON).sqrt();
        }

        Self { mean, std }
    }

    pub fn channels(&self) -> usize {
        self.mean.len()
    }

    /// Weighted average of several style moments. Weights are normalized
    /// to sum to 1; entries with a zero weight contribute nothing.
    pub(crate) fn blend(moments: &[(&Moments, f32)]) -> Self {
        let channels = moments[0].0.channels();
        let total: f32 = moments.iter().map(|(_, w)| w).sum();

        let mut mean = Array1::zeros(channels);
        let mut std = Array1::zeros(channels);
        for (m, weight) in moments {
            mean.scaled_add(weight / total, &m.mean);
            std.scaled_add(weight / total, &m.std);
        }

        Self { mean, std }
    }
}

/// Rescales every channel of `content` so its mean/std match `style`.
pub(crate) fn adain(content: &Array3<f32>, style: &Moments) -> Array3<f32> {
    let stats = Moments::measure(content);
    debug_assert_eq!(stats.channels(), style.channels());

    let mut out = content.clone();
    for (c, mut plane) in out.axis_iter_mut(Axis(0)).enumerate() {
        let scale = style.std[c] / stats.std[c];
        let shift = style.mean[c] - stats.mean[c] * scale;
        plane.mapv_inplace(|v| v * scale + shift);
    }

    out
}

/// Trades off between the stylized target and the raw content features:
/// `strength` of 1 is a full AdaIN transfer, 0 returns the content.
pub(crate) fn interpolate(target: &Array3<f32>, content: &Array3<f32>, strength: f32) -> Array3<f32> {
    let mut out = target * strength;
    out.scaled_add(1.0 - strength, content);
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn ramp(channels: usize, h: usize, w: usize) -> Array3<f32> {
        let mut t = Array3::zeros((channels, h, w));
        for (i, v) in t.iter_mut().enumerate() {
            *v = i as f32 * 0.13 - 1.0;
        }
        t
    }

    #[test]
    fn moments_of_constant_channel_are_stable() {
        let features = Array3::from_elem((2, 4, 4), 3.5);
        let moments = Moments::measure(&features);

        assert!((moments.mean[0] - 3.5).abs() < 1e-6);
        assert!((moments.std[0] - EPSILON.sqrt()).abs() < 1e-6);
        assert!(moments.std.iter().all(|s| s.is_finite() && *s > 0.0));
    }

    #[test]
    fn adain_imposes_style_moments() {
        let content = ramp(3, 5, 5);
        let style = ramp(3, 5, 5).mapv(|v| v * 2.0 + 0.7);

        let target = Moments::measure(&style);
        let out = adain(&content, &target);
        let got = Moments::measure(&out);

        for c in 0..3 {
            assert!((got.mean[c] - target.mean[c]).abs() < 1e-4);
            assert!((got.std[c] - target.std[c]).abs() < 1e-3);
        }
    }

    #[test]
    fn adain_keeps_content_structure() {
        let content = ramp(1, 4, 4);
        let style = ramp(1, 4, 4).mapv(|v| v * 3.0);
        let out = adain(&content, &Moments::measure(&style));

        // a pure affine remap preserves the ordering of activations
        let flat: Vec<f32> = out.iter().copied().collect();
        assert!(flat.windows(2).all(|p| p[0] <= p[1]));
    }

    #[test]
    fn blend_normalizes_weights() {
        let a = Moments {
            mean: Array1::from_elem(2, 1.0),
            std: Array1::from_elem(2, 2.0),
        };
        let b = Moments {
            mean: Array1::from_elem(2, 3.0),
            std: Array1::from_elem(2, 4.0),
        };

        let blended = Moments::blend(&[(&a, 2.0), (&b, 6.0)]);
        assert!((blended.mean[0] - 2.5).abs() < 1e-6);
        assert!((blended.std[1] - 3.5).abs() < 1e-6);

        let solo = Moments::blend(&[(&a, 0.25)]);
        assert!((solo.mean[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn interpolate_blends_linearly() {
        let content = Array3::from_elem((1, 2, 2), 1.0);
        let target = Array3::from_elem((1, 2, 2), 3.0);

        let half = interpolate(&target, &content, 0.5);
        assert!((half[[0, 0, 0]] - 2.0).abs() < 1e-6);

        let none = interpolate(&target, &content, 0.0);
        assert!((none[[0, 1, 1]] - 1.0).abs() < 1e-6);
    }
}

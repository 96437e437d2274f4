//! The trainable half of the pipeline: a mirror of the encoder that
//! maps relu4_1-shaped features back to RGB, with nearest-neighbor
//! upsampling wherever the encoder pooled.

use crate::{
    checkpoint,
    encoder::FEATURE_CHANNELS,
    layers::{
        pad_reflect, relu_grad_inplace, relu_inplace, upsample_nearest, upsample_nearest_grad,
        Conv2d,
    },
    Error,
};
use ndarray::{Array1, Array3, Array4};
use rand::SeedableRng;
use rand_pcg::Pcg32;
use std::path::Path;

/// (in, out) channels of each conv, mirroring the encoder from conv4_1
/// back down to RGB.
const CONV_SHAPES: [(usize, usize); 9] = [
    (FEATURE_CHANNELS, 256),
    (256, 256),
    (256, 256),
    (256, 256),
    (256, 128),
    (128, 128),
    (128, 64),
    (64, 64),
    (64, 3),
];

enum Op {
    /// Conv at this index; every conv but the last is followed by ReLU
    Conv(usize),
    Upsample,
}

const LAYOUT: &[Op] = &[
    Op::Conv(0),
    Op::Upsample,
    Op::Conv(1),
    Op::Conv(2),
    Op::Conv(3),
    Op::Conv(4),
    Op::Upsample,
    Op::Conv(5),
    Op::Conv(6),
    Op::Upsample,
    Op::Conv(7),
    Op::Conv(8),
];

/// Activations recorded during a forward pass, enough to compute
/// parameter gradients on the way back.
pub(crate) struct Recording {
    padded_in: Vec<Array3<f32>>,
    relu_out: Vec<Array3<f32>>,
}

/// Per-layer parameter gradients, aligned with the decoder's convs.
pub(crate) struct Gradients {
    pub(crate) weights: Vec<Array4<f32>>,
    pub(crate) bias: Vec<Array1<f32>>,
}

pub struct Decoder {
    convs: Vec<Conv2d>,
}

impl Decoder {
    pub fn seeded(seed: u64) -> Self {
        let mut rng = Pcg32::seed_from_u64(seed);
        Self {
            convs: CONV_SHAPES
                .iter()
                .map(|&(cin, cout)| Conv2d::seeded(cin, cout, &mut rng))
                .collect(),
        }
    }

    /// Loads decoder weights from a checkpoint file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let mut file = std::fs::File::open(path)?;
        Self::read(&mut file)
    }

    /// Reads decoder weights from a stream in the checkpoint format.
    pub fn read<R: std::io::Read>(r: &mut R) -> Result<Self, Error> {
        let convs = checkpoint::read_convs(r)?;
        checkpoint::check_shapes("decoder", &convs, &CONV_SHAPES)?;
        Ok(Self { convs })
    }

    /// Writes the decoder weights to a stream, returning the number of
    /// bytes written.
    pub fn write<W: std::io::Write>(&self, w: &mut W) -> Result<usize, Error> {
        Ok(checkpoint::write_convs(w, &self.convs)?)
    }

    /// Saves the decoder weights to a checkpoint file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(path)?;
        self.write(&mut file)?;
        Ok(())
    }

    pub(crate) fn convs(&self) -> &[Conv2d] {
        &self.convs
    }

    pub(crate) fn convs_mut(&mut self) -> &mut [Conv2d] {
        &mut self.convs
    }

    /// Decodes a feature tensor into an RGB tensor (values unclamped).
    pub(crate) fn forward(&self, features: &Array3<f32>, threads: usize) -> Array3<f32> {
        self.run(features, threads, None)
    }

    /// Forward pass recording the activations [`Decoder::backward`]
    /// needs.
    pub(crate) fn record(
        &self,
        features: &Array3<f32>,
        threads: usize,
    ) -> (Array3<f32>, Recording) {
        let mut rec = Recording {
            padded_in: Vec::with_capacity(self.convs.len()),
            relu_out: Vec::with_capacity(self.convs.len() - 1),
        };
        let out = self.run(features, threads, Some(&mut rec));
        (out, rec)
    }

    fn run(
        &self,
        features: &Array3<f32>,
        threads: usize,
        mut record: Option<&mut Recording>,
    ) -> Array3<f32> {
        let last = self.convs.len() - 1;
        let mut x = features.clone();

        for op in LAYOUT {
            match op {
                Op::Conv(i) => {
                    let padded = pad_reflect(&x);
                    x = self.convs[*i].forward(&padded, threads);
                    if let Some(rec) = record.as_deref_mut() {
                        rec.padded_in.push(padded);
                    }
                    if *i != last {
                        relu_inplace(&mut x);
                        if let Some(rec) = record.as_deref_mut() {
                            rec.relu_out.push(x.clone());
                        }
                    }
                }
                Op::Upsample => {
                    x = upsample_nearest(&x);
                }
            }
        }

        x
    }

    /// Backpropagates a gradient at the decoder output into per-layer
    /// parameter gradients.
    pub(crate) fn backward(
        &self,
        rec: &Recording,
        grad_out: &Array3<f32>,
        threads: usize,
    ) -> Gradients {
        let last = self.convs.len() - 1;
        let mut grads = Gradients {
            weights: self
                .convs
                .iter()
                .map(|c| Array4::zeros(c.weights.dim()))
                .collect(),
            bias: self
                .convs
                .iter()
                .map(|c| Array1::zeros(c.bias.dim()))
                .collect(),
        };

        let mut grad = grad_out.clone();
        for op in LAYOUT.iter().rev() {
            match op {
                Op::Conv(i) => {
                    if *i != last {
                        relu_grad_inplace(&mut grad, &rec.relu_out[*i]);
                    }
                    let (gw, gb) = self.convs[*i].grad_params(&rec.padded_in[*i], &grad, threads);
                    grads.weights[*i] = gw;
                    grads.bias[*i] = gb;
                    grad = self.convs[*i].grad_input(&grad, threads);
                }
                Op::Upsample => {
                    grad = upsample_nearest_grad(&grad);
                }
            }
        }

        grads
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::Rng;

    fn random_features(h: usize, w: usize) -> Array3<f32> {
        let mut rng = Pcg32::seed_from_u64(3);
        let mut t = Array3::zeros((512, h, w));
        for v in t.iter_mut() {
            *v = rng.gen::<f32>() * 0.5;
        }
        t
    }

    #[test]
    fn decodes_features_to_rgb_at_8x_resolution() {
        let decoder = Decoder::seeded(1);
        let out = decoder.forward(&random_features(2, 2), 2);
        assert_eq!(out.dim(), (3, 16, 16));
    }

    #[test]
    fn weight_gradient_matches_finite_difference() {
        let mut decoder = Decoder::seeded(2);
        let features = random_features(1, 1);

        let (out, rec) = decoder.record(&features, 1);
        // L = sum(out), so the output gradient is all ones
        let grads = decoder.backward(&rec, &Array3::ones(out.dim()), 1);

        let objective = |decoder: &Decoder| -> f64 {
            decoder
                .forward(&features, 1)
                .iter()
                .map(|&v| f64::from(v))
                .sum()
        };

        let eps = 1e-3;
        // one shallow, one mid, one deep conv
        for (conv, idx) in [(0usize, [0usize, 3, 1, 1]), (4, [10, 20, 0, 2]), (8, [2, 5, 2, 0])] {
            let orig = decoder.convs[conv].weights[idx];

            decoder.convs[conv].weights[idx] = orig + eps;
            let plus = objective(&decoder);
            decoder.convs[conv].weights[idx] = orig - eps;
            let minus = objective(&decoder);
            decoder.convs[conv].weights[idx] = orig;

            let numeric = ((plus - minus) / (2.0 * f64::from(eps))) as f32;
            let analytic = grads.weights[conv][idx];
            assert!(
                (analytic - numeric).abs() < 5e-2 * numeric.abs().max(1.0),
                "conv {} weight {:?}: analytic {} vs numeric {}",
                conv,
                idx,
                analytic,
                numeric
            );
        }

        let orig = decoder.convs[6].bias[7];
        decoder.convs[6].bias[7] = orig + eps;
        let plus = objective(&decoder);
        decoder.convs[6].bias[7] = orig - eps;
        let minus = objective(&decoder);
        decoder.convs[6].bias[7] = orig;

        let numeric = ((plus - minus) / (2.0 * f64::from(eps))) as f32;
        let analytic = grads.bias[6][7];
        assert!((analytic - numeric).abs() < 5e-2 * numeric.abs().max(1.0));
    }
}

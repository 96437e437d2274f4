//! The fixed feature extractor: a VGG-style stack of 3x3 convolutions
//! and 2x2 max pools, with style taps at relu1_1, relu2_1, relu3_1 and
//! relu4_1. Its weights are frozen; training only ever propagates
//! gradients *through* it, never into it.

use crate::{
    checkpoint,
    layers::{
        max_pool, max_pool_grad, pad_reflect, relu_grad_inplace, relu_inplace, Conv2d,
    },
    Error,
};
use ndarray::Array3;
use rand::SeedableRng;
use rand_pcg::Pcg32;
use std::path::Path;

/// Number of encoder taps used for style statistics.
pub(crate) const TAP_COUNT: usize = 4;

/// Seed of the default randomly initialized encoder. Training and
/// stylization must agree on the encoder, so the default is a fixed
/// constant rather than the user-provided session seed.
pub(crate) const DEFAULT_SEED: u64 = 0x00ad_a117;

/// (in, out) channels of each conv, VGG-19 up to conv4_1.
const CONV_SHAPES: [(usize, usize); 9] = [
    (3, 64),
    (64, 64),
    (64, 128),
    (128, 128),
    (128, 256),
    (256, 256),
    (256, 256),
    (256, 256),
    (256, 512),
];

/// Width of the deepest tap, which is what the decoder consumes.
pub(crate) const FEATURE_CHANNELS: usize = 512;

enum Op {
    /// Conv at this index followed by ReLU
    Conv(usize),
    Pool(usize),
    Tap(usize),
}

const LAYOUT: &[Op] = &[
    Op::Conv(0),
    Op::Tap(0),
    Op::Conv(1),
    Op::Pool(0),
    Op::Conv(2),
    Op::Tap(1),
    Op::Conv(3),
    Op::Pool(1),
    Op::Conv(4),
    Op::Tap(2),
    Op::Conv(5),
    Op::Conv(6),
    Op::Conv(7),
    Op::Pool(2),
    Op::Conv(8),
    Op::Tap(3),
];

/// Activations recorded during a forward pass, enough to route a
/// gradient from the taps back to the input.
pub(crate) struct Recording {
    relu_out: Vec<Array3<f32>>,
    pool_argmax: Vec<Array3<u8>>,
    pool_in_dim: Vec<(usize, usize, usize)>,
}

pub struct Encoder {
    convs: Vec<Conv2d>,
}

impl Encoder {
    /// Deterministic randomly-initialized encoder. Even untrained
    /// filters define a usable feature space for moment matching, so
    /// this is the default when no weights file is supplied.
    pub fn seeded(seed: u64) -> Self {
        let mut rng = Pcg32::seed_from_u64(seed);
        Self {
            convs: CONV_SHAPES
                .iter()
                .map(|&(cin, cout)| Conv2d::seeded(cin, cout, &mut rng))
                .collect(),
        }
    }

    /// Loads encoder weights from a checkpoint file, eg converted
    /// pretrained VGG weights.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let mut file = std::fs::File::open(path)?;
        let convs = checkpoint::read_convs(&mut file)?;
        checkpoint::check_shapes("encoder", &convs, &CONV_SHAPES)?;
        Ok(Self { convs })
    }

    /// Writes the encoder weights in the checkpoint format.
    pub fn write<W: std::io::Write>(&self, w: &mut W) -> Result<usize, Error> {
        Ok(checkpoint::write_convs(w, &self.convs)?)
    }

    /// The relu4_1 feature map of an image tensor.
    pub(crate) fn features(&self, input: &Array3<f32>, threads: usize) -> Array3<f32> {
        self.run(input, threads, None, None)
    }

    /// All four tap activations, shallowest first.
    pub(crate) fn taps(&self, input: &Array3<f32>, threads: usize) -> Vec<Array3<f32>> {
        let mut taps = Vec::with_capacity(TAP_COUNT);
        self.run(input, threads, None, Some(&mut taps));
        taps
    }

    /// Forward pass that also records the activations needed by
    /// [`Encoder::backward`].
    pub(crate) fn record(
        &self,
        input: &Array3<f32>,
        threads: usize,
    ) -> (Vec<Array3<f32>>, Recording) {
        let mut taps = Vec::with_capacity(TAP_COUNT);
        let mut rec = Recording {
            relu_out: Vec::with_capacity(self.convs.len()),
            pool_argmax: Vec::with_capacity(3),
            pool_in_dim: Vec::with_capacity(3),
        };
        self.run(input, threads, Some(&mut rec), Some(&mut taps));
        (taps, rec)
    }

    fn run(
        &self,
        input: &Array3<f32>,
        threads: usize,
        mut record: Option<&mut Recording>,
        mut taps_out: Option<&mut Vec<Array3<f32>>>,
    ) -> Array3<f32> {
        let mut x = input.clone();

        for op in LAYOUT {
            match op {
                Op::Conv(i) => {
                    let padded = pad_reflect(&x);
                    x = self.convs[*i].forward(&padded, threads);
                    relu_inplace(&mut x);
                    if let Some(rec) = record.as_deref_mut() {
                        rec.relu_out.push(x.clone());
                    }
                }
                Op::Pool(_) => {
                    if let Some(rec) = record.as_deref_mut() {
                        rec.pool_in_dim.push(x.dim());
                    }
                    let (pooled, argmax) = max_pool(&x);
                    x = pooled;
                    if let Some(rec) = record.as_deref_mut() {
                        rec.pool_argmax.push(argmax);
                    }
                }
                Op::Tap(_) => {
                    if let Some(taps) = taps_out.as_deref_mut() {
                        taps.push(x.clone());
                    }
                }
            }
        }

        x
    }

    /// Backpropagates gradients injected at the taps down to the encoder
    /// input. Tap gradients of deeper taps accumulate into the shallower
    /// stream as the walk passes them.
    pub(crate) fn backward(
        &self,
        rec: &Recording,
        tap_grads: &[Array3<f32>; TAP_COUNT],
        threads: usize,
    ) -> Array3<f32> {
        // the layout ends on the deepest tap, so the walk starts there
        let mut grad = tap_grads[TAP_COUNT - 1].clone();

        for op in LAYOUT[..LAYOUT.len() - 1].iter().rev() {
            match op {
                Op::Tap(t) => grad += &tap_grads[*t],
                Op::Conv(i) => {
                    relu_grad_inplace(&mut grad, &rec.relu_out[*i]);
                    grad = self.convs[*i].grad_input(&grad, threads);
                }
                Op::Pool(p) => {
                    grad = max_pool_grad(&grad, &rec.pool_argmax[*p], rec.pool_in_dim[*p]);
                }
            }
        }

        grad
    }
}

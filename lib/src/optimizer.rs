//! Adam optimizer over the decoder's parameters.

use crate::decoder::{Decoder, Gradients};
use ndarray::{Array1, Array4, Zip};

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const EPSILON: f32 = 1e-8;

/// Adam with per-parameter first/second moment state, one slot per
/// decoder conv.
pub(crate) struct Adam {
    learning_rate: f32,
    step: i32,
    m_weights: Vec<Array4<f32>>,
    v_weights: Vec<Array4<f32>>,
    m_bias: Vec<Array1<f32>>,
    v_bias: Vec<Array1<f32>>,
}

impl Adam {
    pub(crate) fn new(learning_rate: f32, decoder: &Decoder) -> Self {
        Self {
            learning_rate,
            step: 0,
            m_weights: decoder
                .convs()
                .iter()
                .map(|c| Array4::zeros(c.weights.dim()))
                .collect(),
            v_weights: decoder
                .convs()
                .iter()
                .map(|c| Array4::zeros(c.weights.dim()))
                .collect(),
            m_bias: decoder
                .convs()
                .iter()
                .map(|c| Array1::zeros(c.bias.dim()))
                .collect(),
            v_bias: decoder
                .convs()
                .iter()
                .map(|c| Array1::zeros(c.bias.dim()))
                .collect(),
        }
    }

    pub(crate) fn step(&mut self, decoder: &mut Decoder, grads: &Gradients) {
        self.step += 1;
        let correction1 = 1.0 - BETA1.powi(self.step);
        let correction2 = 1.0 - BETA2.powi(self.step);
        let lr = self.learning_rate;

        for (i, conv) in decoder.convs_mut().iter_mut().enumerate() {
            Zip::from(&mut conv.weights)
                .and(&grads.weights[i])
                .and(&mut self.m_weights[i])
                .and(&mut self.v_weights[i])
                .for_each(|w, &g, m, v| {
                    *m = BETA1 * *m + (1.0 - BETA1) * g;
                    *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                    *w -= lr * (*m / correction1) / ((*v / correction2).sqrt() + EPSILON);
                });
            Zip::from(&mut conv.bias)
                .and(&grads.bias[i])
                .and(&mut self.m_bias[i])
                .and(&mut self.v_bias[i])
                .for_each(|b, &g, m, v| {
                    *m = BETA1 * *m + (1.0 - BETA1) * g;
                    *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                    *b -= lr * (*m / correction1) / ((*v / correction2).sqrt() + EPSILON);
                });
        }
    }
}

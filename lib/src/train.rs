//! Decoder training. A [`Trainer`] owns the frozen encoder, the
//! trainable decoder and the preprocessed content/style pools; each
//! iteration samples one content/style pair, runs the stylization
//! forward pass and takes an Adam step on the decoder.

use crate::{
    adain::{self, Moments},
    decoder::Decoder,
    encoder::{self, Encoder, TAP_COUNT},
    errors::{self, Error},
    loss,
    optimizer::Adam,
    utils::{self, ImageSource},
    Dims,
};
use ndarray::Array3;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use std::path::{Path, PathBuf};

struct TrainParameters {
    iterations: usize,
    learning_rate: f32,
    style_weight: f32,
    seed: u64,
    resize_input: Dims,
    max_thread_count: Option<usize>,
}

impl Default for TrainParameters {
    fn default() -> Self {
        Self {
            iterations: 4000,
            learning_rate: 1e-4,
            style_weight: 10.0,
            seed: 0,
            resize_input: Dims::square(256),
            max_thread_count: None,
        }
    }
}

/// Builds a [`Trainer`], checking parameters and loading all images in
/// [`TrainerBuilder::build`].
#[derive(Default)]
pub struct TrainerBuilder<'a> {
    contents: Vec<ImageSource<'a>>,
    styles: Vec<ImageSource<'a>>,
    encoder_weights: Option<PathBuf>,
    resume_from: Option<PathBuf>,
    snapshot: Option<(PathBuf, usize)>,
    params: TrainParameters,
}

impl<'a> TrainerBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a content image to sample training pairs from.
    pub fn add_content<I: Into<ImageSource<'a>>>(mut self, content: I) -> Self {
        self.contents.push(content.into());
        self
    }

    /// Adds several content images.
    pub fn add_contents<I: Into<ImageSource<'a>>, T: IntoIterator<Item = I>>(
        mut self,
        contents: T,
    ) -> Self {
        self.contents.extend(contents.into_iter().map(|c| c.into()));
        self
    }

    /// Adds a style image to sample training pairs from.
    pub fn add_style<I: Into<ImageSource<'a>>>(mut self, style: I) -> Self {
        self.styles.push(style.into());
        self
    }

    /// Adds several style images.
    pub fn add_styles<I: Into<ImageSource<'a>>, T: IntoIterator<Item = I>>(
        mut self,
        styles: T,
    ) -> Self {
        self.styles.extend(styles.into_iter().map(|s| s.into()));
        self
    }

    /// Number of optimization steps.
    ///
    /// Default: 4000
    pub fn iterations(mut self, count: usize) -> Self {
        self.params.iterations = count;
        self
    }

    /// Adam learning rate.
    ///
    /// Default: 1e-4
    pub fn learning_rate(mut self, rate: f32) -> Self {
        self.params.learning_rate = rate;
        self
    }

    /// Weight of the style loss relative to the content loss.
    ///
    /// Default: 10.0
    pub fn style_weight(mut self, weight: f32) -> Self {
        self.params.style_weight = weight;
        self
    }

    /// Seed for decoder initialization and content/style pair sampling.
    ///
    /// Default: 0
    pub fn seed(mut self, value: u64) -> Self {
        self.params.seed = value;
        self
    }

    /// Resizes every training image to these dimensions. Dimensions
    /// that are not multiples of 8 are snapped down.
    ///
    /// Default: 256x256
    pub fn resize_input(mut self, dims: Dims) -> Self {
        self.params.resize_input = dims;
        self
    }

    /// Maximum number of threads used for convolution passes.
    ///
    /// Default: The number of logical cores on this system.
    pub fn max_thread_count(mut self, count: usize) -> Self {
        self.params.max_thread_count = Some(count);
        self
    }

    /// Loads encoder weights from a checkpoint file instead of using
    /// the default seeded initialization.
    pub fn encoder_weights<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.encoder_weights = Some(path.as_ref().to_owned());
        self
    }

    /// Starts from a previously saved decoder checkpoint instead of a
    /// fresh seeded initialization.
    pub fn resume_from<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.resume_from = Some(path.as_ref().to_owned());
        self
    }

    /// Writes a decoder checkpoint into `dir` every `every` iterations.
    pub fn snapshot_every<P: AsRef<Path>>(mut self, dir: P, every: usize) -> Self {
        self.snapshot = Some((dir.as_ref().to_owned(), every));
        self
    }

    /// Checks parameters and loads every content and style image,
    /// precomputing the style tap statistics.
    pub fn build(self) -> Result<Trainer, Error> {
        self.check_parameters_validity()?;

        if self.contents.is_empty() {
            return Err(Error::NoContent);
        }
        if self.styles.is_empty() {
            return Err(Error::NoStyles);
        }

        let threads = self
            .params
            .max_thread_count
            .unwrap_or_else(num_cpus::get);

        let encoder = match &self.encoder_weights {
            Some(path) => Encoder::from_file(path)?,
            None => Encoder::seeded(encoder::DEFAULT_SEED),
        };

        let decoder = match &self.resume_from {
            Some(path) => Decoder::from_file(path)?,
            None => Decoder::seeded(self.params.seed),
        };

        if let Some((_, every)) = &self.snapshot {
            if *every == 0 {
                return Err(Error::InvalidRange(errors::InvalidRange {
                    min: 1.0,
                    max: f32::MAX,
                    value: 0.0,
                    name: "snapshot-every",
                }));
            }
        }

        let resize = Some(self.params.resize_input);
        let mut contents = Vec::with_capacity(self.contents.len());
        for src in self.contents {
            let img = utils::load_snapped(src, resize)?;
            contents.push(utils::image_to_tensor(&img));
        }

        // Only the per-tap statistics of each style survive training,
        // so they are measured once up front
        let mut style_moments = Vec::with_capacity(self.styles.len());
        for src in self.styles {
            let img = utils::load_snapped(src, resize)?;
            let tensor = utils::image_to_tensor(&img);
            let taps = encoder.taps(&tensor, threads);
            style_moments.push(taps.iter().map(Moments::measure).collect());
        }

        Ok(Trainer {
            encoder,
            decoder,
            contents,
            style_moments,
            snapshot: self.snapshot,
            params: self.params,
        })
    }

    fn check_parameters_validity(&self) -> Result<(), Error> {
        if self.params.learning_rate <= 0.0 || self.params.learning_rate > 1.0 {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 0.0,
                max: 1.0,
                value: self.params.learning_rate,
                name: "learning-rate",
            }));
        }

        if self.params.style_weight < 0.0 {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 0.0,
                max: f32::MAX,
                value: self.params.style_weight,
                name: "style-weight",
            }));
        }

        if self.params.iterations == 0 {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 1.0,
                max: f32::MAX,
                value: 0.0,
                name: "iterations",
            }));
        }

        if let Some(max_count) = self.params.max_thread_count {
            if max_count == 0 {
                return Err(Error::InvalidRange(errors::InvalidRange {
                    min: 1.0,
                    max: 1024.0,
                    value: max_count as f32,
                    name: "max-thread-count",
                }));
            }
        }

        Ok(())
    }
}

/// A fully prepared training run. Consumed by [`Trainer::run`].
pub struct Trainer {
    encoder: Encoder,
    decoder: Decoder,
    contents: Vec<Array3<f32>>,
    style_moments: Vec<Vec<Moments>>,
    snapshot: Option<(PathBuf, usize)>,
    params: TrainParameters,
}

impl Trainer {
    pub fn builder<'a>() -> TrainerBuilder<'a> {
        TrainerBuilder::new()
    }

    /// Runs the optimization loop; provide a `TrainingProgress`
    /// implementation to be kept up to date on loss curves and to see
    /// the current stylization of the sampled pair.
    pub fn run(
        mut self,
        mut progress: Option<Box<dyn TrainingProgress>>,
    ) -> Result<TrainedDecoder, Error> {
        let threads = self
            .params
            .max_thread_count
            .unwrap_or_else(num_cpus::get);

        let mut adam = Adam::new(self.params.learning_rate, &self.decoder);
        let mut rng = Pcg32::seed_from_u64(self.params.seed);
        let mut content_loss = 0.0;
        let mut style_loss = 0.0;

        for iteration in 0..self.params.iterations {
            let content = &self.contents[rng.gen_range(0..self.contents.len())];
            let moments = &self.style_moments[rng.gen_range(0..self.style_moments.len())];

            let content_features = self.encoder.features(content, threads);
            let target = adain::adain(&content_features, &moments[TAP_COUNT - 1]);

            let (decoded, decoder_rec) = self.decoder.record(&target, threads);
            let (taps, encoder_rec) = self.encoder.record(&decoded, threads);

            let terms = loss::evaluate(&taps, &target, moments, self.params.style_weight);
            content_loss = terms.content;
            style_loss = terms.style;

            let decoded_grad = self.encoder.backward(&encoder_rec, &terms.tap_grads, threads);
            let grads = self.decoder.backward(&decoder_rec, &decoded_grad, threads);
            adam.step(&mut self.decoder, &grads);

            if let Some(progress) = progress.as_mut() {
                let preview = utils::tensor_to_image(&decoded);
                progress.update(TrainingUpdate {
                    image: &preview,
                    iteration: ProgressStat {
                        current: iteration + 1,
                        total: self.params.iterations,
                    },
                    content_loss,
                    style_loss,
                });
            }

            if let Some((dir, every)) = &self.snapshot {
                if (iteration + 1) % every == 0 {
                    let path = dir.join(format!("decoder-{:06}.bin", iteration + 1));
                    self.decoder.save(path)?;
                }
            }
        }

        Ok(TrainedDecoder {
            decoder: self.decoder,
            content_loss,
            style_loss,
        })
    }
}

/// The outcome of a training run: the optimized decoder plus the loss
/// terms of the final iteration.
pub struct TrainedDecoder {
    decoder: Decoder,
    /// Content loss of the last training iteration.
    pub content_loss: f32,
    /// Unweighted style loss of the last training iteration.
    pub style_loss: f32,
}

impl TrainedDecoder {
    /// Saves the decoder checkpoint to the path, creating any needed
    /// directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        self.decoder.save(path)
    }

    /// Writes the decoder checkpoint into the writer.
    pub fn write<W: std::io::Write>(&self, w: &mut W) -> Result<usize, Error> {
        self.decoder.write(w)
    }

    pub fn into_decoder(self) -> Decoder {
        self.decoder
    }
}

/// Helper struct for passing progress information to external callers
pub struct ProgressStat {
    /// The current amount of work that has been done
    pub current: usize,
    /// The total amount of work to do
    pub total: usize,
}

/// The current state of a training run
pub struct TrainingUpdate<'a> {
    /// The stylization of the most recently sampled pair, as produced
    /// by the decoder in its current state
    pub image: &'a image::RgbaImage,
    /// How far along the run is
    pub iteration: ProgressStat,
    /// Content loss of this iteration
    pub content_loss: f32,
    /// Unweighted style loss of this iteration
    pub style_loss: f32,
}

/// Allows the trainer to update external callers with the current
/// progress of the optimization
pub trait TrainingProgress {
    fn update(&mut self, info: TrainingUpdate<'_>);
}

impl<G> TrainingProgress for G
where
    G: FnMut(TrainingUpdate<'_>) + Send,
{
    fn update(&mut self, info: TrainingUpdate<'_>) {
        self(info)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_missing_inputs() {
        let solid = image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            16,
            16,
            image::Rgba([128, 40, 200, 255]),
        ));

        match Trainer::builder().add_style(solid.clone()).build() {
            Err(Error::NoContent) => {}
            _ => panic!("expected NoContent"),
        }

        match Trainer::builder().add_content(solid).build() {
            Err(Error::NoStyles) => {}
            _ => panic!("expected NoStyles"),
        }
    }

    #[test]
    fn rejects_out_of_range_parameters() {
        let builder = || {
            let img = image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
                16,
                16,
                image::Rgba([0, 0, 0, 255]),
            ));
            Trainer::builder().add_content(img.clone()).add_style(img)
        };

        assert!(matches!(
            builder().learning_rate(0.0).build(),
            Err(Error::InvalidRange(_))
        ));
        assert!(matches!(
            builder().style_weight(-1.0).build(),
            Err(Error::InvalidRange(_))
        ));
        assert!(matches!(
            builder().iterations(0).build(),
            Err(Error::InvalidRange(_))
        ));
        assert!(matches!(
            builder().max_thread_count(0).build(),
            Err(Error::InvalidRange(_))
        ));
    }
}

//! Stylization. A `Session` pairs one content image with one or more
//! style images, blends the style statistics and runs a single
//! encode/transfer/decode pass.

use crate::{
    adain::{self, Moments},
    decoder::Decoder,
    encoder::{self, Encoder},
    errors, utils,
    utils::ImageSource,
    Error, Parameters, StylizedImage,
};
use ndarray::Array3;
use std::path::{Path, PathBuf};

/// Performs style transfer, holding all of the provided image inputs
/// and parameters. Constructed via a [`SessionBuilder`], which loads
/// the images and checks for various errors.
pub struct Session {
    encoder: Encoder,
    decoder: Decoder,
    content: Array3<f32>,
    style: Moments,
    params: Parameters,
}

impl Session {
    /// Creates a new session with default parameters.
    pub fn builder<'a>() -> SessionBuilder<'a> {
        SessionBuilder::default()
    }

    /// Runs the stylization pass and returns the generated image.
    pub fn run(self) -> StylizedImage {
        let threads = self
            .params
            .max_thread_count
            .unwrap_or_else(num_cpus::get);

        let features = self.encoder.features(&self.content, threads);
        let target = adain::adain(&features, &self.style);
        let target = adain::interpolate(&target, &features, self.params.style_strength);
        let decoded = self.decoder.forward(&target, threads);

        StylizedImage::new(utils::tensor_to_image(&decoded))
    }
}

/// Builds a `Session` from a content image, one or more style images
/// and the transfer parameters.
#[derive(Default)]
pub struct SessionBuilder<'a> {
    content: Option<ImageSource<'a>>,
    styles: Vec<(ImageSource<'a>, f32)>,
    decoder: Option<Decoder>,
    decoder_file: Option<PathBuf>,
    encoder_weights: Option<PathBuf>,
    params: Parameters,
}

impl<'a> SessionBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The image whose structure is preserved.
    pub fn content<I: Into<ImageSource<'a>>>(mut self, content: I) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Adds a style image with weight 1.0.
    pub fn add_style<I: Into<ImageSource<'a>>>(self, style: I) -> Self {
        self.add_style_weighted(style, 1.0)
    }

    /// Adds a style image with an explicit blend weight. Weights are
    /// normalized across all styles when the statistics are blended.
    pub fn add_style_weighted<I: Into<ImageSource<'a>>>(mut self, style: I, weight: f32) -> Self {
        self.styles.push((style.into(), weight));
        self
    }

    /// Adds several equally weighted style images.
    pub fn add_styles<I: Into<ImageSource<'a>>, T: IntoIterator<Item = I>>(
        mut self,
        styles: T,
    ) -> Self {
        self.styles
            .extend(styles.into_iter().map(|s| (s.into(), 1.0)));
        self
    }

    /// How strongly the style statistics replace the content's own,
    /// from 0.0 (reconstruct the content) to 1.0 (full transfer).
    ///
    /// Default: 1.0
    pub fn style_strength(mut self, strength: f32) -> Self {
        self.params.style_strength = strength;
        self
    }

    /// Resizes the content image to these dimensions before encoding.
    /// Dimensions that are not multiples of 8 are snapped down.
    ///
    /// Default: the content image's own size, snapped
    pub fn output_size(mut self, dims: crate::Dims) -> Self {
        self.params.output_size = Some(dims);
        self
    }

    /// Resizes every style image to these dimensions before its
    /// statistics are measured.
    ///
    /// Default: each style image's own size, snapped
    pub fn resize_input(mut self, dims: crate::Dims) -> Self {
        self.params.resize_input = Some(dims);
        self
    }

    /// Seed for the fallback decoder initialization.
    ///
    /// Default: 0
    pub fn seed(mut self, value: u64) -> Self {
        self.params.seed = value;
        self
    }

    /// Maximum number of threads used for convolution passes.
    ///
    /// Default: The number of logical cores on this system.
    pub fn max_thread_count(mut self, count: usize) -> Self {
        self.params.max_thread_count = Some(count);
        self
    }

    /// Uses this decoder, eg one freshly produced by
    /// [`crate::TrainedDecoder::into_decoder`].
    pub fn decoder(mut self, decoder: Decoder) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Loads the decoder from a checkpoint file. Takes precedence over
    /// [`SessionBuilder::decoder`].
    pub fn decoder_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.decoder_file = Some(path.as_ref().to_owned());
        self
    }

    /// Loads encoder weights from a checkpoint file instead of using
    /// the default seeded initialization. Must match the encoder the
    /// decoder was trained against.
    pub fn encoder_weights<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.encoder_weights = Some(path.as_ref().to_owned());
        self
    }

    /// Loads all the images, blends the style statistics and checks
    /// the parameters for validity.
    pub fn build(mut self) -> Result<Session, Error> {
        self.check_parameters_validity()?;

        let content = match self.content.take() {
            Some(content) => content,
            None => return Err(Error::NoContent),
        };
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

        // An untrained decoder produces noise; callers are expected to
        // pass a trained one but the session still runs without it
        let decoder = match (self.decoder_file.take(), self.decoder.take()) {
            (Some(path), _) => Decoder::from_file(path)?,
            (None, Some(decoder)) => decoder,
            (None, None) => Decoder::seeded(self.params.seed),
        };

        let content_img = utils::load_snapped(content, self.params.output_size)?;
        let content = utils::image_to_tensor(&content_img);

        let mut measured = Vec::with_capacity(self.styles.len());
        for (src, weight) in self.styles {
            let img = utils::load_snapped(src, self.params.resize_input)?;
            let features = encoder.features(&utils::image_to_tensor(&img), threads);
            measured.push((Moments::measure(&features), weight));
        }
        let style = Moments::blend(
            &measured
                .iter()
                .map(|(m, w)| (m, *w))
                .collect::<Vec<_>>(),
        );

        Ok(Session {
            encoder,
            decoder,
            content,
            style,
            params: self.params,
        })
    }

    fn check_parameters_validity(&self) -> Result<(), Error> {
        if self.params.style_strength < 0.0 || self.params.style_strength > 1.0 {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 0.0,
                max: 1.0,
                value: self.params.style_strength,
                name: "style-strength",
            }));
        }

        for (_, weight) in &self.styles {
            if *weight < 0.0 {
                return Err(Error::InvalidRange(errors::InvalidRange {
                    min: 0.0,
                    max: f32::MAX,
                    value: *weight,
                    name: "style-weight",
                }));
            }
        }
        if !self.styles.is_empty() && self.styles.iter().all(|(_, w)| *w == 0.0) {
            return Err(Error::NoStyles);
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

// BEGIN - Embark standard lints v0.4
// do not change or add/remove here, but one can add exceptions after this section
// for more info see: <https://github.com/EmbarkStudios/rust-ecosystem/issues/59>
#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::await_holding_lock,
    clippy::char_lit_as_u8,
    clippy::checked_conversions,
    clippy::dbg_macro,
    clippy::debug_assert_with_mut_call,
    clippy::doc_markdown,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::exit,
    clippy::expl_impl_clone_on_copy,
    clippy::explicit_deref_methods,
    clippy::explicit_into_iter_loop,
    clippy::fallible_impl_from,
    clippy::filter_map_next,
    clippy::float_cmp_const,
    clippy::fn_params_excessive_bools,
    clippy::if_let_mutex,
    clippy::implicit_clone,
    clippy::imprecise_flops,
    clippy::inefficient_to_string,
    clippy::invalid_upcast_comparisons,
    clippy::large_types_passed_by_value,
    clippy::let_unit_value,
    clippy::linkedlist,
    clippy::lossy_float_literal,
    clippy::macro_use_imports,
    clippy::manual_ok_or,
    clippy::map_err_ignore,
    clippy::map_flatten,
    clippy::map_unwrap_or,
    clippy::match_on_vec_items,
    clippy::match_same_arms,
    clippy::match_wildcard_for_single_variants,
    clippy::mem_forget,
    clippy::mismatched_target_os,
    clippy::mut_mut,
    clippy::mutex_integer,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::option_option,
    clippy::path_buf_push_overwrite,
    clippy::ptr_as_ptr,
    clippy::ref_option_ref,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_functions_in_if_condition,
    clippy::semicolon_if_nothing_returned,
    clippy::string_add_assign,
    clippy::string_add,
    clippy::string_lit_as_bytes,
    clippy::string_to_string,
    clippy::todo,
    clippy::trait_duplication_in_bounds,
    clippy::unimplemented,
    clippy::unnested_or_patterns,
    clippy::unused_self,
    clippy::useless_transmute,
    clippy::verbose_file_reads,
    clippy::zero_sized_map_values,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms
)]
// END - Embark standard lints v0.4

//! `style-transfer` is a light API for arbitrary neural style transfer
//! via adaptive instance normalization: the channel-wise feature
//! statistics of a content image are replaced with those of a style
//! image, and a trained decoder turns the result back into pixels.
//!
//! Stylization follows a builder pattern. A `Session` is built via a
//! `SessionBuilder`; calling `build` loads all of the input images,
//! measures the style statistics and checks for various errors.
//! `Session::run()` performs the transfer and returns a
//! `StylizedImage`, which you can save, stream, or inspect.
//!
//! ```no_run
//! // Create a new session with default parameters
//! let session = style_transfer::Session::builder()
//!     // Specify the content and style images
//!     .content(&"imgs/portrait.jpg")
//!     .add_style(&"imgs/starry-night.jpg")
//!     // Use a previously trained decoder
//!     .decoder_file("decoder.bin")
//!     .style_strength(0.8)
//!     // Build the session
//!     .build().expect("failed to build session");
//!
//! // Stylize
//! let stylized = session.run();
//!
//! // Save the stylized image to disk
//! stylized.save("stylized.jpg").expect("failed to save stylized image");
//! ```
//!
//! Decoders are trained with a [`Trainer`], built the same way:
//!
//! ```no_run
//! let trained = style_transfer::Trainer::builder()
//!     .add_content(&"imgs/photo1.jpg")
//!     .add_style(&"imgs/starry-night.jpg")
//!     .iterations(2000)
//!     .build().expect("failed to build trainer")
//!     .run(None).expect("training failed");
//!
//! trained.save("decoder.bin").expect("failed to save decoder");
//! ```
mod adain;
mod checkpoint;
mod decoder;
mod encoder;
mod errors;
mod layers;
mod loss;
mod optimizer;
pub mod session;
pub mod train;
mod utils;

pub use image;
use std::path::Path;

pub use adain::Moments;
pub use decoder::Decoder;
pub use encoder::Encoder;
pub use errors::Error;
pub use session::{Session, SessionBuilder};
pub use train::{
    ProgressStat, TrainedDecoder, Trainer, TrainerBuilder, TrainingProgress, TrainingUpdate,
};
pub use utils::{load_dynamic_image, ImageSource};

/// Simple dimensions struct
#[derive(Copy, Clone)]
#[cfg_attr(test, derive(Debug, PartialEq))]
pub struct Dims {
    pub width: u32,
    pub height: u32,
}

impl Dims {
    pub fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
        }
    }
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

struct Parameters {
    style_strength: f32,
    output_size: Option<Dims>,
    resize_input: Option<Dims>,
    max_thread_count: Option<usize>,
    seed: u64,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            style_strength: 1.0,
            output_size: None,
            resize_input: None,
            max_thread_count: None,
            seed: 0,
        }
    }
}

/// An image generated by a `Session::run()`
pub struct StylizedImage {
    image: image::RgbaImage,
}

impl StylizedImage {
    pub(crate) fn new(image: image::RgbaImage) -> Self {
        Self { image }
    }

    /// Saves the stylized image to the specified path
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        if let Some(parent_path) = path.parent() {
            std::fs::create_dir_all(&parent_path)?;
        }

        self.image.save(&path)?;
        Ok(())
    }

    /// Writes the stylized image to the specified stream
    pub fn write<W: std::io::Write>(
        self,
        writer: &mut W,
        fmt: image::ImageOutputFormat,
    ) -> Result<(), Error> {
        let dyn_img = self.into_image();
        Ok(dyn_img.write_to(writer, fmt)?)
    }

    /// Returns the stylized output image
    pub fn into_image(self) -> image::DynamicImage {
        image::DynamicImage::ImageRgba8(self.image)
    }
}

impl AsRef<image::RgbaImage> for StylizedImage {
    fn as_ref(&self) -> &image::RgbaImage {
        &self.image
    }
}

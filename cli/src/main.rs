use structopt::StructOpt;

use std::path::PathBuf;
use style_transfer::{
    image::ImageOutputFormat as ImgFmt, Dims, Error, Session, Trainer,
};

fn parse_size(input: &str) -> Result<(u32, u32), std::num::ParseIntError> {
    let mut i = input.splitn(2, 'x');

    let x: u32 = i.next().unwrap_or("").parse()?;
    let y: u32 = match i.next() {
        Some(num) => num.parse()?,
        None => x,
    };
    Ok((x, y))
}

fn parse_img_fmt(input: &str) -> Result<ImgFmt, String> {
    let fmt = match input {
        "png" => ImgFmt::Png,
        "jpg" => ImgFmt::Jpeg(75),
        "bmp" => ImgFmt::Bmp,
        other => {
            return Err(format!(
                "image format `{}` not one of: 'png', 'jpg', 'bmp'",
                other
            ))
        }
    };

    Ok(fmt)
}

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case")]
struct Stylize {
    /// The image whose structure is preserved
    #[structopt(long)]
    content: PathBuf,
    /// Blend weight(s) for the style images, in the same order as the
    /// styles. Styles without a weight use 1.0
    #[structopt(long = "style-weights")]
    style_weights: Vec<f32>,
    /// How strongly the style replaces the content's own statistics.
    /// Range (0.0 - 1.0)
    #[structopt(long, default_value = "1.0")]
    strength: f32,
    /// A decoder checkpoint produced by the `train` subcommand
    #[structopt(long, parse(from_os_str))]
    decoder: PathBuf,
    /// Size of the stylized image, in `width x height`, or a single number
    /// for both dimensions. Snapped down to multiples of 8. Defaults to
    /// the content image's own size
    #[structopt(long, parse(try_from_str = parse_size))]
    out_size: Option<(u32, u32)>,
    /// The format to save the stylized image as.
    ///
    /// NOTE: this will only apply when stdout is specified via `-o -`, otherwise the image
    /// format is determined by the file extension of the path provided to `-o`
    #[structopt(
        long,
        default_value = "png",
        parse(try_from_str = parse_img_fmt)
    )]
    out_fmt: ImgFmt,
    /// Path(s) to style images whose feature statistics are imposed on the content
    #[structopt(parse(from_os_str))]
    styles: Vec<PathBuf>,
}

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case")]
struct Train {
    /// Path(s) to content images sampled during training
    #[structopt(long = "contents", parse(from_os_str))]
    contents: Vec<PathBuf>,
    /// Path(s) to style images sampled during training
    #[structopt(long = "styles", parse(from_os_str))]
    styles: Vec<PathBuf>,
    /// The number of optimization steps
    #[structopt(long, default_value = "4000")]
    iterations: usize,
    /// Adam learning rate. Range (0.0 - 1.0)
    #[structopt(long = "lr", default_value = "0.0001")]
    learning_rate: f32,
    /// Weight of the style loss relative to the content loss
    #[structopt(long, default_value = "10.0")]
    style_weight: f32,
    /// Resume from a previously saved decoder checkpoint
    #[structopt(long, parse(from_os_str))]
    resume: Option<PathBuf>,
    /// A directory into which intermediate decoder checkpoints are saved
    #[structopt(long, parse(from_os_str))]
    snapshot_dir: Option<PathBuf>,
    /// How many iterations pass between two snapshots
    #[structopt(long, default_value = "500")]
    snapshot_every: usize,
}

#[derive(StructOpt)]
enum Subcommand {
    /// Stylizes a content image with one or more style images
    #[structopt(name = "stylize")]
    Stylize(Stylize),
    /// Trains a decoder on a set of content and style images
    #[structopt(name = "train")]
    Train(Train),
}

#[derive(StructOpt)]
#[structopt(
    name = "style-transfer",
    about = "Transfers the style of one image onto the content of another",
    rename_all = "kebab-case"
)]
struct Opt {
    /// Resize input image(s), in `width x height`, or a single number for
    /// both dimensions. For `train` this is the training resolution and
    /// defaults to 256, for `stylize` it applies to the style images
    #[structopt(long, parse(try_from_str = parse_size))]
    in_size: Option<(u32, u32)>,
    /// The path to save the output to. For `stylize` this is the image,
    /// for `train` the decoder checkpoint. You may use `-` for stdout.
    #[structopt(long = "out", short, parse(from_os_str))]
    output_path: PathBuf,
    /// An encoder checkpoint, eg converted pretrained VGG weights. Both
    /// subcommands default to the same seeded initialization, so a decoder
    /// is only ever usable with the encoder it was trained against
    #[structopt(long, parse(from_os_str))]
    encoder: Option<PathBuf>,
    /// A seed value for the random generator to give pseudo-deterministic
    /// results. Picks the training pairs and the decoder initialization
    #[structopt(long)]
    seed: Option<u64>,
    /// The maximum number of worker threads that can be active at any one
    /// time while running convolution passes. Defaults to the logical core count.
    #[structopt(short = "t", long = "threads")]
    max_threads: Option<usize>,
    /// Disables the progress output
    #[structopt(long)]
    no_progress: bool,
    #[structopt(subcommand)]
    cmd: Subcommand,
}

fn main() {
    if let Err(e) = real_main() {
        if atty::is(atty::Stream::Stderr) {
            eprintln!("\x1b[31merror\x1b[0m: {}", e);
        } else {
            eprintln!("error: {}", e);
        }

        std::process::exit(1);
    }
}

fn real_main() -> Result<(), Error> {
    let args = Opt::from_args();

    match args.cmd {
        Subcommand::Stylize(ref s) => stylize(&args, s),
        Subcommand::Train(ref t) => train(&args, t),
    }
}

fn stylize(args: &Opt, cmd: &Stylize) -> Result<(), Error> {
    // Check that the extension for the path supplied by the user is one of the ones we support
    {
        match args.output_path.extension().and_then(|ext| ext.to_str()) {
            Some("png") | Some("jpg") | Some("bmp") => {}
            None => {}
            Some(other) => return Err(Error::UnsupportedOutputFormat(other.to_owned())),
        }
    }

    let mut sb = Session::builder()
        .content(&cmd.content)
        .style_strength(cmd.strength)
        .decoder_file(&cmd.decoder)
        .seed(args.seed.unwrap_or_default());

    for (i, style) in cmd.styles.iter().enumerate() {
        let weight = cmd.style_weights.get(i).copied().unwrap_or(1.0);
        sb = sb.add_style_weighted(style, weight);
    }

    if let Some(out_size) = cmd.out_size {
        sb = sb.output_size(Dims::new(out_size.0, out_size.1));
    }
    if let Some(in_size) = args.in_size {
        sb = sb.resize_input(Dims::new(in_size.0, in_size.1));
    }
    if let Some(mt) = args.max_threads {
        sb = sb.max_thread_count(mt);
    }
    if let Some(ref encoder) = args.encoder {
        sb = sb.encoder_weights(encoder);
    }

    let stylized = sb.build()?.run();

    if args.output_path.to_str() == Some("-") {
        let out = std::io::stdout();
        let mut out = out.lock();
        stylized.write(&mut out, cmd.out_fmt.clone())?;
    } else {
        // This won't respect the output format specified by the user,
        // only the extension on the path they specify, but that makes
        // more sense, and is probably better than detecting and emitting
        // an error
        stylized.save(&args.output_path)?;
    }

    Ok(())
}

fn train(args: &Opt, cmd: &Train) -> Result<(), Error> {
    let in_size = args.in_size.unwrap_or((256, 256));

    let mut tb = Trainer::builder()
        .add_contents(&cmd.contents)
        .add_styles(&cmd.styles)
        .iterations(cmd.iterations)
        .learning_rate(cmd.learning_rate)
        .style_weight(cmd.style_weight)
        .resize_input(Dims::new(in_size.0, in_size.1))
        .seed(args.seed.unwrap_or_default());

    if let Some(mt) = args.max_threads {
        tb = tb.max_thread_count(mt);
    }
    if let Some(ref encoder) = args.encoder {
        tb = tb.encoder_weights(encoder);
    }
    if let Some(ref resume) = cmd.resume {
        tb = tb.resume_from(resume);
    }
    if let Some(ref dir) = cmd.snapshot_dir {
        tb = tb.snapshot_every(dir, cmd.snapshot_every);
    }

    let progress: Option<Box<dyn style_transfer::TrainingProgress>> = if !args.no_progress {
        Some(Box::new(ProgressOutput::new()))
    } else {
        None
    };

    let trained = tb.build()?.run(progress)?;

    eprintln!(
        "final losses: content {:.5}, style {:.5}",
        trained.content_loss, trained.style_loss
    );

    if args.output_path.to_str() == Some("-") {
        let out = std::io::stdout();
        let mut out = out.lock();
        trained.write(&mut out)?;
    } else {
        trained.save(&args.output_path)?;
    }

    Ok(())
}

use indicatif::{ProgressBar, ProgressStyle};

struct ProgressOutput {
    pb: ProgressBar,
    len: usize,
}

impl ProgressOutput {
    fn new() -> Self {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .progress_chars("##-"),
        );

        Self { pb, len: 100 }
    }
}

impl Drop for ProgressOutput {
    fn drop(&mut self) {
        self.pb.finish();
    }
}

impl style_transfer::TrainingProgress for ProgressOutput {
    fn update(&mut self, update: style_transfer::TrainingUpdate<'_>) {
        if update.iteration.total != self.len {
            self.len = update.iteration.total;
            self.pb.set_length(self.len as u64);
        }

        self.pb.set_position(update.iteration.current as u64);
        self.pb.set_message(&format!(
            "content {:.5} style {:.5}",
            update.content_loss, update.style_loss
        ));
    }
}

fn main() -> Result<(), style_transfer::Error> {
    // set up a training run over a handful of images
    let trainer = style_transfer::Trainer::builder()
        .add_contents(&["imgs/portrait.jpg", "imgs/landscape.jpg"])
        .add_styles(&["imgs/starry-night.jpg", "imgs/the-scream.jpg"])
        // train at a modest resolution, the decoder is fully
        // convolutional so it stylizes any size afterwards
        .resize_input(style_transfer::Dims::square(128))
        .iterations(2000)
        .seed(211)
        // keep intermediate checkpoints around
        .snapshot_every("out/snapshots", 500)
        .build()?;

    // run the optimization, printing the loss curve as it goes
    let trained = trainer.run(Some(Box::new(
        |update: style_transfer::TrainingUpdate<'_>| {
            if update.iteration.current % 100 == 0 {
                println!(
                    "{}/{}: content {:.5} style {:.5}",
                    update.iteration.current,
                    update.iteration.total,
                    update.content_loss,
                    update.style_loss
                );
            }
        },
    )))?;

    // save the decoder for the stylize examples
    trained.save("out/decoder.bin")
}

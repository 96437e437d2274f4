fn main() -> Result<(), Box<dyn std::error::Error>> {
    // create a new session
    let session = style_transfer::Session::builder()
        .content(&"imgs/portrait.jpg")
        // blend the statistics of two styles, two parts to one
        .add_style_weighted(&"imgs/starry-night.jpg", 2.0)
        .add_style_weighted(&"imgs/the-scream.jpg", 1.0)
        // measure the style statistics at a fixed size so the blend
        // doesnt depend on the image resolutions
        .resize_input(style_transfer::Dims::square(256))
        // keep some of the content's own statistics
        .style_strength(0.7)
        .decoder_file("out/decoder.bin")
        .build()?;

    // stylize
    let stylized = session.run();

    // save the image to the disk
    stylized.save("out/02.jpg")?;

    Ok(())
}

fn main() -> Result<(), style_transfer::Error> {
    //create a new session
    let session = style_transfer::Session::builder()
        //the image whose structure we keep
        .content(&"imgs/portrait.jpg")
        //the image whose style we impose
        .add_style(&"imgs/starry-night.jpg")
        //a decoder trained beforehand, see 03_train_decoder
        .decoder_file("out/decoder.bin")
        .build()?;

    //stylize
    let stylized = session.run();

    //save the image to the disk
    stylized.save("out/01.jpg")
}

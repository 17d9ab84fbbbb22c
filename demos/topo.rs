use uvcx::UvcDeviceDesc;

fn main() -> uvcx::Result<()> {
    env_logger::init();

    for desc in uvcx::list()? {
        match list_device(desc) {
            Ok(()) => {}
            Err(e) => {
                eprintln!("error: {}", e);
                eprintln!("(skipping device)");
            }
        }
    }

    Ok(())
}

fn list_device(desc: UvcDeviceDesc) -> uvcx::Result<()> {
    print!("{:04x}:{:04x} ", desc.vendor_id(), desc.product_id());

    let dev = desc.open()?;
    println!(
        "[{}] {}",
        dev.read_manufacturer_string()?,
        dev.read_product_string()?,
    );

    println!("UVC {}", dev.uvc_version());
    println!("{:#?}", dev.topology());

    for intf in dev.streaming_interfaces() {
        println!("streaming interface {:?}:", intf.id());
        for format in intf.formats() {
            println!("  format {:?} ({:?})", format.index(), format.kind());
            for frame in format.frames() {
                println!(
                    "    frame {:?}: {}x{}, default interval {:?}",
                    frame.index(),
                    frame.width(),
                    frame.height(),
                    frame.default_frame_interval(),
                );
            }
        }
    }

    Ok(())
}

use std::{
    sync::mpsc,
    time::{Duration, Instant},
};

use uvcx::{format::FrameFormat, stream::PollTimeout};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let dev = match uvcx::list()?.next() {
        Some(desc) => desc.open()?,
        None => {
            eprintln!("no UVC devices found");
            return Ok(());
        }
    };

    let ctrl = dev.stream_ctrl_for_format_size(FrameFormat::Any, 640, 480, 30)?;
    println!("negotiated: {:?}", ctrl);

    // Callback mode: count frames for two seconds.
    let (tx, rx) = mpsc::channel();
    let mut handle = dev.stream_open(&ctrl)?;
    handle.start_with_callback(move |frame| {
        let _ = tx.send((frame.sequence, frame.data.len()));
    })?;

    let start = Instant::now();
    let mut frames = 0u32;
    let mut bytes = 0usize;
    while start.elapsed() < Duration::from_secs(2) {
        if let Ok((_seq, len)) = rx.recv_timeout(Duration::from_millis(500)) {
            frames += 1;
            bytes += len;
        }
    }
    handle.stop()?;
    println!("callback mode: {} frames, {} bytes in 2s", frames, bytes);

    // Polling mode: fetch ten more frames.
    handle.start()?;
    for _ in 0..10 {
        match handle.get_frame(PollTimeout::After(Duration::from_secs(1))) {
            Ok(Some(frame)) => println!(
                "frame {}: {}x{} {:?}, {} bytes",
                frame.sequence,
                frame.width,
                frame.height,
                frame.format,
                frame.data.len()
            ),
            Ok(None) => {}
            Err(e) => {
                eprintln!("poll failed: {}", e);
                break;
            }
        }
    }
    handle.stop()?;

    Ok(())
}

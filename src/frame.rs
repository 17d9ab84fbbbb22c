//! Assembled video frames and pure frame-to-frame transforms.

use std::time::Instant;

use crate::{
    error::ErrorKind,
    format::FrameFormat,
    Error, Result,
};

/// An image frame assembled from the video stream.
///
/// The buffers are owned by the frame and reused across deliveries; a
/// callback or polling caller that needs to retain the image must copy it
/// (see [`Frame::duplicate`]).
#[derive(Debug, Clone)]
pub struct Frame {
    /// Image data. Length is the number of bytes received for this frame.
    pub data: Vec<u8>,
    /// Width of the image in pixels.
    pub width: u32,
    /// Height of the image in pixels.
    pub height: u32,
    /// Pixel data format.
    pub format: FrameFormat,
    /// Number of bytes per horizontal line (0 for compressed formats).
    pub step: u32,
    /// Frame number. May skip, but is strictly monotonically increasing.
    pub sequence: u32,
    /// Presentation timestamp from the payload header, if the device sent one.
    pub pts: u32,
    /// Source clock reference from the payload header, if the device sent one.
    pub source_clock_reference: u32,
    /// When the last payload of this frame arrived, on the monotonic clock.
    pub capture_time_finished: Option<Instant>,
    /// Vendor/metadata bytes carried in the payload headers of this frame.
    pub metadata: Vec<u8>,
}

impl Frame {
    pub(crate) fn new() -> Self {
        Self {
            data: Vec::new(),
            width: 0,
            height: 0,
            format: FrameFormat::Unknown,
            step: 0,
            sequence: 0,
            pts: 0,
            source_clock_reference: 0,
            capture_time_finished: None,
            metadata: Vec::new(),
        }
    }

    /// Returns an owned copy of this frame.
    pub fn duplicate(&self) -> Frame {
        self.clone()
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

fn expect_format(frame: &Frame, format: FrameFormat) -> Result<()> {
    if frame.format != format {
        return Err(Error::msg(
            ErrorKind::InvalidParam,
            format!("expected a {:?} frame, got {:?}", format, frame.format),
        ));
    }
    Ok(())
}

fn prepare_rgb_out(frame: &Frame, out: &mut Frame, bytes_per_pixel: u32, format: FrameFormat) {
    out.width = frame.width;
    out.height = frame.height;
    out.format = format;
    out.step = frame.width * bytes_per_pixel;
    out.sequence = frame.sequence;
    out.pts = frame.pts;
    out.source_clock_reference = frame.source_clock_reference;
    out.capture_time_finished = frame.capture_time_finished;
    out.data.clear();
    out.data
        .reserve((out.step * out.height) as usize);
}

fn clamp8(v: i32) -> u8 {
    v.max(0).min(255) as u8
}

/// BT.601 YUV to RGB, as used for the packed 4:2:2 formats.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;

    [
        clamp8((298 * c + 409 * e + 128) >> 8),
        clamp8((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp8((298 * c + 516 * d + 128) >> 8),
    ]
}

fn yuv_to_bgr(y: u8, u: u8, v: u8) -> [u8; 3] {
    let [r, g, b] = yuv_to_rgb(y, u, v);
    [b, g, r]
}

fn convert_422(
    frame: &Frame,
    out: &mut Frame,
    out_format: FrameFormat,
    luma_first: bool,
    pixel: fn(u8, u8, u8) -> [u8; 3],
) -> Result<()> {
    prepare_rgb_out(frame, out, 3, out_format);

    for quad in frame.data.chunks_exact(4) {
        let (y0, u, y1, v) = if luma_first {
            (quad[0], quad[1], quad[2], quad[3])
        } else {
            (quad[1], quad[0], quad[3], quad[2])
        };
        out.data.extend_from_slice(&pixel(y0, u, v));
        out.data.extend_from_slice(&pixel(y1, u, v));
    }

    Ok(())
}

/// Converts a YUYV frame to RGB.
pub fn yuyv2rgb(frame: &Frame, out: &mut Frame) -> Result<()> {
    expect_format(frame, FrameFormat::Yuyv)?;
    convert_422(frame, out, FrameFormat::Rgb, true, yuv_to_rgb)
}

/// Converts a YUYV frame to BGR.
pub fn yuyv2bgr(frame: &Frame, out: &mut Frame) -> Result<()> {
    expect_format(frame, FrameFormat::Yuyv)?;
    convert_422(frame, out, FrameFormat::Bgr, true, yuv_to_bgr)
}

/// Converts a UYVY frame to RGB.
pub fn uyvy2rgb(frame: &Frame, out: &mut Frame) -> Result<()> {
    expect_format(frame, FrameFormat::Uyvy)?;
    convert_422(frame, out, FrameFormat::Rgb, false, yuv_to_rgb)
}

/// Converts a UYVY frame to BGR.
pub fn uyvy2bgr(frame: &Frame, out: &mut Frame) -> Result<()> {
    expect_format(frame, FrameFormat::Uyvy)?;
    convert_422(frame, out, FrameFormat::Bgr, false, yuv_to_bgr)
}

/// Converts an 8-bit greyscale frame to RGB.
pub fn gray2rgb(frame: &Frame, out: &mut Frame) -> Result<()> {
    expect_format(frame, FrameFormat::Gray8)?;
    prepare_rgb_out(frame, out, 3, FrameFormat::Rgb);
    for &y in &frame.data {
        out.data.extend_from_slice(&[y, y, y]);
    }
    Ok(())
}

/// Decodes an MJPEG frame to RGB.
#[cfg(feature = "jpeg")]
pub fn mjpeg2rgb(frame: &Frame, out: &mut Frame) -> Result<()> {
    expect_format(frame, FrameFormat::Mjpeg)?;

    let image = image::load_from_memory_with_format(&frame.data, image::ImageFormat::Jpeg)
        .map_err(|e| Error::msg(ErrorKind::Other, format!("JPEG decode failed: {}", e)))?
        .to_rgb8();

    prepare_rgb_out(frame, out, 3, FrameFormat::Rgb);
    out.width = image.width();
    out.height = image.height();
    out.step = image.width() * 3;
    out.data.extend_from_slice(image.as_raw());
    Ok(())
}

/// Converts any supported uncompressed frame to RGB.
pub fn any2rgb(frame: &Frame, out: &mut Frame) -> Result<()> {
    match frame.format {
        FrameFormat::Yuyv => yuyv2rgb(frame, out),
        FrameFormat::Uyvy => uyvy2rgb(frame, out),
        FrameFormat::Gray8 => gray2rgb(frame, out),
        #[cfg(feature = "jpeg")]
        FrameFormat::Mjpeg => mjpeg2rgb(frame, out),
        FrameFormat::Rgb => {
            *out = frame.duplicate();
            Ok(())
        }
        other => Err(Error::msg(
            ErrorKind::NotSupported,
            format!("no RGB conversion for {:?}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yuyv_frame(data: Vec<u8>, width: u32, height: u32) -> Frame {
        Frame {
            width,
            height,
            format: FrameFormat::Yuyv,
            step: width * 2,
            data,
            ..Frame::new()
        }
    }

    #[test]
    fn yuyv_grey_pixels_convert_to_grey_rgb() {
        // Y=128 with neutral chroma is mid grey.
        let frame = yuyv_frame(vec![128, 128, 128, 128], 2, 1);
        let mut out = Frame::new();
        yuyv2rgb(&frame, &mut out).unwrap();

        assert_eq!(out.format, FrameFormat::Rgb);
        assert_eq!(out.step, 6);
        assert_eq!(out.data.len(), 6);
        for &channel in &out.data {
            assert!((129..=132).contains(&channel), "channel {}", channel);
        }
    }

    #[test]
    fn bgr_mirrors_rgb() {
        let frame = yuyv_frame(vec![81, 90, 81, 240], 2, 1); // red-ish
        let mut rgb = Frame::new();
        let mut bgr = Frame::new();
        yuyv2rgb(&frame, &mut rgb).unwrap();
        yuyv2bgr(&frame, &mut bgr).unwrap();

        assert_eq!(rgb.data[0], bgr.data[2]);
        assert_eq!(rgb.data[1], bgr.data[1]);
        assert_eq!(rgb.data[2], bgr.data[0]);
    }

    #[test]
    fn conversion_rejects_wrong_format() {
        let mut frame = yuyv_frame(vec![0; 4], 2, 1);
        frame.format = FrameFormat::Mjpeg;
        let mut out = Frame::new();
        assert_eq!(
            yuyv2rgb(&frame, &mut out).unwrap_err().kind(),
            ErrorKind::InvalidParam
        );
    }
}

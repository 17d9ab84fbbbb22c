//! Frame format registry.
//!
//! Stream format descriptors identify their pixel layout with a 16-byte GUID.
//! This module maps between those GUIDs and the transport-independent
//! [`FrameFormat`] tags, including the abstract groupings (`Any`,
//! `Uncompressed`, `Compressed`) that match any of their child formats.

/// Pixel layout of a video stream, independent of the USB transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FrameFormat {
    /// GUID not known to the registry.
    Unknown,
    /// Any supported format.
    Any,
    /// Any uncompressed format.
    Uncompressed,
    /// Any compressed format.
    Compressed,
    /// YUV 4:2:2 interleaved, Y-U-Y-V byte order.
    Yuyv,
    /// YUV 4:2:2 interleaved, U-Y-V-Y byte order.
    Uyvy,
    /// 8-bit greyscale.
    Gray8,
    /// 16-bit greyscale.
    Gray16,
    /// Planar YUV 4:2:0 with interleaved chroma.
    Nv12,
    /// 10-bit planar YUV 4:2:0 in 16-bit containers.
    P010,
    /// 24-bit BGR.
    Bgr,
    /// 24-bit RGB.
    Rgb,
    /// Motion-JPEG.
    Mjpeg,
    /// H.264 elementary stream.
    H264,
    /// 8-bit Bayer, GRBG order.
    Sgrbg8,
    /// 8-bit Bayer, GBRG order.
    Sgbrg8,
    /// 8-bit Bayer, RGGB order.
    Srggb8,
    /// 8-bit Bayer, BGGR order.
    Sbggr8,
}

impl FrameFormat {
    /// Bytes per horizontal line of a frame with the given width.
    ///
    /// Zero for compressed and unknown formats, where no fixed line stride
    /// exists.
    pub fn step_for_width(self, width: u32) -> u32 {
        match self {
            FrameFormat::Bgr | FrameFormat::Rgb => width * 3,
            FrameFormat::Yuyv | FrameFormat::Uyvy | FrameFormat::P010 => width * 2,
            FrameFormat::Nv12 => width,
            _ => 0,
        }
    }
}

/// The tail shared by the four-CC based format GUIDs.
const FOURCC_TAIL: [u8; 12] = [
    0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xaa, 0x00, 0x38, 0x9b, 0x71,
];

const fn fourcc_guid(cc: [u8; 4]) -> [u8; 16] {
    [
        cc[0],
        cc[1],
        cc[2],
        cc[3],
        FOURCC_TAIL[0],
        FOURCC_TAIL[1],
        FOURCC_TAIL[2],
        FOURCC_TAIL[3],
        FOURCC_TAIL[4],
        FOURCC_TAIL[5],
        FOURCC_TAIL[6],
        FOURCC_TAIL[7],
        FOURCC_TAIL[8],
        FOURCC_TAIL[9],
        FOURCC_TAIL[10],
        FOURCC_TAIL[11],
    ]
}

pub(crate) const GUID_YUYV: [u8; 16] = fourcc_guid(*b"YUY2");
const GUID_UYVY: [u8; 16] = fourcc_guid(*b"UYVY");
const GUID_GRAY8: [u8; 16] = fourcc_guid(*b"Y800");
const GUID_GRAY16: [u8; 16] = fourcc_guid(*b"Y16 ");
const GUID_NV12: [u8; 16] = fourcc_guid(*b"NV12");
const GUID_P010: [u8; 16] = fourcc_guid(*b"P010");
const GUID_MJPEG: [u8; 16] = fourcc_guid(*b"MJPG");
const GUID_H264: [u8; 16] = fourcc_guid(*b"H264");
const GUID_SGRBG8: [u8; 16] = fourcc_guid(*b"GRBG");
const GUID_SGBRG8: [u8; 16] = fourcc_guid(*b"GBRG");
const GUID_SRGGB8: [u8; 16] = fourcc_guid(*b"RGGB");
const GUID_SBGGR8: [u8; 16] = fourcc_guid(*b"BA81");
const GUID_BGR: [u8; 16] = [
    0x7d, 0xeb, 0x36, 0xe4, 0x4f, 0x52, 0xce, 0x11, 0x9f, 0x53, 0x00, 0x20, 0xaf, 0x0b, 0xa7, 0x70,
];
const GUID_RGB: [u8; 16] = [
    0x7e, 0xeb, 0x36, 0xe4, 0x4f, 0x52, 0xce, 0x11, 0x9f, 0x53, 0x00, 0x20, 0xaf, 0x0b, 0xa7, 0x70,
];

struct FormatTableEntry {
    format: FrameFormat,
    is_abstract: bool,
    guid: [u8; 16],
    children: &'static [FrameFormat],
}

const LEAF: &[FrameFormat] = &[];

/// Read-only format DAG, rooted at `Any`. Abstract entries carry a zero GUID
/// and match through their children; leaf entries have a unique GUID.
static FORMAT_TABLE: &[FormatTableEntry] = &[
    FormatTableEntry {
        format: FrameFormat::Any,
        is_abstract: true,
        guid: [0; 16],
        children: &[FrameFormat::Uncompressed, FrameFormat::Compressed],
    },
    FormatTableEntry {
        format: FrameFormat::Uncompressed,
        is_abstract: true,
        guid: [0; 16],
        children: &[
            FrameFormat::Yuyv,
            FrameFormat::Uyvy,
            FrameFormat::Gray8,
            FrameFormat::Gray16,
            FrameFormat::Nv12,
            FrameFormat::P010,
            FrameFormat::Bgr,
            FrameFormat::Rgb,
            FrameFormat::Sgrbg8,
            FrameFormat::Sgbrg8,
            FrameFormat::Srggb8,
            FrameFormat::Sbggr8,
        ],
    },
    FormatTableEntry {
        format: FrameFormat::Compressed,
        is_abstract: true,
        guid: [0; 16],
        children: &[FrameFormat::Mjpeg, FrameFormat::H264],
    },
    FormatTableEntry {
        format: FrameFormat::Yuyv,
        is_abstract: false,
        guid: GUID_YUYV,
        children: LEAF,
    },
    FormatTableEntry {
        format: FrameFormat::Uyvy,
        is_abstract: false,
        guid: GUID_UYVY,
        children: LEAF,
    },
    FormatTableEntry {
        format: FrameFormat::Gray8,
        is_abstract: false,
        guid: GUID_GRAY8,
        children: LEAF,
    },
    FormatTableEntry {
        format: FrameFormat::Gray16,
        is_abstract: false,
        guid: GUID_GRAY16,
        children: LEAF,
    },
    FormatTableEntry {
        format: FrameFormat::Nv12,
        is_abstract: false,
        guid: GUID_NV12,
        children: LEAF,
    },
    FormatTableEntry {
        format: FrameFormat::P010,
        is_abstract: false,
        guid: GUID_P010,
        children: LEAF,
    },
    FormatTableEntry {
        format: FrameFormat::Bgr,
        is_abstract: false,
        guid: GUID_BGR,
        children: LEAF,
    },
    FormatTableEntry {
        format: FrameFormat::Rgb,
        is_abstract: false,
        guid: GUID_RGB,
        children: LEAF,
    },
    FormatTableEntry {
        format: FrameFormat::Mjpeg,
        is_abstract: false,
        guid: GUID_MJPEG,
        children: LEAF,
    },
    FormatTableEntry {
        format: FrameFormat::H264,
        is_abstract: false,
        guid: GUID_H264,
        children: LEAF,
    },
    FormatTableEntry {
        format: FrameFormat::Sgrbg8,
        is_abstract: false,
        guid: GUID_SGRBG8,
        children: LEAF,
    },
    FormatTableEntry {
        format: FrameFormat::Sgbrg8,
        is_abstract: false,
        guid: GUID_SGBRG8,
        children: LEAF,
    },
    FormatTableEntry {
        format: FrameFormat::Srggb8,
        is_abstract: false,
        guid: GUID_SRGGB8,
        children: LEAF,
    },
    FormatTableEntry {
        format: FrameFormat::Sbggr8,
        is_abstract: false,
        guid: GUID_SBGGR8,
        children: LEAF,
    },
];

impl FormatTableEntry {
    fn guid_eq(&self, guid: &[u8; 16]) -> bool {
        if self.format == FrameFormat::Mjpeg {
            // MJPEG descriptors only agree on the four-CC; the tail varies
            // between devices.
            self.guid[..4] == guid[..4]
        } else {
            &self.guid == guid
        }
    }
}

fn entry(format: FrameFormat) -> Option<&'static FormatTableEntry> {
    FORMAT_TABLE.iter().find(|e| e.format == format)
}

/// Whether `format` covers the given format descriptor GUID.
///
/// A concrete format matches its own GUID; an abstract format matches if any
/// transitive child does. The table is a DAG rooted at [`FrameFormat::Any`],
/// so the recursion terminates.
pub fn guid_matches(format: FrameFormat, guid: &[u8; 16]) -> bool {
    let entry = match entry(format) {
        Some(e) => e,
        None => return false,
    };

    if !entry.is_abstract && entry.guid_eq(guid) {
        return true;
    }

    entry.children.iter().any(|&c| guid_matches(c, guid))
}

/// Looks up the concrete format tag for a descriptor GUID.
pub fn format_for_guid(guid: &[u8; 16]) -> FrameFormat {
    FORMAT_TABLE
        .iter()
        .find(|e| !e.is_abstract && e.guid_eq(guid))
        .map(|e| e.format)
        .unwrap_or(FrameFormat::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concrete_guids_round_trip() {
        for entry in FORMAT_TABLE.iter().filter(|e| !e.is_abstract) {
            let found = format_for_guid(&entry.guid);
            assert_eq!(found, entry.format);
            assert!(guid_matches(found, &entry.guid));
        }
    }

    #[test]
    fn abstract_formats_match_children() {
        assert!(guid_matches(FrameFormat::Uncompressed, &GUID_YUYV));
        assert!(guid_matches(FrameFormat::Any, &GUID_YUYV));
        assert!(guid_matches(FrameFormat::Compressed, &GUID_MJPEG));
        assert!(guid_matches(FrameFormat::Any, &GUID_H264));
        assert!(!guid_matches(FrameFormat::Compressed, &GUID_YUYV));
        assert!(!guid_matches(FrameFormat::Uncompressed, &GUID_MJPEG));
    }

    #[test]
    fn mjpeg_matches_on_prefix_only() {
        let mut odd_tail = GUID_MJPEG;
        odd_tail[10] = 0xff;
        odd_tail[15] = 0x01;
        assert_eq!(format_for_guid(&odd_tail), FrameFormat::Mjpeg);
        assert!(guid_matches(FrameFormat::Mjpeg, &odd_tail));
    }

    #[test]
    fn unknown_guid_maps_to_unknown() {
        let garbage = [0xde; 16];
        assert_eq!(format_for_guid(&garbage), FrameFormat::Unknown);
        assert!(!guid_matches(FrameFormat::Any, &garbage));
    }

    #[test]
    fn step_follows_format() {
        assert_eq!(FrameFormat::Rgb.step_for_width(640), 1920);
        assert_eq!(FrameFormat::Yuyv.step_for_width(640), 1280);
        assert_eq!(FrameFormat::Nv12.step_for_width(640), 640);
        assert_eq!(FrameFormat::Mjpeg.step_for_width(640), 0);
    }
}

use std::io;

use byteorder::{ReadBytesExt, LE};
use rusb::{Interface, InterfaceDescriptor};

use crate::{
    error::*,
    util::{io_err, io_err_res, split_descriptors, BcdVersion, BytesExt},
    Result,
};

use super::*;

/// The value of `bDescriptorType` of all descriptors we're interested in.
const VIDEO_INTERFACE_DESC_TYPE: u8 = 36;

/// SuperSpeed endpoint companion descriptor type.
const SS_ENDPOINT_COMPANION_DESC_TYPE: u8 = 48;

const CONTROL_DESC_SUBTYPE_HEADER: u8 = 0x01;
const CONTROL_DESC_SUBTYPE_INPUT_TERM: u8 = 0x02;
const CONTROL_DESC_SUBTYPE_OUTPUT_TERMINAL: u8 = 0x03;
const CONTROL_DESC_SUBTYPE_SELECTOR_UNIT: u8 = 0x04;
const CONTROL_DESC_SUBTYPE_PROCESSING_UNIT: u8 = 0x05;
const CONTROL_DESC_SUBTYPE_EXTENSION_UNIT: u8 = 0x06;
const CONTROL_DESC_SUBTYPE_ENCODING_UNIT: u8 = 0x07;

const STREAM_DESC_SUBTYPE_INPUT_HEADER: u8 = 0x01;
const STREAM_DESC_SUBTYPE_OUTPUT_HEADER: u8 = 0x02;
const STREAM_DESC_SUBTYPE_STILL_IMAGE_FRAME: u8 = 0x03;
const STREAM_DESC_SUBTYPE_FORMAT_UNCOMPRESSED: u8 = 0x04;
const STREAM_DESC_SUBTYPE_FRAME_UNCOMPRESSED: u8 = 0x05;
const STREAM_DESC_SUBTYPE_FORMAT_MJPEG: u8 = 0x06;
const STREAM_DESC_SUBTYPE_FRAME_MJPEG: u8 = 0x07;
const STREAM_DESC_SUBTYPE_FORMAT_MPEG2TS: u8 = 0x0A;
const STREAM_DESC_SUBTYPE_FORMAT_DV: u8 = 0x0C;
const STREAM_DESC_SUBTYPE_COLORFORMAT: u8 = 0x0D;
const STREAM_DESC_SUBTYPE_FORMAT_FRAME_BASED: u8 = 0x10;
const STREAM_DESC_SUBTYPE_FRAME_FRAME_BASED: u8 = 0x11;
const STREAM_DESC_SUBTYPE_FORMAT_STREAM_BASED: u8 = 0x12;
const STREAM_DESC_SUBTYPE_FORMAT_H264: u8 = 0x13;
const STREAM_DESC_SUBTYPE_FRAME_H264: u8 = 0x14;
const STREAM_DESC_SUBTYPE_FORMAT_H264_SIMULCAST: u8 = 0x15;
const STREAM_DESC_SUBTYPE_FORMAT_VP8: u8 = 0x16;
const STREAM_DESC_SUBTYPE_FRAME_VP8: u8 = 0x17;
const STREAM_DESC_SUBTYPE_FORMAT_VP8_SIMULCAST: u8 = 0x18;

/// The MJPEG format descriptor carries no GUID; the registry one is
/// synthesized so GUID-based lookups treat all sources alike.
const MJPEG_GUID: [u8; 16] = [
    b'M', b'J', b'P', b'G', 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xaa, 0x00, 0x38, 0x9b, 0x71,
];

pub(crate) fn parse_control_desc(desc: &InterfaceDescriptor<'_>) -> Result<Topology> {
    parse_control_extra(desc.extra())
}

pub(crate) fn parse_control_extra(extra: &[u8]) -> Result<Topology> {
    let mut parser = ControlDescParser {
        header: None,
        units: Vec::new(),
        inputs: Vec::new(),
        outputs: Vec::new(),
    };
    for (ty, data) in split_descriptors(extra) {
        if ty == VIDEO_INTERFACE_DESC_TYPE {
            parser
                .parse_descriptor(&data[2..])
                .during(Action::AccessingDeviceDescriptor)?;
        } else {
            log::debug!("skipping descriptor of type {}", ty);
        }
    }

    // FIXME: the interrupt endpoint descriptor also carries custom data according to the spec,
    // however it is absent on some devices (or `lsusb` doesn't display it)

    let header = match parser.header {
        Some(header) => header,
        None => {
            return err(
                ErrorKind::InvalidDevice,
                "missing VC_HEADER descriptor",
                Action::AccessingDeviceDescriptor,
            );
        }
    };

    Ok(Topology {
        header,
        units: parser.units,
        inputs: parser.inputs,
        outputs: parser.outputs,
    })
}

struct ControlDescParser {
    header: Option<ControlHeader>,
    units: Vec<UnitDesc>,
    inputs: Vec<InputTerminalDesc>,
    outputs: Vec<OutputTerminalDesc>,
}

impl ControlDescParser {
    fn parse_descriptor(&mut self, raw: &[u8]) -> io::Result<()> {
        match self.parse_descriptor_impl(raw) {
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                log::warn!(
                    "UVC descriptor too short, please report a bug to the device manufacturer"
                );
                log::debug!("retrying with 100 extra zero bytes");
                log::debug!("descriptor data: {:02x?}", raw);

                let mut buf = vec![0; raw.len() + 100];
                buf[..raw.len()].copy_from_slice(raw);

                self.parse_descriptor_impl(&buf)
            }
            res => res,
        }
    }

    fn parse_descriptor_impl(&mut self, mut raw: &[u8]) -> io::Result<()> {
        let subtype = raw.read_u8()?;
        match subtype {
            CONTROL_DESC_SUBTYPE_HEADER => {
                if self.header.is_some() {
                    return io_err_res("duplicate VC_HEADER descriptor");
                }

                self.header = Some(ControlHeader {
                    uvc_version: BcdVersion(raw.read_u16::<LE>()?),
                    total_len: raw.read_u16::<LE>()?,
                    clock_freq_hz: raw.read_u32::<LE>()?,
                    streaming_interfaces: {
                        let count = raw.read_u8()?;
                        (0..count)
                            .map(|_| raw.read_u8())
                            .collect::<io::Result<Vec<_>>>()?
                    },
                });

                Ok(())
            }
            CONTROL_DESC_SUBTYPE_INPUT_TERM => {
                let mut term = InputTerminalDesc {
                    term_id: TermId::new(raw.read_u8()?).ok_or_else(|| {
                        io_err("bTerminalID is 0, only non-zero numbers are allowed")
                    })?,
                    term_type: raw.read_u16::<LE>()?,
                    assoc: TermId::new(raw.read_u8()?),
                    string: raw.read_u8()?,
                    kind: InputTerminalKind::Other,
                };
                if term.terminal_type() == Some(InputTerminalType::InCamera) {
                    term.kind = InputTerminalKind::Camera(CameraTerminalDesc {
                        objective_focal_length_min: raw.read_u16::<LE>()?,
                        objective_focal_length_max: raw.read_u16::<LE>()?,
                        ocular_focal_length: raw.read_u16::<LE>()?,
                        controls: CameraControls::from_bits_truncate(
                            raw.read_length_prefixed_bitmask()?,
                        ),
                    });
                }

                self.inputs.push(term);

                Ok(())
            }
            CONTROL_DESC_SUBTYPE_OUTPUT_TERMINAL => {
                self.outputs.push(OutputTerminalDesc {
                    term_id: raw.read_nonzero_term_id()?,
                    term_type: raw.read_u16::<LE>()?,
                    assoc: TermId::new(raw.read_u8()?),
                    source: raw.read_nonzero_source_id()?,
                    string: raw.read_u8()?,
                });
                Ok(())
            }
            CONTROL_DESC_SUBTYPE_SELECTOR_UNIT => {
                self.units.push(UnitDesc {
                    kind: UnitKind::Selector(SelectorUnitDesc {
                        id: SelectorUnitId(raw.read_nonzero_unit_id()?),
                        inputs: {
                            let num = raw.read_u8()?;
                            (0..num)
                                .map(|_| raw.read_nonzero_source_id())
                                .collect::<io::Result<Vec<_>>>()?
                        },
                    }),
                });
                Ok(())
            }
            CONTROL_DESC_SUBTYPE_PROCESSING_UNIT => {
                // Some firmware ships this descriptor one byte short (missing
                // `bmVideoStandards`); the zero-padding retry in
                // `parse_descriptor` absorbs that.

                self.units.push(UnitDesc {
                    kind: UnitKind::Processing(ProcessingUnitDesc {
                        id: ProcessingUnitId(raw.read_nonzero_unit_id()?),
                        source: raw.read_nonzero_source_id()?,
                        max_multiplier: raw.read_u16::<LE>()?,
                        controls: ProcessingUnitControls::from_bits_truncate(
                            raw.read_length_prefixed_bitmask()?,
                        ),
                        string: raw.read_u8()?,
                        standards: VideoStandards::from_bits_truncate(raw.read_u8()?),
                    }),
                });
                Ok(())
            }
            CONTROL_DESC_SUBTYPE_EXTENSION_UNIT => {
                self.units.push(UnitDesc {
                    kind: UnitKind::Extension(ExtensionUnitDesc {
                        id: ExtensionUnitId(raw.read_nonzero_unit_id()?),
                        extension_code: raw.read_guid()?,
                        num_controls: raw.read_u8()?,
                        inputs: {
                            let count = raw.read_u8()?;
                            (0..count)
                                .map(|_| raw.read_nonzero_source_id())
                                .collect::<io::Result<Vec<_>>>()?
                        },
                        controls_bitmap: {
                            let size = raw.read_u8()?;
                            (0..size)
                                .map(|_| raw.read_u8())
                                .collect::<io::Result<Vec<_>>>()?
                        },
                    }),
                });
                Ok(())
            }
            CONTROL_DESC_SUBTYPE_ENCODING_UNIT => {
                // TODO
                io_err_res(format!("unimplemented descriptor subtype {}", subtype))
            }
            _ => io_err_res(format!("invalid/unknown descriptor subtype {}", subtype)),
        }
    }
}

pub(crate) fn parse_streaming_interface(intf: &Interface<'_>) -> Result<StreamingInterfaceDesc> {
    let mut descriptors = intf.descriptors();
    let first = match descriptors.next() {
        Some(desc) => desc,
        None => {
            return err(
                ErrorKind::InvalidDevice,
                "streaming interface with no descriptors",
                Action::AccessingDeviceDescriptor,
            )
        }
    };

    let mut altsettings = vec![parse_altsetting(&first)];
    for desc in descriptors {
        altsettings.push(parse_altsetting(&desc));
    }

    parse_streaming_extra(first.interface_number(), first.extra(), altsettings)
}

fn parse_altsetting(desc: &InterfaceDescriptor<'_>) -> AltSettingDesc {
    AltSettingDesc {
        alt_setting: desc.setting_number(),
        endpoints: desc
            .endpoint_descriptors()
            .map(|ep| EndpointDesc {
                address: ep.address(),
                max_packet_size: ep.max_packet_size(),
                ss_bytes_per_interval: ep.extra().and_then(parse_ss_companion),
            })
            .collect(),
    }
}

fn parse_ss_companion(extra: &[u8]) -> Option<u16> {
    split_descriptors(extra).find_map(|(ty, data)| {
        if ty == SS_ENDPOINT_COMPANION_DESC_TYPE && data.len() >= 6 {
            // bLength, bDescriptorType, bMaxBurst, bmAttributes, wBytesPerInterval
            Some(u16::from_le_bytes([data[4], data[5]]))
        } else {
            None
        }
    })
}

pub(crate) fn parse_streaming_extra(
    interface_number: u8,
    extra: &[u8],
    altsettings: Vec<AltSettingDesc>,
) -> Result<StreamingInterfaceDesc> {
    let mut parser = StreamingDescParser {
        in_header: None,
        formats: Vec::new(),
    };

    for (ty, data) in split_descriptors(extra) {
        if ty != VIDEO_INTERFACE_DESC_TYPE {
            log::debug!("skipping descriptor of type {}", ty);
            continue;
        }

        // Host-to-device video is not modeled; an output header makes the
        // whole interface unusable.
        if data.get(2) == Some(&STREAM_DESC_SUBTYPE_OUTPUT_HEADER) {
            return err(
                ErrorKind::InvalidDevice,
                "output Video Streaming interfaces are not supported",
                Action::AccessingDeviceDescriptor,
            );
        }

        parser
            .parse_descriptor(&data[2..])
            .during(Action::AccessingDeviceDescriptor)?;
    }

    let header = match parser.in_header {
        Some(header) => header,
        None => {
            return err(
                ErrorKind::InvalidDevice,
                "missing input header in Video Streaming interface",
                Action::AccessingDeviceDescriptor,
            )
        }
    };

    Ok(StreamingInterfaceDesc {
        id: StreamingInterfaceId(interface_number),
        header,
        formats: parser.formats,
        altsettings,
    })
}

struct StreamingDescParser {
    in_header: Option<InputHeader>,
    formats: Vec<FormatDesc>,
}

impl StreamingDescParser {
    fn parse_descriptor(&mut self, raw: &[u8]) -> io::Result<()> {
        match self.parse_descriptor_impl(raw) {
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                log::warn!(
                    "UVC Video Streaming interface descriptor too short, please report a bug to the device manufacturer"
                );
                log::debug!("retrying with 100 extra zero bytes");
                log::debug!("descriptor data: {:#04x?}", raw);

                let mut buf = vec![0; raw.len() + 100];
                buf[..raw.len()].copy_from_slice(raw);

                self.parse_descriptor_impl(&buf)
            }
            res => res,
        }
    }

    /// Frame descriptors attach to the format descriptor that precedes them.
    fn current_format(&mut self) -> io::Result<&mut FormatDesc> {
        self.formats
            .last_mut()
            .ok_or_else(|| io_err("frame descriptor without a preceding format descriptor"))
    }

    fn parse_descriptor_impl(&mut self, mut raw: &[u8]) -> io::Result<()> {
        let subtype = raw.read_u8()?;
        match subtype {
            STREAM_DESC_SUBTYPE_INPUT_HEADER => {
                if self.in_header.is_some() {
                    return io_err_res("duplicate input header descriptor");
                }

                let num_formats = raw.read_u8()?;
                self.in_header = Some(InputHeader {
                    num_formats,
                    total_length: raw.read_u16::<LE>()?,
                    endpoint_address: raw.read_u8()?,
                    info: InputInterfaceInfo::from_bits_truncate(raw.read_u8()?),
                    terminal_link: raw.read_nonzero_term_id()?,
                    still_capture_method: {
                        let raw = raw.read_u8()?;
                        StillCaptureMethod::from_raw(raw).unwrap_or_else(|| {
                            log::warn!("invalid value {} for `bStillCaptureMethod`", raw);
                            StillCaptureMethod::None
                        })
                    },
                    trigger_support: {
                        let raw = raw.read_u8()?;
                        TriggerSupport::from_raw(raw).unwrap_or_else(|| {
                            log::warn!("invalid value {} for `bTriggerSupport`", raw);
                            TriggerSupport::NotSupported
                        })
                    },
                    trigger_usage: {
                        let raw = raw.read_u8()?;
                        TriggerUsage::from_raw(raw).unwrap_or_else(|| {
                            log::warn!("invalid value {} for `bTriggerUsage`", raw);
                            TriggerUsage::InitiateStillImageCapture
                        })
                    },
                    format_controls: {
                        let control_size = raw.read_u8()?;

                        // This is `num_format` units with `control_size` bytes each.
                        (0..num_formats)
                            .map(|_| {
                                raw.read_bitmask(control_size)
                                    .map(|bits| PerFormatControls::from_bits_truncate(bits))
                            })
                            .collect::<io::Result<Vec<_>>>()?
                    },
                });
                Ok(())
            }
            STREAM_DESC_SUBTYPE_FORMAT_UNCOMPRESSED => {
                let format_index = FormatIndex(raw.read_u8()?);
                let _num_frame_descriptors = raw.read_u8()?;
                self.formats.push(FormatDesc {
                    format_index,
                    kind: FormatKind::Uncompressed,
                    guid: raw.read_format_guid()?,
                    bits_per_pixel: raw.read_u8()?,
                    default_frame_index: FrameIndex(raw.read_u8()?),
                    frames: Vec::new(),
                });
                // Remaining fields (aspect ratio, interlace flags, copy
                // protect) are not used by the streaming pipeline.
                Ok(())
            }
            STREAM_DESC_SUBTYPE_FRAME_UNCOMPRESSED | STREAM_DESC_SUBTYPE_FRAME_MJPEG => {
                let frame = FrameDesc {
                    frame_index: FrameIndex(raw.read_u8()?),
                    capabilities: FrameCapabilities::from_bits_truncate(raw.read_u8()?),
                    width: raw.read_u16::<LE>()?,
                    height: raw.read_u16::<LE>()?,
                    min_bit_rate: raw.read_u32::<LE>()?,
                    max_bit_rate: raw.read_u32::<LE>()?,
                    max_video_frame_buffer_size: raw.read_u32::<LE>()?,
                    default_frame_interval: raw.read_interval_100ns()?,
                    intervals: read_intervals(&mut raw)?,
                };
                self.current_format()?.frames.push(frame);
                Ok(())
            }
            STREAM_DESC_SUBTYPE_FORMAT_MJPEG => {
                self.formats.push(FormatDesc {
                    format_index: FormatIndex(raw.read_u8()?),
                    kind: FormatKind::Mjpeg,
                    guid: {
                        let _num = raw.read_u8()?;
                        let _flags = raw.read_u8()?;
                        MJPEG_GUID
                    },
                    bits_per_pixel: 0,
                    default_frame_index: FrameIndex(raw.read_u8()?),
                    frames: Vec::new(),
                });
                Ok(())
            }
            STREAM_DESC_SUBTYPE_FORMAT_FRAME_BASED => {
                self.formats.push(FormatDesc {
                    format_index: FormatIndex(raw.read_u8()?),
                    kind: FormatKind::FrameBased,
                    guid: {
                        let _num = raw.read_u8()?;
                        raw.read_format_guid()?
                    },
                    bits_per_pixel: raw.read_u8()?,
                    default_frame_index: FrameIndex(raw.read_u8()?),
                    frames: Vec::new(),
                });
                Ok(())
            }
            STREAM_DESC_SUBTYPE_FRAME_FRAME_BASED => {
                // Frame-based frame descriptors carry no
                // dwMaxVideoFrameBufferSize; the probe/commit response is the
                // only source of the frame size for these formats.
                let frame_index = FrameIndex(raw.read_u8()?);
                let capabilities = FrameCapabilities::from_bits_truncate(raw.read_u8()?);
                let width = raw.read_u16::<LE>()?;
                let height = raw.read_u16::<LE>()?;
                let min_bit_rate = raw.read_u32::<LE>()?;
                let max_bit_rate = raw.read_u32::<LE>()?;
                let default_frame_interval = raw.read_interval_100ns()?;
                let interval_type = raw.read_u8()?;
                let _bytes_per_line = raw.read_u32::<LE>()?;
                let intervals = read_intervals_of_type(&mut raw, interval_type)?;

                let frame = FrameDesc {
                    frame_index,
                    capabilities,
                    width,
                    height,
                    min_bit_rate,
                    max_bit_rate,
                    max_video_frame_buffer_size: 0,
                    default_frame_interval,
                    intervals,
                };
                self.current_format()?.frames.push(frame);
                Ok(())
            }
            STREAM_DESC_SUBTYPE_STILL_IMAGE_FRAME | STREAM_DESC_SUBTYPE_COLORFORMAT => {
                // Not needed by the streaming pipeline; ignore.
                Ok(())
            }
            STREAM_DESC_SUBTYPE_FORMAT_MPEG2TS
            | STREAM_DESC_SUBTYPE_FORMAT_DV
            | STREAM_DESC_SUBTYPE_FORMAT_STREAM_BASED
            | STREAM_DESC_SUBTYPE_FORMAT_H264
            | STREAM_DESC_SUBTYPE_FRAME_H264
            | STREAM_DESC_SUBTYPE_FORMAT_H264_SIMULCAST
            | STREAM_DESC_SUBTYPE_FORMAT_VP8
            | STREAM_DESC_SUBTYPE_FRAME_VP8
            | STREAM_DESC_SUBTYPE_FORMAT_VP8_SIMULCAST => {
                // TODO
                io_err_res(format!("unimplemented descriptor subtype {}", subtype))
            }
            _ => io_err_res(format!("invalid/unknown descriptor subtype {}", subtype)),
        }
    }
}

fn read_intervals(raw: &mut &[u8]) -> io::Result<FrameIntervals> {
    let ty = raw.read_u8()?;
    read_intervals_of_type(raw, ty)
}

fn read_intervals_of_type(raw: &mut &[u8], ty: u8) -> io::Result<FrameIntervals> {
    match ty {
        0 => Ok(FrameIntervals::Continuous {
            min_frame_interval: raw.read_interval_100ns()?,
            max_frame_interval: raw.read_interval_100ns()?,
            frame_interval_step: raw.read_interval_100ns()?,
        }),
        n => Ok(FrameIntervals::Discrete {
            supported_frame_intervals: (0..n)
                .map(|_| raw.read_interval_100ns())
                .collect::<io::Result<Vec<_>>>()?,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le16(v: u16) -> [u8; 2] {
        v.to_le_bytes()
    }

    fn le32(v: u32) -> [u8; 4] {
        v.to_le_bytes()
    }

    /// Builds a class-specific descriptor with length and type prefix.
    fn class_desc(subtype: u8, body: &[u8]) -> Vec<u8> {
        let mut desc = vec![(body.len() + 3) as u8, VIDEO_INTERFACE_DESC_TYPE, subtype];
        desc.extend_from_slice(body);
        desc
    }

    fn synthetic_streaming_extra() -> Vec<u8> {
        let mut extra = Vec::new();

        // Input header: 1 format, endpoint 0x81, method-2 still capture.
        let mut body = vec![1];
        body.extend_from_slice(&le16(0)); // wTotalLength (unchecked)
        body.push(0x81); // bEndpointAddress
        body.push(0); // bmInfo
        body.push(2); // bTerminalLink
        body.push(2); // bStillCaptureMethod
        body.push(1); // bTriggerSupport
        body.push(0); // bTriggerUsage
        body.push(1); // bControlSize
        body.push(0); // bmaControls[0]
        extra.extend_from_slice(&class_desc(STREAM_DESC_SUBTYPE_INPUT_HEADER, &body));

        // Uncompressed YUY2 format with two frames.
        let mut body = vec![1, 2]; // bFormatIndex, bNumFrameDescriptors
        body.extend_from_slice(&crate::format::GUID_YUYV);
        body.push(16); // bBitsPerPixel
        body.push(1); // bDefaultFrameIndex
        body.extend_from_slice(&[0, 0, 0, 0]); // aspect, interlace, copy protect
        extra.extend_from_slice(&class_desc(STREAM_DESC_SUBTYPE_FORMAT_UNCOMPRESSED, &body));

        // Frame 1: 640x480, three discrete intervals.
        let mut body = vec![1, 0];
        body.extend_from_slice(&le16(640));
        body.extend_from_slice(&le16(480));
        body.extend_from_slice(&le32(614_400 * 8 * 30)); // dwMinBitRate
        body.extend_from_slice(&le32(614_400 * 8 * 30)); // dwMaxBitRate
        body.extend_from_slice(&le32(614_400)); // dwMaxVideoFrameBufferSize
        body.extend_from_slice(&le32(333_333)); // dwDefaultFrameInterval
        body.push(3); // bFrameIntervalType: 3 discrete
        body.extend_from_slice(&le32(333_333));
        body.extend_from_slice(&le32(666_666));
        body.extend_from_slice(&le32(1_000_000));
        extra.extend_from_slice(&class_desc(STREAM_DESC_SUBTYPE_FRAME_UNCOMPRESSED, &body));

        // Frame 2: 320x240, continuous interval range.
        let mut body = vec![2, 0];
        body.extend_from_slice(&le16(320));
        body.extend_from_slice(&le16(240));
        body.extend_from_slice(&le32(153_600 * 8 * 30));
        body.extend_from_slice(&le32(153_600 * 8 * 30));
        body.extend_from_slice(&le32(153_600));
        body.extend_from_slice(&le32(333_333));
        body.push(0); // continuous
        body.extend_from_slice(&le32(200_000));
        body.extend_from_slice(&le32(400_000));
        body.extend_from_slice(&le32(50_000));
        extra.extend_from_slice(&class_desc(STREAM_DESC_SUBTYPE_FRAME_UNCOMPRESSED, &body));

        extra
    }

    #[test]
    fn parses_streaming_interface_tree() {
        let extra = synthetic_streaming_extra();
        let desc = parse_streaming_extra(
            1,
            &extra,
            vec![AltSettingDesc {
                alt_setting: 0,
                endpoints: Vec::new(),
            }],
        )
        .unwrap();

        assert_eq!(desc.id().0, 1);
        assert_eq!(desc.endpoint_address(), 0x81);
        assert_eq!(desc.still_capture_method(), StillCaptureMethod::Method2);
        assert_eq!(desc.formats().len(), 1);

        let format = &desc.formats()[0];
        assert_eq!(format.kind(), FormatKind::Uncompressed);
        assert_eq!(format.frames().len(), 2);

        let frame = &format.frames()[0];
        assert_eq!((frame.width(), frame.height()), (640, 480));
        assert_eq!(frame.max_video_frame_buffer_size(), 614_400);
        match frame.intervals() {
            FrameIntervals::Discrete {
                supported_frame_intervals,
            } => assert_eq!(supported_frame_intervals, &[333_333, 666_666, 1_000_000]),
            other => panic!("expected discrete intervals, got {:?}", other),
        }

        match format.frames()[1].intervals() {
            FrameIntervals::Continuous {
                min_frame_interval,
                max_frame_interval,
                frame_interval_step,
            } => {
                assert_eq!(*min_frame_interval, 200_000);
                assert_eq!(*max_frame_interval, 400_000);
                assert_eq!(*frame_interval_step, 50_000);
            }
            other => panic!("expected continuous intervals, got {:?}", other),
        }
    }

    #[test]
    fn output_streaming_interface_is_rejected() {
        // Output header: bNumFormats, wTotalLength, bEndpointAddress,
        // bTerminalLink, bControlSize.
        let body = [1, 0, 0, 0x01, 3, 0];
        let extra = class_desc(STREAM_DESC_SUBTYPE_OUTPUT_HEADER, &body);

        let err = parse_streaming_extra(1, &extra, Vec::new()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidDevice);
    }

    #[test]
    fn frame_without_format_is_rejected() {
        let mut body = vec![1, 0];
        body.extend_from_slice(&le16(640));
        body.extend_from_slice(&le16(480));
        body.extend_from_slice(&le32(0));
        body.extend_from_slice(&le32(0));
        body.extend_from_slice(&le32(0));
        body.extend_from_slice(&le32(333_333));
        body.push(1);
        body.extend_from_slice(&le32(333_333));
        let extra = class_desc(STREAM_DESC_SUBTYPE_FRAME_UNCOMPRESSED, &body);

        assert!(parse_streaming_extra(1, &extra, Vec::new()).is_err());
    }
}

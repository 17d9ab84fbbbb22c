//! UVC device topology.
//!
//! UVC devices consist of:
//! - *Input Terminals*, which provide video data to the UVC device.
//! - *Output Terminals*, which transfer video data away from the UVC device.
//! - *Units*, which connect between other units or terminals, and process or reroute video data.
//!
//! Streaming interfaces additionally describe the formats and frame sizes the
//! device can deliver, and the alternate settings of the streaming endpoint.

// TODO: wrap all bitflags structs in newtypes to hide the raw type

pub(crate) mod parse;

use std::{num::NonZeroU8, time::Duration};

use bitflags::bitflags;
use uuid::Uuid;

use crate::util::{interval_duration, BcdVersion};

/// Identifies a video data source (either a [`Unit`], or an [`InputTerminal`]).
///
/// [`Unit`]: UnitDesc
/// [`InputTerminal`]: InputTerminalDesc
#[derive(Clone, Copy, Debug)]
pub struct SourceId(NonZeroU8);

impl SourceId {
    pub(crate) fn new(raw: u8) -> Option<Self> {
        NonZeroU8::new(raw).map(Self)
    }
}

/// Identifies an [`InputTerminalDesc`] or an [`OutputTerminalDesc`].
#[derive(Clone, Copy, Debug)]
pub struct TermId(NonZeroU8);

impl TermId {
    pub(crate) fn new(raw: u8) -> Option<Self> {
        NonZeroU8::new(raw).map(Self)
    }
}

/// Identifies an input terminal that is a camera terminal.
#[derive(Clone, Copy, Debug)]
pub struct CameraId(TermId);

impl CameraId {
    pub(crate) fn as_raw(self) -> u8 {
        self.0 .0.into()
    }
}

impl From<CameraId> for TermId {
    fn from(id: CameraId) -> Self {
        id.0
    }
}

/// Identifies a [`UnitDesc`].
#[derive(Clone, Copy, Debug)]
pub struct UnitId(NonZeroU8);

impl UnitId {
    pub(crate) fn new(raw: u8) -> Option<Self> {
        NonZeroU8::new(raw).map(Self)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ProcessingUnitId(UnitId);

impl ProcessingUnitId {
    pub(crate) fn as_raw(self) -> u8 {
        self.0 .0.into()
    }
}

impl From<ProcessingUnitId> for UnitId {
    fn from(id: ProcessingUnitId) -> Self {
        id.0
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SelectorUnitId(UnitId);

impl SelectorUnitId {
    pub(crate) fn as_raw(self) -> u8 {
        self.0 .0.into()
    }
}

impl From<SelectorUnitId> for UnitId {
    fn from(id: SelectorUnitId) -> Self {
        id.0
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ExtensionUnitId(UnitId);

impl From<ExtensionUnitId> for UnitId {
    fn from(id: ExtensionUnitId) -> Self {
        id.0
    }
}

/// The device topology as reported by the Video Control interface descriptors.
#[derive(Debug)]
pub struct Topology {
    pub(crate) header: ControlHeader,
    pub(crate) units: Vec<UnitDesc>,
    pub(crate) inputs: Vec<InputTerminalDesc>,
    pub(crate) outputs: Vec<OutputTerminalDesc>,
}

impl Topology {
    /// The UVC protocol revision the device implements (`bcdUVC`).
    pub fn uvc_version(&self) -> BcdVersion {
        self.header.uvc_version
    }

    pub fn camera_terminal_by_id(&self, id: CameraId) -> &CameraTerminalDesc {
        self.inputs
            .iter()
            .find(|inp| inp.as_camera_id().map_or(false, |cid| cid.0 .0 == id.0 .0))
            .map(|inp| inp.as_camera_desc().unwrap())
            .expect("could not find given `CameraId` in device topology")
    }

    pub fn processing_unit_by_id(&self, id: ProcessingUnitId) -> &ProcessingUnitDesc {
        self.units
            .iter()
            .filter_map(|unit| unit.as_processing_unit())
            .find(|unit| unit.id.0 .0 == id.0 .0)
            .expect("could not find processing unit in device topology")
    }

    pub fn selector_unit_by_id(&self, id: SelectorUnitId) -> &SelectorUnitDesc {
        self.units
            .iter()
            .filter_map(|unit| unit.as_selector_unit())
            .find(|unit| unit.id.0 .0 == id.0 .0)
            .expect("could not find selector unit in device topology")
    }

    pub fn units(&self) -> &[UnitDesc] {
        &self.units
    }

    pub fn inputs(&self) -> &[InputTerminalDesc] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputTerminalDesc] {
        &self.outputs
    }
}

#[derive(Debug)]
pub struct ControlHeader {
    pub(crate) uvc_version: BcdVersion,
    pub(crate) total_len: u16,
    pub(crate) clock_freq_hz: u32,
    pub(crate) streaming_interfaces: Vec<u8>,
}

/// A unit declared by the Video Control Interface Descriptors.
#[derive(Debug)]
pub struct UnitDesc {
    pub(crate) kind: UnitKind,
}

impl UnitDesc {
    pub fn unit_kind(&self) -> &UnitKind {
        &self.kind
    }

    pub fn as_processing_unit(&self) -> Option<&ProcessingUnitDesc> {
        match &self.kind {
            UnitKind::Processing(unit) => Some(unit),
            _ => None,
        }
    }

    pub fn as_selector_unit(&self) -> Option<&SelectorUnitDesc> {
        match &self.kind {
            UnitKind::Selector(unit) => Some(unit),
            _ => None,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum UnitKind {
    Selector(SelectorUnitDesc),
    Processing(ProcessingUnitDesc),
    Extension(ExtensionUnitDesc),
}

#[derive(Debug)]
pub struct SelectorUnitDesc {
    pub(crate) id: SelectorUnitId,
    pub(crate) inputs: Vec<SourceId>,
}

impl SelectorUnitDesc {
    pub fn id(&self) -> SelectorUnitId {
        self.id
    }

    /// The selectable input pins, in `bSelectorUnitID` order.
    pub fn inputs(&self) -> &[SourceId] {
        &self.inputs
    }
}

#[derive(Debug)]
pub struct ProcessingUnitDesc {
    pub(crate) id: ProcessingUnitId,
    pub(crate) source: SourceId,
    pub(crate) max_multiplier: u16,
    pub(crate) controls: ProcessingUnitControls,
    pub(crate) string: u8,
    pub(crate) standards: VideoStandards,
}

impl ProcessingUnitDesc {
    pub fn id(&self) -> ProcessingUnitId {
        self.id
    }

    pub fn controls(&self) -> ProcessingUnitControls {
        self.controls
    }
}

bitflags! {
    pub struct ProcessingUnitControls: u32 {
        const BRIGHTNESS                     = 1 << 0;
        const CONTRAST                       = 1 << 1;
        const HUE                            = 1 << 2;
        const SATURATION                     = 1 << 3;
        const SHARPNESS                      = 1 << 4;
        const GAMMA                          = 1 << 5;
        const WHITE_BALANCE_TEMPERATURE      = 1 << 6;
        const WHITE_BALANCE_COMPONENT        = 1 << 7;
        const BACKLIGHT_COMPENSATION         = 1 << 8;
        const GAIN                           = 1 << 9;
        const POWER_LINE_FREQUENCY           = 1 << 10;
        const HUE_AUTO                       = 1 << 11;
        const WHITE_BALANCE_TEMPERATURE_AUTO = 1 << 12;
        const WHITE_BALANCE_COMPONENT_AUTO   = 1 << 13;
        const DIGITAL_MULTIPLIER             = 1 << 14;
        const DIGITAL_MULTIPLIER_LIMIT       = 1 << 15;
        const ANALOG_VIDEO_STANDARD          = 1 << 16;
        const ANALOG_VIDEO_LOCK_STATUS       = 1 << 17;
        const CONTRAST_AUTO                  = 1 << 18;
    }
}

bitflags! {
    pub struct VideoStandards: u8 {
        const NONE         = 1 << 0;
        const NTSC_525_60  = 1 << 1;
        const PAL_625_50   = 1 << 2;
        const SECAM_625_50 = 1 << 3;
        const NTSC_625_50  = 1 << 4;
        const PAL_525_60   = 1 << 5;
    }
}

#[derive(Debug)]
pub struct ExtensionUnitDesc {
    pub(crate) id: ExtensionUnitId,
    pub(crate) extension_code: Uuid,
    pub(crate) num_controls: u8,
    pub(crate) inputs: Vec<SourceId>,
    pub(crate) controls_bitmap: Vec<u8>,
}

#[derive(Debug)]
pub struct OutputTerminalDesc {
    pub(crate) term_id: TermId,
    pub(crate) term_type: u16,
    pub(crate) assoc: Option<TermId>,
    pub(crate) source: SourceId,
    pub(crate) string: u8,
}

impl OutputTerminalDesc {
    pub fn terminal_type(&self) -> Option<OutputTerminalType> {
        OutputTerminalType::from_raw(self.term_type)
    }
}

#[derive(Debug)]
pub struct InputTerminalDesc {
    pub(crate) term_id: TermId,
    pub(crate) term_type: u16,
    pub(crate) assoc: Option<TermId>,
    pub(crate) string: u8,
    pub(crate) kind: InputTerminalKind,
}

impl InputTerminalDesc {
    pub fn terminal_type(&self) -> Option<InputTerminalType> {
        InputTerminalType::from_raw(self.term_type)
    }

    pub fn terminal_kind(&self) -> &InputTerminalKind {
        &self.kind
    }

    pub fn as_camera_id(&self) -> Option<CameraId> {
        match &self.kind {
            InputTerminalKind::Camera(_) => Some(CameraId(self.term_id)),
            _ => None,
        }
    }

    pub fn as_camera_desc(&self) -> Option<&CameraTerminalDesc> {
        match &self.kind {
            InputTerminalKind::Camera(cam) => Some(cam),
            _ => None,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum InputTerminalKind {
    Camera(CameraTerminalDesc),
    /// Misc. terminal without extra functionality (or with unimplemented functionality).
    Other,
}

#[derive(Debug)]
pub struct CameraTerminalDesc {
    pub(crate) objective_focal_length_min: u16,
    pub(crate) objective_focal_length_max: u16,
    pub(crate) ocular_focal_length: u16,
    pub(crate) controls: CameraControls,
}

impl CameraTerminalDesc {
    pub fn controls(&self) -> CameraControls {
        self.controls
    }
}

bitflags! {
    pub struct CameraControls: u32 {
        const SCANNING_MODE = 1 << 0;
        const AUTO_EXPOSURE_MODE = 1 << 1;
        const AUTO_EXPOSURE_PRIORITY = 1 << 2;
        const EXPOSURE_TIME_ABS = 1 << 3;
        const EXPOSURE_TIME_REL = 1 << 4;
        const FOCUS_ABS = 1 << 5;
        const FOCUS_REL = 1 << 6;
        const IRIS_ABS = 1 << 7;
        const IRIS_REL = 1 << 8;
        const ZOOM_ABS = 1 << 9;
        const ZOOM_REL = 1 << 10;
        const PAN_TILT_ABS = 1 << 11;
        const PAN_TILT_REL = 1 << 12;
        const ROLL_ABS = 1 << 13;
        const ROLL_REL = 1 << 14;

        const FOCUS_AUTO = 1 << 17;
        const PRIVACY = 1 << 18;
        const FOCUS_SIMPLE = 1 << 19;
        const WINDOW = 1 << 20;
        const REGION_OF_INTEREST = 1 << 21;
    }
}

primitive_enum! {
    pub enum InputTerminalType: u16 {
        UsbVendorSpecific = 0x0100,
        UsbStreaming = 0x0101,

        InVendorSpecific = 0x0200,
        InCamera = 0x0201,
        InMediaTransport = 0x0202,

        ExtVendorSpecific = 0x0400,
        ExtCompositeConnector = 0x0401,
        ExtSVideoConnector = 0x0402,
        ExtComponentConnector = 0x0403,
    }
}

primitive_enum! {
    pub enum OutputTerminalType: u16 {
        UsbVendorSpecific = 0x0100,
        UsbStreaming = 0x0101,

        OutVendorSpecific = 0x0300,
        OutDisplay = 0x0301,
        OutMediaTransport = 0x0302,

        ExtVendorSpecific = 0x0400,
        ExtCompositeConnector = 0x0401,
        ExtSVideoConnector = 0x0402,
        ExtComponentConnector = 0x0403,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingInterfaceId(pub(crate) u8);

/// Static description of a Video Streaming interface: its input header, the
/// format and frame descriptors it advertises, and the alternate settings of
/// its streaming endpoint.
///
/// Only device-to-host (input) streaming interfaces are modeled; devices
/// advertising an output header are rejected as non-compliant during
/// detection.
#[derive(Debug)]
pub struct StreamingInterfaceDesc {
    pub(crate) id: StreamingInterfaceId,
    pub(crate) header: InputHeader,
    pub(crate) formats: Vec<FormatDesc>,
    pub(crate) altsettings: Vec<AltSettingDesc>,
}

impl StreamingInterfaceDesc {
    pub fn id(&self) -> StreamingInterfaceId {
        self.id
    }

    pub fn formats(&self) -> &[FormatDesc] {
        &self.formats
    }

    pub fn format_by_index(&self, index: FormatIndex) -> Option<&FormatDesc> {
        self.formats.iter().find(|f| f.format_index.0 == index.0)
    }

    /// Looks up a (format, frame) descriptor pair by index.
    pub fn frame_by_index(
        &self,
        format: FormatIndex,
        frame: FrameIndex,
    ) -> Option<(&FormatDesc, &FrameDesc)> {
        let fmt = self.format_by_index(format)?;
        let frm = fmt.frames.iter().find(|f| f.frame_index.0 == frame.0)?;
        Some((fmt, frm))
    }

    /// Address of the video data endpoint, from the input header.
    pub fn endpoint_address(&self) -> u8 {
        self.header.endpoint_address
    }

    pub fn still_capture_method(&self) -> StillCaptureMethod {
        self.header.still_capture_method
    }

    /// The interface's alternate settings, in descriptor order.
    ///
    /// A streaming interface with more than one altsetting uses isochronous
    /// transfers; a single altsetting means bulk.
    pub fn altsettings(&self) -> &[AltSettingDesc] {
        &self.altsettings
    }
}

#[derive(Debug)]
pub struct InputHeader {
    pub(crate) num_formats: u8,
    pub(crate) total_length: u16,
    pub(crate) endpoint_address: u8,
    pub(crate) info: InputInterfaceInfo,
    pub(crate) terminal_link: TermId,
    pub(crate) still_capture_method: StillCaptureMethod,
    pub(crate) trigger_support: TriggerSupport,
    pub(crate) trigger_usage: TriggerUsage,
    pub(crate) format_controls: Vec<PerFormatControls>,
}

bitflags! {
    pub struct InputInterfaceInfo: u8 {
        const DYNAMIC_FORMAT_CHANGE_SUPPORTED = 1 << 0;
    }
}

primitive_enum! {
    pub enum StillCaptureMethod: u8 {
        None = 0,
        Method1 = 1,
        Method2 = 2,
        Method3 = 3,
    }
}

primitive_enum! {
    pub enum TriggerSupport: u8 {
        NotSupported = 0,
        Supported = 1,
    }
}

primitive_enum! {
    pub enum TriggerUsage: u8 {
        InitiateStillImageCapture = 0,
        GeneralPurposeButtonEvent = 1,
    }
}

bitflags! {
    pub struct PerFormatControls: u32 {
        const KEY_FRAME_RATE = 1 << 0;
        const P_FRAME_RATE = 1 << 1;
        const COMP_QUALITY = 1 << 2;
        const COMP_WINDOW_SIZE = 1 << 3;

        const GENERATE_KEY_FRAME = 1 << 4;
        const UPDATE_FRAME_SEGMENT = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatIndex(pub(crate) u8);

impl FormatIndex {
    pub fn as_raw(self) -> u8 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameIndex(pub(crate) u8);

impl FrameIndex {
    pub fn as_raw(self) -> u8 {
        self.0
    }
}

/// A format descriptor and the frame descriptors nested beneath it.
#[derive(Debug)]
pub struct FormatDesc {
    pub(crate) format_index: FormatIndex,
    pub(crate) kind: FormatKind,
    /// Wire-order format GUID (synthesized from the four-CC for MJPEG, which
    /// carries no GUID in its descriptor).
    pub(crate) guid: [u8; 16],
    pub(crate) bits_per_pixel: u8,
    pub(crate) default_frame_index: FrameIndex,
    pub(crate) frames: Vec<FrameDesc>,
}

impl FormatDesc {
    pub fn index(&self) -> FormatIndex {
        self.format_index
    }

    pub fn kind(&self) -> FormatKind {
        self.kind
    }

    pub fn guid(&self) -> &[u8; 16] {
        &self.guid
    }

    pub fn frames(&self) -> &[FrameDesc] {
        &self.frames
    }

    pub fn default_frame_index(&self) -> FrameIndex {
        self.default_frame_index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FormatKind {
    Uncompressed,
    Mjpeg,
    FrameBased,
}

/// A single frame (resolution) configuration of a format.
#[derive(Debug)]
pub struct FrameDesc {
    pub(crate) frame_index: FrameIndex,
    pub(crate) capabilities: FrameCapabilities,
    pub(crate) width: u16,
    pub(crate) height: u16,
    pub(crate) min_bit_rate: u32,
    pub(crate) max_bit_rate: u32,
    pub(crate) max_video_frame_buffer_size: u32,
    /// Default frame interval in 100 ns units.
    pub(crate) default_frame_interval: u32,
    pub(crate) intervals: FrameIntervals,
}

impl FrameDesc {
    pub fn index(&self) -> FrameIndex {
        self.frame_index
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn max_video_frame_buffer_size(&self) -> u32 {
        self.max_video_frame_buffer_size
    }

    pub fn default_frame_interval(&self) -> Duration {
        interval_duration(self.default_frame_interval)
    }

    pub fn intervals(&self) -> &FrameIntervals {
        &self.intervals
    }
}

bitflags! {
    pub struct FrameCapabilities: u8 {
        const STILL_IMAGE_SUPPORTED = 1 << 0;
        const FIXED_FRAME_RATE = 1 << 1;
    }
}

/// Supported frame intervals, in 100 ns units.
#[derive(Debug)]
pub enum FrameIntervals {
    Continuous {
        min_frame_interval: u32,
        max_frame_interval: u32,
        frame_interval_step: u32,
    },

    Discrete {
        supported_frame_intervals: Vec<u32>,
    },
}

/// One alternate setting of a streaming interface.
#[derive(Debug)]
pub struct AltSettingDesc {
    pub(crate) alt_setting: u8,
    pub(crate) endpoints: Vec<EndpointDesc>,
}

impl AltSettingDesc {
    pub fn alt_setting(&self) -> u8 {
        self.alt_setting
    }

    pub fn endpoint(&self, address: u8) -> Option<&EndpointDesc> {
        self.endpoints.iter().find(|ep| ep.address == address)
    }
}

/// An endpoint within an alternate setting.
#[derive(Debug)]
pub struct EndpointDesc {
    pub(crate) address: u8,
    /// Raw `wMaxPacketSize` bits: `[unused:2 (multiplier-1):3 size:11]`.
    pub(crate) max_packet_size: u16,
    /// `wBytesPerInterval` from the SuperSpeed endpoint companion, if present.
    pub(crate) ss_bytes_per_interval: Option<u16>,
}

impl EndpointDesc {
    pub fn address(&self) -> u8 {
        self.address
    }

    /// The endpoint's per-(micro)frame capacity in bytes.
    pub fn bytes_per_packet(&self) -> usize {
        match self.ss_bytes_per_interval {
            Some(bpi) => usize::from(bpi),
            None => {
                let size = usize::from(self.max_packet_size & 0x07ff);
                let bursts = usize::from((self.max_packet_size >> 11) & 3) + 1;
                size * bursts
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_packet_capacity_decodes_multiplier() {
        let ep = EndpointDesc {
            address: 0x81,
            max_packet_size: (2 << 11) | 1024, // 3 transactions of 1024 bytes
            ss_bytes_per_interval: None,
        };
        assert_eq!(ep.bytes_per_packet(), 3072);
    }

    #[test]
    fn superspeed_companion_takes_precedence() {
        let ep = EndpointDesc {
            address: 0x81,
            max_packet_size: 512,
            ss_bytes_per_interval: Some(49152),
        };
        assert_eq!(ep.bytes_per_packet(), 49152);
    }
}

//! Raw values of entity controls.
//!
//! Every camera-terminal and processing-unit control is a fixed-width
//! little-endian blob on the wire. [`ControlValue`] is the codec each control
//! value type implements; the per-control request wrappers are all instances
//! of one template parameterised over these types.

use std::{fmt, time::Duration};

use bitflags::bitflags;

pub trait ControlValue {
    type Buf: Default + AsMut<[u8]>;

    fn decode(buf: &[u8]) -> Self;
    fn encode(&self, buf: &mut [u8]);
}

impl ControlValue for bool {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        match buf[0] {
            0 => false,
            1 => true,
            n => {
                log::warn!("invalid bool value (should be 0 or 1 only): {}", n);
                true
            }
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self as u8;
    }
}

impl ControlValue for u8 {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        buf[0]
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self;
    }
}

impl ControlValue for i8 {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        buf[0] as i8
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self as u8;
    }
}

impl ControlValue for u16 {
    type Buf = [u8; 2];

    fn decode(buf: &[u8]) -> Self {
        let mut bytes = [0; 2];
        bytes.copy_from_slice(buf);
        Self::from_le_bytes(bytes)
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes())
    }
}

impl ControlValue for i16 {
    type Buf = [u8; 2];

    fn decode(buf: &[u8]) -> Self {
        let mut bytes = [0; 2];
        bytes.copy_from_slice(buf);
        Self::from_le_bytes(bytes)
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes())
    }
}

impl ControlValue for u32 {
    type Buf = [u8; 4];

    fn decode(buf: &[u8]) -> Self {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(buf);
        Self::from_le_bytes(bytes)
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes())
    }
}

impl ControlValue for i32 {
    type Buf = [u8; 4];

    fn decode(buf: &[u8]) -> Self {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(buf);
        Self::from_le_bytes(bytes)
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes())
    }
}

#[derive(Clone, Copy, Debug)]
pub enum PowerLineFrequency {
    Disabled = 0,
    Freq50Hz = 1,
    Freq60Hz = 2,
    Auto = 3,
}

impl ControlValue for PowerLineFrequency {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        match buf[0] {
            0 => Self::Disabled,
            1 => Self::Freq50Hz,
            2 => Self::Freq60Hz,
            3 => Self::Auto,
            n => {
                log::warn!("invalid power line frequency value {}", n);
                Self::Disabled
            }
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = (*self) as u8;
    }
}

#[derive(Debug)]
pub struct WhiteBalanceComponents {
    blue: u16,
    red: u16,
}

impl WhiteBalanceComponents {
    pub fn new(blue: u16, red: u16) -> Self {
        Self { blue, red }
    }
}

impl ControlValue for WhiteBalanceComponents {
    type Buf = [u8; 4];

    fn decode(buf: &[u8]) -> Self {
        let mut blue = [0; 2];
        let mut red = [0; 2];
        blue.copy_from_slice(&buf[0..2]);
        red.copy_from_slice(&buf[2..4]);
        Self {
            blue: u16::from_le_bytes(blue),
            red: u16::from_le_bytes(red),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.blue.to_le_bytes());
        buf[2..4].copy_from_slice(&self.red.to_le_bytes());
    }
}

bitflags! {
    pub struct AutoExposureMode: u8 {
        const MANUAL = 1 << 0;
        const AUTO = 1 << 1;
        const SHUTTER_PRIORITY = 1 << 2;
        const APERTURE_PRIORITY = 1 << 3;
    }
}

impl ControlValue for AutoExposureMode {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        Self::from_bits_truncate(buf[0])
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.bits();
    }
}

#[derive(Clone, Copy)]
pub struct ExposureTimeAbs(u32);

impl ExposureTimeAbs {
    /// Rounds and clamps a duration to fit the available range.
    pub fn from_duration(dur: Duration) -> Self {
        // Exposure time is in units of 0.0001 seconds, or 100µs.
        let units = dur.as_micros() / 100;
        let clamped = units.clamp(1, u32::MAX.into());
        Self(clamped as u32)
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_micros(u64::from(self.0) * 100)
    }
}

impl fmt::Debug for ExposureTimeAbs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_duration().fmt(f)
    }
}

impl ControlValue for ExposureTimeAbs {
    type Buf = [u8; 4];

    fn decode(buf: &[u8]) -> Self {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(buf);
        Self(u32::from_le_bytes(bytes))
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.0.to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FocusRel {
    focus_rel: i8,
    speed: u8,
}

impl FocusRel {
    pub fn new(focus_rel: i8, speed: u8) -> Self {
        Self { focus_rel, speed }
    }
}

impl ControlValue for FocusRel {
    type Buf = [u8; 2];

    fn decode(buf: &[u8]) -> Self {
        Self {
            focus_rel: buf[0] as i8,
            speed: buf[1],
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.focus_rel as u8;
        buf[1] = self.speed;
    }
}

#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub enum FocusSimple {
    FullRange = 0x00,
    Macro = 0x01,
    People = 0x02,
    Scene = 0x03,
}

impl ControlValue for FocusSimple {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        match buf[0] {
            0x00 => Self::FullRange,
            0x01 => Self::Macro,
            0x02 => Self::People,
            0x03 => Self::Scene,
            n => {
                log::warn!("invalid simple focus value {}", n);
                Self::FullRange
            }
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self as u8;
    }
}

/// Relative optical and digital zoom adjustment.
#[derive(Debug, Clone, Copy)]
pub struct ZoomRel {
    zoom_rel: i8,
    digital_zoom: u8,
    speed: u8,
}

impl ZoomRel {
    pub fn new(zoom_rel: i8, digital_zoom: u8, speed: u8) -> Self {
        Self {
            zoom_rel,
            digital_zoom,
            speed,
        }
    }
}

impl ControlValue for ZoomRel {
    type Buf = [u8; 3];

    fn decode(buf: &[u8]) -> Self {
        Self {
            zoom_rel: buf[0] as i8,
            digital_zoom: buf[1],
            speed: buf[2],
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.zoom_rel as u8;
        buf[1] = self.digital_zoom;
        buf[2] = self.speed;
    }
}

/// Absolute pan/tilt position, in arc-second units.
#[derive(Debug, Clone, Copy)]
pub struct PanTiltAbs {
    pub pan: i32,
    pub tilt: i32,
}

impl ControlValue for PanTiltAbs {
    type Buf = [u8; 8];

    fn decode(buf: &[u8]) -> Self {
        let mut pan = [0; 4];
        let mut tilt = [0; 4];
        pan.copy_from_slice(&buf[0..4]);
        tilt.copy_from_slice(&buf[4..8]);
        Self {
            pan: i32::from_le_bytes(pan),
            tilt: i32::from_le_bytes(tilt),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.pan.to_le_bytes());
        buf[4..8].copy_from_slice(&self.tilt.to_le_bytes());
    }
}

/// Relative pan/tilt movement with per-axis speed.
#[derive(Debug, Clone, Copy)]
pub struct PanTiltRel {
    pub pan_rel: i8,
    pub pan_speed: u8,
    pub tilt_rel: i8,
    pub tilt_speed: u8,
}

impl ControlValue for PanTiltRel {
    type Buf = [u8; 4];

    fn decode(buf: &[u8]) -> Self {
        Self {
            pan_rel: buf[0] as i8,
            pan_speed: buf[1],
            tilt_rel: buf[2] as i8,
            tilt_speed: buf[3],
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.pan_rel as u8;
        buf[1] = self.pan_speed;
        buf[2] = self.tilt_rel as u8;
        buf[3] = self.tilt_speed;
    }
}

/// Digital window bounds, plus the device-reported step counts (UVC 1.5,
/// 4.2.2.1.16).
#[derive(Debug, Clone, Copy)]
pub struct DigitalWindow {
    pub top: u16,
    pub left: u16,
    pub bottom: u16,
    pub right: u16,
    pub num_steps: u16,
    pub num_steps_units: u16,
}

impl ControlValue for DigitalWindow {
    type Buf = [u8; 12];

    fn decode(buf: &[u8]) -> Self {
        let field = |i: usize| u16::from_le_bytes([buf[i], buf[i + 1]]);
        Self {
            top: field(0),
            left: field(2),
            bottom: field(4),
            right: field(6),
            num_steps: field(8),
            num_steps_units: field(10),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.top.to_le_bytes());
        buf[2..4].copy_from_slice(&self.left.to_le_bytes());
        buf[4..6].copy_from_slice(&self.bottom.to_le_bytes());
        buf[6..8].copy_from_slice(&self.right.to_le_bytes());
        buf[8..10].copy_from_slice(&self.num_steps.to_le_bytes());
        buf[10..12].copy_from_slice(&self.num_steps_units.to_le_bytes());
    }
}

bitflags! {
    /// Functions the device auto-adjusts within a region of interest.
    pub struct RoiAutoControls: u16 {
        const AUTO_EXPOSURE = 1 << 0;
        const AUTO_IRIS = 1 << 1;
        const AUTO_WHITE_BALANCE = 1 << 2;
        const AUTO_FOCUS = 1 << 3;
        const AUTO_FACE_DETECT = 1 << 4;
        const AUTO_DETECT_AND_TRACK = 1 << 5;
        const IMAGE_STABILIZATION = 1 << 6;
        const HIGHER_QUALITY = 1 << 7;
    }
}

/// Region of interest and the controls to auto-adjust within it (UVC 1.5,
/// 4.2.2.1.17).
#[derive(Debug, Clone, Copy)]
pub struct DigitalRoi {
    pub top: u16,
    pub left: u16,
    pub bottom: u16,
    pub right: u16,
    pub auto_controls: RoiAutoControls,
}

impl ControlValue for DigitalRoi {
    type Buf = [u8; 10];

    fn decode(buf: &[u8]) -> Self {
        let field = |i: usize| u16::from_le_bytes([buf[i], buf[i + 1]]);
        Self {
            top: field(0),
            left: field(2),
            bottom: field(4),
            right: field(6),
            auto_controls: RoiAutoControls::from_bits_truncate(field(8)),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.top.to_le_bytes());
        buf[2..4].copy_from_slice(&self.left.to_le_bytes());
        buf[4..6].copy_from_slice(&self.bottom.to_le_bytes());
        buf[6..8].copy_from_slice(&self.right.to_le_bytes());
        buf[8..10].copy_from_slice(&self.auto_controls.bits().to_le_bytes());
    }
}

/// Relative roll adjustment.
#[derive(Debug, Clone, Copy)]
pub struct RollRel {
    roll_rel: i8,
    speed: u8,
}

impl RollRel {
    pub fn new(roll_rel: i8, speed: u8) -> Self {
        Self { roll_rel, speed }
    }
}

impl ControlValue for RollRel {
    type Buf = [u8; 2];

    fn decode(buf: &[u8]) -> Self {
        Self {
            roll_rel: buf[0] as i8,
            speed: buf[1],
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.roll_rel as u8;
        buf[1] = self.speed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_field_values_round_trip() {
        let mut buf = [0u8; 8];
        PanTiltAbs {
            pan: -3600,
            tilt: 7200,
        }
        .encode(&mut buf);
        let decoded = PanTiltAbs::decode(&buf);
        assert_eq!(decoded.pan, -3600);
        assert_eq!(decoded.tilt, 7200);

        let mut buf = [0u8; 4];
        PanTiltRel {
            pan_rel: -1,
            pan_speed: 3,
            tilt_rel: 1,
            tilt_speed: 4,
        }
        .encode(&mut buf);
        let decoded = PanTiltRel::decode(&buf);
        assert_eq!(decoded.pan_rel, -1);
        assert_eq!(decoded.tilt_speed, 4);
    }

    #[test]
    fn window_and_roi_round_trip() {
        let mut buf = [0u8; 12];
        DigitalWindow {
            top: 10,
            left: 20,
            bottom: 470,
            right: 630,
            num_steps: 16,
            num_steps_units: 1,
        }
        .encode(&mut buf);
        let decoded = DigitalWindow::decode(&buf);
        assert_eq!(decoded.bottom, 470);
        assert_eq!(decoded.num_steps_units, 1);

        let mut buf = [0u8; 10];
        DigitalRoi {
            top: 1,
            left: 2,
            bottom: 3,
            right: 4,
            auto_controls: RoiAutoControls::AUTO_EXPOSURE | RoiAutoControls::AUTO_FOCUS,
        }
        .encode(&mut buf);
        let decoded = DigitalRoi::decode(&buf);
        assert_eq!(decoded.right, 4);
        assert_eq!(
            decoded.auto_controls,
            RoiAutoControls::AUTO_EXPOSURE | RoiAutoControls::AUTO_FOCUS
        );
    }

    #[test]
    fn signed_widths_round_trip() {
        let mut buf = [0u8; 4];
        (-123_456i32).encode(&mut buf);
        assert_eq!(i32::decode(&buf), -123_456);

        let mut buf = [0u8; 1];
        (-5i8).encode(&mut buf);
        assert_eq!(i8::decode(&buf), -5);
    }
}

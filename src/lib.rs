//! User-space UVC camera streaming over raw USB.
//!
//! The library negotiates a streaming format with a UVC device (probe/commit),
//! keeps a ring of asynchronous transfers armed against the streaming
//! endpoint, reassembles the payload packets into frames, and delivers them
//! through a callback worker or a polling call.
//!
//! Dealing with a device entity `Ent`:
//! - `EntDesc` describes an entity's static properties, read from the device descriptor.
//! - `EntId` is a small `Copy` type that refers to an `EntDesc`.
//! - `Ent<'a>` grants access to the entity's properties, borrowing the opened device.

#[macro_use]
mod util;
pub mod camera;
pub mod control;
mod detect;
mod error;
pub mod format;
pub mod frame;
pub mod processing_unit;
pub mod selector_unit;
pub mod stream;
pub mod topo;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

use std::{fmt, sync::Arc, time::Duration};

use camera::CameraTerminal;
use detect::UvcInfo;
pub use error::{Error, ErrorKind};
pub use util::BcdVersion;

use error::*;
use processing_unit::ProcessingUnit;
use rusb::{Context, Device, UsbContext};
use selector_unit::SelectorUnit;
use topo::{
    CameraId, ProcessingUnitId, SelectorUnitId, StreamingInterfaceDesc, StreamingInterfaceId,
    Topology,
};
use transport::{RusbTransport, StreamTransport};

pub type Result<T> = std::result::Result<T, Error>;

/// Identifies a UVC device.
pub struct UvcDeviceDesc {
    usb: Device<Context>,
    uvc_info: UvcInfo,
}

impl UvcDeviceDesc {
    pub fn vendor_id(&self) -> u16 {
        // unwrap: always succeeds
        self.usb.device_descriptor().unwrap().vendor_id()
    }

    pub fn product_id(&self) -> u16 {
        // unwrap: always succeeds
        self.usb.device_descriptor().unwrap().product_id()
    }

    pub fn open(self) -> Result<UvcDevice> {
        UvcDevice::open(self)
    }
}

impl fmt::Debug for UvcDeviceDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UvcDeviceDesc")
            .field("uvc_info", &self.uvc_info)
            .finish()
    }
}

pub fn list() -> Result<impl Iterator<Item = UvcDeviceDesc>> {
    let ctx = Context::new().during(Action::EnumeratingDevices)?;
    let list = ctx.devices().during(Action::EnumeratingDevices)?;

    let devices = list
        .iter()
        .filter_map(|dev| match detect::detect_uvc(&dev) {
            Ok(Some(info)) => Some(UvcDeviceDesc {
                usb: dev,
                uvc_info: info,
            }),
            Ok(None) => None,
            Err(e) => {
                log::error!("{:?}: {}", dev, e);
                None
            }
        })
        .collect::<Vec<_>>();

    Ok(devices.into_iter())
}

pub struct UvcDevice {
    transport: Arc<dyn StreamTransport>,
    /// Concrete rusb backend, if that is what `transport` is. Used for the
    /// device string helpers, which need the raw handle.
    usb: Option<Arc<RusbTransport>>,
    uvc_info: UvcInfo,
    timeout: Duration,
}

impl UvcDevice {
    fn open(desc: UvcDeviceDesc) -> Result<Self> {
        let mut usb = desc.usb.open().during(Action::OpeningDevice)?;
        if let Err(e) = usb.set_auto_detach_kernel_driver(true) {
            log::warn!("set_auto_detach_kernel_driver failed: {}", e);
        }

        let config = usb.active_configuration().during(Action::OpeningDevice)?;
        if config != 1 {
            usb.set_active_configuration(1)
                .during(Action::OpeningDevice)?;
        }

        // Claim everything up front: interface claiming needs exclusive
        // access to the handle, which is gone once the transport shares it
        // with its I/O thread.
        usb.claim_interface(desc.uvc_info.control_interface.interface_number)
            .during(Action::OpeningDevice)?;
        for intf in &desc.uvc_info.streaming_interfaces {
            usb.claim_interface(intf.id().0)
                .during(Action::OpeningDevice)?;
        }

        let config = usb.active_configuration().during(Action::OpeningDevice)?;
        if config != 1 {
            return err(
                ErrorKind::Busy,
                "failed to claim device",
                Action::OpeningDevice,
            );
        }

        let transport = Arc::new(RusbTransport::new(usb));
        Ok(UvcDevice {
            usb: Some(transport.clone()),
            transport,
            uvc_info: desc.uvc_info,
            timeout: Duration::from_millis(1000),
        })
    }

    /// Builds a device around an arbitrary transport. Used by the test suite
    /// to run the pipeline against a scripted device model.
    #[cfg(test)]
    pub(crate) fn from_parts(transport: Arc<dyn StreamTransport>, uvc_info: UvcInfo) -> Self {
        Self {
            transport,
            usb: None,
            uvc_info,
            timeout: Duration::from_millis(1000),
        }
    }

    pub(crate) fn transport(&self) -> &Arc<dyn StreamTransport> {
        &self.transport
    }

    pub(crate) fn uvc_info(&self) -> &UvcInfo {
        &self.uvc_info
    }

    pub(crate) fn control_timeout(&self) -> Duration {
        self.timeout
    }

    fn with_usb<T>(&self, mut cb: impl FnMut(&dyn StreamTransport) -> Result<T>) -> Result<T> {
        // On some devices, one of the first transfers might time out (can be
        // read or write, depending on the exact sequence of transfers
        // performed). Not sure why, but retrying works around that.

        match cb(&*self.transport) {
            Err(e) if e.is_usb_timeout() => {
                log::warn!("USB timeout, retrying request");
                cb(&*self.transport)
            }
            other => other,
        }
    }

    /// Performs a `SET_CUR` request on an "entity" control (eg. an input, output, or unit's control).
    fn set_entity(&self, entity_id: u8, cs: u8, data: &[u8]) -> Result<()> {
        self.set_interface_entity(
            self.uvc_info.control_interface.interface_number,
            entity_id,
            cs,
            data,
        )
    }

    fn set_interface_entity(
        &self,
        interface: u8,
        entity_id: u8,
        cs: u8,
        data: &[u8],
    ) -> Result<()> {
        const SET_ENTITY_REQ: u8 = 0b00100001;

        let value = u16::from(cs) << 8;
        let index = u16::from(entity_id) << 8 | u16::from(interface);
        self.with_usb(|usb| {
            usb.control_out(
                SET_ENTITY_REQ,
                Request::SetCur as _,
                value,
                index,
                data,
                self.timeout,
            )
            .during(Action::WritingControl)?;
            Ok(())
        })
    }

    fn read_entity(&self, entity_id: u8, request: Request, cs: u8, buf: &mut [u8]) -> Result<()> {
        self.read_interface_entity(
            self.uvc_info.control_interface.interface_number,
            entity_id,
            request,
            cs,
            buf,
        )
    }

    fn read_interface_entity(
        &self,
        interface: u8,
        entity_id: u8,
        request: Request,
        cs: u8,
        buf: &mut [u8],
    ) -> Result<()> {
        const GET_ENTITY_REQ: u8 = 0b10100001;

        let value = u16::from(cs) << 8;
        let index = u16::from(entity_id) << 8 | u16::from(interface);

        self.with_usb(|usb| {
            usb.control_in(
                GET_ENTITY_REQ,
                request as _,
                value,
                index,
                buf,
                self.timeout,
            )
            .during(Action::ReadingControl)?;
            Ok(())
        })
    }

    pub fn read_manufacturer_string(&self) -> Result<String> {
        let usb = self.require_rusb()?;
        let handle = usb.device_handle();
        Ok(handle
            .read_manufacturer_string_ascii(&handle.device().device_descriptor().unwrap())
            .during(Action::ReadingDeviceString)?)
    }

    pub fn read_product_string(&self) -> Result<String> {
        let usb = self.require_rusb()?;
        let handle = usb.device_handle();
        Ok(handle
            .read_product_string_ascii(&handle.device().device_descriptor().unwrap())
            .during(Action::ReadingDeviceString)?)
    }

    fn require_rusb(&self) -> Result<&Arc<RusbTransport>> {
        self.usb.as_ref().ok_or_else(|| {
            Error::msg(
                ErrorKind::NotSupported,
                "operation requires the rusb transport",
            )
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.uvc_info.control_interface.topo
    }

    /// The UVC protocol revision the device implements.
    pub fn uvc_version(&self) -> BcdVersion {
        self.topology().uvc_version()
    }

    /// Returns the device's streaming interfaces.
    ///
    /// Streaming interfaces transport video data over the USB channel (either from the device to
    /// the host, or from the host to the device).
    pub fn streaming_interfaces(&self) -> &[StreamingInterfaceDesc] {
        &self.uvc_info.streaming_interfaces
    }

    pub fn streaming_interface_by_id(&self, id: StreamingInterfaceId) -> &StreamingInterfaceDesc {
        self.streaming_interfaces()
            .iter()
            .find(|i| i.id().0 == id.0)
            .expect("could not find given `StreamingInterfaceId` on device")
    }

    pub fn camera_terminal_by_id(&self, id: CameraId) -> CameraTerminal<'_> {
        CameraTerminal::new(self, id)
    }

    pub fn processing_unit_by_id(&self, id: ProcessingUnitId) -> ProcessingUnit<'_> {
        ProcessingUnit::new(self, id)
    }

    pub fn selector_unit_by_id(&self, id: SelectorUnitId) -> SelectorUnit<'_> {
        SelectorUnit::new(self, id)
    }
}

#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
enum Request {
    Undefined = 0x00,
    SetCur = 0x01,
    SetCurAll = 0x11,
    GetCur = 0x81,
    GetMin = 0x82,
    GetMax = 0x83,
    GetRes = 0x84,
    GetLen = 0x85,
    GetInfo = 0x86,
    GetDef = 0x87,
    GetCurAll = 0x91,
    GetMinAll = 0x92,
    GetMaxAll = 0x93,
    GetResAll = 0x94,
    GetDefAll = 0x97,
}

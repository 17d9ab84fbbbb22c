//! Selector unit controls (UVC A.9.6).
//!
//! A selector unit routes one of several video inputs downstream; its only
//! control is the 1-based index of the active input pin.

use crate::{
    topo::{SelectorUnitDesc, SelectorUnitId},
    Request, Result, UvcDevice,
};

const SU_INPUT_SELECT_CONTROL: u8 = 0x01;

/// Grants access to a selector unit.
pub struct SelectorUnit<'a> {
    device: &'a UvcDevice,
    desc: &'a SelectorUnitDesc,
}

impl<'a> SelectorUnit<'a> {
    pub(crate) fn new(device: &'a UvcDevice, id: SelectorUnitId) -> Self {
        let desc = device.topology().selector_unit_by_id(id);

        Self { device, desc }
    }

    pub fn descriptor(&self) -> &SelectorUnitDesc {
        self.desc
    }

    /// Reads the 1-based index of the currently selected input pin.
    pub fn selected_input(&self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.device.read_entity(
            self.desc.id().as_raw(),
            Request::GetCur,
            SU_INPUT_SELECT_CONTROL,
            &mut buf,
        )?;
        Ok(buf[0])
    }

    /// Selects the input pin with the given 1-based index.
    pub fn select_input(&mut self, index: u8) -> Result<()> {
        self.device
            .set_entity(self.desc.id().as_raw(), SU_INPUT_SELECT_CONTROL, &[index])
    }
}

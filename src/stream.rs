//! Video streaming: probe/commit negotiation and the transfer pipeline.
//!
//! Streaming is a two-step affair. Negotiation first: the host proposes a
//! stream-control block (format index, frame index, interval) via the probe
//! control and commits what the device accepts. Then the pipeline: a ring of
//! asynchronous transfers is kept armed against the streaming endpoint, the
//! payload parser strips the UVC payload headers and accumulates image bytes
//! into the in-progress buffer, and a buffer swap publishes the finished frame
//! to the consumer (a callback worker thread or a polling caller).

use std::{
    mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use bitflags::bitflags;
use byteorder::{ByteOrder, LE};

use crate::{
    error::{err, Action, ErrorKind, ResultExt},
    format::{self, FrameFormat},
    frame::Frame,
    topo::{
        FormatDesc, FormatIndex, FrameDesc, FrameIndex, FrameIntervals, StreamingInterfaceDesc,
        StreamingInterfaceId,
    },
    transport::{Completion, StreamTransport, Submission, TransferKind, TransferStatus},
    Error, Request, Result, UvcDevice,
};

/// Number of transfers kept in flight per stream.
pub const NUM_TRANSFER_BUFS: usize = 10;

/// Capacity of the per-frame metadata buffer.
pub const XFER_META_BUF_SIZE: usize = 4096;

/// Upper bound on packets bundled into one isochronous transfer.
const MAX_ISO_PACKETS_PER_TRANSFER: usize = 32;

/// Transport-level timeout on every submitted transfer.
const TRANSFER_TIMEOUT: Duration = Duration::from_millis(5000);

/// Frame intervals are expressed in 100 ns units.
const INTERVAL_UNITS_PER_SECOND: u32 = 10_000_000;

const REQ_TYPE_SET: u8 = 0b00100001;
const REQ_TYPE_GET: u8 = 0b10100001;

const VS_PROBE_CONTROL: u8 = 0x01;
const VS_COMMIT_CONTROL: u8 = 0x02;

/// Controls associated with Video Streaming Interfaces.
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
enum VsControl {
    Undefined = 0x00,
    Probe = 0x01,
    Commit = 0x02,
    StillProbe = 0x03,
    StillCommit = 0x04,
    StillImageTrigger = 0x05,
    StreamErrorCode = 0x06,
    GenerateKeyFrame = 0x07,
    UpdateFrameSegment = 0x08,
    SynchDelay = 0x09,
}

bitflags! {
    /// `bmHint` of the stream-control block.
    pub struct ProbeHint: u16 {
        const FIX_FRAME_INTERVAL = 1 << 0;
        const FIX_KEY_FRAME_RATE = 1 << 1;
        const FIX_P_FRAME_RATE = 1 << 2;
        const FIX_COMP_QUALITY = 1 << 3;
        const FIX_COMP_WINDOW_SIZE = 1 << 4;
    }
}

bitflags! {
    /// `bmHeaderInfo` of a payload header (UVC 1.5, 2.4.3.3).
    struct PayloadHeaderFlags: u8 {
        const FRAME_ID = 1 << 0;
        const END_OF_FRAME = 1 << 1;
        const PTS = 1 << 2;
        const SCR = 1 << 3;
        const STILL_IMAGE = 1 << 5;
        const ERROR = 1 << 6;
        const END_OF_HEADER = 1 << 7;
    }
}

/// Wire size of the stream-control block for UVC < 1.10.
pub(crate) const CTRL_LEN_SHORT: usize = 26;
/// Wire size of the stream-control block for UVC >= 1.10.
pub(crate) const CTRL_LEN_FULL: usize = 34;

/// The probe/commit stream-control block (UVC 4.3.1.1).
///
/// Obtain a negotiated block from
/// [`UvcDevice::stream_ctrl_for_format_size`], or fill one in manually and
/// run it through [`UvcDevice::probe_stream_ctrl`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(non_snake_case)]
pub struct StreamCtrl {
    pub bmHint: u16,
    pub bFormatIndex: u8,
    pub bFrameIndex: u8,
    /// Frame interval in 100 ns units.
    pub dwFrameInterval: u32,
    pub wKeyFrameRate: u16,
    pub wPFrameRate: u16,
    pub wCompQuality: u16,
    pub wCompWindowSize: u16,
    pub wDelay: u16,
    pub dwMaxVideoFrameSize: u32,
    pub dwMaxPayloadTransferSize: u32,
    // UVC 1.1 extension.
    pub dwClockFrequency: u32,
    pub bmFramingInfo: u8,
    pub bPreferredVersion: u8,
    pub bMinVersion: u8,
    pub bMaxVersion: u8,
    /// The streaming interface this block targets.
    pub(crate) interface_number: u8,
}

impl StreamCtrl {
    /// Serialises the block into `buf`, whose length selects the 26- or
    /// 34-byte wire layout.
    pub(crate) fn encode(&self, buf: &mut [u8]) {
        LE::write_u16(&mut buf[0..2], self.bmHint);
        buf[2] = self.bFormatIndex;
        buf[3] = self.bFrameIndex;
        LE::write_u32(&mut buf[4..8], self.dwFrameInterval);
        LE::write_u16(&mut buf[8..10], self.wKeyFrameRate);
        LE::write_u16(&mut buf[10..12], self.wPFrameRate);
        LE::write_u16(&mut buf[12..14], self.wCompQuality);
        LE::write_u16(&mut buf[14..16], self.wCompWindowSize);
        LE::write_u16(&mut buf[16..18], self.wDelay);
        LE::write_u32(&mut buf[18..22], self.dwMaxVideoFrameSize);
        LE::write_u32(&mut buf[22..26], self.dwMaxPayloadTransferSize);

        if buf.len() >= CTRL_LEN_FULL {
            LE::write_u32(&mut buf[26..30], self.dwClockFrequency);
            buf[30] = self.bmFramingInfo;
            buf[31] = self.bPreferredVersion;
            buf[32] = self.bMinVersion;
            buf[33] = self.bMaxVersion;
        }
    }

    /// Deserialises the block from `buf`. Extension fields are zeroed when
    /// only the 26-byte layout is present.
    pub(crate) fn decode(&mut self, buf: &[u8]) {
        self.bmHint = LE::read_u16(&buf[0..2]);
        self.bFormatIndex = buf[2];
        self.bFrameIndex = buf[3];
        self.dwFrameInterval = LE::read_u32(&buf[4..8]);
        self.wKeyFrameRate = LE::read_u16(&buf[8..10]);
        self.wPFrameRate = LE::read_u16(&buf[10..12]);
        self.wCompQuality = LE::read_u16(&buf[12..14]);
        self.wCompWindowSize = LE::read_u16(&buf[14..16]);
        self.wDelay = LE::read_u16(&buf[16..18]);
        self.dwMaxVideoFrameSize = LE::read_u32(&buf[18..22]);
        self.dwMaxPayloadTransferSize = LE::read_u32(&buf[22..26]);

        if buf.len() >= CTRL_LEN_FULL {
            self.dwClockFrequency = LE::read_u32(&buf[26..30]);
            self.bmFramingInfo = buf[30];
            self.bPreferredVersion = buf[31];
            self.bMinVersion = buf[32];
            self.bMaxVersion = buf[33];
        } else {
            self.dwClockFrequency = 0;
            self.bmFramingInfo = 0;
            self.bPreferredVersion = 0;
            self.bMinVersion = 0;
            self.bMaxVersion = 0;
        }
    }
}

impl UvcDevice {
    fn stream_ctrl_len(&self) -> usize {
        if self.uvc_version().0 >= 0x0110 {
            CTRL_LEN_FULL
        } else {
            CTRL_LEN_SHORT
        }
    }

    /// Runs a single streaming control query against the probe or commit
    /// control.
    pub(crate) fn query_stream_ctrl(
        &self,
        ctrl: &mut StreamCtrl,
        probe: bool,
        req: Request,
    ) -> Result<()> {
        let len = self.stream_ctrl_len();
        let mut storage = [0u8; CTRL_LEN_FULL];
        let buf = &mut storage[..len];

        let control = if probe {
            VS_PROBE_CONTROL
        } else {
            VS_COMMIT_CONTROL
        };
        let value = u16::from(control) << 8;
        let index = u16::from(ctrl.interface_number);

        if let Request::SetCur = req {
            ctrl.encode(buf);
            let written = self.with_usb(|usb| {
                usb.control_out(
                    REQ_TYPE_SET,
                    req as _,
                    value,
                    index,
                    buf,
                    self.control_timeout(),
                )
                .during(Action::StreamNegotiation)
            })?;
            if written < len {
                return err(
                    ErrorKind::Io,
                    format!("control write only wrote {}/{} bytes", written, len),
                    Action::StreamNegotiation,
                );
            }
        } else {
            let received = self.with_usb(|usb| {
                usb.control_in(
                    REQ_TYPE_GET,
                    req as _,
                    value,
                    index,
                    buf,
                    self.control_timeout(),
                )
                .during(Action::StreamNegotiation)
            })?;
            if received < len {
                return err(
                    ErrorKind::Io,
                    format!("short stream control response ({}/{} bytes)", received, len),
                    Action::StreamNegotiation,
                );
            }
            ctrl.decode(buf);

            // Fix up the block for cameras that fail to set dwMaxVideoFrameSize.
            if ctrl.dwMaxVideoFrameSize == 0 {
                if let Some((_, _, frame)) =
                    self.find_frame_desc(ctrl.bFormatIndex, ctrl.bFrameIndex)
                {
                    ctrl.dwMaxVideoFrameSize = frame.max_video_frame_buffer_size();
                }
            }
        }

        Ok(())
    }

    /// Finds the descriptor for a specific format/frame index pair, searching
    /// all streaming interfaces.
    pub(crate) fn find_frame_desc(
        &self,
        format_index: u8,
        frame_index: u8,
    ) -> Option<(&StreamingInterfaceDesc, &FormatDesc, &FrameDesc)> {
        self.streaming_interfaces().iter().find_map(|intf| {
            intf.frame_by_index(FormatIndex(format_index), FrameIndex(frame_index))
                .map(|(fmt, frm)| (intf, fmt, frm))
        })
    }

    /// Negotiates `ctrl` with the device: proposes it via the probe control
    /// and reads back what the device accepts.
    ///
    /// Fails with `InvalidMode` if the device answers with a different
    /// format/frame selection or payload size than proposed. On success,
    /// `ctrl` holds the device-adjusted block, ready to commit.
    pub fn probe_stream_ctrl(&self, ctrl: &mut StreamCtrl) -> Result<()> {
        let requested = *ctrl;

        self.query_stream_ctrl(ctrl, true, Request::SetCur)?;
        self.query_stream_ctrl(ctrl, true, Request::GetCur)?;

        if ctrl.bFormatIndex != requested.bFormatIndex
            || ctrl.bFrameIndex != requested.bFrameIndex
            || ctrl.dwMaxPayloadTransferSize != requested.dwMaxPayloadTransferSize
        {
            log::debug!(
                "probe mismatch: requested {:?}, device answered {:?}",
                requested,
                ctrl
            );
            return err(
                ErrorKind::InvalidMode,
                "device rejected the proposed streaming parameters",
                Action::StreamNegotiation,
            );
        }

        Ok(())
    }

    /// Produces a negotiated stream-control block for common parameters.
    ///
    /// Walks the descriptor tree for a format matching `format` (which may be
    /// an abstract grouping such as [`FrameFormat::Uncompressed`]) at the
    /// requested size, picks a frame interval for `fps` (`fps == 0` accepts
    /// the first advertised interval), and negotiates the result with the
    /// device. Fails with `InvalidMode` when nothing matches.
    pub fn stream_ctrl_for_format_size(
        &self,
        format: FrameFormat,
        width: u16,
        height: u16,
        fps: u32,
    ) -> Result<StreamCtrl> {
        for intf in self.streaming_interfaces() {
            for fmt in intf.formats() {
                if !format::guid_matches(format, fmt.guid()) {
                    continue;
                }

                for frame in fmt.frames() {
                    if frame.width() != width || frame.height() != height {
                        continue;
                    }

                    self.transport()
                        .claim_interface(intf.id().0)
                        .during(Action::StreamNegotiation)?;

                    let mut ctrl = StreamCtrl {
                        interface_number: intf.id().0,
                        ..StreamCtrl::default()
                    };
                    self.query_stream_ctrl(&mut ctrl, true, Request::GetMax)?;

                    let interval = match select_frame_interval(frame, fps) {
                        Some(iv) => iv,
                        None => continue,
                    };

                    ctrl.bmHint = ProbeHint::FIX_FRAME_INTERVAL.bits();
                    ctrl.bFormatIndex = fmt.index().as_raw();
                    ctrl.bFrameIndex = frame.index().as_raw();
                    ctrl.dwFrameInterval = interval;

                    log::debug!("negotiating parameters: {:?}", ctrl);
                    self.probe_stream_ctrl(&mut ctrl)?;
                    log::debug!("final parameters: {:?}", ctrl);
                    return Ok(ctrl);
                }
            }
        }

        err(
            ErrorKind::InvalidMode,
            format!(
                "no {:?} mode at {}x{} with {} fps",
                format, width, height, fps
            ),
            Action::StreamNegotiation,
        )
    }

    /// Opens a stream on the interface targeted by `ctrl` and commits the
    /// block to the device.
    pub fn stream_open(&self, ctrl: &StreamCtrl) -> Result<StreamHandle<'_>> {
        let interface_number = ctrl.interface_number;
        if !self
            .streaming_interfaces()
            .iter()
            .any(|i| i.id().0 == interface_number)
        {
            return err(
                ErrorKind::NotFound,
                format!("no streaming interface {}", interface_number),
                Action::StreamNegotiation,
            );
        }

        self.transport()
            .claim_interface(interface_number)
            .during(Action::StreamNegotiation)?;

        let mut handle = StreamHandle {
            devh: self,
            interface_number,
            inner: Arc::new(StreamInner {
                transport: self.transport().clone(),
                is_isight: self.uvc_info().is_isight,
                running: AtomicBool::new(false),
                state: Mutex::new(StreamState::new()),
                cond: Condvar::new(),
            }),
            worker: None,
            has_callback: false,
            poll_frame: Frame::new(),
            cur_ctrl: *ctrl,
        };
        handle.commit_ctrl(ctrl)?;
        Ok(handle)
    }
}

fn select_frame_interval(frame: &FrameDesc, fps: u32) -> Option<u32> {
    match frame.intervals() {
        FrameIntervals::Discrete {
            supported_frame_intervals,
        } => supported_frame_intervals
            .iter()
            .copied()
            .find(|&iv| iv != 0 && (fps == 0 || INTERVAL_UNITS_PER_SECOND / iv == fps)),
        FrameIntervals::Continuous {
            min_frame_interval,
            max_frame_interval,
            frame_interval_step,
        } => {
            if fps == 0 {
                return Some(frame.default_frame_interval);
            }
            let iv = INTERVAL_UNITS_PER_SECOND / fps;
            if iv < *min_frame_interval || iv > *max_frame_interval {
                return None;
            }
            let offset = iv - *min_frame_interval;
            if offset != 0 && (*frame_interval_step == 0 || offset % *frame_interval_step != 0) {
                return None;
            }
            Some(iv)
        }
    }
}

/// Callback invoked by the worker thread for every delivered frame.
pub type FrameCallback = Box<dyn FnMut(&Frame) + Send + 'static>;

/// How long [`StreamHandle::get_frame`] may wait for the next frame.
#[derive(Debug, Clone, Copy)]
pub enum PollTimeout {
    /// Return immediately, with `None` if no fresh frame is available.
    Immediate,
    /// Wait until a frame is published.
    Infinite,
    /// Wait at most this long, then fail with `Timeout`.
    After(Duration),
}

/// An open video stream.
///
/// Created with [`UvcDevice::stream_open`]. Dropping the handle stops the
/// stream and releases the interface.
pub struct StreamHandle<'a> {
    devh: &'a UvcDevice,
    interface_number: u8,
    inner: Arc<StreamInner>,
    worker: Option<thread::JoinHandle<()>>,
    has_callback: bool,
    poll_frame: Frame,
    cur_ctrl: StreamCtrl,
}

struct StreamInner {
    transport: Arc<dyn StreamTransport>,
    is_isight: bool,
    running: AtomicBool,
    state: Mutex<StreamState>,
    cond: Condvar,
}

struct StreamState {
    // Stream configuration, fixed between start and stop.
    frame_format: FrameFormat,
    width: u16,
    height: u16,
    /// `dwMaxVideoFrameSize`: capacity of the assembly buffers.
    frame_size: usize,
    endpoint: u8,
    kind: TransferKind,

    // Frame assembly. `out` accumulates the in-progress frame; `hold` is the
    // last published one. Their lengths are the byte counts.
    out: Vec<u8>,
    hold: Vec<u8>,
    meta_out: Vec<u8>,
    meta_hold: Vec<u8>,
    fid: bool,
    pts: u32,
    last_scr: u32,
    seq: u32,
    hold_seq: u32,
    hold_pts: u32,
    hold_last_scr: u32,
    last_polled_seq: u32,
    capture_time_finished: Option<Instant>,

    /// Ring slots with a transfer in flight. The completion hook clears a
    /// slot when its transfer retires; stop waits until all are clear.
    live_transfers: [bool; NUM_TRANSFER_BUFS],
}

impl StreamState {
    fn new() -> Self {
        Self {
            frame_format: FrameFormat::Unknown,
            width: 0,
            height: 0,
            frame_size: 0,
            endpoint: 0,
            kind: TransferKind::Bulk,
            out: Vec::new(),
            hold: Vec::new(),
            meta_out: Vec::new(),
            meta_hold: Vec::new(),
            fid: false,
            pts: 0,
            last_scr: 0,
            seq: 0,
            hold_seq: 0,
            hold_pts: 0,
            hold_last_scr: 0,
            last_polled_seq: 0,
            capture_time_finished: None,
            live_transfers: [false; NUM_TRANSFER_BUFS],
        }
    }

    fn reset_for_start(
        &mut self,
        frame_format: FrameFormat,
        width: u16,
        height: u16,
        frame_size: usize,
        endpoint: u8,
        kind: TransferKind,
    ) {
        self.frame_format = frame_format;
        self.width = width;
        self.height = height;
        self.frame_size = frame_size;
        self.endpoint = endpoint;
        self.kind = kind;

        self.out = Vec::with_capacity(frame_size);
        self.hold = Vec::with_capacity(frame_size);
        self.meta_out = Vec::with_capacity(XFER_META_BUF_SIZE);
        self.meta_hold = Vec::with_capacity(XFER_META_BUF_SIZE);
        self.fid = false;
        self.pts = 0;
        self.last_scr = 0;
        self.seq = 1;
        self.hold_seq = 0;
        self.hold_pts = 0;
        self.hold_last_scr = 0;
        self.last_polled_seq = 0;
        self.capture_time_finished = None;
        self.live_transfers = [false; NUM_TRANSFER_BUFS];
    }

    /// Fills `frame` from the hold buffers. Must be called with the state
    /// lock held.
    fn populate_frame(&self, frame: &mut Frame) {
        frame.format = self.frame_format;
        frame.width = u32::from(self.width);
        frame.height = u32::from(self.height);
        frame.step = self.frame_format.step_for_width(u32::from(self.width));

        frame.data.clear();
        frame.data.extend_from_slice(&self.hold);
        frame.metadata.clear();
        frame.metadata.extend_from_slice(&self.meta_hold);

        frame.sequence = self.hold_seq;
        frame.pts = self.hold_pts;
        frame.source_clock_reference = self.hold_last_scr;
        frame.capture_time_finished = self.capture_time_finished;
    }
}

/// 12-byte tag the iSight embeds in payloads that do carry a UVC header.
const ISIGHT_TAG: [u8; 12] = [
    0x11, 0x22, 0x33, 0x44, 0xde, 0xad, 0xbe, 0xef, 0xde, 0xad, 0xfa, 0xce,
];

impl StreamInner {
    /// Consumes one payload: a bulk transfer's contents, or a single
    /// isochronous packet.
    fn process_payload(&self, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }

        // The iSight omits the header on image payloads and marks
        // header-carrying ones with a magic tag; its headers never carry
        // inline image data.
        let (header_len, data_len) = if self.is_isight {
            let tagged = (payload.len() >= 14 && payload[2..14] == ISIGHT_TAG)
                || (payload.len() >= 15 && payload[3..15] == ISIGHT_TAG);
            if tagged {
                (usize::from(payload[0]), 0)
            } else {
                (0, payload.len())
            }
        } else {
            let header_len = usize::from(payload[0]);
            (header_len, payload.len().saturating_sub(header_len))
        };

        if header_len > payload.len() {
            log::debug!(
                "bogus packet: header length {} > payload length {}",
                header_len,
                payload.len()
            );
            return;
        }

        let flags = if header_len >= 2 {
            PayloadHeaderFlags::from_bits_truncate(payload[1])
        } else {
            PayloadHeaderFlags::empty()
        };

        if flags.contains(PayloadHeaderFlags::ERROR) {
            log::debug!("bad packet: error bit set");
            return;
        }

        let mut state = self.state.lock().unwrap();

        if header_len >= 2 {
            let fid = flags.contains(PayloadHeaderFlags::FRAME_ID);
            if fid != state.fid && !state.out.is_empty() {
                // The device skipped the EOF bit; the FID flip is the frame
                // boundary.
                self.swap_buffers(&mut state);
            }
            state.fid = fid;

            let mut offset = 2;
            if flags.contains(PayloadHeaderFlags::PTS) && header_len >= offset + 4 {
                state.pts = LE::read_u32(&payload[offset..offset + 4]);
                offset += 4;
            }
            if flags.contains(PayloadHeaderFlags::SCR) && header_len >= offset + 6 {
                // The SCR field is 6 bytes on the wire; only the 32-bit
                // source time clock is kept.
                state.last_scr = LE::read_u32(&payload[offset..offset + 4]);
                offset += 6;
            }

            if header_len > offset {
                let metadata = &payload[offset..header_len];
                let room = XFER_META_BUF_SIZE - state.meta_out.len();
                let take = metadata.len().min(room);
                state.meta_out.extend_from_slice(&metadata[..take]);
            }
        }

        if data_len > 0 {
            let room = state.frame_size - state.out.len();
            let take = data_len.min(room);
            state
                .out
                .extend_from_slice(&payload[header_len..header_len + take]);
        }

        if flags.contains(PayloadHeaderFlags::END_OF_FRAME)
            || (state.frame_size > 0 && state.out.len() == state.frame_size)
        {
            self.swap_buffers(&mut state);
        }
    }

    /// Publishes the in-progress frame: swaps `out` and `hold`, wakes every
    /// consumer, and resets the assembly state for the next frame.
    fn swap_buffers(&self, state: &mut StreamState) {
        state.capture_time_finished = Some(Instant::now());

        mem::swap(&mut state.out, &mut state.hold);
        mem::swap(&mut state.meta_out, &mut state.meta_hold);
        state.hold_pts = state.pts;
        state.hold_last_scr = state.last_scr;
        state.hold_seq = state.seq;

        // Broadcast: both the callback worker and a polling caller may wait.
        self.cond.notify_all();

        state.seq += 1;
        state.out.clear();
        state.meta_out.clear();
        state.pts = 0;
        state.last_scr = 0;
    }

    fn make_submission(self: &Arc<Self>, slot: usize, buffer: Vec<u8>) -> Submission {
        let (endpoint, kind) = {
            let state = self.state.lock().unwrap();
            (state.endpoint, state.kind)
        };
        let inner = self.clone();
        Submission {
            slot,
            endpoint,
            kind,
            buffer,
            timeout: TRANSFER_TIMEOUT,
            on_done: Arc::new(move |completion| inner.on_transfer_done(completion)),
        }
    }

    /// Completion hook: one invocation per retired transfer.
    fn on_transfer_done(self: &Arc<Self>, completion: Completion) {
        let Completion {
            slot,
            status,
            buffer,
            actual_length,
            iso_packets,
        } = completion;

        match status {
            TransferStatus::Completed => {
                if iso_packets.is_empty() {
                    self.process_payload(&buffer[..actual_length.min(buffer.len())]);
                } else {
                    for pkt in &iso_packets {
                        if pkt.status != TransferStatus::Completed {
                            log::debug!("bad packet (transfer): {:?}", pkt.status);
                            continue;
                        }
                        if pkt.actual_length == 0 {
                            continue;
                        }
                        let end = (pkt.offset + pkt.actual_length).min(buffer.len());
                        self.process_payload(&buffer[pkt.offset..end]);
                    }
                }
                self.resubmit_or_retire(slot, buffer);
            }
            TransferStatus::Cancelled | TransferStatus::Error | TransferStatus::NoDevice => {
                self.retire_slot(slot);
            }
            TransferStatus::TimedOut | TransferStatus::Stall | TransferStatus::Overflow => {
                log::warn!("transfer on slot {} reported {:?}", slot, status);
                self.resubmit_or_retire(slot, buffer);
            }
        }
    }

    fn resubmit_or_retire(self: &Arc<Self>, slot: usize, buffer: Vec<u8>) {
        if !self.running.load(Ordering::SeqCst) {
            self.retire_slot(slot);
            return;
        }

        let submission = self.make_submission(slot, buffer);
        if let Err(e) = self.transport.submit(submission) {
            log::warn!("failed to resubmit transfer on slot {}: {}", slot, e);
            self.retire_slot(slot);
        }
    }

    fn retire_slot(&self, slot: usize) {
        let mut state = self.state.lock().unwrap();
        state.live_transfers[slot] = false;
        self.cond.notify_all();
    }
}

/// Callback worker loop: waits for publishes and runs the user callback
/// outside the lock. Frames published while a callback is running are
/// dropped; the consumer always observes the latest publish.
fn user_caller(inner: Arc<StreamInner>, mut cb: FrameCallback) {
    let mut last_seq = 0u32;
    let mut frame = Frame::new();

    loop {
        {
            let mut state = inner.state.lock().unwrap();
            loop {
                if !inner.running.load(Ordering::SeqCst) {
                    return;
                }
                if last_seq != state.hold_seq {
                    break;
                }
                state = inner.cond.wait(state).unwrap();
            }
            last_seq = state.hold_seq;
            state.populate_frame(&mut frame);
        }

        cb(&frame);
    }
}

impl<'a> StreamHandle<'a> {
    /// The committed stream-control block.
    pub fn ctrl(&self) -> &StreamCtrl {
        &self.cur_ctrl
    }

    /// Whether the stream is currently running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Changes the streaming mode by committing a new control block.
    ///
    /// Fails with `Busy` while the stream is running.
    pub fn commit_ctrl(&mut self, ctrl: &StreamCtrl) -> Result<()> {
        if self.is_running() {
            return err(
                ErrorKind::Busy,
                "cannot change mode while the stream is running",
                Action::StreamNegotiation,
            );
        }

        let mut committed = *ctrl;
        committed.interface_number = self.interface_number;
        self.devh
            .query_stream_ctrl(&mut committed, false, Request::SetCur)?;
        self.cur_ctrl = committed;
        Ok(())
    }

    /// Starts streaming in polling mode; frames are fetched with
    /// [`get_frame`](Self::get_frame).
    pub fn start(&mut self) -> Result<()> {
        self.start_streaming(None)
    }

    /// Starts streaming into `cb`, which runs on a dedicated worker thread.
    ///
    /// The frame reference is only valid for the duration of the call;
    /// callbacks that need to keep the image must copy it.
    pub fn start_with_callback(
        &mut self,
        cb: impl FnMut(&Frame) + Send + 'static,
    ) -> Result<()> {
        self.start_streaming(Some(Box::new(cb)))
    }

    fn start_streaming(&mut self, cb: Option<FrameCallback>) -> Result<()> {
        if self.is_running() {
            return err(
                ErrorKind::Busy,
                "stream is already running",
                Action::StartingStream,
            );
        }

        let ctrl = self.cur_ctrl;
        let intf = self
            .devh
            .streaming_interface_by_id(StreamingInterfaceId(self.interface_number));
        let (format_desc, frame_desc) = intf
            .frame_by_index(
                FormatIndex(ctrl.bFormatIndex),
                FrameIndex(ctrl.bFrameIndex),
            )
            .ok_or_else(|| {
                Error::msg(
                    ErrorKind::InvalidParam,
                    format!(
                        "no frame descriptor for format {} frame {}",
                        ctrl.bFormatIndex, ctrl.bFrameIndex
                    ),
                )
                .action(Action::StartingStream)
            })?;

        let frame_format = format::format_for_guid(format_desc.guid());
        if frame_format == FrameFormat::Unknown {
            return err(
                ErrorKind::NotSupported,
                format!("unrecognized format GUID {:02x?}", format_desc.guid()),
                Action::StartingStream,
            );
        }

        let frame_size = ctrl.dwMaxVideoFrameSize as usize;
        let endpoint = intf.endpoint_address();

        // An interface with alternate settings streams isochronously (UVC
        // 1.5, 2.4.3); a lone altsetting means a bulk endpoint.
        let isochronous = intf.altsettings().len() > 1;

        let (kind, transfer_size) = if isochronous {
            // The largest payload the device may send per packet in the
            // committed configuration.
            let config_bytes_per_packet = ctrl.dwMaxPayloadTransferSize as usize;

            // Walk the altsettings (assumed to have increasing packet sizes)
            // and take the first whose endpoint can carry that payload.
            let mut selected = None;
            for alt in intf.altsettings() {
                let endpoint_bytes_per_packet = alt
                    .endpoint(endpoint)
                    .map(|ep| ep.bytes_per_packet())
                    .unwrap_or(0);

                if endpoint_bytes_per_packet > 0
                    && endpoint_bytes_per_packet >= config_bytes_per_packet
                {
                    // Transfers are at most one frame long, within reason.
                    let mut packets_per_transfer = (frame_size + endpoint_bytes_per_packet - 1)
                        / endpoint_bytes_per_packet;
                    packets_per_transfer = packets_per_transfer.clamp(1, MAX_ISO_PACKETS_PER_TRANSFER);

                    selected = Some((
                        alt.alt_setting(),
                        packets_per_transfer,
                        endpoint_bytes_per_packet,
                    ));
                    break;
                }
            }

            let (alt_setting, packets, bytes_per_packet) = selected.ok_or_else(|| {
                Error::msg(
                    ErrorKind::InvalidMode,
                    "no altsetting offers enough isochronous bandwidth",
                )
                .action(Action::StartingStream)
            })?;

            self.inner
                .transport
                .set_alt_setting(self.interface_number, alt_setting)
                .during(Action::SelectingAltSetting)?;

            (
                TransferKind::Isochronous {
                    packets,
                    bytes_per_packet,
                },
                packets * bytes_per_packet,
            )
        } else {
            (TransferKind::Bulk, ctrl.dwMaxPayloadTransferSize as usize)
        };

        {
            let mut state = self.inner.state.lock().unwrap();
            state.reset_for_start(
                frame_format,
                frame_desc.width(),
                frame_desc.height(),
                frame_size,
                endpoint,
                kind,
            );
        }
        self.inner.running.store(true, Ordering::SeqCst);

        if let Some(cb) = cb {
            let inner = self.inner.clone();
            let worker = thread::Builder::new()
                .name("uvcx-frame-worker".into())
                .spawn(move || user_caller(inner, cb))
                .map_err(|e| {
                    self.inner.running.store(false, Ordering::SeqCst);
                    Error::msg(ErrorKind::Other, format!("failed to spawn worker: {}", e))
                        .action(Action::StartingStream)
                })?;
            self.worker = Some(worker);
            self.has_callback = true;
        }

        // Arm the ring. Bring-up is best-effort: the stream counts as started
        // as long as at least one transfer is live.
        let mut submitted = 0;
        let mut first_error = None;
        for slot in 0..NUM_TRANSFER_BUFS {
            self.inner.state.lock().unwrap().live_transfers[slot] = true;
            let submission = self
                .inner
                .make_submission(slot, vec![0; transfer_size]);
            match self.inner.transport.submit(submission) {
                Ok(()) => submitted += 1,
                Err(e) => {
                    self.inner.state.lock().unwrap().live_transfers[slot] = false;
                    first_error = Some(e);
                    break;
                }
            }
        }

        if submitted == 0 {
            self.inner.running.store(false, Ordering::SeqCst);
            self.inner.cond.notify_all();
            if let Some(worker) = self.worker.take() {
                let _ = worker.join();
            }
            self.has_callback = false;
            return Err(first_error
                .unwrap_or_else(|| Error::msg(ErrorKind::Other, "no transfers submitted"))
                .action(Action::StartingStream));
        }
        if let Some(e) = first_error {
            log::warn!(
                "only {}/{} stream transfers submitted: {}",
                submitted,
                NUM_TRANSFER_BUFS,
                e
            );
        }

        Ok(())
    }

    /// Polls for the next frame.
    ///
    /// Fails with `InvalidParam` when the stream is not running and with
    /// `CallbackExists` when the stream delivers through a callback worker.
    /// Returns `Ok(None)` when `PollTimeout::Immediate` finds no fresh frame,
    /// and `Timeout` when a bounded wait expires. The returned reference is
    /// valid until the next call.
    pub fn get_frame(&mut self, timeout: PollTimeout) -> Result<Option<&Frame>> {
        if !self.is_running() {
            return err(
                ErrorKind::InvalidParam,
                "stream is not running",
                Action::ReadingFrame,
            );
        }
        if self.has_callback {
            return Err(Error::new(ErrorKind::CallbackExists));
        }

        let mut state = self.inner.state.lock().unwrap();

        if state.last_polled_seq < state.hold_seq {
            state.populate_frame(&mut self.poll_frame);
            state.last_polled_seq = state.hold_seq;
            return Ok(Some(&self.poll_frame));
        }

        let (mut state, timed_out) = match timeout {
            PollTimeout::Immediate => return Ok(None),
            PollTimeout::Infinite => (self.inner.cond.wait(state).unwrap(), false),
            PollTimeout::After(dur) => {
                let (state, res) = self.inner.cond.wait_timeout(state, dur).unwrap();
                (state, res.timed_out())
            }
        };

        if state.last_polled_seq < state.hold_seq {
            state.populate_frame(&mut self.poll_frame);
            state.last_polled_seq = state.hold_seq;
            Ok(Some(&self.poll_frame))
        } else if timed_out {
            Err(Error::new(ErrorKind::Timeout))
        } else {
            Err(Error::new(ErrorKind::Other))
        }
    }

    /// Stops the stream: cancels the transfer ring, waits for every transfer
    /// to retire, and joins the callback worker.
    pub fn stop(&mut self) -> Result<()> {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return err(
                ErrorKind::InvalidParam,
                "stream is not running",
                Action::StoppingStream,
            );
        }

        {
            let mut state = self.inner.state.lock().unwrap();
            for slot in 0..NUM_TRANSFER_BUFS {
                if state.live_transfers[slot] {
                    if let Err(e) = self.inner.transport.cancel(slot) {
                        log::warn!("failed to cancel transfer on slot {}: {}", slot, e);
                    }
                }
            }

            // The completion hook clears each slot as its transfer retires.
            while state.live_transfers.iter().any(|&live| live) {
                state = self.inner.cond.wait(state).unwrap();
            }

            self.inner.cond.notify_all();
        }

        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.has_callback = false;

        Ok(())
    }

    /// Requests an in-stream still image capture (still-capture method 2).
    pub fn trigger_still_capture(&mut self) -> Result<()> {
        self.devh.set_interface_entity(
            self.interface_number,
            0,
            VsControl::StillImageTrigger as u8,
            &[1],
        )
    }
}

impl Drop for StreamHandle<'_> {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                log::warn!("failed to stop stream on close: {}", e);
            }
        }
        if let Err(e) = self.inner.transport.release_interface(self.interface_number) {
            log::debug!("failed to release streaming interface: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{
        bulk_streaming_interface, iso_streaming_interface, mock_device,
        tiny_bulk_streaming_interface,
    };
    use std::time::Instant;

    const UVC_1_0: u16 = 0x0100;
    const UVC_1_1: u16 = 0x0110;

    fn payload(header: &[u8], data_len: usize, fill: u8) -> Vec<u8> {
        let mut p = header.to_vec();
        p.extend(std::iter::repeat(fill).take(data_len));
        p
    }

    fn open_bulk_stream(
        devh: &UvcDevice,
    ) -> (StreamHandle<'_>, StreamCtrl) {
        let ctrl = devh
            .stream_ctrl_for_format_size(FrameFormat::Yuyv, 640, 480, 30)
            .unwrap();
        let handle = devh.stream_open(&ctrl).unwrap();
        (handle, ctrl)
    }

    fn wait_until(mut pred: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !pred() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn ctrl_codec_round_trips_short_layout() {
        let ctrl = StreamCtrl {
            bmHint: 1,
            bFormatIndex: 2,
            bFrameIndex: 3,
            dwFrameInterval: 333_333,
            wKeyFrameRate: 4,
            wPFrameRate: 5,
            wCompQuality: 6,
            wCompWindowSize: 7,
            wDelay: 8,
            dwMaxVideoFrameSize: 614_400,
            dwMaxPayloadTransferSize: 3072,
            ..StreamCtrl::default()
        };

        let mut buf = [0u8; CTRL_LEN_SHORT];
        ctrl.encode(&mut buf);
        let mut decoded = StreamCtrl::default();
        decoded.decode(&buf);
        assert_eq!(decoded, ctrl);
    }

    #[test]
    fn ctrl_codec_round_trips_full_layout() {
        let ctrl = StreamCtrl {
            bmHint: 1,
            bFormatIndex: 1,
            bFrameIndex: 1,
            dwFrameInterval: 400_000,
            dwMaxVideoFrameSize: 153_600,
            dwMaxPayloadTransferSize: 1024,
            dwClockFrequency: 48_000_000,
            bmFramingInfo: 0b11,
            bPreferredVersion: 1,
            bMinVersion: 1,
            bMaxVersion: 5,
            ..StreamCtrl::default()
        };

        let mut buf = [0u8; CTRL_LEN_FULL];
        ctrl.encode(&mut buf);
        let mut decoded = StreamCtrl::default();
        decoded.decode(&buf);
        assert_eq!(decoded, ctrl);

        // The 26-byte layout drops the extension fields.
        let mut short = StreamCtrl::default();
        short.decode(&buf[..CTRL_LEN_SHORT]);
        assert_eq!(short.dwClockFrequency, 0);
        assert_eq!(short.dwMaxVideoFrameSize, ctrl.dwMaxVideoFrameSize);
    }

    #[test]
    fn resolver_selects_discrete_interval() {
        let (devh, transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);

        let ctrl = devh
            .stream_ctrl_for_format_size(FrameFormat::Yuyv, 640, 480, 30)
            .unwrap();

        assert_eq!(ctrl.bFormatIndex, 1);
        assert_eq!(ctrl.bFrameIndex, 1);
        assert_eq!(ctrl.dwFrameInterval, 333_333);
        assert_eq!(ctrl.bmHint, ProbeHint::FIX_FRAME_INTERVAL.bits());
        // The device answered dwMaxVideoFrameSize == 0; the frame descriptor
        // fills the gap.
        assert_eq!(ctrl.dwMaxVideoFrameSize, 614_400);
        assert!(transport.claimed_interfaces().contains(&1));
    }

    #[test]
    fn resolver_with_zero_fps_takes_first_interval() {
        let (devh, _transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);

        let ctrl = devh
            .stream_ctrl_for_format_size(FrameFormat::Yuyv, 640, 480, 0)
            .unwrap();
        assert_eq!(ctrl.dwFrameInterval, 333_333);
    }

    #[test]
    fn resolver_validates_continuous_range() {
        let (devh, _transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);

        // 40 fps -> 250000 units, on the 50000-unit grid from 200000.
        let ctrl = devh
            .stream_ctrl_for_format_size(FrameFormat::Yuyv, 320, 240, 40)
            .unwrap();
        assert_eq!(ctrl.bFrameIndex, 2);
        assert_eq!(ctrl.dwFrameInterval, 250_000);

        // 43 fps -> 232558 units, off the grid.
        let err = devh
            .stream_ctrl_for_format_size(FrameFormat::Yuyv, 320, 240, 43)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMode);
    }

    #[test]
    fn resolver_rejects_unknown_mode() {
        let (devh, _transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);

        let err = devh
            .stream_ctrl_for_format_size(FrameFormat::Yuyv, 1024, 768, 30)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMode);

        let err = devh
            .stream_ctrl_for_format_size(FrameFormat::Mjpeg, 640, 480, 30)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMode);
    }

    #[test]
    fn probe_mismatch_is_invalid_mode() {
        let (devh, transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);

        // The device claims a different format index than proposed.
        transport.set_probe_mutator(|block| block[2] = 2);

        let err = devh
            .stream_ctrl_for_format_size(FrameFormat::Yuyv, 640, 480, 30)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMode);
    }

    #[test]
    fn open_commits_the_control_block() {
        let (devh, transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);

        let (handle, ctrl) = open_bulk_stream(&devh);
        let committed = transport.committed_ctrl_bytes();
        assert_eq!(committed.len(), CTRL_LEN_SHORT);

        let mut expected = [0u8; CTRL_LEN_SHORT];
        ctrl.encode(&mut expected);
        assert_eq!(committed, expected);
        drop(handle);
    }

    #[test]
    fn uvc_1_1_uses_the_full_layout() {
        let (devh, transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_1, false);

        let (_handle, _ctrl) = open_bulk_stream(&devh);
        assert_eq!(transport.committed_ctrl_bytes().len(), CTRL_LEN_FULL);
    }

    #[test]
    fn commit_while_running_is_busy() {
        let (devh, _transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);

        let (mut handle, ctrl) = open_bulk_stream(&devh);
        handle.start().unwrap();
        assert_eq!(
            handle.commit_ctrl(&ctrl).unwrap_err().kind(),
            ErrorKind::Busy
        );
        assert_eq!(
            handle.start().unwrap_err().kind(),
            ErrorKind::Busy
        );
        handle.stop().unwrap();
    }

    #[test]
    fn clean_frame_assembly() {
        let (devh, transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);
        let (mut handle, _ctrl) = open_bulk_stream(&devh);
        handle.start().unwrap();

        // 12-byte header: PTS + SCR + EOH, then two data-only payloads, the
        // last one carrying EOF.
        let mut header = vec![0x0c, 0x8c];
        header.extend_from_slice(&0x1122_3344u32.to_le_bytes());
        header.extend_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        transport.feed_bulk(&payload(&header, 100, 0xaa));
        transport.feed_bulk(&payload(&[0x02, 0x80], 200, 0xbb));
        transport.feed_bulk(&payload(&[0x02, 0x82], 50, 0xcc));

        let frame = handle.get_frame(PollTimeout::Immediate).unwrap().unwrap();
        assert_eq!(frame.data.len(), 350);
        assert_eq!(frame.pts, 0x1122_3344);
        assert_eq!(frame.source_clock_reference, 0x0403_0201);
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.width, 640);
        assert_eq!(frame.height, 480);
        assert_eq!(frame.format, FrameFormat::Yuyv);
        assert_eq!(frame.step, 1280);
        assert_eq!(&frame.data[..100], &[0xaa; 100][..]);
        assert_eq!(&frame.data[100..300], &[0xbb; 200][..]);
        assert!(frame.capture_time_finished.is_some());

        // Next frame: FID flipped, single payload with EOF.
        transport.feed_bulk(&payload(&[0x02, 0x83], 10, 0xdd));
        let frame = handle.get_frame(PollTimeout::Immediate).unwrap().unwrap();
        assert_eq!(frame.sequence, 2);
        assert_eq!(frame.data.len(), 10);

        handle.stop().unwrap();
    }

    #[test]
    fn missing_eof_publishes_on_fid_flip() {
        let (devh, transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);
        let (mut handle, _ctrl) = open_bulk_stream(&devh);
        handle.start().unwrap();

        // FID 0 payloads totalling 300 bytes, then FID 1 payloads; no EOF
        // anywhere.
        transport.feed_bulk(&payload(&[0x02, 0x00], 150, 0x11));
        transport.feed_bulk(&payload(&[0x02, 0x00], 150, 0x11));
        transport.feed_bulk(&payload(&[0x02, 0x01], 50, 0x22));
        transport.feed_bulk(&payload(&[0x02, 0x01], 50, 0x22));

        let frame = handle.get_frame(PollTimeout::Immediate).unwrap().unwrap();
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.data.len(), 300);

        // Exactly one swap happened; the second frame is still assembling.
        assert!(handle.get_frame(PollTimeout::Immediate).unwrap().is_none());

        // An EOF closes out the accumulated 100 bytes.
        transport.feed_bulk(&payload(&[0x02, 0x03], 0, 0));
        let frame = handle.get_frame(PollTimeout::Immediate).unwrap().unwrap();
        assert_eq!(frame.sequence, 2);
        assert_eq!(frame.data.len(), 100);

        handle.stop().unwrap();
    }

    #[test]
    fn header_only_payload_contributes_no_data() {
        let (devh, transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);
        let (mut handle, _ctrl) = open_bulk_stream(&devh);
        handle.start().unwrap();

        transport.feed_bulk(&[0x02, 0x80]);
        assert!(handle.get_frame(PollTimeout::Immediate).unwrap().is_none());

        transport.feed_bulk(&payload(&[0x02, 0x82], 25, 0x33));
        let frame = handle.get_frame(PollTimeout::Immediate).unwrap().unwrap();
        assert_eq!(frame.data.len(), 25);

        handle.stop().unwrap();
    }

    #[test]
    fn error_bit_discards_the_payload() {
        let (devh, transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);
        let (mut handle, _ctrl) = open_bulk_stream(&devh);
        handle.start().unwrap();

        // Error-bit payload with an FID flip and data; none of it may stick.
        transport.feed_bulk(&payload(&[0x02, 0x41], 80, 0x44));
        transport.feed_bulk(&payload(&[0x02, 0x02], 10, 0x55));

        let frame = handle.get_frame(PollTimeout::Immediate).unwrap().unwrap();
        assert_eq!(frame.data.len(), 10);
        assert_eq!(frame.sequence, 1);

        handle.stop().unwrap();
    }

    #[test]
    fn oversize_header_is_discarded() {
        let (devh, transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);
        let (mut handle, _ctrl) = open_bulk_stream(&devh);
        handle.start().unwrap();

        transport.feed_bulk(&[0x20, 0x02]);
        assert!(handle.get_frame(PollTimeout::Immediate).unwrap().is_none());

        transport.feed_bulk(&payload(&[0x02, 0x02], 5, 0x66));
        let frame = handle.get_frame(PollTimeout::Immediate).unwrap().unwrap();
        assert_eq!(frame.data.len(), 5);

        handle.stop().unwrap();
    }

    #[test]
    fn metadata_is_capped() {
        let (devh, transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);
        let (mut handle, _ctrl) = open_bulk_stream(&devh);
        handle.start().unwrap();

        // 253 metadata bytes per header; 17 payloads exceed the 4096 cap.
        for _ in 0..17 {
            let mut p = vec![0xff, 0x80];
            p.extend(std::iter::repeat(0x77).take(253));
            transport.feed_bulk(&p);
        }
        transport.feed_bulk(&payload(&[0x02, 0x02], 1, 0x01));

        let frame = handle.get_frame(PollTimeout::Immediate).unwrap().unwrap();
        assert_eq!(frame.metadata.len(), XFER_META_BUF_SIZE);

        handle.stop().unwrap();
    }

    #[test]
    fn full_assembly_buffer_forces_publish() {
        let (devh, transport) =
            mock_device(vec![tiny_bulk_streaming_interface()], UVC_1_0, false);
        let ctrl = devh
            .stream_ctrl_for_format_size(FrameFormat::Yuyv, 8, 2, 30)
            .unwrap();
        assert_eq!(ctrl.dwMaxVideoFrameSize, 32);

        let mut handle = devh.stream_open(&ctrl).unwrap();
        handle.start().unwrap();

        // 40 data bytes against a 32-byte frame buffer: clamped and
        // published without any EOF bit.
        transport.feed_bulk(&payload(&[0x02, 0x00], 40, 0x99));

        let frame = handle.get_frame(PollTimeout::Immediate).unwrap().unwrap();
        assert_eq!(frame.data.len(), 32);
        assert_eq!(frame.sequence, 1);

        handle.stop().unwrap();
    }

    #[test]
    fn polled_sequences_are_monotonic() {
        let (devh, transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);
        let (mut handle, _ctrl) = open_bulk_stream(&devh);
        handle.start().unwrap();

        let mut last = 0;
        for i in 1..=3u8 {
            transport.feed_bulk(&payload(&[0x02, 0x02 | (i & 1)], 10, i));
            let frame = handle.get_frame(PollTimeout::Immediate).unwrap().unwrap();
            assert!(frame.sequence > last);
            last = frame.sequence;
        }
        assert_eq!(last, 3);

        handle.stop().unwrap();
    }

    #[test]
    fn bounded_poll_times_out() {
        let (devh, _transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);
        let (mut handle, _ctrl) = open_bulk_stream(&devh);
        handle.start().unwrap();

        let err = handle
            .get_frame(PollTimeout::After(Duration::from_millis(50)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        handle.stop().unwrap();
    }

    #[test]
    fn callback_worker_delivers_latest_frames() {
        let (devh, transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);
        let (mut handle, _ctrl) = open_bulk_stream(&devh);

        let seen: Arc<Mutex<Vec<(u32, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        handle
            .start_with_callback(move |frame| {
                sink.lock().unwrap().push((frame.sequence, frame.data.len()));
            })
            .unwrap();

        // Polling is unavailable with a worker attached.
        assert_eq!(
            handle.get_frame(PollTimeout::Immediate).unwrap_err().kind(),
            ErrorKind::CallbackExists
        );

        transport.feed_bulk(&payload(&[0x02, 0x02], 75, 0xab));
        wait_until(|| !seen.lock().unwrap().is_empty());

        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen[0], (1, 75));
        }

        handle.stop().unwrap();
    }

    #[test]
    fn stop_drains_the_transfer_ring() {
        let (devh, transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);
        let (mut handle, _ctrl) = open_bulk_stream(&devh);

        handle.start_with_callback(|_| {}).unwrap();
        assert_eq!(transport.total_submitted(), NUM_TRANSFER_BUFS);
        assert_eq!(transport.pending_submissions(), NUM_TRANSFER_BUFS);

        handle.stop().unwrap();
        assert_eq!(transport.pending_submissions(), 0);
        assert!(!handle.is_running());

        assert_eq!(
            handle.get_frame(PollTimeout::Immediate).unwrap_err().kind(),
            ErrorKind::InvalidParam
        );
        assert_eq!(handle.stop().unwrap_err().kind(), ErrorKind::InvalidParam);
    }

    #[test]
    fn transport_errors_retire_slots_without_resubmission() {
        let (devh, transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);
        let (mut handle, _ctrl) = open_bulk_stream(&devh);
        handle.start().unwrap();

        let submitted = transport.total_submitted();
        transport.feed_status(TransferStatus::NoDevice);
        assert_eq!(transport.total_submitted(), submitted);
        assert_eq!(transport.pending_submissions(), NUM_TRANSFER_BUFS - 1);

        // A timeout, in contrast, resubmits.
        transport.feed_status(TransferStatus::TimedOut);
        assert_eq!(transport.total_submitted(), submitted + 1);
        assert_eq!(transport.pending_submissions(), NUM_TRANSFER_BUFS - 1);

        handle.stop().unwrap();
    }

    #[test]
    fn partial_submission_still_starts() {
        let (devh, transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);
        let (mut handle, _ctrl) = open_bulk_stream(&devh);

        transport.limit_submissions(3);
        handle.start().unwrap();
        assert!(handle.is_running());
        assert_eq!(transport.total_submitted(), 3);

        handle.stop().unwrap();
    }

    #[test]
    fn start_fails_when_nothing_submits() {
        let (devh, transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);
        let (mut handle, _ctrl) = open_bulk_stream(&devh);

        transport.limit_submissions(0);
        assert!(handle.start().is_err());
        assert!(!handle.is_running());
    }

    #[test]
    fn iso_start_walks_altsettings() {
        let (devh, transport) = mock_device(vec![iso_streaming_interface()], UVC_1_0, false);
        transport.set_max_payload_size(3000);

        let ctrl = devh
            .stream_ctrl_for_format_size(FrameFormat::Yuyv, 640, 480, 30)
            .unwrap();
        let mut handle = devh.stream_open(&ctrl).unwrap();
        handle.start().unwrap();

        // Altsetting 1 (1024 B/packet) is too small for the 3000-byte
        // payloads; altsetting 2 carries 3072.
        assert_eq!(transport.selected_alt_setting(), Some((1, 2)));

        let good1 = payload(&[0x02, 0x00], 100, 0x10);
        let bad = payload(&[0x02, 0x00], 55, 0x20);
        let good2 = payload(&[0x02, 0x02], 50, 0x30);
        transport.feed_iso(&[
            (&good1[..], TransferStatus::Completed),
            (&bad[..], TransferStatus::Error),
            (&good2[..], TransferStatus::Completed),
        ]);

        let frame = handle.get_frame(PollTimeout::Immediate).unwrap().unwrap();
        assert_eq!(frame.data.len(), 150);

        handle.stop().unwrap();
    }

    #[test]
    fn iso_needs_a_big_enough_altsetting() {
        let (devh, transport) = mock_device(vec![iso_streaming_interface()], UVC_1_0, false);
        transport.set_max_payload_size(4096);

        let ctrl = devh
            .stream_ctrl_for_format_size(FrameFormat::Yuyv, 640, 480, 30)
            .unwrap();
        let mut handle = devh.stream_open(&ctrl).unwrap();

        let err = handle.start().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMode);
        assert!(!handle.is_running());
    }

    #[test]
    fn isight_payloads_without_tag_are_pure_data() {
        let (devh, transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, true);
        let (mut handle, _ctrl) = open_bulk_stream(&devh);
        handle.start().unwrap();

        // No tag: every byte is image data, including what would be the
        // header.
        transport.feed_bulk(&[0x55; 100]);

        // Tagged header payload: 14-byte header with EOF, no inline data.
        let mut tagged = vec![14, 0x02];
        tagged.extend_from_slice(&[
            0x11, 0x22, 0x33, 0x44, 0xde, 0xad, 0xbe, 0xef, 0xde, 0xad, 0xfa, 0xce,
        ]);
        transport.feed_bulk(&tagged);

        let frame = handle.get_frame(PollTimeout::Immediate).unwrap().unwrap();
        assert_eq!(frame.data.len(), 100);

        handle.stop().unwrap();
    }

    #[test]
    fn drop_stops_and_releases_the_interface() {
        let (devh, transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);
        let (mut handle, _ctrl) = open_bulk_stream(&devh);
        handle.start().unwrap();
        drop(handle);

        assert_eq!(transport.pending_submissions(), 0);
        assert!(transport.released_interfaces().contains(&1));
    }

    #[test]
    fn still_capture_trigger_reaches_the_device() {
        let (devh, transport) = mock_device(vec![bulk_streaming_interface()], UVC_1_0, false);
        let (mut handle, _ctrl) = open_bulk_stream(&devh);

        handle.trigger_still_capture().unwrap();
        assert_eq!(transport.still_trigger_count(), 1);
    }
}

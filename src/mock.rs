//! Scripted transport and device model for exercising the streaming pipeline
//! without hardware.
//!
//! Completions are delivered from a dedicated thread, the way a real USB
//! event loop would deliver them, so the lock ordering between the pipeline
//! and the transport is exercised realistically (`cancel` never runs the
//! completion hook synchronously).

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    detect::{ControlInterface, UvcInfo},
    format,
    topo::{
        AltSettingDesc, ControlHeader, EndpointDesc, FormatDesc, FormatIndex, FormatKind,
        FrameCapabilities, FrameDesc, FrameIndex, FrameIntervals, InputHeader, InputInterfaceInfo,
        StillCaptureMethod, StreamingInterfaceDesc, StreamingInterfaceId,
        TermId, Topology, TriggerSupport, TriggerUsage,
    },
    transport::{
        Completion, IsoPacket, StreamTransport, Submission, TransferKind, TransferStatus,
    },
    util::BcdVersion,
    Error, ErrorKind, Result, UvcDevice,
};

const WAIT_LIMIT: Duration = Duration::from_secs(2);

const SET_CUR: u8 = 0x01;
const GET_CUR: u8 = 0x81;
const GET_MAX: u8 = 0x83;

const SEL_PROBE: u8 = 0x01;
const SEL_COMMIT: u8 = 0x02;
const SEL_STILL_TRIGGER: u8 = 0x05;

pub(crate) struct MockTransport {
    shared: Arc<Shared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

struct Shared {
    state: Mutex<MockState>,
    cond: Condvar,
    shutdown: AtomicBool,
}

#[derive(Default)]
struct MockState {
    probe_cur: Vec<u8>,
    commit_cur: Vec<u8>,
    probe_mutator: Option<Box<dyn FnMut(&mut [u8]) + Send>>,
    /// `dwMaxPayloadTransferSize` reported by GET_MAX.
    max_payload_size: u32,
    claimed: Vec<u8>,
    released: Vec<u8>,
    alt_selected: Option<(u8, u8)>,
    still_triggers: usize,
    submissions: Vec<Option<Submission>>,
    events: VecDeque<Event>,
    delivering: bool,
    /// Remaining successful submissions, if limited.
    submit_limit: Option<usize>,
    total_submitted: usize,
}

enum Event {
    Complete {
        slot: usize,
        status: TransferStatus,
        data: Vec<u8>,
    },
    Iso {
        slot: usize,
        packets: Vec<(Vec<u8>, TransferStatus)>,
    },
}

impl Event {
    fn slot(&self) -> usize {
        match self {
            Event::Complete { slot, .. } | Event::Iso { slot, .. } => *slot,
        }
    }
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(MockState {
                max_payload_size: 4096,
                ..MockState::default()
            }),
            cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let worker = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("mock-usb-events".into())
                .spawn(move || delivery_thread(&shared))
                .expect("failed to spawn mock delivery thread")
        };

        Arc::new(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Rewrites every GET_CUR(probe) response, e.g. to simulate a device that
    /// answers the probe with different parameters than proposed.
    pub(crate) fn set_probe_mutator(&self, f: impl FnMut(&mut [u8]) + Send + 'static) {
        self.shared.state.lock().unwrap().probe_mutator = Some(Box::new(f));
    }

    /// Makes every submission past the next `n` fail with `NoMem`.
    pub(crate) fn limit_submissions(&self, n: usize) {
        self.shared.state.lock().unwrap().submit_limit = Some(n);
    }

    /// Changes the `dwMaxPayloadTransferSize` the device reports via GET_MAX.
    pub(crate) fn set_max_payload_size(&self, size: u32) {
        self.shared.state.lock().unwrap().max_payload_size = size;
    }

    pub(crate) fn claimed_interfaces(&self) -> Vec<u8> {
        self.shared.state.lock().unwrap().claimed.clone()
    }

    pub(crate) fn released_interfaces(&self) -> Vec<u8> {
        self.shared.state.lock().unwrap().released.clone()
    }

    pub(crate) fn selected_alt_setting(&self) -> Option<(u8, u8)> {
        self.shared.state.lock().unwrap().alt_selected
    }

    pub(crate) fn still_trigger_count(&self) -> usize {
        self.shared.state.lock().unwrap().still_triggers
    }

    pub(crate) fn total_submitted(&self) -> usize {
        self.shared.state.lock().unwrap().total_submitted
    }

    pub(crate) fn pending_submissions(&self) -> usize {
        self.shared
            .state
            .lock()
            .unwrap()
            .submissions
            .iter()
            .filter(|s| s.is_some())
            .count()
    }

    pub(crate) fn committed_ctrl_bytes(&self) -> Vec<u8> {
        self.shared.state.lock().unwrap().commit_cur.clone()
    }

    /// Completes the oldest pending submission as a bulk transfer carrying
    /// `payload`, and waits until the pipeline has consumed it.
    pub(crate) fn feed_bulk(&self, payload: &[u8]) {
        let slot = self.wait_for_pending_slot();
        self.push_event(Event::Complete {
            slot,
            status: TransferStatus::Completed,
            data: payload.to_vec(),
        });
        self.flush();
    }

    /// Completes the oldest pending submission with the given status and no
    /// data.
    pub(crate) fn feed_status(&self, status: TransferStatus) {
        let slot = self.wait_for_pending_slot();
        self.push_event(Event::Complete {
            slot,
            status,
            data: Vec::new(),
        });
        self.flush();
    }

    /// Completes the oldest pending submission as an isochronous transfer
    /// with the given per-packet payloads and statuses.
    pub(crate) fn feed_iso(&self, packets: &[(&[u8], TransferStatus)]) {
        let slot = self.wait_for_pending_slot();
        self.push_event(Event::Iso {
            slot,
            packets: packets
                .iter()
                .map(|(data, status)| (data.to_vec(), *status))
                .collect(),
        });
        self.flush();
    }

    fn push_event(&self, event: Event) {
        let mut state = self.shared.state.lock().unwrap();
        state.events.push_back(event);
        self.shared.cond.notify_all();
    }

    fn wait_for_pending_slot(&self) -> usize {
        let deadline = Instant::now() + WAIT_LIMIT;
        let mut state = self.shared.state.lock().unwrap();
        loop {
            let quiet = state.events.is_empty() && !state.delivering;
            if quiet {
                if let Some(slot) = state.submissions.iter().position(|s| s.is_some()) {
                    return slot;
                }
            }
            let left = deadline
                .checked_duration_since(Instant::now())
                .expect("timed out waiting for a pending submission");
            let (guard, _) = self.shared.cond.wait_timeout(state, left).unwrap();
            state = guard;
        }
    }

    /// Blocks until every queued event has been delivered.
    pub(crate) fn flush(&self) {
        let deadline = Instant::now() + WAIT_LIMIT;
        let mut state = self.shared.state.lock().unwrap();
        while !state.events.is_empty() || state.delivering {
            let left = deadline
                .checked_duration_since(Instant::now())
                .expect("timed out flushing mock events");
            let (guard, _) = self.shared.cond.wait_timeout(state, left).unwrap();
            state = guard;
        }
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.cond.notify_all();
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
    }
}

fn delivery_thread(shared: &Shared) {
    loop {
        let (event, submission) = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }

                let ready = state.events.iter().position(|ev| {
                    state
                        .submissions
                        .get(ev.slot())
                        .map_or(false, |s| s.is_some())
                });
                if let Some(idx) = ready {
                    let event = state.events.remove(idx).unwrap();
                    let submission = state.submissions[event.slot()].take().unwrap();
                    state.delivering = true;
                    break (event, submission);
                }

                state = shared.cond.wait(state).unwrap();
            }
        };

        deliver(event, submission);

        let mut state = shared.state.lock().unwrap();
        state.delivering = false;
        shared.cond.notify_all();
    }
}

fn deliver(event: Event, submission: Submission) {
    let Submission {
        slot,
        kind,
        mut buffer,
        on_done,
        ..
    } = submission;

    match event {
        Event::Complete { status, data, .. } => {
            let n = data.len().min(buffer.len());
            buffer[..n].copy_from_slice(&data[..n]);
            on_done(Completion {
                slot,
                status,
                buffer,
                actual_length: n,
                iso_packets: Vec::new(),
            });
        }
        Event::Iso { packets, .. } => {
            let bytes_per_packet = match kind {
                TransferKind::Isochronous {
                    bytes_per_packet, ..
                } => bytes_per_packet,
                TransferKind::Bulk => panic!("iso event fed to a bulk submission"),
            };

            let mut descs = Vec::with_capacity(packets.len());
            for (i, (data, status)) in packets.iter().enumerate() {
                let offset = i * bytes_per_packet;
                let n = data.len().min(bytes_per_packet);
                if offset + n <= buffer.len() {
                    buffer[offset..offset + n].copy_from_slice(&data[..n]);
                }
                descs.push(IsoPacket {
                    offset,
                    actual_length: n,
                    status: *status,
                });
            }

            on_done(Completion {
                slot,
                status: TransferStatus::Completed,
                buffer,
                actual_length: 0,
                iso_packets: descs,
            });
        }
    }
}

impl StreamTransport for MockTransport {
    fn control_in(
        &self,
        _request_type: u8,
        request: u8,
        value: u16,
        _index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize> {
        let mut state = self.shared.state.lock().unwrap();
        let selector = (value >> 8) as u8;

        for b in buf.iter_mut() {
            *b = 0;
        }

        match (selector, request) {
            (SEL_PROBE, GET_CUR) => {
                let mut data = state.probe_cur.clone();
                data.resize(buf.len(), 0);
                if let Some(mutator) = state.probe_mutator.as_mut() {
                    mutator(&mut data);
                }
                buf.copy_from_slice(&data);
            }
            (SEL_PROBE, GET_MAX) => {
                // Zeroed block with only the payload size populated;
                // dwMaxVideoFrameSize stays 0 to exercise the fixup path.
                if buf.len() >= 26 {
                    buf[22..26].copy_from_slice(&state.max_payload_size.to_le_bytes());
                }
            }
            (SEL_COMMIT, GET_CUR) => {
                let mut data = state.commit_cur.clone();
                data.resize(buf.len(), 0);
                buf.copy_from_slice(&data);
            }
            _ => {}
        }

        Ok(buf.len())
    }

    fn control_out(
        &self,
        _request_type: u8,
        request: u8,
        value: u16,
        _index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize> {
        let mut state = self.shared.state.lock().unwrap();
        let selector = (value >> 8) as u8;

        if request == SET_CUR {
            match selector {
                SEL_PROBE => state.probe_cur = data.to_vec(),
                SEL_COMMIT => state.commit_cur = data.to_vec(),
                SEL_STILL_TRIGGER => state.still_triggers += 1,
                _ => {}
            }
        }

        Ok(data.len())
    }

    fn claim_interface(&self, interface: u8) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        if !state.claimed.contains(&interface) {
            state.claimed.push(interface);
        }
        Ok(())
    }

    fn release_interface(&self, interface: u8) -> Result<()> {
        self.shared.state.lock().unwrap().released.push(interface);
        Ok(())
    }

    fn set_alt_setting(&self, interface: u8, alt_setting: u8) -> Result<()> {
        self.shared.state.lock().unwrap().alt_selected = Some((interface, alt_setting));
        Ok(())
    }

    fn submit(&self, submission: Submission) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();

        if let Some(left) = &mut state.submit_limit {
            if *left == 0 {
                return Err(Error::msg(ErrorKind::NoMem, "mock submission limit reached"));
            }
            *left -= 1;
        }

        let slot = submission.slot;
        if state.submissions.len() <= slot {
            state.submissions.resize_with(slot + 1, || None);
        }
        assert!(
            state.submissions[slot].is_none(),
            "double submission on slot {}",
            slot
        );
        state.submissions[slot] = Some(submission);
        state.total_submitted += 1;
        self.shared.cond.notify_all();
        Ok(())
    }

    fn cancel(&self, slot: usize) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        state.events.push_back(Event::Complete {
            slot,
            status: TransferStatus::Cancelled,
            data: Vec::new(),
        });
        self.shared.cond.notify_all();
        Ok(())
    }
}

/// A 640x480 YUYV frame descriptor with three discrete intervals.
fn frame_640x480_discrete() -> FrameDesc {
    FrameDesc {
        frame_index: FrameIndex(1),
        capabilities: FrameCapabilities::empty(),
        width: 640,
        height: 480,
        min_bit_rate: 614_400 * 8 * 30,
        max_bit_rate: 614_400 * 8 * 30,
        max_video_frame_buffer_size: 614_400,
        default_frame_interval: 333_333,
        intervals: FrameIntervals::Discrete {
            supported_frame_intervals: vec![333_333, 666_666, 1_000_000],
        },
    }
}

/// A 320x240 YUYV frame descriptor with a continuous interval range.
fn frame_320x240_continuous() -> FrameDesc {
    FrameDesc {
        frame_index: FrameIndex(2),
        capabilities: FrameCapabilities::empty(),
        width: 320,
        height: 240,
        min_bit_rate: 153_600 * 8 * 30,
        max_bit_rate: 153_600 * 8 * 30,
        max_video_frame_buffer_size: 153_600,
        default_frame_interval: 333_333,
        intervals: FrameIntervals::Continuous {
            min_frame_interval: 200_000,
            max_frame_interval: 400_000,
            frame_interval_step: 50_000,
        },
    }
}

fn yuyv_format() -> FormatDesc {
    FormatDesc {
        format_index: FormatIndex(1),
        kind: FormatKind::Uncompressed,
        guid: format::GUID_YUYV,
        bits_per_pixel: 16,
        default_frame_index: FrameIndex(1),
        frames: vec![frame_640x480_discrete(), frame_320x240_continuous()],
    }
}

fn input_header(endpoint: u8) -> InputHeader {
    InputHeader {
        num_formats: 1,
        total_length: 0,
        endpoint_address: endpoint,
        info: InputInterfaceInfo::empty(),
        terminal_link: TermId::new(2).unwrap(),
        still_capture_method: StillCaptureMethod::Method2,
        trigger_support: TriggerSupport::Supported,
        trigger_usage: TriggerUsage::InitiateStillImageCapture,
        format_controls: Vec::new(),
    }
}

/// A streaming interface with a single altsetting: a bulk video endpoint.
pub(crate) fn bulk_streaming_interface() -> StreamingInterfaceDesc {
    StreamingInterfaceDesc {
        id: StreamingInterfaceId(1),
        header: input_header(0x81),
        formats: vec![yuyv_format()],
        altsettings: vec![AltSettingDesc {
            alt_setting: 0,
            endpoints: vec![EndpointDesc {
                address: 0x81,
                max_packet_size: 512,
                ss_bytes_per_interval: None,
            }],
        }],
    }
}

/// A bulk streaming interface whose only frame holds 32 bytes, for tests
/// that need to fill the assembly buffer.
pub(crate) fn tiny_bulk_streaming_interface() -> StreamingInterfaceDesc {
    let format = FormatDesc {
        format_index: FormatIndex(1),
        kind: FormatKind::Uncompressed,
        guid: format::GUID_YUYV,
        bits_per_pixel: 16,
        default_frame_index: FrameIndex(1),
        frames: vec![FrameDesc {
            frame_index: FrameIndex(1),
            capabilities: FrameCapabilities::empty(),
            width: 8,
            height: 2,
            min_bit_rate: 32 * 8 * 30,
            max_bit_rate: 32 * 8 * 30,
            max_video_frame_buffer_size: 32,
            default_frame_interval: 333_333,
            intervals: FrameIntervals::Discrete {
                supported_frame_intervals: vec![333_333],
            },
        }],
    };

    StreamingInterfaceDesc {
        id: StreamingInterfaceId(1),
        header: input_header(0x81),
        formats: vec![format],
        altsettings: vec![AltSettingDesc {
            alt_setting: 0,
            endpoints: vec![EndpointDesc {
                address: 0x81,
                max_packet_size: 512,
                ss_bytes_per_interval: None,
            }],
        }],
    }
}

/// A streaming interface with three altsettings of increasing isochronous
/// packet size (0, 1024, 3072 bytes).
pub(crate) fn iso_streaming_interface() -> StreamingInterfaceDesc {
    StreamingInterfaceDesc {
        id: StreamingInterfaceId(1),
        header: input_header(0x81),
        formats: vec![yuyv_format()],
        altsettings: vec![
            AltSettingDesc {
                alt_setting: 0,
                endpoints: Vec::new(),
            },
            AltSettingDesc {
                alt_setting: 1,
                endpoints: vec![EndpointDesc {
                    address: 0x81,
                    max_packet_size: 1024,
                    ss_bytes_per_interval: None,
                }],
            },
            AltSettingDesc {
                alt_setting: 2,
                endpoints: vec![EndpointDesc {
                    address: 0x81,
                    // 3 transactions of 1024 bytes per microframe
                    max_packet_size: (2 << 11) | 1024,
                    ss_bytes_per_interval: None,
                }],
            },
        ],
    }
}

/// Builds a `UvcDevice` over a fresh mock transport.
pub(crate) fn mock_device(
    interfaces: Vec<StreamingInterfaceDesc>,
    bcd_uvc: u16,
    is_isight: bool,
) -> (UvcDevice, Arc<MockTransport>) {
    let transport = MockTransport::new();
    let info = UvcInfo {
        control_interface: ControlInterface {
            interface_number: 0,
            control_interrupt_ep: None,
            topo: Topology {
                header: ControlHeader {
                    uvc_version: BcdVersion(bcd_uvc),
                    total_len: 0,
                    clock_freq_hz: 48_000_000,
                    streaming_interfaces: interfaces.iter().map(|i| i.id().0).collect(),
                },
                units: Vec::new(),
                inputs: Vec::new(),
                outputs: Vec::new(),
            },
        },
        streaming_interfaces: interfaces,
        is_isight,
    };

    let device = UvcDevice::from_parts(transport.clone(), info);
    (device, transport)
}

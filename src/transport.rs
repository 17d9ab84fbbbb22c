//! The USB transport seam used by the streaming pipeline.
//!
//! The pipeline core is written against [`StreamTransport`]: synchronous
//! control transfers for negotiation, plus asynchronous bulk/isochronous
//! submissions whose completions are delivered through a hook. This keeps the
//! frame-assembly state machine independent of the concrete USB backend, and
//! lets the tests drive it with a scripted transport.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex,
    },
    thread,
    time::Duration,
};

use rusb::{Context, DeviceHandle};

use crate::{
    error::{Action, ErrorKind},
    Error, Result,
};

/// Hook invoked by the transport once a submitted transfer has completed,
/// failed, or been cancelled.
///
/// Runs on the transport's completion thread. Implementations must not block
/// on stream consumers and may resubmit from within the hook.
pub type CompletionHandler = dyn Fn(Completion) + Send + Sync;

/// Final status of an asynchronous transfer (or of one isochronous packet).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Transfer completed; data may have been received.
    Completed,
    /// Transfer failed.
    Error,
    /// Transfer timed out.
    TimedOut,
    /// Transfer was cancelled.
    Cancelled,
    /// The endpoint stalled.
    Stall,
    /// The device was disconnected.
    NoDevice,
    /// The device sent more data than requested.
    Overflow,
}

/// Transfer type of a submission.
#[derive(Debug, Clone, Copy)]
pub enum TransferKind {
    /// One transfer carries one payload.
    Bulk,
    /// One transfer carries `packets` payloads of up to `bytes_per_packet`
    /// bytes each.
    Isochronous {
        packets: usize,
        bytes_per_packet: usize,
    },
}

/// An asynchronous transfer handed to [`StreamTransport::submit`].
pub struct Submission {
    /// Ring slot this transfer occupies; echoed back in the [`Completion`].
    pub slot: usize,
    /// Endpoint address to read from.
    pub endpoint: u8,
    pub kind: TransferKind,
    /// Backing buffer. Returned to the completion hook, which may resubmit it.
    pub buffer: Vec<u8>,
    pub timeout: Duration,
    pub on_done: Arc<CompletionHandler>,
}

/// Per-packet descriptor of a completed isochronous transfer.
#[derive(Debug, Clone, Copy)]
pub struct IsoPacket {
    /// Offset of this packet's data within the transfer buffer.
    pub offset: usize,
    /// Bytes actually received.
    pub actual_length: usize,
    pub status: TransferStatus,
}

/// Outcome of a submitted transfer, delivered to the completion hook.
pub struct Completion {
    pub slot: usize,
    pub status: TransferStatus,
    /// The backing buffer passed at submission.
    pub buffer: Vec<u8>,
    /// Bulk: bytes actually received. Isochronous: unused (see `iso_packets`).
    pub actual_length: usize,
    /// Per-packet descriptors; empty for bulk transfers.
    pub iso_packets: Vec<IsoPacket>,
}

/// Contract between the streaming pipeline and a USB backend.
pub trait StreamTransport: Send + Sync {
    /// Synchronous device-to-host control transfer. Returns the number of
    /// bytes received.
    fn control_in(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize>;

    /// Synchronous host-to-device control transfer. Returns the number of
    /// bytes written.
    fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize>;

    fn claim_interface(&self, interface: u8) -> Result<()>;

    fn release_interface(&self, interface: u8) -> Result<()>;

    fn set_alt_setting(&self, interface: u8, alt_setting: u8) -> Result<()>;

    /// Queues an asynchronous transfer. The completion hook fires exactly once
    /// per submission.
    fn submit(&self, submission: Submission) -> Result<()>;

    /// Requests cancellation of the transfer occupying `slot`. Asynchronous:
    /// the hook observes [`TransferStatus::Cancelled`] later. Must not invoke
    /// the hook from within this call (callers may hold stream locks).
    fn cancel(&self, slot: usize) -> Result<()>;
}

/// [`StreamTransport`] over a rusb device handle.
///
/// Control transfers map directly onto libusb's. Bulk submissions are
/// serviced in submission order by a dedicated I/O thread running blocking
/// `read_bulk` calls, which preserves payload ordering on the wire and gives
/// the pipeline the asynchronous completion model it expects. Isochronous
/// submissions are not supported by rusb's safe API and fail with
/// `NotSupported`.
pub struct RusbTransport {
    handle: Arc<DeviceHandle<Context>>,
    shared: Arc<IoShared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

struct IoShared {
    queue: Mutex<IoQueue>,
    cond: Condvar,
    shutdown: AtomicBool,
}

#[derive(Default)]
struct IoQueue {
    pending: VecDeque<Submission>,
    /// Slots whose next servicing must complete as `Cancelled`.
    cancelled: Vec<usize>,
}

impl RusbTransport {
    pub fn new(handle: DeviceHandle<Context>) -> Self {
        let handle = Arc::new(handle);
        let shared = Arc::new(IoShared {
            queue: Mutex::new(IoQueue::default()),
            cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let worker = {
            let handle = handle.clone();
            let shared = shared.clone();
            thread::Builder::new()
                .name("uvcx-usb-io".into())
                .spawn(move || io_thread(&handle, &shared))
                .expect("failed to spawn USB I/O thread")
        };

        Self {
            handle,
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub(crate) fn device_handle(&self) -> &DeviceHandle<Context> {
        &self.handle
    }
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.cond.notify_all();
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
    }
}

fn io_thread(handle: &DeviceHandle<Context>, shared: &IoShared) {
    loop {
        let submission = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    // Flush whatever is still queued as cancelled so no hook
                    // is left waiting for its completion.
                    while let Some(sub) = queue.pending.pop_front() {
                        deliver_cancelled(sub);
                    }
                    return;
                }
                match queue.pending.pop_front() {
                    Some(sub) => break sub,
                    None => queue = shared.cond.wait(queue).unwrap(),
                }
            }
        };

        let was_cancelled = {
            let mut queue = shared.queue.lock().unwrap();
            match queue.cancelled.iter().position(|&s| s == submission.slot) {
                Some(idx) => {
                    queue.cancelled.swap_remove(idx);
                    true
                }
                None => false,
            }
        };
        if was_cancelled {
            deliver_cancelled(submission);
            continue;
        }

        let Submission {
            slot,
            endpoint,
            kind: _,
            mut buffer,
            timeout,
            on_done,
        } = submission;

        let (status, actual_length) = match handle.read_bulk(endpoint, &mut buffer, timeout) {
            Ok(n) => (TransferStatus::Completed, n),
            Err(rusb::Error::Timeout) => (TransferStatus::TimedOut, 0),
            Err(rusb::Error::Pipe) => (TransferStatus::Stall, 0),
            Err(rusb::Error::Overflow) => (TransferStatus::Overflow, 0),
            Err(rusb::Error::NoDevice) => (TransferStatus::NoDevice, 0),
            Err(e) => {
                log::debug!("bulk read on slot {} failed: {}", slot, e);
                (TransferStatus::Error, 0)
            }
        };

        // A cancel that raced with the read wins over its outcome.
        let status = {
            let mut queue = shared.queue.lock().unwrap();
            match queue.cancelled.iter().position(|&s| s == slot) {
                Some(idx) => {
                    queue.cancelled.swap_remove(idx);
                    TransferStatus::Cancelled
                }
                None => status,
            }
        };

        on_done(Completion {
            slot,
            status,
            buffer,
            actual_length,
            iso_packets: Vec::new(),
        });
    }
}

fn deliver_cancelled(submission: Submission) {
    let Submission {
        slot,
        buffer,
        on_done,
        ..
    } = submission;
    on_done(Completion {
        slot,
        status: TransferStatus::Cancelled,
        buffer,
        actual_length: 0,
        iso_packets: Vec::new(),
    });
}

impl StreamTransport for RusbTransport {
    fn control_in(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        Ok(self
            .handle
            .read_control(request_type, request, value, index, buf, timeout)?)
    }

    fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize> {
        Ok(self
            .handle
            .write_control(request_type, request, value, index, data, timeout)?)
    }

    fn claim_interface(&self, interface: u8) -> Result<()> {
        // Every UVC interface is claimed while the device is opened; rusb
        // requires exclusive handle access for claiming, which is gone once
        // the I/O thread shares the handle.
        log::trace!("interface {} already claimed at open", interface);
        Ok(())
    }

    fn release_interface(&self, interface: u8) -> Result<()> {
        // Claims are dropped together with the device handle.
        log::trace!("interface {} released with the device", interface);
        Ok(())
    }

    fn set_alt_setting(&self, interface: u8, alt_setting: u8) -> Result<()> {
        if alt_setting == 0 {
            return Ok(());
        }
        Err(Error::msg(
            ErrorKind::NotSupported,
            format!(
                "altsetting {} on interface {} requires an isochronous-capable backend",
                alt_setting, interface
            ),
        )
        .action(Action::SelectingAltSetting))
    }

    fn submit(&self, submission: Submission) -> Result<()> {
        if let TransferKind::Isochronous { .. } = submission.kind {
            return Err(Error::msg(
                ErrorKind::NotSupported,
                "isochronous transfers are not supported by the rusb backend",
            )
            .action(Action::SubmittingTransfer));
        }

        let mut queue = self.shared.queue.lock().unwrap();
        queue.pending.push_back(submission);
        self.shared.cond.notify_one();
        Ok(())
    }

    fn cancel(&self, slot: usize) -> Result<()> {
        let mut queue = self.shared.queue.lock().unwrap();
        if !queue.cancelled.contains(&slot) {
            queue.cancelled.push(slot);
        }
        self.shared.cond.notify_one();
        Ok(())
    }
}

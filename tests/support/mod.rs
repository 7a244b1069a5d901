//! Deterministic test doubles: a single-threaded mock reactor with a
//! virtual clock, a scripted device, and an event-recording protocol.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use evserial::{
    CallbackError, Device, DeviceError, ErrorReport, Protocol, Reactor, SerialTransport, TimerId,
    WaitHandle,
};

// =============================================================================
// MOCK REACTOR
// =============================================================================

/// A reactor whose queue, timers, and workers are driven explicitly by
/// the test. `dispatch_blocking` runs the work inline and queues the
/// completion, so shutdown sequences resolve deterministically.
pub struct MockReactor {
    inner: RefCell<ReactorInner>,
}

struct MockTimer {
    id: u64,
    due: Duration,
    callback: Box<dyn FnOnce()>,
}

#[derive(Default)]
struct ReactorInner {
    ready: VecDeque<Box<dyn FnOnce()>>,
    timers: Vec<MockTimer>,
    next_timer_id: u64,
    now: Duration,
    readers: HashMap<u64, Rc<dyn Fn()>>,
    writers: HashMap<u64, Rc<dyn Fn()>>,
    reports: Vec<ErrorReport>,
}

impl MockReactor {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            inner: RefCell::new(ReactorInner::default()),
        })
    }

    /// Drain the FIFO queue until it is empty.
    pub fn run(&self) {
        loop {
            let callback = self.inner.borrow_mut().ready.pop_front();
            match callback {
                Some(callback) => callback(),
                None => break,
            }
        }
    }

    /// Move the virtual clock forward, firing due timers in order and
    /// draining the queue after each.
    pub fn advance(&self, delta: Duration) {
        self.run();
        let target = self.inner.borrow().now + delta;
        loop {
            let next = {
                let inner = self.inner.borrow();
                inner
                    .timers
                    .iter()
                    .filter(|timer| timer.due <= target)
                    .min_by_key(|timer| (timer.due, timer.id))
                    .map(|timer| timer.id)
            };
            let Some(id) = next else { break };
            let timer = {
                let mut inner = self.inner.borrow_mut();
                let pos = inner
                    .timers
                    .iter()
                    .position(|timer| timer.id == id)
                    .expect("timer vanished");
                let timer = inner.timers.remove(pos);
                inner.now = inner.now.max(timer.due);
                timer
            };
            (timer.callback)();
            self.run();
        }
        self.inner.borrow_mut().now = target;
    }

    /// Fire the registered read callback for `handle`, then drain the
    /// queue. No-op when no reader is registered.
    pub fn trigger_read(&self, handle: WaitHandle) {
        let callback = self.inner.borrow().readers.get(&handle.0).cloned();
        if let Some(callback) = callback {
            callback();
        }
        self.run();
    }

    /// Fire the registered write callback for `handle`, then drain the
    /// queue. No-op when no writer is registered.
    pub fn trigger_write(&self, handle: WaitHandle) {
        let callback = self.inner.borrow().writers.get(&handle.0).cloned();
        if let Some(callback) = callback {
            callback();
        }
        self.run();
    }

    pub fn has_reader(&self, handle: WaitHandle) -> bool {
        self.inner.borrow().readers.contains_key(&handle.0)
    }

    pub fn has_writer(&self, handle: WaitHandle) -> bool {
        self.inner.borrow().writers.contains_key(&handle.0)
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.borrow().timers.len()
    }

    pub fn reports(&self) -> Vec<ErrorReport> {
        self.inner.borrow().reports.clone()
    }
}

impl Reactor for MockReactor {
    fn call_soon(&self, callback: Box<dyn FnOnce()>) {
        self.inner.borrow_mut().ready.push_back(callback);
    }

    fn call_later(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_timer_id;
        inner.next_timer_id += 1;
        let due = inner.now + delay;
        inner.timers.push(MockTimer { id, due, callback });
        TimerId(id)
    }

    fn cancel_timer(&self, timer: TimerId) {
        self.inner
            .borrow_mut()
            .timers
            .retain(|pending| pending.id != timer.0);
    }

    fn add_reader(&self, handle: WaitHandle, callback: Box<dyn Fn()>) {
        self.inner
            .borrow_mut()
            .readers
            .insert(handle.0, Rc::from(callback));
    }

    fn remove_reader(&self, handle: WaitHandle) {
        self.inner.borrow_mut().readers.remove(&handle.0);
    }

    fn add_writer(&self, handle: WaitHandle, callback: Box<dyn Fn()>) {
        self.inner
            .borrow_mut()
            .writers
            .insert(handle.0, Rc::from(callback));
    }

    fn remove_writer(&self, handle: WaitHandle) {
        self.inner.borrow_mut().writers.remove(&handle.0);
    }

    fn dispatch_blocking(&self, work: Box<dyn FnOnce() + Send>, done: Box<dyn FnOnce()>) {
        work();
        self.inner.borrow_mut().ready.push_back(done);
    }

    fn report_error(&self, report: ErrorReport) {
        self.inner.borrow_mut().reports.push(report);
    }
}

// =============================================================================
// SCRIPTED DEVICE
// =============================================================================

/// Behavior of one `Device::write` call.
#[derive(Debug, Clone)]
pub enum WriteStep {
    /// Accept every offered byte.
    AcceptAll,
    /// Accept at most this many bytes.
    Accept(usize),
    /// Refuse with a would-block condition.
    WouldBlock,
    /// Refuse with an interrupt condition.
    Interrupted,
    /// Fail fatally.
    Fail(DeviceError),
}

#[derive(Debug, Default)]
pub struct DeviceState {
    pub read_queue: VecDeque<Result<Vec<u8>, DeviceError>>,
    pub write_plan: VecDeque<WriteStep>,
    pub written: Vec<u8>,
    pub out_waiting: usize,
    pub flushed: bool,
    pub closed: bool,
    pub handle: Option<WaitHandle>,
}

pub type SharedDeviceState = Arc<Mutex<DeviceState>>;

/// A device whose reads and writes follow a script shared with the test.
#[derive(Debug)]
pub struct MockDevice {
    state: SharedDeviceState,
}

pub const TEST_HANDLE: WaitHandle = WaitHandle(7);

impl MockDevice {
    /// Device with a waitable handle (interrupt-driven readiness).
    pub fn new() -> (Self, SharedDeviceState) {
        let state = Arc::new(Mutex::new(DeviceState {
            handle: Some(TEST_HANDLE),
            ..DeviceState::default()
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }

    /// Device without a waitable handle (forces timer polling).
    pub fn without_handle() -> (Self, SharedDeviceState) {
        let state = Arc::new(Mutex::new(DeviceState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

impl Device for MockDevice {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let mut state = self.state.lock().unwrap();
        match state.read_queue.pop_front() {
            None => Ok(0),
            Some(Err(err)) => Err(err),
            Some(Ok(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    state.read_queue.push_front(Ok(data[n..].to_vec()));
                }
                Ok(n)
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, DeviceError> {
        let mut state = self.state.lock().unwrap();
        let step = state.write_plan.pop_front().unwrap_or(WriteStep::AcceptAll);
        match step {
            WriteStep::AcceptAll => {
                state.written.extend_from_slice(data);
                Ok(data.len())
            }
            WriteStep::Accept(limit) => {
                let n = limit.min(data.len());
                state.written.extend_from_slice(&data[..n]);
                Ok(n)
            }
            WriteStep::WouldBlock => Err(DeviceError::WouldBlock),
            WriteStep::Interrupted => Err(DeviceError::Interrupted),
            WriteStep::Fail(err) => Err(err),
        }
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        self.state.lock().unwrap().flushed = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }

    fn bytes_to_read(&mut self) -> Result<usize, DeviceError> {
        let state = self.state.lock().unwrap();
        match state.read_queue.front() {
            Some(Err(err)) => Err(err.clone()),
            _ => Ok(state
                .read_queue
                .iter()
                .filter_map(|entry| entry.as_ref().ok())
                .map(Vec::len)
                .sum()),
        }
    }

    fn bytes_to_write(&mut self) -> Result<usize, DeviceError> {
        Ok(self.state.lock().unwrap().out_waiting)
    }

    fn wait_handle(&self) -> Option<WaitHandle> {
        self.state.lock().unwrap().handle
    }
}

// =============================================================================
// RECORDING PROTOCOL
// =============================================================================

/// Everything a protocol can observe, in observation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ConnectionMade,
    DataReceived(Vec<u8>),
    ConnectionLost(Option<DeviceError>),
    PauseWriting,
    ResumeWriting,
}

/// Protocol that records its callback sequence and can optionally close
/// the transport on a received newline or fail its flow-control
/// callbacks.
#[derive(Debug, Default)]
pub struct RecordingProtocol {
    events: RefCell<Vec<Event>>,
    transport: RefCell<Option<Rc<SerialTransport>>>,
    pub close_on_newline: Cell<bool>,
    pub fail_pause: Cell<bool>,
    pub fail_resume: Cell<bool>,
}

impl RecordingProtocol {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn transport(&self) -> Option<Rc<SerialTransport>> {
        self.transport.borrow().clone()
    }

    pub fn received(&self) -> Vec<u8> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                Event::DataReceived(data) => Some(data.as_slice()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .concat()
    }

    pub fn lost_count(&self) -> usize {
        self.count(|event| matches!(event, Event::ConnectionLost(_)))
    }

    pub fn pause_count(&self) -> usize {
        self.count(|event| matches!(event, Event::PauseWriting))
    }

    pub fn resume_count(&self) -> usize {
        self.count(|event| matches!(event, Event::ResumeWriting))
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.borrow().iter().filter(|event| pred(event)).count()
    }
}

impl Protocol for RecordingProtocol {
    fn connection_made(&self, transport: Rc<SerialTransport>) {
        *self.transport.borrow_mut() = Some(transport);
        self.events.borrow_mut().push(Event::ConnectionMade);
    }

    fn data_received(&self, data: &[u8]) {
        self.events
            .borrow_mut()
            .push(Event::DataReceived(data.to_vec()));
        if self.close_on_newline.get() && data.contains(&b'\n') {
            if let Some(transport) = self.transport() {
                transport.close();
            }
        }
    }

    fn connection_lost(&self, error: Option<DeviceError>) {
        self.events.borrow_mut().push(Event::ConnectionLost(error));
    }

    fn pause_writing(&self) -> Result<(), CallbackError> {
        self.events.borrow_mut().push(Event::PauseWriting);
        if self.fail_pause.get() {
            Err(CallbackError::new("pause refused"))
        } else {
            Ok(())
        }
    }

    fn resume_writing(&self) -> Result<(), CallbackError> {
        self.events.borrow_mut().push(Event::ResumeWriting);
        if self.fail_resume.get() {
            Err(CallbackError::new("resume refused"))
        } else {
            Ok(())
        }
    }
}

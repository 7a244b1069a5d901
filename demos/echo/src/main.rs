//! Serial echo demo.
//!
//! Opens a serial port, writes `Hello, World!\n`, prints whatever comes
//! back, and closes on the first received newline — driving the transport
//! from a minimal single-threaded event loop.
//!
//! ```text
//! evserial-echo [PATH] [BAUD]     (defaults: /dev/ttyUSB0 115200)
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::env;
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use evserial::device::SystemSerial;
use evserial::{
    CallbackError, DeviceError, ErrorReport, Protocol, Reactor, ReadinessMode, SerialTransport,
    TimerId, TransportConfig, WaitHandle,
};
use tracing::error;

/// Minimal single-threaded event loop: FIFO queue, timer list, and worker
/// threads for blocking work.
///
/// Descriptor readiness is not implemented, so transports must run with
/// [`ReadinessMode::TimerPolling`] on this loop.
struct MiniLoop {
    inner: RefCell<LoopInner>,
}

struct PendingTimer {
    id: u64,
    due: Instant,
    callback: Box<dyn FnOnce()>,
}

struct PendingDone {
    finished: Arc<AtomicBool>,
    done: Box<dyn FnOnce()>,
}

#[derive(Default)]
struct LoopInner {
    ready: VecDeque<Box<dyn FnOnce()>>,
    timers: Vec<PendingTimer>,
    completions: Vec<PendingDone>,
    next_timer_id: u64,
}

impl MiniLoop {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            inner: RefCell::new(LoopInner::default()),
        })
    }

    fn run_until(&self, stopped: &Cell<bool>) {
        while !stopped.get() {
            if !self.turn() {
                thread::sleep(Duration::from_micros(200));
            }
        }
    }

    /// Run one loop iteration. Returns whether any callback fired.
    fn turn(&self) -> bool {
        let mut progressed = false;

        loop {
            let callback = self.inner.borrow_mut().ready.pop_front();
            match callback {
                Some(callback) => {
                    callback();
                    progressed = true;
                }
                None => break,
            }
        }

        let now = Instant::now();
        loop {
            let due = {
                let inner = self.inner.borrow();
                inner
                    .timers
                    .iter()
                    .filter(|timer| timer.due <= now)
                    .min_by_key(|timer| (timer.due, timer.id))
                    .map(|timer| timer.id)
            };
            let Some(id) = due else { break };
            let timer = {
                let mut inner = self.inner.borrow_mut();
                let Some(pos) = inner.timers.iter().position(|timer| timer.id == id) else {
                    continue;
                };
                inner.timers.remove(pos)
            };
            (timer.callback)();
            progressed = true;
        }

        let finished = {
            let mut inner = self.inner.borrow_mut();
            let mut ready = Vec::new();
            let mut index = 0;
            while index < inner.completions.len() {
                if inner.completions[index].finished.load(Ordering::Acquire) {
                    ready.push(inner.completions.remove(index));
                } else {
                    index += 1;
                }
            }
            ready
        };
        for pending in finished {
            (pending.done)();
            progressed = true;
        }

        progressed
    }
}

impl Reactor for MiniLoop {
    fn call_soon(&self, callback: Box<dyn FnOnce()>) {
        self.inner.borrow_mut().ready.push_back(callback);
    }

    fn call_later(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_timer_id;
        inner.next_timer_id += 1;
        inner.timers.push(PendingTimer {
            id,
            due: Instant::now() + delay,
            callback,
        });
        TimerId(id)
    }

    fn cancel_timer(&self, timer: TimerId) {
        self.inner
            .borrow_mut()
            .timers
            .retain(|pending| pending.id != timer.0);
    }

    fn add_reader(&self, _handle: WaitHandle, _callback: Box<dyn Fn()>) {
        // Descriptor readiness is not implemented on this loop.
    }

    fn remove_reader(&self, _handle: WaitHandle) {}

    fn add_writer(&self, _handle: WaitHandle, _callback: Box<dyn Fn()>) {
        // Descriptor readiness is not implemented on this loop.
    }

    fn remove_writer(&self, _handle: WaitHandle) {}

    fn dispatch_blocking(&self, work: Box<dyn FnOnce() + Send>, done: Box<dyn FnOnce()>) {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        thread::spawn(move || {
            work();
            flag.store(true, Ordering::Release);
        });
        self.inner
            .borrow_mut()
            .completions
            .push(PendingDone { finished, done });
    }

    fn report_error(&self, report: ErrorReport) {
        error!(
            message = %report.message,
            error = %report.error,
            transport = %report.transport,
            "transport error"
        );
    }
}

/// Writes a greeting, echoes received data to stdout, closes on newline.
#[derive(Debug)]
struct Output {
    transport: RefCell<Option<Rc<SerialTransport>>>,
    done: Rc<Cell<bool>>,
}

impl Protocol for Output {
    fn connection_made(&self, transport: Rc<SerialTransport>) {
        println!("port opened: {transport:?}");
        transport.write(&b"Hello, World!\n"[..]);
        *self.transport.borrow_mut() = Some(transport);
    }

    fn data_received(&self, data: &[u8]) {
        println!("data received: {:?}", String::from_utf8_lossy(data));
        if data.contains(&b'\n') {
            let transport = self.transport.borrow().clone();
            if let Some(transport) = transport {
                transport.close();
            }
        }
    }

    fn connection_lost(&self, error: Option<DeviceError>) {
        match error {
            Some(err) => println!("port closed: {err}"),
            None => println!("port closed"),
        }
        self.done.set(true);
    }

    fn pause_writing(&self) -> Result<(), CallbackError> {
        println!("pause writing");
        Ok(())
    }

    fn resume_writing(&self) -> Result<(), CallbackError> {
        println!("resume writing");
        Ok(())
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let mut args = env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let baud = args
        .next()
        .and_then(|value| value.parse().ok())
        .unwrap_or(115_200);

    let device = match SystemSerial::open(&path, baud) {
        Ok(device) => device,
        Err(err) => {
            eprintln!("cannot open {path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let reactor = MiniLoop::new();
    let done = Rc::new(Cell::new(false));
    let protocol = Rc::new(Output {
        transport: RefCell::new(None),
        done: Rc::clone(&done),
    });

    let config = TransportConfig::new().readiness(ReadinessMode::TimerPolling);
    if let Err(err) = SerialTransport::new(reactor.clone(), protocol, Box::new(device), config) {
        eprintln!("cannot create transport: {err}");
        return ExitCode::FAILURE;
    }

    reactor.run_until(&done);
    ExitCode::SUCCESS
}

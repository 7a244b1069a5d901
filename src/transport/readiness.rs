//! Readiness detection strategies.
//!
//! The transport never watches the device itself; it asks a strategy to
//! arm or disarm per-direction monitoring and gets called back on its
//! ready handlers. Two interchangeable strategies exist:
//!
//! - [`InterruptDriven`]: registers the device's waitable handle with the
//!   reactor and lets the OS deliver readiness.
//! - [`TimerPolling`]: re-schedules a short timer per direction and probes
//!   the device's queue depths, for device classes the platform cannot
//!   deliver descriptor readiness for.
//!
//! All four operations are idempotent, and at most one registration (or
//! pending timer) exists per direction. Read monitoring is refused from
//! `Closing` onward; write monitoring stays available through `Closing`
//! so a graceful close can finish draining.

use std::cell::Cell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::core::{Reactor, TimerId, WaitHandle};
use crate::transport::serial::SerialTransport;

/// Strategy selection for a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadinessMode {
    /// Probe the device: interrupt-driven when it has a waitable handle,
    /// timer polling otherwise.
    #[default]
    Auto,
    /// Descriptor-readiness registration with the reactor. Falls back to
    /// polling when the device has no waitable handle.
    InterruptDriven,
    /// Periodic readiness probing on a reactor timer.
    TimerPolling,
}

/// Direction-agnostic monitoring operations the transport drives.
pub(crate) trait ReadinessStrategy {
    /// Arm read monitoring, unless already armed or reads have stopped.
    fn ensure_reader(&self);
    /// Disarm read monitoring.
    fn remove_reader(&self);
    /// Arm write monitoring, unless already armed or the transport is
    /// fully closed.
    fn ensure_writer(&self);
    /// Disarm write monitoring.
    fn remove_writer(&self);
}

/// Pick and build the strategy for a transport under construction.
pub(crate) fn build_strategy(
    mode: ReadinessMode,
    reactor: Rc<dyn Reactor>,
    transport: Weak<SerialTransport>,
    handle: Option<WaitHandle>,
    poll_interval: Duration,
    max_out_waiting: usize,
) -> Rc<dyn ReadinessStrategy> {
    match (mode, handle) {
        (ReadinessMode::Auto | ReadinessMode::InterruptDriven, Some(handle)) => {
            Rc::new(InterruptDriven::new(reactor, transport, handle))
        }
        _ => TimerPolling::new(reactor, transport, poll_interval, max_out_waiting),
    }
}

/// Readiness via reactor registration of the device's waitable handle.
pub(crate) struct InterruptDriven {
    reactor: Rc<dyn Reactor>,
    transport: Weak<SerialTransport>,
    handle: WaitHandle,
    reader_registered: Cell<bool>,
    writer_registered: Cell<bool>,
}

impl InterruptDriven {
    pub(crate) fn new(
        reactor: Rc<dyn Reactor>,
        transport: Weak<SerialTransport>,
        handle: WaitHandle,
    ) -> Self {
        Self {
            reactor,
            transport,
            handle,
            reader_registered: Cell::new(false),
            writer_registered: Cell::new(false),
        }
    }
}

impl ReadinessStrategy for InterruptDriven {
    fn ensure_reader(&self) {
        if self.reader_registered.get() {
            return;
        }
        let Some(transport) = self.transport.upgrade() else {
            return;
        };
        if transport.lifecycle().is_closing() {
            return;
        }
        let weak = self.transport.clone();
        self.reactor.add_reader(
            self.handle,
            Box::new(move || {
                if let Some(transport) = weak.upgrade() {
                    transport.handle_read_ready();
                }
            }),
        );
        self.reader_registered.set(true);
    }

    fn remove_reader(&self) {
        if self.reader_registered.replace(false) {
            self.reactor.remove_reader(self.handle);
        }
    }

    fn ensure_writer(&self) {
        if self.writer_registered.get() {
            return;
        }
        let Some(transport) = self.transport.upgrade() else {
            return;
        };
        if !transport.lifecycle().drains_writes() {
            return;
        }
        let weak = self.transport.clone();
        self.reactor.add_writer(
            self.handle,
            Box::new(move || {
                if let Some(transport) = weak.upgrade() {
                    transport.handle_write_ready();
                }
            }),
        );
        self.writer_registered.set(true);
    }

    fn remove_writer(&self) {
        if self.writer_registered.replace(false) {
            self.reactor.remove_writer(self.handle);
        }
    }
}

/// Readiness via periodic queue-depth probing on reactor timers.
///
/// Each armed direction keeps exactly one pending timer; the tick
/// re-schedules itself before probing. Disarming bumps the direction's
/// epoch, so a tick already in flight when its timer was cancelled (or
/// when the direction was disarmed and re-armed) finds a stale epoch and
/// stops instead of spawning a second timer chain.
pub(crate) struct TimerPolling {
    reactor: Rc<dyn Reactor>,
    transport: Weak<SerialTransport>,
    interval: Duration,
    max_out_waiting: usize,
    reader_active: Cell<bool>,
    writer_active: Cell<bool>,
    read_epoch: Cell<u64>,
    write_epoch: Cell<u64>,
    read_timer: Cell<Option<TimerId>>,
    write_timer: Cell<Option<TimerId>>,
    weak_self: Weak<TimerPolling>,
}

impl TimerPolling {
    pub(crate) fn new(
        reactor: Rc<dyn Reactor>,
        transport: Weak<SerialTransport>,
        interval: Duration,
        max_out_waiting: usize,
    ) -> Rc<Self> {
        Rc::new_cyclic(|weak| Self {
            reactor,
            transport,
            interval,
            max_out_waiting,
            reader_active: Cell::new(false),
            writer_active: Cell::new(false),
            read_epoch: Cell::new(0),
            write_epoch: Cell::new(0),
            read_timer: Cell::new(None),
            write_timer: Cell::new(None),
            weak_self: weak.clone(),
        })
    }

    fn schedule_read_tick(&self, epoch: u64) {
        let weak = self.weak_self.clone();
        let id = self.reactor.call_later(
            self.interval,
            Box::new(move || {
                if let Some(poller) = weak.upgrade() {
                    poller.read_tick(epoch);
                }
            }),
        );
        self.read_timer.set(Some(id));
    }

    fn schedule_write_tick(&self, epoch: u64) {
        let weak = self.weak_self.clone();
        let id = self.reactor.call_later(
            self.interval,
            Box::new(move || {
                if let Some(poller) = weak.upgrade() {
                    poller.write_tick(epoch);
                }
            }),
        );
        self.write_timer.set(Some(id));
    }

    fn read_tick(&self, epoch: u64) {
        if !self.reader_active.get() || epoch != self.read_epoch.get() {
            return;
        }
        self.read_timer.set(None);
        let Some(transport) = self.transport.upgrade() else {
            self.reader_active.set(false);
            return;
        };
        if transport.lifecycle().is_closing() {
            self.reader_active.set(false);
            return;
        }
        self.schedule_read_tick(epoch);
        match transport.bytes_to_read() {
            Ok(0) => {}
            Ok(_) => transport.handle_read_ready(),
            Err(err) if err.is_transient() => {}
            Err(err) => transport.fatal_error(err, "fatal read error on serial transport"),
        }
    }

    fn write_tick(&self, epoch: u64) {
        if !self.writer_active.get() || epoch != self.write_epoch.get() {
            return;
        }
        self.write_timer.set(None);
        let Some(transport) = self.transport.upgrade() else {
            self.writer_active.set(false);
            return;
        };
        if !transport.lifecycle().drains_writes() {
            self.writer_active.set(false);
            return;
        }
        self.schedule_write_tick(epoch);
        match transport.bytes_to_write() {
            Ok(pending) if pending < self.max_out_waiting => transport.handle_write_ready(),
            Ok(_) => {}
            Err(err) if err.is_transient() => {}
            Err(err) => transport.fatal_error(err, "fatal write error on serial transport"),
        }
    }
}

impl ReadinessStrategy for TimerPolling {
    fn ensure_reader(&self) {
        if self.reader_active.get() {
            return;
        }
        let Some(transport) = self.transport.upgrade() else {
            return;
        };
        if transport.lifecycle().is_closing() {
            return;
        }
        self.reader_active.set(true);
        self.schedule_read_tick(self.read_epoch.get());
    }

    fn remove_reader(&self) {
        self.reader_active.set(false);
        self.read_epoch.set(self.read_epoch.get().wrapping_add(1));
        if let Some(id) = self.read_timer.take() {
            self.reactor.cancel_timer(id);
        }
    }

    fn ensure_writer(&self) {
        if self.writer_active.get() {
            return;
        }
        let Some(transport) = self.transport.upgrade() else {
            return;
        };
        if !transport.lifecycle().drains_writes() {
            return;
        }
        self.writer_active.set(true);
        // First probe runs on the next loop iteration, not a timer period away.
        let epoch = self.write_epoch.get();
        let weak = self.weak_self.clone();
        self.reactor.call_soon(Box::new(move || {
            if let Some(poller) = weak.upgrade() {
                poller.write_tick(epoch);
            }
        }));
    }

    fn remove_writer(&self) {
        self.writer_active.set(false);
        self.write_epoch.set(self.write_epoch.get().wrapping_add(1));
        if let Some(id) = self.write_timer.take() {
            self.reactor.cancel_timer(id);
        }
    }
}

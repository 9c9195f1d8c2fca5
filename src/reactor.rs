//! The platform reactor (spec §3/§4.C3): a single-threaded I/O multiplexor
//! exposing file-descriptor readiness, monotonic timers, a wake channel, a
//! cross-thread posted-event queue, and a deferred-slot queue used for
//! cross-thread signal delivery (§4.C4).
//!
//! Built on the teacher crate's `mio`-based I/O backend (`EventToken`,
//! `EventHandler` kept from `src/reactor.rs`), trimmed of the
//! io_uring/NUMA/SIMD/work-stealing-scheduler branches that have no
//! counterpart in this crate's scope (client-only, single connection, no
//! intra-connection parallelism — spec §1, §5).

use crate::config::ReactorConfig;
use crate::error::{Error, Result};
use crate::timer::{TimerCallback, TimerToken, TimerWheel};
use crossbeam_channel::{unbounded, Receiver, Sender};
use mio::{Events, Interest, Poll, Token};
use std::any::Any;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Token identifying one registered I/O source, handed back by
/// [`Reactor::register_io`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventToken(pub usize);

impl From<Token> for EventToken {
    fn from(token: Token) -> Self {
        Self(token.0)
    }
}

impl From<EventToken> for Token {
    fn from(token: EventToken) -> Self {
        Token(token.0)
    }
}

/// Readiness kind delivered to a [`Notifier`] (spec §3 "readiness set").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierKind {
    /// Socket has data available to read, or reached EOF/error.
    Read,
    /// Socket can accept more written bytes, or a pending non-blocking
    /// connect resolved.
    Write,
}

/// Registered interest in a readiness condition on an I/O source.
///
/// A `Notifier` is a weak reference: the reactor only holds a [`Weak`]
/// pointer, so closing/dropping the owning socket without explicitly
/// unregistering still lets the handler be collected instead of firing
/// into freed state.
pub trait Notifier: Send + Sync {
    /// Called once per tick per matching readiness kind. `hup_or_err`
    /// reports whether the platform also signalled hangup/error on this
    /// fd, which is delivered to every kind the caller registered for
    /// (spec §4.C3 step 3).
    fn on_ready(&self, kind: NotifierKind, hup_or_err: bool);
}

struct NotifierEntry {
    handler: Weak<dyn Notifier>,
    interest: Interest,
}

/// A pending cross-thread signal/event target. Like [`Notifier`], held
/// weakly: if the target has been dropped by the time its event is
/// drained, the event is silently discarded (spec §4.C3 step 6).
pub trait EventSink: Send + Sync {
    /// Handle one posted event. `event` is whatever [`Reactor::post`] was
    /// called with; sinks downcast it to their expected type.
    fn handle_event(&self, event: Box<dyn Any + Send>);
}

/// Weak handle to an [`EventSink`], the `target` half of `post(target, event)`.
pub type EventTarget = Weak<dyn EventSink>;

type DeferredSlot = Box<dyn FnOnce() + Send>;

const WAKE_TOKEN: Token = Token(usize::MAX);

/// A cloneable, `Send` handle that lets other threads post deferred slots
/// or wake this reactor without holding a reference to it. Used by
/// [`crate::signal::Signal::connect_deferred`] for cross-thread dispatch
/// (spec §4.C4) and by background DNS workers (spec §4.C5) to post
/// results back.
#[derive(Clone)]
pub struct ReactorHandle {
    event_tx: Sender<(EventTarget, Box<dyn Any + Send>)>,
    deferred_tx: Sender<DeferredSlot>,
    waker: Arc<mio::Waker>,
}

impl ReactorHandle {
    /// Queue `event` for `target`; wakes the owning reactor. Delivered on
    /// the owning reactor's thread during the next tick's event-queue
    /// drain (spec §4.C3 step 6), or dropped if `target` has since gone
    /// away.
    pub fn post(&self, target: EventTarget, event: Box<dyn Any + Send>) {
        let _ = self.event_tx.send((target, event));
        let _ = self.waker.wake();
    }

    /// Queue a 0-arg callable for the owning reactor's deferred-slot queue
    /// (spec §4.C3 step 7) and wake it. This is the cross-thread signal
    /// delivery primitive.
    pub fn post_deferred(&self, slot: DeferredSlot) {
        let _ = self.deferred_tx.send(slot);
        let _ = self.waker.wake();
    }

    /// Wake the owning reactor without posting anything, e.g. to make it
    /// re-check its quit flag.
    pub fn wake(&self) {
        let _ = self.waker.wake();
    }
}

/// Single-threaded I/O multiplexor. One reactor owns a disjoint set of
/// sockets, timers and parsers; a process may run several, one per thread
/// (spec §5).
pub struct Reactor {
    poll: Poll,
    waker: Arc<mio::Waker>,
    handlers: HashMap<Token, NotifierEntry>,
    next_token: AtomicUsize,
    timers: TimerWheel,
    event_rx: Receiver<(EventTarget, Box<dyn Any + Send>)>,
    event_tx: Sender<(EventTarget, Box<dyn Any + Send>)>,
    deferred_rx: Receiver<DeferredSlot>,
    deferred_tx: Sender<DeferredSlot>,
    quit: Arc<AtomicBool>,
    config: ReactorConfig,
}

impl Reactor {
    /// Create a new reactor with default tuning.
    pub fn new() -> Result<Self> {
        Self::with_config(ReactorConfig::default())
    }

    /// Create a new reactor with explicit tuning.
    pub fn with_config(config: ReactorConfig) -> Result<Self> {
        let poll = Poll::new().map_err(|e| Error::reactor(format!("poll init failed: {e}")))?;
        let waker = Arc::new(
            mio::Waker::new(poll.registry(), WAKE_TOKEN)
                .map_err(|e| Error::reactor(format!("waker init failed: {e}")))?,
        );
        let (event_tx, event_rx) = unbounded();
        let (deferred_tx, deferred_rx) = unbounded();
        Ok(Self {
            poll,
            waker,
            handlers: HashMap::new(),
            next_token: AtomicUsize::new(0),
            timers: TimerWheel::new(),
            event_rx,
            event_tx,
            deferred_rx,
            deferred_tx,
            quit: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// A cloneable cross-thread handle to this reactor's posting/wake
    /// surface.
    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            event_tx: self.event_tx.clone(),
            deferred_tx: self.deferred_tx.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Register interest in readiness on `source`, returning a token used
    /// to reregister/deregister it later. A source must be unregistered
    /// (by dropping/closing) before the fd is reused, per spec §3's
    /// "closing an fd must unregister first" invariant.
    pub fn register_io<S>(
        &mut self,
        source: &mut S,
        interest: Interest,
        handler: Weak<dyn Notifier>,
    ) -> Result<EventToken>
    where
        S: mio::event::Source,
    {
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.poll
            .registry()
            .register(source, token, interest)
            .map_err(|e| Error::reactor(format!("register failed: {e}")))?;
        self.handlers.insert(token, NotifierEntry { handler, interest });
        Ok(token.into())
    }

    /// Change the interest set for an already-registered source (e.g. a
    /// TCP socket arming its write notifier only while its write buffer is
    /// non-empty, per spec §3's TCP invariants).
    pub fn reregister_io<S>(&mut self, source: &mut S, token: EventToken, interest: Interest) -> Result<()>
    where
        S: mio::event::Source,
    {
        let mio_token: Token = token.into();
        self.poll
            .registry()
            .reregister(source, mio_token, interest)
            .map_err(|e| Error::reactor(format!("reregister failed: {e}")))?;
        if let Some(entry) = self.handlers.get_mut(&mio_token) {
            entry.interest = interest;
        }
        Ok(())
    }

    /// Deregister a source. Must be called before the underlying fd is
    /// closed or reused.
    pub fn unregister_io<S>(&mut self, source: &mut S, token: EventToken) -> Result<()>
    where
        S: mio::event::Source,
    {
        self.poll
            .registry()
            .deregister(source)
            .map_err(|e| Error::reactor(format!("deregister failed: {e}")))?;
        self.handlers.remove(&token.into());
        Ok(())
    }

    /// Arm a one-shot timer.
    pub fn create_timer(&mut self, delay: Duration, callback: impl TimerCallback + 'static) -> TimerToken {
        self.timers.arm_once(delay, callback)
    }

    /// Arm a periodic timer.
    pub fn create_periodic_timer(
        &mut self,
        interval: Duration,
        callback: impl TimerCallback + 'static,
    ) -> TimerToken {
        self.timers.arm_periodic(interval, callback)
    }

    /// Cancel a previously armed timer.
    pub fn cancel_timer(&mut self, token: TimerToken) {
        self.timers.cancel(token);
    }

    /// Post an event for cross-thread (or same-thread) delivery to `target`
    /// during the next event-queue drain.
    pub fn post(&self, target: EventTarget, event: Box<dyn Any + Send>) {
        let _ = self.event_tx.send((target, event));
    }

    /// Wake this reactor out of a blocked wait.
    pub fn wake(&self) {
        let _ = self.waker.wake();
    }

    /// Request that [`Reactor::exec`] return after completing the current
    /// tick.
    pub fn quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
        self.wake();
    }

    /// Run one iteration of the wait algorithm (spec §4.C3 steps 1-7).
    pub fn process_events(&mut self, timeout: Option<Duration>) -> Result<()> {
        let now = Instant::now();
        let timer_wait = self.timers.next_deadline().map(|d| d.saturating_duration_since(now));
        let budget = match (timeout, timer_wait) {
            (Some(t), Some(tw)) => Some(t.min(tw)),
            (Some(t), None) => Some(t),
            (None, Some(tw)) => Some(tw.min(self.config.max_poll_wait)),
            (None, None) => Some(self.config.max_poll_wait),
        };

        let mut events = Events::with_capacity(self.config.max_events_per_poll);
        loop {
            match self.poll.poll(&mut events, budget) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::reactor(format!("poll wait failed: {e}"))),
            }
        }

        // Step 3: deliver readiness. Step 4 (wake channel drain) falls out
        // naturally — WAKE_TOKEN carries no handler, it just ensures poll
        // returned so steps 6/7 get a chance to run.
        for event in events.iter() {
            let token = event.token();
            if token == WAKE_TOKEN {
                trace!("reactor woken");
                continue;
            }
            let Some(entry) = self.handlers.get(&token) else { continue };
            let Some(handler) = entry.handler.upgrade() else {
                continue; // notifier's owner has gone away
            };
            let hup_or_err = event.is_error() || event.is_read_closed() || event.is_write_closed();
            if entry.interest.is_readable() && (event.is_readable() || hup_or_err) {
                handler.on_ready(NotifierKind::Read, hup_or_err);
            }
            if entry.interest.is_writable() && (event.is_writable() || hup_or_err) {
                handler.on_ready(NotifierKind::Write, hup_or_err);
            }
        }

        // Step 5: fire expired timers, deadline order, at most once each.
        self.timers.fire_expired(Instant::now());

        // Step 6: drain the posted-event queue.
        while let Ok((target, event)) = self.event_rx.try_recv() {
            if let Some(sink) = target.upgrade() {
                sink.handle_event(event);
            }
        }

        // Step 7: drain the deferred-slot queue (cross-thread signals).
        while let Ok(slot) = self.deferred_rx.try_recv() {
            slot();
        }

        Ok(())
    }

    /// Run [`Reactor::process_events`] in a loop until [`Reactor::quit`] is
    /// called.
    pub fn exec(&mut self) -> Result<()> {
        self.quit.store(false, Ordering::SeqCst);
        while !self.quit.load(Ordering::SeqCst) {
            self.process_events(None)?;
        }
        Ok(())
    }

    /// Number of registered I/O notifiers, for diagnostics/tests.
    pub fn notifier_count(&self) -> usize {
        self.handlers.len()
    }

    /// Number of currently-armed timers.
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        debug!(notifiers = self.handlers.len(), timers = self.timers.len(), "reactor shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct CountingSink {
        count: Arc<AtomicUsize>,
    }

    impl EventSink for CountingSink {
        fn handle_event(&self, event: Box<dyn Any + Send>) {
            if let Ok(n) = event.downcast::<usize>() {
                self.count.fetch_add(*n, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn posted_event_delivered_to_live_target() {
        let mut reactor = Reactor::new().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let sink: Arc<dyn EventSink> = Arc::new(CountingSink { count: count.clone() });
        reactor.post(Arc::downgrade(&sink), Box::new(5usize));
        reactor.process_events(Some(Duration::from_millis(10))).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn posted_event_dropped_for_dead_target() {
        let mut reactor = Reactor::new().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let sink: Arc<dyn EventSink> = Arc::new(CountingSink { count: count.clone() });
        let weak = Arc::downgrade(&sink);
        drop(sink);
        reactor.post(weak, Box::new(5usize));
        reactor.process_events(Some(Duration::from_millis(10))).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn timer_fires_during_process_events() {
        let mut reactor = Reactor::new().unwrap();
        let fired = Arc::new(Mutex::new(false));
        let f = fired.clone();
        reactor.create_timer(Duration::from_millis(1), move || *f.lock().unwrap() = true);
        reactor.process_events(Some(Duration::from_millis(50))).unwrap();
        assert!(*fired.lock().unwrap());
    }

    #[test]
    fn deferred_slot_runs_on_next_tick() {
        let mut reactor = Reactor::new().unwrap();
        let handle = reactor.handle();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        handle.post_deferred(Box::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }));
        reactor.process_events(Some(Duration::from_millis(10))).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn quit_stops_exec() {
        let mut reactor = Reactor::new().unwrap();
        let handle = reactor.handle();
        let quit_clone = reactor.quit.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            quit_clone.store(true, Ordering::SeqCst);
            handle.wake();
        });
        reactor.exec().unwrap();
    }
}

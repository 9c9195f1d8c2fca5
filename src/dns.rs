//! Asynchronous DNS resolution (spec §3/§4.C5).
//!
//! The original (`examples/original_source/src/KDNetwork/dns_resolver.{h,cpp}`)
//! wraps c-ares: a per-thread singleton channel fed through
//! `FileDescriptorNotifier`s registered on the reactor, with `ares_process`
//! driven from socket readiness. There is no maintained non-blocking c-ares
//! binding in this corpus, so the idiomatic Rust substitute kept in the
//! same "driven by the reactor, callback fires on the reactor thread"
//! spirit is: a small bounded worker-thread pool performs blocking
//! `ToSocketAddrs` resolution off-thread and posts its result back onto the
//! owning reactor's event queue via [`crate::reactor::Reactor::post`],
//! waking it through the existing wake channel — no second notifier type is
//! invented for this. Every operation in spec §4.C5 (`lookup`,
//! cancellation, error kinds) is implemented; see DESIGN.md for why this
//! adaptation was necessary rather than a c-ares FFI binding.

use crate::error::{DnsErrorKind, Error, Result};
use crate::reactor::{EventSink, ReactorHandle};
use crossbeam_channel::{unbounded, Sender};
use std::any::Any;
use std::collections::HashMap;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Resolved addresses for a lookup, in the order the platform resolver
/// returned them (both A and AAAA records, spec §6).
pub type AddressList = Vec<IpAddr>;

/// `lookup` result callback. Invoked on the owning reactor's thread.
pub type LookupCallback = Box<dyn FnOnce(Result<AddressList>) + Send>;

struct Job {
    id: u64,
    hostname: String,
    deadline: Instant,
    reactor: ReactorHandle,
    target: Weak<dyn EventSink>,
}

type DnsEvent = (u64, Result<AddressList>);

struct Inner {
    pending: Mutex<HashMap<u64, LookupCallback>>,
    next_id: AtomicU64,
    job_tx: Sender<Job>,
}

impl EventSink for Inner {
    fn handle_event(&self, event: Box<dyn Any + Send>) {
        let Ok(boxed) = event.downcast::<DnsEvent>() else { return };
        let (id, result) = *boxed;
        let callback = self.pending.lock().unwrap().remove(&id);
        if let Some(callback) = callback {
            callback(result);
        }
    }
}

/// Asynchronous resolver driven by a bounded worker-thread pool. Normally
/// one instance per reactor (spec calls for a thread-local singleton; this
/// crate leaves ownership to the caller — typically held by the
/// [`crate::http::HttpSession`] or [`crate::net::tcp::TcpSocket`] that
/// needs it — rather than hiding a `thread_local!` behind `instance()`).
pub struct Resolver {
    inner: Arc<Inner>,
    reactor: ReactorHandle,
    _workers: Vec<std::thread::JoinHandle<()>>,
}

impl Resolver {
    /// Spawn `worker_threads` blocking-resolution workers bound to
    /// `reactor`.
    pub fn new(reactor: ReactorHandle, worker_threads: usize) -> Result<Self> {
        if worker_threads == 0 {
            return Err(Error::dns(DnsErrorKind::ResolverInitFailed, "worker_threads must be > 0"));
        }
        let (job_tx, job_rx) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(worker_threads);
        for index in 0..worker_threads {
            let job_rx = job_rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("vortex-dns-{index}"))
                .spawn(move || {
                    for job in job_rx.iter() {
                        let result = resolve_blocking(&job.hostname, job.deadline);
                        job.reactor.post(job.target, Box::new((job.id, result)) as Box<dyn Any + Send>);
                    }
                })
                .map_err(|e| Error::dns(DnsErrorKind::ResolverInitFailed, format!("spawn failed: {e}")))?;
            workers.push(handle);
        }

        Ok(Self {
            inner: Arc::new(Inner { pending: Mutex::new(HashMap::new()), next_id: AtomicU64::new(1), job_tx }),
            reactor,
            _workers: workers,
        })
    }

    /// The `EventSink` target workers post results to. Keep this alive
    /// (e.g. inside the owning `HttpSession`) for as long as lookups may be
    /// outstanding.
    pub fn as_event_sink(&self) -> Arc<dyn EventSink> {
        self.inner.clone()
    }

    /// Begin resolving `hostname`; `callback` fires on the reactor's
    /// thread once a result (or timeout/cancellation) is available.
    /// Returns immediately.
    pub fn lookup(&self, hostname: impl Into<String>, timeout: Duration, callback: LookupCallback) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.pending.lock().unwrap().insert(id, callback);
        let job = Job {
            id,
            hostname: hostname.into(),
            deadline: Instant::now() + timeout,
            reactor: self.reactor.clone(),
            target: Arc::downgrade(&self.inner) as Weak<dyn EventSink>,
        };
        if self.inner.job_tx.send(job).is_err() {
            // Worker pool is gone; fail the lookup inline rather than hang.
            if let Some(callback) = self.inner.pending.lock().unwrap().remove(&id) {
                callback(Err(Error::dns(DnsErrorKind::ResolverInitFailed, "worker pool shut down")));
            }
        }
        id
    }

    /// Cancel every outstanding lookup. Each pending callback fires with
    /// [`DnsErrorKind::Cancelled`] before this returns (spec §4.C5, §5);
    /// workers already resolving those hostnames finish in the background
    /// and their eventual post is simply dropped (the event target was
    /// removed from `pending`, so `handle_event` finds nothing to call).
    pub fn cancel_lookups(&self) {
        let callbacks: Vec<LookupCallback> = {
            let mut pending = self.inner.pending.lock().unwrap();
            pending.drain().map(|(_, cb)| cb).collect()
        };
        for callback in callbacks {
            callback(Err(Error::dns(DnsErrorKind::Cancelled, "lookup cancelled")));
        }
    }

    /// Number of lookups currently in flight.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }
}

fn resolve_blocking(hostname: &str, deadline: Instant) -> Result<AddressList> {
    if Instant::now() > deadline {
        return Err(Error::dns(DnsErrorKind::Timeout, format!("lookup of {hostname} exceeded its deadline")));
    }
    // Port 0 is a placeholder; resolution is address-only, the HTTP/WS
    // layer supplies the real port when it connects.
    match (hostname, 0u16).to_socket_addrs() {
        Ok(addrs) => {
            let ips: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
            if ips.is_empty() {
                Err(Error::dns(DnsErrorKind::NotFound, format!("{hostname} has no addresses")))
            } else {
                debug!(hostname, count = ips.len(), "dns lookup resolved");
                Ok(ips)
            }
        }
        Err(e) => {
            warn!(hostname, error = %e, "dns lookup failed");
            Err(Error::dns(DnsErrorKind::NotFound, format!("{hostname}: {e}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Reactor;
    use std::sync::mpsc;

    #[test]
    fn lookup_localhost_resolves() {
        let mut reactor = Reactor::new().unwrap();
        let handle = reactor.handle();
        let resolver = Resolver::new(handle, 1).unwrap();
        let _sink = resolver.as_event_sink();

        let (tx, rx) = mpsc::channel();
        resolver.lookup("localhost", Duration::from_secs(5), Box::new(move |result| {
            let _ = tx.send(result);
        }));

        let result = loop {
            reactor.process_events(Some(Duration::from_millis(200))).unwrap();
            if let Ok(result) = rx.try_recv() {
                break result;
            }
        };
        assert!(result.is_ok());
        assert!(!result.unwrap().is_empty());
    }

    #[test]
    fn cancel_lookups_fires_cancelled() {
        let mut reactor = Reactor::new().unwrap();
        let handle = reactor.handle();
        let resolver = Resolver::new(handle, 1).unwrap();
        let _sink = resolver.as_event_sink();

        let (tx, rx) = mpsc::channel();
        resolver.lookup("example.invalid.test.internal", Duration::from_secs(5), Box::new(move |result| {
            let _ = tx.send(result);
        }));
        resolver.cancel_lookups();
        let result = rx.recv().unwrap();
        match result {
            Err(Error::Dns { kind: DnsErrorKind::Cancelled, .. }) => {}
            other => panic!("expected Cancelled, got {other:?}"),
        }
        assert_eq!(resolver.pending_count(), 0);
    }
}

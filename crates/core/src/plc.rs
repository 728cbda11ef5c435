// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

//! the per-gateway PLC coordinator.
//!
//! One coordinator exists per (protocol, gateway, route, family, group)
//! tuple and is shared by every tag pointing at it. It owns the TCP
//! socket, the protocol layer stack, a FIFO of pending tag requests and a
//! background I/O thread driving the connection state machine:
//!
//! ```text
//! disconnected -> tcp_connecting -> registering -> [forward_opening] -> ready
//! ready -- idle timeout --> closing -> disconnected
//! any socket error -> restarting -- backoff --> tcp_connecting
//! ```
//!
//! All shared state lives behind one mutex per coordinator; the I/O
//! thread never holds it across a blocking socket call.

use crate::builder::PlcKind;
use crate::cip::layer::{build_multi_service, split_multi_service, CipLayer};
use crate::eip::EipLayer;
use crate::layer::{LayerResponse, LayerStack, PacketBuf};
use crate::pccc::layer::PcccLayer;
use crate::tag::{Continuation, OpKind, PlcContext, TagBase, TagEntry, TagId, TagOps};
use crate::{wire, ErrorKind, Result, Status};
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

const PACKET_BUF_SIZE: usize = 8192;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
const BACKOFF_INITIAL_MS: u64 = 100;
const BACKOFF_MAX_MS: u64 = 5000;
/* cushion for the multiple-service header when sizing request bodies:
service + path + count + one offset slot per packed request */
const PACKING_OVERHEAD: usize = 24;
const MAX_PACKED_REQUESTS: usize = 8;

static NEXT_TAG_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_UNSHARED_KEY: AtomicU64 = AtomicU64::new(1);

static REGISTRY: Lazy<Mutex<HashMap<String, Weak<Plc>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// everything needed to locate and configure a coordinator
#[derive(Debug, Clone)]
pub(crate) struct PlcOptions {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub kind: PlcKind,
    pub route: Vec<u8>,
    pub use_connected: bool,
    pub forward_open_ex: bool,
    pub cip_payload: usize,
    pub has_pccc: bool,
    pub idle_timeout_ms: u64,
    pub share_session: bool,
    pub connection_group_id: i64,
}

impl PlcOptions {
    fn key(&self) -> String {
        let route: String = self.route.iter().map(|b| format!("{:02x}", b)).collect();
        let mut key = format!(
            "{}:{}:{}:{}:{}:{}:{}",
            self.protocol,
            self.host,
            self.port,
            route,
            if self.has_pccc { "pccc" } else { "cip" },
            self.use_connected as u8,
            self.connection_group_id,
        );
        if !self.share_session {
            key.push_str(&format!(":unshared-{}", NEXT_UNSHARED_KEY.fetch_add(1, Ordering::Relaxed)));
        }
        key
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum PlcState {
    Disconnected,
    TcpConnecting,
    Registering,
    ForwardOpening,
    Ready,
    Closing,
    Restarting,
}

pub(crate) struct Request {
    id: u64,
    tag_id: u64,
    op: OpKind,
    aborted: bool,
}

pub(crate) struct PlcCore {
    state: PlcState,
    stack: LayerStack,
    queue: VecDeque<Request>,
    inflight: Vec<Request>,
    tags: HashMap<u64, TagEntry>,
    next_request_id: u64,
    tsn: u16,
    max_payload: usize,
    idle_timeout: Duration,
    last_activity: Instant,
    backoff_ms: u64,
    restart_at: Instant,
    /// set when the I/O thread has decided to exit; the coordinator can
    /// no longer accept tags
    dead: bool,
}

pub(crate) struct Plc {
    key: String,
    options: PlcOptions,
    core: Mutex<PlcCore>,
    /// wakes the I/O thread
    wake: Condvar,
    /// wakes API callers blocked on tag completion
    done: Condvar,
}

/// get or create the coordinator for `options` and attach `entry` to it
pub(crate) fn create_tag(options: PlcOptions, entry: TagEntry) -> Result<(Arc<Plc>, TagId)> {
    let key = options.key();
    let mut entry = Some(entry);

    loop {
        let plc = get_or_create(&key, &options)?;
        if let Some(id) = plc.try_attach(&mut entry) {
            return Ok((plc, id));
        }
        // the coordinator died between lookup and attach; drop it from the
        // registry and retry
        let mut registry = REGISTRY.lock();
        if let Some(weak) = registry.get(&key) {
            if weak.upgrade().map_or(true, |p| Arc::ptr_eq(&p, &plc)) {
                registry.remove(&key);
            }
        }
    }
}

fn get_or_create(key: &str, options: &PlcOptions) -> Result<Arc<Plc>> {
    let mut registry = REGISTRY.lock();

    if let Some(plc) = registry.get(key).and_then(|weak| weak.upgrade()) {
        return Ok(plc);
    }

    log::debug!("creating PLC coordinator for {}", key);

    let mut layers: Vec<Box<dyn crate::layer::Layer>> = vec![
        Box::new(EipLayer::new()),
        Box::new(CipLayer::new(
            options.use_connected,
            options.forward_open_ex,
            options.cip_payload,
            options.route.clone(),
        )),
    ];
    if options.has_pccc {
        layers.push(Box::new(PcccLayer::new()));
    }

    let plc = Arc::new(Plc {
        key: key.to_owned(),
        options: options.clone(),
        core: Mutex::new(PlcCore {
            state: PlcState::Disconnected,
            stack: LayerStack::new(layers),
            queue: VecDeque::new(),
            inflight: vec![],
            tags: HashMap::new(),
            next_request_id: 1,
            tsn: rand::thread_rng().gen(),
            max_payload: options.cip_payload,
            idle_timeout: Duration::from_millis(options.idle_timeout_ms),
            last_activity: Instant::now(),
            backoff_ms: 0,
            restart_at: Instant::now(),
            dead: false,
        }),
        wake: Condvar::new(),
        done: Condvar::new(),
    });

    {
        let io_plc = Arc::clone(&plc);
        std::thread::Builder::new()
            .name(format!("abtag-io-{}:{}", options.host, options.port))
            .spawn(move || io_loop(io_plc))
            .map_err(|_| Status::from(ErrorKind::Thread))?;
    }

    registry.insert(key.to_owned(), Arc::downgrade(&plc));

    Ok(plc)
}

impl Plc {
    fn try_attach(&self, entry: &mut Option<TagEntry>) -> Option<TagId> {
        let mut core = self.core.lock();
        if core.dead {
            return None;
        }
        let id = NEXT_TAG_ID.fetch_add(1, Ordering::Relaxed);
        core.tags.insert(id, entry.take().expect("tag entry already attached"));
        core.last_activity = Instant::now();
        Some(TagId(id))
    }

    /// run `f` against the tag's state under the coordinator mutex
    pub(crate) fn with_tag<R>(
        &self,
        id: TagId,
        f: impl FnOnce(&mut TagBase, &mut dyn TagOps) -> R,
    ) -> Result<R> {
        let mut core = self.core.lock();
        let entry = core.tags.get_mut(&id.0).ok_or(ErrorKind::NotFound)?;
        Ok(f(&mut entry.base, entry.ops.as_mut()))
    }

    pub(crate) fn status_of(&self, id: TagId) -> Status {
        let core = self.core.lock();
        match core.tags.get(&id.0) {
            Some(entry) => entry.base.status,
            None => Status::Err(ErrorKind::NotFound),
        }
    }

    pub(crate) fn idle_timeout_ms(&self) -> u64 {
        self.core.lock().idle_timeout.as_millis() as u64
    }

    pub(crate) fn set_idle_timeout_ms(&self, millis: u64) {
        let mut core = self.core.lock();
        core.idle_timeout = Duration::from_millis(millis);
        self.wake.notify_one();
    }

    /// begin a read or write operation on a tag.
    ///
    /// Returns `Pending` when a request was queued (or one was already in
    /// flight), `Ok` on a read-cache hit, an error otherwise.
    pub(crate) fn start_op(&self, id: TagId, op: OpKind) -> Status {
        let mut core = self.core.lock();
        let core = &mut *core;

        let entry = match core.tags.get_mut(&id.0) {
            Some(entry) => entry,
            None => return Status::Err(ErrorKind::NotFound),
        };

        if entry.base.read_in_flight || entry.base.write_in_flight {
            return Status::Pending;
        }

        let queued_op = match op {
            OpKind::Read => {
                if entry
                    .base
                    .read_cache_expire
                    .map_or(false, |expire| Instant::now() < expire)
                {
                    log::trace!("tag {:?} read satisfied from cache", entry.base.name);
                    entry.base.status = Status::Ok;
                    return Status::Ok;
                }
                entry.base.read_in_flight = true;
                OpKind::Read
            }
            OpKind::Write => {
                if !entry.ops.supports_write() {
                    log::warn!("tag {:?} does not support write operations", entry.base.name);
                    entry.base.status = Status::Err(ErrorKind::Unsupported);
                    return Status::Err(ErrorKind::Unsupported);
                }
                // any write invalidates cached read data
                entry.base.read_cache_expire = None;
                if entry.ops.write_requires_read(&entry.base) {
                    log::debug!(
                        "tag {:?} needs a type-learning read before the write",
                        entry.base.name
                    );
                    entry.base.write_after_read = true;
                    entry.base.pending_write_data = Some(entry.base.data.clone());
                    entry.base.read_in_flight = true;
                    OpKind::Read
                } else {
                    entry.base.write_in_flight = true;
                    OpKind::Write
                }
            }
        };

        entry.base.status = Status::Pending;
        entry.base.trans_offset = 0;

        let req_id = core.next_request_id;
        core.next_request_id += 1;
        core.queue.push_back(Request {
            id: req_id,
            tag_id: id.0,
            op: queued_op,
            aborted: false,
        });
        core.last_activity = Instant::now();

        self.wake.notify_one();

        Status::Pending
    }

    /// block until the tag leaves `Pending`, or until the deadline.
    ///
    /// On expiry the pending operation is aborted, the read cache is
    /// invalidated and the status becomes `Timeout`.
    pub(crate) fn wait_op(&self, id: TagId, deadline: Option<Instant>) -> Status {
        let mut core = self.core.lock();
        loop {
            let status = match core.tags.get(&id.0) {
                Some(entry) => entry.base.status,
                None => return Status::Err(ErrorKind::NotFound),
            };
            if !status.is_pending() {
                return status;
            }

            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        abort_locked(&mut core, id.0, Status::Err(ErrorKind::Timeout));
                        return Status::Err(ErrorKind::Timeout);
                    }
                    let _ = self.done.wait_until(&mut core, deadline);
                }
                None => self.done.wait(&mut core),
            }
        }
    }

    /// abort any pending operation on the tag and give it `status`
    pub(crate) fn abort_tag(&self, id: TagId, status: Status) -> Status {
        let mut core = self.core.lock();
        if !core.tags.contains_key(&id.0) {
            return Status::Err(ErrorKind::NotFound);
        }
        abort_locked(&mut core, id.0, status);
        self.done.notify_all();
        Status::Ok
    }

    /// abort, unlink and drop a tag
    pub(crate) fn remove_tag(&self, id: TagId) {
        let mut core = self.core.lock();
        abort_locked(&mut core, id.0, Status::Ok);
        core.tags.remove(&id.0);
        core.last_activity = Instant::now();
        drop(core);
        self.wake.notify_one();
        self.done.notify_all();
    }
}

fn abort_locked(core: &mut PlcCore, tag_id: u64, status: Status) {
    let had_queued = core.queue.iter().any(|r| r.tag_id == tag_id);
    core.queue.retain(|r| r.tag_id != tag_id);

    // an in-flight request stays tracked until its wire response arrives
    // or the connection restarts; the response is then discarded
    let mut had_inflight = false;
    for req in core.inflight.iter_mut() {
        if req.tag_id == tag_id {
            req.aborted = true;
            had_inflight = true;
        }
    }

    if let Some(entry) = core.tags.get_mut(&tag_id) {
        let was_active = entry.base.read_in_flight || entry.base.write_in_flight;
        entry.base.read_in_flight = false;
        entry.base.write_in_flight = false;
        entry.base.write_after_read = false;
        entry.base.pending_write_data = None;
        entry.base.trans_offset = 0;
        if was_active || had_queued || had_inflight || status.is_timeout() {
            // never serve stale data after an interrupted operation
            entry.base.read_cache_expire = None;
            entry.base.status = status;
        }
    }
}

/* ------------------------------------------------------------------ */
/* the I/O loop                                                        */
/* ------------------------------------------------------------------ */

enum IoJob {
    Exit,
    Connect,
    Exchange(Vec<u8>),
    Teardown(Vec<Vec<u8>>),
}

fn idle_deadline(core: &PlcCore) -> Instant {
    core.last_activity + core.idle_timeout
}

fn schedule_restart(core: &mut PlcCore) {
    core.backoff_ms = if core.backoff_ms == 0 {
        BACKOFF_INITIAL_MS
    } else {
        (core.backoff_ms * 2).min(BACKOFF_MAX_MS)
    };
    core.restart_at = Instant::now() + Duration::from_millis(core.backoff_ms);
    core.state = PlcState::Restarting;
    log::debug!("restarting connection in {} ms", core.backoff_ms);
}

/// fail every queued and in-flight request with `kind`
fn fail_all(core: &mut PlcCore, kind: ErrorKind) {
    let requests: Vec<Request> = core.queue.drain(..).chain(core.inflight.drain(..)).collect();
    for req in requests {
        if req.aborted {
            continue;
        }
        if let Some(entry) = core.tags.get_mut(&req.tag_id) {
            entry.base.status = Status::Err(kind);
            entry.base.read_in_flight = false;
            entry.base.write_in_flight = false;
            entry.base.write_after_read = false;
            entry.base.pending_write_data = None;
            entry.base.trans_offset = 0;
            entry.base.read_cache_expire = None;
        }
    }
}

/// fail only the in-flight requests, leaving the connection up
fn fail_inflight(core: &mut PlcCore, kind: ErrorKind) {
    let requests: Vec<Request> = core.inflight.drain(..).collect();
    for req in requests {
        if req.aborted {
            continue;
        }
        if let Some(entry) = core.tags.get_mut(&req.tag_id) {
            entry.base.status = Status::Err(kind);
            entry.base.read_in_flight = false;
            entry.base.write_in_flight = false;
            entry.base.write_after_read = false;
            entry.base.pending_write_data = None;
            entry.base.trans_offset = 0;
        }
    }
}

/// take up to a packet's worth of compatible requests and build their bodies
fn take_batch(core: &mut PlcCore, packing_allowed: bool) -> (Vec<Request>, Vec<Vec<u8>>) {
    let mut reqs = vec![];
    let mut bodies = vec![];
    let mut used = 0usize;

    while let Some(req) = core.queue.front() {
        let entry = match core.tags.get(&req.tag_id) {
            Some(entry) => entry,
            None => {
                core.queue.pop_front();
                continue;
            }
        };

        if !reqs.is_empty() && (!packing_allowed || !entry.ops.packable()) {
            break;
        }

        let budget = if packing_allowed && entry.ops.packable() {
            core.max_payload - PACKING_OVERHEAD
        } else {
            core.max_payload
        };

        let req = core.queue.pop_front().expect("front was checked");
        let PlcCore { tags, tsn, .. } = core;
        let entry = tags.get_mut(&req.tag_id).expect("entry was checked");

        let mut ctx = PlcContext {
            max_payload: budget - used.min(budget),
            tsn,
        };

        let mut body = vec![];
        let res = entry
            .ops
            .build_request(&mut entry.base, req.op, &mut body, &mut ctx);

        match res {
            Ok(()) => {
                used += body.len();
                bodies.push(body);
                reqs.push(req);
            }
            Err(status) => {
                log::warn!("unable to build request for tag {:?}: {}", entry.base.name, status);
                entry.base.status = status;
                entry.base.read_in_flight = false;
                entry.base.write_in_flight = false;
                entry.base.write_after_read = false;
                entry.base.pending_write_data = None;
                entry.base.trans_offset = 0;
                continue;
            }
        }

        if !packing_allowed || !entry.ops.packable() || reqs.len() >= MAX_PACKED_REQUESTS {
            break;
        }
        if used + PACKING_OVERHEAD >= core.max_payload {
            break;
        }
    }

    (reqs, bodies)
}

/// feed one response payload to the tag that requested it
fn handle_one(core: &mut PlcCore, req: &Request, payload: &[u8]) {
    if req.aborted {
        log::debug!("dropping response for aborted request {}", req.id);
        return;
    }

    let PlcCore {
        tags,
        tsn,
        queue,
        next_request_id,
        max_payload,
        ..
    } = core;

    let entry = match tags.get_mut(&req.tag_id) {
        Some(entry) => entry,
        None => return,
    };

    let mut ctx = PlcContext {
        max_payload: *max_payload,
        tsn,
    };

    let mut enqueue = None;
    match entry
        .ops
        .handle_response(&mut entry.base, req.op, payload, &mut ctx)
    {
        Ok(Continuation::Done) => match req.op {
            OpKind::Read => {
                entry.base.read_in_flight = false;
                if entry.base.write_after_read {
                    // the pre-write read is done, now do the actual write
                    // with the application's staged bytes put back in place
                    if let Some(saved) = entry.base.pending_write_data.take() {
                        let n = saved.len().min(entry.base.data.len());
                        entry.base.data[..n].copy_from_slice(&saved[..n]);
                    }
                    entry.base.write_after_read = false;
                    entry.base.write_in_flight = true;
                    entry.base.status = Status::Pending;
                    entry.base.trans_offset = 0;
                    enqueue = Some(OpKind::Write);
                } else {
                    entry.base.status = Status::Ok;
                    entry.base.arm_read_cache();
                }
            }
            OpKind::Write => {
                entry.base.write_in_flight = false;
                entry.base.status = Status::Ok;
            }
        },
        Ok(Continuation::More) => {
            enqueue = Some(req.op);
        }
        Err(status) => {
            log::warn!(
                "error handling response for tag {:?}: {}",
                entry.base.name,
                status
            );
            entry.base.status = status;
            entry.base.read_in_flight = false;
            entry.base.write_in_flight = false;
            entry.base.write_after_read = false;
            entry.base.pending_write_data = None;
            entry.base.trans_offset = 0;
        }
    }

    if let Some(op) = enqueue {
        let id = *next_request_id;
        *next_request_id += 1;
        queue.push_back(Request {
            id,
            tag_id: req.tag_id,
            op,
            aborted: false,
        });
    }
}

/// dispatch the application payload of one wire packet to its requests
fn dispatch_responses(core: &mut PlcCore, payload: &[u8]) {
    let requests: Vec<Request> = core.inflight.drain(..).collect();

    if requests.len() > 1 {
        match split_multi_service(payload) {
            Ok(ranges) if ranges.len() == requests.len() => {
                for (req, (start, end)) in requests.iter().zip(ranges) {
                    handle_one(core, req, &payload[start..end]);
                }
            }
            Ok(ranges) => {
                log::warn!(
                    "multiple service reply carried {} answers for {} requests",
                    ranges.len(),
                    requests.len()
                );
                for req in &requests {
                    if !req.aborted {
                        if let Some(entry) = core.tags.get_mut(&req.tag_id) {
                            entry.base.status = Status::Err(ErrorKind::BadReply);
                            entry.base.read_in_flight = false;
                            entry.base.write_in_flight = false;
                            entry.base.trans_offset = 0;
                        }
                    }
                }
            }
            Err(status) => {
                let kind = status.err_kind().unwrap_or(ErrorKind::BadReply);
                for req in &requests {
                    if !req.aborted {
                        if let Some(entry) = core.tags.get_mut(&req.tag_id) {
                            entry.base.status = Status::Err(kind);
                            entry.base.read_in_flight = false;
                            entry.base.write_in_flight = false;
                            entry.base.trans_offset = 0;
                        }
                    }
                }
            }
        }
    } else if let Some(req) = requests.first() {
        handle_one(core, req, payload);
    }

    core.last_activity = Instant::now();
}

fn io_loop(plc: Arc<Plc>) {
    log::debug!("I/O loop starting for {}", plc.key);

    let mut socket: Option<TcpStream> = None;
    let mut buf = PacketBuf::new(PACKET_BUF_SIZE);

    loop {
        /* phase 1: decide what to do, under the mutex */
        let job = {
            let mut core = plc.core.lock();
            'decide: loop {
                let now = Instant::now();
                match core.state {
                    PlcState::Disconnected => {
                        if !core.queue.is_empty() {
                            core.state = PlcState::TcpConnecting;
                            continue;
                        }
                        if core.tags.is_empty() {
                            if now >= idle_deadline(&core) {
                                core.dead = true;
                                break 'decide IoJob::Exit;
                            }
                            let deadline = idle_deadline(&core);
                            let _ = plc.wake.wait_until(&mut core, deadline);
                        } else {
                            // nothing to do until a tag queues a request
                            plc.wake.wait(&mut core);
                        }
                    }
                    PlcState::Restarting => {
                        if now >= core.restart_at {
                            core.state = PlcState::TcpConnecting;
                            continue;
                        }
                        let deadline = core.restart_at;
                        let _ = plc.wake.wait_until(&mut core, deadline);
                    }
                    PlcState::TcpConnecting => {
                        break 'decide IoJob::Connect;
                    }
                    PlcState::Registering | PlcState::ForwardOpening => {
                        match core.stack.next_connect_layer() {
                            None => {
                                log::debug!("{} is ready", plc.key);
                                core.state = PlcState::Ready;
                                core.backoff_ms = 0;
                                core.last_activity = Instant::now();
                                plc.done.notify_all();
                            }
                            Some(index) => {
                                match core.stack.build_connect(index, &mut buf) {
                                    Ok(true) => {
                                        break 'decide IoJob::Exchange(buf.packet().to_vec());
                                    }
                                    Ok(false) => {
                                        // no handshake at this layer after all
                                        continue;
                                    }
                                    Err(status) => {
                                        log::warn!("unable to build handshake: {}", status);
                                        fail_all(&mut core, ErrorKind::BadDevice);
                                        schedule_restart(&mut core);
                                        plc.done.notify_all();
                                    }
                                }
                            }
                        }
                    }
                    PlcState::Ready => {
                        if core.queue.is_empty() {
                            if now >= idle_deadline(&core) {
                                log::debug!("{} idle, closing connection", plc.key);
                                core.state = PlcState::Closing;
                                continue;
                            }
                            let deadline = idle_deadline(&core);
                            let _ = plc.wake.wait_until(&mut core, deadline);
                            continue;
                        }

                        let packing_allowed = core.options_packing_allowed(&plc.options);
                        let (reqs, bodies) = take_batch(&mut core, packing_allowed);
                        if reqs.is_empty() {
                            plc.done.notify_all();
                            continue;
                        }

                        match build_data_packet(&mut core, &mut buf, &bodies) {
                            Ok(()) => {
                                core.inflight = reqs;
                                break 'decide IoJob::Exchange(buf.packet().to_vec());
                            }
                            Err(status) => {
                                log::warn!("unable to assemble packet: {}", status);
                                for req in &reqs {
                                    if let Some(entry) = core.tags.get_mut(&req.tag_id) {
                                        entry.base.status =
                                            Status::Err(status.err_kind().unwrap_or(ErrorKind::Encode));
                                        entry.base.read_in_flight = false;
                                        entry.base.write_in_flight = false;
                                        entry.base.trans_offset = 0;
                                    }
                                }
                                plc.done.notify_all();
                            }
                        }
                    }
                    PlcState::Closing => {
                        let mut packets = vec![];
                        for index in (0..core.stack.len()).rev() {
                            if let Ok(true) = core.stack.build_disconnect(index, &mut buf) {
                                packets.push(buf.packet().to_vec());
                            }
                        }
                        core.state = PlcState::Disconnected;
                        break 'decide IoJob::Teardown(packets);
                    }
                }
            }
        };

        /* phase 2: socket work, without the mutex */
        match job {
            IoJob::Exit => break,
            IoJob::Connect => {
                let result = open_socket(&plc.options.host, plc.options.port);
                let mut core = plc.core.lock();
                match result {
                    Ok(sock) => {
                        socket = Some(sock);
                        if let Err(status) = core.stack.initialize_all() {
                            log::warn!("layer initialization failed: {}", status);
                            fail_all(&mut core, ErrorKind::BadDevice);
                            schedule_restart(&mut core);
                        } else {
                            core.state = PlcState::Registering;
                        }
                    }
                    Err(kind) => {
                        log::warn!(
                            "unable to connect to {}:{}: {}",
                            plc.options.host,
                            plc.options.port,
                            kind.decode()
                        );
                        fail_all(&mut core, kind);
                        schedule_restart(&mut core);
                        plc.done.notify_all();
                    }
                }
            }
            IoJob::Exchange(bytes) => {
                let result = match socket.as_mut() {
                    Some(sock) => exchange(sock, &bytes),
                    None => Err(ErrorKind::BadConnection),
                };

                let mut core = plc.core.lock();
                match result {
                    Ok(frame) => {
                        let mut rbuf = PacketBuf::from_bytes(frame);
                        let outcome = core.stack.process_all(&mut rbuf);
                        apply_response(&plc, &mut core, &mut socket, outcome, &rbuf);
                    }
                    Err(kind) => {
                        log::warn!("socket exchange failed: {}", kind.decode());
                        socket = None;
                        fail_all(&mut core, kind);
                        schedule_restart(&mut core);
                        plc.done.notify_all();
                    }
                }
            }
            IoJob::Teardown(packets) => {
                if let Some(sock) = socket.as_mut() {
                    for packet in packets {
                        if sock.write_all(&packet).is_err() {
                            break;
                        }
                    }
                    let _ = sock.shutdown(std::net::Shutdown::Both);
                }
                socket = None;
            }
        }
    }

    /* unregister on the way out */
    let mut registry = REGISTRY.lock();
    if let Some(weak) = registry.get(&plc.key) {
        if weak.upgrade().map_or(true, |p| Arc::ptr_eq(&p, &plc)) {
            registry.remove(&plc.key);
        }
    }
    log::debug!("I/O loop for {} exiting", plc.key);
}

impl PlcCore {
    fn options_packing_allowed(&self, options: &PlcOptions) -> bool {
        // requests are packed into one Multiple Service Packet only on a
        // connected CIP session, never on the PCCC path
        options.use_connected && !options.has_pccc && self.stack.all_connected()
    }
}

/// write the application payload into the reserved window and frame it
fn build_data_packet(core: &mut PlcCore, buf: &mut PacketBuf, bodies: &[Vec<u8>]) -> Result<()> {
    core.stack.reserve_all(buf)?;

    let start = buf.payload_start();
    let cap = buf.payload_end();
    let mut offset = start;

    if bodies.len() == 1 {
        wire::set_bytes(buf.data_mut(), &mut offset, cap, &bodies[0])?;
    } else {
        build_multi_service(bodies, buf.data_mut(), &mut offset, cap)?;
    }

    buf.set_payload_end(offset);
    core.stack.fix_up_all(buf)?;

    Ok(())
}

/// apply the outcome of processing one inbound frame
fn apply_response(
    plc: &Plc,
    core: &mut PlcCore,
    socket: &mut Option<TcpStream>,
    outcome: Result<LayerResponse>,
    rbuf: &PacketBuf,
) {
    match outcome {
        Ok(LayerResponse::Consumed) => {
            // a handshake layer swallowed the packet; advance the state name
            if core.stack.all_connected() {
                core.state = PlcState::Ready;
                core.backoff_ms = 0;
            } else if core.state == PlcState::Registering {
                core.state = PlcState::ForwardOpening;
            }
            core.last_activity = Instant::now();
        }
        Ok(LayerResponse::Forward) => {
            let payload = rbuf.payload().to_vec();
            dispatch_responses(core, &payload);
            plc.done.notify_all();
        }
        Ok(LayerResponse::Partial) => {
            // a full EIP frame was read, so a partial here is a framing bug
            log::warn!("framing error: partial response after a complete frame");
            *socket = None;
            fail_all(core, ErrorKind::BadData);
            schedule_restart(core);
            plc.done.notify_all();
        }
        Err(status) => {
            let kind = status.err_kind().unwrap_or(ErrorKind::BadData);
            match kind {
                // transport and framing failures drop the connection
                ErrorKind::Read | ErrorKind::Write | ErrorKind::BadData | ErrorKind::Partial => {
                    *socket = None;
                    fail_all(core, kind);
                    schedule_restart(core);
                }
                // protocol-local failures only hurt the requests in flight
                _ => {
                    if core.state == PlcState::Registering || core.state == PlcState::ForwardOpening
                    {
                        *socket = None;
                        fail_all(core, kind);
                        schedule_restart(core);
                    } else {
                        fail_inflight(core, kind);
                    }
                }
            }
            plc.done.notify_all();
        }
    }
}

/* ------------------------------------------------------------------ */
/* socket plumbing                                                     */
/* ------------------------------------------------------------------ */

fn open_socket(host: &str, port: u16) -> std::result::Result<TcpStream, ErrorKind> {
    let addrs: Vec<_> = (host, port)
        .to_socket_addrs()
        .map_err(|_| ErrorKind::BadGateway)?
        .collect();
    let addr = addrs.first().ok_or(ErrorKind::BadGateway)?;

    let sock = TcpStream::connect_timeout(addr, CONNECT_TIMEOUT).map_err(|_| ErrorKind::BadGateway)?;
    sock.set_nodelay(true).map_err(|_| ErrorKind::BadGateway)?;
    sock.set_write_timeout(Some(WRITE_TIMEOUT))
        .map_err(|_| ErrorKind::BadGateway)?;

    Ok(sock)
}

/// send one packet and read back one complete EIP frame
fn exchange(sock: &mut TcpStream, bytes: &[u8]) -> std::result::Result<Vec<u8>, ErrorKind> {
    sock.write_all(bytes).map_err(|_| ErrorKind::Write)?;

    let deadline = Instant::now() + RESPONSE_TIMEOUT;

    let mut header = [0u8; crate::eip::EIP_HEADER_SIZE];
    read_exact_deadline(sock, &mut header, deadline)?;

    let payload_len = u16::from_le_bytes([header[2], header[3]]) as usize;
    let mut frame = vec![0u8; crate::eip::EIP_HEADER_SIZE + payload_len];
    frame[..crate::eip::EIP_HEADER_SIZE].copy_from_slice(&header);
    read_exact_deadline(sock, &mut frame[crate::eip::EIP_HEADER_SIZE..], deadline)?;

    Ok(frame)
}

fn read_exact_deadline(
    sock: &mut TcpStream,
    out: &mut [u8],
    deadline: Instant,
) -> std::result::Result<(), ErrorKind> {
    let mut filled = 0;
    while filled < out.len() {
        let now = Instant::now();
        if now >= deadline {
            return Err(ErrorKind::Timeout);
        }
        let remaining = (deadline - now).min(Duration::from_millis(250));
        sock.set_read_timeout(Some(remaining)).map_err(|_| ErrorKind::Read)?;

        match sock.read(&mut out[filled..]) {
            Ok(0) => return Err(ErrorKind::Read),
            Ok(n) => filled += n,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(_) => return Err(ErrorKind::Read),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> PlcOptions {
        PlcOptions {
            protocol: "ab_eip".into(),
            host: "10.0.0.1".into(),
            port: 44818,
            kind: PlcKind::ControlLogix,
            route: vec![1, 0],
            use_connected: true,
            forward_open_ex: false,
            cip_payload: 504,
            has_pccc: false,
            idle_timeout_ms: 5000,
            share_session: true,
            connection_group_id: 0,
        }
    }

    #[test]
    fn test_key_includes_group_and_route() {
        let mut a = options();
        let mut b = options();
        assert_eq!(a.key(), b.key());

        b.connection_group_id = 7;
        assert_ne!(a.key(), b.key());

        b = options();
        b.route = vec![1, 1];
        assert_ne!(a.key(), b.key());

        a.share_session = false;
        let k1 = a.key();
        let k2 = a.key();
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_backoff_growth() {
        let mut core = PlcCore {
            state: PlcState::Ready,
            stack: LayerStack::new(vec![]),
            queue: VecDeque::new(),
            inflight: vec![],
            tags: HashMap::new(),
            next_request_id: 1,
            tsn: 0,
            max_payload: 504,
            idle_timeout: Duration::from_secs(5),
            last_activity: Instant::now(),
            backoff_ms: 0,
            restart_at: Instant::now(),
            dead: false,
        };

        schedule_restart(&mut core);
        assert_eq!(core.backoff_ms, BACKOFF_INITIAL_MS);
        assert_eq!(core.state, PlcState::Restarting);

        for _ in 0..10 {
            schedule_restart(&mut core);
        }
        assert_eq!(core.backoff_ms, BACKOFF_MAX_MS);
    }
}

//! Queued, single-consumer file I/O.
//!
//! An [`AsyncFile`] owns one open file handle for its whole lifetime. In
//! [`IoMode::Asynchronous`] every read and write is turned into a descriptor and
//! pushed onto an internal queue that a dedicated worker thread services in
//! order; the caller only blocks in [`AsyncFile::read_all_sequential`] and
//! [`AsyncFile::wait_for_drain`]. In [`IoMode::Synchronous`] the same operations
//! run directly on the calling thread.
//!
//! # State machine
//!
//! ```text
//!  Idle --enqueue--> Draining --queue empty--> Idle
//!    \                   |
//!     \               I/O error (queue purged)
//!      \                 v
//!       `--------- Faulted --wait_for_drain (error returned)--> Idle
//! ```
//!
//! # Backpressure
//! When a producer pushes an operation that leaves more than
//! [`IoConfig::high_water`] entries queued, it polls until the depth falls to
//! [`IoConfig::low_water`].
//!
//! # Notifications
//! Read results are delivered to a [`ReadSink`]. In asynchronous mode the sink
//! is invoked on the worker thread; see the trait documentation.

use crate::config::{IoConfig, IoMode};
use crate::error::FlatError;
use anyhow::{Context, Result, anyhow};
use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Read, Seek, SeekFrom, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// How the underlying file is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// Existing file, read only.
    Read,
    /// Created or truncated, write only.
    Write,
    /// Created if missing, never truncated.
    ReadWrite,
}

/// Bytes produced by one read request.
///
/// An empty `data` slice signals end of file.
#[derive(Debug, Clone, Copy)]
pub struct ReadChunk<'a> {
    /// File offset the bytes were read from.
    pub offset: u64,
    pub data: &'a [u8],
}

impl ReadChunk<'_> {
    pub fn is_eof(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Receiver of read notifications.
///
/// **Threading:** in asynchronous mode both callbacks may run on the engine's
/// worker thread, concurrently with the thread that issued the read. Any state a
/// sink mutates must sit behind a lock the sink owns, and a callback must not
/// call back into the same [`AsyncFile`] (it would wait on itself).
///
/// Notifications for one file are serialized: the single worker delivers them in
/// the order the reads were issued.
pub trait ReadSink: Send + Sync {
    /// A read has been queued at `offset`. Only emitted in asynchronous mode,
    /// on the issuing thread.
    fn read_started(&self, _offset: u64) {}

    /// A read finished. Called with an empty chunk at end of file.
    fn read_complete(&self, chunk: ReadChunk<'_>);
}

/// Observable engine state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Draining,
    Faulted,
}

enum Op {
    Read { offset: u64, len: usize },
    Write { offset: Option<u64>, data: Vec<u8> },
}

#[derive(Default)]
struct Queue {
    ops: VecDeque<Op>,
    in_flight: usize,
    fault: Option<anyhow::Error>,
    shutdown: bool,
}

struct Shared {
    name: String,
    queue: Mutex<Queue>,
    signal: Condvar,
    file: Mutex<File>,
    sink: Mutex<Option<Arc<dyn ReadSink>>>,
}

impl Shared {
    fn sink(&self) -> Option<Arc<dyn ReadSink>> {
        self.sink.lock().clone()
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let n = {
            let mut f = self.file.lock();
            f.seek(SeekFrom::Start(offset))
                .with_context(|| format!("seek to {offset} in {}", self.name))?;
            read_full(&mut f, &mut buf)
                .with_context(|| format!("read {len} bytes at {offset} from {}", self.name))?
        };
        buf.truncate(n);
        Ok(buf)
    }

    fn write_at(&self, offset: Option<u64>, data: &[u8]) -> Result<()> {
        let mut f = self.file.lock();
        if let Some(offset) = offset {
            f.seek(SeekFrom::Start(offset))
                .with_context(|| format!("seek to {offset} in {}", self.name))?;
        }
        f.write_all(data)
            .with_context(|| format!("write {} bytes to {}", data.len(), self.name))?;
        f.flush()
            .with_context(|| format!("flush {}", self.name))?;
        Ok(())
    }

    fn service(&self, op: Op) -> Result<()> {
        match op {
            Op::Read { offset, len } => {
                let buf = if len == 0 { Vec::new() } else { self.read_at(offset, len)? };
                trace!("{}: read {} bytes at {}", self.name, buf.len(), offset);
                if let Some(sink) = self.sink() {
                    sink.read_complete(ReadChunk { offset, data: &buf });
                }
            }
            Op::Write { offset, data } => {
                self.write_at(offset, &data)?;
                trace!("{}: wrote {} bytes", self.name, data.len());
            }
        }
        Ok(())
    }
}

fn read_full(f: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match f.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == IoErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn run_worker(shared: Arc<Shared>) {
    debug!("{}: I/O worker started", shared.name);
    loop {
        let op = {
            let mut q = shared.queue.lock();
            loop {
                if let Some(op) = q.ops.pop_front() {
                    q.in_flight += 1;
                    break op;
                }
                if q.shutdown {
                    debug!("{}: I/O worker stopping", shared.name);
                    return;
                }
                shared.signal.wait(&mut q);
            }
        };
        // the depth just dropped: wake producers held by backpressure
        shared.signal.notify_all();

        let result = match catch_unwind(AssertUnwindSafe(|| shared.service(op))) {
            Ok(r) => r,
            Err(_) => Err(anyhow!("I/O notification handler panicked")),
        };

        let mut q = shared.queue.lock();
        q.in_flight -= 1;
        if let Err(e) = result {
            let purged = q.ops.len();
            q.ops.clear();
            warn!("{}: I/O worker faulted, {} queued operations purged: {:#}", shared.name, purged, e);
            if q.fault.is_none() {
                q.fault = Some(e);
            }
        }
        drop(q);
        shared.signal.notify_all();
    }
}

/// One open file serviced by a background queue.
///
/// ```no_run
/// use flatbridge::config::IoConfig;
/// use flatbridge::io::engine::{Access, AsyncFile};
///
/// let out = AsyncFile::open("out.dat", Access::Write, IoConfig::default())?;
/// out.write(b"HDR0001\n".to_vec(), None)?;
/// out.write(b"LIN0001\n".to_vec(), None)?;
/// out.wait_for_drain()?; // both writes are on disk, in order
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct AsyncFile {
    path: PathBuf,
    config: IoConfig,
    cursor: u64,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl AsyncFile {
    /// Open `path` and, in asynchronous mode, start its worker thread.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be opened or the worker cannot
    /// be spawned.
    pub fn open(path: impl AsRef<Path>, access: Access, config: IoConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let name = path.display().to_string();
        let file = match access {
            Access::Read => File::open(&path),
            Access::Write => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path),
            Access::ReadWrite => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path),
        }
        .with_context(|| FlatError::io(format!("AsyncFile {name}"), format!("open {access:?} failed")))?;

        let shared = Arc::new(Shared {
            name: name.clone(),
            queue: Mutex::new(Queue::default()),
            signal: Condvar::new(),
            file: Mutex::new(file),
            sink: Mutex::new(None),
        });

        let worker = match config.mode {
            IoMode::Asynchronous => {
                let worker_shared = Arc::clone(&shared);
                let handle = thread::Builder::new()
                    .name(format!("flatbridge-io {name}"))
                    .spawn(move || run_worker(worker_shared))
                    .with_context(|| FlatError::io(format!("AsyncFile {name}"), "spawn I/O worker"))?;
                Some(handle)
            }
            IoMode::Synchronous => None,
        };
        debug!("opened {} ({:?}, {:?})", name, access, config.mode);

        Ok(Self {
            path,
            config,
            cursor: 0,
            shared,
            worker,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &IoConfig {
        &self.config
    }

    /// Register the receiver of read notifications, replacing any previous one.
    pub fn subscribe(&self, sink: Arc<dyn ReadSink>) {
        *self.shared.sink.lock() = Some(sink);
    }

    /// Current length of the file in bytes.
    pub fn len(&self) -> Result<u64> {
        let f = self.shared.file.lock();
        let meta = f
            .metadata()
            .with_context(|| FlatError::io(self.source_id(), "stat failed"))?;
        Ok(meta.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Offset the next [`read`](Self::read) starts from.
    pub fn read_position(&self) -> u64 {
        self.cursor
    }

    pub fn set_read_position(&mut self, offset: u64) {
        self.cursor = offset;
    }

    /// Number of queued operations not yet picked up by the worker.
    pub fn queue_depth(&self) -> usize {
        self.shared.queue.lock().ops.len()
    }

    pub fn state(&self) -> EngineState {
        let q = self.shared.queue.lock();
        if q.fault.is_some() {
            EngineState::Faulted
        } else if !q.ops.is_empty() || q.in_flight > 0 {
            EngineState::Draining
        } else {
            EngineState::Idle
        }
    }

    pub fn is_faulted(&self) -> bool {
        self.state() == EngineState::Faulted
    }

    /// Read up to `chunk_size` bytes from the current position.
    ///
    /// Returns `false` once the position is at end of file (after the empty EOF
    /// notification has been issued) or while the engine is faulted.
    ///
    /// # Errors
    /// In synchronous mode, read failures are returned directly. In
    /// asynchronous mode only the file size lookup can fail here; read
    /// failures surface from the next [`wait_for_drain`](Self::wait_for_drain).
    pub fn read(&mut self, chunk_size: usize) -> Result<bool> {
        let chunk_size = chunk_size.max(1);
        match self.config.mode {
            IoMode::Synchronous => {
                let offset = self.cursor;
                let buf = self
                    .shared
                    .read_at(offset, chunk_size)
                    .with_context(|| FlatError::io(self.source_id(), "read failed"))?;
                self.cursor += buf.len() as u64;
                if let Some(sink) = self.shared.sink() {
                    sink.read_complete(ReadChunk { offset, data: &buf });
                }
                Ok(!buf.is_empty())
            }
            IoMode::Asynchronous => {
                if self.is_faulted() {
                    return Ok(false);
                }
                let len = self.len()?;
                let offset = self.cursor;
                if offset >= len {
                    // empty completion so consumers observe EOF in order
                    self.enqueue(Op::Read { offset, len: 0 });
                    return Ok(false);
                }
                let n = (len - offset).min(chunk_size as u64);
                if let Some(sink) = self.shared.sink() {
                    sink.read_started(offset);
                }
                self.enqueue(Op::Read {
                    offset,
                    len: n as usize,
                });
                self.cursor += n;
                Ok(true)
            }
        }
    }

    /// Read the whole file from offset 0 and block until every notification has
    /// been delivered.
    ///
    /// # Errors
    /// Returns the first read failure, including failures captured by the worker.
    pub fn read_all_sequential(&mut self, chunk_size: usize) -> Result<()> {
        self.cursor = 0;
        while self.read(chunk_size)? {}
        self.wait_for_drain()
    }

    /// Write `data` at `offset`, or at the file cursor when the write is serviced
    /// if `offset` is `None`.
    ///
    /// In asynchronous mode the write is only queued.
    ///
    /// # Errors
    /// Synchronous writes report failures directly; queued writes report them
    /// from the next [`wait_for_drain`](Self::wait_for_drain).
    pub fn write(&self, data: Vec<u8>, offset: Option<u64>) -> Result<()> {
        match self.config.mode {
            IoMode::Synchronous => self
                .shared
                .write_at(offset, &data)
                .with_context(|| FlatError::io(self.source_id(), "write failed")),
            IoMode::Asynchronous => {
                self.enqueue(Op::Write { offset, data });
                Ok(())
            }
        }
    }

    /// Block until the queue is empty and nothing is in flight.
    ///
    /// # Errors
    /// Returns (and clears) the error captured by the worker, if any.
    pub fn wait_for_drain(&self) -> Result<()> {
        let mut q = self.shared.queue.lock();
        loop {
            if let Some(err) = q.fault.take() {
                return Err(err.context(FlatError::io(self.source_id(), "background I/O failed")));
            }
            if q.ops.is_empty() && q.in_flight == 0 {
                return Ok(());
            }
            self.shared.signal.wait(&mut q);
        }
    }

    /// Drop every queued operation and release any thread blocked in
    /// [`wait_for_drain`](Self::wait_for_drain). The operation currently in flight
    /// completes; the worker keeps running.
    pub fn stop_all(&self) {
        let mut q = self.shared.queue.lock();
        let purged = q.ops.len();
        q.ops.clear();
        drop(q);
        self.shared.signal.notify_all();
        debug!("{}: stop requested, {} queued operations purged", self.shared.name, purged);
    }

    fn enqueue(&self, op: Op) {
        let mut q = self.shared.queue.lock();
        if q.fault.is_some() {
            trace!("{}: engine faulted, operation dropped", self.shared.name);
            return;
        }
        q.ops.push_back(op);
        self.shared.signal.notify_all();
        if q.ops.len() > self.config.high_water {
            trace!("{}: queue depth {} over high water", self.shared.name, q.ops.len());
            while q.ops.len() > self.config.low_water && q.fault.is_none() {
                self.shared.signal.wait_for(&mut q, self.config.poll_interval);
            }
        }
    }

    fn source_id(&self) -> String {
        format!("AsyncFile {}", self.shared.name)
    }
}

impl Drop for AsyncFile {
    fn drop(&mut self) {
        {
            let mut q = self.shared.queue.lock();
            q.shutdown = true;
        }
        self.shared.signal.notify_all();
        if let Some(handle) = self.worker.take() {
            // pending writes are serviced before the worker exits
            if handle.join().is_err() {
                warn!("{}: I/O worker panicked", self.shared.name);
            }
        }
    }
}

//! Integration tests for the queued file engine.

use flatbridge::config::{IoConfig, IoMode};
use flatbridge::error::{ErrorKind, error_kind};
use flatbridge::io::engine::{Access, AsyncFile, EngineState, ReadChunk, ReadSink};
use parking_lot::{Condvar, Mutex};
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Records every chunk it is handed.
#[derive(Default)]
struct Collect {
    chunks: Mutex<Vec<(u64, Vec<u8>)>>,
    started: AtomicUsize,
}

impl ReadSink for Collect {
    fn read_started(&self, _offset: u64) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn read_complete(&self, chunk: ReadChunk<'_>) {
        self.chunks.lock().push((chunk.offset, chunk.data.to_vec()));
    }
}

/// Blocks every delivery until the gate opens.
#[derive(Default)]
struct Gated {
    inner: Collect,
    open: Mutex<bool>,
    signal: Condvar,
}

impl Gated {
    fn release(&self) {
        *self.open.lock() = true;
        self.signal.notify_all();
    }
}

impl ReadSink for Gated {
    fn read_started(&self, offset: u64) {
        self.inner.read_started(offset);
    }

    fn read_complete(&self, chunk: ReadChunk<'_>) {
        let mut open = self.open.lock();
        while !*open {
            self.signal.wait(&mut open);
        }
        drop(open);
        self.inner.read_complete(chunk);
    }
}

fn offsets(sink: &Collect) -> Vec<u64> {
    sink.chunks.lock().iter().map(|(o, _)| *o).collect()
}

#[test]
fn test_sequential_read_delivers_chunks_in_order() -> anyhow::Result<()> {
    init_logs();
    let dir = TempDir::new()?;
    let path = dir.path().join("data.bin");
    fs::write(&path, b"0123456789")?;

    for mode in [IoMode::Asynchronous, IoMode::Synchronous] {
        let mut file = AsyncFile::open(&path, Access::Read, IoConfig::default().with_mode(mode))?;
        let sink = Arc::new(Collect::default());
        file.subscribe(sink.clone());
        file.read_all_sequential(4)?;

        assert_eq!(offsets(&sink), vec![0, 4, 8, 10], "mode {mode:?}");
        let chunks = sink.chunks.lock();
        assert!(chunks.last().is_some_and(|(_, d)| d.is_empty()), "EOF is an empty chunk");
        let joined: Vec<u8> = chunks.iter().flat_map(|(_, d)| d.clone()).collect();
        assert_eq!(joined, b"0123456789");
        assert_eq!(file.state(), EngineState::Idle);
    }
    Ok(())
}

#[test]
fn test_read_all_restarts_from_offset_zero() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("data.bin");
    fs::write(&path, b"abcdef")?;

    let mut file = AsyncFile::open(&path, Access::Read, IoConfig::default())?;
    let sink = Arc::new(Collect::default());
    file.subscribe(sink.clone());
    file.set_read_position(4);
    file.read_all_sequential(16)?;

    assert_eq!(offsets(&sink), vec![0, 6]);
    assert_eq!(file.read_position(), 6);
    Ok(())
}

#[test]
fn test_queued_writes_land_in_order() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("out.txt");

    let file = AsyncFile::open(&path, Access::Write, IoConfig::default())?;
    for i in 0..50 {
        file.write(format!("{i:03}\n").into_bytes(), None)?;
    }
    file.wait_for_drain()?;
    drop(file);

    let expected: String = (0..50).map(|i| format!("{i:03}\n")).collect();
    assert_eq!(fs::read_to_string(&path)?, expected);
    Ok(())
}

#[test]
fn test_positioned_write_overwrites_in_place() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("rw.txt");
    fs::write(&path, b"AAAAAAAA")?;

    let file = AsyncFile::open(&path, Access::ReadWrite, IoConfig::default())?;
    file.write(b"BB".to_vec(), Some(3))?;
    file.wait_for_drain()?;
    assert_eq!(file.len()?, 8);
    drop(file);

    assert_eq!(fs::read(&path)?, b"AAABBAAA");
    Ok(())
}

#[test]
fn test_backpressure_blocks_the_producer() -> anyhow::Result<()> {
    init_logs();
    let dir = TempDir::new()?;
    let path = dir.path().join("data.bin");
    fs::write(&path, b"abcdefghij")?;

    let config = IoConfig {
        high_water: 2,
        low_water: 1,
        ..Default::default()
    };
    let mut file = AsyncFile::open(&path, Access::Read, config)?;
    let sink = Arc::new(Gated::default());
    file.subscribe(sink.clone());

    thread::scope(|s| -> anyhow::Result<()> {
        let producer = s.spawn(|| -> anyhow::Result<()> {
            while file.read(1)? {}
            file.wait_for_drain()
        });

        thread::sleep(Duration::from_millis(100));
        let issued = sink.inner.started.load(Ordering::SeqCst);
        assert!(issued < 10, "producer was never held back ({issued} reads issued)");
        assert!(issued >= 3, "producer stalled too early ({issued} reads issued)");

        sink.release();
        producer
            .join()
            .map_err(|_| anyhow::anyhow!("producer panicked"))??;
        Ok(())
    })?;

    let chunks = sink.inner.chunks.lock();
    let data: Vec<u8> = chunks.iter().flat_map(|(_, d)| d.clone()).collect();
    assert_eq!(data, b"abcdefghij");
    Ok(())
}

/// Poll `check` for up to two seconds.
fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_default_watermarks_hold_the_producer_until_the_queue_drains() -> anyhow::Result<()> {
    init_logs();
    let dir = TempDir::new()?;
    let path = dir.path().join("data.bin");
    fs::write(&path, b"abcd")?;

    let config = IoConfig::default();
    assert_eq!((config.high_water, config.low_water), (20, 10));
    let mut file = AsyncFile::open(&path, Access::ReadWrite, config)?;
    let sink = Arc::new(Gated::default());
    file.subscribe(sink.clone());

    // the worker takes this read and blocks delivering it
    file.read(1)?;
    assert!(eventually(|| file.queue_depth() == 0), "worker never picked up the read");

    let file = &file;
    let pushed = AtomicUsize::new(0);
    let resumed_at = AtomicUsize::new(usize::MAX);
    thread::scope(|s| -> anyhow::Result<()> {
        let producer = s.spawn(|| -> anyhow::Result<()> {
            for i in 0..30u64 {
                file.write(vec![b'x'], Some(i))?;
                if pushed.fetch_add(1, Ordering::SeqCst) == 20 {
                    resumed_at.store(file.queue_depth(), Ordering::SeqCst);
                }
            }
            Ok(())
        });

        assert!(eventually(|| file.queue_depth() == 21), "queue never reached 21");
        thread::sleep(Duration::from_millis(100));
        assert_eq!(file.queue_depth(), 21);
        assert_eq!(pushed.load(Ordering::SeqCst), 20, "the 21st write must still be blocked");

        sink.release();
        producer
            .join()
            .map_err(|_| anyhow::anyhow!("producer panicked"))??;
        Ok(())
    })?;

    let depth = resumed_at.load(Ordering::SeqCst);
    assert!(depth <= 10, "producer resumed at depth {depth}");
    file.wait_for_drain()?;
    assert_eq!(file.len()?, 30);
    Ok(())
}

#[test]
fn test_stop_all_purges_queued_reads() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("data.bin");
    fs::write(&path, b"abcdef")?;

    let mut file = AsyncFile::open(&path, Access::Read, IoConfig::default())?;
    let sink = Arc::new(Gated::default());
    file.subscribe(sink.clone());
    for _ in 0..6 {
        file.read(1)?;
    }
    file.stop_all();
    assert_eq!(file.queue_depth(), 0);

    sink.release();
    file.wait_for_drain()?;
    assert!(sink.inner.chunks.lock().len() <= 1);
    assert_eq!(file.state(), EngineState::Idle);
    Ok(())
}

#[test]
fn test_background_failure_surfaces_from_wait_for_drain() -> anyhow::Result<()> {
    init_logs();
    let dir = TempDir::new()?;
    let path = dir.path().join("readonly.txt");
    fs::write(&path, b"x")?;

    let file = AsyncFile::open(&path, Access::Read, IoConfig::default())?;
    file.write(b"nope".to_vec(), None)?;
    let err = file.wait_for_drain().expect_err("write to a read-only handle");
    assert_eq!(error_kind(&err), Some(ErrorKind::Io));

    // the fault is reported once, then the engine accepts work again
    assert_eq!(file.state(), EngineState::Idle);
    file.wait_for_drain()?;
    Ok(())
}

#[test]
fn test_synchronous_failures_are_immediate() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("readonly.txt");
    fs::write(&path, b"x")?;

    let file = AsyncFile::open(&path, Access::Read, IoConfig::default().with_mode(IoMode::Synchronous))?;
    let err = file.write(b"nope".to_vec(), None).expect_err("write to a read-only handle");
    assert_eq!(error_kind(&err), Some(ErrorKind::Io));
    Ok(())
}

#[test]
fn test_open_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = AsyncFile::open(dir.path().join("missing"), Access::Read, IoConfig::default())
        .err()
        .unwrap();
    assert_eq!(error_kind(&err), Some(ErrorKind::Io));
}

//! Converters with scripted behavior.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use docshift::{ConversionError, ConverterRegistry};

fn write(dest: &Path, bytes: &[u8]) -> Result<(), ConversionError> {
    std::fs::write(dest, bytes).map_err(|source| ConversionError::WriteDocument {
        path: dest.to_path_buf(),
        source,
    })
}

/// Every kind writes a small marker file.
pub fn ok_converters() -> ConverterRegistry {
    ConverterRegistry::uniform(Arc::new(
        |_: &Path, dest: &Path| -> Result<(), ConversionError> { write(dest, b"converted") },
    ))
}

/// Every kind fails with `message`.
pub fn failing_converters(message: &'static str) -> ConverterRegistry {
    ConverterRegistry::uniform(Arc::new(
        move |_: &Path, _: &Path| -> Result<(), ConversionError> {
            Err(ConversionError::Pdf(message.to_string()))
        },
    ))
}

/// Every kind panics with `message`.
pub fn panicking_converters(message: &'static str) -> ConverterRegistry {
    ConverterRegistry::uniform(Arc::new(
        move |_: &Path, _: &Path| -> Result<(), ConversionError> { panic!("{}", message) },
    ))
}

/// Records how many conversions run at the same time.
#[derive(Clone, Default)]
pub struct ConcurrencyTracker {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

impl ConcurrencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    /// Converters that sleep for `delay` while counted as active.
    pub fn converters(&self, delay: Duration) -> ConverterRegistry {
        let tracker = self.clone();
        ConverterRegistry::uniform(Arc::new(
            move |_: &Path, dest: &Path| -> Result<(), ConversionError> {
                let now = tracker.active.fetch_add(1, Ordering::SeqCst) + 1;
                tracker.peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(delay);
                tracker.active.fetch_sub(1, Ordering::SeqCst);
                tracker.finished.fetch_add(1, Ordering::SeqCst);
                write(dest, b"converted")
            },
        ))
    }
}

/// Holds every conversion until opened.
#[derive(Clone, Default)]
pub struct Gate {
    open: Arc<AtomicBool>,
    entered: Arc<AtomicUsize>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    /// Blocks until `count` conversions are waiting at the gate.
    pub fn wait_entered(&self, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.entered.load(Ordering::SeqCst) < count {
            assert!(Instant::now() < deadline, "conversions never reached the gate");
            thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn converters(&self) -> ConverterRegistry {
        let gate = self.clone();
        ConverterRegistry::uniform(Arc::new(
            move |_: &Path, dest: &Path| -> Result<(), ConversionError> {
                gate.entered.fetch_add(1, Ordering::SeqCst);
                let deadline = Instant::now() + Duration::from_secs(10);
                while !gate.open.load(Ordering::SeqCst) && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(5));
                }
                write(dest, b"converted")
            },
        ))
    }
}

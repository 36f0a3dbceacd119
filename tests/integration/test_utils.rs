//! Test utilities for integration tests.
//!
//! Provides a counting mock generator, fixture images, and a harness that
//! wires a store, cache and repository onto a temporary root with a manual
//! clock.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use scene_cache::{
    ArtifactStore, CacheSettings, GenerationCache, GenerationParams, Generator, GeneratorError,
    ImageRepository, ManualClock, StoreSettings,
};

// =============================================================================
// Fixture images
// =============================================================================

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
}

/// PNG-encoded gradient image.
pub fn png_image(width: u32, height: u32) -> Bytes {
    let mut buf = Cursor::new(Vec::new());
    gradient(width, height)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    Bytes::from(buf.into_inner())
}

/// JPEG-encoded gradient image.
pub fn jpeg_image(width: u32, height: u32) -> Bytes {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 90)
        .encode_image(&gradient(width, height))
        .unwrap();
    Bytes::from(buf)
}

/// Check if data looks like a JPEG (SOI marker).
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8
}

// =============================================================================
// Mock Generator
// =============================================================================

/// Generator that counts calls and can be delayed or made to fail.
///
/// Clones share counters and switches.
#[derive(Clone)]
pub struct MockGenerator {
    calls: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
    delay: Duration,
    output: Bytes,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
            delay: Duration::ZERO,
            output: png_image(64, 48),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_output(mut self, output: Bytes) -> Self {
        self.output = output;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, _params: &GenerationParams) -> Result<Bytes, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        if self.failing.load(Ordering::SeqCst) {
            return Err(GeneratorError::Upstream("provider returned 503".to_string()));
        }
        Ok(self.output.clone())
    }
}

// =============================================================================
// Harness
// =============================================================================

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap()
}

/// A store, cache and repository sharing one temporary root and clock.
pub struct Harness {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub generator: MockGenerator,
    pub store: Arc<ArtifactStore>,
    pub cache: GenerationCache<MockGenerator>,
    pub repository: Arc<ImageRepository>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_generator(MockGenerator::new()).await
    }

    pub async fn with_generator(generator: MockGenerator) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::open_at(dir, generator, ManualClock::new(start_time())).await
    }

    /// Open a harness on an existing root, taking ownership of it.
    pub async fn open_at(dir: TempDir, generator: MockGenerator, clock: Arc<ManualClock>) -> Self {
        let store = Arc::new(
            ArtifactStore::open(StoreSettings::new(dir.path()))
                .await
                .unwrap(),
        );
        let repository = Arc::new(
            ImageRepository::open(&store, clock.clone())
                .await
                .unwrap(),
        );
        let cache = GenerationCache::open(
            generator.clone(),
            store.clone(),
            CacheSettings::default(),
            clock.clone(),
        )
        .await
        .unwrap();

        Self {
            dir,
            clock,
            generator,
            store,
            cache,
            repository,
        }
    }

    /// Drop every handle on the root, releasing its lock but keeping files.
    pub fn close(self) -> (TempDir, Arc<ManualClock>) {
        (self.dir, self.clock)
    }

    pub fn path(&self, relative: &std::path::Path) -> std::path::PathBuf {
        self.dir.path().join(relative)
    }
}

pub fn scene(description: &str) -> GenerationParams {
    GenerationParams::new(description).with_style("palette", "dusk")
}

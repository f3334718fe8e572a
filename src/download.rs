use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use thiserror::Error;

/// How long a finished download stays visible at 100%.
pub const COMPLETION_HOLD: Duration = Duration::from_secs(1);
pub const FALLBACK_EXTENSION: &str = "jpg";
pub const FALLBACK_CONTENT_TYPE: &str = "image/jpeg";
const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    #[error("transfer failed: {0}")]
    TransferFailed(String),
    #[error("response has no readable body")]
    UnreadableStream,
    #[error("could not save {file_name}: {reason}")]
    SaveFailed { file_name: String, reason: String },
    #[error("a download is already in progress")]
    Busy,
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One response body, read chunk by chunk.
pub trait ChunkStream: Send {
    fn content_length(&self) -> Option<u64>;

    /// `Ok(None)` marks the end of the body.
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, DownloadError>;
}

pub trait ChunkTransport: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn ChunkStream>, DownloadError>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        // No overall timeout: full-resolution images can take a while.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(None)
            .build()
            .context("Could not initialize HTTP client for downloads")?;
        Ok(Self { client })
    }
}

impl ChunkTransport for HttpTransport {
    fn open(&self, url: &str) -> Result<Box<dyn ChunkStream>, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| DownloadError::TransferFailed(format!("request to {url}: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::TransferFailed(format!("HTTP {status} for {url}")));
        }
        if status == StatusCode::NO_CONTENT {
            return Err(DownloadError::UnreadableStream);
        }
        let content_length = response.content_length().filter(|len| *len > 0);
        Ok(Box::new(HttpChunkStream {
            response,
            content_length,
        }))
    }
}

struct HttpChunkStream {
    response: Response,
    content_length: Option<u64>,
}

impl ChunkStream for HttpChunkStream {
    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, DownloadError> {
        let mut buffer = vec![0u8; READ_CHUNK_SIZE];
        loop {
            match self.response.read(&mut buffer) {
                Ok(0) => return Ok(None),
                Ok(read) => {
                    buffer.truncate(read);
                    return Ok(Some(buffer));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(DownloadError::TransferFailed(format!(
                        "could not read response body: {err}"
                    )))
                }
            }
        }
    }
}

/// Save-as-local-file capability.
pub trait FileSaver: Send + Sync {
    fn save(&self, bytes: &[u8], file_name: &str, content_type: &str) -> Result<PathBuf>;
}

pub struct DirectorySaver {
    dir: PathBuf,
}

impl DirectorySaver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FileSaver for DirectorySaver {
    fn save(&self, bytes: &[u8], file_name: &str, content_type: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Could not create directory {}", self.dir.display()))?;
        let path = unique_path(&self.dir, file_name);
        fs::write(&path, bytes)
            .with_context(|| format!("Could not write downloaded file {}", path.display()))?;
        log::info!(
            "saved {} ({} bytes, {content_type})",
            path.display(),
            bytes.len()
        );
        Ok(path)
    }
}

fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, extension) = match file_name.rsplit_once('.') {
        Some((stem, extension)) => (stem, Some(extension)),
        None => (file_name, None),
    };
    (1u32..)
        .map(|index| match extension {
            Some(extension) => dir.join(format!("{stem} ({index}).{extension}")),
            None => dir.join(format!("{stem} ({index})")),
        })
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub file_stem: String,
}

impl DownloadRequest {
    pub fn for_image(source_prefix: &str, image_id: &str, url: &str) -> Self {
        Self {
            url: url.to_string(),
            file_stem: format!(
                "{}-{}",
                sanitize_for_file_name(source_prefix),
                sanitize_for_file_name(image_id)
            ),
        }
    }

    /// Name shown while the transfer runs, before the content has been sniffed.
    pub fn display_file_name(&self) -> String {
        format!("{}.{FALLBACK_EXTENSION}", self.file_stem)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: &'static str,
    pub len: usize,
}

/// File extension and content type for the received bytes.
pub fn detect_file_type(bytes: &[u8]) -> (&'static str, &'static str) {
    use image::ImageFormat;

    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => ("png", "image/png"),
        Ok(ImageFormat::Gif) => ("gif", "image/gif"),
        Ok(ImageFormat::WebP) => ("webp", "image/webp"),
        _ => (FALLBACK_EXTENSION, FALLBACK_CONTENT_TYPE),
    }
}

/// Streams `url` into one buffer, reporting percentages when the size is known.
///
/// The cancel token is checked between chunk reads; `Ok(None)` means the
/// transfer was cancelled.
pub fn run_transfer(
    transport: &dyn ChunkTransport,
    url: &str,
    cancel: &CancelToken,
    mut on_progress: impl FnMut(f32),
) -> Result<Option<Vec<u8>>, DownloadError> {
    let mut stream = transport.open(url)?;
    if cancel.is_cancelled() {
        return Ok(None);
    }

    let total = stream.content_length().filter(|total| *total > 0);
    let mut buffer = Vec::with_capacity(
        total
            .and_then(|total| usize::try_from(total).ok())
            .unwrap_or(0),
    );
    let mut last_percent = 0.0f32;

    while let Some(chunk) = stream.next_chunk()? {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        buffer.extend_from_slice(&chunk);

        if let Some(total) = total {
            let percent = (buffer.len() as f64 / total as f64 * 100.0).clamp(0.0, 100.0) as f32;
            last_percent = last_percent.max(percent);
            on_progress(last_percent);
        }
    }

    if cancel.is_cancelled() {
        return Ok(None);
    }
    if let Some(total) = total {
        if buffer.len() as u64 != total {
            return Err(DownloadError::TransferFailed(format!(
                "received {} of {total} bytes",
                buffer.len()
            )));
        }
    }
    Ok(Some(buffer))
}

fn save_bytes(
    saver: &dyn FileSaver,
    file_stem: &str,
    bytes: &[u8],
) -> Result<SavedFile, DownloadError> {
    let (extension, content_type) = detect_file_type(bytes);
    let file_name = format!("{file_stem}.{extension}");
    let path = saver
        .save(bytes, &file_name, content_type)
        .map_err(|err| DownloadError::SaveFailed {
            file_name: file_name.clone(),
            reason: format!("{err:#}"),
        })?;
    Ok(SavedFile {
        path,
        file_name,
        content_type,
        len: bytes.len(),
    })
}

enum WorkerEvent {
    Progress(f32),
    /// `Ok(None)` when the worker saw the cancel flag.
    Finished(Result<Option<Vec<u8>>, DownloadError>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadState {
    Idle,
    InProgress,
    Completed { saved: SavedFile, hold_until: Instant },
    Cancelled,
    Failed(DownloadError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Completed(SavedFile),
    Failed(DownloadError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressView<'a> {
    pub percent: f32,
    pub file_name: &'a str,
}

/// Single-flight download state machine polled from the UI loop.
///
/// The worker only transfers bytes; saving happens in [`DownloadController::poll`]
/// so a cancelled attempt can never reach the [`FileSaver`].
///
/// Cancelled and Failed settle to Idle on the next poll; Completed waits
/// for [`COMPLETION_HOLD`] first.
pub struct DownloadController {
    transport: Arc<dyn ChunkTransport>,
    saver: Arc<dyn FileSaver>,
    state: DownloadState,
    progress: Option<f32>,
    file_name: String,
    file_stem: String,
    cancel: Option<CancelToken>,
    receiver: Option<Receiver<WorkerEvent>>,
    worker: Option<JoinHandle<()>>,
}

impl DownloadController {
    pub fn new(transport: Arc<dyn ChunkTransport>, saver: Arc<dyn FileSaver>) -> Self {
        Self {
            transport,
            saver,
            state: DownloadState::Idle,
            progress: None,
            file_name: String::new(),
            file_stem: String::new(),
            cancel: None,
            receiver: None,
            worker: None,
        }
    }

    /// Takes effect from the next [`DownloadController::start`].
    pub fn set_saver(&mut self, saver: Arc<dyn FileSaver>) {
        self.saver = saver;
    }

    pub fn state(&self) -> &DownloadState {
        &self.state
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self.state, DownloadState::InProgress)
    }

    pub fn progress(&self) -> Option<f32> {
        self.progress
    }

    pub fn progress_view(&self) -> Option<ProgressView<'_>> {
        self.progress.map(|percent| ProgressView {
            percent,
            file_name: &self.file_name,
        })
    }

    pub fn start(&mut self, request: DownloadRequest) -> Result<(), DownloadError> {
        if self.is_in_progress() {
            log::warn!("ignoring download of {}: another download is running", request.url);
            return Err(DownloadError::Busy);
        }

        log::info!("starting download of {}", request.url);
        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel::<WorkerEvent>();
        let transport = Arc::clone(&self.transport);
        let worker_cancel = cancel.clone();

        self.file_name = request.display_file_name();
        self.file_stem = request.file_stem.clone();
        let worker = thread::spawn(move || {
            let progress_tx = tx.clone();
            let result = run_transfer(transport.as_ref(), &request.url, &worker_cancel, |percent| {
                let _ = progress_tx.send(WorkerEvent::Progress(percent));
            });
            let _ = tx.send(WorkerEvent::Finished(result));
        });

        self.state = DownloadState::InProgress;
        self.progress = Some(0.0);
        self.cancel = Some(cancel);
        self.receiver = Some(rx);
        self.worker = Some(worker);
        Ok(())
    }

    /// Aborts the in-flight transfer. Returns `false` when nothing was running.
    pub fn cancel(&mut self) -> bool {
        if !self.is_in_progress() {
            return false;
        }
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.receiver = None;
        self.state = DownloadState::Cancelled;
        self.progress = None;
        log::info!("download of {} cancelled", self.file_name);
        true
    }

    /// Drains worker events. Returns an outcome once per finished transfer.
    pub fn poll(&mut self, now: Instant) -> Option<DownloadOutcome> {
        match &self.state {
            DownloadState::Idle | DownloadState::InProgress => {}
            DownloadState::Completed { hold_until, .. } => {
                if now >= *hold_until {
                    self.state = DownloadState::Idle;
                    self.progress = None;
                }
                return None;
            }
            DownloadState::Cancelled | DownloadState::Failed(_) => {
                self.state = DownloadState::Idle;
                return None;
            }
        }

        let receiver = self.receiver.take()?;
        loop {
            match receiver.try_recv() {
                Ok(WorkerEvent::Progress(percent)) => {
                    let current = self.progress.unwrap_or(0.0);
                    self.progress = Some(current.max(percent));
                }
                Ok(WorkerEvent::Finished(result)) => return self.finish(result, now),
                Err(TryRecvError::Empty) => {
                    self.receiver = Some(receiver);
                    return None;
                }
                Err(TryRecvError::Disconnected) => {
                    return self.finish(
                        Err(DownloadError::TransferFailed(
                            "download worker disconnected".to_string(),
                        )),
                        now,
                    )
                }
            }
        }
    }

    fn finish(
        &mut self,
        result: Result<Option<Vec<u8>>, DownloadError>,
        now: Instant,
    ) -> Option<DownloadOutcome> {
        let cancelled = self
            .cancel
            .take()
            .map_or(true, |cancel| cancel.is_cancelled());
        let result = match result {
            Ok(Some(_)) if cancelled => Ok(None),
            Ok(Some(bytes)) => save_bytes(self.saver.as_ref(), &self.file_stem, &bytes).map(Some),
            Ok(None) => Ok(None),
            Err(err) => Err(err),
        };
        match result {
            Ok(Some(saved)) => {
                log::info!("download finished: {}", saved.path.display());
                self.file_name = saved.file_name.clone();
                self.progress = Some(100.0);
                self.state = DownloadState::Completed {
                    saved: saved.clone(),
                    hold_until: now + COMPLETION_HOLD,
                };
                Some(DownloadOutcome::Completed(saved))
            }
            Ok(None) => {
                self.progress = None;
                self.state = DownloadState::Cancelled;
                None
            }
            Err(err) => {
                log::error!("download of {} failed: {err}", self.file_name);
                self.progress = None;
                self.state = DownloadState::Failed(err.clone());
                Some(DownloadOutcome::Failed(err))
            }
        }
    }

    #[cfg(test)]
    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

pub fn sanitize_for_file_name(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const JPEG_MAGIC: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xE0];

    struct ScriptedTransport {
        status_ok: bool,
        content_length: Option<u64>,
        chunks: Vec<Vec<u8>>,
    }

    impl ScriptedTransport {
        fn new(content_length: Option<u64>, chunks: Vec<Vec<u8>>) -> Self {
            Self {
                status_ok: true,
                content_length,
                chunks,
            }
        }
    }

    struct ScriptedStream {
        content_length: Option<u64>,
        chunks: std::vec::IntoIter<Vec<u8>>,
    }

    impl ChunkStream for ScriptedStream {
        fn content_length(&self) -> Option<u64> {
            self.content_length
        }

        fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, DownloadError> {
            Ok(self.chunks.next())
        }
    }

    impl ChunkTransport for ScriptedTransport {
        fn open(&self, url: &str) -> Result<Box<dyn ChunkStream>, DownloadError> {
            if !self.status_ok {
                return Err(DownloadError::TransferFailed(format!("HTTP 500 for {url}")));
            }
            Ok(Box::new(ScriptedStream {
                content_length: self.content_length,
                chunks: self.chunks.clone().into_iter(),
            }))
        }
    }

    /// Hands out chunks only as the test pushes them.
    struct GatedTransport {
        content_length: Option<u64>,
        chunks: Mutex<Option<Receiver<Vec<u8>>>>,
    }

    struct GatedStream {
        content_length: Option<u64>,
        chunks: Receiver<Vec<u8>>,
    }

    impl ChunkStream for GatedStream {
        fn content_length(&self) -> Option<u64> {
            self.content_length
        }

        fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, DownloadError> {
            Ok(self.chunks.recv().ok())
        }
    }

    impl ChunkTransport for GatedTransport {
        fn open(&self, _url: &str) -> Result<Box<dyn ChunkStream>, DownloadError> {
            let chunks = self
                .chunks
                .lock()
                .ok()
                .and_then(|mut slot| slot.take())
                .ok_or(DownloadError::UnreadableStream)?;
            Ok(Box::new(GatedStream {
                content_length: self.content_length,
                chunks,
            }))
        }
    }

    #[derive(Default)]
    struct RecordingSaver {
        saved: Mutex<Vec<(String, usize, String)>>,
    }

    impl RecordingSaver {
        fn calls(&self) -> Vec<(String, usize, String)> {
            self.saved.lock().expect("saver lock").clone()
        }
    }

    impl FileSaver for RecordingSaver {
        fn save(&self, bytes: &[u8], file_name: &str, content_type: &str) -> Result<PathBuf> {
            self.saved.lock().expect("saver lock").push((
                file_name.to_string(),
                bytes.len(),
                content_type.to_string(),
            ));
            Ok(PathBuf::from("/downloads").join(file_name))
        }
    }

    fn jpeg_chunks(sizes: &[usize]) -> Vec<Vec<u8>> {
        let mut chunks = sizes
            .iter()
            .enumerate()
            .map(|(index, size)| vec![index as u8 + 1; *size])
            .collect::<Vec<_>>();
        if let Some(first) = chunks.first_mut() {
            first[..JPEG_MAGIC.len()].copy_from_slice(&JPEG_MAGIC);
        }
        chunks
    }

    fn poll_until_settled(controller: &mut DownloadController) -> Option<DownloadOutcome> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(outcome) = controller.poll(Instant::now()) {
                return Some(outcome);
            }
            if !controller.is_in_progress() {
                return None;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("download did not settle in time");
    }

    #[test]
    fn progress_follows_known_content_length() {
        let transport = ScriptedTransport::new(Some(1000), jpeg_chunks(&[250, 250, 500]));
        let mut observed = Vec::new();
        let bytes = run_transfer(&transport, "http://img/full", &CancelToken::new(), |p| {
            observed.push(p)
        })
        .expect("transfer should succeed")
        .expect("transfer was not cancelled");

        assert_eq!(observed, vec![25.0, 50.0, 100.0]);
        assert_eq!(bytes.len(), 1000);
        assert_eq!(&bytes[..4], &JPEG_MAGIC);
        assert_eq!(bytes[250], 2);
        assert_eq!(bytes[999], 3);
    }

    #[test]
    fn progress_is_bounded_and_non_decreasing() {
        let transport = ScriptedTransport::new(Some(700), jpeg_chunks(&[100, 0, 7, 300, 293]));
        let mut observed = Vec::new();
        let bytes = run_transfer(&transport, "u", &CancelToken::new(), |p| observed.push(p))
            .expect("transfer should succeed")
            .expect("not cancelled");
        assert_eq!(bytes.len(), 700);
        assert!(observed.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(observed.iter().all(|p| (0.0..=100.0).contains(p)));
        assert_eq!(observed.last().copied(), Some(100.0));
    }

    #[test]
    fn missing_content_length_still_completes() {
        let transport = ScriptedTransport::new(None, jpeg_chunks(&[10, 20, 30]));
        let mut observed = Vec::new();
        let bytes = run_transfer(&transport, "u", &CancelToken::new(), |p| observed.push(p))
            .expect("transfer should succeed")
            .expect("not cancelled");
        assert!(observed.is_empty());
        assert_eq!(bytes.len(), 60);
    }

    #[test]
    fn short_body_is_a_transfer_failure() {
        let transport = ScriptedTransport::new(Some(100), jpeg_chunks(&[40]));
        let result = run_transfer(&transport, "u", &CancelToken::new(), |_| {});
        assert!(matches!(result, Err(DownloadError::TransferFailed(_))));
    }

    #[test]
    fn cancel_between_chunks_stops_reading() {
        let transport = ScriptedTransport::new(Some(1000), jpeg_chunks(&[250, 250, 500]));
        let cancel = CancelToken::new();
        let mut observed = Vec::new();
        let result = run_transfer(&transport, "u", &cancel, |p| {
            observed.push(p);
            cancel.cancel();
        })
        .expect("cancellation is not an error");
        assert!(result.is_none());
        assert_eq!(observed, vec![25.0]);
    }

    #[test]
    fn controller_saves_with_detected_name() {
        let saver = Arc::new(RecordingSaver::default());
        let mut controller = DownloadController::new(
            Arc::new(ScriptedTransport::new(Some(1000), jpeg_chunks(&[250, 250, 500]))),
            saver.clone(),
        );
        controller
            .start(DownloadRequest::for_image("unsplash", "abc123", "http://img/full"))
            .expect("start should succeed");
        assert_eq!(controller.progress(), Some(0.0));
        assert_eq!(
            controller.progress_view().map(|view| view.file_name.to_string()),
            Some("unsplash-abc123.jpg".to_string())
        );

        let outcome = poll_until_settled(&mut controller);
        let Some(DownloadOutcome::Completed(saved)) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(saved.file_name, "unsplash-abc123.jpg");
        assert_eq!(saved.content_type, "image/jpeg");
        assert_eq!(saved.len, 1000);
        assert_eq!(
            saver.calls(),
            vec![("unsplash-abc123.jpg".to_string(), 1000, "image/jpeg".to_string())]
        );

        assert_eq!(controller.progress(), Some(100.0));
        let now = Instant::now();
        controller.poll(now);
        assert!(matches!(controller.state(), DownloadState::Completed { .. }));
        controller.poll(now + COMPLETION_HOLD);
        assert_eq!(controller.state(), &DownloadState::Idle);
        assert_eq!(controller.progress(), None);
    }

    #[test]
    fn controller_reports_failure_and_clears_progress() {
        let mut transport = ScriptedTransport::new(Some(10), jpeg_chunks(&[10]));
        transport.status_ok = false;
        let saver = Arc::new(RecordingSaver::default());
        let mut controller = DownloadController::new(Arc::new(transport), saver.clone());
        controller
            .start(DownloadRequest::for_image("unsplash", "x", "http://img/missing"))
            .expect("start should succeed");

        let outcome = poll_until_settled(&mut controller);
        assert!(matches!(
            outcome,
            Some(DownloadOutcome::Failed(DownloadError::TransferFailed(_)))
        ));
        assert!(matches!(controller.state(), DownloadState::Failed(_)));
        assert_eq!(controller.progress(), None);
        assert!(saver.calls().is_empty());

        controller.poll(Instant::now());
        assert_eq!(controller.state(), &DownloadState::Idle);
    }

    #[test]
    fn controller_cancel_after_first_chunk_never_saves() {
        let (chunk_tx, chunk_rx) = mpsc::channel();
        let transport = GatedTransport {
            content_length: Some(1000),
            chunks: Mutex::new(Some(chunk_rx)),
        };
        let saver = Arc::new(RecordingSaver::default());
        let mut controller = DownloadController::new(Arc::new(transport), saver.clone());
        controller
            .start(DownloadRequest::for_image("unsplash", "abc", "http://img/full"))
            .expect("start should succeed");

        let mut chunks = jpeg_chunks(&[250, 250, 500]).into_iter();
        chunk_tx
            .send(chunks.next().expect("first chunk"))
            .expect("worker is listening");
        let deadline = Instant::now() + Duration::from_secs(5);
        while controller.progress() != Some(25.0) {
            assert!(Instant::now() < deadline, "first chunk was never reported");
            controller.poll(Instant::now());
            thread::sleep(Duration::from_millis(2));
        }

        assert!(controller.cancel());
        assert_eq!(controller.state(), &DownloadState::Cancelled);
        assert_eq!(controller.progress(), None);
        assert!(controller.progress_view().is_none());

        for chunk in chunks {
            let _ = chunk_tx.send(chunk);
        }
        drop(chunk_tx);
        controller.join_worker();
        assert!(saver.calls().is_empty());

        assert_eq!(controller.poll(Instant::now()), None);
        assert_eq!(controller.state(), &DownloadState::Idle);
        assert!(!controller.cancel());
    }

    #[test]
    fn cancel_after_transfer_finished_never_saves() {
        let saver = Arc::new(RecordingSaver::default());
        let mut controller = DownloadController::new(
            Arc::new(ScriptedTransport::new(Some(1000), jpeg_chunks(&[250, 250, 500]))),
            saver.clone(),
        );
        controller
            .start(DownloadRequest::for_image("unsplash", "abc", "http://img/full"))
            .expect("start should succeed");
        controller.join_worker();

        assert!(controller.cancel());
        assert_eq!(controller.state(), &DownloadState::Cancelled);
        assert_eq!(controller.progress(), None);
        assert_eq!(controller.poll(Instant::now()), None);
        assert_eq!(controller.state(), &DownloadState::Idle);
        assert!(saver.calls().is_empty());
    }

    struct FailingSaver;

    impl FileSaver for FailingSaver {
        fn save(&self, _bytes: &[u8], _file_name: &str, _content_type: &str) -> Result<PathBuf> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn save_failure_is_reported_with_file_name() {
        let mut controller = DownloadController::new(
            Arc::new(ScriptedTransport::new(Some(10), jpeg_chunks(&[10]))),
            Arc::new(FailingSaver),
        );
        controller
            .start(DownloadRequest::for_image("snapsync", "p1", "http://img/p1"))
            .expect("start should succeed");

        let outcome = poll_until_settled(&mut controller);
        let Some(DownloadOutcome::Failed(DownloadError::SaveFailed { file_name, reason })) = outcome
        else {
            panic!("expected save failure, got {outcome:?}");
        };
        assert_eq!(file_name, "snapsync-p1.jpg");
        assert!(reason.contains("disk full"));
        assert_eq!(controller.progress(), None);
    }

    struct PanickingTransport;

    impl ChunkTransport for PanickingTransport {
        fn open(&self, _url: &str) -> Result<Box<dyn ChunkStream>, DownloadError> {
            panic!("transport blew up");
        }
    }

    #[test]
    fn worker_that_dies_settles_to_failed() {
        let saver = Arc::new(RecordingSaver::default());
        let mut controller = DownloadController::new(Arc::new(PanickingTransport), saver.clone());
        controller
            .start(DownloadRequest::for_image("unsplash", "abc", "http://img/full"))
            .expect("start should succeed");
        controller.join_worker();

        let outcome = controller.poll(Instant::now());
        assert_eq!(
            outcome,
            Some(DownloadOutcome::Failed(DownloadError::TransferFailed(
                "download worker disconnected".to_string()
            )))
        );
        assert!(matches!(controller.state(), DownloadState::Failed(_)));
        assert_eq!(controller.progress(), None);
        assert!(saver.calls().is_empty());

        controller.poll(Instant::now());
        assert_eq!(controller.state(), &DownloadState::Idle);
    }

    #[test]
    fn second_start_while_running_is_rejected() {
        let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>();
        let transport = GatedTransport {
            content_length: None,
            chunks: Mutex::new(Some(chunk_rx)),
        };
        let mut controller =
            DownloadController::new(Arc::new(transport), Arc::new(RecordingSaver::default()));
        controller
            .start(DownloadRequest::for_image("unsplash", "one", "http://img/1"))
            .expect("first start should succeed");
        assert_eq!(
            controller.start(DownloadRequest::for_image("unsplash", "two", "http://img/2")),
            Err(DownloadError::Busy)
        );
        assert_eq!(
            controller.progress_view().map(|view| view.file_name.to_string()),
            Some("unsplash-one.jpg".to_string())
        );

        controller.cancel();
        drop(chunk_tx);
        controller.join_worker();
    }

    #[test]
    fn detect_file_type_sniffs_png_and_falls_back_to_jpeg() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        assert_eq!(detect_file_type(&png), ("png", "image/png"));
        assert_eq!(detect_file_type(&JPEG_MAGIC), ("jpg", "image/jpeg"));
        assert_eq!(detect_file_type(b"not an image"), ("jpg", "image/jpeg"));
    }

    #[test]
    fn directory_saver_avoids_overwriting() {
        let dir = std::env::temp_dir().join(format!(
            "snapview-saver-test-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        let saver = DirectorySaver::new(&dir);
        let first = saver
            .save(b"one", "unsplash-a.jpg", "image/jpeg")
            .expect("first save");
        let second = saver
            .save(b"two", "unsplash-a.jpg", "image/jpeg")
            .expect("second save");
        assert_eq!(first, dir.join("unsplash-a.jpg"));
        assert_eq!(second, dir.join("unsplash-a (1).jpg"));
        assert_eq!(fs::read(&second).expect("read back"), b"two");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn request_names_are_sanitized() {
        let request = DownloadRequest::for_image("unsplash", "a/b c", "http://img");
        assert_eq!(request.file_stem, "unsplash-a_b_c");
        assert_eq!(request.display_file_name(), "unsplash-a_b_c.jpg");
    }
}

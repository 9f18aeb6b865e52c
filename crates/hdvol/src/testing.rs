//! In-memory collaborators for tests.
//!
//! [`FakeEngine`] creates real descriptor and image files but keeps
//! attachment state in memory. [`RecordingRunner`] records tool invocations
//! instead of running them.
//!
//! Only built for tests and with the `testing` feature.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use parking_lot::Mutex;

use hdvol_common::paths::DESCRIPTOR_FILE;
use hdvol_common::{HdvolError, HdvolResult};

use crate::image::{CreateParams, ImageEngine, ImageHandle, ImageMode};
use crate::tool::{Capture, ToolRunner};

/// Records every invocation and returns a canned result.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<String>>,
    stdout: String,
    failure: Option<(i32, String)>,
}

impl RecordingRunner {
    /// A runner whose invocations succeed with `stdout`.
    pub fn with_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// A runner whose invocations fail with `code` and `message`.
    pub fn failing(code: i32, message: impl Into<String>) -> Self {
        Self {
            failure: Some((code, message.into())),
            ..Self::default()
        }
    }

    /// Invocations so far, as `program arg1 arg2 ...`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl ToolRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[String], capture: Capture) -> HdvolResult<String> {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.calls.lock().push(line);

        if let Some((code, message)) = &self.failure {
            return Err(HdvolError::Tool {
                tool: program.to_string(),
                code: *code,
                message: message.clone(),
            });
        }
        Ok(match capture {
            Capture::Stdout => self.stdout.clone(),
            Capture::Discard => String::new(),
        })
    }
}

/// Image created through [`FakeEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedImage {
    /// Image file.
    pub image: PathBuf,
    /// Capacity in KiB.
    pub size_kib: u64,
    /// Layout.
    pub mode: ImageMode,
    /// Cluster block log size.
    pub clog: u8,
}

/// How long a held attach waits for [`AttachGate::open`] before failing.
const HOLD_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct EngineState {
    created: Vec<CreatedImage>,
    attached: HashMap<PathBuf, String>,
    held: HashMap<PathBuf, Hold>,
    fail_create: bool,
    fail_attach: bool,
    fail_detach: bool,
}

#[derive(Debug)]
struct Hold {
    started: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
}

/// Controls an attach held by [`FakeEngine::hold_attach`].
#[derive(Debug)]
pub struct AttachGate {
    started: mpsc::Receiver<()>,
    release: mpsc::Sender<()>,
}

impl AttachGate {
    /// Wait up to `timeout` for the held attach to begin.
    pub fn wait_started(&self, timeout: Duration) -> bool {
        self.started.recv_timeout(timeout).is_ok()
    }

    /// Let the held attach complete.
    pub fn open(&self) {
        // The attach may already have given up waiting.
        let _ = self.release.send(());
    }
}

/// [`ImageEngine`] that writes placeholder files and tracks attachment in memory.
#[derive(Debug, Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<EngineState>>,
    attaches: Arc<AtomicUsize>,
    detaches: Arc<AtomicUsize>,
    next_device: Arc<AtomicUsize>,
}

impl FakeEngine {
    /// Create an engine with nothing attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent creates fail after writing a partial image.
    pub fn fail_create(&self, fail: bool) {
        self.state.lock().fail_create = fail;
    }

    /// Make subsequent attaches fail.
    pub fn fail_attach(&self, fail: bool) {
        self.state.lock().fail_attach = fail;
    }

    /// Make subsequent detaches fail, leaving the image attached.
    pub fn fail_detach(&self, fail: bool) {
        self.state.lock().fail_detach = fail;
    }

    /// Block the next attach of `descriptor` until the gate is opened.
    pub fn hold_attach(&self, descriptor: &Path) -> AttachGate {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        self.state.lock().held.insert(
            descriptor.to_path_buf(),
            Hold {
                started: started_tx,
                release: release_rx,
            },
        );
        AttachGate {
            started: started_rx,
            release: release_tx,
        }
    }

    /// Pretend `descriptor` was attached by someone else.
    pub fn mark_attached(&self, descriptor: &Path, device: &str) {
        self.state
            .lock()
            .attached
            .insert(descriptor.to_path_buf(), device.to_string());
    }

    /// Whether `descriptor` is currently attached.
    pub fn is_attached(&self, descriptor: &Path) -> bool {
        self.state.lock().attached.contains_key(descriptor)
    }

    /// Images created so far.
    pub fn created(&self) -> Vec<CreatedImage> {
        self.state.lock().created.clone()
    }

    /// Number of attach calls so far.
    pub fn attach_calls(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    /// Number of detach calls so far.
    pub fn detach_calls(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }
}

impl ImageEngine for FakeEngine {
    fn create(&self, params: &CreateParams<'_>) -> HdvolResult<()> {
        let dir = params.image.parent().ok_or_else(|| HdvolError::Internal {
            message: "image has no parent directory".to_string(),
        })?;
        fs::write(params.image, b"")?;

        let mut state = self.state.lock();
        if state.fail_create {
            return Err(HdvolError::Tool {
                tool: "fake".to_string(),
                code: 1,
                message: "create failed".to_string(),
            });
        }
        fs::write(dir.join(DESCRIPTOR_FILE), b"<Parallels_disk_image/>")?;
        state.created.push(CreatedImage {
            image: params.image.to_path_buf(),
            size_kib: params.size.as_kib(),
            mode: params.mode,
            clog: params.clog,
        });
        Ok(())
    }

    fn open(&self, descriptor: &Path) -> HdvolResult<Box<dyn ImageHandle>> {
        if !descriptor.is_file() {
            return Err(HdvolError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", descriptor.display()),
            )));
        }
        Ok(Box::new(FakeImage {
            engine: self.clone(),
            descriptor: descriptor.to_path_buf(),
        }))
    }
}

struct FakeImage {
    engine: FakeEngine,
    descriptor: PathBuf,
}

impl ImageHandle for FakeImage {
    fn attached_device(&self) -> HdvolResult<Option<String>> {
        Ok(self.engine.state.lock().attached.get(&self.descriptor).cloned())
    }

    fn attach(&self, _mountpoint: &Path) -> HdvolResult<String> {
        self.engine.attaches.fetch_add(1, Ordering::SeqCst);

        let hold = self.engine.state.lock().held.remove(&self.descriptor);
        if let Some(hold) = hold {
            let _ = hold.started.send(());
            hold.release
                .recv_timeout(HOLD_TIMEOUT)
                .map_err(|_| HdvolError::Tool {
                    tool: "fake".to_string(),
                    code: 110,
                    message: "attach held too long".to_string(),
                })?;
        }

        let mut state = self.engine.state.lock();
        if state.fail_attach {
            return Err(HdvolError::Tool {
                tool: "fake".to_string(),
                code: 13,
                message: "attach failed".to_string(),
            });
        }
        let n = self.engine.next_device.fetch_add(1, Ordering::SeqCst);
        let device = format!("/dev/ploop{}", 1000 + n);
        state.attached.insert(self.descriptor.clone(), device.clone());
        Ok(device)
    }

    fn detach(&self) -> HdvolResult<()> {
        self.engine.detaches.fetch_add(1, Ordering::SeqCst);
        let mut state = self.engine.state.lock();
        if state.fail_detach {
            return Err(HdvolError::Tool {
                tool: "fake".to_string(),
                code: 16,
                message: "device busy".to_string(),
            });
        }
        match state.attached.remove(&self.descriptor) {
            Some(_) => Ok(()),
            None => Err(HdvolError::NotAttached {
                image: self.descriptor.display().to_string(),
            }),
        }
    }
}

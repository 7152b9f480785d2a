//! Scripted devices for exercising the registry and poll loop without hardware

use super::*;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type Script = Arc<Mutex<VecDeque<std::result::Result<RawEvent, io::ErrorKind>>>>;

/// Event source that replays a shared script
///
/// Scripted events are what the driver saw. A [`RawEvent::Dropped`] read
/// with [`ReadFlag::Sync`] loses the rest of its block, and the reader gets
/// the state difference instead, as the evdev backend does.
pub struct FakeSource {
    name: String,
    script: Script,
    reads: Arc<AtomicUsize>,
    open_handles: Arc<AtomicUsize>,
    device: DeliveredState,
    delivered: DeliveredState,
    catch_up: VecDeque<RawEvent>,
}

impl FakeSource {
    pub fn with_events(name: &str, events: Vec<RawEvent>) -> Self {
        Self::new(
            name,
            Arc::new(Mutex::new(events.into_iter().map(Ok).collect())),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(1)),
        )
    }

    fn new(name: &str, script: Script, reads: Arc<AtomicUsize>, open_handles: Arc<AtomicUsize>) -> Self {
        Self {
            name: name.to_string(),
            script,
            reads,
            open_handles,
            device: DeliveredState::new(),
            delivered: DeliveredState::new(),
            catch_up: VecDeque::new(),
        }
    }

    fn pop(&mut self) -> io::Result<RawEvent> {
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(event)) => {
                self.device.record(event);
                Ok(event)
            }
            Some(Err(kind)) => Err(io::Error::new(kind, "scripted read error")),
            None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }
}

impl Drop for FakeSource {
    fn drop(&mut self) {
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl EventSource for FakeSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn raw_fd(&self) -> Option<RawFd> {
        None
    }

    fn next_event(&mut self, flag: ReadFlag) -> io::Result<RawEvent> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if flag == ReadFlag::Sync {
            while self.pop()? != RawEvent::Report {}
            let events = self.delivered.catch_up(
                self.device.buttons.iter().map(|(&code, &pressed)| (code, pressed)),
                self.device.axes.iter().map(|(&code, &value)| (code, value)),
            );
            self.catch_up.extend(events);
        }

        let event = match self.catch_up.pop_front() {
            Some(event) => event,
            None => self.pop()?,
        };
        self.delivered.record(event);
        Ok(event)
    }
}

#[derive(Default)]
struct FakeWorld {
    present: HashSet<String>,
    denied: HashMap<String, i32>,
    scripts: HashMap<String, Script>,
    opens: usize,
}

/// Backend whose device nodes appear, disappear and emit events on demand
#[derive(Clone)]
pub struct FakeBackend {
    kind: BackendKind,
    paths: Vec<Option<String>>,
    world: Arc<Mutex<FakeWorld>>,
    reads: Arc<AtomicUsize>,
    open_handles: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub fn new(kind: BackendKind, paths: &[&str]) -> Self {
        Self {
            kind,
            paths: paths.iter().map(|p| Some(p.to_string())).collect(),
            world: Arc::new(Mutex::new(FakeWorld::default())),
            reads: Arc::new(AtomicUsize::new(0)),
            open_handles: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn plug(&self, path: &str) {
        self.world.lock().unwrap().present.insert(path.to_string());
    }

    pub fn unplug(&self, path: &str) {
        self.world.lock().unwrap().present.remove(path);
    }

    /// Makes opening `path` fail with `errno` until [`FakeBackend::allow`] is called
    pub fn deny(&self, path: &str, errno: i32) {
        self.world.lock().unwrap().denied.insert(path.to_string(), errno);
    }

    pub fn allow(&self, path: &str) {
        self.world.lock().unwrap().denied.remove(path);
    }

    pub fn push_event(&self, path: &str, event: RawEvent) {
        self.script(path).lock().unwrap().push_back(Ok(event));
    }

    pub fn push_error(&self, path: &str, kind: io::ErrorKind) {
        self.script(path).lock().unwrap().push_back(Err(kind));
    }

    pub fn pending(&self, path: &str) -> usize {
        self.script(path).lock().unwrap().len()
    }

    pub fn opens(&self) -> usize {
        self.world.lock().unwrap().opens
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    fn script(&self, path: &str) -> Script {
        self.world
            .lock()
            .unwrap()
            .scripts
            .entry(path.to_string())
            .or_default()
            .clone()
    }
}

impl Backend for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn resolve_paths(&self, slots: usize) -> Vec<Option<String>> {
        (0..slots).map(|i| self.paths.get(i).cloned().flatten()).collect()
    }

    fn path_exists(&self, path: &str) -> bool {
        self.world.lock().unwrap().present.contains(path)
    }

    fn open(&self, path: &str) -> std::result::Result<OpenDevice, OpenError> {
        {
            let mut world = self.world.lock().unwrap();
            if !world.present.contains(path) {
                return Err(OpenError::Open {
                    path: path.to_string(),
                    source: io::Error::from_raw_os_error(libc::ENOENT),
                });
            }
            if let Some(&errno) = world.denied.get(path) {
                return Err(OpenError::Open {
                    path: path.to_string(),
                    source: io::Error::from_raw_os_error(errno),
                });
            }
            world.opens += 1;
        }

        self.open_handles.fetch_add(1, Ordering::SeqCst);
        let source = FakeSource::new(
            &format!("Fake Pad {}", path),
            self.script(path),
            Arc::clone(&self.reads),
            Arc::clone(&self.open_handles),
        );
        let mapping = match self.kind {
            // A typical gamepad: BTN_SOUTH..BTN_THUMBR
            BackendKind::Evdev => DeviceMapping::probed(0x130..=0x13e),
            BackendKind::Joystick => DeviceMapping::passthrough(),
        };
        Ok(OpenDevice::new(path, Box::new(source), mapping))
    }
}

use kflash_core::flash::{
    FlashEvent, FlashMonitor, FlashRunner, FlashState, FlashStateMachine, InstallRequest,
};
use kflash_core::KflashConfig;
use kflash_hal::DeviceHal;
use std::io;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

const WORKER_PANICKED: &str = "Flash worker stopped unexpectedly";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("A different flash is already running")]
    Busy,

    #[error("No flash session is attached")]
    NoSession,

    #[error("Failed to start flash worker: {0}")]
    Worker(#[source] io::Error),
}

/// What `detach` did with the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachOutcome {
    /// Session was unstarted or finished and has been dropped.
    Dropped,
    /// The flash is still running; the session stays attached until it finishes.
    StillRunning,
    NoSession,
}

/// One flash attempt: its request, its snapshot cell and (once started) its worker.
pub struct FlashSession {
    request: InstallRequest,
    monitor: FlashMonitor,
    worker: Option<JoinHandle<()>>,
}

impl FlashSession {
    fn new(request: InstallRequest) -> Self {
        Self {
            request,
            monitor: FlashMonitor::new(),
            worker: None,
        }
    }

    pub fn request(&self) -> &InstallRequest {
        &self.request
    }

    pub fn monitor(&self) -> FlashMonitor {
        self.monitor.clone()
    }

    pub fn snapshot(&self) -> Arc<FlashState> {
        self.monitor.snapshot()
    }

    pub fn is_started(&self) -> bool {
        self.worker.is_some()
    }

    /// Started and the worker has not returned yet.
    pub fn is_active(&self) -> bool {
        self.worker
            .as_ref()
            .map(|worker| !worker.is_finished())
            .unwrap_or(false)
    }

    fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("flash worker panicked");
                self.monitor.fail_unfinished(WORKER_PANICKED);
            }
        }
    }
}

/// Caller-owned holder of the current flash session.
pub struct FlashSessionHost<H: DeviceHal + ?Sized + 'static> {
    hal: Arc<H>,
    config: Arc<KflashConfig>,
    session: Option<FlashSession>,
}

impl<H: DeviceHal + ?Sized + 'static> FlashSessionHost<H> {
    pub fn new(hal: Arc<H>, config: Arc<KflashConfig>) -> Self {
        Self {
            hal,
            config,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&FlashSession> {
        self.session.as_ref()
    }

    /// Attach to a session for `request`.
    ///
    /// An identical request re-attaches to the existing session whatever its phase. A different
    /// request replaces an unstarted or finished session and is refused while one is running.
    pub fn attach(&mut self, request: InstallRequest) -> Result<FlashMonitor, SessionError> {
        if let Some(current) = &mut self.session {
            if current.request == request {
                log::debug!("re-attached to existing flash session");
                return Ok(current.monitor());
            }
            if current.is_active() {
                return Err(SessionError::Busy);
            }
            current.join();
        }
        log::info!("new flash session: {}", request.method.label());
        let session = FlashSession::new(request);
        let monitor = session.monitor();
        self.session = Some(session);
        Ok(monitor)
    }

    /// Start the attached session on a worker thread. Starting twice is a no-op.
    pub fn start(
        &mut self,
        events: Option<SyncSender<FlashEvent>>,
    ) -> Result<FlashMonitor, SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NoSession)?;
        if session.is_started() {
            return Ok(session.monitor());
        }

        let hal = Arc::clone(&self.hal);
        let config = Arc::clone(&self.config);
        let request = session.request.clone();
        let monitor = session.monitor();
        let worker = thread::Builder::new()
            .name("kflash-flash".to_string())
            .spawn(move || {
                let mut machine = FlashStateMachine::with_monitor(&config.flash.markers, monitor);
                if let Some(tx) = events {
                    machine = machine.with_events(tx);
                }
                let runner = FlashRunner::new(hal.as_ref(), &config);
                if let Err(err) = runner.run(&request, &mut machine) {
                    log::warn!("flash worker finished with error: {}", err);
                }
            })
            .map_err(SessionError::Worker)?;

        session.worker = Some(worker);
        Ok(session.monitor())
    }

    pub fn snapshot(&self) -> Option<Arc<FlashState>> {
        self.session.as_ref().map(FlashSession::snapshot)
    }

    /// Block until the running flash finishes and return its final state.
    pub fn wait(&mut self) -> Option<Arc<FlashState>> {
        let session = self.session.as_mut()?;
        session.join();
        Some(session.snapshot())
    }

    /// Leave the session. Unstarted and finished sessions are dropped; a running one is kept.
    pub fn detach(&mut self) -> DetachOutcome {
        let Some(session) = self.session.as_mut() else {
            return DetachOutcome::NoSession;
        };
        if session.is_active() {
            return DetachOutcome::StillRunning;
        }
        session.join();
        self.session = None;
        DetachOutcome::Dropped
    }
}

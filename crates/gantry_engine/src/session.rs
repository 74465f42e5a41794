//! Sessions and panels.
//!
//! At most one control session exists at a time; any number of view sessions
//! may coexist with it. A control session owns its panels, a panel mounts at
//! most one test run. Sessions are keyed by their transport handle; children
//! hold parent ids only.

use crate::event::SystemBus;
use crate::run::TestRun;
use gantry_core::{ClientId, CoreError, CoreResult, PanelId, SessionId};
use std::sync::{Arc, Mutex};

/// Logical placeholder for one hardware fixture within a control session
pub struct Panel {
    id: PanelId,
    session_id: SessionId,
    bus: SystemBus,
    test_run: Mutex<Option<Arc<TestRun>>>,
}

impl Panel {
    fn new(id: PanelId, session_id: SessionId, bus: SystemBus) -> Arc<Self> {
        Arc::new(Self {
            id,
            session_id,
            bus,
            test_run: Mutex::new(None),
        })
    }

    /// Panel id
    #[must_use]
    pub const fn id(&self) -> PanelId {
        self.id
    }

    /// Owning control session id
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The mounted test run, if any
    #[must_use]
    pub fn test_run(&self) -> Option<Arc<TestRun>> {
        lock(&self.test_run).clone()
    }

    /// Mount a fresh test run on this panel.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyExists`] if a run is already mounted.
    pub fn add_test_run(&self) -> CoreResult<Arc<TestRun>> {
        let mut slot = lock(&self.test_run);
        if let Some(existing) = slot.as_ref() {
            return Err(CoreError::AlreadyExists {
                kind: "test run".to_string(),
                id: existing.id().to_string(),
            });
        }
        let run = TestRun::new(self.id, self.session_id, &self.bus);
        *slot = Some(Arc::clone(&run));
        tracing::info!(panel = %self.id, run = %run.id(), "test run mounted");
        Ok(run)
    }

    /// Release the mounted run, returning it if one was present
    pub fn remove_test_run(&self) -> Option<Arc<TestRun>> {
        let removed = lock(&self.test_run).take();
        if let Some(run) = &removed {
            tracing::info!(panel = %self.id, run = %run.id(), "test run removed");
        }
        removed
    }
}

impl std::fmt::Debug for Panel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Panel")
            .field("id", &self.id)
            .field("has_run", &self.test_run().is_some())
            .finish()
    }
}

/// The unique session authorized to issue commands
pub struct ControlSession {
    id: SessionId,
    client: ClientId,
    panel_limit: u32,
    panels: Mutex<Vec<Arc<Panel>>>,
    bus: SystemBus,
}

impl ControlSession {
    /// Create a control session with `panel_limit` panels, numbered from one
    #[must_use]
    pub fn new(client: ClientId, panel_limit: u32, bus: &SystemBus) -> Arc<Self> {
        let id = SessionId::new();
        let panels = (1..=panel_limit)
            .map(|position| {
                tracing::info!(session = %id, panel = position, "adding panel");
                Panel::new(PanelId::new(position), id, bus.clone())
            })
            .collect();
        Arc::new(Self {
            id,
            client,
            panel_limit,
            panels: Mutex::new(panels),
            bus: bus.clone(),
        })
    }

    /// Session id
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Transport handle this session is keyed by
    #[must_use]
    pub const fn client(&self) -> ClientId {
        self.client
    }

    /// The session's panels, in position order
    #[must_use]
    pub fn panels(&self) -> Vec<Arc<Panel>> {
        lock(&self.panels).clone()
    }

    /// Add one more panel.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CapacityExceeded`] once the jig's panel limit is
    /// reached.
    pub fn add_panel(&self) -> CoreResult<Arc<Panel>> {
        let mut panels = lock(&self.panels);
        let count = u32::try_from(panels.len()).unwrap_or(u32::MAX);
        if count >= self.panel_limit {
            return Err(CoreError::CapacityExceeded {
                resource: "panels".to_string(),
                limit: u64::from(self.panel_limit),
            });
        }
        let panel = Panel::new(PanelId::new(count + 1), self.id, self.bus.clone());
        panels.push(Arc::clone(&panel));
        tracing::info!(session = %self.id, panel = %panel.id(), "panel added");
        Ok(panel)
    }
}

impl std::fmt::Debug for ControlSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlSession")
            .field("id", &self.id)
            .field("client", &self.client)
            .field("panels", &lock(&self.panels).len())
            .finish()
    }
}

/// A read-only session receiving tc-data events and an initial replay
#[derive(Debug)]
pub struct ViewSession {
    id: SessionId,
    client: ClientId,
}

impl ViewSession {
    /// Create a view session keyed by its transport handle
    #[must_use]
    pub fn new(client: ClientId) -> Arc<Self> {
        Arc::new(Self {
            id: SessionId::new(),
            client,
        })
    }

    /// Session id
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Transport handle this session is keyed by
    #[must_use]
    pub const fn client(&self) -> ClientId {
        self.client
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

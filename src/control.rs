//! External session control surface (spec §6): the exact operation set a
//! UI or CLI calls, independent of [`crate::session::Session`]'s internal
//! wiring. `SessionController` is the single point a binary needs to hold.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{Config, EnvSecrets};
use crate::error::{CoreError, Result};
use crate::model::{ExportBundle, IntervalSummary, SessionState};
use crate::permissions::{self, PermissionStatus};
use crate::persistence::{PersistenceSink, SqliteSink};
use crate::session::{Session, SessionStatus};

#[derive(Debug, Clone, Serialize)]
pub struct StartSessionResult {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopSessionResult {
    pub session_id: Uuid,
    pub ended_at: DateTime<Utc>,
    pub final_summary: Option<IntervalSummary>,
}

/// Owns at most one running [`Session`] and exposes the spec §6 operation
/// names directly, so a CLI or UI layer never has to reach into session
/// internals.
pub struct SessionController {
    config: Config,
    secrets: EnvSecrets,
    persistence: Arc<dyn PersistenceSink>,
    active: Mutex<Option<Session>>,
}

impl SessionController {
    pub fn new(config: Config, secrets: EnvSecrets, persistence: Arc<dyn PersistenceSink>) -> Self {
        Self {
            config,
            secrets,
            persistence,
            active: Mutex::new(None),
        }
    }

    /// Builds a controller with the default local `SqliteSink`, rooted under
    /// the platform per-user data directory (spec §6 persisted state).
    pub fn with_default_persistence(config: Config, secrets: EnvSecrets) -> Result<Self> {
        let db_path = match dirs::data_dir() {
            Some(dir) => dir.join("flowmeter-core").join("flowmeter.sqlite3"),
            None => return Err(CoreError::Fatal("no platform data directory available".into())),
        };
        let sink = SqliteSink::open(&db_path).map_err(|e| CoreError::PersistenceTransient(e.to_string()))?;
        Ok(Self::new(config, secrets, Arc::new(sink)))
    }

    /// `start_session(user_id, daily_goal?, session_id?)` (spec §6).
    pub fn start_session(
        &self,
        user_id: String,
        daily_goal: Option<String>,
        session_id: Option<Uuid>,
    ) -> Result<StartSessionResult> {
        let mut active = self.active.lock().unwrap();
        if active.is_some() {
            return Err(CoreError::Fatal("a session is already running".into()));
        }
        let session = Session::start(
            user_id,
            daily_goal,
            session_id,
            self.config.clone(),
            self.secrets.clone(),
            Arc::clone(&self.persistence),
        )?;
        let result = StartSessionResult {
            session_id: session.session_id,
            started_at: session.started_at,
        };
        *active = Some(session);
        Ok(result)
    }

    /// `pause_session(reason)` (spec §6) — idempotent.
    pub fn pause_session(&self, reason: &str) -> Result<()> {
        let mut active = self.active.lock().unwrap();
        match active.as_mut() {
            Some(session) => session.pause(reason),
            None => Err(CoreError::Fatal("no active session to pause".into())),
        }
    }

    /// `resume_session()` (spec §6).
    pub fn resume_session(&self) -> Result<()> {
        let mut active = self.active.lock().unwrap();
        match active.as_mut() {
            Some(session) => session.resume(),
            None => Err(CoreError::Fatal("no active session to resume".into())),
        }
    }

    /// `stop_session()` (spec §6).
    pub fn stop_session(&self) -> Result<StopSessionResult> {
        let session = self
            .active
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| CoreError::Fatal("no active session to stop".into()))?;
        let (session_id, ended_at, final_summary) = session.stop()?;
        Ok(StopSessionResult { session_id, ended_at, final_summary })
    }

    /// `get_status()` (spec §6).
    pub fn get_status(&self) -> Option<SessionStatus> {
        self.active.lock().unwrap().as_ref().map(|s| s.status())
    }

    /// `check_permissions()` (spec §6).
    pub fn check_permissions(&self) -> PermissionStatus {
        permissions::check_permissions()
    }

    /// Opens the platform permission settings pane for the user.
    pub fn open_permission_settings(&self) -> std::io::Result<()> {
        permissions::open_permission_settings()
    }

    /// `export_session(session_id)` (spec §6). If `session_id` names the
    /// currently active session, folds in its in-memory state too;
    /// otherwise returns whatever persistence can recall for it.
    pub fn export_session(&self, session_id: Uuid) -> Result<ExportBundle> {
        if let Some(session) = self.active.lock().unwrap().as_ref() {
            if session.session_id == session_id {
                return session.export();
            }
        }

        let interval_summaries = self
            .persistence
            .find_by_session(session_id)
            .map_err(|e| CoreError::PersistenceTransient(e.to_string()))?;
        Ok(ExportBundle {
            interval_summaries,
            ..Default::default()
        })
    }

    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.state() == SessionState::Running)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_rejects_stop_without_active_session() {
        let controller = SessionController::new(
            Config::default(),
            EnvSecrets::default(),
            Arc::new(SqliteSink::open_in_memory().unwrap()),
        );
        assert!(controller.stop_session().is_err());
        assert!(controller.get_status().is_none());
    }

    #[test]
    fn controller_reports_not_running_when_idle() {
        let controller = SessionController::new(
            Config::default(),
            EnvSecrets::default(),
            Arc::new(SqliteSink::open_in_memory().unwrap()),
        );
        assert!(!controller.is_running());
    }
}

//! Routing user input to sessions
//!
//! The dispatcher runs each session's steps one at a time and lets restart
//! commands overtake a running step: the restart takes effect immediately
//! and the overtaken step's result is dropped when it finishes.

use std::sync::Arc;
use tracing::{debug, info};

use crate::bundle::DownloadOutcome;
use crate::error::{Result, SessionError};
use crate::reply::Reply;
use crate::session::{Command, SelectionSession};
use crate::state::SelectionState;
use crate::store::{SessionId, SessionStore};

/// Entry point for every message of every session
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<SessionStore>,
    session: SelectionSession,
}

impl Dispatcher {
    pub fn new(store: Arc<SessionStore>, session: SelectionSession) -> Self {
        Self { store, session }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Handle one line of text from session `id`
    ///
    /// Returns nothing when the step was overtaken by a restart.
    pub async fn handle_text(&self, id: &SessionId, text: &str) -> Vec<Reply> {
        let slot = self.store.get_or_create(id);

        if let Some(command) = Command::parse(text) {
            info!("Session {} restarted with {:?}", id, command);
            let transition = SelectionSession::start();
            slot.restart(transition.state);
            return transition.replies;
        }

        let _step = slot.begin_step().await;
        let generation = slot.generation();
        let state = slot.snapshot();
        debug!("Session {} in state {}", id, state.name());

        let transition = self.session.advance(state, text).await;
        let next = transition.state.name();
        if slot.commit(generation, transition.state) {
            debug!("Session {} now {}", id, next);
            transition.replies
        } else {
            debug!("Session {} restarted during step, discarding result", id);
            Vec::new()
        }
    }

    /// Build the bundle for the resolved build of session `id`
    ///
    /// Outside the resolved state the session is reset to idle.
    pub async fn handle_download(&self, id: &SessionId) -> Result<DownloadOutcome> {
        let slot = self.store.get_or_create(id);
        let _step = slot.begin_step().await;
        let generation = slot.generation();
        let state = slot.snapshot();

        match self.session.download(&state).await {
            Ok(outcome) if slot.generation() == generation => Ok(outcome),
            Ok(_) => {
                debug!("Session {} restarted during download, discarding bundle", id);
                Err(SessionError::Cancelled)
            }
            Err(e @ SessionError::State(_)) => {
                slot.commit(generation, SelectionState::Idle);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

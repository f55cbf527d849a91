//! Floor session — the top-level context owning one floor's sync state.
//!
//! DESIGN
//! ======
//! Everything the engine mutates hangs off this struct: the entity store,
//! lock registry, overwrite queue, edit history, presence, and the sync
//! channel handle. There is no module-level connection singleton; the
//! session is created by the embedder and passed by reference to the
//! dispatcher and resolver, which both run on the session's task.
//!
//! Undo/redo live here because they bridge the history stack and the
//! dispatcher: a replayed descriptor must not re-enter history, and the
//! cursor only moves once the replay has been dispatched.

use std::collections::HashMap;

use tracing::debug;

use crate::alert::Alerts;
use crate::config::SyncConfig;
use crate::dispatch::{self, RecordMode};
use crate::edit::Edit;
use crate::history::EditStack;
use crate::lock::{LockRegistry, OverwriteQueue};
use crate::model::FloorCode;
use crate::persist::Persistence;
use crate::resolve;
use crate::store::FloorStore;
use crate::sync::channel::SyncChannel;
use crate::sync::cursor::CursorFeeds;
use crate::sync::message::{ControlAction, ControlMessage, Peer, SyncMessage};

/// Per-floor editing session for one user.
pub struct FloorSession {
    pub floor_code: FloorCode,
    /// This client's user id, stamped on outgoing patches.
    pub user_id: String,
    pub store: FloorStore,
    pub locks: LockRegistry,
    pub overwrites: OverwriteQueue,
    pub history: EditStack,
    pub alerts: Alerts,
    /// Other users active on this floor, keyed by user id.
    pub peers: HashMap<String, Peer>,
    pub cursors: CursorFeeds,
    /// `None` until a channel is attached (or when sync is disabled).
    pub channel: Option<SyncChannel>,
    live_cursors_enabled: bool,
    max_undo: usize,
}

impl FloorSession {
    #[must_use]
    pub fn new(floor_code: impl Into<FloorCode>, user_id: impl Into<String>, config: &SyncConfig, alerts: Alerts) -> Self {
        let floor_code = floor_code.into();
        Self {
            store: FloorStore::new(floor_code.clone()),
            floor_code,
            user_id: user_id.into(),
            locks: LockRegistry::new(),
            overwrites: OverwriteQueue::new(),
            history: EditStack::new(config.max_undo),
            alerts,
            peers: HashMap::new(),
            cursors: CursorFeeds::new(),
            channel: None,
            live_cursors_enabled: config.live_cursors_enabled,
            max_undo: config.max_undo,
        }
    }

    /// Attach the session's sync channel once connected.
    pub fn attach_channel(&mut self, channel: SyncChannel) {
        self.channel = Some(channel);
    }

    /// Visible user count: peers plus this user.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.peers.len() + 1
    }

    /// Display name for a peer, falling back to a generic label for users
    /// whose presence snapshot has not arrived yet.
    #[must_use]
    pub fn peer_name(&self, user_id: &str) -> String {
        self.peers
            .get(user_id)
            .map_or_else(|| "another user".to_owned(), |p| p.user_name.clone())
    }

    // =========================================================================
    // LOCAL EDITS
    // =========================================================================

    /// Dispatch a user-initiated edit.
    ///
    /// # Errors
    ///
    /// Propagates dispatch failures after they have been surfaced as
    /// alerts; callers usually ignore the result.
    pub async fn apply(&mut self, persist: &dyn Persistence, edit: Edit) -> Result<(), dispatch::DispatchError> {
        dispatch::dispatch(self, persist, edit, RecordMode::Record).await
    }

    /// Undo the most recent local edit by replaying its reverse.
    pub async fn undo(&mut self, persist: &dyn Persistence) {
        let Some(pair) = self.history.undo_entry() else {
            self.alerts.warn("Can't undo anymore!");
            return;
        };
        let reverse = pair.reverse.clone();

        if !reverse.is_replayable() {
            // The cursor still moves: the warning replaces the replay, it
            // does not strand the history walk on this entry.
            self.alerts.warn("Can't undo create room!");
            self.history.retreat();
            return;
        }

        match dispatch::dispatch(self, persist, reverse, RecordMode::Replay).await {
            Ok(()) => self.history.retreat(),
            Err(e) => {
                debug!(error = %e, "undo replay failed");
                self.alerts.error("Failed to undo change!");
            }
        }
    }

    /// Redo the most recently undone edit by replaying its forward half.
    pub async fn redo(&mut self, persist: &dyn Persistence) {
        let Some(pair) = self.history.redo_entry() else {
            self.alerts.warn("Can't redo anymore!");
            return;
        };
        let forward = pair.edit.clone();

        if !forward.is_replayable() {
            self.alerts.warn("Can't redo create room!");
            self.history.advance();
            return;
        }

        match dispatch::dispatch(self, persist, forward, RecordMode::Replay).await {
            Ok(()) => self.history.advance(),
            Err(e) => {
                debug!(error = %e, "redo replay failed");
                self.alerts.error("Failed to redo change!");
            }
        }
    }

    // =========================================================================
    // INBOUND MESSAGES
    // =========================================================================

    /// Handle one message delivered by the sync channel.
    pub fn handle_message(&mut self, message: SyncMessage) {
        match message {
            SyncMessage::GraphPatch(patch) => resolve::handle_remote_patch(self, patch),
            SyncMessage::Cursor(update) => {
                if self.live_cursors_enabled {
                    self.cursors.push(&update.sender_id, update.cursor_info_list);
                }
            }
            SyncMessage::Users(snapshot) => {
                // Snapshot replaces the tracked list; drop cursors of users
                // no longer present.
                let departed: Vec<String> = self
                    .peers
                    .keys()
                    .filter(|id| !snapshot.users.contains_key(*id))
                    .cloned()
                    .collect();
                for id in departed {
                    self.cursors.remove(&id);
                }
                self.peers = snapshot.users;
            }
            SyncMessage::LeaveFloor(notice) => {
                self.cursors.remove(&notice.user_id);
                self.refresh_user_count(&notice.floor_code);
                if notice.floor_code != self.floor_code {
                    let own = self.floor_code.clone();
                    self.refresh_user_count(&own);
                }
            }
        }
    }

    fn refresh_user_count(&self, floor_code: &str) {
        if let Some(channel) = &self.channel {
            channel.send_control(ControlMessage {
                action: ControlAction::RefreshUserCount,
                floor_code: floor_code.to_owned(),
            });
        }
    }

    // =========================================================================
    // FLOOR SWITCHING
    // =========================================================================

    /// Re-associate this session with another floor. The connection stays
    /// up; floor-scoped state (store, history, presence, cursors) resets
    /// and the embedder fetches the new floor's data into the store.
    pub fn switch_floor(&mut self, floor_code: impl Into<FloorCode>) {
        let floor_code = floor_code.into();
        if let Some(channel) = &self.channel {
            channel.switch_floor(&floor_code);
        }
        self.store = FloorStore::new(floor_code.clone());
        self.history = EditStack::new(self.max_undo);
        self.locks = LockRegistry::new();
        self.overwrites = OverwriteQueue::new();
        self.peers.clear();
        self.cursors = CursorFeeds::new();
        self.floor_code = floor_code;
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

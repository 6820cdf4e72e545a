//! Sans-io synchronization state machine.
//!
//! [`SyncEngine`] never touches the network or a clock. Callers feed it
//! events stamped with an [`Instant`] and execute the [`SyncEffect`]s it
//! returns. Two independent machines live here:
//!
//! ```text
//! save:    Idle ──edit──▶ PendingSave ──debounce──▶ Saving ──ack──▶ Idle
//!            └──────────structural edit─────────────▲
//! remote:  Idle ──push differs / reset / import──▶ ApplyingRemote ──▶ Idle
//! ```
//!
//! Every persist carries a [`PersistToken`]; an acknowledgement older than
//! the newest one already applied is dropped.

use std::collections::BTreeMap;
use std::time::Duration;

use comic_core::{signature_of, Mutation, PageRecord};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;

/// Monotonic persist identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PersistToken(u64);

impl PersistToken {
    /// Raw value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Save status shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SaveStatus {
    /// Nothing saved yet this session.
    #[default]
    Idle,
    /// A save is in flight.
    Saving,
    /// The latest save was acknowledged.
    Saved,
    /// The latest save failed; local state is kept.
    Failed(String),
}

/// Local persist pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveState {
    /// Nothing waiting.
    Idle,
    /// A debounced save is armed.
    PendingSave {
        /// When the save fires.
        deadline: Instant,
        /// Rebuild after the acknowledgement.
        rebuild: bool,
    },
    /// A persist is in flight.
    Saving {
        /// Newest persist sent.
        token: PersistToken,
    },
}

/// Remote application state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    /// Local edits are accepted.
    Idle,
    /// Remote pages are being applied; local edits and persists wait.
    ApplyingRemote,
}

/// Work the caller must perform.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEffect {
    /// Arm (or re-arm) the save timer.
    ScheduleSave {
        /// When to call [`SyncEngine::debounce_elapsed`].
        at: Instant,
    },
    /// Disarm the save timer.
    CancelSave,
    /// Snapshot the collection and send it, then report through
    /// [`SyncEngine::persist_finished`].
    Persist {
        /// Token to report back.
        token: PersistToken,
    },
    /// Re-run the collection through its rebuild funnel, then call
    /// [`SyncEngine::rebuild_finished`] with `signature`.
    RebuildLocal {
        /// Signature of the acknowledged state.
        signature: String,
    },
    /// Replace the collection with remote pages, then call
    /// [`SyncEngine::rebuild_finished`] with `signature`.
    ApplyRemote {
        /// Incoming pages.
        pages: Vec<PageRecord>,
        /// Their signature.
        signature: String,
    },
    /// Hand these pages to [`SyncEngine::push_received`] again at `at`.
    DeferPush {
        /// Deferred pages.
        pages: Vec<PageRecord>,
        /// Redelivery time.
        at: Instant,
    },
    /// Publish a new status.
    Status(SaveStatus),
}

/// Save/push coordinator for one session.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    save_debounce: Duration,
    push_defer: Duration,
    save: SaveState,
    remote: RemoteState,
    last_acknowledged: Option<String>,
    next_token: u64,
    last_applied: Option<PersistToken>,
    in_flight: BTreeMap<PersistToken, bool>,
    last_persist_failed: Option<String>,
}

impl SyncEngine {
    /// Create an engine with explicit delays.
    #[must_use]
    pub fn new(save_debounce: Duration, push_defer: Duration) -> Self {
        Self {
            save_debounce,
            push_defer,
            save: SaveState::Idle,
            remote: RemoteState::Idle,
            last_acknowledged: None,
            next_token: 1,
            last_applied: None,
            in_flight: BTreeMap::new(),
            last_persist_failed: None,
        }
    }

    /// Create an engine with the delays from `config`.
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.save_debounce, config.push_defer)
    }

    /// Current save pipeline state.
    #[must_use]
    pub fn save_state(&self) -> SaveState {
        self.save
    }

    /// Current remote state.
    #[must_use]
    pub fn remote_state(&self) -> RemoteState {
        self.remote
    }

    /// True while remote pages are being applied.
    #[must_use]
    pub fn is_applying_remote(&self) -> bool {
        self.remote == RemoteState::ApplyingRemote
    }

    /// Signature of the last state both sides agree on.
    #[must_use]
    pub fn last_acknowledged(&self) -> Option<&str> {
        self.last_acknowledged.as_deref()
    }

    /// No save armed and nothing in flight.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.save == SaveState::Idle && self.in_flight.is_empty()
    }

    /// Failure reason of the newest applied persist, if it failed.
    #[must_use]
    pub fn last_failure(&self) -> Option<&str> {
        self.last_persist_failed.as_deref()
    }

    /// A local operation reported `mutation`.
    ///
    /// Cosmetic edits (re)arm the debounce; structural edits persist at once
    /// and ask for a rebuild on acknowledgement.
    pub fn local_change(&mut self, mutation: Mutation, now: Instant) -> Vec<SyncEffect> {
        if self.is_applying_remote() {
            warn!(?mutation, "Local change while applying remote state, not persisting");
            return Vec::new();
        }
        match mutation {
            Mutation::Unchanged => Vec::new(),
            Mutation::Cosmetic => {
                let rebuild = matches!(self.save, SaveState::PendingSave { rebuild: true, .. });
                let deadline = now + self.save_debounce;
                self.save = SaveState::PendingSave { deadline, rebuild };
                vec![SyncEffect::ScheduleSave { at: deadline }]
            }
            Mutation::Structural => {
                let mut effects = Vec::new();
                if matches!(self.save, SaveState::PendingSave { .. }) {
                    effects.push(SyncEffect::CancelSave);
                }
                effects.extend(self.persist_now(true));
                effects
            }
        }
    }

    /// The save timer fired.
    pub fn debounce_elapsed(&mut self, now: Instant) -> Vec<SyncEffect> {
        match self.save {
            SaveState::PendingSave { deadline, rebuild } if self.is_applying_remote() => {
                // Retry once the rebuild is done.
                let at = deadline.max(now + self.push_defer);
                self.save = SaveState::PendingSave {
                    deadline: at,
                    rebuild,
                };
                vec![SyncEffect::ScheduleSave { at }]
            }
            SaveState::PendingSave { deadline, rebuild } if now >= deadline => {
                self.persist_now(rebuild)
            }
            SaveState::PendingSave { deadline, .. } => {
                vec![SyncEffect::ScheduleSave { at: deadline }]
            }
            SaveState::Idle | SaveState::Saving { .. } => Vec::new(),
        }
    }

    /// Fire an armed save immediately.
    pub fn flush(&mut self) -> Vec<SyncEffect> {
        match self.save {
            SaveState::PendingSave { rebuild, .. } if !self.is_applying_remote() => {
                let mut effects = vec![SyncEffect::CancelSave];
                effects.extend(self.persist_now(rebuild));
                effects
            }
            _ => Vec::new(),
        }
    }

    /// A persist completed. `signature` is the signature of the snapshot
    /// that was sent.
    pub fn persist_finished(
        &mut self,
        token: PersistToken,
        signature: String,
        result: Result<(), String>,
    ) -> Vec<SyncEffect> {
        let rebuild = self.in_flight.remove(&token).unwrap_or(false);
        if self.save == (SaveState::Saving { token }) {
            self.save = SaveState::Idle;
        }

        if self.last_applied.is_some_and(|last| token < last) {
            debug!(token = token.0, "Discarding stale save acknowledgement");
            return Vec::new();
        }
        self.last_applied = Some(token);

        match result {
            Ok(()) => {
                info!(token = token.0, "Pages saved");
                self.last_persist_failed = None;
                let mut effects = Vec::new();
                if self.is_settled() {
                    effects.push(SyncEffect::Status(SaveStatus::Saved));
                }
                if rebuild && !self.is_applying_remote() {
                    self.remote = RemoteState::ApplyingRemote;
                    effects.push(SyncEffect::RebuildLocal {
                        signature: signature.clone(),
                    });
                }
                self.last_acknowledged = Some(signature);
                effects
            }
            Err(reason) => {
                warn!(token = token.0, reason = %reason, "Failed to save pages");
                self.last_persist_failed = Some(reason.clone());
                vec![SyncEffect::Status(SaveStatus::Failed(reason))]
            }
        }
    }

    /// The push channel delivered `pages`. `local_signature` is the live
    /// collection's signature.
    ///
    /// Equal to the last acknowledged state: an echo, ignored. Equal to the
    /// local state: adopted without rebuilding. Otherwise the remote wins.
    pub fn push_received(
        &mut self,
        pages: Vec<PageRecord>,
        local_signature: &str,
        now: Instant,
    ) -> Vec<SyncEffect> {
        if self.is_applying_remote() {
            debug!("Push arrived during rebuild, deferring");
            return vec![SyncEffect::DeferPush {
                pages,
                at: now + self.push_defer,
            }];
        }

        let incoming = match signature_of(&pages) {
            Ok(signature) => signature,
            Err(err) => {
                warn!(error = %err, "Cannot sign incoming pages, ignoring push");
                return Vec::new();
            }
        };

        if self.last_acknowledged.as_deref() == Some(incoming.as_str()) {
            debug!("Push matches acknowledged state, ignoring");
            return Vec::new();
        }
        if incoming == local_signature {
            debug!("Push matches local state, adopting signature");
            self.last_acknowledged = Some(incoming);
            return Vec::new();
        }

        info!(pages = pages.len(), "Applying remote pages");
        let mut effects = Vec::new();
        if matches!(self.save, SaveState::PendingSave { .. }) {
            self.save = SaveState::Idle;
            effects.push(SyncEffect::CancelSave);
        }
        self.remote = RemoteState::ApplyingRemote;
        effects.push(SyncEffect::ApplyRemote {
            pages,
            signature: incoming,
        });
        effects
    }

    /// Enter [`RemoteState::ApplyingRemote`] for a caller-driven load
    /// (initial fetch, reset, import). Returns `None` if a rebuild is
    /// already running.
    pub fn begin_remote_apply(&mut self) -> Option<Vec<SyncEffect>> {
        if self.is_applying_remote() {
            return None;
        }
        self.remote = RemoteState::ApplyingRemote;
        let mut effects = Vec::new();
        if matches!(self.save, SaveState::PendingSave { .. }) {
            self.save = SaveState::Idle;
            effects.push(SyncEffect::CancelSave);
        }
        Some(effects)
    }

    /// The rebuild finished. `signature` becomes the acknowledged state;
    /// `None` (a failed load) keeps the previous one.
    pub fn rebuild_finished(&mut self, signature: Option<String>) {
        if let Some(signature) = signature {
            self.last_acknowledged = Some(signature);
        }
        self.remote = RemoteState::Idle;
        debug!("Rebuild finished");
    }

    fn persist_now(&mut self, rebuild: bool) -> Vec<SyncEffect> {
        let token = PersistToken(self.next_token);
        self.next_token += 1;
        self.in_flight.insert(token, rebuild);
        self.save = SaveState::Saving { token };
        debug!(token = token.0, rebuild, "Persisting pages");
        vec![
            SyncEffect::Persist { token },
            SyncEffect::Status(SaveStatus::Saving),
        ]
    }
}

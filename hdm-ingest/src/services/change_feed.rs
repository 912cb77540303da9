//! Change-feed watch and resume-token tracking
//!
//! **State machine:**
//! - Inactive → Active: `start_watch`
//! - Active → Active: `renew_watch` (old channel stopped, new one registered)
//! - Active → Inactive: `stop_watch`, or a failed renewal
//!
//! Watch lifecycle calls and polls are serialized by one mutex so the
//! resume token only ever moves forward; status reads take the state's
//! read lock and never wait on the provider.

use crate::config::WatchSettings;
use crate::db::watch_state;
use crate::models::{FileChange, WatchRegistration, WatchState, WatchStatus};
use crate::providers::{ChangeFeedProvider, ProviderError, ProviderResult};
use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Upper bound on pages fetched by one poll; the rest waits for the next one
const MAX_CHANGE_PAGES: usize = 100;

const CHANNEL_ID_PREFIX: &str = "homedocmanager";

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Webhook URL not configured")]
    NotConfigured,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Default)]
struct TrackerState {
    watch: Option<WatchRegistration>,
    resume_token: Option<String>,
}

/// The feed no longer recognises this resume token
fn is_invalid_token(err: &ProviderError) -> bool {
    matches!(
        err,
        ProviderError::NotFound(_) | ProviderError::Api { status: 400, .. }
    )
}

pub struct ChangeFeedTracker {
    feed: Arc<dyn ChangeFeedProvider>,
    settings: WatchSettings,
    supported_mime_types: Vec<String>,
    store: Option<SqlitePool>,
    state: RwLock<TrackerState>,
    ops: Mutex<()>,
}

impl ChangeFeedTracker {
    pub fn new(
        feed: Arc<dyn ChangeFeedProvider>,
        settings: WatchSettings,
        supported_mime_types: Vec<String>,
    ) -> Self {
        Self {
            feed,
            settings,
            supported_mime_types,
            store: None,
            state: RwLock::new(TrackerState::default()),
            ops: Mutex::new(()),
        }
    }

    /// Persist watch state to SQLite so it survives restarts
    pub fn with_store(mut self, pool: SqlitePool) -> Self {
        self.store = Some(pool);
        self
    }

    /// Register a new watch, stopping the current one first (best effort)
    pub async fn start_watch(&self) -> Result<WatchStatus, TrackerError> {
        let address = self
            .settings
            .webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(TrackerError::NotConfigured)?;

        let _ops = self.ops.lock().await;

        let previous = self.state.read().await.watch.clone();
        if let Some(old) = &previous {
            if let Err(e) = self
                .feed
                .stop_channel(&old.channel_id, &old.resource_id)
                .await
            {
                warn!(channel_id = %old.channel_id, error = %e, "Failed to stop previous watch");
            }
        }

        let registered = self.register(address).await;
        let (registration, token) = match registered {
            Ok(ok) => ok,
            Err(e) => {
                if previous.is_some() {
                    // The old channel is stopped (or abandoned); nothing is active now
                    self.state.write().await.watch = None;
                    self.persist().await;
                }
                return Err(e.into());
            }
        };

        {
            let mut state = self.state.write().await;
            state.watch = Some(registration.clone());
            state.resume_token = Some(token);
        }
        self.persist().await;

        info!(
            channel_id = %registration.channel_id,
            resource_id = %registration.resource_id,
            expiration = %registration.expiration,
            replaced = previous.is_some(),
            "Watch started"
        );
        Ok(WatchStatus::from_registration(&registration, Utc::now()))
    }

    async fn register(&self, address: &str) -> ProviderResult<(WatchRegistration, String)> {
        let token = self.feed.start_page_token().await?;
        let channel_id = format!("{}-{}", CHANNEL_ID_PREFIX, uuid::Uuid::new_v4());
        let expiration = Utc::now() + Duration::hours(i64::from(self.settings.ttl_hours));
        let registration = self
            .feed
            .watch_changes(
                &token,
                &channel_id,
                address,
                expiration,
                self.settings.channel_token.as_deref(),
            )
            .await?;
        Ok((registration, token))
    }

    /// Renewal replaces the channel
    pub async fn renew_watch(&self) -> Result<WatchStatus, TrackerError> {
        self.start_watch().await
    }

    /// Deregister and clear state; no-op when inactive
    ///
    /// A provider failure leaves the watch recorded so the stop can be retried.
    pub async fn stop_watch(&self) -> Result<WatchStatus, TrackerError> {
        let _ops = self.ops.lock().await;

        let Some(current) = self.state.read().await.watch.clone() else {
            debug!("Stop requested with no active watch");
            return Ok(WatchStatus::inactive());
        };

        self.feed
            .stop_channel(&current.channel_id, &current.resource_id)
            .await?;

        {
            let mut state = self.state.write().await;
            state.watch = None;
            state.resume_token = None;
        }
        self.persist().await;

        info!(channel_id = %current.channel_id, "Watch stopped");
        Ok(WatchStatus::inactive())
    }

    pub async fn status(&self) -> WatchStatus {
        match &self.state.read().await.watch {
            Some(registration) => WatchStatus::from_registration(registration, Utc::now()),
            None => WatchStatus::inactive(),
        }
    }

    pub async fn is_active(&self) -> bool {
        self.state.read().await.watch.is_some()
    }

    pub async fn resume_token(&self) -> Option<String> {
        self.state.read().await.resume_token.clone()
    }

    /// Candidate file ids changed since the stored resume token
    ///
    /// A missing token is re-fetched fresh before polling; a token the
    /// feed rejects is replaced by a fresh baseline and yields no ids.
    pub async fn collect_changes(&self) -> Result<Vec<String>, TrackerError> {
        let _ops = self.ops.lock().await;

        let stored = self
            .state
            .read()
            .await
            .resume_token
            .clone()
            .filter(|t| !t.trim().is_empty());
        let token = match stored {
            Some(token) => token,
            None => {
                warn!("Resume token missing; fetching a fresh start token");
                let fresh = self.feed.start_page_token().await?;
                self.set_resume_token(fresh.clone()).await;
                fresh
            }
        };

        match self.poll_changes(&token).await {
            Ok((file_ids, next_token)) => {
                self.set_resume_token(next_token).await;
                Ok(file_ids)
            }
            Err(e) if is_invalid_token(&e) => {
                warn!(error = %e, "Resume token rejected; re-baselining");
                let fresh = self.feed.start_page_token().await?;
                self.set_resume_token(fresh).await;
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch change pages from `token` until the feed issues a new start token
    ///
    /// Returns matching file ids (deduplicated, in feed order) and the
    /// token the next poll should continue from.
    pub async fn poll_changes(&self, token: &str) -> ProviderResult<(Vec<String>, String)> {
        let mut page_token = token.to_string();
        let mut file_ids = Vec::new();
        let mut seen = HashSet::new();

        for _ in 0..MAX_CHANGE_PAGES {
            let page = self.feed.list_changes(&page_token).await?;
            for change in &page.changes {
                if let Some(id) = self.candidate(change) {
                    if seen.insert(id.to_string()) {
                        file_ids.push(id.to_string());
                    }
                }
            }

            if let Some(new_start) = page.new_start_page_token {
                debug!(candidates = file_ids.len(), "Change feed caught up");
                return Ok((file_ids, new_start));
            }
            match page.next_page_token {
                Some(next) => page_token = next,
                None => break,
            }
        }

        warn!(
            candidates = file_ids.len(),
            "Change poll stopped before the feed caught up; continuing next poll"
        );
        Ok((file_ids, page_token))
    }

    fn candidate<'a>(&self, change: &'a FileChange) -> Option<&'a str> {
        if change.removed {
            return None;
        }
        let file = change.file.as_ref()?;
        if file.trashed || file.parents.is_empty() {
            return None;
        }
        if !self.supported_mime_types.iter().any(|m| *m == file.mime_type) {
            return None;
        }
        if file.id.is_empty() {
            change.file_id.as_deref()
        } else {
            Some(file.id.as_str())
        }
    }

    async fn set_resume_token(&self, token: String) {
        self.state.write().await.resume_token = Some(token);
        self.persist().await;
    }

    /// Restore a non-expired watch from the store; returns whether one was restored
    pub async fn restore(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let saved = match watch_state::load(store).await {
            Ok(saved) => saved,
            Err(e) => {
                warn!(error = %e, "Failed to load saved watch state");
                return false;
            }
        };
        let Some(saved) = saved else {
            return false;
        };

        if saved.is_expired(Utc::now()) {
            info!(channel_id = %saved.channel_id, "Saved watch expired; starting inactive");
            if let Err(e) = watch_state::clear(store).await {
                warn!(error = %e, "Failed to clear expired watch state");
            }
            return false;
        }

        let mut state = self.state.write().await;
        state.watch = Some(saved.registration());
        state.resume_token = saved.resume_token.clone();
        info!(channel_id = %saved.channel_id, "Watch state restored");
        true
    }

    /// Best effort; the in-memory state stays authoritative for this process
    async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let snapshot = {
            let state = self.state.read().await;
            state.watch.as_ref().map(|w| WatchState {
                channel_id: w.channel_id.clone(),
                resource_id: w.resource_id.clone(),
                expiration: w.expiration,
                resume_token: state.resume_token.clone(),
            })
        };
        let result = match snapshot {
            Some(state) => watch_state::save(store, &state).await,
            None => watch_state::clear(store).await,
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist watch state");
        }
    }
}

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::templates;
use super::toast::{ToastId, Toaster};
use crate::backend::{ChangeFeed, Filter, IdentityProvider, RowStore, Select};
use crate::config::{Config, WelcomePolicy};
use crate::errors::AppError;
use crate::models::notification::{self, NewNotification, Notification, NotificationType};
use crate::models::session::User;

/// Result of writing a notification.
#[derive(Debug)]
pub enum Dispatch {
    /// Stored, and the owner is the account this channel is live for.
    Delivered(Notification),
    /// Stored; the owner will see it on their own feed or backlog.
    Stored(Notification),
    Failed(AppError),
    /// Nothing to send for this event.
    Skipped,
}

impl Dispatch {
    pub fn notification(&self) -> Option<&Notification> {
        match self {
            Dispatch::Delivered(n) | Dispatch::Stored(n) => Some(n),
            _ => None,
        }
    }

    pub fn into_notification(self) -> Option<Notification> {
        match self {
            Dispatch::Delivered(n) | Dispatch::Stored(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Dispatch::Failed(_))
    }
}

#[derive(Debug)]
pub enum InitOutcome {
    NoSession,
    AlreadyInitialized,
    Ready {
        user_id: Uuid,
        backlog: Vec<Notification>,
        welcome: Dispatch,
    },
}

/// Fields the feed listener needs to render a toast.
#[derive(Deserialize)]
struct FeedRecord {
    title: String,
    message: String,
    #[serde(rename = "type", default)]
    kind: NotificationType,
}

/// Realtime listener task; aborting it drops the subscription it owns.
struct Listener {
    task: JoinHandle<()>,
}

impl Listener {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Default)]
struct ChannelState {
    user: Option<User>,
    listener: Option<Listener>,
}

/// Per-session notification service.
pub struct NotificationChannel {
    identity: Arc<dyn IdentityProvider>,
    pub(super) store: Arc<dyn RowStore>,
    feed: Arc<dyn ChangeFeed>,
    toaster: Arc<dyn Toaster>,
    backlog_limit: usize,
    welcome: WelcomePolicy,
    state: Mutex<ChannelState>,
}

impl NotificationChannel {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn RowStore>,
        feed: Arc<dyn ChangeFeed>,
        toaster: Arc<dyn Toaster>,
        config: &Config,
    ) -> Self {
        Self {
            identity,
            store,
            feed,
            toaster,
            backlog_limit: config.backlog_limit,
            welcome: config.welcome,
            state: Mutex::new(ChannelState::default()),
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.user.is_some()
    }

    pub async fn current_user(&self) -> Option<User> {
        self.state.lock().await.user.clone()
    }

    /// Bind the feed, render the backlog and greet the account.
    ///
    /// Runs once per channel; later calls return `AlreadyInitialized`.
    /// Without a session nothing happens and a later call may retry.
    pub async fn initialize(&self) -> Result<InitOutcome, AppError> {
        let mut state = self.state.lock().await;
        if state.user.is_some() {
            return Ok(InitOutcome::AlreadyInitialized);
        }

        let Some(session) = self.identity.session().await? else {
            info!("no user session found, notifications stay idle");
            return Ok(InitOutcome::NoSession);
        };
        let user = session.user;

        state.listener = match self.listen(user.id).await {
            Ok(listener) => Some(listener),
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "realtime subscription failed, continuing without live updates");
                None
            }
        };

        let backlog = self.fetch_unread(user.id).await;
        self.render(&backlog);

        let live = state.listener.as_ref().is_some_and(Listener::is_running);
        state.user = Some(user.clone());
        info!(user_id = %user.id, backlog = backlog.len(), "notification system initialized");

        let welcome = self.greet(user.id, live).await;
        Ok(InitOutcome::Ready {
            user_id: user.id,
            backlog,
            welcome,
        })
    }

    /// Re-bind the realtime listener for the current account.
    pub async fn setup_realtime_listeners(&self) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let user_id = state.user.as_ref().map(|u| u.id).ok_or(AppError::NotAuthenticated)?;
        // Release the old subscription before opening a new one.
        state.listener = None;
        state.listener = Some(self.listen(user_id).await?);
        Ok(())
    }

    async fn listen(&self, user_id: Uuid) -> Result<Listener, AppError> {
        let mut subscription = self
            .feed
            .subscribe_inserts(notification::TABLE, Filter::eq("user_id", user_id.to_string()))
            .await?;
        let toaster = self.toaster.clone();

        let task = tokio::spawn(async move {
            while let Some(row) = subscription.next().await {
                match serde_json::from_value::<FeedRecord>(row) {
                    Ok(record) => {
                        debug!(user_id = %user_id, title = %record.title, "new notification from feed");
                        toaster.show(&record.title, &record.message, record.kind);
                    }
                    Err(e) => warn!(user_id = %user_id, error = %e, "dropping malformed feed record"),
                }
            }
            debug!(user_id = %user_id, "notification feed closed");
        });

        info!(user_id = %user_id, "listening for new notifications");
        Ok(Listener { task })
    }

    /// Release the realtime subscription and forget the account.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let Some(user) = state.user.take() {
            info!(user_id = %user.id, "notification system shut down");
        }
        state.listener = None;
    }

    async fn live_owner(&self) -> Option<Uuid> {
        let state = self.state.lock().await;
        match (&state.user, &state.listener) {
            (Some(user), Some(listener)) if listener.is_running() => Some(user.id),
            _ => None,
        }
    }

    // -- Writes --

    /// Store a notification for any owner.
    pub async fn create_notification(&self, new: NewNotification) -> Dispatch {
        let live = self.live_owner().await;
        self.dispatch(new, live).await
    }

    pub(super) async fn dispatch(&self, new: NewNotification, live_owner: Option<Uuid>) -> Dispatch {
        debug!(user_id = %new.user_id, title = %new.title, "creating notification");

        let stored = async {
            let row = self.store.insert(notification::TABLE, serde_json::to_value(&new)?).await?;
            Ok::<Notification, AppError>(serde_json::from_value(row)?)
        }
        .await;

        match stored {
            Ok(n) => {
                info!(notification_id = %n.id, user_id = %n.user_id, "notification created");
                if live_owner == Some(n.user_id) {
                    Dispatch::Delivered(n)
                } else {
                    Dispatch::Stored(n)
                }
            }
            Err(e) => {
                error!(user_id = %new.user_id, error = %e, "failed to create notification");
                Dispatch::Failed(e)
            }
        }
    }

    async fn greet(&self, user_id: Uuid, live: bool) -> Dispatch {
        let live_owner = live.then_some(user_id);
        match self.welcome {
            WelcomePolicy::Off => Dispatch::Skipped,
            WelcomePolicy::Every => self.dispatch(templates::welcome(user_id), live_owner).await,
            WelcomePolicy::Once => {
                let query = Select::from(notification::TABLE)
                    .columns("id")
                    .eq("user_id", user_id.to_string())
                    .eq("title", templates::WELCOME_TITLE)
                    .limit(1);
                match self.store.select(&query).await {
                    Ok(rows) if rows.is_empty() => {
                        self.dispatch(templates::welcome(user_id), live_owner).await
                    }
                    Ok(_) => Dispatch::Skipped,
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "could not check for earlier welcome, skipping");
                        Dispatch::Skipped
                    }
                }
            }
        }
    }

    /// Create the test notification for the current account.
    pub async fn send_test_notification(&self) -> Dispatch {
        match self.live_owner().await {
            Some(user_id) => self.dispatch(templates::test_notification(user_id), Some(user_id)).await,
            None => match self.current_user().await {
                Some(user) => self.dispatch(templates::test_notification(user.id), None).await,
                None => Dispatch::Failed(AppError::NotAuthenticated),
            },
        }
    }

    pub async fn mark_as_read(&self, notification_id: Uuid) -> Result<(), AppError> {
        let patch = serde_json::json!({
            "is_read": true,
            "read_at": Utc::now().to_rfc3339(),
        });
        match self
            .store
            .update(
                notification::TABLE,
                &[Filter::eq("id", notification_id.to_string())],
                patch,
            )
            .await
        {
            Ok(()) => {
                info!(notification_id = %notification_id, "notification marked as read");
                Ok(())
            }
            Err(e) => {
                error!(notification_id = %notification_id, error = %e, "failed to mark notification as read");
                Err(e)
            }
        }
    }

    // -- Reads --

    /// Render and return the newest unread notifications of the current account.
    pub async fn load_unread_notifications(&self) -> Vec<Notification> {
        let Some(user) = self.current_user().await else {
            debug!("no current account, no backlog to load");
            return Vec::new();
        };
        let backlog = self.fetch_unread(user.id).await;
        self.render(&backlog);
        backlog
    }

    async fn fetch_unread(&self, user_id: Uuid) -> Vec<Notification> {
        let query = Select::from(notification::TABLE)
            .eq("user_id", user_id.to_string())
            .eq("is_read", false)
            .order("created_at", false)
            .limit(self.backlog_limit);

        let rows = match self.store.select(&query).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "failed to load notifications");
                return Vec::new();
            }
        };

        let backlog: Vec<Notification> = rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value(row) {
                Ok(n) => Some(n),
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "skipping malformed notification row");
                    None
                }
            })
            .collect();
        debug!(user_id = %user_id, count = backlog.len(), "loaded unread notifications");
        backlog
    }

    fn render(&self, backlog: &[Notification]) {
        for n in backlog {
            self.toaster.show(&n.title, &n.message, n.kind);
        }
    }

    // -- UI --

    pub fn show_ui_notification(&self, title: &str, message: &str, kind: NotificationType) -> ToastId {
        self.toaster.show(title, message, kind)
    }

    pub fn remove_ui_notification(&self, id: ToastId) -> bool {
        self.toaster.dismiss(id)
    }
}

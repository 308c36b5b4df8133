//! Transient on-screen notifications.
//!
//! A toast stays up for `ttl`, can be closed early, and lingers in a
//! `Leaving` phase for `exit` before it is removed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::Config;
use crate::models::notification::NotificationType;

pub type ToastId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastPhase {
    Visible,
    Leaving,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub id: ToastId,
    pub title: String,
    pub message: String,
    pub kind: NotificationType,
    pub phase: ToastPhase,
}

impl Toast {
    pub fn icon(&self) -> &'static str {
        self.kind.icon()
    }

    pub fn accent(&self) -> &'static str {
        self.kind.accent()
    }
}

/// Surface that renders toasts.
pub trait Toaster: Send + Sync {
    fn show(&self, title: &str, message: &str, kind: NotificationType) -> ToastId;

    /// Start dismissing a toast. False if it is not currently visible.
    fn dismiss(&self, id: ToastId) -> bool;
}

#[derive(Default)]
struct BoardState {
    live: Vec<Toast>,
    shown: usize,
}

/// In-process toast surface with timed auto-dismiss.
#[derive(Clone)]
pub struct ToastBoard {
    state: Arc<Mutex<BoardState>>,
    next_id: Arc<AtomicU64>,
    ttl: Duration,
    exit: Duration,
}

impl ToastBoard {
    pub fn new(ttl: Duration, exit: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(BoardState::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            ttl,
            exit,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.toast_ttl, config.toast_exit)
    }

    /// Toasts currently on screen, oldest first, including leaving ones.
    pub fn visible(&self) -> Vec<Toast> {
        self.lock().live.clone()
    }

    /// Toasts shown since the board was created.
    pub fn shown(&self) -> usize {
        self.lock().shown
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BoardState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, id: ToastId) {
        self.lock().live.retain(|t| t.id != id);
    }

    /// Run `f` after `delay` on the current runtime. False, without running
    /// `f`, when there is no runtime to time against.
    fn schedule(&self, delay: Duration, f: impl FnOnce(ToastBoard) + Send + 'static) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        let board = self.clone();
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            f(board);
        });
        true
    }
}

impl Toaster for ToastBoard {
    fn show(&self, title: &str, message: &str, kind: NotificationType) -> ToastId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.lock();
            state.live.push(Toast {
                id,
                title: title.to_string(),
                message: message.to_string(),
                kind,
                phase: ToastPhase::Visible,
            });
            state.shown += 1;
        }
        tracing::info!(toast_id = id, kind = %kind, title, message, "toast shown");

        let scheduled = self.schedule(self.ttl, move |board| {
            board.dismiss(id);
        });
        if !scheduled {
            tracing::debug!(toast_id = id, "no runtime, toast stays until dismissed");
        }
        id
    }

    fn dismiss(&self, id: ToastId) -> bool {
        {
            let mut state = self.lock();
            match state
                .live
                .iter_mut()
                .find(|t| t.id == id && t.phase == ToastPhase::Visible)
            {
                Some(toast) => toast.phase = ToastPhase::Leaving,
                None => return false,
            }
        }
        tracing::debug!(toast_id = id, "toast dismissed");

        if !self.schedule(self.exit, move |board| board.remove(id)) {
            self.remove(id);
        }
        true
    }
}

//! Per-account notifications: storage, live feed and on-screen toasts.

pub mod channel;
pub mod templates;
pub mod toast;
pub mod triggers;

pub use channel::{Dispatch, InitOutcome, NotificationChannel};
pub use toast::{Toast, ToastBoard, ToastId, ToastPhase, Toaster};

//! Signup, login and session flows.

pub mod accounts;
pub mod gateway;

pub use accounts::{AccountDirectory, PhoneScope};
pub use gateway::{AuthGateway, LoginOutcome, SignupOutcome};

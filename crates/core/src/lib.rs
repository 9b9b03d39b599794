pub mod admin;
pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod humanize;
pub mod render;
pub mod session;
pub mod templates;
pub mod types;

pub use api::{AnalyticsApi, HttpAnalyticsClient, MessageStream};
pub use config::AppConfig;
pub use error::*;
pub use session::SessionContext;
pub use types::*;

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod playlist;
pub mod repository;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{Channel, ChannelId};
pub use repository::{ChannelRepository, InMemoryChannelRepository};

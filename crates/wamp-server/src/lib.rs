pub mod application;
pub mod auth;
pub mod bootstrap;
pub mod cache;
pub mod clients;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handlers;
pub mod periodic;
pub mod router;
pub mod server;
pub mod topics;
pub mod transport;

pub use application::WampApplication;
pub use cache::{ClientStorage, InMemoryDriver};
pub use clients::ClientQuery;
pub use config::WampSettings;
pub use error::WampError;
pub use events::EventBus;
pub use server::{ServerConfig, ServerHandle};

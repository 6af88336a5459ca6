pub mod connection;
pub mod handlers;
pub mod server;
pub mod session;

pub use connection::run_session;
pub use handlers::HandlerState;
pub use server::{build_router, start, AppState, ConfigError, ServerConfig, ServerHandle};
pub use session::{DeliveryError, RegistryError, Session, SessionRegistry};

pub mod common;
pub mod discovery;
pub mod server;

pub use common::config::AppConfig;
pub use server::ServerMiddleware;

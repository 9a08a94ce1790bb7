mod config;
mod error;
mod store;

pub use config::RestConfig;
pub use error::RestDaoError;
pub use store::RestGameStore;

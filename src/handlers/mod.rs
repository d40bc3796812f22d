pub mod calls;
pub mod config;
pub mod models;

pub use calls::*;
pub use config::*;
pub use models::*;

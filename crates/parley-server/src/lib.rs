pub mod config;
pub mod rest;
pub mod server;
pub mod socket;

pub use config::Config;
pub use server::{build_router, start, ServerHandle};

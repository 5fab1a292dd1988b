// Imgate: on-demand image optimization gateway

pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod fetch;
pub mod gateway;
pub mod image;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod policy;
pub mod reload;
pub mod request;
pub mod server;

pub mod aggregate;
pub mod config;
pub mod error;
pub mod gmail;
pub mod normalize;
pub mod oauth;
pub mod output;
pub mod sanitize;
pub mod service;
pub mod store;

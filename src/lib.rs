// src/lib.rs
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod protocol;
pub mod transport;

// src/transport/mod.rs
pub mod http;
pub mod stdio;

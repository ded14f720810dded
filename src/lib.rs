// src/lib.rs
pub mod config;
pub mod controller;
pub mod metrics;
pub mod parameter;
pub mod path;
pub mod proxy;
pub mod server;
pub mod task;

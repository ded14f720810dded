// src/controller/mod.rs
mod component;
mod router;

pub use component::{AsyncComponent, Component, ComponentResponse, Destination};
pub use router::{
    ControllerBuilder, RoutingController, RoutingError, DEFAULT_BRIDGE_TIMEOUT, SELF_SELECTOR,
};

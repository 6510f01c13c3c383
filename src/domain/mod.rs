//! Domain layer: entities, errors and the ports the services depend on.

pub mod error;
pub mod models;
pub mod ports;

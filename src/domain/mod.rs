//! Domain Layer
//!
//! Nodes, topology snapshots, pure routing services and the ports the
//! layer talks to the outside world through.

pub mod entities;
pub mod ports;
pub mod services;
pub mod topology;
pub mod value_objects;

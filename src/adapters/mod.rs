//! Adapters Layer
//!
//! Inbound adapters expose the router over HTTP; outbound adapters
//! implement the domain ports.

pub mod inbound;
pub mod outbound;

mod status_server;

pub use status_server::{app, HealthResponse, StatusServer, StatusState, CALLER_ID_HEADER};

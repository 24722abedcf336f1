//! REST API module (C9, spec §6): the HTTP surface over the ingest,
//! lifecycle, and store layers.

mod dto;
mod handlers;
mod server;

pub use server::{router, run_server, AppState};

pub mod aggregate;
pub mod classify;
pub mod conservation;
pub mod engine;
pub mod graph;
pub mod mapping;
pub mod measurement;
pub mod quality;
pub mod resolve;
pub mod state;
pub mod types;

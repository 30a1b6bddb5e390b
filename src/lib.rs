pub mod agents;
pub mod building;
pub mod config;
pub mod constants;
pub mod error;
pub mod hazards;
pub mod mailbox;
pub mod navigation;
pub mod rng;
pub mod simulation;
pub mod types;
pub mod world;

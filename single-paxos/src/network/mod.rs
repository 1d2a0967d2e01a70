pub mod client;
pub mod messages;
pub mod server;
pub mod simulation;

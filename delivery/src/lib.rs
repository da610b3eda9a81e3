pub mod delivery_actors;
pub mod engine;
pub mod messages;
pub mod simulation;

pub mod compatibility;
pub mod events;
pub mod generation;
pub mod models;
pub mod providers;
pub mod settings;

pub mod command;
pub mod delivery;

pub mod events;
pub mod tasks;
pub mod tick;

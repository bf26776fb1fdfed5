pub mod experience;
pub mod state;
pub mod sync;

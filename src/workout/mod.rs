pub mod ids;
pub mod store;
pub mod transfer;
pub mod types;

pub use store::WorkoutStore;

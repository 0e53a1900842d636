pub mod analyze;
pub mod feedback;
pub mod health;
pub mod ops;
pub mod usage;

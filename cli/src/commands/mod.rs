pub mod analyze;
pub mod health;
pub mod ops;
pub mod usage;

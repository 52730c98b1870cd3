pub mod containers;
pub mod health;

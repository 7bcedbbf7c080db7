pub mod colorize;
pub mod health;

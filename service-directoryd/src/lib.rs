pub mod api;
pub mod checker;
pub mod config;
pub mod finder;
pub mod registry;

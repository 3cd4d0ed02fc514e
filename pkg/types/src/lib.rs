pub mod config;
pub mod object;
pub mod quantity;
pub mod quota;
pub mod validate;

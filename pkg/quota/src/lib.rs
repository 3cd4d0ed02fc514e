pub mod admission;
pub mod operator;
pub mod policy;

pub mod builder;
pub mod period;

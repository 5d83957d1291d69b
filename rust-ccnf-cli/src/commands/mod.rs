pub mod cache;
pub mod connection;
pub mod interest;
pub mod route;
pub mod stats;

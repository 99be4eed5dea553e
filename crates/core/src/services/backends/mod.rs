pub mod capstone;

pub use capstone::{CapstoneOracle, CapstoneProvider};

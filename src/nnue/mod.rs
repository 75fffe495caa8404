pub mod accumulator;
pub mod network;
pub mod simd;

pub use accumulator::{AccumulatorPair, AccumulatorStack};
pub use network::Network;

pub mod generate;
pub mod magic;
pub mod moves;

pub use generate::{generate_legal_moves, generate_moves, perft, ALL_MOVES, NOISY_ONLY};

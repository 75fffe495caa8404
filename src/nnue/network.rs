use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};

use crate::board::bitboard::{flip_rank, popcount, Square};
use crate::board::position::{Color, PieceType, Position};
use crate::nnue::accumulator::AccumulatorPair;
use crate::nnue::simd;
use crate::search::{MATED_IN_MAX_PLY, MATE_IN_MAX_PLY};

pub const INPUT_SIZE: usize = 768;
pub const HL_SIZE: usize = 1024;
pub const OUTPUT_BUCKETS: usize = 8;

pub const QA: i32 = 255;
pub const QB: i32 = 64;
pub const EVAL_SCALE: i32 = 400;

#[cfg(feature = "embedded_nnue")]
static EMBEDDED_NNUE: &[u8] = include_bytes!("lazarus.nnue");

/// Quantized network: feature transformer into a single hidden layer, then
/// one of several output buckets picked by piece count.
///
/// File format is a raw little-endian i16 stream: input weights in
/// feature-major order, hidden biases, per-bucket output weights (stm half
/// then nstm half), output biases.
pub struct Network {
    pub ft_weights: Box<[i16]>,  // INPUT_SIZE * HL_SIZE
    pub ft_biases: Box<[i16]>,   // HL_SIZE
    pub out_weights: Box<[i16]>, // OUTPUT_BUCKETS * 2 * HL_SIZE
    pub out_biases: [i16; OUTPUT_BUCKETS],
}

impl Network {
    /// All-zero weights. Evaluation degenerates to 0 centipawns, leaving the
    /// search tactical-only. Used when no network can be loaded.
    pub fn zeroed() -> Self {
        Self {
            ft_weights: vec![0; INPUT_SIZE * HL_SIZE].into_boxed_slice(),
            ft_biases: vec![0; HL_SIZE].into_boxed_slice(),
            out_weights: vec![0; OUTPUT_BUCKETS * 2 * HL_SIZE].into_boxed_slice(),
            out_biases: [0; OUTPUT_BUCKETS],
        }
    }

    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let mut net = Self::zeroed();

        reader
            .read_i16_into::<LittleEndian>(&mut net.ft_weights)
            .context("input weights")?;
        reader
            .read_i16_into::<LittleEndian>(&mut net.ft_biases)
            .context("hidden biases")?;
        reader
            .read_i16_into::<LittleEndian>(&mut net.out_weights)
            .context("output weights")?;
        reader
            .read_i16_into::<LittleEndian>(&mut net.out_biases)
            .context("output biases")?;

        Ok(net)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)
            .with_context(|| format!("open network file {}", path.as_ref().display()))?;
        Self::from_reader(&mut BufReader::new(file))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::from_reader(&mut std::io::Cursor::new(data))
    }

    /// The compiled-in network, when the build carries one.
    #[cfg(feature = "embedded_nnue")]
    pub fn embedded() -> Option<Self> {
        Self::from_bytes(EMBEDDED_NNUE).ok()
    }

    #[cfg(not(feature = "embedded_nnue"))]
    pub fn embedded() -> Option<Self> {
        None
    }

    /// Input feature index for a (perspective, piece color, piece, square)
    /// tuple. Black perspectives see a rank-mirrored board.
    #[inline(always)]
    pub fn feature(perspective: Color, color: Color, piece: PieceType, square: Square) -> usize {
        let color_index = if perspective == color { 0 } else { 1 };
        let square_index = if perspective == Color::Black {
            flip_rank(square) as usize
        } else {
            square as usize
        };

        color_index * 64 * 6 + piece as usize * 64 + square_index
    }

    /// Raw forward pass in centipawn-ish units, no clamping.
    pub fn forward(&self, pos: &Position, acc: &AccumulatorPair) -> i32 {
        const DIVISOR: usize = 32 / OUTPUT_BUCKETS;
        let bucket = (popcount(pos.occupied()) as usize - 2) / DIVISOR;

        let (stm_acc, nstm_acc) = if pos.stm == Color::White {
            (&acc.white, &acc.black)
        } else {
            (&acc.black, &acc.white)
        };

        let weights = &self.out_weights[bucket * 2 * HL_SIZE..(bucket + 1) * 2 * HL_SIZE];
        let mut eval = simd::screlu_sum(stm_acc, nstm_acc, weights);

        // SCReLU doubles the quantization, shed one factor before the bias
        eval /= QA;
        eval += self.out_biases[bucket] as i32;

        (eval * EVAL_SCALE) / (QA * QB)
    }

    pub fn evaluate(&self, pos: &Position, acc: &AccumulatorPair) -> i32 {
        self.forward(pos, acc).clamp(MATED_IN_MAX_PLY, MATE_IN_MAX_PLY)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};

    /// Small deterministic weights for tests, kept tiny so the vectorized
    /// and scalar paths agree bit for bit.
    pub fn patterned() -> Network {
        let total = INPUT_SIZE * HL_SIZE + HL_SIZE + OUTPUT_BUCKETS * 2 * HL_SIZE + OUTPUT_BUCKETS;
        let mut bytes = Vec::with_capacity(total * 2);
        for i in 0..total {
            let v = (i % 13) as i16 - 6;
            bytes.write_i16::<LittleEndian>(v).unwrap();
        }
        Network::from_bytes(&bytes).unwrap()
    }

    #[test]
    fn test_feature_indices() {
        // Own pawn on a2 from white's view
        assert_eq!(Network::feature(Color::White, Color::White, PieceType::Pawn, 8), 8);
        // Same piece from black's view: enemy pawn on the mirrored square
        assert_eq!(
            Network::feature(Color::Black, Color::White, PieceType::Pawn, 8),
            384 + (8 ^ 56)
        );
        assert_eq!(
            Network::feature(Color::White, Color::White, PieceType::King, 4),
            5 * 64 + 4
        );
        assert_eq!(
            Network::feature(Color::Black, Color::Black, PieceType::King, 60),
            5 * 64 + 4
        );
    }

    #[test]
    fn test_zeroed_network_evaluates_to_zero() {
        let net = Network::zeroed();
        let pos = Position::startpos();
        let mut acc = AccumulatorPair::default();
        acc.reset(&pos, &net);
        assert_eq!(net.evaluate(&pos, &acc), 0);
    }

    #[test]
    fn test_loader_round_trip() {
        let net = patterned();
        assert_eq!(net.ft_weights[0], -6);
        assert_eq!(net.ft_weights[1], -5);
        // The stream is consumed section by section in order
        let idx = INPUT_SIZE * HL_SIZE;
        assert_eq!(net.ft_biases[0], ((idx % 13) as i16) - 6);
    }

    #[test]
    fn test_short_file_is_an_error() {
        let bytes = vec![0u8; 100];
        assert!(Network::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_forward_symmetry_on_startpos() {
        // The start position is mirror symmetric, both sides see the same net
        let net = patterned();
        let pos = Position::startpos();
        let mut acc = AccumulatorPair::default();
        acc.reset(&pos, &net);

        let mut black_pos = pos.clone();
        black_pos.stm = Color::Black;
        assert_eq!(net.forward(&pos, &acc), net.forward(&black_pos, &acc));
    }

    #[test]
    fn test_bucket_selection_bounds() {
        // 32 pieces lands in the last bucket, lone kings in the first
        const DIVISOR: usize = 32 / OUTPUT_BUCKETS;
        assert_eq!((32 - 2) / DIVISOR, OUTPUT_BUCKETS - 1);
        assert_eq!((2 - 2) / DIVISOR, 0);
    }
}

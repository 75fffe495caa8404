use crate::board::bitboard::{iter_bits, Square};
use crate::board::position::{
    castle_index, Color, PieceType, Position, KING_CASTLE_END_SQ, ROOK_CASTLE_END_SQ,
};
use crate::movegen::moves::{Move, MoveType};
use crate::nnue::network::{Network, HL_SIZE};
use crate::search::MAX_PLY;

/// Hidden-layer sums for both perspectives, updated incrementally.
#[derive(Clone, PartialEq, Eq)]
#[repr(C, align(64))]
pub struct AccumulatorPair {
    pub white: [i16; HL_SIZE],
    pub black: [i16; HL_SIZE],
}

impl Default for AccumulatorPair {
    fn default() -> Self {
        Self {
            white: [0; HL_SIZE],
            black: [0; HL_SIZE],
        }
    }
}

impl std::fmt::Debug for AccumulatorPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccumulatorPair")
            .field("white[0..4]", &&self.white[0..4])
            .field("black[0..4]", &&self.black[0..4])
            .finish()
    }
}

impl AccumulatorPair {
    /// Rebuild both accumulators from scratch: biases plus the feature
    /// column of every piece on the board.
    pub fn reset(&mut self, pos: &Position, net: &Network) {
        self.white.copy_from_slice(&net.ft_biases);
        self.black.copy_from_slice(&net.ft_biases);

        for color in [Color::White, Color::Black] {
            for sq in iter_bits(pos.pieces(color)) {
                let pt = pos.piece_on(sq);
                self.add(net, Network::feature(Color::White, color, pt, sq), Network::feature(Color::Black, color, pt, sq));
            }
        }
    }

    /// Applies the feature delta of a move, given the board after the move
    /// and the piece kind that stood on the target square before it.
    pub fn update(&mut self, pos: &Position, m: Move, captured: PieceType, net: &Network) {
        let stm = !pos.stm; // the side that just moved
        let from = m.from();
        let to = m.to();
        let mt = m.type_of();

        let pt = if mt == MoveType::Promotion { PieceType::Pawn } else { pos.piece_on(to) };
        let end_pt = if mt == MoveType::Promotion { m.promo() } else { pt };

        match mt {
            MoveType::EnPassant => {
                let victim_sq = if stm == Color::White { to - 8 } else { to + 8 };
                self.add_sub_sub(
                    net,
                    stm,
                    (to, PieceType::Pawn),
                    (from, PieceType::Pawn),
                    (!stm, victim_sq, PieceType::Pawn),
                );
            }
            MoveType::Castle => {
                let idx = castle_index(stm, to > from);
                self.add_add_sub_sub(
                    net,
                    stm,
                    (KING_CASTLE_END_SQ[idx], PieceType::King),
                    (ROOK_CASTLE_END_SQ[idx], PieceType::Rook),
                    (from, PieceType::King),
                    (to, PieceType::Rook),
                );
            }
            _ if captured != PieceType::NoPiece => {
                self.add_sub_sub(net, stm, (to, end_pt), (from, pt), (!stm, to, captured));
            }
            _ => {
                self.add_sub(net, stm, (to, end_pt), (from, pt));
            }
        }
    }

    #[inline(always)]
    fn add(&mut self, net: &Network, white_feature: usize, black_feature: usize) {
        let w = &net.ft_weights[white_feature * HL_SIZE..white_feature * HL_SIZE + HL_SIZE];
        let b = &net.ft_weights[black_feature * HL_SIZE..black_feature * HL_SIZE + HL_SIZE];
        for i in 0..HL_SIZE {
            self.white[i] = self.white[i].wrapping_add(w[i]);
            self.black[i] = self.black[i].wrapping_add(b[i]);
        }
    }

    /// Quiet moves: one feature in, one out, both the mover's.
    fn add_sub(&mut self, net: &Network, stm: Color, add: (Square, PieceType), sub: (Square, PieceType)) {
        let add_w = Network::feature(Color::White, stm, add.1, add.0) * HL_SIZE;
        let add_b = Network::feature(Color::Black, stm, add.1, add.0) * HL_SIZE;
        let sub_w = Network::feature(Color::White, stm, sub.1, sub.0) * HL_SIZE;
        let sub_b = Network::feature(Color::Black, stm, sub.1, sub.0) * HL_SIZE;

        let ft = &net.ft_weights;
        for i in 0..HL_SIZE {
            self.white[i] = self.white[i].wrapping_add(ft[add_w + i]).wrapping_sub(ft[sub_w + i]);
            self.black[i] = self.black[i].wrapping_add(ft[add_b + i]).wrapping_sub(ft[sub_b + i]);
        }
    }

    /// Captures: the landing feature in, the mover's origin and the victim out.
    fn add_sub_sub(
        &mut self,
        net: &Network,
        stm: Color,
        add: (Square, PieceType),
        sub1: (Square, PieceType),
        sub2: (Color, Square, PieceType),
    ) {
        let add_w = Network::feature(Color::White, stm, add.1, add.0) * HL_SIZE;
        let add_b = Network::feature(Color::Black, stm, add.1, add.0) * HL_SIZE;
        let sub1_w = Network::feature(Color::White, stm, sub1.1, sub1.0) * HL_SIZE;
        let sub1_b = Network::feature(Color::Black, stm, sub1.1, sub1.0) * HL_SIZE;
        let sub2_w = Network::feature(Color::White, sub2.0, sub2.2, sub2.1) * HL_SIZE;
        let sub2_b = Network::feature(Color::Black, sub2.0, sub2.2, sub2.1) * HL_SIZE;

        let ft = &net.ft_weights;
        for i in 0..HL_SIZE {
            self.white[i] = self.white[i]
                .wrapping_add(ft[add_w + i])
                .wrapping_sub(ft[sub1_w + i])
                .wrapping_sub(ft[sub2_w + i]);
            self.black[i] = self.black[i]
                .wrapping_add(ft[add_b + i])
                .wrapping_sub(ft[sub1_b + i])
                .wrapping_sub(ft[sub2_b + i]);
        }
    }

    /// Castling: king and rook land, king and rook leave.
    fn add_add_sub_sub(
        &mut self,
        net: &Network,
        stm: Color,
        add1: (Square, PieceType),
        add2: (Square, PieceType),
        sub1: (Square, PieceType),
        sub2: (Square, PieceType),
    ) {
        let add1_w = Network::feature(Color::White, stm, add1.1, add1.0) * HL_SIZE;
        let add1_b = Network::feature(Color::Black, stm, add1.1, add1.0) * HL_SIZE;
        let add2_w = Network::feature(Color::White, stm, add2.1, add2.0) * HL_SIZE;
        let add2_b = Network::feature(Color::Black, stm, add2.1, add2.0) * HL_SIZE;
        let sub1_w = Network::feature(Color::White, stm, sub1.1, sub1.0) * HL_SIZE;
        let sub1_b = Network::feature(Color::Black, stm, sub1.1, sub1.0) * HL_SIZE;
        let sub2_w = Network::feature(Color::White, stm, sub2.1, sub2.0) * HL_SIZE;
        let sub2_b = Network::feature(Color::Black, stm, sub2.1, sub2.0) * HL_SIZE;

        let ft = &net.ft_weights;
        for i in 0..HL_SIZE {
            self.white[i] = self.white[i]
                .wrapping_add(ft[add1_w + i])
                .wrapping_add(ft[add2_w + i])
                .wrapping_sub(ft[sub1_w + i])
                .wrapping_sub(ft[sub2_w + i]);
            self.black[i] = self.black[i]
                .wrapping_add(ft[add1_b + i])
                .wrapping_add(ft[add2_b + i])
                .wrapping_sub(ft[sub1_b + i])
                .wrapping_sub(ft[sub2_b + i]);
        }
    }
}

/// Fixed-capacity stack of accumulators, one frame per search ply. Pushes
/// duplicate the top so the delta update can work in place; pops must mirror
/// every push on all exit paths of the move loop.
pub struct AccumulatorStack {
    stack: Vec<AccumulatorPair>,
    len: usize,
}

impl AccumulatorStack {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(MAX_PLY + 1),
            len: 0,
        }
    }

    /// Drops all frames and seeds the stack from the given position.
    pub fn reset(&mut self, pos: &Position, net: &Network) {
        let mut pair = AccumulatorPair::default();
        pair.reset(pos, net);

        self.len = 1;
        if self.stack.is_empty() {
            self.stack.push(pair);
        } else {
            self.stack[0] = pair;
        }
    }

    #[inline(always)]
    pub fn push_from_top(&mut self) {
        debug_assert!(self.len > 0);
        let top = self.stack[self.len - 1].clone();
        if self.stack.len() == self.len {
            self.stack.push(top);
        } else {
            self.stack[self.len] = top;
        }
        self.len += 1;
    }

    #[inline(always)]
    pub fn pop(&mut self) {
        debug_assert!(self.len > 1);
        self.len -= 1;
    }

    #[inline(always)]
    pub fn top(&self) -> &AccumulatorPair {
        &self.stack[self.len - 1]
    }

    #[inline(always)]
    pub fn top_mut(&mut self) -> &mut AccumulatorPair {
        &mut self.stack[self.len - 1]
    }
}

impl Default for AccumulatorStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nnue::network::tests::patterned;

    fn fresh(pos: &Position, net: &Network) -> AccumulatorPair {
        let mut pair = AccumulatorPair::default();
        pair.reset(pos, net);
        pair
    }

    fn play_and_check(fen: &str, moves: &[&str]) {
        let net = patterned();
        let mut pos = Position::from_fen(fen).unwrap();
        let mut acc = fresh(&pos, &net);

        for s in moves {
            let m = Move::from_uci(s, &pos).unwrap();
            assert!(pos.is_legal(m), "{} in {}", s, pos.fen());
            let captured = pos.captured_piece(m);
            pos.make_move(m);
            acc.update(&pos, m, captured, &net);

            assert_eq!(acc, fresh(&pos, &net), "after {} in {}", s, fen);
        }
    }

    #[test]
    fn test_delta_updates_match_refresh_quiets_and_captures() {
        play_and_check(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            &["e2e4", "d7d5", "e4d5", "d8d5", "b1c3", "d5a5"],
        );
    }

    #[test]
    fn test_delta_updates_match_refresh_castling() {
        play_and_check(
            "r3k2r/pppqppbp/2npbnp1/8/8/2NPBNP1/PPPQPPBP/R3K2R w KQkq - 0 1",
            &["e1g1", "e8c8"],
        );
    }

    #[test]
    fn test_delta_updates_match_refresh_en_passant_and_promotion() {
        // Promotion capture, quiet push, double push, en passant
        play_and_check(
            "r1b2k2/1Pp3P1/8/8/1p6/8/P7/4K3 w - - 0 1",
            &["b7a8q", "c7c6", "a2a4", "b4a3"],
        );
    }

    #[test]
    fn test_stack_push_pop_restores() {
        let net = patterned();
        let pos = Position::startpos();

        let mut stack = AccumulatorStack::new();
        stack.reset(&pos, &net);
        let before = stack.top().clone();

        stack.push_from_top();
        let mut after = pos.clone();
        let m = Move::from_uci("e2e4", &pos).unwrap();
        after.make_move(m);
        stack.top_mut().update(&after, m, PieceType::NoPiece, &net);
        assert_ne!(*stack.top(), before);

        stack.pop();
        assert_eq!(*stack.top(), before);
    }
}

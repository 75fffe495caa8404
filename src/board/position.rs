use super::bitboard::*;
use super::zobrist;
use crate::movegen::magic::{
    get_bishop_attacks, get_king_attacks, get_knight_attacks, get_pawn_attacks, get_rook_attacks,
    get_xray_bishop_attacks, get_xray_rook_attacks, line, line_seg,
};
use crate::movegen::moves::{Move, MoveType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PieceType {
    Pawn = 0,
    Knight = 1,
    Bishop = 2,
    Rook = 3,
    Queen = 4,
    King = 5,
    NoPiece = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    White = 0,
    Black = 1,
}

impl Color {
    #[inline(always)]
    pub const fn opposite(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

impl std::ops::Not for Color {
    type Output = Color;

    #[inline(always)]
    fn not(self) -> Color {
        self.opposite()
    }
}

pub const fn piece_value(pt: PieceType) -> i32 {
    match pt {
        PieceType::Pawn => 100,
        PieceType::Knight => 300,
        PieceType::Bishop => 300,
        PieceType::Rook => 500,
        PieceType::Queen => 800,
        _ => 0,
    }
}

/// Castling array slot for a color and wing. Order is qQkK from black's
/// queenside, matching the hash flag layout.
#[inline(always)]
pub const fn castle_index(c: Color, kingside: bool) -> usize {
    match c {
        Color::White => {
            if kingside {
                3
            } else {
                2
            }
        }
        Color::Black => {
            if kingside {
                1
            } else {
                0
            }
        }
    }
}

// King and rook landing squares indexed by castle_index
pub const KING_CASTLE_END_SQ: [Square; 4] = [58, 62, 2, 6];
pub const ROOK_CASTLE_END_SQ: [Square; 4] = [59, 61, 3, 5];

#[derive(Debug, Clone)]
pub struct Position {
    // Indexed pawns, knights, bishops, rooks, queens, king
    pub by_pieces: [Bitboard; 6],
    // Indexed by color
    pub by_color: [Bitboard; 2],
    // Piece kind per square, color comes from the color boards
    pub mailbox: [PieceType; 64],

    pub stm: Color,
    pub ep_square: Square,
    // Rook origin square per castling right, NO_SQUARE when the right is gone
    pub castling: [Square; 4],

    pub halfmove_clock: u16,
    pub fullmove_clock: u16,

    pub full_hash: u64,
    pub pawn_hash: u64,

    // Hashes since the last irreversible move, newest last
    pub pos_history: Vec<u64>,

    pub check_mask: Bitboard,
    pub double_check: bool,
    pub pinned: Bitboard,
    pub pinners_per_c: [Bitboard; 2],

    // Notation only: castling prints as king-to-rook when set
    pub chess960: bool,

    from_null: bool,
}

impl Position {
    pub fn startpos() -> Self {
        let mut pos = Self::empty();
        pos.reset();
        pos
    }

    fn empty() -> Self {
        Position {
            by_pieces: [EMPTY; 6],
            by_color: [EMPTY; 2],
            mailbox: [PieceType::NoPiece; 64],
            stm: Color::White,
            ep_square: NO_SQUARE,
            castling: [NO_SQUARE; 4],
            halfmove_clock: 0,
            fullmove_clock: 1,
            full_hash: 0,
            pawn_hash: 0,
            pos_history: Vec::new(),
            check_mask: FULL,
            double_check: false,
            pinned: EMPTY,
            pinners_per_c: [EMPTY; 2],
            chess960: false,
            from_null: false,
        }
    }

    pub fn reset(&mut self) {
        let chess960 = self.chess960;
        *self = Self::empty();
        self.chess960 = chess960;

        self.by_pieces[PieceType::Pawn as usize] = RANK_2 | RANK_7;
        self.by_pieces[PieceType::Knight as usize] = 0x42 | (0x42 << 56);
        self.by_pieces[PieceType::Bishop as usize] = 0x24 | (0x24 << 56);
        self.by_pieces[PieceType::Rook as usize] = 0x81 | (0x81 << 56);
        self.by_pieces[PieceType::Queen as usize] = 0x8 | (0x8 << 56);
        self.by_pieces[PieceType::King as usize] = 0x10 | (0x10 << 56);
        self.by_color[Color::White as usize] = RANK_1 | RANK_2;
        self.by_color[Color::Black as usize] = RANK_7 | RANK_8;

        self.castling = [56, 63, 0, 7];

        self.reset_mailbox();
        self.reset_hashes();
        self.update_check_pin();

        self.pos_history = vec![self.full_hash];
    }

    // ***** ACCESSORS *****

    #[inline(always)]
    pub fn occupied(&self) -> Bitboard {
        self.by_color[0] | self.by_color[1]
    }

    #[inline(always)]
    pub fn pieces(&self, c: Color) -> Bitboard {
        self.by_color[c as usize]
    }

    #[inline(always)]
    pub fn pieces_pt(&self, pt: PieceType) -> Bitboard {
        self.by_pieces[pt as usize]
    }

    #[inline(always)]
    pub fn pieces_cp(&self, c: Color, pt: PieceType) -> Bitboard {
        self.by_pieces[pt as usize] & self.by_color[c as usize]
    }

    #[inline(always)]
    pub fn piece_on(&self, sq: Square) -> PieceType {
        self.mailbox[sq as usize]
    }

    #[inline(always)]
    pub fn king_sq(&self, c: Color) -> Square {
        lsb(self.pieces_cp(c, PieceType::King))
    }

    #[inline(always)]
    pub fn castle_sq(&self, c: Color, kingside: bool) -> Square {
        self.castling[castle_index(c, kingside)]
    }

    pub fn can_castle(&self, c: Color, kingside: bool) -> bool {
        self.castle_sq(c, kingside) != NO_SQUARE
    }

    #[inline(always)]
    pub fn in_check(&self) -> bool {
        self.check_mask != FULL
    }

    #[inline(always)]
    pub fn is_capture(&self, m: Move) -> bool {
        (square_mask(m.to()) & self.pieces(!self.stm)) != 0 || m.type_of() == MoveType::EnPassant
    }

    /// Queen promotions count as noisy, underpromotions as quiet.
    #[inline(always)]
    pub fn is_quiet(&self, m: Move) -> bool {
        !self.is_capture(m) && (m.type_of() != MoveType::Promotion || m.promo() != PieceType::Queen)
    }

    #[inline(always)]
    pub fn captured_piece(&self, m: Move) -> PieceType {
        if m.type_of() == MoveType::EnPassant {
            PieceType::Pawn
        } else {
            self.piece_on(m.to())
        }
    }

    // ***** INCREMENTAL BOARD UPDATES *****

    #[inline(always)]
    fn place_piece(&mut self, c: Color, pt: PieceType, sq: Square) {
        let mask = square_mask(sq);
        debug_assert!(self.by_pieces[pt as usize] & mask == 0);

        self.full_hash ^= zobrist::piece_key(c, pt, sq);
        if pt == PieceType::Pawn {
            self.pawn_hash ^= zobrist::piece_key(c, pt, sq);
        }

        self.by_pieces[pt as usize] ^= mask;
        self.by_color[c as usize] ^= mask;
        self.mailbox[sq as usize] = pt;
    }

    #[inline(always)]
    fn remove_piece(&mut self, c: Color, pt: PieceType, sq: Square) {
        let mask = square_mask(sq);
        debug_assert!(self.by_pieces[pt as usize] & mask != 0);

        self.full_hash ^= zobrist::piece_key(c, pt, sq);
        if pt == PieceType::Pawn {
            self.pawn_hash ^= zobrist::piece_key(c, pt, sq);
        }

        self.by_pieces[pt as usize] ^= mask;
        self.by_color[c as usize] ^= mask;
        self.mailbox[sq as usize] = PieceType::NoPiece;
    }

    fn reset_mailbox(&mut self) {
        self.mailbox = [PieceType::NoPiece; 64];
        for pt in [
            PieceType::Pawn,
            PieceType::Knight,
            PieceType::Bishop,
            PieceType::Rook,
            PieceType::Queen,
            PieceType::King,
        ] {
            for sq in iter_bits(self.pieces_pt(pt)) {
                self.mailbox[sq as usize] = pt;
            }
        }
    }

    fn reset_hashes(&mut self) {
        self.full_hash = 0;
        self.pawn_hash = 0;

        for c in [Color::White, Color::Black] {
            for pt in [
                PieceType::Pawn,
                PieceType::Knight,
                PieceType::Bishop,
                PieceType::Rook,
                PieceType::Queen,
                PieceType::King,
            ] {
                for sq in iter_bits(self.pieces_cp(c, pt)) {
                    self.full_hash ^= zobrist::piece_key(c, pt, sq);
                    if pt == PieceType::Pawn {
                        self.pawn_hash ^= zobrist::piece_key(c, pt, sq);
                    }
                }
            }
        }

        self.full_hash ^= self.hash_castling();
        self.full_hash ^= zobrist::en_passant_key(self.ep_square);

        if self.stm == Color::Black {
            self.full_hash ^= zobrist::side_to_move_key();
        }
    }

    /// Full recomputation, used by tests to validate the incremental hash.
    pub fn recomputed_full_hash(&self) -> u64 {
        let mut copy = self.clone();
        copy.reset_hashes();
        copy.full_hash
    }

    fn hash_castling(&self) -> u64 {
        let mut flags = 0u8;
        for idx in 0..4 {
            if self.castling[idx] != NO_SQUARE {
                flags |= 1 << idx;
            }
        }
        zobrist::castling_key(flags)
    }

    fn set_castling_rights(&mut self, c: Color, sq: Square, value: bool) {
        let kingside = self.king_sq(c) < sq;
        self.castling[castle_index(c, kingside)] = if value { sq } else { NO_SQUARE };
    }

    fn unset_castling_rights(&mut self, c: Color) {
        self.castling[castle_index(c, true)] = NO_SQUARE;
        self.castling[castle_index(c, false)] = NO_SQUARE;
    }

    // ***** CHECKS AND PINS *****

    fn update_check_pin(&mut self) {
        let occ = self.occupied();
        let king_bb = self.pieces_cp(self.stm, PieceType::King);
        let king_sq = lsb(king_bb);

        let our_pieces = self.pieces(self.stm);
        let enemy_rook_queens =
            self.pieces_cp(!self.stm, PieceType::Rook) | self.pieces_cp(!self.stm, PieceType::Queen);
        let enemy_bishop_queens =
            self.pieces_cp(!self.stm, PieceType::Bishop) | self.pieces_cp(!self.stm, PieceType::Queen);

        let rook_checks = get_rook_attacks(king_sq, occ) & enemy_rook_queens;
        let bishop_checks = get_bishop_attacks(king_sq, occ) & enemy_bishop_queens;
        let mut checks = rook_checks | bishop_checks;

        self.check_mask =
            get_knight_attacks(king_sq) & self.pieces_cp(!self.stm, PieceType::Knight);
        self.check_mask |=
            get_pawn_attacks(king_sq, self.stm) & self.pieces_cp(!self.stm, PieceType::Pawn);

        self.double_check = popcount(checks | self.check_mask) > 1;

        while checks != 0 {
            self.check_mask |= line_seg(king_sq, pop_lsb(&mut checks));
        }

        if self.check_mask == 0 {
            self.check_mask = FULL;
        }

        let pinners = (get_xray_rook_attacks(king_sq, occ, our_pieces) & enemy_rook_queens)
            | (get_xray_bishop_attacks(king_sq, occ, our_pieces) & enemy_bishop_queens);
        self.pinners_per_c[self.stm as usize] = pinners;

        self.pinned = 0;
        let mut p = pinners;
        while p != 0 {
            self.pinned |= line_seg(pop_lsb(&mut p), king_sq) & our_pieces;
        }
    }

    /// All pieces of either color attacking a square under the given occupancy.
    pub fn attackers_to(&self, sq: Square, occ: Bitboard) -> Bitboard {
        (get_rook_attacks(sq, occ)
            & (self.pieces_pt(PieceType::Rook) | self.pieces_pt(PieceType::Queen)))
            | (get_bishop_attacks(sq, occ)
                & (self.pieces_pt(PieceType::Bishop) | self.pieces_pt(PieceType::Queen)))
            | (get_pawn_attacks(sq, Color::White) & self.pieces_cp(Color::Black, PieceType::Pawn))
            | (get_pawn_attacks(sq, Color::Black) & self.pieces_cp(Color::White, PieceType::Pawn))
            | (get_knight_attacks(sq) & self.pieces_pt(PieceType::Knight))
            | (get_king_attacks(sq) & self.pieces_pt(PieceType::King))
    }

    /// Is color `c`'s square attacked by the other side, at full occupancy.
    pub fn is_under_attack(&self, c: Color, square: Square) -> bool {
        self.is_attacked_with_occ(c, square, self.occupied())
    }

    fn is_attacked_with_occ(&self, c: Color, square: Square, occ: Bitboard) -> bool {
        let them = !c;

        if (self.pieces_cp(them, PieceType::Rook) | self.pieces_cp(them, PieceType::Queen))
            & get_rook_attacks(square, occ)
            != 0
        {
            return true;
        }
        if (self.pieces_cp(them, PieceType::Bishop) | self.pieces_cp(them, PieceType::Queen))
            & get_bishop_attacks(square, occ)
            != 0
        {
            return true;
        }
        if self.pieces_cp(them, PieceType::Knight) & get_knight_attacks(square) != 0 {
            return true;
        }
        if self.pieces_cp(them, PieceType::King) & get_king_attacks(square) != 0 {
            return true;
        }

        self.pieces_cp(them, PieceType::Pawn) & get_pawn_attacks(square, c) != 0
    }

    // ***** MAKING MOVES *****

    /// Approximates the hash after a move for TT prefetching. EP clearing and
    /// EP creation are accounted for, castling-right changes are not.
    pub fn rough_key_after(&self, m: Move) -> u64 {
        let mut key = self.full_hash ^ zobrist::side_to_move_key();

        if m.is_null() {
            return key;
        }

        let from = m.from();
        let to = m.to();
        let pt = self.piece_on(from);
        let end_pt = if m.type_of() == MoveType::Promotion { m.promo() } else { pt };
        let target_pt = self.piece_on(to);

        key ^= zobrist::en_passant_key(self.ep_square);

        key ^= zobrist::piece_key(self.stm, pt, from);
        key ^= zobrist::piece_key(self.stm, end_pt, to);

        if pt == PieceType::Pawn && (to == from.wrapping_add(16) || from == to.wrapping_add(16)) {
            let to_bb = square_mask(to);
            if self.pieces_cp(!self.stm, PieceType::Pawn) & (shift_east(to_bb) | shift_west(to_bb))
                != 0
            {
                let ep = if self.stm == Color::White { from + 8 } else { from - 8 };
                key ^= zobrist::en_passant_key(ep);
            }
        }

        if target_pt != PieceType::NoPiece {
            key ^= zobrist::piece_key(!self.stm, target_pt, to);
        }

        key
    }

    pub fn make_move(&mut self, m: Move) {
        self.full_hash ^= self.hash_castling();
        self.full_hash ^= zobrist::en_passant_key(self.ep_square);

        self.ep_square = NO_SQUARE;
        self.from_null = false;

        let from = m.from();
        let to = m.to();
        let mt = m.type_of();
        let pt = self.piece_on(from);
        let mut to_pt = PieceType::NoPiece;

        self.remove_piece(self.stm, pt, from);

        if self.is_capture(m) {
            to_pt = self.piece_on(to);
            self.halfmove_clock = 0;
            self.pos_history.clear();
            if mt != MoveType::EnPassant {
                self.remove_piece(!self.stm, to_pt, to);
            }
        } else if pt == PieceType::Pawn {
            self.halfmove_clock = 0;
            self.pos_history.clear();
        } else {
            self.halfmove_clock += 1;
        }

        match mt {
            MoveType::Standard => {
                self.place_piece(self.stm, pt, to);
                // Only set the EP square if an enemy pawn could actually take
                if pt == PieceType::Pawn && (to == from.wrapping_add(16) || from == to.wrapping_add(16)) {
                    let to_bb = square_mask(to);
                    if self.pieces_cp(!self.stm, PieceType::Pawn)
                        & (shift_east(to_bb) | shift_west(to_bb))
                        != 0
                    {
                        self.ep_square =
                            if self.stm == Color::White { from + 8 } else { from - 8 };
                    }
                }
            }
            MoveType::EnPassant => {
                let victim_sq = if self.stm == Color::White { to - 8 } else { to + 8 };
                self.remove_piece(!self.stm, PieceType::Pawn, victim_sq);
                self.place_piece(self.stm, pt, to);
            }
            MoveType::Castle => {
                debug_assert!(self.piece_on(to) == PieceType::Rook);
                self.remove_piece(self.stm, PieceType::Rook, to);
                let idx = castle_index(self.stm, from < to);
                self.place_piece(self.stm, PieceType::King, KING_CASTLE_END_SQ[idx]);
                self.place_piece(self.stm, PieceType::Rook, ROOK_CASTLE_END_SQ[idx]);
            }
            MoveType::Promotion => {
                self.place_piece(self.stm, m.promo(), to);
            }
        }

        debug_assert!(popcount(self.pieces_cp(Color::White, PieceType::King)) == 1);
        debug_assert!(popcount(self.pieces_cp(Color::Black, PieceType::King)) == 1);

        if pt == PieceType::Rook {
            let sq = self.castle_sq(self.stm, from > self.king_sq(self.stm));
            if from == sq {
                self.set_castling_rights(self.stm, from, false);
            }
        } else if pt == PieceType::King {
            self.unset_castling_rights(self.stm);
        }
        if to_pt == PieceType::Rook {
            let sq = self.castle_sq(!self.stm, to > self.king_sq(!self.stm));
            if to == sq {
                self.set_castling_rights(!self.stm, to, false);
            }
        }

        self.stm = !self.stm;

        self.full_hash ^= self.hash_castling();
        self.full_hash ^= zobrist::en_passant_key(self.ep_square);
        self.full_hash ^= zobrist::side_to_move_key();

        self.pos_history.push(self.full_hash);

        if self.stm == Color::White {
            self.fullmove_clock += 1;
        }

        self.update_check_pin();
    }

    pub fn make_move_str(&mut self, s: &str) -> bool {
        match Move::from_uci(s, self) {
            Some(m) => {
                self.make_move(m);
                true
            }
            None => false,
        }
    }

    pub fn can_null_move(&self) -> bool {
        // Back-to-back null moves, and pawn+king only endgames, are off limits
        if self.from_null {
            return false;
        }
        popcount(self.pieces(self.stm)) - popcount(self.pieces_cp(self.stm, PieceType::Pawn)) > 1
    }

    pub fn null_move(&mut self) {
        self.full_hash ^= zobrist::en_passant_key(self.ep_square);
        self.ep_square = NO_SQUARE;

        self.full_hash ^= zobrist::side_to_move_key();
        self.stm = !self.stm;

        self.pos_history.push(self.full_hash);

        self.from_null = true;
        self.update_check_pin();
    }

    // ***** LEGALITY *****

    /// Verifies a pseudo-legal move. Castling gets the full treatment, king
    /// moves recompute attacks without the king, en passant is made on a
    /// scratch board, everything else goes through check mask and pin rays.
    pub fn is_legal(&self, m: Move) -> bool {
        debug_assert!(!m.is_null());

        let from = m.from();
        let to = m.to();

        if m.type_of() == MoveType::Castle {
            if self.in_check() {
                return false;
            }

            let kingside = from < to;

            if !self.can_castle(self.stm, kingside) || self.castle_sq(self.stm, kingside) != to {
                return false;
            }
            if from != self.king_sq(self.stm) {
                return false;
            }
            if self.pinned & square_mask(to) != 0 {
                return false;
            }

            let idx = castle_index(self.stm, kingside);
            let king_end = KING_CASTLE_END_SQ[idx];
            let rook_end = ROOK_CASTLE_END_SQ[idx];

            let between = (line_seg(from, king_end) | line_seg(to, rook_end))
                ^ square_mask(from)
                ^ square_mask(to);
            if self.occupied() & between != 0 {
                return false;
            }

            let mut path = line_seg(from, king_end) ^ square_mask(from);
            while path != 0 {
                if self.is_under_attack(self.stm, pop_lsb(&mut path)) {
                    return false;
                }
            }

            return true;
        }

        let king_bb = self.pieces_cp(self.stm, PieceType::King);

        if king_bb & square_mask(from) != 0 {
            let occ = self.occupied() ^ king_bb;
            return !self.is_attacked_with_occ(self.stm, to, occ);
        }

        if m.type_of() == MoveType::EnPassant {
            let mut test = self.clone();
            test.make_move(m);
            return !test.is_under_attack(self.stm, test.king_sq(self.stm));
        }

        if square_mask(to) & !self.check_mask != 0 {
            return false;
        }

        self.pinned & square_mask(from) == 0 || line(from, to) & king_bb != 0
    }

    // ***** DRAWS *****

    pub fn is_draw(&self) -> bool {
        // 50 move rule, unless the position is already decided
        if self.halfmove_clock >= 100 {
            return !crate::movegen::generate_legal_moves(self).is_empty();
        }

        // Insufficient material
        if self.pieces_pt(PieceType::Pawn) == 0
            && self.pieces_pt(PieceType::Queen) == 0
            && self.pieces_pt(PieceType::Rook) == 0
            && ((self.pieces_pt(PieceType::Bishop) & LIGHT_SQUARES) == 0
                || (self.pieces_pt(PieceType::Bishop) & DARK_SQUARES) == 0)
            && (self.pieces_pt(PieceType::Bishop) == 0 || self.pieces_pt(PieceType::Knight) == 0)
            && popcount(self.pieces_pt(PieceType::Knight)) < 2
        {
            return true;
        }

        // Threefold
        let mut seen = 0;
        for &hash in &self.pos_history {
            seen += (hash == self.full_hash) as u32;
            if seen >= 3 {
                return true;
            }
        }
        false
    }

    // ***** STATIC EXCHANGE EVALUATION *****

    /// Swap-off simulation: does the exchange on `m` achieve at least
    /// `threshold`? Only standard captures are simulated; special moves
    /// resolve as `0 >= threshold`.
    pub fn see(&self, m: Move, threshold: i32) -> bool {
        if m.type_of() != MoveType::Standard {
            return 0 >= threshold;
        }

        let from = m.from();
        let to = m.to();

        let mut swap = piece_value(self.piece_on(to)) - threshold;
        if swap <= 0 {
            return false;
        }

        swap = piece_value(self.piece_on(from)) - swap;
        if swap <= 0 {
            return true;
        }

        let mut occ = self.occupied() ^ square_mask(from) ^ square_mask(to);
        let mut stm = self.stm;
        let mut attackers = self.attackers_to(to, occ);

        let mut res = 1;

        loop {
            stm = !stm;
            attackers &= occ;

            let mut stm_attackers = attackers & self.pieces(stm);
            if stm_attackers == 0 {
                break;
            }

            // Pinned attackers stay out while their pinners are on the board
            if self.pinners_per_c[stm.opposite() as usize] & occ != 0 {
                stm_attackers &= !self.pinned;
                if stm_attackers == 0 {
                    break;
                }
            }

            res ^= 1;

            // Least valuable attacker next, uncovering x-rays as we go
            let next = [
                PieceType::Pawn,
                PieceType::Knight,
                PieceType::Bishop,
                PieceType::Rook,
                PieceType::Queen,
            ]
            .into_iter()
            .find_map(|pt| {
                let bb = stm_attackers & self.pieces_pt(pt);
                (bb != 0).then_some((pt, bb))
            });

            let Some((pt, bb)) = next else {
                // King capture, flip if the enemy still has attackers
                return if attackers & !self.pieces(stm) != 0 { res == 0 } else { res == 1 };
            };

            swap = piece_value(pt) - swap;
            if swap < res {
                break;
            }
            occ ^= square_mask(lsb(bb));

            let diag = self.pieces_pt(PieceType::Bishop) | self.pieces_pt(PieceType::Queen);
            let straight = self.pieces_pt(PieceType::Rook) | self.pieces_pt(PieceType::Queen);
            match pt {
                PieceType::Pawn | PieceType::Bishop => {
                    attackers |= get_bishop_attacks(to, occ) & diag;
                }
                PieceType::Rook => {
                    attackers |= get_rook_attacks(to, occ) & straight;
                }
                PieceType::Queen => {
                    attackers |= (get_bishop_attacks(to, occ) & diag)
                        | (get_rook_attacks(to, occ) & straight);
                }
                _ => {}
            }
        }

        res == 1
    }

    // ***** FEN *****

    pub fn from_fen(fen: &str) -> Option<Self> {
        let mut pos = Self::empty();

        let tokens: Vec<&str> = fen.split_whitespace().collect();
        if tokens.len() < 4 {
            return None;
        }

        let mut sq = 56i32;
        for ch in tokens[0].chars() {
            match ch {
                '/' => sq -= 16,
                '1'..='8' => sq += ch as i32 - '0' as i32,
                _ => {
                    let (color, pt) = match ch {
                        'P' => (Color::White, PieceType::Pawn),
                        'N' => (Color::White, PieceType::Knight),
                        'B' => (Color::White, PieceType::Bishop),
                        'R' => (Color::White, PieceType::Rook),
                        'Q' => (Color::White, PieceType::Queen),
                        'K' => (Color::White, PieceType::King),
                        'p' => (Color::Black, PieceType::Pawn),
                        'n' => (Color::Black, PieceType::Knight),
                        'b' => (Color::Black, PieceType::Bishop),
                        'r' => (Color::Black, PieceType::Rook),
                        'q' => (Color::Black, PieceType::Queen),
                        'k' => (Color::Black, PieceType::King),
                        _ => return None,
                    };
                    if !(0..64).contains(&sq) {
                        return None;
                    }
                    let mask = 1u64 << sq;
                    pos.by_pieces[pt as usize] |= mask;
                    pos.by_color[color as usize] |= mask;
                    sq += 1;
                }
            }
        }

        if popcount(pos.pieces_cp(Color::White, PieceType::King)) != 1
            || popcount(pos.pieces_cp(Color::Black, PieceType::King)) != 1
        {
            return None;
        }

        pos.stm = match tokens[1] {
            "w" => Color::White,
            "b" => Color::Black,
            _ => return None,
        };

        pos.castling = [NO_SQUARE; 4];
        if tokens[2] != "-" {
            for ch in tokens[2].chars() {
                match ch {
                    // X-FEN: the right maps to the outermost rook on that wing
                    'K' => pos.castling[castle_index(Color::White, true)] =
                        pos.outermost_rook(Color::White, true)?,
                    'Q' => pos.castling[castle_index(Color::White, false)] =
                        pos.outermost_rook(Color::White, false)?,
                    'k' => pos.castling[castle_index(Color::Black, true)] =
                        pos.outermost_rook(Color::Black, true)?,
                    'q' => pos.castling[castle_index(Color::Black, false)] =
                        pos.outermost_rook(Color::Black, false)?,
                    // Shredder-FEN: case encodes color, letter the rook file
                    'A'..='H' => {
                        pos.chess960 = true;
                        let sq = to_square(0, ch as u8 - b'A');
                        pos.set_castling_rights_fen(Color::White, sq);
                    }
                    'a'..='h' => {
                        pos.chess960 = true;
                        let sq = to_square(7, ch as u8 - b'a');
                        pos.set_castling_rights_fen(Color::Black, sq);
                    }
                    _ => return None,
                }
            }
        }

        pos.ep_square = if tokens[3] == "-" {
            NO_SQUARE
        } else {
            algebraic_to_square(tokens[3])?
        };

        pos.halfmove_clock = tokens.get(4).and_then(|t| t.parse().ok()).unwrap_or(0);
        pos.fullmove_clock = tokens.get(5).and_then(|t| t.parse().ok()).unwrap_or(1);

        pos.reset_mailbox();
        pos.reset_hashes();
        pos.update_check_pin();

        pos.pos_history = vec![pos.full_hash];

        Some(pos)
    }

    fn outermost_rook(&self, c: Color, kingside: bool) -> Option<Square> {
        let king = self.king_sq(c);
        let rank = rank_of(king);
        let rooks = self.pieces_cp(c, PieceType::Rook) & (RANK_1 << (rank * 8));

        let candidates = if kingside {
            rooks & (FULL << king) & !square_mask(king)
        } else {
            rooks & !(FULL << king)
        };

        if candidates == 0 {
            return None;
        }

        Some(if kingside {
            63 - candidates.leading_zeros() as Square
        } else {
            lsb(candidates)
        })
    }

    fn set_castling_rights_fen(&mut self, c: Color, sq: Square) {
        let kingside = self.king_sq(c) < sq;
        self.castling[castle_index(c, kingside)] = sq;
    }

    pub fn fen(&self) -> String {
        let mut fen = String::with_capacity(90);

        for rank in (0..8).rev() {
            let mut empty = 0;
            for file in 0..8 {
                let sq = to_square(rank, file);
                let pt = self.piece_on(sq);
                if pt == PieceType::NoPiece {
                    empty += 1;
                    continue;
                }
                if empty > 0 {
                    fen.push((b'0' + empty) as char);
                    empty = 0;
                }
                let ch = match pt {
                    PieceType::Pawn => 'p',
                    PieceType::Knight => 'n',
                    PieceType::Bishop => 'b',
                    PieceType::Rook => 'r',
                    PieceType::Queen => 'q',
                    _ => 'k',
                };
                if self.pieces(Color::White) & square_mask(sq) != 0 {
                    fen.push(ch.to_ascii_uppercase());
                } else {
                    fen.push(ch);
                }
            }
            if empty > 0 {
                fen.push((b'0' + empty) as char);
            }
            if rank > 0 {
                fen.push('/');
            }
        }

        fen.push(' ');
        fen.push(if self.stm == Color::White { 'w' } else { 'b' });

        fen.push(' ');
        let mut rights = String::new();
        if self.chess960 {
            if self.can_castle(Color::White, true) {
                rights.push((b'A' + file_of(self.castle_sq(Color::White, true))) as char);
            }
            if self.can_castle(Color::White, false) {
                rights.push((b'A' + file_of(self.castle_sq(Color::White, false))) as char);
            }
            if self.can_castle(Color::Black, true) {
                rights.push((b'a' + file_of(self.castle_sq(Color::Black, true))) as char);
            }
            if self.can_castle(Color::Black, false) {
                rights.push((b'a' + file_of(self.castle_sq(Color::Black, false))) as char);
            }
        } else {
            if self.can_castle(Color::White, true) {
                rights.push('K');
            }
            if self.can_castle(Color::White, false) {
                rights.push('Q');
            }
            if self.can_castle(Color::Black, true) {
                rights.push('k');
            }
            if self.can_castle(Color::Black, false) {
                rights.push('q');
            }
        }
        fen.push_str(if rights.is_empty() { "-" } else { &rights });

        fen.push(' ');
        if self.ep_square != NO_SQUARE {
            fen.push_str(&square_to_algebraic(self.ep_square));
        } else {
            fen.push('-');
        }

        fen.push(' ');
        fen.push_str(&self.halfmove_clock.to_string());
        fen.push(' ');
        fen.push_str(&self.fullmove_clock.to_string());

        fen
    }

    pub fn display(&self) -> String {
        let mut out = String::new();
        out.push_str("  +-----------------+\n");
        for rank in (0..8).rev() {
            out.push_str(&format!("{} | ", rank + 1));
            for file in 0..8 {
                let sq = to_square(rank, file);
                let pt = self.piece_on(sq);
                let ch = match pt {
                    PieceType::Pawn => 'p',
                    PieceType::Knight => 'n',
                    PieceType::Bishop => 'b',
                    PieceType::Rook => 'r',
                    PieceType::Queen => 'q',
                    PieceType::King => 'k',
                    PieceType::NoPiece => '.',
                };
                let ch = if self.pieces(Color::White) & square_mask(sq) != 0 {
                    ch.to_ascii_uppercase()
                } else {
                    ch
                };
                out.push(ch);
                out.push(' ');
            }
            out.push_str("|\n");
        }
        out.push_str("  +-----------------+\n");
        out.push_str("    a b c d e f g h\n");
        out.push_str(&format!("FEN: {}\n", self.fen()));
        out.push_str(&format!("Hash: 0x{:016X}\n", self.full_hash));
        out
    }
}

use std::sync::atomic::Ordering;

use once_cell::sync::Lazy;

use crate::board::position::Position;
use crate::movegen::moves::{Move, MoveList};
use crate::movegen::{ALL_MOVES, NOISY_ONLY};
use crate::search::history::{ThreadData, ThreadType};
use crate::search::movepicker::MovePicker;
use crate::search::searcher::SharedState;
use crate::search::transposition::{
    score_from_tt, score_to_tt, TranspositionTable, FLAG_BETA_CUTOFF, FLAG_EXACT, FLAG_FAIL_LOW,
};
use crate::search::*;

#[derive(Clone)]
pub struct SearchStack {
    pub pv: PvList,
    pub static_eval: i32,
    pub excluded: Move,
}

impl Default for SearchStack {
    fn default() -> Self {
        Self {
            pv: PvList::new(),
            static_eval: 0,
            excluded: Move::null(),
        }
    }
}

const LMR_MOVES: usize = 256;

// Reduction factors for late move reduction, based on Weiss's formulas,
// scaled by 1024
static LMR_TABLE: Lazy<Vec<i32>> = Lazy::new(|| {
    let mut table = vec![0i32; 2 * (MAX_PLY + 1) * LMR_MOVES];
    for is_quiet in 0..2usize {
        for depth in 1..=MAX_PLY {
            for moves_seen in 1..LMR_MOVES {
                let (base, divisor) = if is_quiet == 1 {
                    (LMR_QUIET_CONST, LMR_QUIET_DIVISOR)
                } else {
                    (LMR_NOISY_CONST, LMR_NOISY_DIVISOR)
                };
                let reduction =
                    base + (depth as f64).ln() * (moves_seen as f64).ln() / divisor;
                table[(is_quiet * (MAX_PLY + 1) + depth) * LMR_MOVES + moves_seen] =
                    (reduction * 1024.0) as i32;
            }
        }
    }
    table
});

#[inline(always)]
fn lmr_reduction(is_quiet: bool, depth: i32, moves_searched: i32) -> i32 {
    let d = (depth.max(0) as usize).min(MAX_PLY);
    let n = (moves_searched.max(0) as usize).min(LMR_MOVES - 1);
    LMR_TABLE[(is_quiet as usize * (MAX_PLY + 1) + d) * LMR_MOVES + n]
}

/// Search over noisy moves only, until the position goes quiet.
fn qsearch<const IS_PV: bool>(
    board: &Position,
    ply: usize,
    mut alpha: i32,
    beta: i32,
    td: &mut ThreadData,
) -> i32 {
    let static_eval = td.static_eval(board);
    if ply >= MAX_PLY {
        return static_eval;
    }

    let mut best_score = static_eval;
    if best_score >= beta {
        return best_score;
    }
    if best_score > alpha {
        alpha = best_score;
    }

    let futility_score = best_score + QS_FUTILITY_MARGIN;

    let mut picker = MovePicker::new::<NOISY_ONLY>(board, td, Move::null(), ply);
    while let Some(m) = picker.next() {
        if !board.is_legal(m) {
            continue;
        }

        if !board.see(m, 0) {
            continue;
        }

        if !board.in_check() && board.is_capture(m) && futility_score <= alpha && !board.see(m, 1) {
            best_score = best_score.max(futility_score);
            continue;
        }

        let new_board = td.make_move(board, m);
        td.nodes.fetch_add(1, Ordering::Relaxed);

        let score = -qsearch::<IS_PV>(&new_board, ply + 1, -beta, -alpha, td);
        td.unmake();

        if score >= beta {
            return score;
        }
        if score > best_score {
            best_score = score;
            if score > alpha {
                alpha = score;
            }
        }
    }

    best_score
}

/// Alpha-beta with PVS, templated on PV-ness.
#[allow(clippy::too_many_arguments)]
pub fn search<const IS_PV: bool>(
    board: &Position,
    mut depth: i32,
    ply: usize,
    mut alpha: i32,
    mut beta: i32,
    stack: &mut [SearchStack],
    td: &mut ThreadData,
    tt: &TranspositionTable,
    sl: &SearchLimit,
) -> i32 {
    if depth + ply as i32 > MAX_PLY as i32 {
        depth = MAX_PLY as i32 - ply as i32;
    }
    if IS_PV {
        stack[ply].pv.clear();
    }
    if ply > td.seldepth {
        td.seldepth = ply;
    }
    if board.is_draw() && ply > 0 {
        return 0;
    }
    if depth <= 0 {
        return qsearch::<IS_PV>(board, ply, alpha, beta, td);
    }

    // Mate distance pruning
    if ply > 0 {
        alpha = alpha.max(-MATE_SCORE + ply as i32);
        beta = beta.min(MATE_SCORE - ply as i32 - 1);
        if alpha >= beta {
            return alpha;
        }
    }

    let mut best_move = Move::null();
    let mut best_score = -MATE_SCORE;

    let mut moves_seen = 0i32;
    let mut moves_searched = 0i32;

    let mut tt_flag = FLAG_FAIL_LOW;

    // TT probing; singular searches ignore the entry for their own node
    let excluded = stack[ply].excluded;
    let tt_entry = if excluded.is_null() { tt.probe(board.full_hash) } else { None };
    let tt_move = tt_entry.map_or(Move::null(), |e| e.mv);

    if !IS_PV {
        if let Some(entry) = tt_entry {
            if entry.depth >= depth
                && (entry.flag == FLAG_EXACT
                    || (entry.flag == FLAG_BETA_CUTOFF && entry.score >= beta)
                    || (entry.flag == FLAG_FAIL_LOW && entry.score <= alpha))
            {
                return score_from_tt(entry.score, ply);
            }
        }
    }

    stack[ply].static_eval = td.static_eval(board);
    let static_eval = stack[ply].static_eval;

    // Has the position improved since the last time stm was to move
    let improving = ply >= 2 && static_eval > stack[ply - 2].static_eval;

    // Pre-moveloop pruning
    if !IS_PV && ply > 0 && !board.in_check() && !is_loss(beta) && excluded.is_null() {
        // Reverse futility pruning
        let rfp_margin = RFP_DEPTH_SCALAR * (depth - improving as i32);
        if static_eval - rfp_margin >= beta && depth < 7 {
            return static_eval;
        }

        // Null move pruning
        if board.can_null_move() && static_eval >= beta {
            let new_board = td.make_null_move(board);
            let score = -search::<false>(
                &new_board,
                depth - NMP_DEPTH_REDUCTION,
                ply + 1,
                -beta,
                -beta + 1,
                stack,
                td,
                tt,
                sl,
            );
            td.unmake();

            if score >= beta {
                return score;
            }
        }
    }

    let mut skip_quiets = false;

    let mut bad_quiets = MoveList::new();
    let mut bad_noisies = MoveList::new();

    let mut picker = MovePicker::new::<ALL_MOVES>(board, td, tt_move, ply);
    while let Some(m) = picker.next() {
        // Check if the search has been aborted
        if td.break_flag.load(Ordering::Relaxed) {
            return best_score;
        }
        let nodes = td.nodes.load(Ordering::Relaxed);
        if sl.out_of_nodes(nodes) {
            td.break_flag.store(true, Ordering::Relaxed);
            return best_score;
        }
        if nodes % 2048 == 0 && sl.out_of_time() {
            td.break_flag.store(true, Ordering::Relaxed);
            return best_score;
        }

        if m == excluded {
            continue;
        }

        if !board.is_legal(m) {
            continue;
        }

        let quiet = board.is_quiet(m);
        if quiet && skip_quiets {
            continue;
        }

        moves_seen += 1;

        tt.prefetch(board.rough_key_after(m));

        // Moveloop pruning
        if ply > 0 && !is_loss(best_score) {
            // Futility pruning
            if !board.in_check()
                && depth < 6
                && quiet
                && static_eval + FUTILITY_PRUNING_MARGIN + FUTILITY_PRUNING_SCALAR * depth < alpha
            {
                skip_quiets = true;
                continue;
            }

            // SEE pruning
            let see_threshold = if quiet {
                -SEE_QUIET_SCALAR * depth * depth
            } else {
                -SEE_NOISY_SCALAR * depth
            };
            if !board.see(m, see_threshold) {
                continue;
            }
        }

        moves_searched += 1;

        let mut extension = 0i32;
        // Singular extensions: verify the TT move stands alone at reduced depth
        if let Some(entry) = tt_entry {
            if ply > 0
                && depth >= SE_MIN_DEPTH
                && m == tt_move
                && entry.depth >= depth - 3
                && entry.flag != FLAG_FAIL_LOW
            {
                let s_beta = (entry.score - depth * 2).max(-MATE_SCORE + 1);
                let s_depth = (depth - 1) / 2;

                stack[ply].excluded = m;
                let score =
                    search::<false>(board, s_depth, ply, s_beta - 1, s_beta, stack, td, tt, sl);
                stack[ply].excluded = Move::null();

                if score < s_beta {
                    extension = if !IS_PV && score < s_beta - SE_DOUBLE_MARGIN { 2 } else { 1 };
                } else if entry.score >= beta {
                    // Negative extension
                    extension = -2;
                }
            }
        }

        let new_board = td.make_move(board, m);
        td.nodes.fetch_add(1, Ordering::Relaxed);

        let new_depth = depth - 1 + extension;

        // Principal variation search
        let mut score = -MATE_SCORE;
        if depth >= 2 && moves_searched >= 5 + 2 * (ply == 0) as i32 && !new_board.in_check() {
            // Late move reduction
            let reduction =
                lmr_reduction(quiet, depth, moves_searched) + (!IS_PV) as i32 * LMR_NONPV;

            score = -search::<false>(
                &new_board,
                new_depth - reduction / 1024,
                ply + 1,
                -alpha - 1,
                -alpha,
                stack,
                td,
                tt,
                sl,
            );

            if score > alpha {
                score = -search::<false>(
                    &new_board,
                    new_depth,
                    ply + 1,
                    -alpha - 1,
                    -alpha,
                    stack,
                    td,
                    tt,
                    sl,
                );
            }
        } else if !IS_PV || moves_searched > 1 {
            score = -search::<false>(
                &new_board,
                new_depth,
                ply + 1,
                -alpha - 1,
                -alpha,
                stack,
                td,
                tt,
                sl,
            );
        }
        if IS_PV && (moves_searched == 1 || score > alpha) {
            score = -search::<true>(
                &new_board,
                new_depth,
                ply + 1,
                -beta,
                -alpha,
                stack,
                td,
                tt,
                sl,
            );
        }

        td.unmake();

        if score > best_score {
            best_score = score;
            if best_score > alpha {
                best_move = m;
                tt_flag = FLAG_EXACT;
                alpha = best_score;
                if IS_PV {
                    let (head, tail) = stack.split_at_mut(ply + 1);
                    head[ply].pv.update(m, &tail[0].pv);
                }
            }
        }
        if score >= beta {
            tt_flag = FLAG_BETA_CUTOFF;

            // Update histories: reward the cutoff move, punish the tried ones
            let bonus =
                (HIST_BONUS_A * depth * depth + HIST_BONUS_B * depth + HIST_BONUS_C) / 1024;
            td.history_bonus(board, m, bonus);
            if quiet {
                td.update_killers(ply, m);
            }
            for &bad_quiet in &bad_quiets {
                td.history_mut(board, bad_quiet).update(-bonus, MAX_HISTORY);
            }
            for &bad_noisy in &bad_noisies {
                td.capthist_mut(board, bad_noisy).update(-bonus, MAX_HISTORY);
            }

            break;
        }

        if best_move != m {
            if quiet {
                bad_quiets.add(m);
            } else {
                bad_noisies.add(m);
            }
        }
    }

    // Checkmate/stalemate detection
    if moves_seen == 0 {
        if board.in_check() {
            return -MATE_SCORE + ply as i32;
        }
        return 0;
    }

    let aborted = td.break_flag.load(Ordering::Relaxed);

    if excluded.is_null() && !aborted {
        // Train the pawn correction toward the search result at calm nodes
        if !board.in_check()
            && !is_decisive(best_score)
            && (best_move.is_null() || board.is_quiet(best_move))
            && !(tt_flag == FLAG_BETA_CUTOFF && best_score <= static_eval)
            && !(tt_flag == FLAG_FAIL_LOW && best_score >= static_eval)
        {
            td.update_corrhist(board, depth, best_score - static_eval);
        }

        tt.store(
            board.full_hash,
            best_move,
            tt_flag,
            score_to_tt(best_score, ply),
            depth,
        );
    }

    best_score
}

/// Drives the search through increasing depths, publishing each completed
/// iteration and honoring the soft limits between them.
pub fn iterative_deepening(
    board: Position,
    td: &mut ThreadData,
    sp: &SearchParams,
    shared: &SharedState,
    tt: &TranspositionTable,
) -> (Move, i32) {
    td.nodes.store(0, Ordering::Relaxed);
    td.refresh(&board);
    let is_main = td.ttype == ThreadType::Main;

    // Time management
    let (time, inc) = match board.stm {
        crate::board::position::Color::White => (sp.wtime as i64, sp.winc as i64),
        crate::board::position::Color::Black => (sp.btime as i64, sp.binc as i64),
    };

    let mut search_time = if sp.mtime > 0 {
        sp.mtime as i64
    } else {
        time / 20 + inc / 2
    };

    if time != 0 || inc != 0 {
        search_time = (search_time - sp.move_overhead as i64).max(1);
    }

    let soft_time = (search_time as f64 * 0.6) as i64;

    // Depth 1 always completes, so it runs without a time limit
    let depth_one_sl = SearchLimit::new(sp.start, 0, sp.nodes);
    let main_sl = SearchLimit::new(sp.start, search_time, sp.nodes);

    let mut stack = vec![SearchStack::default(); MAX_PLY + 3];

    let search_depth = sp.depth.clamp(1, MAX_PLY);

    let mut last_score = 0;

    for curr_depth in 1..=search_depth {
        let sl = if curr_depth == 1 { &depth_one_sl } else { &main_sl };

        let score = search::<true>(
            &board,
            curr_depth as i32,
            0,
            -MATE_SCORE,
            MATE_SCORE,
            &mut stack,
            td,
            tt,
            sl,
        );

        let nodes = td.nodes.load(Ordering::Relaxed);
        let cancelled = if is_main {
            sl.out_of_nodes(nodes)
                || sl.out_of_time()
                || td.break_flag.load(Ordering::Relaxed)
        } else {
            td.break_flag.load(Ordering::Relaxed)
                || (sp.soft_nodes > 0 && nodes > sp.soft_nodes)
        };

        if curr_depth > 1 && cancelled {
            break;
        }

        last_score = score;

        if is_main {
            shared.publish(curr_depth, td.seldepth, score, &stack[0].pv);
        }

        if curr_depth == 1 && cancelled {
            break;
        }

        if is_main {
            if sp.report {
                shared.report_uci(&board, sp);
            }

            // Soft nodes
            if sp.soft_nodes > 0 && td.nodes.load(Ordering::Relaxed) > sp.soft_nodes {
                break;
            }
            // Go mate
            if sp.mate > 0 && is_win(score) && (MATE_SCORE - score + 1) / 2 <= sp.mate as i32 {
                break;
            }
            // Soft time
            if soft_time > 0 && sp.start.elapsed().as_millis() as i64 >= soft_time {
                break;
            }
        }
    }

    let best = shared.best_move();

    if is_main {
        if sp.report {
            println!("info nodes {}", shared.total_nodes());
            println!("bestmove {}", best.to_uci(&board));
        }
        td.break_flag.store(true, Ordering::Relaxed);
    }

    (best, last_score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::searcher::SharedState;
    use std::sync::Arc;

    fn run_search(fen: &str, depth: usize) -> (Move, i32, Position) {
        let shared = Arc::new(SharedState::new(1, 16, Arc::new(crate::nnue::Network::zeroed())));
        let mut td = shared.thread_data(0, ThreadType::Main);
        let board = Position::from_fen(fen).unwrap();

        let mut sp = SearchParams::depth_only(depth);
        sp.report = false;

        shared.stop.store(false, Ordering::Relaxed);
        let (m, score) = iterative_deepening(board.clone(), &mut td, &sp, &shared, &shared.tt);
        (m, score, board)
    }

    #[test]
    fn test_finds_mate_in_one() {
        let (m, score, pos) = run_search("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1", 4);
        assert_eq!(m.to_uci(&pos), "a1a8");
        assert_eq!(score, MATE_SCORE - 1);
    }

    #[test]
    fn test_finds_mate_in_two() {
        // Back rank: Ra8+ Rxa8 is refuted, Qb8+ forces mate... keep it simple:
        // two rooks ladder mate
        let (_, score, _) = run_search("7k/8/8/8/8/8/R7/1R5K w - - 0 1", 6);
        assert!(is_win(score));
    }

    #[test]
    fn test_stalemate_scores_zero() {
        let (_, score, _) = run_search("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1", 2);
        assert_eq!(score, 0);
    }

    #[test]
    fn test_mated_side_sees_the_loss() {
        // Black to move, already mated next move whatever happens
        let (_, score, _) = run_search("R5k1/5ppp/8/8/8/6N1/5PPP/6K1 b - - 0 1", 2);
        assert!(score <= 0 || is_loss(score));
    }

    #[test]
    fn test_score_stays_within_mate_bounds() {
        for fen in [
            "6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1",
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "8/8/8/4k3/8/8/4P3/4K3 w - - 0 1",
        ] {
            let (_, score, _) = run_search(fen, 5);
            assert!(score >= -MATE_SCORE && score <= MATE_SCORE);
        }
    }

    #[test]
    fn test_startpos_bestmove_is_legal() {
        // With zeroed weights every quiet scores alike, so only legality is
        // asserted here; move quality needs a trained network
        let (m, score, pos) = run_search(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            6,
        );
        assert!(!m.is_null());
        assert!(pos.is_legal(m));
        assert!(!is_decisive(score));
    }

    #[test]
    fn test_lmr_table_shape() {
        assert_eq!(lmr_reduction(true, 0, 10), 0);
        assert_eq!(lmr_reduction(true, 10, 0), 0);
        // Deeper and later means bigger reductions
        assert!(lmr_reduction(true, 8, 20) > lmr_reduction(true, 2, 5));
        // Quiets reduce harder than noisies
        assert!(lmr_reduction(true, 8, 20) > lmr_reduction(false, 8, 20));
    }

    #[test]
    fn test_tt_bounds_are_honest_at_shallow_depth() {
        // Compare against a plain minimax of the same depth
        fn minimax(pos: &Position, depth: i32) -> i32 {
            if pos.is_draw() {
                return 0;
            }
            let moves = crate::movegen::generate_legal_moves(pos);
            if moves.is_empty() {
                return if pos.in_check() { -MATE_SCORE } else { 0 };
            }
            if depth == 0 {
                return 0; // zeroed network: every quiet eval is 0
            }
            let mut best = -MATE_SCORE;
            for &m in &moves {
                let mut next = pos.clone();
                next.make_move(m);
                best = best.max(-minimax(&next, depth - 1));
            }
            best
        }

        // Mate-in-one position: both agree the score is winning
        let pos = Position::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1").unwrap();
        let reference = minimax(&pos, 2);
        assert!(is_win(reference));

        let (_, score, _) = run_search("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1", 3);
        assert!(is_win(score));
    }
}

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use crate::board::position::Position;
use crate::movegen::moves::Move;
use crate::nnue::Network;
use crate::search::alphabeta::iterative_deepening;
use crate::search::history::{ThreadData, ThreadType};
use crate::search::transposition::TranspositionTable;
use crate::search::{is_decisive, PvList, SearchParams, MATE_SCORE};

/// Last completed iteration, published by the main worker under the lock.
pub struct Report {
    pub depth: usize,
    pub seldepth: usize,
    pub score: i32,
    pub pv: PvList,
}

impl Report {
    fn new() -> Self {
        Self {
            depth: 0,
            seldepth: 0,
            score: 0,
            pv: PvList::new(),
        }
    }
}

/// State shared by the worker pool: control flags, the root position and
/// limits for the current search, the TT, and the published report.
pub struct SharedState {
    // Arc'd so each worker can hold it as its break flag
    pub stop: Arc<AtomicBool>,
    pub kill: AtomicBool,
    pub active: AtomicUsize,

    pub board: Mutex<Position>,
    pub params: Mutex<SearchParams>,
    pub report: Mutex<Report>,

    pub tt: TranspositionTable,
    pub network: RwLock<Arc<Network>>,
    pub node_counters: Vec<Arc<AtomicU64>>,
}

impl SharedState {
    pub fn new(threads: usize, tt_mib: usize, network: Arc<Network>) -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(true)),
            kill: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            board: Mutex::new(Position::startpos()),
            params: Mutex::new(SearchParams::default()),
            report: Mutex::new(Report::new()),
            tt: TranspositionTable::new(tt_mib),
            network: RwLock::new(network),
            node_counters: (0..threads).map(|_| Arc::new(AtomicU64::new(0))).collect(),
        }
    }

    /// Builds the per-worker state tied to this pool. The pool's stop flag
    /// doubles as every worker's break flag.
    pub fn thread_data(&self, index: usize, ttype: ThreadType) -> ThreadData {
        ThreadData::new(
            ttype,
            Arc::clone(&self.stop),
            Arc::clone(&self.node_counters[index]),
            self.network.read().unwrap().clone(),
        )
    }

    pub fn total_nodes(&self) -> u64 {
        self.node_counters
            .iter()
            .map(|n| n.load(Ordering::Relaxed))
            .sum()
    }

    pub fn publish(&self, depth: usize, seldepth: usize, score: i32, pv: &PvList) {
        let mut report = self.report.lock().unwrap();
        report.depth = depth;
        report.seldepth = seldepth;
        report.score = score;
        report.pv = pv.clone();
    }

    pub fn best_move(&self) -> Move {
        self.report.lock().unwrap().pv.best()
    }

    /// Prints the standard `info` line for the last published iteration.
    pub fn report_uci(&self, board: &Position, sp: &SearchParams) {
        let nodes = self.total_nodes();
        let elapsed = sp.start.elapsed().as_millis() as u64;

        let report = self.report.lock().unwrap();

        let mut line = format!(
            "info depth {} seldepth {} time {} nodes {} nps {} hashfull {}",
            report.depth,
            report.seldepth,
            elapsed,
            nodes,
            nodes * 1000 / (elapsed + 1),
            self.tt.hashfull()
        );

        if is_decisive(report.score) {
            let mate_moves = (MATE_SCORE - report.score.abs()) / 2 + 1;
            let signed = if report.score > 0 { mate_moves } else { -mate_moves };
            line.push_str(&format!(" score mate {}", signed));
        } else {
            line.push_str(&format!(" score cp {}", report.score));
        }

        line.push_str(" pv");
        for m in report.pv.iter() {
            line.push(' ');
            line.push_str(&m.to_uci(board));
        }

        println!("{}", line);
    }
}

/// The worker pool. Threads are spawned once and parked on `stop`; changing
/// the thread count or TT size rebuilds the pool.
pub struct Searcher {
    shared: Arc<SharedState>,
    workers: Vec<JoinHandle<()>>,
    threads: usize,
    tt_mib: usize,
}

impl Searcher {
    pub fn new(threads: usize, tt_mib: usize, network: Arc<Network>) -> Self {
        let threads = threads.max(1);
        let shared = Arc::new(SharedState::new(threads, tt_mib, network));
        let workers = spawn_workers(&shared, threads);
        Self {
            shared,
            workers,
            threads,
            tt_mib,
        }
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// Stores the search inputs and releases the pool.
    pub fn start(&self, board: &Position, sp: SearchParams) {
        self.stop();

        *self.shared.board.lock().unwrap() = board.clone();
        *self.shared.params.lock().unwrap() = sp;
        *self.shared.report.lock().unwrap() = Report::new();
        for counter in &self.shared.node_counters {
            counter.store(0, Ordering::Relaxed);
        }

        self.shared.stop.store(false, Ordering::Release);
    }

    /// Signals the workers to abort and waits for them to park.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        while self.shared.active.load(Ordering::Acquire) > 0 {
            std::thread::yield_now();
        }
    }

    /// Blocks until the main worker declares the search over.
    pub fn wait_until_finished(&self) {
        while !self.shared.stop.load(Ordering::Acquire) {
            std::thread::yield_now();
        }
        while self.shared.active.load(Ordering::Acquire) > 0 {
            std::thread::yield_now();
        }
    }

    pub fn set_threads(&mut self, threads: usize) {
        self.rebuild(threads, self.tt_mib);
    }

    pub fn resize_tt(&mut self, tt_mib: usize) {
        self.rebuild(self.threads, tt_mib);
    }

    /// Fresh pool: new histories, new TT. Used for `ucinewgame`.
    pub fn reset(&mut self) {
        self.rebuild(self.threads, self.tt_mib);
    }

    pub fn set_network(&self, network: Arc<Network>) {
        *self.shared.network.write().unwrap() = network;
    }

    pub fn total_nodes(&self) -> u64 {
        self.shared.total_nodes()
    }

    fn rebuild(&mut self, threads: usize, tt_mib: usize) {
        let threads = threads.max(1);
        self.shutdown();
        let network = self.shared.network.read().unwrap().clone();
        self.shared = Arc::new(SharedState::new(threads, tt_mib, network));
        self.workers = spawn_workers(&self.shared, threads);
        self.threads = threads;
        self.tt_mib = tt_mib;
    }

    fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.kill.store(true, Ordering::Release);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for Searcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_workers(shared: &Arc<SharedState>, threads: usize) -> Vec<JoinHandle<()>> {
    (0..threads.max(1))
        .map(|i| {
            let shared = Arc::clone(shared);
            std::thread::spawn(move || {
                let ttype = if i == 0 { ThreadType::Main } else { ThreadType::Secondary };
                let mut td = shared.thread_data(i, ttype);
                run_worker(&shared, &mut td);
            })
        })
        .collect()
}

fn run_worker(shared: &Arc<SharedState>, td: &mut ThreadData) {
    loop {
        while shared.stop.load(Ordering::Acquire) {
            if shared.kill.load(Ordering::Acquire) {
                return;
            }
            std::thread::yield_now();
        }

        shared.active.fetch_add(1, Ordering::AcqRel);

        let board = shared.board.lock().unwrap().clone();
        let sp = shared.params.lock().unwrap().clone();
        td.network = shared.network.read().unwrap().clone();

        iterative_deepening(board, td, &sp, shared, &shared.tt);

        shared.active.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn quiet_params(depth: usize) -> SearchParams {
        let mut sp = SearchParams::depth_only(depth);
        sp.report = false;
        sp
    }

    #[test]
    fn test_pool_runs_and_parks() {
        let searcher = Searcher::new(1, 16, Arc::new(Network::zeroed()));
        let board = Position::startpos();

        searcher.start(&board, quiet_params(5));
        searcher.wait_until_finished();

        let report = searcher.shared().report.lock().unwrap();
        assert_eq!(report.depth, 5);
        assert!(report.pv.length > 0);
        drop(report);

        assert!(searcher.total_nodes() > 0);
    }

    #[test]
    fn test_stop_interrupts_search() {
        let searcher = Searcher::new(1, 16, Arc::new(Network::zeroed()));
        let board = Position::startpos();

        searcher.start(&board, quiet_params(crate::search::MAX_PLY));
        std::thread::sleep(Duration::from_millis(50));

        let begun = Instant::now();
        searcher.stop();
        assert!(begun.elapsed() < Duration::from_secs(2));

        // Depth 1 always completes, so a best move exists
        assert!(searcher.shared().report.lock().unwrap().depth >= 1);
    }

    #[test]
    fn test_restart_after_stop() {
        let searcher = Searcher::new(2, 16, Arc::new(Network::zeroed()));
        let board = Position::startpos();

        searcher.start(&board, quiet_params(4));
        searcher.wait_until_finished();
        let first = searcher.shared().best_move();
        assert!(!first.is_null() && board.is_legal(first));

        // The pool accepts a second search without respawning
        searcher.start(&board, quiet_params(4));
        searcher.wait_until_finished();
        let second = searcher.shared().best_move();
        assert!(!second.is_null() && board.is_legal(second));
    }

    #[test]
    fn test_set_threads_rebuilds() {
        let mut searcher = Searcher::new(1, 16, Arc::new(Network::zeroed()));
        searcher.set_threads(3);

        let board = Position::startpos();
        searcher.start(&board, quiet_params(4));
        searcher.wait_until_finished();
        assert!(searcher.total_nodes() > 0);
    }

    #[test]
    fn test_node_limit_is_hard() {
        let searcher = Searcher::new(1, 16, Arc::new(Network::zeroed()));
        let board = Position::startpos();

        let mut sp = quiet_params(crate::search::MAX_PLY);
        sp.nodes = 10_000;
        searcher.start(&board, sp);
        searcher.wait_until_finished();

        // Overshoot is bounded by one move-loop iteration per ply
        assert!(searcher.total_nodes() < 20_000);
    }
}

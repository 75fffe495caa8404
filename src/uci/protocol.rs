use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Instant;

use crate::board::position::Position;
use crate::movegen::{generate_moves, perft, ALL_MOVES};
use crate::nnue::Network;
use crate::search::searcher::Searcher;
use crate::search::{SearchParams, MAX_PLY};

const ENGINE_NAME: &str = "Lazarus";
const ENGINE_AUTHOR: &str = "the Lazarus developers";

const DEFAULT_TT_SIZE_MB: usize = 16;
const MIN_TT_SIZE_MB: usize = 1;
const MAX_TT_SIZE_MB: usize = 524288;
const MAX_THREADS: usize = 2048;

pub struct UciEngine {
    board: Position,
    searcher: Searcher,
    move_overhead: u64,
    softnodes: bool,
    chess960: bool,
}

impl UciEngine {
    pub fn new() -> Self {
        let network = Arc::new(Network::embedded().unwrap_or_else(|| {
            eprintln!("no embedded network, evaluator weights left zeroed");
            Network::zeroed()
        }));

        Self {
            board: Position::startpos(),
            searcher: Searcher::new(1, DEFAULT_TT_SIZE_MB, network),
            move_overhead: 20,
            softnodes: false,
            chess960: false,
        }
    }

    pub fn run(&mut self) {
        println!("{} ready", ENGINE_NAME);

        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let command = match line {
                Ok(c) => c,
                Err(_) => break,
            };
            let command = command.trim();
            if command.is_empty() {
                continue;
            }

            if !self.handle_command(command) {
                break;
            }
            io::stdout().flush().ok();
        }
    }

    /// Returns false when the loop should exit.
    fn handle_command(&mut self, command: &str) -> bool {
        let received = Instant::now();
        let tokens: Vec<&str> = command.split_whitespace().collect();

        match tokens[0] {
            "uci" => self.uci_command(),
            "isready" => println!("readyok"),
            "ucinewgame" => {
                self.searcher.stop();
                self.searcher.reset();
            }
            "position" => self.position_command(&tokens),
            "go" => self.go_command(command, received),
            "setoption" => self.setoption_command(&tokens),
            "stop" => self.searcher.stop(),
            "wait" => self.searcher.wait_until_finished(),
            "quit" => {
                self.searcher.stop();
                return false;
            }

            // Debug extras, not part of the UCI surface
            "d" => print!("{}", self.board.display()),
            "perft" => {
                if let Some(depth) = tokens.get(1).and_then(|t| t.parse().ok()) {
                    let start = Instant::now();
                    let nodes = perft(&self.board, depth);
                    println!(
                        "nodes {} time {}ms",
                        nodes,
                        start.elapsed().as_millis()
                    );
                } else {
                    println!("Usage: perft <depth>");
                }
            }
            "moves" => {
                for &m in &generate_moves::<ALL_MOVES>(&self.board) {
                    let tag = if self.board.is_legal(m) { "legal" } else { "illegal" };
                    println!("{} <- {}", m.to_uci(&self.board), tag);
                }
            }
            "eval" => {
                let network = self.searcher.shared().network.read().unwrap().clone();
                let mut acc = crate::nnue::AccumulatorPair::default();
                acc.reset(&self.board, &network);
                println!("Raw eval: {}", network.forward(&self.board, &acc));
            }
            _ => eprintln!("Unknown command: {}", command),
        }

        true
    }

    fn uci_command(&self) {
        println!("id name {}", ENGINE_NAME);
        println!("id author {}", ENGINE_AUTHOR);
        println!(
            "option name Threads type spin default 1 min 1 max {}",
            MAX_THREADS
        );
        println!(
            "option name Hash type spin default {} min {} max {}",
            DEFAULT_TT_SIZE_MB, MIN_TT_SIZE_MB, MAX_TT_SIZE_MB
        );
        println!("option name Move Overhead type spin default 20 min 0 max 1000");
        println!("option name EvalFile type string default internal");
        println!("option name UCI_Chess960 type check default false");
        println!("option name Softnodes type check default false");
        println!("uciok");
    }

    fn position_command(&mut self, tokens: &[&str]) {
        self.searcher.stop();

        if tokens.len() < 2 {
            return;
        }

        let moves_at = tokens.iter().position(|&t| t == "moves");

        let parsed = match tokens[1] {
            "startpos" => Some(Position::startpos()),
            "kiwipete" => Position::from_fen(
                "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            ),
            "fen" => {
                let end = moves_at.unwrap_or(tokens.len());
                let fen = tokens[2..end].join(" ");
                Position::from_fen(&fen)
            }
            _ => None,
        };

        let Some(mut board) = parsed else {
            eprintln!("Invalid position: {}", tokens.join(" "));
            return;
        };

        board.chess960 |= self.chess960;

        if let Some(at) = moves_at {
            for &s in &tokens[at + 1..] {
                if !board.make_move_str(s) {
                    eprintln!("Invalid move: {}", s);
                    return;
                }
            }
        }

        self.board = board;
    }

    fn go_command(&mut self, command: &str, received: Instant) {
        self.searcher.stop();

        let value_after = |key: &str| -> u64 {
            let mut it = command.split_whitespace();
            while let Some(token) = it.next() {
                if token == key {
                    return it.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                }
            }
            0
        };

        let depth = {
            let d = value_after("depth");
            if d == 0 {
                MAX_PLY
            } else {
                d as usize
            }
        };

        let mut nodes = value_after("nodes");
        let mut soft_nodes = value_after("softnodes");

        if self.softnodes && nodes > 0 {
            soft_nodes = nodes;
            nodes = 0;
        }

        let sp = SearchParams {
            start: received,
            depth,
            nodes,
            soft_nodes,
            mtime: value_after("movetime"),
            wtime: value_after("wtime"),
            btime: value_after("btime"),
            winc: value_after("winc"),
            binc: value_after("binc"),
            mate: value_after("mate") as usize,
            move_overhead: self.move_overhead,
            report: true,
        };

        self.searcher.start(&self.board, sp);
    }

    fn setoption_command(&mut self, tokens: &[&str]) {
        self.searcher.stop();

        let name_at = tokens.iter().position(|&t| t == "name");
        let value_at = tokens.iter().position(|&t| t == "value");
        let (Some(name_at), Some(value_at)) = (name_at, value_at) else {
            eprintln!("Malformed setoption: {}", tokens.join(" "));
            return;
        };

        let name = tokens[name_at + 1..value_at].join(" ");
        let value = tokens[value_at + 1..].join(" ");

        match name.as_str() {
            "Threads" => match value.parse::<usize>() {
                Ok(n) if (1..=MAX_THREADS).contains(&n) => self.searcher.set_threads(n),
                _ => eprintln!("Threads out of range: {}", value),
            },
            "Hash" => match value.parse::<usize>() {
                Ok(mb) if (MIN_TT_SIZE_MB..=MAX_TT_SIZE_MB).contains(&mb) => {
                    self.searcher.resize_tt(mb)
                }
                _ => eprintln!("Hash out of range: {}", value),
            },
            "Move Overhead" => match value.parse::<u64>() {
                Ok(ms) if ms <= 1000 => self.move_overhead = ms,
                _ => eprintln!("Move Overhead out of range: {}", value),
            },
            "EvalFile" => self.load_network(&value),
            "UCI_Chess960" => {
                self.chess960 = value == "true";
                self.board.chess960 = self.chess960 || self.board.chess960;
            }
            "Softnodes" => self.softnodes = value == "true",
            _ => eprintln!("Unknown option: {}", name),
        }
    }

    fn load_network(&mut self, value: &str) {
        if value == "internal" {
            let network = Network::embedded().unwrap_or_else(|| {
                eprintln!("no embedded network, evaluator weights left zeroed");
                Network::zeroed()
            });
            self.searcher.set_network(Arc::new(network));
            return;
        }

        match Network::from_file(value) {
            Ok(network) => self.searcher.set_network(Arc::new(network)),
            // Keep whatever weights are loaded
            Err(e) => eprintln!("warning: failed to load network {}: {:#}", value, e),
        }
    }
}

impl Default for UciEngine {
    fn default() -> Self {
        Self::new()
    }
}

pub fn run_uci() {
    UciEngine::new().run();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::position::Color;

    fn engine() -> UciEngine {
        UciEngine::new()
    }

    #[test]
    fn test_position_startpos_with_moves() {
        let mut e = engine();
        e.handle_command("position startpos moves e2e4 e7e5 g1f3");
        assert_eq!(e.board.stm, Color::Black);
        assert_eq!(e.board.fullmove_clock, 2);
    }

    #[test]
    fn test_position_fen() {
        let mut e = engine();
        e.handle_command("position fen 6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1");
        assert_eq!(e.board.fen(), "6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1");
    }

    #[test]
    fn test_invalid_fen_keeps_old_position() {
        let mut e = engine();
        let before = e.board.fen();
        e.handle_command("position fen this/is/not/a/fen w - - 0 1");
        assert_eq!(e.board.fen(), before);
    }

    #[test]
    fn test_invalid_move_keeps_old_position() {
        let mut e = engine();
        let before = e.board.fen();
        e.handle_command("position startpos moves zzzz");
        assert_eq!(e.board.fen(), before);
    }

    #[test]
    fn test_setoption_chess960_flags_board() {
        let mut e = engine();
        e.handle_command("setoption name UCI_Chess960 value true");
        e.handle_command("position fen bqnr1krb/pppppppp/8/8/8/8/PPPPPPPP/BQNR1KRB w GDgd - 0 1");
        assert!(e.board.chess960);

        // King-to-rook castling applies cleanly
        e.handle_command(
            "position fen bqnr1krb/pppppppp/8/8/8/8/PPPPPPPP/BQNR1KRB w GDgd - 0 1 moves f1g1",
        );
        assert_eq!(e.board.king_sq(Color::White), 6);
    }

    #[test]
    fn test_go_depth_search_completes() {
        let mut e = engine();
        e.handle_command("position fen 6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1");
        e.handle_command("go depth 4");
        e.searcher.wait_until_finished();

        let best = e.searcher.shared().best_move();
        assert_eq!(best.to_uci(&e.board), "a1a8");

        let report = e.searcher.shared().report.lock().unwrap();
        assert_eq!(report.score, crate::search::MATE_SCORE - 1);
    }

    #[test]
    fn test_softnodes_reinterprets_nodes() {
        let mut e = engine();
        e.handle_command("setoption name Softnodes value true");
        e.handle_command("go nodes 5000");
        e.searcher.wait_until_finished();
        let sp = e.searcher.shared().params.lock().unwrap();
        assert_eq!(sp.nodes, 0);
        assert_eq!(sp.soft_nodes, 5000);
    }

    #[test]
    fn test_quit_exits_loop() {
        let mut e = engine();
        assert!(!e.handle_command("quit"));
        assert!(e.handle_command("isready"));
    }
}

use lazarus::search::bench::bench;
use lazarus::uci::run_uci;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "bench" => bench(),
            other => eprintln!("Unknown argument: {}", other),
        }
        return;
    }

    run_uci();
}

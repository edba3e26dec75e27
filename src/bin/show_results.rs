use codegen_benchmark_rs::benchmark_utils::*;
use std::env;
use std::path::Path;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <results.json>", args[0]);
        std::process::exit(1);
    }

    let results_path = Path::new(&args[1]);
    if !results_path.is_file() {
        eprintln!("Error: {} is not a valid file.", results_path.display());
        std::process::exit(1);
    }

    match read_cell_reports(results_path) {
        Ok(reports) => print_cell_reports(&reports),
        Err(e) => {
            eprintln!("Error parsing results file '{}': {}", results_path.display(), e);
            std::process::exit(1);
        }
    }
}

use std::path::PathBuf;
use std::{fs, process};

use clap::Parser;
use crossfill::{render_text, solve, Grid, Vocabulary};

/// Fill a crossword structure with words from a word list.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Structure template file: `#` for blocked cells, `.` or `_` for
    /// fillable cells.
    structure: PathBuf,

    /// Word list file, one word per line.
    words: PathBuf,

    /// Write the rendered grid to this file as well as printing it.
    output: Option<PathBuf>,
}

fn load_vocabulary(path: &PathBuf) -> Vocabulary {
    let contents =
        fs::read_to_string(path).expect("Something went wrong reading the word list");

    Vocabulary::new(
        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_uppercase),
    )
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let template =
        fs::read_to_string(&args.structure).expect("Something went wrong reading the structure");
    let grid = Grid::parse(&template).unwrap_or_else(|err| {
        eprintln!("bad structure {}: {err}", args.structure.display());
        process::exit(1);
    });

    let vocab = load_vocabulary(&args.words);

    match solve(&grid, &vocab) {
        Some(assignment) => {
            let rendered = render_text(&assignment, &grid);
            print!("{rendered}");

            if let Some(output) = &args.output {
                fs::write(output, &rendered).expect("Unable to write output file");
            }
        }
        None => println!("No solution."),
    }
}

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::PathBuf;

use taxkmer_rs::{build_index, classify_files, IndexOptions, SearchOptions};

/// K-mer based taxonomic index builder and classifier
#[derive(Debug, Parser)]
#[command(name = "taxkmer", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build an index from FASTA/FASTQ records named `K#..;P#..;...;S#..`
    Build {
        /// Labeled input files (.gz accepted)
        #[arg(short = 'i', long = "input", required = true)]
        inputs: Vec<PathBuf>,

        /// Directory to write the index tables to
        #[arg(short = 'o', long)]
        output_dir: PathBuf,

        /// File name prefix for the index tables
        #[arg(short = 'p', long)]
        prefix: String,

        /// K-mer length (1-12)
        #[arg(short = 'k', long, default_value_t = 8)]
        kmer_size: usize,

        /// Distance between k-mer window starts (1-12)
        #[arg(short = 's', long, default_value_t = 1)]
        step_size: usize,

        /// Skip records with a malformed lineage or invalid residue
        #[arg(long)]
        skip_invalid: bool,
    },

    /// Classify FASTA/FASTQ queries against a saved index
    Classify {
        /// Query files (.gz accepted)
        #[arg(short = 'i', long = "input", required = true)]
        inputs: Vec<PathBuf>,

        /// Directory holding the index tables
        #[arg(short = 'd', long)]
        dir: PathBuf,

        /// File name prefix of the index tables
        #[arg(short = 'p', long)]
        prefix: String,

        /// K-mer length used when the index was built
        #[arg(short = 'k', long, default_value_t = 8)]
        kmer_size: usize,

        /// Step size used when the index was built
        #[arg(short = 's', long, default_value_t = 1)]
        step_size: usize,

        /// Fraction of hits that must agree on a name
        #[arg(short = 'c', long, default_value_t = 0.51)]
        consensus: f64,

        /// Fraction of query k-mers a node must share to be a hit
        #[arg(short = 'C', long, default_value_t = 0.9)]
        coverage: f64,

        /// Maximum number of hits used for the consensus
        #[arg(short = 'm', long, default_value_t = 50)]
        hits_max: usize,

        /// Only use the hits sharing the highest count
        #[arg(short = 'b', long)]
        best_only: bool,

        /// Worker threads (defaults to all cores)
        #[arg(short = 't', long)]
        threads: Option<usize>,

        /// Write results here instead of stdout
        #[arg(short = 'O', long)]
        output: Option<PathBuf>,
    },
}

fn spinner(color: &str, msg: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let template = format!("{{spinner:.{color}}} {{msg}}");
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
        .template(&template)
    {
        spinner.set_style(style);
    }
    spinner.set_message(msg.to_string());
    spinner
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Build {
            inputs,
            output_dir,
            prefix,
            kmer_size,
            step_size,
            skip_invalid,
        } => {
            let spinner = spinner("blue", "Building index...");
            let options = IndexOptions::new()
                .kmer_size(kmer_size)
                .step_size(step_size)
                .output_dir(&output_dir)
                .prefix(prefix.as_str());
            let summary = build_index(options, &inputs, skip_invalid)?;
            spinner.finish_with_message(format!(
                "Indexed {} sequences into {} nodes ({} skipped) in {}",
                summary.added,
                summary.nodes,
                summary.skipped.len(),
                output_dir.display()
            ));
        }

        Command::Classify {
            inputs,
            dir,
            prefix,
            kmer_size,
            step_size,
            consensus,
            coverage,
            hits_max,
            best_only,
            threads,
            output,
        } => {
            if let Some(n) = threads {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build_global()?;
            }

            let spinner = spinner("green", "Classifying sequences...");
            let options = SearchOptions::new()
                .kmer_size(kmer_size)
                .step_size(step_size)
                .dir(dir)
                .prefix(prefix)
                .consensus(consensus)
                .coverage(coverage)
                .hits_max(hits_max)
                .best_only(best_only);
            let results = classify_files(&options, &inputs)?;
            spinner.finish_with_message(format!(
                "Classified {} of {} sequences.",
                results.classified_count(),
                results.queries.len()
            ));

            match output {
                Some(path) => fs::write(path, results.get_output())?,
                None => print!("{}", results.get_output()),
            }
        }
    }

    Ok(())
}

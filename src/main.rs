// This is the main file of Virclust and where execution starts. It mainly handles the CLI and
// then calls into other files to run whichever subcommand the user chose.

// Copyright 2025 Ryan Wick (rrwick@gmail.com)

// This file is part of Virclust. Virclust is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. Virclust is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with Virclust. If not, see <http://www.gnu.org/licenses/>.

use std::path::PathBuf;
use clap::{Parser, Subcommand, crate_version};

mod batch;
mod cdhit;
mod clean;
mod cluster;
mod context;
mod distance;
mod error;
mod log;
mod metrics;
mod misc;
mod outliers;
mod plot;
mod representative;
mod sequence;
mod similarity;
mod tools;


use similarity::SimilarityMethod;

#[derive(Parser)]
#[clap(name = "Virclust",
       version = concat!("v", crate_version!()),
       about = "a tool for clustering viral sequences, removing outlier sequences and choosing \
                representatives",
       before_help = concat!(r#" __      ___          _           _   "#, "\n",
                             r#" \ \    / (_)        | |         | |  "#, "\n",
                             r#"  \ \  / / _ _ __ ___| |_   _ ___| |_ "#, "\n",
                             r#"   \ \/ / | | '__/ __| | | | / __| __|"#, "\n",
                             r#"    \  /  | | | | (__| | |_| \__ \ |_ "#, "\n",
                             r#"     \/   |_|_|  \___|_|\__,_|___/\__|"#))]
#[command(author, version, long_about = None, disable_help_subcommand = true,
          propagate_version = true)]
#[clap(subcommand_required = true)]
#[clap(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {

    /// measure similarity and remove outliers for a directory of FASTA files
    Batch {
        /// Directory containing one FASTA file per taxon (required)
        #[clap(short = 'i', long = "in_dir", required = true)]
        in_dir: PathBuf,

        /// Summary TSV file to be created (required)
        #[clap(short = 'o', long = "out_tsv", required = true)]
        out_tsv: PathBuf,

        /// Similarity method
        #[clap(short = 'm', long = "method", value_enum, default_value = "msa")]
        method: SimilarityMethod,

        /// Identity threshold for the cdhit method
        #[clap(long = "threshold", default_value = "0.5")]
        threshold: f64,

        /// Memory limit (MB) for CD-HIT
        #[clap(long = "memory", default_value = "4000")]
        memory: u32,

        /// Number of CPU threads
        #[clap(short = 't', long = "threads", default_value = "8")]
        threads: usize,

        /// Time limit (seconds) for each external tool run
        #[clap(long = "timeout")]
        timeout: Option<u64>,

        /// Directory containing CD-HIT binaries [default: use PATH]
        #[clap(long = "cdhit_dir")]
        cdhit_dir: Option<PathBuf>,
    },

    /// extract sequences from an alignment and remove gap-only columns
    Clean {
        /// Aligned FASTA file (required)
        #[clap(short = 'i', long = "in_aligned", required = true)]
        in_aligned: PathBuf,

        /// Output FASTA file (required)
        #[clap(short = 'o', long = "out_fasta", required = true)]
        out_fasta: PathBuf,

        /// Accessions to keep, comma or semicolon delimited (required)
        #[clap(short = 'k', long = "keep", required = true)]
        keep: String,
    },

    /// cluster sequences by homology and choose cluster representatives
    Cluster {
        /// Input sequences in FASTA or TSV format (required)
        #[clap(short = 'i', long = "in_file", required = true)]
        in_file: PathBuf,

        /// Output directory (required)
        #[clap(short = 'o', long = "out_dir", required = true)]
        out_dir: PathBuf,

        /// Sequence identity threshold for clustering
        #[clap(long = "threshold", default_value = "0.99")]
        threshold: f64,

        /// Memory limit (MB) for CD-HIT
        #[clap(long = "memory", default_value = "4000")]
        memory: u32,

        /// Number of CPU threads
        #[clap(short = 't', long = "threads", default_value = "8")]
        threads: usize,

        /// Time limit (seconds) for each external tool run
        #[clap(long = "timeout")]
        timeout: Option<u64>,

        /// Directory containing CD-HIT binaries [default: use PATH]
        #[clap(long = "cdhit_dir")]
        cdhit_dir: Option<PathBuf>,
    },

    /// find outlier sequences in an alignment or similarity table
    Outliers {
        /// Aligned FASTA file, or a similarity table CSV with --similarities_only (required)
        #[clap(short = 'i', long = "in_file", required = true)]
        in_file: PathBuf,

        /// Use only the similarity table
        #[clap(long = "similarities_only")]
        similarities_only: bool,
    },

    /// measure the similarity of sequences in a FASTA file
    Similarity {
        /// Input sequences in FASTA format (required)
        #[clap(short = 'i', long = "in_fasta", required = true)]
        in_fasta: PathBuf,

        /// Similarity method
        #[clap(short = 'm', long = "method", value_enum, default_value = "msa")]
        method: SimilarityMethod,

        /// Identity threshold for the cdhit method
        #[clap(long = "threshold", default_value = "0.5")]
        threshold: f64,

        /// Memory limit (MB) for CD-HIT
        #[clap(long = "memory", default_value = "4000")]
        memory: u32,

        /// Number of CPU threads
        #[clap(short = 't', long = "threads", default_value = "8")]
        threads: usize,

        /// Time limit (seconds) for each external tool run
        #[clap(long = "timeout")]
        timeout: Option<u64>,

        /// Directory containing CD-HIT binaries [default: use PATH]
        #[clap(long = "cdhit_dir")]
        cdhit_dir: Option<PathBuf>,
    },
}


fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Batch { in_dir, out_tsv, method, threshold, memory, threads, timeout,
                               cdhit_dir }) => {
            batch::batch(in_dir, out_tsv, method, threshold, memory, threads, timeout, cdhit_dir);
        },
        Some(Commands::Clean { in_aligned, out_fasta, keep }) => {
            clean::clean(in_aligned, out_fasta, keep);
        },
        Some(Commands::Cluster { in_file, out_dir, threshold, memory, threads, timeout,
                                 cdhit_dir }) => {
            cluster::cluster(in_file, out_dir, threshold, memory, threads, timeout, cdhit_dir);
        },
        Some(Commands::Outliers { in_file, similarities_only }) => {
            outliers::outliers(in_file, similarities_only);
        },
        Some(Commands::Similarity { in_fasta, method, threshold, memory, threads, timeout,
                                    cdhit_dir }) => {
            similarity::similarity(in_fasta, method, threshold, memory, threads, timeout,
                                   cdhit_dir);
        },
        None => {}
    }
}

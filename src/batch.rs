// This file contains the code for the virclust batch subcommand, which runs similarity
// measurement and outlier removal over a directory of FASTA files (one element set per file,
// usually one per taxon) and summarises the results in a single table.

// Copyright 2025 Ryan Wick (rrwick@gmail.com)

// This file is part of Virclust. Virclust is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. Virclust is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with Virclust. If not, see <http://www.gnu.org/licenses/>.

use colored::Colorize;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::clean::clean_alignment;
use crate::cdhit::protein_word_length;
use crate::context::{DerivedPaths, RunContext};
use crate::error::{Result, VirclustError};
use crate::log::{section_header, explanation};
use crate::metrics::{save_yaml, OutlierMetrics, SimilarityMetrics};
use crate::misc::{check_if_dir_exists, create_dir, find_all_fasta_files, format_duration,
                  format_float, format_optional_float, quit_with_error, spinner};
use crate::outliers::relevant_accessions_from_alignment;
use crate::sequence::ElementSet;
use crate::similarity::{compute_similarity, SimilarityMethod, SimilaritySettings,
                        SimilaritySummary};
use crate::tools::ToolPaths;


static TSV_COLUMNS: [&str; 8] = ["name", "#sequences", "mean_sequence_similarity",
                                 "min_sequence_similarity", "max_sequence_similarity",
                                 "med_sequence_similarity", "relevant_genome_accessions",
                                 "#relevant_sequences"];


#[allow(clippy::too_many_arguments)]
pub fn batch(in_dir: PathBuf, out_tsv: PathBuf, method: SimilarityMethod, threshold: f64,
             memory: u32, threads: usize, timeout: Option<u64>, cdhit_dir: Option<PathBuf>) {
    let start_time = Instant::now();
    let no_outliers_dir = in_dir.join("no_outliers");
    check_settings(&in_dir, &out_tsv, method, threshold, memory, threads);
    starting_message();
    print_settings(&in_dir, &out_tsv, method, threshold, memory, threads, &timeout, &cdhit_dir);
    let fasta_files = find_all_fasta_files(&in_dir);
    create_dir(&no_outliers_dir);
    let settings = SimilaritySettings { method, threshold, memory_limit_mb: memory };
    let ctx = RunContext::new(&in_dir, "virclust", timeout)
        .with_tools(ToolPaths::with_cdhit_dir(cdhit_dir.as_deref()));

    section_header("Processing element sets");
    explanation("Each FASTA file is treated as one set of sequences. Similarities are measured \
                 and, for alignment-based similarity, outlier sequences are identified and a \
                 cleaned alignment without them is saved.");
    let pb = spinner(&format!("processing {} files...", fasta_files.len()));
    let rows: Vec<BatchRow> = fasta_files.par_iter()
        .map(|f| process_element_set(f, &settings, &ctx, &no_outliers_dir)).collect();
    pb.finish_and_clear();
    for row in &rows {
        print_row(row);
    }
    eprintln!();
    if let Err(e) = save_batch_tsv(&rows, &out_tsv) {
        quit_with_error(&format!("failed to write {}: {}", out_tsv.display(), e));
    }
    finished_message(start_time, &out_tsv, &no_outliers_dir);
}


fn check_settings(in_dir: &Path, out_tsv: &Path, method: SimilarityMethod, threshold: f64,
                  memory: u32, threads: usize) {
    check_if_dir_exists(in_dir);
    if out_tsv.is_dir() {
        quit_with_error(&format!("{} is a directory", out_tsv.display()));
    }
    if threshold <= 0.0 || threshold > 1.0 {
        quit_with_error("--threshold must be greater than 0 and no more than 1");
    }
    if method == SimilarityMethod::Cdhit && protein_word_length(threshold).is_err() {
        quit_with_error("--threshold must be at least 0.4 for the cdhit method");
    }
    if memory < 100  { quit_with_error("--memory cannot be less than 100"); }
    if threads < 1   { quit_with_error("--threads cannot be less than 1"); }
    if threads > 100 { quit_with_error("--threads cannot be greater than 100"); }
    let _ = ThreadPoolBuilder::new().num_threads(threads).build_global();
}


fn starting_message() {
    section_header("Starting virclust batch");
    explanation("This command processes a directory of FASTA files, each holding the sequences \
                 of one taxon. For each, it measures sequence similarity, removes outlier \
                 sequences and summarises everything in one table.");
}


#[allow(clippy::too_many_arguments)]
fn print_settings(in_dir: &Path, out_tsv: &Path, method: SimilarityMethod, threshold: f64,
                  memory: u32, threads: usize, timeout: &Option<u64>,
                  cdhit_dir: &Option<PathBuf>) {
    eprintln!("Settings:");
    eprintln!("  --in_dir {}", in_dir.display());
    eprintln!("  --out_tsv {}", out_tsv.display());
    eprintln!("  --method {}", method);
    eprintln!("  --threshold {}", format_float(threshold));
    eprintln!("  --memory {}", memory);
    eprintln!("  --threads {}", threads);
    if let Some(t) = timeout {
        eprintln!("  --timeout {}", t);
    }
    if let Some(dir) = cdhit_dir {
        eprintln!("  --cdhit_dir {}", dir.display());
    }
    eprintln!();
}


fn finished_message(start_time: Instant, out_tsv: &Path, no_outliers_dir: &Path) {
    section_header("Finished!");
    eprintln!("Summary table:      {}", out_tsv.display());
    eprintln!("Cleaned alignments: {}", no_outliers_dir.display());
    eprintln!();
    eprintln!("Time to run: {}", format_duration(start_time.elapsed()));
    eprintln!();
}


fn print_row(row: &BatchRow) {
    let count = row.sequence_count.map(|c| c.to_string()).unwrap_or_else(|| "?".to_string());
    let similarity = match row.summary.mean {
        Some(m) => format_float(m).normal(),
        None    => "undefined".red(),
    };
    match &row.relevant {
        Some(r) => eprintln!("{}: {} sequences, mean similarity {}, {} {}", row.name, count,
                             similarity, r.len(), "kept".green()),
        None    => eprintln!("{}: {} sequences, mean similarity {}", row.name, count,
                             similarity),
    }
}


/// One line of the batch summary. None values are written as empty cells.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchRow {
    pub name: String,
    pub sequence_count: Option<usize>,
    pub summary: SimilaritySummary,
    pub relevant: Option<Vec<String>>,
}

impl BatchRow {
    fn undefined(name: &str) -> Self {
        BatchRow { name: name.to_string(), sequence_count: None,
                   summary: SimilaritySummary::undefined(), relevant: None }
    }

    fn tsv_fields(&self) -> Vec<String> {
        let optional = |n: Option<usize>| n.map(|c| c.to_string()).unwrap_or_default();
        vec![self.name.clone(),
             optional(self.sequence_count),
             format_optional_float(self.summary.mean),
             format_optional_float(self.summary.min),
             format_optional_float(self.summary.max),
             format_optional_float(self.summary.median),
             self.relevant.as_ref().map(|r| r.join(";")).unwrap_or_default(),
             optional(self.relevant.as_ref().map(|r| r.len()))]
    }
}


/// Runs one element set through similarity measurement and (for alignment-based similarity)
/// outlier removal. Problems are logged and leave the affected values undefined, so one bad set
/// never stops the rest of the batch.
pub fn process_element_set(fasta: &Path, settings: &SimilaritySettings, ctx: &RunContext,
                           no_outliers_dir: &Path) -> BatchRow {
    let paths = DerivedPaths::from_fasta(fasta);
    let set = match ElementSet::from_fasta(fasta) {
        Ok(set) => set,
        Err(e) => {
            log_problem(&paths.identity, &e);
            return BatchRow::undefined(&paths.identity);
        }
    };
    let mut row = BatchRow { name: set.identity.clone(), sequence_count: Some(set.len()),
                             summary: SimilaritySummary::undefined(), relevant: None };
    if set.len() == 1 {
        row.summary = SimilaritySummary::identical();
        row.relevant = Some(vec![set.elements()[0].accession.clone()]);
        return row;
    }
    row.summary = compute_similarity(&paths, settings, ctx).unwrap_or_else(|e| {
        log_problem(&set.identity, &e);
        SimilaritySummary::undefined()
    });
    let metrics = SimilarityMetrics::new(&set.identity, settings.method, &row.summary);
    if let Err(e) = save_yaml(&paths.similarity_yaml, &metrics) {
        log_problem(&set.identity, &e);
    }
    if settings.method != SimilarityMethod::Msa || row.summary.is_undefined() {
        return row;
    }
    match remove_outliers(&paths, no_outliers_dir) {
        Ok(relevant) => row.relevant = relevant,
        Err(e)       => log_problem(&set.identity, &e),
    }
    row
}


fn remove_outliers(paths: &DerivedPaths, no_outliers_dir: &Path)
        -> Result<Option<Vec<String>>> {
    let report = match relevant_accessions_from_alignment(paths)? {
        Some(r) => r,
        None    => return Ok(None),
    };
    save_yaml(&paths.outlier_yaml, &OutlierMetrics::from_report(&report))?;
    let kept = report.kept();
    let cleaned = no_outliers_dir.join(format!("{}_aligned.fasta", paths.identity));
    clean_alignment(&paths.aligned, &kept, &cleaned)?;
    Ok(Some(kept.into_iter().map(String::from).collect()))
}


fn log_problem(identity: &str, e: &VirclustError) {
    let level = if e.is_fatal() { "Error:".red() } else { "Warning:".yellow() };
    eprintln!("{} {}: {}", level, identity, e);
}


pub fn save_batch_tsv(rows: &[BatchRow], out_tsv: &Path) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(out_tsv)?;
    writer.write_record(TSV_COLUMNS)?;
    for row in rows {
        writer.write_record(row.tsv_fields())?;
    }
    writer.flush()?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use crate::tests::make_test_file;

    fn msa_settings() -> SimilaritySettings {
        SimilaritySettings { method: SimilarityMethod::Msa, ..SimilaritySettings::default() }
    }

    #[test]
    fn test_tsv_fields() {
        let row = BatchRow { name: "Tomato_virus".to_string(), sequence_count: Some(3),
                             summary: SimilaritySummary { mean: Some(0.5), min: Some(0.25),
                                                          max: Some(1.0), median: None },
                             relevant: Some(vec!["a".to_string(), "b".to_string()]) };
        assert_eq!(row.tsv_fields(), vec!["Tomato_virus", "3", "0.5", "0.25", "1", "", "a;b",
                                          "2"]);
        assert_eq!(BatchRow::undefined("x").tsv_fields(), vec!["x", "", "", "", "", "", "", ""]);
    }

    #[test]
    fn test_save_batch_tsv() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("summary.tsv");
        save_batch_tsv(&[BatchRow::undefined("x")], &out).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(),
                   "name\t#sequences\tmean_sequence_similarity\tmin_sequence_similarity\t\
                    max_sequence_similarity\tmed_sequence_similarity\t\
                    relevant_genome_accessions\t#relevant_sequences\nx\t\t\t\t\t\t\t\n");
    }

    #[test]
    fn test_single_sequence_set() {
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("lonely.fasta");
        make_test_file(&fasta, ">a\nACGT\n");
        let ctx = RunContext::new(dir.path(), "test", None);
        let row = process_element_set(&fasta, &msa_settings(), &ctx, dir.path());
        assert_eq!(row.sequence_count, Some(1));
        assert_eq!(row.summary, SimilaritySummary::identical());
        assert_eq!(row.relevant, Some(vec!["a".to_string()]));
    }

    #[test]
    fn test_bad_set_is_undefined() {
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("broken.fasta");
        make_test_file(&fasta, "not a fasta file\n");
        let ctx = RunContext::new(dir.path(), "test", None);
        let row = process_element_set(&fasta, &msa_settings(), &ctx, dir.path());
        assert_eq!(row, BatchRow::undefined("broken"));
    }

    #[test]
    fn test_missing_aligner_is_undefined() {
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("pair.fasta");
        make_test_file(&fasta, ">a\nACGT\n>b\nACGA\n");
        let ctx = RunContext::new(dir.path(), "test", None)
            .with_tools(ToolPaths { mafft: PathBuf::from("/nonexistent/mafft"),
                                    ..ToolPaths::default() });
        let row = process_element_set(&fasta, &msa_settings(), &ctx, dir.path());
        assert_eq!(row.sequence_count, Some(2));
        assert!(row.summary.is_undefined());
        assert_eq!(row.relevant, None);
    }

    #[test]
    fn test_process_with_existing_alignment() {
        let dir = tempdir().unwrap();
        let no_outliers = dir.path().join("no_outliers");
        fs::create_dir(&no_outliers).unwrap();
        let fasta = dir.path().join("set.fasta");
        make_test_file(&fasta, ">a\nACGTACGT\n>b\nACGACGT\n");
        let paths = DerivedPaths::from_fasta(&fasta);
        make_test_file(&paths.aligned, ">a\nACGTACGT\n>b\nACG-ACGT\n");
        let ctx = RunContext::new(dir.path(), "test", None);
        let row = process_element_set(&fasta, &msa_settings(), &ctx, &no_outliers);
        assert_eq!(row.summary.min, Some(0.875));
        assert_eq!(row.relevant, Some(vec!["a".to_string(), "b".to_string()]));
        assert!(no_outliers.join("set_aligned.fasta").is_file());
        assert!(paths.similarity_yaml.is_file());
        assert!(paths.outlier_yaml.is_file());
    }
}

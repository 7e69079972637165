// This file contains the code for the virclust similarity subcommand and the three strategies it
// uses to measure how similar the sequences of an element set are to each other.

// Copyright 2025 Ryan Wick (rrwick@gmail.com)

// This file is part of Virclust. Virclust is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. Virclust is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with Virclust. If not, see <http://www.gnu.org/licenses/>.

use clap::ValueEnum;
use colored::Colorize;
use fxhash::FxHashMap;
use nalgebra::DMatrix;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::cdhit::{member_similarities, protein_word_length, run_for_report, with_suffix,
                   ClstrParser, OpaqueInput};
use crate::context::{get_or_create, CacheStatus, DerivedPaths, RunContext};
use crate::distance::{alignment_score_similarity, column_similarity, tokenize};
use crate::error::{Result, VirclustError};
use crate::log::{section_header, explanation};
use crate::metrics::SimilarityMetrics;
use crate::misc::{check_if_file_exists, format_duration, format_optional_float, load_fasta,
                  mean_f64, median_f64, quit_with_error, spinner};
use crate::sequence::ElementSet;
use crate::tools::{ToolCommand, ToolPaths};


/// Below this many sequences, CD-HIT is not worth running and pairwise alignment is used.
static CDHIT_MIN_SEQUENCES: usize = 3;


pub fn similarity(in_fasta: PathBuf, method: SimilarityMethod, threshold: f64, memory: u32,
                  threads: usize, timeout: Option<u64>, cdhit_dir: Option<PathBuf>) {
    let start_time = Instant::now();
    check_settings(&in_fasta, method, threshold, memory, threads);
    starting_message();
    print_settings(&in_fasta, method, threshold, memory, threads, &timeout, &cdhit_dir);
    let paths = DerivedPaths::from_fasta(&in_fasta);
    let work_dir = in_fasta.parent().unwrap_or(Path::new(".")).to_path_buf();
    let ctx = RunContext::new(&work_dir, "virclust", timeout)
        .with_tools(ToolPaths::with_cdhit_dir(cdhit_dir.as_deref()));
    let settings = SimilaritySettings { method, threshold, memory_limit_mb: memory };

    section_header("Measuring similarity");
    explanation("Pairwise similarities are now computed and summarised.");
    let pb = spinner("computing similarities...");
    let summary = match compute_similarity(&paths, &settings, &ctx) {
        Ok(s) => s,
        Err(e) if e.is_fatal() => { pb.finish_and_clear(); quit_with_error(&e.to_string()) }
        Err(e) => {
            eprintln!("{} {}", "Warning:".yellow(), e);
            SimilaritySummary::undefined()
        }
    };
    pb.finish_and_clear();
    print_summary(&summary);
    let metrics = SimilarityMetrics::new(&paths.identity, method, &summary);
    metrics.save_to_yaml(&paths.similarity_yaml);
    finished_message(start_time, &paths, &settings);
}


fn check_settings(in_fasta: &Path, method: SimilarityMethod, threshold: f64, memory: u32,
                  threads: usize) {
    check_if_file_exists(in_fasta);
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
    section_header("Starting virclust similarity");
    explanation("This command measures how similar the sequences in a FASTA file are to each \
                 other, using a multiple sequence alignment (MAFFT), clustering (CD-HIT) or \
                 pairwise global alignment. It reports the mean, minimum, maximum and median \
                 similarity.");
}


fn print_settings(in_fasta: &Path, method: SimilarityMethod, threshold: f64, memory: u32,
                  threads: usize, timeout: &Option<u64>, cdhit_dir: &Option<PathBuf>) {
    eprintln!("Settings:");
    eprintln!("  --in_fasta {}", in_fasta.display());
    eprintln!("  --method {}", method);
    eprintln!("  --threshold {}", threshold);
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


fn print_summary(summary: &SimilaritySummary) {
    eprintln!("Mean similarity:   {}", format_optional_float(summary.mean));
    eprintln!("Min similarity:    {}", format_optional_float(summary.min));
    eprintln!("Max similarity:    {}", format_optional_float(summary.max));
    eprintln!("Median similarity: {}", format_optional_float(summary.median));
    eprintln!();
}


fn finished_message(start_time: Instant, paths: &DerivedPaths, settings: &SimilaritySettings) {
    section_header("Finished!");
    match settings.method {
        SimilarityMethod::Msa => {
            eprintln!("Alignment:        {}", paths.aligned.display());
            eprintln!("Similarity table: {}", paths.similarity_table.display());
        }
        SimilarityMethod::Pairwise => {
            eprintln!("Similarity table: {}", paths.pairwise_table.display());
        }
        SimilarityMethod::Cdhit => {
            eprintln!("Similarity table: {}", paths.cdhit_table(settings.threshold).display());
        }
    }
    eprintln!("Metrics:          {}", paths.similarity_yaml.display());
    eprintln!("Time to run: {}", format_duration(start_time.elapsed()));
    eprintln!();
}


#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMethod {
    Cdhit,
    Msa,
    Pairwise,
}

impl fmt::Display for SimilarityMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimilarityMethod::Cdhit    => write!(f, "cdhit"),
            SimilarityMethod::Msa      => write!(f, "msa"),
            SimilarityMethod::Pairwise => write!(f, "pairwise"),
        }
    }
}


#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimilaritySettings {
    pub method: SimilarityMethod,
    pub threshold: f64,
    pub memory_limit_mb: u32,
}

impl Default for SimilaritySettings {
    fn default() -> Self {
        SimilaritySettings { method: SimilarityMethod::Msa, threshold: 0.5,
                             memory_limit_mb: 4000 }
    }
}


/// One row of a persisted similarity table. A missing similarity is an empty cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairwiseRecord {
    pub accession_1: String,
    pub accession_2: String,
    pub similarity: Option<f64>,
}

impl PairwiseRecord {
    pub fn new(accession_1: &str, accession_2: &str, similarity: Option<f64>) -> Self {
        // Self-pairs are always identical, whatever was computed.
        let similarity = if accession_1 == accession_2 { Some(1.0) } else { similarity };
        PairwiseRecord { accession_1: accession_1.to_string(),
                         accession_2: accession_2.to_string(), similarity }
    }
}


pub fn write_records(path: &Path, records: &[PairwiseRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}


pub fn read_records(path: &Path) -> Result<Vec<PairwiseRecord>> {
    if !path.is_file() {
        return Err(VirclustError::MissingInput(path.to_path_buf()));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader.deserialize().collect::<std::result::Result<Vec<PairwiseRecord>, _>>()?;
    Ok(records)
}


/// Mean, min, max and median similarity. None means undefined, e.g. when the input was missing.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimilaritySummary {
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub median: Option<f64>,
}

impl SimilaritySummary {
    pub fn undefined() -> Self {
        SimilaritySummary { mean: None, min: None, max: None, median: None }
    }

    pub fn identical() -> Self {
        SimilaritySummary { mean: Some(1.0), min: Some(1.0), max: Some(1.0), median: Some(1.0) }
    }

    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return SimilaritySummary::undefined();
        }
        SimilaritySummary {
            mean: mean_f64(values),
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
            median: median_f64(values),
        }
    }

    pub fn from_records(records: &[PairwiseRecord]) -> Self {
        let values: Vec<f64> = records.iter().filter_map(|r| r.similarity).collect();
        SimilaritySummary::from_values(&values)
    }

    pub fn is_undefined(&self) -> bool {
        self.mean.is_none()
    }
}


/// All-pairs similarities for one element set, pivoted so that each accession has a vector of
/// similarities to every accession (itself included).
#[derive(Clone, Debug)]
pub struct SimilarityTable {
    accessions: Vec<String>,
    index: FxHashMap<String, usize>,
    values: FxHashMap<(usize, usize), f64>,
}

impl SimilarityTable {
    pub fn from_records(records: &[PairwiseRecord]) -> Self {
        let mut accessions: Vec<String> = Vec::new();
        let mut index: FxHashMap<String, usize> = FxHashMap::default();
        let mut values = FxHashMap::default();
        for r in records {
            let mut position = |a: &str| -> usize {
                if let Some(&i) = index.get(a) { return i; }
                accessions.push(a.to_string());
                index.insert(a.to_string(), accessions.len() - 1);
                accessions.len() - 1
            };
            let i = position(&r.accession_1);
            let j = position(&r.accession_2);
            if let Some(s) = r.similarity {
                values.entry((i, j)).or_insert(s);  // first value wins
            }
        }
        SimilarityTable { accessions, index, values }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(SimilarityTable::from_records(&read_records(path)?))
    }

    pub fn accessions(&self) -> &[String] {
        &self.accessions
    }

    fn position(&self, accession: &str) -> Option<usize> {
        self.index.get(accession).copied()
    }

    pub fn similarity(&self, accession_1: &str, accession_2: &str) -> Option<f64> {
        let i = self.position(accession_1)?;
        let j = self.position(accession_2)?;
        self.values.get(&(i, j)).copied()
    }

    pub fn similarity_vector(&self, accession: &str) -> Option<Vec<Option<f64>>> {
        let i = self.position(accession)?;
        Some((0..self.accessions.len()).map(|j| self.values.get(&(i, j)).copied()).collect())
    }

    /// Mean of an accession's defined similarities to every accession, itself included.
    pub fn mean_similarity_from_rest(&self, accession: &str) -> Option<f64> {
        let values: Vec<f64> = self.similarity_vector(accession)?.into_iter().flatten().collect();
        mean_f64(&values)
    }

    /// One row per accession (in the given order) of similarities to every accession in the
    /// table. Undefined similarities are NaN, which never exceeds an outlier cutoff.
    pub fn feature_matrix(&self, order: &[&str]) -> Result<DMatrix<f64>> {
        let rows = order.iter().map(|a| {
            self.similarity_vector(a).ok_or_else(|| VirclustError::IntegrityFault(
                format!("{} is not in the similarity table", a)))
        }).collect::<Result<Vec<_>>>()?;
        let width = self.accessions.len();
        Ok(DMatrix::from_fn(rows.len(), width, |i, j| rows[i][j].unwrap_or(f64::NAN)))
    }
}


/// Computes the similarity summary for the element set at `paths.unaligned` with the chosen
/// method. A missing input file gives an undefined summary rather than an error. A set with one
/// sequence is identical to itself.
pub fn compute_similarity(paths: &DerivedPaths, settings: &SimilaritySettings, ctx: &RunContext)
        -> Result<SimilaritySummary> {
    let set = match ElementSet::from_fasta(&paths.unaligned) {
        Ok(set) => set,
        Err(VirclustError::MissingInput(p)) => {
            eprintln!("input file {} does not exist", p.display());
            return Ok(SimilaritySummary::undefined());
        }
        Err(e) => return Err(e),
    };
    if set.len() == 1 {
        return Ok(SimilaritySummary::identical());
    }
    match settings.method {
        SimilarityMethod::Msa      => msa_similarity(paths, ctx),
        SimilarityMethod::Pairwise => pairwise_similarity(&set, paths),
        SimilarityMethod::Cdhit    => cdhit_similarity(&set, paths, settings, ctx),
    }
}


/// Aligns the element set with MAFFT (unless the aligned file already exists), then compares
/// every ordered pair of aligned sequences position by position. Both the alignment and the
/// similarity table are cached, so a second run reads them back unchanged.
pub fn msa_similarity(paths: &DerivedPaths, ctx: &RunContext) -> Result<SimilaritySummary> {
    if !paths.unaligned.is_file() {
        return Ok(SimilaritySummary::undefined());
    }
    align(paths, ctx)?;
    get_or_create(&paths.similarity_table, |tmp| {
        let aligned = load_fasta(&paths.aligned)?;
        let tokens = aligned.iter().map(|(_, seq)| tokenize(seq)).collect::<Result<Vec<_>>>()?;
        let records: Vec<PairwiseRecord> = (0..aligned.len()).into_par_iter().flat_map_iter(|i| {
            let tokens = &tokens;
            let aligned = &aligned;
            (0..aligned.len()).map(move |j| {
                let (acc_1, acc_2) = (&aligned[i].0, &aligned[j].0);
                PairwiseRecord::new(acc_1, acc_2,
                                    column_similarity(acc_1, &tokens[i], acc_2, &tokens[j]))
            })
        }).collect();
        write_records(tmp, &records)
    })?;
    Ok(SimilaritySummary::from_records(&read_records(&paths.similarity_table)?))
}


/// Runs MAFFT on the unaligned sequences, unless the aligned file is already present.
pub fn align(paths: &DerivedPaths, ctx: &RunContext) -> Result<CacheStatus> {
    let status = get_or_create(&paths.aligned, |tmp| {
        let command = ToolCommand::new(&ctx.tools.mafft)
            .arg("--retree").arg("1").arg("--maxiterate").arg("0")
            .arg(&paths.unaligned).stdout_to(tmp);
        command.run(ctx.timeout)?;
        if load_fasta(tmp).is_err() {
            return Err(VirclustError::ExternalToolFailure {
                command: command.description(),
                status: "no aligned sequences were produced".to_string() });
        }
        Ok(())
    })?;
    if paths.mafft_log.is_file() {
        fs::remove_file(&paths.mafft_log)?;
    }
    Ok(status)
}


/// Global alignment score similarity for every unordered pair. Only suitable for small sets.
pub fn pairwise_similarity(set: &ElementSet, paths: &DerivedPaths) -> Result<SimilaritySummary> {
    get_or_create(&paths.pairwise_table, |tmp| {
        let elements = set.elements();
        let pairs: Vec<(usize, usize)> = (0..elements.len())
            .flat_map(|i| (i + 1..elements.len()).map(move |j| (i, j))).collect();
        let records: Vec<PairwiseRecord> = pairs.par_iter().map(|&(i, j)| {
            let (a, b) = (&elements[i], &elements[j]);
            PairwiseRecord::new(&a.accession, &b.accession,
                                alignment_score_similarity(&a.seq, &b.seq))
        }).collect();
        write_records(tmp, &records)
    })?;
    Ok(SimilaritySummary::from_records(&read_records(&paths.pairwise_table)?))
}


/// Clusters the element set with CD-HIT at the given threshold and summarises the
/// member-to-representative identities in its report. Sets too small for CD-HIT use pairwise
/// alignment instead.
pub fn cdhit_similarity(set: &ElementSet, paths: &DerivedPaths, settings: &SimilaritySettings,
                        ctx: &RunContext) -> Result<SimilaritySummary> {
    if set.len() < CDHIT_MIN_SEQUENCES {
        return pairwise_similarity(set, paths);
    }
    let aux_dir = ctx.aux_dir(&set.identity)?;
    let input = OpaqueInput::prepare(set, &aux_dir)?;
    let out_base = aux_dir.join(format!("cdhit_group_out_thr_{}_{}", settings.threshold,
                                         set.identity));
    let report = with_suffix(&out_base, ".clstr");
    let command = ToolCommand::new(&ctx.tools.cd_hit)
        .arg("-M").arg(settings.memory_limit_mb.to_string())
        .arg("-i").arg(&input.fasta).arg("-o").arg(&out_base)
        .arg("-c").arg(settings.threshold.to_string())
        .arg("-n").arg(protein_word_length(settings.threshold)?.to_string())
        .stdout_to(&aux_dir.join("cdhit_similarity.log"));
    run_for_report(&command, &report, ctx)?;

    let parser = ClstrParser::new();
    let text = fs::read_to_string(&report)?;
    get_or_create(&paths.cdhit_table(settings.threshold), |tmp| {
        let clusters = parser.parse(&text)
            .map_err(|message| VirclustError::Parse { path: report.clone(), message })?;
        let records: Vec<PairwiseRecord> = member_similarities(&clusters, &input)?.into_iter()
            .map(|(member, rep, s)| PairwiseRecord::new(&member, &rep, Some(s))).collect();
        write_records(tmp, &records)
    })?;
    let percentages = parser.all_percentages(&text);
    if percentages.is_empty() {
        eprintln!("no similarity values in {}", report.display());
    }
    Ok(SimilaritySummary::from_values(&percentages))
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use crate::sequence::Element;
    use crate::tests::{assert_almost_eq, make_test_file};

    #[test]
    fn test_summary() {
        let s = SimilaritySummary::from_values(&[0.5, 1.0, 0.75, 0.25]);
        assert_almost_eq(s.mean.unwrap(), 0.625, 1e-12);
        assert_eq!(s.min, Some(0.25));
        assert_eq!(s.max, Some(1.0));
        assert_almost_eq(s.median.unwrap(), 0.625, 1e-12);
        assert!(SimilaritySummary::from_values(&[]).is_undefined());
        let records = vec![PairwiseRecord::new("a", "b", None),
                           PairwiseRecord::new("a", "c", Some(0.5))];
        assert_eq!(SimilaritySummary::from_records(&records).mean, Some(0.5));
    }

    #[test]
    fn test_self_pairs_forced() {
        assert_eq!(PairwiseRecord::new("a", "a", Some(0.3)).similarity, Some(1.0));
        assert_eq!(PairwiseRecord::new("a", "a", None).similarity, Some(1.0));
        assert_eq!(PairwiseRecord::new("a", "b", None).similarity, None);
    }

    #[test]
    fn test_records_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.csv");
        let records = vec![PairwiseRecord::new("a", "b", Some(0.5)),
                           PairwiseRecord::new("b", "a", None)];
        write_records(&path, &records).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(),
                   "accession_1,accession_2,similarity\na,b,0.5\nb,a,\n");
        assert_eq!(read_records(&path).unwrap(), records);
        assert!(matches!(read_records(&dir.path().join("missing.csv")),
                         Err(VirclustError::MissingInput(_))));
    }

    #[test]
    fn test_similarity_table() {
        let records = vec![PairwiseRecord::new("a", "a", None),
                           PairwiseRecord::new("a", "b", Some(0.5)),
                           PairwiseRecord::new("b", "a", Some(0.5)),
                           PairwiseRecord::new("b", "b", None),
                           PairwiseRecord::new("a", "b", Some(0.9))];  // ignored duplicate
        let table = SimilarityTable::from_records(&records);
        assert_eq!(table.accessions(), &["a".to_string(), "b".to_string()]);
        assert_eq!(table.similarity("a", "b"), Some(0.5));
        assert_eq!(table.similarity_vector("b"), Some(vec![Some(0.5), Some(1.0)]));
        assert_eq!(table.mean_similarity_from_rest("a"), Some(0.75));
        assert_eq!(table.similarity("a", "c"), None);

        let data = table.feature_matrix(&["b", "a"]).unwrap();
        assert_eq!(data.shape(), (2, 2));
        assert_eq!(data[(0, 0)], 0.5);
        assert_eq!(data[(1, 0)], 1.0);
        assert!(table.feature_matrix(&["c"]).is_err());
    }

    #[test]
    fn test_missing_input_is_undefined() {
        let dir = tempdir().unwrap();
        let paths = DerivedPaths::from_fasta(&dir.path().join("absent.fasta"));
        let ctx = RunContext::new(dir.path(), "test", None);
        for method in [SimilarityMethod::Msa, SimilarityMethod::Pairwise, SimilarityMethod::Cdhit] {
            let settings = SimilaritySettings { method, ..SimilaritySettings::default() };
            assert!(compute_similarity(&paths, &settings, &ctx).unwrap().is_undefined());
        }
    }

    #[test]
    fn test_single_sequence() {
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("one.fasta");
        make_test_file(&fasta, ">a\nACGT\n");
        let paths = DerivedPaths::from_fasta(&fasta);
        let ctx = RunContext::new(dir.path(), "test", None);
        let summary = compute_similarity(&paths, &SimilaritySettings::default(), &ctx).unwrap();
        assert_eq!(summary, SimilaritySummary::identical());
    }

    #[test]
    fn test_pairwise_similarity() {
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("pair.fasta");
        make_test_file(&fasta, ">a\nACGTACGT\n>b\nACGTACGT\n>c\nACGTACGA\n");
        let paths = DerivedPaths::from_fasta(&fasta);
        let set = ElementSet::from_fasta(&fasta).unwrap();
        let summary = pairwise_similarity(&set, &paths).unwrap();
        assert_eq!(summary.max, Some(1.0));
        assert!(summary.min.unwrap() < 1.0);
        assert_eq!(read_records(&paths.pairwise_table).unwrap().len(), 3);
    }

    #[test]
    fn test_cdhit_falls_back_to_pairwise() {
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("small.fasta");
        make_test_file(&fasta, ">a\nACGTACGT\n>b\nACGTACGA\n");
        let paths = DerivedPaths::from_fasta(&fasta);
        let set = ElementSet::new("small", vec![Element::new("a", b"ACGTACGT"),
                                                Element::new("b", b"ACGTACGA")]).unwrap();
        // No CD-HIT binary is needed for two sequences.
        let ctx = RunContext::new(dir.path(), "test", None)
            .with_tools(ToolPaths { cd_hit: PathBuf::from("/nonexistent/cd-hit"),
                                    ..ToolPaths::default() });
        let summary = cdhit_similarity(&set, &paths, &SimilaritySettings::default(), &ctx)
            .unwrap();
        assert!(!summary.is_undefined());
        assert!(paths.pairwise_table.is_file());
    }

    #[test]
    fn test_msa_idempotence() {
        // With an aligned file already in place, MAFFT is never needed.
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("set.fasta");
        make_test_file(&fasta, ">a\nACGTACGT\n>b\nACGACGT\n>c\nACGTACGA\n");
        let paths = DerivedPaths::from_fasta(&fasta);
        make_test_file(&paths.aligned, ">a\nACGTACGT\n>b\nACG-ACGT\n>c\nACGTACGA\n");
        let ctx = RunContext::new(dir.path(), "test", None)
            .with_tools(ToolPaths { mafft: PathBuf::from("/nonexistent/mafft"),
                                    ..ToolPaths::default() });

        let first = msa_similarity(&paths, &ctx).unwrap();
        let first_table = fs::read(&paths.similarity_table).unwrap();
        let second = msa_similarity(&paths, &ctx).unwrap();
        let second_table = fs::read(&paths.similarity_table).unwrap();
        assert_eq!(first, second);
        assert_eq!(first_table, second_table);

        let records = read_records(&paths.similarity_table).unwrap();
        assert_eq!(records.len(), 9);
        let table = SimilarityTable::from_records(&records);
        assert_eq!(table.similarity("a", "a"), Some(1.0));
        assert_eq!(table.similarity("a", "b"), Some(0.875));
        assert_eq!(table.similarity("b", "c"), Some(0.75));
        assert_eq!(first.max, Some(1.0));
        assert_eq!(first.min, Some(0.75));
    }

    #[test]
    fn test_msa_unknown_symbol() {
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("set.fasta");
        make_test_file(&fasta, ">a\nACGT\n>b\nACNT\n");
        let paths = DerivedPaths::from_fasta(&fasta);
        make_test_file(&paths.aligned, ">a\nACGT\n>b\nACNT\n");
        let ctx = RunContext::new(dir.path(), "test", None);
        assert!(matches!(msa_similarity(&paths, &ctx), Err(VirclustError::Computation(_))));
        assert!(!paths.similarity_table.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_msa_with_fake_mafft() {
        use crate::tools::test_tools::make_script;
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("set.fasta");
        make_test_file(&fasta, ">a\nACGT\n>b\nACGA\n");
        let paths = DerivedPaths::from_fasta(&fasta);
        make_test_file(&paths.mafft_log, "log");
        // The sequences are already the same length, so the fake aligner just echoes them.
        let mafft = make_script(dir.path(), "mafft", "cat \"$5\"");
        let ctx = RunContext::new(dir.path(), "test", Some(30))
            .with_tools(ToolPaths { mafft, ..ToolPaths::default() });
        let summary = msa_similarity(&paths, &ctx).unwrap();
        assert!(paths.aligned.is_file());
        assert!(!paths.mafft_log.exists());
        assert_eq!(summary.min, Some(0.75));
    }

    #[cfg(unix)]
    #[test]
    fn test_cdhit_similarity_with_fake_cdhit() {
        use crate::tools::test_tools::make_script;
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("set.fasta");
        make_test_file(&fasta, ">a\nACGTACGT\n>b\nACGTACGA\n>c\nACGTACGG\n");
        let paths = DerivedPaths::from_fasta(&fasta);
        // Arguments: -M mem -i in -o out -c thr -n len
        let cdhit = make_script(dir.path(), "cd-hit",
                                "cp \"$4\" \"$6\"\n\
                                 printf '>Cluster 0\\n0\\t8aa, >S0... *\\n\
                                 1\\t8aa, >S1... at 87.50%%\\n2\\t8aa, >S2... at 75.00%%\\n' \
                                 > \"$6.clstr\"");
        let ctx = RunContext::new(dir.path(), "test", Some(30))
            .with_tools(ToolPaths { cd_hit: cdhit, ..ToolPaths::default() });
        let set = ElementSet::from_fasta(&fasta).unwrap();
        let summary = cdhit_similarity(&set, &paths, &SimilaritySettings::default(), &ctx)
            .unwrap();
        assert_almost_eq(summary.mean.unwrap(), 0.8125, 1e-12);
        assert_eq!(summary.min, Some(0.75));
        let records = read_records(&paths.cdhit_table(0.5)).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1], PairwiseRecord::new("b", "a", Some(0.875)));
    }

    #[cfg(unix)]
    #[test]
    fn test_cdhit_similarity_per_threshold() {
        use crate::tools::test_tools::make_script;
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("set.fasta");
        make_test_file(&fasta, ">a\nACGTACGT\n>b\nACGTACGA\n>c\nACGTACGG\n");
        let paths = DerivedPaths::from_fasta(&fasta);
        // Reports the -c threshold as every member's identity.
        let cdhit = make_script(dir.path(), "cd-hit", r#"cp "$4" "$6"
pct=$(awk -v t="$8" 'BEGIN { printf "%.2f", t * 100 }')
printf '>Cluster 0\n0\t8aa, >S0... *\n1\t8aa, >S1... at %s%%\n2\t8aa, >S2... at %s%%\n' \
    "$pct" "$pct" > "$6.clstr""#);
        let ctx = RunContext::new(dir.path(), "test", Some(30))
            .with_tools(ToolPaths { cd_hit: cdhit, ..ToolPaths::default() });
        let set = ElementSet::from_fasta(&fasta).unwrap();
        for threshold in [0.5, 0.9, 0.5] {
            let settings = SimilaritySettings { method: SimilarityMethod::Cdhit, threshold,
                                                ..SimilaritySettings::default() };
            let summary = cdhit_similarity(&set, &paths, &settings, &ctx).unwrap();
            assert_almost_eq(summary.min.unwrap(), threshold, 1e-9);
            let records = read_records(&paths.cdhit_table(threshold)).unwrap();
            assert_almost_eq(records[1].similarity.unwrap(), threshold, 1e-9);
        }
    }
}

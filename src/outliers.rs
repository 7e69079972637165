// This file contains the statistical outlier detection used to decide which sequences in an
// element set are relevant, plus the code for the outliers subcommand.

// Copyright 2025 Ryan Wick (rrwick@gmail.com)

// This file is part of Virclust. Virclust is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. Virclust is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with Virclust. If not, see <http://www.gnu.org/licenses/>.

use colored::Colorize;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::context::DerivedPaths;
use crate::distance::tokenize;
use crate::error::{Result, VirclustError};
use crate::log::{section_header, explanation};
use crate::metrics::OutlierMetrics;
use crate::misc::{check_if_file_exists, format_duration, load_fasta, quit_with_error};
use crate::plot::{scatter_plot, Region};
use crate::similarity::SimilarityTable;


static CHI_SQUARE_PROBABILITY: f64 = 0.95;
static CONDITION_TOLERANCE: f64 = 1e-12;


pub fn outliers(in_file: PathBuf, similarities_only: bool) {
    let start_time = Instant::now();
    check_if_file_exists(&in_file);
    starting_message();
    print_settings(&in_file, similarities_only);
    let report = if similarities_only {
        let plot = in_file.with_extension("png");
        relevant_accessions_from_similarities(&in_file, Some(plot.as_path()))
    } else {
        relevant_accessions_from_alignment(&DerivedPaths::from_aligned_fasta(&in_file))
    };
    let report = match report {
        Ok(Some(r)) => r,
        Ok(None)    => quit_with_error("outlier detection could not be carried out"),
        Err(e)      => quit_with_error(&e.to_string()),
    };
    print_kept_and_excluded(&report);
    let yaml = if similarities_only { in_file.with_extension("yaml") }
                               else { DerivedPaths::from_aligned_fasta(&in_file).outlier_yaml };
    OutlierMetrics::from_report(&report).save_to_yaml(&yaml);
    println!("{}", report.kept().join(";"));
    finished_message(start_time, &yaml);
}


fn starting_message() {
    section_header("Starting virclust outliers");
    explanation("This command flags sequences that are statistical outliers in their element set. \
                 It first tries a Mahalanobis distance test on the aligned sequences and falls \
                 back to a test on the pairwise similarity values when the alignment cannot \
                 support one. The remaining accessions are printed to stdout, separated by \
                 semicolons.");
}


fn print_settings(in_file: &Path, similarities_only: bool) {
    eprintln!("Settings:");
    eprintln!("  --in_file {}", in_file.display());
    if similarities_only {
        eprintln!("  --similarities_only");
    }
    eprintln!();
}


fn print_kept_and_excluded(report: &OutlierReport) {
    section_header("Outlier detection");
    explanation("Each element is now shown as kept or excluded.");
    eprintln!("Method: {}", report.strategy);
    if let Some(cutoff) = report.cutoff {
        eprintln!("Cutoff: {:.4}", cutoff);
    }
    eprintln!();
    for (i, accession) in report.accessions.iter().enumerate() {
        if report.outliers.contains(&i) {
            eprintln!("{} {}", format!("{}:", accession).dimmed(), "excluded".red());
        } else {
            eprintln!("{}: {}", accession, "kept".green());
        }
    }
    eprintln!();
}


fn finished_message(start_time: Instant, yaml: &Path) {
    section_header("Finished!");
    eprintln!("Outlier metrics: {}", yaml.display());
    eprintln!("Time to run: {}", format_duration(start_time.elapsed()));
    eprintln!();
}


#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlierStrategy {
    Mahalanobis,
    Euclidean,
    None,
}

impl fmt::Display for OutlierStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutlierStrategy::Mahalanobis => write!(f, "Mahalanobis distance"),
            OutlierStrategy::Euclidean   => write!(f, "Euclidean score"),
            OutlierStrategy::None        => write!(f, "none (too few elements)"),
        }
    }
}


/// The result of outlier detection over one element set. Outlier indices refer to positions in
/// `accessions`. This is never cached: it is recomputed from the current files every time.
#[derive(Clone, Debug)]
pub struct OutlierReport {
    pub accessions: Vec<String>,
    pub outliers: Vec<usize>,
    pub strategy: OutlierStrategy,
    pub cutoff: Option<f64>,
}

impl OutlierReport {
    pub fn kept(&self) -> Vec<&str> {
        self.accessions.iter().enumerate().filter(|(i, _)| !self.outliers.contains(i))
                       .map(|(_, a)| a.as_str()).collect()
    }

    pub fn excluded(&self) -> Vec<&str> {
        self.outliers.iter().map(|&i| self.accessions[i].as_str()).collect()
    }
}


/// Outlier indices along with the cutoff that was used.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub outliers: Vec<usize>,
    pub cutoff: Option<f64>,
}


pub fn chi_square_cutoff(degrees_of_freedom: usize) -> Result<f64> {
    let chi_squared = ChiSquared::new(degrees_of_freedom as f64)
        .map_err(|e| VirclustError::InvalidParameter(e.to_string()))?;
    Ok(chi_squared.inverse_cdf(CHI_SQUARE_PROBABILITY))
}


fn column_means(data: &DMatrix<f64>) -> DVector<f64> {
    DVector::from_iterator(data.ncols(), data.column_iter().map(|c| c.mean()))
}


fn rows_identical(data: &DMatrix<f64>) -> bool {
    data.nrows() < 2 || data.row_iter().skip(1).all(|row| row == data.row(0))
}


/// Flags rows whose squared Mahalanobis distance from the centroid exceeds the chi-square cutoff.
/// Data with no variation gives no outliers. Data that cannot support a covariance estimate (too
/// few rows for the number of columns, or a singular covariance matrix) gives a SingularMatrix
/// error, which callers treat as a signal to fall back to the Euclidean test.
pub fn mahalanobis_outliers(data: &DMatrix<f64>, plot_path: Option<&Path>)
        -> Result<Detection> {
    let (n, d) = data.shape();
    if rows_identical(data) {
        return Ok(Detection { outliers: Vec::new(), cutoff: None });
    }
    if d < 2 || n <= d {
        return Err(VirclustError::SingularMatrix(
            format!("{} rows and {} columns cannot give an invertible covariance", n, d)));
    }
    let centroid = column_means(data);
    let centred = DMatrix::from_fn(n, d, |i, j| data[(i, j)] - centroid[j]);
    let covariance = centred.transpose() * &centred / (n as f64 - 1.0);

    let singular_values = covariance.singular_values();
    let largest = singular_values.max();
    if largest <= 0.0 || singular_values.min() / largest < CONDITION_TOLERANCE {
        return Err(VirclustError::SingularMatrix("covariance matrix is singular".to_string()));
    }
    let inverse = covariance.clone().try_inverse().ok_or_else(|| {
        VirclustError::SingularMatrix("covariance matrix could not be inverted".to_string())
    })?;

    let cutoff = chi_square_cutoff(d)?;
    let outliers: Vec<usize> = (0..n).filter(|&i| {
        let diff: DVector<f64> = centred.row(i).transpose();
        diff.dot(&(&inverse * &diff)) > cutoff
    }).collect();

    if let Some(png) = plot_path {
        let block = covariance.view((0, 0), (2, 2)).into_owned().symmetric_eigen();
        let (v0, v1) = (block.eigenvalues[0].max(0.0), block.eigenvalues[1].max(0.0));
        let region = Region::Ellipse {
            semi_major: v0.sqrt() * cutoff.sqrt(),
            semi_minor: v1.sqrt() * cutoff.sqrt(),
            angle: block.eigenvectors[(1, 0)].atan2(block.eigenvectors[(0, 0)]),
        };
        save_plot(data, &outliers, &centroid, region, png);
    }
    Ok(Detection { outliers, cutoff: Some(cutoff) })
}


/// Flags rows whose signed sum of differences from the centroid exceeds the chi-square cutoff.
/// Note that this score is a sum, not a norm: negative and positive deviations cancel out. This
/// test always gives a result.
pub fn euclidean_outliers(data: &DMatrix<f64>, plot_path: Option<&Path>) -> Detection {
    let (n, d) = data.shape();
    let cutoff = match chi_square_cutoff(d) {
        Ok(c) if n > 0 => c,
        _ => return Detection { outliers: Vec::new(), cutoff: None },
    };
    let centroid = column_means(data);
    let outliers: Vec<usize> = (0..n).filter(|&i| {
        let score: f64 = (0..d).map(|j| data[(i, j)] - centroid[j]).sum();
        score > cutoff
    }).collect();
    if let Some(png) = plot_path {
        save_plot(data, &outliers, &centroid, Region::Circle { radius: cutoff }, png);
    }
    Detection { outliers, cutoff: Some(cutoff) }
}


fn save_plot(data: &DMatrix<f64>, outliers: &[usize], centroid: &DVector<f64>, region: Region,
             png: &Path) {
    // The plot is for diagnostics only, so failing to make it is not an error.
    if data.ncols() < 2 {
        return;
    }
    let points: Vec<(f64, f64)> = data.row_iter().map(|r| (r[0], r[1])).collect();
    if let Err(e) = scatter_plot(&points, outliers, (centroid[0], centroid[1]), region, png) {
        eprintln!("{} could not save {}: {}", "Warning:".yellow(), png.display(), e);
    }
}


pub fn token_matrix(aligned: &[(String, Vec<u8>)]) -> Result<DMatrix<f64>> {
    let tokens = aligned.iter().map(|(_, seq)| tokenize(seq)).collect::<Result<Vec<_>>>()?;
    let width = tokens.first().map(|t| t.len()).unwrap_or(0);
    if tokens.iter().any(|t| t.len() != width) {
        return Err(VirclustError::Computation("aligned sequences differ in length".to_string()));
    }
    Ok(DMatrix::from_fn(tokens.len(), width, |i, j| tokens[i][j] as f64))
}


/// Runs outlier detection over an aligned FASTA file. A missing alignment or similarity table
/// gives Ok(None).
pub fn relevant_accessions_from_alignment(paths: &DerivedPaths) -> Result<Option<OutlierReport>> {
    let aligned = match load_fasta(&paths.aligned) {
        Ok(a) => a,
        Err(VirclustError::MissingInput(p)) => {
            eprintln!("alignment file {} does not exist", p.display());
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let detected = detect_outliers(&aligned, &paths.similarity_table,
                                   Some(paths.outlier_plot.as_path()))?;
    Ok(detected.map(|(strategy, detection)| OutlierReport {
        accessions: aligned.into_iter().map(|(a, _)| a).collect(),
        outliers: detection.outliers, strategy, cutoff: detection.cutoff }))
}


/// Mahalanobis distance on the tokenised alignment is tried first. If that cannot be computed
/// (including alignments with symbols other than ACGT and gaps), the pairwise similarity table is
/// loaded instead and each element's vector of similarities (in alignment order) is given to the
/// Euclidean test. Gives Ok(None) only when the fallback is needed and the table is missing.
pub fn detect_outliers(aligned: &[(String, Vec<u8>)], similarity_table: &Path,
                       plot_path: Option<&Path>)
        -> Result<Option<(OutlierStrategy, Detection)>> {
    match token_matrix(aligned).and_then(|data| mahalanobis_outliers(&data, plot_path)) {
        Ok(detection) => return Ok(Some((OutlierStrategy::Mahalanobis, detection))),
        Err(VirclustError::SingularMatrix(msg)) | Err(VirclustError::Computation(msg)) => {
            eprintln!("Mahalanobis test not possible ({}), using similarity values", msg);
        }
        Err(e) => return Err(e),
    }
    let table = match SimilarityTable::load(similarity_table) {
        Ok(t) => t,
        Err(VirclustError::MissingInput(p)) => {
            eprintln!("similarity table {} does not exist", p.display());
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let order: Vec<&str> = aligned.iter().map(|(a, _)| a.as_str()).collect();
    let data = table.feature_matrix(&order)?;
    Ok(Some((OutlierStrategy::Euclidean, euclidean_outliers(&data, plot_path))))
}


/// Runs the Euclidean test directly on a pairwise similarity table. Sets of two or fewer
/// elements are too small to test and keep everything. A missing table gives Ok(None).
pub fn relevant_accessions_from_similarities(table_path: &Path, plot_path: Option<&Path>)
        -> Result<Option<OutlierReport>> {
    let table = match SimilarityTable::load(table_path) {
        Ok(t) => t,
        Err(VirclustError::MissingInput(p)) => {
            eprintln!("similarity table {} does not exist", p.display());
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let accessions = table.accessions().to_vec();
    if accessions.len() <= 2 {
        return Ok(Some(OutlierReport { accessions, outliers: Vec::new(),
                                       strategy: OutlierStrategy::None, cutoff: None }));
    }
    let order: Vec<&str> = accessions.iter().map(|a| a.as_str()).collect();
    let data = table.feature_matrix(&order)?;
    let detection = euclidean_outliers(&data, plot_path);
    Ok(Some(OutlierReport { accessions, outliers: detection.outliers,
                            strategy: OutlierStrategy::Euclidean, cutoff: detection.cutoff }))
}

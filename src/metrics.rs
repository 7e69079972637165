// This file contains the code for writing Virclust's YAML files of metrics.

// Copyright 2025 Ryan Wick (rrwick@gmail.com)

// This file is part of Virclust. Virclust is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. Virclust is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with Virclust. If not, see <http://www.gnu.org/licenses/>.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::misc::quit_with_error;
use crate::outliers::OutlierReport;
use crate::similarity::{SimilarityMethod, SimilaritySummary};


#[derive(Serialize, Deserialize, Debug, Default)]
pub struct SimilarityMetrics {
    pub name: String,
    pub method: String,
    pub mean_sequence_similarity: Option<f64>,
    pub min_sequence_similarity: Option<f64>,
    pub max_sequence_similarity: Option<f64>,
    pub med_sequence_similarity: Option<f64>,
}

impl SimilarityMetrics {
    pub fn new(name: &str, method: SimilarityMethod, summary: &SimilaritySummary) -> Self {
        SimilarityMetrics {
            name: name.to_string(),
            method: method.to_string(),
            mean_sequence_similarity: summary.mean,
            min_sequence_similarity: summary.min,
            max_sequence_similarity: summary.max,
            med_sequence_similarity: summary.median,
        }
    }

    pub fn save_to_yaml(&self, filename: &Path) { save_or_quit(filename, self); }
}


#[derive(Serialize, Deserialize, Debug, Default)]
pub struct OutlierMetrics {
    pub strategy: String,
    pub cutoff: Option<f64>,
    pub sequence_count: u32,
    pub relevant_sequence_count: u32,
    pub outlier_count: u32,
    pub relevant_genome_accessions: Vec<String>,
    pub outlier_accessions: Vec<String>,
}

impl OutlierMetrics {
    pub fn from_report(report: &OutlierReport) -> Self {
        let kept: Vec<String> = report.kept().into_iter().map(String::from).collect();
        let excluded: Vec<String> = report.excluded().into_iter().map(String::from).collect();
        OutlierMetrics {
            strategy: report.strategy.to_string(),
            cutoff: report.cutoff,
            sequence_count: report.accessions.len() as u32,
            relevant_sequence_count: kept.len() as u32,
            outlier_count: excluded.len() as u32,
            relevant_genome_accessions: kept,
            outlier_accessions: excluded,
        }
    }

    pub fn save_to_yaml(&self, filename: &Path) { save_or_quit(filename, self); }
}


#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ClusteringMetrics {
    pub homology_threshold: f64,
    pub element_count: u32,
    pub cluster_count: u32,
    pub singleton_cluster_count: u32,
    pub largest_cluster_size: u32,
}

impl ClusteringMetrics {
    /// Builds the metrics from each element's cluster key.
    pub fn new<K: Ord>(homology_threshold: f64, cluster_ids: &[K]) -> Self {
        let mut sizes: BTreeMap<&K, u32> = BTreeMap::new();
        for id in cluster_ids {
            *sizes.entry(id).or_insert(0) += 1;
        }
        ClusteringMetrics {
            homology_threshold,
            element_count: cluster_ids.len() as u32,
            cluster_count: sizes.len() as u32,
            singleton_cluster_count: sizes.values().filter(|&&s| s == 1).count() as u32,
            largest_cluster_size: sizes.values().copied().max().unwrap_or(0),
        }
    }

    pub fn save_to_yaml(&self, filename: &Path) { save_or_quit(filename, self); }
}


pub fn save_yaml<T: Serialize>(yaml_filename: &Path, data: &T) -> Result<()> {
    let yaml_string = serde_yaml::to_string(data)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let mut file = File::create(yaml_filename)?;
    file.write_all(yaml_string.as_bytes())?;
    Ok(())
}


fn save_or_quit<T: Serialize>(yaml_filename: &Path, data: &T) {
    if let Err(e) = save_yaml(yaml_filename, data) {
        quit_with_error(&format!("failed to write {}: {}", yaml_filename.display(), e));
    }
}

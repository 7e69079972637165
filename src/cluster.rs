// This file contains the code for the virclust cluster subcommand: sequences are clustered by
// homology with CD-HIT-EST, a representative is chosen for each cluster and every input row is
// annotated with its cluster.

// Copyright 2025 Ryan Wick (rrwick@gmail.com)

// This file is part of Virclust. Virclust is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. Virclust is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with Virclust. If not, see <http://www.gnu.org/licenses/>.

use colored::Colorize;
use fxhash::FxHashMap;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::cdhit::{assign_clusters, group_by_cluster, nucleotide_word_length, ClusteringParams};
use crate::context::RunContext;
use crate::error::{Result, VirclustError};
use crate::log::{section_header, explanation};
use crate::metrics::ClusteringMetrics;
use crate::misc::{check_if_dir_is_not_dir, check_if_file_exists, create_dir, fasta_stem,
                  format_duration, format_float, load_fasta, quit_with_error, sanitise_name,
                  spinner};
use crate::representative::select_representative;
use crate::sequence::{Element, ElementSet};
use crate::tools::ToolPaths;


pub fn cluster(in_file: PathBuf, out_dir: PathBuf, threshold: f64, memory: u32, threads: usize,
               timeout: Option<u64>, cdhit_dir: Option<PathBuf>) {
    let start_time = Instant::now();
    let clusters_tsv = out_dir.join("clusters.tsv");
    let clustering_yaml = out_dir.join("clustering.yaml");
    check_settings(&in_file, &out_dir, threshold, memory, threads);
    starting_message();
    print_settings(&in_file, &out_dir, threshold, memory, threads, &timeout, &cdhit_dir);
    create_dir(&out_dir);
    let params = ClusteringParams { homology_threshold: threshold, memory_limit_mb: memory };
    let ctx = RunContext::new(&out_dir, "virclust", timeout)
        .with_tools(ToolPaths::with_cdhit_dir(cdhit_dir.as_deref()));

    let input = load_input(&in_file).unwrap_or_else(|e| quit_with_error(&e.to_string()));
    print_input_info(&input);
    let assignments = cluster_all_sets(&input, &params, &ctx);
    input.save_annotated(&assignments, &clusters_tsv)
         .unwrap_or_else(|e| quit_with_error(&e.to_string()));
    let cluster_keys: Vec<(&str, u32)> = assignments.iter()
        .flat_map(|(identity, a)| a.iter().map(move |c| (identity.as_str(), c.cluster_id)))
        .collect();
    ClusteringMetrics::new(threshold, &cluster_keys).save_to_yaml(&clustering_yaml);
    finished_message(start_time, &clusters_tsv, &clustering_yaml);
}


fn check_settings(in_file: &Path, out_dir: &Path, threshold: f64, memory: u32, threads: usize) {
    check_if_file_exists(in_file);
    check_if_dir_is_not_dir(out_dir);
    if threshold <= 0.0 || threshold > 1.0 {
        quit_with_error("--threshold must be greater than 0 and no more than 1");
    }
    if memory < 100  { quit_with_error("--memory cannot be less than 100"); }
    if threads < 1   { quit_with_error("--threads cannot be less than 1"); }
    if threads > 100 { quit_with_error("--threads cannot be greater than 100"); }
    let _ = ThreadPoolBuilder::new().num_threads(threads).build_global();
}


fn starting_message() {
    section_header("Starting virclust cluster");
    explanation("This command clusters sequences by homology using CD-HIT-EST and picks a \
                 representative for each cluster: the member with the smallest total edit \
                 distance to the other members. If the input table has a taxon_name column, \
                 each taxon is clustered separately.");
}


fn print_settings(in_file: &Path, out_dir: &Path, threshold: f64, memory: u32, threads: usize,
                  timeout: &Option<u64>, cdhit_dir: &Option<PathBuf>) {
    eprintln!("Settings:");
    eprintln!("  --in_file {}", in_file.display());
    eprintln!("  --out_dir {}", out_dir.display());
    eprintln!("  --threshold {} (word length {})", format_float(threshold),
              nucleotide_word_length(threshold));
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


fn print_input_info(input: &InputTable) {
    section_header("Loading input");
    explanation("Input sequences are loaded and grouped into element sets.");
    for set in &input.sets {
        eprintln!("{}: {} sequence{}", set.identity, set.len(),
                  if set.len() == 1 { "" } else { "s" });
    }
    eprintln!();
}


fn finished_message(start_time: Instant, clusters_tsv: &Path, clustering_yaml: &Path) {
    section_header("Finished!");
    eprintln!("Cluster annotations: {}", clusters_tsv.display());
    eprintln!("Clustering metrics:  {}", clustering_yaml.display());
    eprintln!();
    eprintln!("Time to run: {}", format_duration(start_time.elapsed()));
    eprintln!();
}


fn cluster_all_sets(input: &InputTable, params: &ClusteringParams, ctx: &RunContext)
        -> BTreeMap<String, Vec<ClusterAssignment>> {
    section_header("Clustering");
    explanation("Each element set is clustered with CD-HIT-EST and a representative is chosen \
                 for each cluster.");
    let mut all_assignments = BTreeMap::new();
    for set in &input.sets {
        let pb = spinner(&format!("clustering {}...", set.identity));
        let assignments = cluster_elements(set, params, ctx);
        pb.finish_and_clear();
        match assignments {
            Ok(a) => {
                print_cluster_summary(set, &a);
                all_assignments.insert(set.identity.clone(), a);
            }
            Err(e) => quit_with_error(&format!("clustering {} failed: {}", set.identity, e)),
        }
    }
    eprintln!();
    all_assignments
}


fn print_cluster_summary(set: &ElementSet, assignments: &[ClusterAssignment]) {
    let representatives: Vec<&str> = assignments.iter()
        .filter(|a| a.accession == a.representative).map(|a| a.accession.as_str()).collect();
    eprintln!("{}: {} sequences in {} clusters", set.identity, set.len(),
              representatives.len().to_string().bold());
    for rep in representatives {
        eprintln!("  {} {}", rep, "representative".green());
    }
}


/// One element's place in the clustering.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterAssignment {
    pub accession: String,
    pub cluster_id: u32,
    pub representative: String,
}


/// Clusters an element set and picks each cluster's representative. The result has one entry
/// per element, in element set order. Representatives are chosen in parallel across clusters.
pub fn cluster_elements(set: &ElementSet, params: &ClusteringParams, ctx: &RunContext)
        -> Result<Vec<ClusterAssignment>> {
    let cluster_ids = assign_clusters(set, params, ctx)?;
    let groups: Vec<(u32, Vec<&str>)> = group_by_cluster(set, &cluster_ids).into_iter().collect();
    let representatives: FxHashMap<u32, String> = groups.par_iter()
        .map(|(id, accessions)| -> Result<(u32, String)> {
            let members: Vec<&Element> = accessions.iter().filter_map(|a| set.get(a)).collect();
            let rep = select_representative(&members).ok_or_else(|| {
                VirclustError::IntegrityFault(format!("cluster {} of {} has no members", id,
                                                      set.identity))
            })?;
            Ok((*id, rep.to_string()))
        }).collect::<Result<_>>()?;
    let mut assignments = Vec::with_capacity(set.len());
    for accession in set.accessions() {
        let cluster_id = *cluster_ids.get(accession).ok_or_else(|| {
            VirclustError::IntegrityFault(format!("{} not assigned to any cluster", accession))
        })?;
        let representative = representatives.get(&cluster_id).cloned().ok_or_else(|| {
            VirclustError::IntegrityFault(format!("cluster {} has no representative", cluster_id))
        })?;
        assignments.push(ClusterAssignment { accession: accession.to_string(), cluster_id,
                                             representative });
    }
    check_assignments(set, &assignments)?;
    Ok(assignments)
}


fn check_assignments(set: &ElementSet, assignments: &[ClusterAssignment]) -> Result<()> {
    if assignments.len() != set.len() {
        return Err(VirclustError::IntegrityFault(
            format!("{} of {} elements in {} were annotated", assignments.len(), set.len(),
                    set.identity)));
    }
    let cluster_of: FxHashMap<&str, u32> = assignments.iter()
        .map(|a| (a.accession.as_str(), a.cluster_id)).collect();
    for a in assignments {
        if cluster_of.get(a.representative.as_str()) != Some(&a.cluster_id) {
            return Err(VirclustError::IntegrityFault(
                format!("representative {} is not a member of cluster {}", a.representative,
                        a.cluster_id)));
        }
    }
    Ok(())
}


/// The rows of an input file along with the element sets built from them. FASTA input has a
/// single accession column. TSV input keeps all of its columns for the annotated output.
pub struct InputTable {
    pub headers: Vec<String>,
    pub rows: Vec<InputRow>,
    pub sets: Vec<ElementSet>,
}

pub struct InputRow {
    pub identity: String,
    pub accession: String,
    pub fields: Vec<String>,
}


pub fn load_input(in_file: &Path) -> Result<InputTable> {
    if in_file.to_string_lossy().ends_with(".tsv") {
        load_tsv(in_file)
    } else {
        load_fasta_input(in_file)
    }
}


fn load_fasta_input(in_file: &Path) -> Result<InputTable> {
    let identity = sanitise_name(&fasta_stem(in_file));
    let seqs = load_fasta(in_file)?;
    let rows = seqs.iter().map(|(name, _)| InputRow { identity: identity.clone(),
                                                      accession: name.clone(),
                                                      fields: vec![name.clone()] }).collect();
    let elements = seqs.into_iter().map(|(name, seq)| Element { accession: name, seq,
                                                                taxon: None }).collect();
    Ok(InputTable { headers: vec!["accession".to_string()], rows,
                    sets: vec![ElementSet::new(&identity, elements)?] })
}


/// Loads a TSV with accession and sequence columns. Rows with a taxon_name are grouped into one
/// element set per taxon, others go into a set named after the file.
fn load_tsv(in_file: &Path) -> Result<InputTable> {
    let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(in_file)?;
    let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let (acc_col, seq_col) = match (column("accession"), column("sequence")) {
        (Some(a), Some(s)) => (a, s),
        _ => return Err(VirclustError::Parse {
            path: in_file.to_path_buf(),
            message: "TSV input needs accession and sequence columns".to_string() }),
    };
    let taxon_col = column("taxon_name");
    let default_identity = sanitise_name(fasta_stem(in_file).trim_end_matches(".tsv"));

    let mut rows = Vec::new();
    let mut grouped: Vec<(Option<String>, String, Vec<Element>)> = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("").trim().to_string();
        let accession = field(acc_col);
        let seq = field(seq_col).into_bytes().to_ascii_uppercase();
        if accession.is_empty() || seq.is_empty() {
            return Err(VirclustError::Parse {
                path: in_file.to_path_buf(),
                message: format!("row {} is missing an accession or sequence", rows.len() + 1) });
        }
        let taxon = taxon_col.map(field).filter(|t| !t.is_empty());
        let element = match &taxon {
            Some(t) => Element::with_taxon(&accession, &seq, t),
            None    => Element::new(&accession, &seq),
        };
        let group = match grouped.iter().position(|(t, _, _)| *t == taxon) {
            Some(g) => g,
            None => {
                let base = taxon.as_deref().map(sanitise_name)
                                           .unwrap_or_else(|| default_identity.clone());
                let taken: Vec<&str> = grouped.iter().map(|(_, i, _)| i.as_str()).collect();
                let identity = unique_identity(&base, &taken);
                grouped.push((taxon, identity, Vec::new()));
                grouped.len() - 1
            }
        };
        grouped[group].2.push(element);
        rows.push(InputRow { identity: grouped[group].1.clone(), accession,
                             fields: record.iter().map(String::from).collect() });
    }
    if rows.is_empty() {
        return Err(VirclustError::Parse { path: in_file.to_path_buf(),
                                          message: "contains no sequences".to_string() });
    }
    let sets = grouped.into_iter()
        .map(|(_, identity, elements)| ElementSet::new(&identity, elements))
        .collect::<Result<Vec<_>>>()?;
    Ok(InputTable { headers, rows, sets })
}


/// Different taxon names can sanitise to the same identity (e.g. "Virus A" and "Virus-A"), so a
/// numeric suffix keeps each taxon in its own element set.
fn unique_identity(base: &str, taken: &[&str]) -> String {
    if !taken.contains(&base) {
        return base.to_string();
    }
    (2..).map(|n| format!("{}_{}", base, n)).find(|c| !taken.contains(&c.as_str()))
         .unwrap_or_default()
}


impl InputTable {
    /// Writes every input row (in input order) with cluster_id and cluster_representative
    /// columns added.
    pub fn save_annotated(&self, assignments: &BTreeMap<String, Vec<ClusterAssignment>>,
                          out_tsv: &Path) -> Result<()> {
        let lookup: FxHashMap<(&str, &str), &ClusterAssignment> = assignments.iter()
            .flat_map(|(identity, a)| a.iter().map(move |c| ((identity.as_str(),
                                                               c.accession.as_str()), c)))
            .collect();
        let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(out_tsv)?;
        let mut header = self.headers.clone();
        header.push("cluster_id".to_string());
        header.push("cluster_representative".to_string());
        writer.write_record(&header)?;
        for row in &self.rows {
            let a = lookup.get(&(row.identity.as_str(), row.accession.as_str()))
                .ok_or_else(|| VirclustError::IntegrityFault(
                    format!("{} was not assigned to a cluster", row.accession)))?;
            let mut fields = row.fields.clone();
            fields.push(a.cluster_id.to_string());
            fields.push(a.representative.clone());
            writer.write_record(&fields)?;
        }
        writer.flush()?;
        Ok(())
    }
}

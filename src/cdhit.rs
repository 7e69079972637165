// This file contains the code for assigning elements to homology clusters with CD-HIT: writing
// its input under opaque IDs, running it and parsing its .clstr report back into accessions.

// Copyright 2025 Ryan Wick (rrwick@gmail.com)

// This file is part of Virclust. Virclust is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. Virclust is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with Virclust. If not, see <http://www.gnu.org/licenses/>.

use fxhash::FxHashSet;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::context::{get_or_create, RunContext};
use crate::error::{Result, VirclustError};
use crate::misc::write_fasta;
use crate::sequence::ElementSet;
use crate::tools::ToolCommand;


/// Numeric settings for homology clustering.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClusteringParams {
    pub homology_threshold: f64,
    pub memory_limit_mb: u32,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        ClusteringParams { homology_threshold: 0.99, memory_limit_mb: 4000 }
    }
}


/// CD-HIT-EST word length for a nucleotide identity threshold. Lower thresholds need shorter
/// words.
pub fn nucleotide_word_length(threshold: f64) -> u32 {
    if threshold > 0.7      { 8 }
    else if threshold > 0.6 { 4 }
    else if threshold > 0.5 { 3 }
    else                    { 2 }
}


/// CD-HIT (protein mode) word length for an identity threshold. CD-HIT does not accept
/// thresholds below 0.4.
pub fn protein_word_length(threshold: f64) -> Result<u32> {
    let bands = [(0.7, 1.0, 5), (0.6, 0.7, 4), (0.5, 0.6, 3), (0.4, 0.5, 2)];
    for (low, high, word_length) in bands {
        if low <= threshold && threshold <= high {
            return Ok(word_length);
        }
    }
    Err(VirclustError::InvalidParameter(
        format!("no CD-HIT word length for a threshold of {}", threshold)))
}


/// One member line of a .clstr report.
#[derive(Clone, Debug, PartialEq)]
pub struct ClstrMember {
    pub name: String,
    pub is_representative: bool,
    pub identity: Option<f64>,
}

impl ClstrMember {
    /// Identity to the cluster's representative as a fraction. Representatives (and members of
    /// single-member clusters) have no percentage in the report and count as identical.
    pub fn similarity(&self) -> f64 {
        self.identity.unwrap_or(1.0)
    }
}


#[derive(Clone, Debug, PartialEq)]
pub struct ClstrCluster {
    pub id: u32,
    pub members: Vec<ClstrMember>,
}

impl ClstrCluster {
    pub fn representative(&self) -> Option<&ClstrMember> {
        self.members.iter().find(|m| m.is_representative).or(self.members.first())
    }
}


/// Parser for CD-HIT .clstr reports, which look like this:
///   >Cluster 0
///   0	1500nt, >S0... *
///   1	1490nt, >S3... at +/95.50%
pub struct ClstrParser {
    member: Regex,
    percentage: Regex,
}

impl ClstrParser {
    pub fn new() -> Self {
        ClstrParser { member: Regex::new(r">(.*?)\.\.\.").unwrap(),
                      percentage: Regex::new(r"(\d+\.\d*)%").unwrap() }
    }

    pub fn parse(&self, text: &str) -> std::result::Result<Vec<ClstrCluster>, String> {
        let mut clusters = Vec::new();
        for block in text.split(">Cluster").skip(1) {
            let mut lines = block.lines();
            let id_text = lines.next().unwrap_or("").trim();
            let id = id_text.parse::<u32>()
                .map_err(|_| format!("bad cluster id: {}", id_text))?;
            let mut members = Vec::new();
            for line in lines.filter(|l| !l.trim().is_empty()) {
                let name = match self.member.captures(line) {
                    Some(c) => c[1].to_string(),
                    None    => return Err(format!("bad member line: {}", line)),
                };
                let is_representative = line.trim_end().ends_with('*');
                members.push(ClstrMember { name, is_representative,
                                           identity: self.percentage_in(line) });
            }
            clusters.push(ClstrCluster { id, members });
        }
        Ok(clusters)
    }

    pub fn parse_file(&self, path: &Path) -> Result<Vec<ClstrCluster>> {
        if !path.is_file() {
            return Err(VirclustError::MissingInput(path.to_path_buf()));
        }
        self.parse(&fs::read_to_string(path)?)
            .map_err(|message| VirclustError::Parse { path: path.to_path_buf(), message })
    }

    fn percentage_in(&self, line: &str) -> Option<f64> {
        self.percentage.captures(line).and_then(|c| c[1].parse::<f64>().ok()).map(|p| p / 100.0)
    }

    /// Every percentage in the report, as fractions.
    pub fn all_percentages(&self, text: &str) -> Vec<f64> {
        self.percentage.captures_iter(text)
            .filter_map(|c| c[1].parse::<f64>().ok()).map(|p| p / 100.0).collect()
    }
}

impl Default for ClstrParser {
    fn default() -> Self { Self::new() }
}


/// The CD-HIT input for one element set: sequences under opaque IDs (S0, S1, ...) so that
/// CD-HIT's name length and character limits never matter, plus the map back to accessions.
pub struct OpaqueInput {
    pub fasta: PathBuf,
    pub translator: PathBuf,
    pub names: BTreeMap<String, String>,
}

impl OpaqueInput {
    /// Writes (or reuses) sequences.fasta and names_translator.json in the given directory. The
    /// translator is always fully written before this returns, so it exists before CD-HIT runs.
    pub fn prepare(set: &ElementSet, aux_dir: &Path) -> Result<OpaqueInput> {
        let fasta = aux_dir.join("sequences.fasta");
        let translator = aux_dir.join("names_translator.json");
        if !fasta.is_file() || !translator.is_file() {
            let _ = fs::remove_file(&fasta);
            let _ = fs::remove_file(&translator);
        }
        let opaque: Vec<(String, &str, &[u8])> = set.elements().iter().enumerate()
            .map(|(i, e)| (format!("S{}", i), e.accession.as_str(), e.seq.as_slice())).collect();
        get_or_create(&translator, |tmp| {
            let names: BTreeMap<&str, &str> = opaque.iter().map(|(id, acc, _)| (id.as_str(), *acc))
                                                    .collect();
            fs::write(tmp, serde_json::to_string_pretty(&names)?)?;
            Ok(())
        })?;
        get_or_create(&fasta, |tmp| {
            write_fasta(tmp, opaque.iter().map(|(id, _, seq)| (id.as_str(), *seq)))
        })?;
        let names: BTreeMap<String, String> =
            serde_json::from_str(&fs::read_to_string(&translator)?)?;
        check_translator(&names, set)?;
        Ok(OpaqueInput { fasta, translator, names })
    }

    pub fn accession(&self, opaque_id: &str) -> Result<&str> {
        self.names.get(opaque_id).map(|s| s.as_str()).ok_or_else(|| {
            VirclustError::IntegrityFault(format!("{} is not in {}", opaque_id,
                                                  self.translator.display()))
        })
    }
}


fn check_translator(names: &BTreeMap<String, String>, set: &ElementSet) -> Result<()> {
    // A translator left over from a different element set would silently mislabel clusters.
    let translated: FxHashSet<&str> = names.values().map(|s| s.as_str()).collect();
    if translated.len() != names.len() || translated.len() != set.len() ||
            set.accessions().iter().any(|a| !translated.contains(a)) {
        return Err(VirclustError::IntegrityFault(
            format!("existing names translator does not match the sequences of {} (delete the \
                     auxiliary directory to rebuild it)", set.identity)));
    }
    Ok(())
}


/// Runs CD-HIT-EST on an element set and returns each accession's cluster ID. The .clstr report
/// is cached in the element set's auxiliary directory. Every accession must end up in exactly
/// one cluster, anything else is an integrity fault.
pub fn assign_clusters(set: &ElementSet, params: &ClusteringParams, ctx: &RunContext)
        -> Result<BTreeMap<String, u32>> {
    let aux_dir = ctx.aux_dir(&set.identity)?;
    let input = OpaqueInput::prepare(set, &aux_dir)?;
    let threshold = params.homology_threshold;
    let out_base = aux_dir.join(format!("cdhit_out_thr_{}", threshold));
    let report = with_suffix(&out_base, ".clstr");
    let command = ToolCommand::new(&ctx.tools.cd_hit_est)
        .arg("-i").arg(&input.fasta).arg("-o").arg(&out_base)
        .arg("-c").arg(threshold.to_string())
        .arg("-n").arg(nucleotide_word_length(threshold).to_string())
        .arg("-M").arg(params.memory_limit_mb.to_string())
        .stdout_to(&aux_dir.join("cdhit.log"));
    run_for_report(&command, &report, ctx)?;

    let clusters = ClstrParser::new().parse_file(&report)?;
    if clusters.iter().all(|c| c.members.is_empty()) {
        return Err(VirclustError::ExternalToolFailure {
            command: command.description(), status: "report contains no clusters".to_string() });
    }
    assignments_from_clusters(&clusters, &input, set)
}


/// Runs a CD-HIT command unless its .clstr report already exists. CD-HIT writes the report as it
/// goes, so a failed or timed-out run has its partial report deleted and is never reused.
pub fn run_for_report(command: &ToolCommand, report: &Path, ctx: &RunContext) -> Result<()> {
    get_or_create(report, |tmp| {
        if let Err(e) = command.run(ctx.timeout) {
            if report.is_file() {
                fs::remove_file(report)?;
            }
            return Err(e);
        }
        if !report.is_file() {
            return Err(VirclustError::ExternalToolFailure {
                command: command.description(),
                status: format!("{} was not created", report.display()) });
        }
        fs::copy(report, tmp)?;
        fs::remove_file(report)?;
        Ok(())
    })?;
    Ok(())
}


pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}


pub fn assignments_from_clusters(clusters: &[ClstrCluster], input: &OpaqueInput,
                                 set: &ElementSet) -> Result<BTreeMap<String, u32>> {
    let mut assignments: BTreeMap<String, u32> = BTreeMap::new();
    for cluster in clusters {
        for member in &cluster.members {
            let accession = input.accession(&member.name)?;
            if let Some(previous) = assignments.insert(accession.to_string(), cluster.id) {
                return Err(VirclustError::IntegrityFault(
                    format!("{} is in both cluster {} and cluster {}", accession, previous,
                            cluster.id)));
            }
        }
    }
    let missing: Vec<&str> = set.accessions().into_iter()
                                .filter(|a| !assignments.contains_key(*a)).collect();
    if !missing.is_empty() {
        return Err(VirclustError::IntegrityFault(
            format!("{} not assigned to any cluster", missing.join(", "))));
    }
    Ok(assignments)
}


/// Groups accessions by cluster ID, keeping each cluster's members in element set order.
pub fn group_by_cluster<'a>(set: &'a ElementSet, assignments: &BTreeMap<String, u32>)
        -> BTreeMap<u32, Vec<&'a str>> {
    let mut groups: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
    for accession in set.accessions() {
        if let Some(&id) = assignments.get(accession) {
            groups.entry(id).or_default().push(accession);
        }
    }
    groups
}


/// Member-to-representative similarities from a report, with opaque IDs translated.
pub fn member_similarities(clusters: &[ClstrCluster], input: &OpaqueInput)
        -> Result<Vec<(String, String, f64)>> {
    let mut records = Vec::new();
    for cluster in clusters {
        let representative = match cluster.representative() {
            Some(r) => input.accession(&r.name)?,
            None    => continue,
        };
        for member in &cluster.members {
            records.push((input.accession(&member.name)?.to_string(), representative.to_string(),
                          member.similarity()));
        }
    }
    Ok(records)
}

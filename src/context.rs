// This file defines the run context that is threaded through Virclust's components, the file
// paths derived from an element set's identity and the filesystem cache used for intermediate
// files.

// Copyright 2025 Ryan Wick (rrwick@gmail.com)

// This file is part of Virclust. Virclust is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. Virclust is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with Virclust. If not, see <http://www.gnu.org/licenses/>.

use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

use crate::error::Result;
use crate::misc::fasta_stem;
use crate::tools::ToolPaths;


/// Everything a component needs to know about the current run. Nothing in Virclust reads the
/// current directory or process ID to build paths: they all come from here.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub work_dir: PathBuf,
    pub run_id: String,
    pub timeout: Option<Duration>,
    pub tools: ToolPaths,
}

impl RunContext {
    pub fn new(work_dir: &Path, run_id: &str, timeout_secs: Option<u64>) -> Self {
        RunContext {
            work_dir: work_dir.to_path_buf(),
            run_id: run_id.to_string(),
            timeout: timeout_secs.map(Duration::from_secs),
            tools: ToolPaths::default(),
        }
    }

    pub fn with_tools(mut self, tools: ToolPaths) -> Self {
        self.tools = tools;
        self
    }

    /// Each element set gets its own auxiliary directory, so concurrent element sets never write
    /// to the same intermediate files.
    pub fn aux_dir(&self, identity: &str) -> Result<PathBuf> {
        let dir = self.work_dir.join(format!("{}_aux", self.run_id)).join(identity);
        create_dir_all(&dir)?;
        Ok(dir)
    }
}


/// Deterministic file paths for one element set.
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedPaths {
    pub identity: String,
    pub unaligned: PathBuf,
    pub aligned: PathBuf,
    pub similarity_table: PathBuf,
    pub pairwise_table: PathBuf,
    pub mafft_log: PathBuf,
    pub outlier_plot: PathBuf,
    pub similarity_yaml: PathBuf,
    pub outlier_yaml: PathBuf,
}

impl DerivedPaths {
    pub fn from_fasta(unaligned: &Path) -> Self {
        let identity = fasta_stem(unaligned);
        let dir = unaligned.parent().unwrap_or(Path::new(".")).to_path_buf();
        let derived = |suffix: &str| dir.join(format!("{}{}", identity, suffix));
        DerivedPaths {
            unaligned: unaligned.to_path_buf(),
            aligned: derived("_aligned.fasta"),
            similarity_table: derived("_similarity_values.csv"),
            pairwise_table: derived("_sequences_similarity.csv"),
            mafft_log: derived(".log"),
            outlier_plot: derived("_outliers.png"),
            similarity_yaml: derived("_similarity.yaml"),
            outlier_yaml: derived("_outliers.yaml"),
            identity,
        }
    }

    /// Paths for an already-aligned FASTA, e.g. one given directly to the outliers subcommand.
    pub fn from_aligned_fasta(aligned: &Path) -> Self {
        let stem = fasta_stem(aligned);
        let base = stem.strip_suffix("_aligned").unwrap_or(&stem).to_string();
        let dir = aligned.parent().unwrap_or(Path::new("."));
        let mut paths = DerivedPaths::from_fasta(&dir.join(format!("{}.fasta", base)));
        paths.aligned = aligned.to_path_buf();
        paths
    }

    /// CD-HIT member table for one threshold, so runs at different thresholds never share it.
    pub fn cdhit_table(&self, threshold: f64) -> PathBuf {
        let dir = self.unaligned.parent().unwrap_or(Path::new("."));
        dir.join(format!("{}_cdhit_thr_{}_similarity_values.csv", self.identity, threshold))
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    Reused,
    Created,
}


/// Identity-addressed file memoisation. If the target exists it is reused as is. Otherwise the
/// producer writes to a temporary file in the same directory, which is then moved into place, so
/// a half-written file never appears at the target path. Nothing is invalidated automatically:
/// delete the file to force recomputation.
pub fn get_or_create<F>(target: &Path, producer: F) -> Result<CacheStatus>
        where F: FnOnce(&Path) -> Result<()> {
    if target.is_file() {
        return Ok(CacheStatus::Reused);
    }
    let dir = target.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    create_dir_all(dir)?;
    let temp = NamedTempFile::new_in(dir)?;
    producer(temp.path())?;
    temp.persist(target).map_err(|e| e.error)?;
    Ok(CacheStatus::Created)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use crate::error::VirclustError;

    #[test]
    fn test_derived_paths() {
        let paths = DerivedPaths::from_fasta(Path::new("/data/Influenza_A.fasta"));
        assert_eq!(paths.identity, "Influenza_A");
        assert_eq!(paths.aligned, PathBuf::from("/data/Influenza_A_aligned.fasta"));
        assert_eq!(paths.similarity_table,
                   PathBuf::from("/data/Influenza_A_similarity_values.csv"));
        assert_eq!(paths.mafft_log, PathBuf::from("/data/Influenza_A.log"));
        assert_eq!(paths.cdhit_table(0.9),
                   PathBuf::from("/data/Influenza_A_cdhit_thr_0.9_similarity_values.csv"));
        assert_ne!(paths.cdhit_table(0.9), paths.cdhit_table(0.5));

        let from_aligned = DerivedPaths::from_aligned_fasta(
            Path::new("/data/Influenza_A_aligned.fasta"));
        assert_eq!(from_aligned.identity, "Influenza_A");
        assert_eq!(from_aligned.similarity_table, paths.similarity_table);
        assert_eq!(from_aligned.aligned, paths.aligned);
    }

    #[test]
    fn test_aux_dir() {
        let dir = tempdir().unwrap();
        let ctx = RunContext::new(dir.path(), "run1", Some(10));
        let aux_a = ctx.aux_dir("a").unwrap();
        let aux_b = ctx.aux_dir("b").unwrap();
        assert_ne!(aux_a, aux_b);
        assert!(aux_a.is_dir());
        assert_eq!(ctx.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_get_or_create() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("sub").join("x.txt");
        let status = get_or_create(&target, |p| { fs::write(p, "first")?; Ok(()) }).unwrap();
        assert_eq!(status, CacheStatus::Created);
        let status = get_or_create(&target, |p| { fs::write(p, "second")?; Ok(()) }).unwrap();
        assert_eq!(status, CacheStatus::Reused);
        assert_eq!(fs::read_to_string(&target).unwrap(), "first");
    }

    #[test]
    fn test_get_or_create_failure_leaves_no_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("x.txt");
        let result = get_or_create(&target, |p| {
            fs::write(p, "partial")?;
            Err(VirclustError::Computation("producer failed".to_string()))
        });
        assert!(result.is_err());
        assert!(!target.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}

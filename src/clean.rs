// This file contains the code for the virclust clean subcommand, which pulls a subset of
// sequences out of an alignment without realigning them.

// Copyright 2025 Ryan Wick (rrwick@gmail.com)

// This file is part of Virclust. Virclust is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. Virclust is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with Virclust. If not, see <http://www.gnu.org/licenses/>.

use std::path::{Path, PathBuf};

use crate::error::{Result, VirclustError};
use crate::log::{section_header, explanation};
use crate::misc::{check_if_file_exists, load_fasta, quit_with_error, write_fasta};


pub fn clean(in_aligned: PathBuf, out_fasta: PathBuf, keep: String) {
    check_settings(&in_aligned);
    starting_message();
    let keep = parse_keep_list(&keep);
    print_settings(&in_aligned, &out_fasta, &keep);
    section_header("Cleaning alignment");
    explanation("Sequences not in the keep list are removed, along with any alignment columns \
                 which are now entirely gaps.");
    let keep: Vec<&str> = keep.iter().map(|s| s.as_str()).collect();
    match clean_alignment(&in_aligned, &keep, &out_fasta) {
        Ok(columns) => eprintln!("{} sequences, {} columns\n", keep.len(), columns),
        Err(e)      => quit_with_error(&e.to_string()),
    }
    finished_message(&out_fasta);
}


fn check_settings(in_aligned: &Path) {
    check_if_file_exists(in_aligned);
}


fn starting_message() {
    section_header("Starting virclust clean");
    explanation("This command takes an aligned FASTA file and a list of accessions and makes a \
                 smaller alignment of just those sequences. No realignment is done.");
}


fn print_settings(in_aligned: &Path, out_fasta: &Path, keep: &[String]) {
    eprintln!("Settings:");
    eprintln!("  --in_aligned {}", in_aligned.display());
    eprintln!("  --out_fasta {}", out_fasta.display());
    eprintln!("  --keep {}", keep.join(","));
    eprintln!();
}


fn finished_message(out_fasta: &Path) {
    section_header("Finished!");
    eprintln!("Cleaned alignment: {}", out_fasta.display());
    eprintln!();
}


fn parse_keep_list(keep: &str) -> Vec<String> {
    // Accepts comma or semicolon separators, so the outliers subcommand's output can be used.
    let accessions: Vec<String> = keep.split([',', ';']).map(|s| s.trim())
                                      .filter(|s| !s.is_empty()).map(String::from).collect();
    if accessions.is_empty() {
        quit_with_error("--keep must name at least one accession");
    }
    accessions
}


/// Writes the kept sequences (in alignment order) with every all-gap column removed. Returns the
/// number of columns left.
pub fn clean_alignment(aligned: &Path, keep: &[&str], out_fasta: &Path) -> Result<usize> {
    let seqs = load_fasta(aligned)?;
    for k in keep {
        if !seqs.iter().any(|(name, _)| name == *k) {
            return Err(VirclustError::IntegrityFault(
                format!("{} is not in {}", k, aligned.display())));
        }
    }
    let kept: Vec<&(String, Vec<u8>)> = seqs.iter()
        .filter(|(name, _)| keep.contains(&name.as_str())).collect();
    let width = kept.first().map(|(_, s)| s.len()).unwrap_or(0);
    if kept.iter().any(|(_, s)| s.len() != width) {
        return Err(VirclustError::Parse { path: aligned.to_path_buf(),
                                          message: "sequences differ in length".to_string() });
    }
    let columns: Vec<usize> = (0..width).filter(|&i| kept.iter().any(|(_, s)| s[i] != b'-'))
                                        .collect();
    let cleaned: Vec<(&str, Vec<u8>)> = kept.iter()
        .map(|(name, s)| (name.as_str(), columns.iter().map(|&i| s[i]).collect())).collect();
    write_fasta(out_fasta, cleaned.iter().map(|(name, s)| (*name, s.as_slice())))?;
    Ok(columns.len())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::panic;
    use tempfile::tempdir;
    use crate::tests::make_test_file;

    #[test]
    fn test_parse_keep_list() {
        assert_eq!(parse_keep_list("a,b;c"), vec!["a", "b", "c"]);
        assert_eq!(parse_keep_list(" a , b "), vec!["a", "b"]);
        assert!(panic::catch_unwind(|| parse_keep_list(",;")).is_err());
    }

    #[test]
    fn test_clean_alignment() {
        let dir = tempdir().unwrap();
        let aligned = dir.path().join("set_aligned.fasta");
        let out = dir.path().join("clean.fasta");
        make_test_file(&aligned, ">a\nAC-GT-\n>b\nTTTTTT\n>c\nAC--TA\n");
        assert_eq!(clean_alignment(&aligned, &["c", "a"], &out).unwrap(), 5);
        assert_eq!(fs::read_to_string(&out).unwrap(), ">a\nACGT-\n>c\nAC-TA\n");
    }

    #[test]
    fn test_clean_alignment_problems() {
        let dir = tempdir().unwrap();
        let aligned = dir.path().join("set_aligned.fasta");
        let out = dir.path().join("clean.fasta");
        make_test_file(&aligned, ">a\nACGT\n>b\nACG\n");
        assert!(matches!(clean_alignment(&aligned, &["x"], &out),
                         Err(VirclustError::IntegrityFault(_))));
        assert!(matches!(clean_alignment(&aligned, &["a", "b"], &out),
                         Err(VirclustError::Parse { .. })));
        assert!(matches!(clean_alignment(&dir.path().join("none.fasta"), &["a"], &out),
                         Err(VirclustError::MissingInput(_))));
    }
}

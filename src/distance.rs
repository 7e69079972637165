// This file contains the distance and similarity measures used to compare two sequences.

// Copyright 2025 Ryan Wick (rrwick@gmail.com)

// This file is part of Virclust. Virclust is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. Virclust is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with Virclust. If not, see <http://www.gnu.org/licenses/>.

use bio::alignment::AlignmentOperation;
use bio::alignment::distance::levenshtein;
use bio::alignment::pairwise::Aligner;
use colored::Colorize;
use sysinfo::{ProcessesToUpdate, System};

use crate::error::{Result, VirclustError};


pub const GAP_TOKEN: u8 = 4;


/// Normalised edit distance: Levenshtein distance divided by the longer sequence's length, so 0
/// means identical and 1 means nothing in common. Returns None (after logging the sequence
/// lengths and current memory use) when the distance cannot be normalised.
pub fn alignment_distance(seq_1: &[u8], seq_2: &[u8]) -> Option<f64> {
    match try_alignment_distance(seq_1, seq_2) {
        Ok(d)  => Some(d),
        Err(e) => {
            log_computation_error(&e, seq_1.len(), seq_2.len());
            None
        }
    }
}


fn try_alignment_distance(seq_1: &[u8], seq_2: &[u8]) -> Result<f64> {
    let max_len = seq_1.len().max(seq_2.len());
    if max_len == 0 {
        return Err(VirclustError::Computation("cannot normalise distance between two empty \
                                               sequences".to_string()));
    }
    if seq_1.len() > u32::MAX as usize || seq_2.len() > u32::MAX as usize {
        return Err(VirclustError::Computation("sequence too long for edit distance"
                                              .to_string()));
    }
    Ok(levenshtein(seq_1, seq_2) as f64 / max_len as f64)
}


fn log_computation_error(e: &VirclustError, len_1: usize, len_2: usize) {
    let memory = match process_memory_mb() {
        Some(mb) => format!("{:.1} MB", mb),
        None     => "unknown".to_string(),
    };
    eprintln!("{} {} (sequence lengths: {} and {}, memory in use: {})",
              "Warning:".yellow(), e, len_1, len_2, memory);
}


/// Resident memory of the current process in megabytes.
pub fn process_memory_mb() -> Option<f64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|p| p.memory() as f64 / 1_000_000.0)
}


/// Similarity between two rows of a multiple sequence alignment: one minus the fraction of
/// positions where the tokens differ. An element compared to itself is 1 without looking at its
/// tokens.
pub fn column_similarity(accession_1: &str, tokens_1: &[u8],
                         accession_2: &str, tokens_2: &[u8]) -> Option<f64> {
    if accession_1 == accession_2 {
        return Some(1.0);
    }
    if tokens_1.len() != tokens_2.len() || tokens_1.is_empty() {
        let e = VirclustError::Computation(format!("{} and {} are not aligned to the same \
                                                    non-zero length", accession_1, accession_2));
        log_computation_error(&e, tokens_1.len(), tokens_2.len());
        return None;
    }
    let mismatches = tokens_1.iter().zip(tokens_2).filter(|(a, b)| a != b).count();
    Some(1.0 - mismatches as f64 / tokens_1.len() as f64)
}


/// Global alignment with a score of 1 for each match and 0 for mismatches and gaps, normalised by
/// the length of the alignment. Only used for very small element sets, as it is quadratic in
/// sequence length.
pub fn alignment_score_similarity(seq_a: &[u8], seq_b: &[u8]) -> Option<f64> {
    if seq_a.is_empty() && seq_b.is_empty() {
        let e = VirclustError::Computation("cannot align two empty sequences".to_string());
        log_computation_error(&e, 0, 0);
        return None;
    }
    if seq_a.is_empty() || seq_b.is_empty() {
        return Some(0.0);
    }
    let score = |a: u8, b: u8| if a == b { 1i32 } else { 0i32 };
    let mut aligner = Aligner::with_capacity(seq_a.len(), seq_b.len(), 0, 0, score);
    let alignment = aligner.global(seq_a, seq_b);
    let aligned_length = alignment.operations.iter()
        .filter(|op| !matches!(op, AlignmentOperation::Xclip(_) | AlignmentOperation::Yclip(_)))
        .count();
    if aligned_length == 0 {
        return Some(0.0);
    }
    Some(alignment.score as f64 / aligned_length as f64)
}


/// Converts an aligned sequence to integer tokens: A=0, C=1, G=2, T=3 and gap=4.
pub fn tokenize(seq: &[u8]) -> Result<Vec<u8>> {
    seq.iter().map(|&b| match b {
        b'A' | b'a' => Ok(0),
        b'C' | b'c' => Ok(1),
        b'G' | b'g' => Ok(2),
        b'T' | b't' => Ok(3),
        b'-'        => Ok(GAP_TOKEN),
        _ => Err(VirclustError::Computation(
            format!("cannot tokenise symbol '{}'", b as char))),
    }).collect()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::assert_almost_eq;

    #[test]
    fn test_alignment_distance() {
        assert_eq!(alignment_distance(b"ACGT", b"ACGT"), Some(0.0));
        assert_almost_eq(alignment_distance(b"ACGT", b"ACGA").unwrap(), 0.25, 1e-12);
        assert_almost_eq(alignment_distance(b"ACGT", b"AC").unwrap(), 0.5, 1e-12);
        assert_eq!(alignment_distance(b"AAAA", b"TTTT"), Some(1.0));
        assert_eq!(alignment_distance(b"", b"ACG"), Some(1.0));
        assert_eq!(alignment_distance(b"", b""), None);
    }

    #[test]
    fn test_alignment_distance_symmetry() {
        let seqs: [&[u8]; 5] = [b"ACGTACGT", b"ACGAACG", b"TTGACA", b"A", b"GATTACAGATTACA"];
        for a in seqs {
            assert_eq!(alignment_distance(a, a), Some(0.0));
            for b in seqs {
                assert_eq!(alignment_distance(a, b), alignment_distance(b, a));
            }
        }
    }

    #[test]
    fn test_column_similarity() {
        assert_eq!(column_similarity("a", &[0, 1, 2, 3], "b", &[0, 1, 2, 3]), Some(1.0));
        assert_eq!(column_similarity("a", &[0, 1, 2, 3], "b", &[0, 1, 4, 4]), Some(0.5));
        assert_eq!(column_similarity("a", &[0, 1], "b", &[0, 1, 2]), None);
        assert_eq!(column_similarity("a", &[], "b", &[]), None);
    }

    #[test]
    fn test_column_similarity_identity_shortcut() {
        // The tokens are deliberately incompatible: the same accession must not look at them.
        assert_eq!(column_similarity("a", &[0, 1, 2], "a", &[3]), Some(1.0));
        assert_eq!(column_similarity("a", &[], "a", &[]), Some(1.0));
    }

    #[test]
    fn test_alignment_score_similarity() {
        assert_eq!(alignment_score_similarity(b"ACGT", b"ACGT"), Some(1.0));
        assert_eq!(alignment_score_similarity(b"AAAA", b""), Some(0.0));
        assert_eq!(alignment_score_similarity(b"", b""), None);
        assert_almost_eq(alignment_score_similarity(b"ACGT", b"ACT").unwrap(), 0.75, 1e-12);
        assert_almost_eq(alignment_score_similarity(b"ACT", b"ACGT").unwrap(), 0.75, 1e-12);
        assert_almost_eq(alignment_score_similarity(b"AAAA", b"AA").unwrap(), 0.5, 1e-12);
        assert_almost_eq(alignment_score_similarity(b"GATTACA", b"GATACA").unwrap(), 6.0 / 7.0,
                         1e-12);
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize(b"ACGT-acgt").unwrap(), vec![0, 1, 2, 3, 4, 0, 1, 2, 3]);
        assert!(matches!(tokenize(b"ACNT"), Err(VirclustError::Computation(_))));
    }
}

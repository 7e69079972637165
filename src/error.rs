// This file defines the error type shared by Virclust's library-level functions.

// Copyright 2025 Ryan Wick (rrwick@gmail.com)

// This file is part of Virclust. Virclust is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. Virclust is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with Virclust. If not, see <http://www.gnu.org/licenses/>.

use std::path::PathBuf;
use thiserror::Error;


#[derive(Error, Debug)]
pub enum VirclustError {
    #[error("missing input: {0}")]
    MissingInput(PathBuf),

    #[error("singular matrix: {0}")]
    SingularMatrix(String),

    #[error("external tool failed ({status}): {command}")]
    ExternalToolFailure { command: String, status: String },

    #[error("external tool timed out after {seconds} s: {command}")]
    ExternalToolTimeout { command: String, seconds: u64 },

    #[error("could not find {0} in PATH")]
    ToolNotFound(String),

    #[error("integrity fault: {0}")]
    IntegrityFault(String),

    #[error("computation error: {0}")]
    Computation(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("could not parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("plot error: {0}")]
    Image(#[from] image::ImageError),
}

impl VirclustError {
    /// Integrity faults and external tool problems stop a run outright. Everything else can be
    /// turned into an undefined value so that other element sets can carry on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VirclustError::ExternalToolFailure { .. } |
                       VirclustError::ExternalToolTimeout { .. } |
                       VirclustError::ToolNotFound(_) |
                       VirclustError::IntegrityFault(_))
    }
}

pub type Result<T> = std::result::Result<T, VirclustError>;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_fatal() {
        assert!(VirclustError::IntegrityFault("x".to_string()).is_fatal());
        assert!(VirclustError::ExternalToolFailure { command: "cd-hit".to_string(),
                                                     status: "exit status: 1".to_string() }
                    .is_fatal());
        assert!(!VirclustError::SingularMatrix("x".to_string()).is_fatal());
        assert!(!VirclustError::MissingInput(PathBuf::from("a.fasta")).is_fatal());
        assert!(!VirclustError::Computation("x".to_string()).is_fatal());
    }

    #[test]
    fn test_display() {
        let e = VirclustError::ExternalToolFailure { command: "mafft in.fasta".to_string(),
                                                     status: "exit status: 2".to_string() };
        assert_eq!(e.to_string(), "external tool failed (exit status: 2): mafft in.fasta");
    }
}

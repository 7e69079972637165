// This file defines structs for the elements (accession-keyed sequences) that Virclust works on
// and the element sets that group them.

// Copyright 2025 Ryan Wick (rrwick@gmail.com)

// This file is part of Virclust. Virclust is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. Virclust is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with Virclust. If not, see <http://www.gnu.org/licenses/>.

use fxhash::FxHashMap;
use std::fmt;
use std::path::Path;

use crate::error::{Result, VirclustError};
use crate::misc::{fasta_stem, load_fasta};


#[derive(Clone, PartialEq)]
pub struct Element {
    pub accession: String,
    pub seq: Vec<u8>,
    pub taxon: Option<String>,
}

impl Element {
    pub fn new(accession: &str, seq: &[u8]) -> Element {
        Element { accession: accession.to_string(), seq: seq.to_vec(), taxon: None }
    }

    pub fn with_taxon(accession: &str, seq: &[u8], taxon: &str) -> Element {
        Element { accession: accession.to_string(), seq: seq.to_vec(),
                  taxon: Some(taxon.to_string()) }
    }

    pub fn length(&self) -> usize {
        self.seq.len()
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bp)", self.accession, self.length())
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { fmt::Display::fmt(self, f) }
}


/// An ordered group of elements with unique accessions. Clusters and outlier sets refer back to
/// elements by accession or index, never by copying sequences.
#[derive(Clone, Debug)]
pub struct ElementSet {
    pub identity: String,
    elements: Vec<Element>,
    index: FxHashMap<String, usize>,
}

impl ElementSet {
    pub fn new(identity: &str, elements: Vec<Element>) -> Result<ElementSet> {
        let mut index = FxHashMap::default();
        for (i, e) in elements.iter().enumerate() {
            if index.insert(e.accession.clone(), i).is_some() {
                return Err(VirclustError::IntegrityFault(
                    format!("duplicate accession {} in {}", e.accession, identity)));
            }
        }
        Ok(ElementSet { identity: identity.to_string(), elements, index })
    }

    pub fn from_fasta(filename: &Path) -> Result<ElementSet> {
        let elements = load_fasta(filename)?.into_iter()
            .map(|(name, seq)| Element { accession: name, seq, taxon: None }).collect();
        ElementSet::new(&fasta_stem(filename), elements)
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, accession: &str) -> Option<&Element> {
        self.index.get(accession).map(|&i| &self.elements[i])
    }

    pub fn accessions(&self) -> Vec<&str> {
        self.elements.iter().map(|e| e.accession.as_str()).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_set() {
        let set = ElementSet::new("x", vec![Element::new("a", b"ACGT"),
                                            Element::with_taxon("b", b"ACG", "virus")]).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.accessions(), vec!["a", "b"]);
        assert_eq!(set.get("b").unwrap().taxon.as_deref(), Some("virus"));
        assert!(set.get("c").is_none());
        assert_eq!(format!("{}", set.get("a").unwrap()), "a (4 bp)");
    }

    #[test]
    fn test_duplicate_accessions() {
        let result = ElementSet::new("x", vec![Element::new("a", b"ACGT"),
                                               Element::new("a", b"ACG")]);
        assert!(matches!(result, Err(VirclustError::IntegrityFault(_))));
    }
}

// This file contains the code for choosing a representative sequence for a cluster: the member
// with the smallest total distance to all other members.

// Copyright 2025 Ryan Wick (rrwick@gmail.com)

// This file is part of Virclust. Virclust is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. Virclust is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with Virclust. If not, see <http://www.gnu.org/licenses/>.

use fxhash::FxHashMap;

use crate::distance::alignment_distance;
use crate::sequence::Element;


/// Pairwise distances keyed by member index. A None value is an undefined distance.
pub type DistanceTable = FxHashMap<(usize, usize), Option<f64>>;


/// The representative of a cluster, using normalised edit distance between members.
pub fn select_representative<'a>(members: &[&'a Element]) -> Option<&'a str> {
    select_representative_with(members, alignment_distance)
}


pub fn select_representative_with<'a, F>(members: &[&'a Element], distance: F) -> Option<&'a str>
        where F: Fn(&[u8], &[u8]) -> Option<f64> {
    match members.len() {
        0 => None,
        1 => Some(members[0].accession.as_str()),
        _ => {
            let accessions: Vec<&str> = members.iter().map(|m| m.accession.as_str()).collect();
            centroid(&accessions, &distance_table(members, distance))
        }
    }
}


/// All pairwise distances between members. Each unordered pair is computed once and stored in
/// both orders, and self-distances are zero.
pub fn distance_table<F>(members: &[&Element], distance: F) -> DistanceTable
        where F: Fn(&[u8], &[u8]) -> Option<f64> {
    let mut table = DistanceTable::default();
    for i in 0..members.len() {
        table.insert((i, i), Some(0.0));
        for j in (i + 1)..members.len() {
            let d = distance(&members[i].seq, &members[j].seq);
            table.insert((i, j), d);
            table.insert((j, i), d);
        }
    }
    table
}


/// The accession whose distances to every other accession sum lowest. Undefined or missing
/// distances count as 1.0, the largest normalised distance. Ties go to the earliest accession.
pub fn centroid<'a>(accessions: &[&'a str], distances: &DistanceTable) -> Option<&'a str> {
    let mut best: Option<(usize, f64)> = None;
    for i in 0..accessions.len() {
        let row_sum: f64 = (0..accessions.len())
            .map(|j| if i == j { 0.0 } else { distances.get(&(i, j)).copied().flatten()
                                                        .unwrap_or(1.0) })
            .sum();
        match best {
            Some((_, b)) if row_sum >= b => {}
            _ => best = Some((i, row_sum)),
        }
    }
    best.map(|(i, _)| accessions[i])
}

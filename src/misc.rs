// This file contains miscellaneous functions used by various parts of Virclust.

// Copyright 2025 Ryan Wick (rrwick@gmail.com)

// This file is part of Virclust. Virclust is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. Virclust is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with Virclust. If not, see <http://www.gnu.org/licenses/>.

use bio::io::fasta;
use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use std::collections::HashSet;
use std::fs::{File, read_dir, create_dir_all};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::{Result, VirclustError};


pub fn create_dir(dir_path: &Path) {
    match create_dir_all(dir_path) {
        Ok(_) => {},
        Err(e) => quit_with_error(&format!("failed to create directory {}\n{}",
                                           dir_path.display(), e)),
    }
}


pub fn find_all_fasta_files(in_dir: &Path) -> Vec<PathBuf> {
    let paths = match read_dir(in_dir) {
        Ok(paths) => paths,
        Err(e) => {
            quit_with_error(&format!("unable to read directory {}\n{}", in_dir.display(), e));
        },
    };
    let mut all_fasta_files: Vec<PathBuf> = paths.flatten().map(|entry| entry.path())
                                                 .filter(|path| is_fasta_file(path)).collect();
    all_fasta_files.sort_unstable();
    if all_fasta_files.is_empty() {
        quit_with_error(&format!("no FASTA files found in {}", in_dir.display()));
    }
    all_fasta_files
}


fn is_fasta_file(path: &Path) -> bool {
    // Aligned files from a previous run sit next to their inputs and are not element sets.
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    if name.contains("_aligned.") { return false; }
    path.is_file() && [".fasta", ".fna", ".fa", ".fasta.gz", ".fna.gz", ".fa.gz"]
                          .iter().any(|ext| name.ends_with(ext))
}


pub fn fasta_stem(path: &Path) -> String {
    // File name without FASTA (and optional gzip) extensions: "dir/abc.fasta.gz" -> "abc".
    let mut name = path.file_name().unwrap_or_default().to_string_lossy().to_string();
    if let Some(stripped) = name.strip_suffix(".gz") { name = stripped.to_string(); }
    for ext in [".fasta", ".fna", ".fa"] {
        if let Some(stripped) = name.strip_suffix(ext) { return stripped.to_string(); }
    }
    name
}


pub fn sanitise_name(name: &str) -> String {
    static NON_ALPHANUMERIC: OnceLock<Regex> = OnceLock::new();
    let re = NON_ALPHANUMERIC.get_or_init(|| Regex::new(r"[^0-9a-zA-Z]+").unwrap());
    re.replace_all(name, "_").to_string()
}


pub fn check_if_file_exists(filename: &Path) {
    // Quits with an error if the given path is not an existing file.
    if !filename.exists() {
        quit_with_error(&format!("file does not exist: {}", filename.display()));
    }
    if !filename.is_file() {
        quit_with_error(&format!("{} is not a file", filename.display()));
    }
}


pub fn check_if_dir_exists(dir: &Path) {
    // Quits with an error if the given path is not an existing directory.
    if !dir.exists() {
        quit_with_error(&format!("directory does not exist: {}", dir.display()));
    }
    if !dir.is_dir() {
        quit_with_error(&format!("{} is not a directory", dir.display()));
    }
}


pub fn check_if_dir_is_not_dir(dir: &Path) {
    // Quits with an error if the given path exists but is not a directory (not existing is okay).
    if dir.exists() && !dir.is_dir() {
        quit_with_error(&format!("{} exists but is not a directory", dir.display()));
    }
}


#[cfg(not(test))]
pub fn quit_with_error(text: &str) -> ! {
    // For friendly error messages, this function normally just prints the error and quits.
    eprintln!();
    eprintln!("Error: {}", text);
    std::process::exit(1);
}
#[cfg(test)]
pub fn quit_with_error(text: &str) -> ! {
    // But when running unit tests, this function instead panics so I can catch it for the test.
    panic!("{}", text);
}


pub fn load_fasta(filename: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    // Loads a plain or gzipped FASTA file into name+sequence pairs. Names are the first word of
    // the header and sequences are upper-cased (gap characters are left alone).
    if !filename.is_file() {
        return Err(VirclustError::MissingInput(filename.to_path_buf()));
    }
    let file = File::open(filename)?;
    let reader: Box<dyn Read> = if is_file_gzipped(filename)? { Box::new(GzDecoder::new(file)) }
                                                         else { Box::new(file) };
    let mut fasta_seqs = Vec::new();
    for record in fasta::Reader::new(BufReader::new(reader)).records() {
        let record = record.map_err(|e| parse_error(filename, &e.to_string()))?;
        fasta_seqs.push((record.id().to_string(), record.seq().to_ascii_uppercase()));
    }
    check_load_fasta(&fasta_seqs, filename)?;
    Ok(fasta_seqs)
}


fn check_load_fasta(fasta_seqs: &[(String, Vec<u8>)], filename: &Path) -> Result<()> {
    if fasta_seqs.is_empty() {
        return Err(parse_error(filename, "contains no sequences"));
    }
    let mut names = HashSet::new();
    for (name, sequence) in fasta_seqs {
        if name.is_empty() {
            return Err(parse_error(filename, "has an unnamed sequence"));
        }
        if sequence.is_empty() {
            return Err(parse_error(filename, &format!("{} has an empty sequence", name)));
        }
        if !names.insert(name) {
            return Err(VirclustError::IntegrityFault(
                format!("{} has a duplicate name: {}", filename.display(), name)));
        }
    }
    Ok(())
}


fn parse_error(filename: &Path, message: &str) -> VirclustError {
    VirclustError::Parse { path: filename.to_path_buf(), message: message.to_string() }
}


fn is_file_gzipped(filename: &Path) -> Result<bool> {
    // Returns true if the file appears to be gzipped (based on the first two bytes).
    let mut buf = [0u8; 2];
    let mut file = File::open(filename)?;
    match file.read_exact(&mut buf) {
        Ok(_)  => Ok(buf[0] == 31 && buf[1] == 139),
        Err(_) => Ok(false),
    }
}


pub fn write_fasta<'a, I>(filename: &Path, records: I) -> Result<()>
        where I: IntoIterator<Item = (&'a str, &'a [u8])> {
    let mut writer = fasta::Writer::new(File::create(filename)?);
    for (name, seq) in records {
        writer.write(name, None, seq)?;
    }
    writer.flush()?;
    Ok(())
}


pub fn format_duration(duration: std::time::Duration) -> String {
    let microseconds = duration.as_micros() % 1000000;
    let seconds =      duration.as_micros() / 1000000 % 60;
    let minutes =      duration.as_micros() / 1000000 / 60 % 60;
    let hours =        duration.as_micros() / 1000000 / 60 / 60;
    format!("{}:{:02}:{:02}.{:06}", hours, minutes, seconds, microseconds)
}


pub fn format_float(num: f64) -> String {
    // Formats a float with up to six decimal places but then drops trailing zeros.
    let mut formatted = format!("{:.6}", num);
    if !formatted.contains('.') { return formatted }
    while formatted.ends_with('0') { formatted.pop(); }
    if formatted.ends_with('.') { formatted.pop(); }
    formatted
}


pub fn format_optional_float(num: Option<f64>) -> String {
    // Undefined values are written as empty cells.
    num.map(format_float).unwrap_or_default()
}


pub fn mean_f64(values: &[f64]) -> Option<f64> {
    if values.is_empty() { return None; }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}


pub fn median_f64(values: &[f64]) -> Option<f64> {
    if values.is_empty() { return None; }
    let mut sorted_values = values.to_vec();
    sorted_values.sort_by(|a, b| a.total_cmp(b));
    let len = sorted_values.len();
    if len % 2 == 0 { Some((sorted_values[len / 2 - 1] + sorted_values[len / 2]) / 2.0) }
               else { Some(sorted_values[len / 2]) }
}


pub fn spinner(message: &str) -> ProgressBar {
    if cfg!(test) {
        ProgressBar::hidden() // don't show a spinner during unit tests
    } else {
        let pb = ProgressBar::new_spinner();
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_style(
            ProgressStyle::default_spinner()
                .tick_strings(&["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓"])
                .template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb
    }
}

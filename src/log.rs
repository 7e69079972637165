// This file contains functions for formatting Virclust's stderr output.

// Copyright 2025 Ryan Wick (rrwick@gmail.com)

// This file is part of Virclust. Virclust is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. Virclust is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with Virclust. If not, see <http://www.gnu.org/licenses/>.

use chrono::prelude::*;
use colored::Colorize;


pub fn section_header(text: &str) {
    let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let date = format!("({})", now);
    eprintln!();
    eprintln!("{} {}", text.bold().bright_yellow().underline(), date.dimmed());
}


pub fn explanation(text: &str) {
    let term_width = match term_size::dimensions_stderr() {
        Some((w, _)) => w.min(100),
        None         => 80,
    };
    let formatted_text = textwrap::fill(&collapse_whitespace(text), term_width);
    eprintln!("{}", formatted_text.dimmed());
    eprintln!();
}


fn collapse_whitespace(text: &str) -> String {
    // Line continuations in string literals can leave runs of spaces.
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("a  b\n   c"), "a b c");
        assert_eq!(collapse_whitespace("  abc "), "abc");
    }
}

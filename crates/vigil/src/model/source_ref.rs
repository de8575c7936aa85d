//! Derives case identifiers from a submitted source reference.
//!
//! Source references are document file names such as
//! `5012345-67.2023.8.09.0051_12345_67890_peticao.pdf`. The case number is a
//! CNJ-style number and the sub-identifier a `_<digits>_<digits>_` token; when
//! several appear the last one wins.

use std::sync::LazyLock;

use regex::Regex;

static RE_CASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,7})[.-](\d{2})\.(\d{4})\.(\d)\.(\d{2})\.(\d{4})").unwrap());
static RE_SUB: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_(\d+)_(\d+)_").unwrap());

/// Identifiers parsed out of a source reference. Empty when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceIds {
    pub case_number: String,
    pub sub_identifier: String,
}

/// Parses the case number and sub-identifier from a source reference.
pub fn parse_source_ref(source: &str) -> SourceIds {
    let case_number = RE_CASE
        .captures_iter(source)
        .last()
        .map(|c| {
            format!(
                "{:0>7}.{}.{}.{}.{}.{}",
                &c[1], &c[2], &c[3], &c[4], &c[5], &c[6]
            )
        })
        .unwrap_or_default();

    let sub_identifier = last_sub_identifier(source).unwrap_or_default();

    SourceIds {
        case_number,
        sub_identifier,
    }
}

// Underscores are shared between adjacent tokens ("_1_2_3_"), so matches are
// scanned one character at a time instead of with `captures_iter`.
fn last_sub_identifier(source: &str) -> Option<String> {
    let mut last = None;
    let mut start = 0;
    while let Some(c) = RE_SUB.captures_at(source, start) {
        let whole = c.get(0)?;
        last = Some(format!("_{}_{}_", &c[1], &c[2]));
        start = whole.start() + 1;
    }
    last
}

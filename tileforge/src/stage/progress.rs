//! Per-stage progress adapters.
//!
//! Stage tools report progress, if at all, as discrete output lines. Each
//! stage kind gets its own parser so a tool changing its output format only
//! touches one adapter. Tools with no parseable progress (pmtiles) simply
//! contribute 0 until their stage completes.

use super::spec::StageKind;

/// Parses one output line from a stage tool into a 0.0-1.0 fraction.
///
/// Returns `None` for lines that carry no progress information. The extract
/// stage reports no per-line progress; its fraction is derived from completed
/// invocations by the runner.
pub fn parse_stage_progress(kind: StageKind, line: &str) -> Option<f64> {
    match kind {
        StageKind::Tile => parse_tippecanoe_percent(line),
        _ => None,
    }
}

/// Tippecanoe prints lines like `  99.7%  14/2345/1234` on stderr while
/// writing tiles. The leading token is the overall percentage.
fn parse_tippecanoe_percent(line: &str) -> Option<f64> {
    let token = line.split_whitespace().next()?;
    let digits = token.strip_suffix('%')?;
    let percent: f64 = digits.parse().ok()?;
    if !(0.0..=100.0).contains(&percent) {
        return None;
    }
    Some(percent / 100.0)
}

//! Line-oriented parameter file format.
//!
//! ```text
//! Iteration block: results of the fit with function 1 applied at iteration 0
//! Parameter 0 value 1.0012 +- 0.0003
//! Parameter 1 value -2.1e-05 +- 4e-06
//! ```
//!
//! Header lines contain `Iteration `; whitespace-split word 9 is the function type
//! and word 13 the iteration number (1-based). Lines containing `value` carry one
//! parameter: the first number after the `value` substring, optionally followed by
//! `+- <error>`. Any other line is ignored.

use super::{ParameterBlock, ParameterSet};
use crate::functions::FunctionFamily;
use msc_core::{Error, Result};
use std::fmt::Write as _;

const ITERATION_MARKER: &str = "Iteration ";
const VALUE_MARKER: &str = "value";
const ERROR_MARKER: &str = "+-";
const FUNCTION_WORD: usize = 9;
const ITERATION_WORD: usize = 13;

/// Parse the text format into a [`ParameterSet`] of the given family.
///
/// Every block's value count must match the registry parameter count of its
/// function type.
pub fn parse(family: FunctionFamily, text: &str) -> Result<ParameterSet> {
    let mut blocks: Vec<ParameterBlock> = Vec::new();
    let mut header_lines: Vec<usize> = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;

        if line.contains(ITERATION_MARKER) {
            let (function_type, iteration) = parse_header(line, line_no)?;
            if function_type >= family.registry_len() {
                return Err(Error::parse_at(
                    line_no,
                    format!(
                        "{family} function type {function_type} out of registry range 0..{}",
                        family.registry_len()
                    ),
                ));
            }
            blocks.push(ParameterBlock::new(iteration, function_type, Vec::new()));
            header_lines.push(line_no);
        }

        if let Some(pos) = line.find(VALUE_MARKER) {
            let rest = &line[pos + VALUE_MARKER.len()..];
            let value = leading_f64(rest).ok_or_else(|| {
                Error::parse_at(line_no, format!("no numeric value after 'value' in {line:?}"))
            })?;
            let error = rest
                .find(ERROR_MARKER)
                .and_then(|p| leading_f64(&rest[p + ERROR_MARKER.len()..]))
                .unwrap_or(0.0);
            let block = blocks.last_mut().ok_or_else(|| {
                Error::parse_at(line_no, "parameter value before any iteration header")
            })?;
            block.values.push(value);
            block.errors.push(error);
        }
    }

    for (block, &line_no) in blocks.iter().zip(&header_lines) {
        let expected = family.n_params(block.function_type)?;
        if block.values.len() != expected {
            return Err(Error::parse_at(
                line_no,
                format!(
                    "{family} function type {} declares {expected} parameters, found {} 'value' lines",
                    block.function_type,
                    block.values.len()
                ),
            ));
        }
    }

    Ok(ParameterSet { family, blocks })
}

/// Write a [`ParameterSet`] in the text format accepted by [`parse`].
pub fn write(set: &ParameterSet) -> String {
    let mut out = String::new();
    for block in &set.blocks {
        // Words: 1 Iteration, 2 block:, ..., 9 <type>, ..., 13 <iteration>
        let _ = writeln!(
            out,
            "Iteration block: results of the fit with function {} applied at iteration {}",
            block.function_type, block.iteration
        );
        for (i, value) in block.values.iter().enumerate() {
            let error = block.errors.get(i).copied().unwrap_or(0.0);
            // `{:e}` on f64 is shortest round-trip.
            let _ = writeln!(out, "Parameter {i} value {value:e} +- {error:e}");
        }
    }
    out
}

fn parse_header(line: &str, line_no: usize) -> Result<(u32, u32)> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let word = |n: usize, what: &str| -> Result<u32> {
        let w = words.get(n - 1).ok_or_else(|| {
            Error::parse_at(line_no, format!("iteration header has no word {n} ({what})"))
        })?;
        w.parse::<u32>().map_err(|_| {
            Error::parse_at(line_no, format!("word {n} ({what}) is not an integer: {w:?}"))
        })
    };
    Ok((word(FUNCTION_WORD, "function type")?, word(ITERATION_WORD, "iteration")?))
}

/// First number at the start of `s` (after leading whitespace), ignoring trailing text.
fn leading_f64(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let end = s
        .char_indices()
        .take_while(|&(_, c)| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    // Shrink until the prefix parses, e.g. "1.5+-0.2" -> "1.5".
    (1..=end).rev().find_map(|n| s[..n].parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCALE_FILE: &str = "\
# scale fit output
Iteration block: results of the fit with function 1 applied at iteration 0
Parameter 0 value 1.0012 +- 0.0003
Parameter 1 value -2.1e-05 +- 4e-06

Iteration block: results of the fit with function 0 applied at iteration 1
Iteration block: results of the fit with function 2 applied at iteration 2
Parameter 0 value 0.998
Parameter 1 value 0.0015+-0.0001
";

    #[test]
    fn test_parse_multi_iteration_file() {
        let set = parse(FunctionFamily::Scale, SCALE_FILE).unwrap();
        assert_eq!(set.blocks.len(), 3);
        assert_eq!(set.blocks[0].function_type, 1);
        assert_eq!(set.blocks[0].iteration, 0);
        assert_eq!(set.blocks[0].values, vec![1.0012, -2.1e-05]);
        assert_eq!(set.blocks[0].errors, vec![0.0003, 4e-06]);
        assert!(set.blocks[1].values.is_empty());
        assert_eq!(set.blocks[2].iteration, 2);
        assert_eq!(set.blocks[2].values, vec![0.998, 0.0015]);
        assert_eq!(set.blocks[2].errors, vec![0.0, 0.0001]);
    }

    #[test]
    fn test_count_mismatch_is_parse_error() {
        let text = "Iteration block: results of the fit with function 4 applied at iteration 0\n\
                    Parameter 0 value 1.0\nParameter 1 value 0.0\n";
        let err = parse(FunctionFamily::Scale, text).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 1, .. }), "{err}");
    }

    #[test]
    fn test_function_type_out_of_range() {
        let text = "Iteration block: results of the fit with function 14 applied at iteration 0\n";
        assert!(matches!(parse(FunctionFamily::Scale, text), Err(Error::Parse { .. })));
        let text = "Iteration block: results of the fit with function 4 applied at iteration 0\n";
        assert!(matches!(parse(FunctionFamily::Resolution, text), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_short_header_and_orphan_value() {
        assert!(matches!(
            parse(FunctionFamily::Scale, "Iteration 3 only\n"),
            Err(Error::Parse { line: 1, .. })
        ));
        assert!(matches!(
            parse(FunctionFamily::Scale, "Parameter 0 value 1.0\n"),
            Err(Error::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn test_write_then_parse_preserves_blocks() {
        let set = ParameterSet {
            family: FunctionFamily::Resolution,
            blocks: vec![
                ParameterBlock::new(0, 0, vec![0.015, 0.0012, 0.0007]),
                ParameterBlock::with_errors(
                    1,
                    1,
                    vec![0.01, 1.23456789e-4, 0.005, 0.001, 0.01, 2e-4, 1.0 / 3.0],
                    vec![1e-3, 1e-6, 1e-4, 1e-5, 1e-3, 1e-5, 1e-4],
                ),
            ],
        };
        let back = parse(FunctionFamily::Resolution, &write(&set)).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_leading_f64() {
        assert_eq!(leading_f64("  1.5 +- 0.2"), Some(1.5));
        assert_eq!(leading_f64("1.5+-0.2"), Some(1.5));
        assert_eq!(leading_f64(" -3e-4"), Some(-3e-4));
        assert_eq!(leading_f64(" = 2"), None);
    }
}

//! Token test engine.
//!
//! Tokenizes a program's actual output on whitespace and pairs the tokens
//! against an expected-token list. Ordered matching keeps the largest
//! order-preserving pairing; unordered matching computes a maximum bipartite
//! matching so duplicate expected tokens each need their own actual token.
//! Acceptance is simply "every expected token found a partner".

use crate::model::{ExpectedToken, MatchResult, MatchedToken, TestOptions};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\S+").expect("token pattern"))
}

/// A whitespace-delimited run of the actual text with its byte span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub text: &'a str,
    pub begin: usize,
    pub end: usize,
}

pub fn tokenize(text: &str) -> Vec<Token<'_>> {
    token_pattern()
        .find_iter(text)
        .map(|m| Token {
            text: m.as_str(),
            begin: m.start(),
            end: m.end(),
        })
        .collect()
}

fn token_matches(actual: &str, expected: &ExpectedToken, options: &TestOptions) -> bool {
    match expected {
        ExpectedToken::Text { value } => {
            if options.allowable_edit_distance == 0 {
                actual == value
            } else {
                triple_accel::levenshtein(actual.as_bytes(), value.as_bytes()) as usize
                    <= options.allowable_edit_distance
            }
        }
        ExpectedToken::Float { value } => match actual.parse::<f64>() {
            Ok(parsed) => (parsed - value).abs() < options.float_tolerance,
            Err(_) => false,
        },
    }
}

/// Match one file's actual text against its expected tokens.
pub fn match_tokens(
    actual_text: &str,
    expected: &[ExpectedToken],
    options: &TestOptions,
) -> MatchResult {
    let tokens = tokenize(actual_text);
    let table: Vec<Vec<bool>> = tokens
        .iter()
        .map(|token| {
            expected
                .iter()
                .map(|e| token_matches(token.text, e, options))
                .collect()
        })
        .collect();

    let pairs = if options.ordered_matching {
        ordered_pairs(&table, expected.len())
    } else {
        unordered_pairs(&table, expected.len())
    };

    let matched_tokens: Vec<MatchedToken> = pairs
        .iter()
        .map(|&(i, j)| MatchedToken {
            begin: tokens[i].begin,
            end: tokens[i].end,
            expected_index: j,
        })
        .collect();
    let paired: HashSet<usize> = pairs.iter().map(|&(_, j)| j).collect();
    let nonmatched_tokens: Vec<usize> =
        (0..expected.len()).filter(|j| !paired.contains(j)).collect();

    MatchResult {
        matched_tokens,
        nonmatched_tokens,
    }
}

/// Largest order-preserving pairing over the match table, LCS-style. When
/// `table[i][j]` holds, taking the pair is never worse than skipping it:
/// any solution that pairs i or j elsewhere would cross.
fn ordered_pairs(table: &[Vec<bool>], expected_len: usize) -> Vec<(usize, usize)> {
    let n = table.len();
    let m = expected_len;
    let mut dp = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            dp[i][j] = if table[i][j] {
                dp[i + 1][j + 1] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }

    let mut pairs = Vec::with_capacity(dp.first().map_or(0, |row| row[0]));
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if table[i][j] {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if dp[i + 1][j] >= dp[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

/// Maximum bipartite matching between tokens and expected indices, Kuhn's
/// augmenting-path algorithm.
fn unordered_pairs(table: &[Vec<bool>], expected_len: usize) -> Vec<(usize, usize)> {
    let mut owner: Vec<Option<usize>> = vec![None; expected_len];
    for token in 0..table.len() {
        let mut seen = vec![false; expected_len];
        augment(token, table, &mut seen, &mut owner);
    }

    let mut pairs: Vec<(usize, usize)> = owner
        .iter()
        .enumerate()
        .filter_map(|(j, taken_by)| taken_by.map(|i| (i, j)))
        .collect();
    pairs.sort_unstable();
    pairs
}

fn augment(
    token: usize,
    table: &[Vec<bool>],
    seen: &mut [bool],
    owner: &mut [Option<usize>],
) -> bool {
    for j in 0..seen.len() {
        if !table[token][j] || seen[j] {
            continue;
        }
        seen[j] = true;
        let free = match owner[j] {
            None => true,
            Some(holder) => augment(holder, table, seen, owner),
        };
        if free {
            owner[j] = Some(token);
            return true;
        }
    }
    false
}

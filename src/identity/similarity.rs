//! Weighted fuzzy string similarity on a 0–100 scale.
//!
//! Combines Indel (insert/delete) edit similarity with partial (substring window)
//! and token-based comparisons, then takes the best scaled score. Short
//! queries such as a first name alone still score high against a full
//! "First Last" roster entry, while unrelated names stay low.

/// Scale applied to token-based scores.
const TOKEN_SCALE: f64 = 0.95;
/// Scale applied to partial scores when lengths differ moderately.
const PARTIAL_SCALE: f64 = 0.9;
/// Scale applied to partial scores when one string dwarfs the other.
const PARTIAL_SCALE_FAR: f64 = 0.6;
/// Length ratio above which partial matching kicks in.
const PARTIAL_LENGTH_RATIO: f64 = 1.5;
/// Length ratio above which the far partial scale applies.
const FAR_LENGTH_RATIO: f64 = 8.0;

/// Lowercase, replace non-alphanumerics with spaces, collapse whitespace.
pub fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Length of the longest common subsequence of two char slices.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut row = vec![0usize; b.len() + 1];
    for &ca in a {
        let mut diag = 0;
        for (j, &cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb {
                diag + 1
            } else {
                above.max(row[j])
            };
            diag = above;
        }
    }
    row[b.len()]
}

/// Normalized Indel similarity × 100: `1 - (inserts + deletes) / (len_a + len_b)`.
///
/// Substitutions cost two edits, so dropped letters hurt less than with
/// Levenshtein ("jn smth" vs "john smith" is 82, not 70).
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    (2 * lcs_len(&a, &b)) as f64 / total as f64 * 100.0
}

/// Best `ratio` of the shorter string against every same-length window
/// of the longer string.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let (short, long): (Vec<char>, Vec<char>) = if a.chars().count() <= b.chars().count() {
        (a.chars().collect(), b.chars().collect())
    } else {
        (b.chars().collect(), a.chars().collect())
    };

    if short.is_empty() {
        return 0.0;
    }

    let needle: String = short.iter().collect();
    let window = short.len();
    let mut best: f64 = 0.0;
    for start in 0..=(long.len() - window) {
        let candidate: String = long[start..start + window].iter().collect();
        best = best.max(ratio(&needle, &candidate));
        if best >= 100.0 {
            break;
        }
    }
    best
}

fn sorted_tokens(text: &str) -> Vec<&str> {
    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.dedup();
    tokens
}

/// `ratio` after sorting the tokens of both strings.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a).join(" "), &sorted_tokens(b).join(" "))
}

/// Compares the shared tokens against each side's shared+remaining tokens.
/// A query whose tokens are a subset of the other string scores 100.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta = sorted_tokens(a);
    let tb = sorted_tokens(b);

    let shared: Vec<&str> = ta.iter().filter(|t| tb.contains(t)).copied().collect();
    let only_a: Vec<&str> = ta.iter().filter(|t| !tb.contains(t)).copied().collect();
    let only_b: Vec<&str> = tb.iter().filter(|t| !ta.contains(t)).copied().collect();

    let sect = shared.join(" ");
    let combined_a = format!("{} {}", sect, only_a.join(" ")).trim().to_string();
    let combined_b = format!("{} {}", sect, only_b.join(" ")).trim().to_string();

    if sect.is_empty() {
        return ratio(&combined_a, &combined_b);
    }

    ratio(&sect, &combined_a)
        .max(ratio(&sect, &combined_b))
        .max(ratio(&combined_a, &combined_b))
}

/// Weighted similarity of two raw strings, 0–100.
///
/// Empty input on either side scores 0.
pub fn weighted_ratio(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let len_a = a.chars().count() as f64;
    let len_b = b.chars().count() as f64;
    let length_ratio = len_a.max(len_b) / len_a.min(len_b);

    let base = ratio(&a, &b);
    let token = token_sort_ratio(&a, &b).max(token_set_ratio(&a, &b));

    if length_ratio < PARTIAL_LENGTH_RATIO {
        return base.max(token * TOKEN_SCALE);
    }

    let partial_scale = if length_ratio > FAR_LENGTH_RATIO {
        PARTIAL_SCALE_FAR
    } else {
        PARTIAL_SCALE
    };

    let partial = partial_ratio(&a, &b) * partial_scale;
    let partial_token = partial_ratio(&sorted_tokens(&a).join(" "), &sorted_tokens(&b).join(" "))
        .max(token_set_ratio(&a, &b))
        * TOKEN_SCALE
        * partial_scale;

    base.max(partial).max(partial_token)
}

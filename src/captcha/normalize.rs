/// The challenge renders 5-6 character alphanumeric or short arithmetic
/// strings; OCR noise usually comes out degenerate in length, so a length
/// window is a cheap high-precision filter with no semantic validation.
const MIN_SOLUTION_LEN: usize = 5;
const MAX_SOLUTION_LEN: usize = 6;

const ARITHMETIC_SYMBOLS: [char; 5] = ['=', '+', '-', '*', '/'];

/// Strip whitespace and drop everything outside ASCII letters, digits and
/// the arithmetic symbols, preserving the order of what remains.
pub fn clean_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || ARITHMETIC_SYMBOLS.contains(c))
        .collect()
}

/// Acceptance policy over a cleaned string.
pub fn plausible_solution(cleaned: &str) -> bool {
    (MIN_SOLUTION_LEN..=MAX_SOLUTION_LEN).contains(&cleaned.len())
}

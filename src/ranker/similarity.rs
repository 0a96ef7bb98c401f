//! Ratcliff/Obershelp string similarity
//!
//! `2 * M / T` where `M` counts characters in matching blocks, found by
//! taking the longest common substring and recursing on both sides, and `T`
//! is the combined length.

/// Similarity in `[0, 1]`; two empty strings are identical
pub fn ratcliff_obershelp(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_characters(&a, &b) as f32 / total as f32
}

fn matching_characters(a: &[char], b: &[char]) -> usize {
    let (i, j, len) = longest_common_block(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_characters(&a[..i], &b[..j])
        + matching_characters(&a[i + len..], &b[j + len..])
}

/// Earliest longest common substring as (start in a, start in b, length)
fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];

    for i in 0..a.len() {
        for j in 0..b.len() {
            current[j + 1] = if a[i] == b[j] { previous[j] + 1 } else { 0 };
            let len = current[j + 1];
            if len > best.2 {
                best = (i + 1 - len, j + 1 - len, len);
            }
        }
        std::mem::swap(&mut previous, &mut current);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_ratios() {
        assert_eq!(ratcliff_obershelp("abcd", "bcde"), 0.75);
        assert_eq!(ratcliff_obershelp("", ""), 1.0);
        assert_eq!(ratcliff_obershelp("abc", ""), 0.0);
        assert_eq!(ratcliff_obershelp("vehicle_master", "vehicle_master"), 1.0);
    }

    #[test]
    fn test_matching_blocks_on_both_sides() {
        // "wikimedia" / "wikimania": blocks "wikim" and "ia"
        let ratio = ratcliff_obershelp("wikimedia", "wikimania");
        assert!((ratio - 14.0 / 18.0).abs() < 1e-6);
    }

    #[test]
    fn test_table_names() {
        assert!(ratcliff_obershelp("trips", "mega_trips") >= 0.6);
        assert!(ratcliff_obershelp("zones", "driver_master") < 0.6);
    }
}

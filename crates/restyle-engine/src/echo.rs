const SAMPLE_CHARS: usize = 100;
const MIN_COMPARABLE_LEN: usize = 2 * SAMPLE_CHARS;

/// Whether a generated image (base64) looks like one of the inputs returned unchanged.
///
/// Matches on exact equality, or on equal first and last 100 base64
/// characters when both strings are longer than 200. This is a cheap
/// similarity check, not a hash: a re-encoded copy of an input slips through
/// (false negative), and two distinct images sharing identical container
/// headers and trailing bytes would be flagged (false positive, practically
/// unseen for photographs).
pub fn is_echo_of(candidate: &str, input: &str) -> bool {
    if candidate == input {
        return true;
    }
    if candidate.len() <= MIN_COMPARABLE_LEN || input.len() <= MIN_COMPARABLE_LEN {
        return false;
    }
    let (Some(candidate_head), Some(input_head)) =
        (candidate.get(..SAMPLE_CHARS), input.get(..SAMPLE_CHARS))
    else {
        return false;
    };
    let (Some(candidate_tail), Some(input_tail)) = (
        candidate.get(candidate.len() - SAMPLE_CHARS..),
        input.get(input.len() - SAMPLE_CHARS..),
    ) else {
        return false;
    };
    candidate_head == input_head && candidate_tail == input_tail
}

pub fn is_echo_of_any<'a>(candidate: &str, inputs: impl IntoIterator<Item = &'a str>) -> bool {
    inputs.into_iter().any(|input| is_echo_of(candidate, input))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long(prefix: char, middle: char, suffix: char, middle_len: usize) -> String {
        let mut out = String::new();
        out.extend(std::iter::repeat(prefix).take(SAMPLE_CHARS));
        out.extend(std::iter::repeat(middle).take(middle_len));
        out.extend(std::iter::repeat(suffix).take(SAMPLE_CHARS));
        out
    }

    #[test]
    fn exact_match_is_echo_regardless_of_length() {
        assert!(is_echo_of("abc", "abc"));
        assert!(!is_echo_of("abc", "abd"));
    }

    #[test]
    fn prefix_and_suffix_match_flags_near_copies() {
        let input = long('A', 'B', 'C', 50);
        let near = long('A', 'X', 'C', 80);
        assert!(is_echo_of(&near, &input));

        let different_tail = long('A', 'B', 'D', 50);
        assert!(!is_echo_of(&different_tail, &input));
    }

    #[test]
    fn short_strings_only_match_exactly() {
        let boundary = long('A', 'B', 'C', 0);
        assert_eq!(boundary.len(), 200);
        let longer = long('A', 'B', 'C', 50);
        assert!(!is_echo_of(&boundary, &longer));
        assert!(!is_echo_of(&longer, &boundary));
        assert!(is_echo_of(&boundary, &boundary.clone()));
    }

    #[test]
    fn any_input_matches() {
        let source = long('S', 'S', 'S', 10);
        let target = long('T', 'T', 'T', 10);
        let echoed_target = long('T', 'U', 'T', 30);
        assert!(is_echo_of_any(&echoed_target, [source.as_str(), target.as_str()]));
        assert!(!is_echo_of_any("fresh", [source.as_str(), target.as_str()]));
    }
}

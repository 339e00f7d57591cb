//! Token counting for batch packing, via the `cl100k_base` encoding.

use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;

static ENCODING: OnceLock<CoreBPE> = OnceLock::new();

fn encoding() -> &'static CoreBPE {
    ENCODING.get_or_init(|| tiktoken_rs::cl100k_base().expect("cl100k_base encoding tables are bundled with tiktoken-rs"))
}

/// Number of tokens `content` would consume in an LLM prompt.
pub fn count_tokens(content: &str) -> usize {
    encoding().encode_with_special_tokens(content).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_has_zero_tokens() {
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn longer_content_has_more_tokens() {
        assert!(count_tokens("the quick brown fox jumps over the lazy dog") > count_tokens("hello"));
    }
}

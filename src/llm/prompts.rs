//! Analysis prompts

/// System prompt for paper analysis
pub const ANALYSIS_SYSTEM_PROMPT: &str = "You are a research assistant. \
Read the paper provided as markdown and produce a structured analysis in markdown with these sections: \
Summary, Research Problem, Method, Key Results, Limitations, Keywords. \
Base every statement on the paper text; write \"not stated\" when a section has no support.";

/// Build the user prompt, keeping at most `max_chars` characters of paper text
pub fn build_analysis_prompt(extracted_text: &str, max_chars: usize) -> String {
    let total = extracted_text.chars().count();
    if total <= max_chars {
        return format!("Paper:\n\n{}", extracted_text);
    }

    let kept: String = extracted_text.chars().take(max_chars).collect();
    format!(
        "Paper (truncated to the first {} of {} characters):\n\n{}",
        max_chars, total, kept
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_kept_whole() {
        let prompt = build_analysis_prompt("# Title\n\nBody", 100);
        assert_eq!(prompt, "Paper:\n\n# Title\n\nBody");
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let text = "é".repeat(10);
        let prompt = build_analysis_prompt(&text, 4);
        assert!(prompt.starts_with("Paper (truncated to the first 4 of 10 characters)"));
        assert!(prompt.ends_with("éééé"));
    }
}

//! Backend prompts

/// Per-batch observational prompt
pub const BATCH_PROMPT: &str = "Analyze these surveillance frames objectively. \
Report only what you actually observe - do not invent or imagine details. \
Document: personnel count, movements, vehicles, objects, and activities. \
Identify security anomalies, unauthorized access, or suspicious behavior only if clearly visible. \
For routine activity with no concerns, state: 'Routine surveillance - no security incidents detected.'";

/// `Batch 1: ...\n\nBatch 2: ...`
pub fn combine_summaries<'a>(summaries: impl IntoIterator<Item = &'a str>) -> String {
    summaries
        .into_iter()
        .enumerate()
        .map(|(i, s)| format!("Batch {}: {}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn consolidation_prompt(combined: &str) -> String {
    format!(
        "Consolidate these surveillance batch reports into a final security assessment. \
Report only facts observed in the footage - do not speculate or create fictional details. \
Summarize: personnel, movements, vehicles, objects, and any documented security concerns. \
Base conclusions only on what was actually reported. \
For normal activity, conclude: 'No security incidents detected.'\n\n\
{}\n\n\
Security Assessment:",
        combined
    )
}

pub fn threat_prompt(analysis: &str) -> String {
    format!(
        "Based on the following security analysis, determine the threat level. \
Base classification only on what was actually observed - do not assume or invent threats. \
Respond with ONLY ONE of these exact words: LOW, MEDIUM, HIGH, CRITICAL.\n\n\
Guidelines:\n\
- LOW: Normal scene, no people, routine activity, no concerns\n\
- MEDIUM: Unusual but not threatening behavior, minor concerns\n\
- HIGH: Suspicious behavior, potential security risk, concerning activity\n\
- CRITICAL: Clear threats, weapons, violence, break-ins, immediate danger\n\n\
Security Analysis:\n{}\n\n\
Threat Level:",
        analysis
    )
}

pub fn keyword_prompt(analysis: &str) -> String {
    format!(
        "Extract 3-5 relevant security keywords from the following analysis based only on what was actually observed. \
Do not add keywords for details that were not mentioned. \
Return only the keywords separated by commas, no explanations.\n\
Focus on: people, activities, objects, threats, or scene descriptions.\n\n\
Analysis: {}\n\n\
Keywords:",
        analysis
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_summaries_order() {
        let combined = combine_summaries(["first", "second"]);
        assert_eq!(combined, "Batch 1: first\n\nBatch 2: second");
    }

    #[test]
    fn test_prompts_embed_text() {
        assert!(consolidation_prompt("Batch 1: x").contains("\n\nBatch 1: x\n\nSecurity Assessment:"));
        assert!(threat_prompt("a man").contains("Security Analysis:\na man\n\nThreat Level:"));
        assert!(keyword_prompt("a man").ends_with("Analysis: a man\n\nKeywords:"));
        assert!(BATCH_PROMPT.contains("do not invent"));
    }
}

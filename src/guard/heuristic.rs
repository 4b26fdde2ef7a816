use regex::{Regex, RegexBuilder};

use crate::{context::RequestContext, guard::decision::Decision};

pub const SUSPICIOUS_PATTERN_REASON: &str = "Suspicious pattern detected";

/// (pattern, case-insensitive)
const SUSPICIOUS_PATTERNS: &[(&str, bool)] = &[
    (r"DROP\s+TABLE", true),
    (r"SELECT\s*\*\s*FROM", true),
    (r"\.\./\.\./\.\./", false),
    (r"<script[^>]*>", true),
    (r"eval\s*\(", true),
    (r"javascript:", true),
];

/// Static rule set used when the analysis service is skipped.
pub struct FallbackHeuristic {
    patterns: Vec<Regex>,
}

impl FallbackHeuristic {
    pub fn new() -> Result<Self, regex::Error> {
        let patterns = SUSPICIOUS_PATTERNS
            .iter()
            .map(|(pattern, case_insensitive)| {
                RegexBuilder::new(pattern)
                    .case_insensitive(*case_insensitive)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    /// Returns a block decision when the URL or body looks hostile, `None`
    /// otherwise.
    pub fn evaluate(&self, ctx: &RequestContext) -> Option<Decision> {
        let body = match &ctx.body {
            Some(body) => body.to_string(),
            None => "\"\"".to_string(),
        };
        let haystack = format!("{} {}", ctx.url, body);

        let matched = self.patterns.iter().find(|p| p.is_match(&haystack))?;
        tracing::debug!(pattern = matched.as_str(), "fallback rule matched");

        Some(Decision::Block {
            status_code: Some(403),
            reasoning: SUSPICIOUS_PATTERN_REASON.to_string(),
        })
    }
}

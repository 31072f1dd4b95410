//! Context window sizes by model family

/// Window assumed for models missing from the table.
pub const DEFAULT_TOKEN_LIMIT: usize = 1_048_576;

/// Known model-name prefixes and their context windows; longest prefixes first.
const TOKEN_LIMITS: &[(&str, usize)] = &[
    ("gemini-1.5-pro", 2_097_152),
    ("gemini-1.5-flash", 1_048_576),
    ("gemini-2.5-pro", 1_048_576),
    ("gemini-2.5-flash", 1_048_576),
    ("gemini-2.0-flash", 1_048_576),
    ("gemini-1.0-pro", 32_768),
    ("gemini-embedding", 2_048),
    ("gpt-4o", 128_000),
    ("gpt-4", 8_192),
    ("claude", 200_000),
];

/// Context window for a model, by longest matching name prefix.
pub fn token_limit(model: &str) -> usize {
    TOKEN_LIMITS
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, limit)| *limit)
        .unwrap_or(DEFAULT_TOKEN_LIMIT)
}

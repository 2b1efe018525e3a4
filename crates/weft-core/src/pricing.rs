/// USD per million input/output tokens for the built-in models.
const PRICING: &[(&str, f64, f64)] = &[
    ("zai:glm-4.5", 0.55, 2.19),
    ("zai:glm-5", 0.95, 3.79),
    ("anthropic:claude-haiku-4-5", 0.80, 4.00),
    ("anthropic:claude-sonnet-4-6", 3.00, 15.00),
    ("anthropic:claude-opus-4-6", 5.00, 25.00),
];

/// Context windows for the built-in models; anything else gets the default.
const CONTEXT_WINDOWS: &[(&str, u64)] = &[
    ("zai:glm-4.5", 128_000),
    ("zai:glm-5", 200_000),
    ("anthropic:claude-haiku-4-5", 200_000),
    ("anthropic:claude-sonnet-4-6", 200_000),
    ("anthropic:claude-opus-4-6", 200_000),
];

pub const DEFAULT_CONTEXT_WINDOW: u64 = 128_000;

pub fn pricing_for(model: &str) -> Option<(f64, f64)> {
    PRICING
        .iter()
        .find(|(name, _, _)| *name == model)
        .map(|(_, input, output)| (*input, *output))
}

/// Cost in USD for a call, rounded to 8 decimals. Unknown models cost zero.
pub fn calculate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let Some((input_price, output_price)) = pricing_for(model) else {
        tracing::warn!(model, "no pricing entry; recording zero cost");
        return 0.0;
    };
    let cost = (input_tokens as f64 / 1e6) * input_price
        + (output_tokens as f64 / 1e6) * output_price;
    round8(cost)
}

pub fn round8(value: f64) -> f64 {
    (value * 1e8).round() / 1e8
}

pub fn context_window(model: &str) -> u64 {
    CONTEXT_WINDOWS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, window)| *window)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

/// Legacy tier names accepted wherever a `model_hint` is resolved.
pub fn resolve_tier(name: &str) -> Option<&'static str> {
    match name {
        "light" => Some("zai:glm-4.5"),
        "standard" => Some("zai:glm-5"),
        "advanced" => Some("anthropic:claude-sonnet-4-6"),
        "premium" => Some("anthropic:claude-opus-4-6"),
        _ => None,
    }
}

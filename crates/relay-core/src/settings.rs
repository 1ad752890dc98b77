// Call settings
//
// Settings arrive as a loose JSON map. The coordinator partitions them into
// provider settings (typed, forwarded to the compat), runtime settings
// (tool-loop behavior, stripped before anything reaches the wire), and
// provider extras (unknown keys, routed to manifest payload extensions and
// compat extras). Coercion of sloppy inputs is centralized here:
// `normalize_flag` for booleans, `parse_max_tool_iterations` for the budget
// cap, `PreservePolicy::parse` for pruning policies.

use serde_json::{Map, Value};

/// Keys recognized as provider settings (forwarded to the compat)
pub const PROVIDER_SETTING_KEYS: &[&str] = &[
    "temperature",
    "topP",
    "maxTokens",
    "stop",
    "responseFormat",
    "seed",
    "frequencyPenalty",
    "presencePenalty",
    "logitBias",
    "logprobs",
    "topLogprobs",
    "reasoning",
    "reasoningBudget",
];

/// Keys consumed by the runtime and never forwarded to providers
pub const RUNTIME_SETTING_KEYS: &[&str] = &[
    "maxToolIterations",
    "toolCountdownEnabled",
    "toolFinalPromptEnabled",
    "preserveToolResults",
    "preserveReasoning",
    "parallelToolExecution",
    "toolResultMaxChars",
    "batchId",
];

/// Default tool budget when `maxToolIterations` is absent or unusable
pub const DEFAULT_MAX_TOOL_ITERATIONS: u32 = 10;

/// Default Anthropic-style thinking budget when reasoning is enabled
/// without an explicit budget
pub const DEFAULT_REASONING_BUDGET: u64 = 51_200;

// ============================================================================
// Coercion utilities
// ============================================================================

/// Coerce a loose JSON value into a boolean flag.
///
/// Strings "true"/"yes"/"1"/"on" are true, "false"/"no"/"0"/"off" are false
/// (case-insensitive); numbers 1/0 map likewise; booleans pass through;
/// anything else yields `default`.
pub fn normalize_flag(value: Option<&Value>, default: bool) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => true,
            "false" | "no" | "0" | "off" => false,
            _ => default,
        },
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) if f == 1.0 => true,
            Some(f) if f == 0.0 => false,
            _ => default,
        },
        _ => default,
    }
}

/// Parse `maxToolIterations`: numbers and numeric strings accepted,
/// non-finite or unparseable input falls back to the default, negatives
/// clamp to zero.
pub fn parse_max_tool_iterations(value: Option<&Value>) -> u32 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(f) if f.is_finite() => f.max(0.0).floor() as u32,
        _ => DEFAULT_MAX_TOOL_ITERATIONS,
    }
}

/// Retention policy for tool results / reasoning across tool cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreservePolicy {
    /// Keep everything (no pruning)
    #[default]
    All,
    /// Redact everything
    None,
    /// Keep only the last N cycles
    Last(u32),
}

impl PreservePolicy {
    /// Parse `"all" | "none" | N` (numbers or numeric strings; N = 0 is
    /// equivalent to `"none"`). Unrecognized input keeps everything.
    pub fn parse(value: Option<&Value>) -> Self {
        match value {
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "all" => PreservePolicy::All,
                "none" => PreservePolicy::None,
                other => match other.parse::<f64>() {
                    Ok(f) if f.is_finite() && f >= 0.0 => Self::from_count(f.floor() as u32),
                    _ => PreservePolicy::All,
                },
            },
            Some(Value::Number(n)) => match n.as_f64() {
                Some(f) if f.is_finite() && f >= 0.0 => Self::from_count(f.floor() as u32),
                _ => PreservePolicy::All,
            },
            _ => PreservePolicy::All,
        }
    }

    fn from_count(n: u32) -> Self {
        if n == 0 {
            PreservePolicy::None
        } else {
            PreservePolicy::Last(n)
        }
    }
}

// ============================================================================
// Reasoning settings
// ============================================================================

/// Normalized reasoning request.
///
/// `budget` already resolves the `reasoning.budget` vs `reasoningBudget`
/// alias precedence; `enabled: false` never survives normalization (it is
/// equivalent to absence).
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningConfig {
    pub enabled: bool,
    pub budget: Option<u64>,
    pub effort: Option<String>,
    pub exclude: Option<Value>,
}

impl ReasoningConfig {
    /// Resolve reasoning from the provider-settings map.
    ///
    /// Returns `None` when reasoning was not requested (absent, or
    /// `enabled: false` with nothing else set).
    fn resolve(map: &Map<String, Value>) -> Option<Self> {
        let alias_budget = map.get("reasoningBudget").and_then(Value::as_u64);
        let obj = map.get("reasoning").and_then(Value::as_object);

        let (enabled, budget, effort, exclude) = match obj {
            Some(r) => (
                r.get("enabled").and_then(Value::as_bool),
                r.get("budget").and_then(Value::as_u64),
                r.get("effort").and_then(Value::as_str).map(str::to_string),
                r.get("exclude").cloned(),
            ),
            None => (None, None, None, None),
        };

        // `reasoning.budget` wins over the alias
        let budget = budget.or(alias_budget);

        if enabled == Some(false) {
            return None;
        }

        let requested =
            enabled == Some(true) || budget.is_some() || effort.is_some() || exclude.is_some();
        if !requested {
            return None;
        }

        Some(Self {
            enabled: enabled.unwrap_or(false),
            budget,
            effort,
            exclude,
        })
    }
}

// ============================================================================
// Provider settings
// ============================================================================

/// Typed view of the recognized provider settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderSettings {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u64>,
    pub stop: Option<Vec<String>>,
    pub response_format: Option<Value>,
    pub seed: Option<i64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub logit_bias: Option<Value>,
    pub logprobs: Option<bool>,
    pub top_logprobs: Option<u64>,
    pub reasoning: Option<ReasoningConfig>,
}

impl ProviderSettings {
    /// Build from a map of recognized provider-setting keys
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let stop = map.get("stop").map(|v| match v {
            Value::String(s) => vec![s.clone()],
            Value::Array(items) => items
                .iter()
                .filter_map(|i| i.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        });

        Self {
            temperature: map.get("temperature").and_then(Value::as_f64),
            top_p: map.get("topP").and_then(Value::as_f64),
            max_tokens: map.get("maxTokens").and_then(Value::as_u64),
            stop,
            response_format: map.get("responseFormat").cloned(),
            seed: map.get("seed").and_then(Value::as_i64),
            frequency_penalty: map.get("frequencyPenalty").and_then(Value::as_f64),
            presence_penalty: map.get("presencePenalty").and_then(Value::as_f64),
            logit_bias: map.get("logitBias").cloned(),
            logprobs: map.get("logprobs").and_then(Value::as_bool),
            top_logprobs: map.get("topLogprobs").and_then(Value::as_u64),
            reasoning: ReasoningConfig::resolve(map),
        }
    }
}

// ============================================================================
// Runtime settings
// ============================================================================

/// Tool-loop behavior flags, stripped before any payload is built
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub max_tool_iterations: u32,
    pub countdown_enabled: bool,
    pub final_prompt_enabled: bool,
    pub parallel_tool_execution: bool,
    pub preserve_tool_results: PreservePolicy,
    pub preserve_reasoning: PreservePolicy,
    pub tool_result_max_chars: Option<usize>,
    pub batch_id: Option<String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            countdown_enabled: false,
            final_prompt_enabled: false,
            parallel_tool_execution: false,
            preserve_tool_results: PreservePolicy::All,
            preserve_reasoning: PreservePolicy::All,
            tool_result_max_chars: None,
            batch_id: None,
        }
    }
}

impl RuntimeSettings {
    /// Build from the raw settings map
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let tool_result_max_chars = match map.get("toolResultMaxChars") {
            Some(Value::Number(n)) => n.as_u64().map(|n| n as usize),
            Some(Value::String(s)) => s.trim().parse::<usize>().ok(),
            _ => None,
        };

        Self {
            max_tool_iterations: parse_max_tool_iterations(map.get("maxToolIterations")),
            countdown_enabled: normalize_flag(map.get("toolCountdownEnabled"), false),
            final_prompt_enabled: normalize_flag(map.get("toolFinalPromptEnabled"), false),
            parallel_tool_execution: normalize_flag(map.get("parallelToolExecution"), false),
            preserve_tool_results: PreservePolicy::parse(map.get("preserveToolResults")),
            preserve_reasoning: PreservePolicy::parse(map.get("preserveReasoning")),
            tool_result_max_chars,
            batch_id: map
                .get("batchId")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

// ============================================================================
// Partitioning and merging
// ============================================================================

/// Result of splitting the raw settings map
#[derive(Debug, Clone, Default)]
pub struct PartitionedSettings {
    pub provider: ProviderSettings,
    pub runtime: RuntimeSettings,
    /// Unrecognized keys, routed to payload extensions / compat extras
    pub extras: Map<String, Value>,
}

/// Split a settings map into provider settings, runtime settings, and extras
pub fn partition_settings(map: &Map<String, Value>) -> PartitionedSettings {
    let mut provider_map = Map::new();
    let mut extras = Map::new();

    for (key, value) in map {
        if PROVIDER_SETTING_KEYS.contains(&key.as_str()) {
            provider_map.insert(key.clone(), value.clone());
        } else if !RUNTIME_SETTING_KEYS.contains(&key.as_str()) {
            extras.insert(key.clone(), value.clone());
        }
    }

    PartitionedSettings {
        provider: ProviderSettings::from_map(&provider_map),
        runtime: RuntimeSettings::from_map(map),
        extras,
    }
}

/// Deep-merge `overlay` into `base`: objects merge recursively, any other
/// overlay value replaces the base value.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

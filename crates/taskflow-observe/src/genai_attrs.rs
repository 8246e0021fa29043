//! OpenTelemetry GenAI Semantic Convention attribute constants.
//!
//! These follow the OTel GenAI Semantic Conventions specification for
//! consistent LLM call instrumentation across the codebase. All constants are
//! string slices usable in `tracing::span!` and `tracing::info_span!` field
//! names.
//!
//! Span naming convention: `"{operation} {model}"` (e.g., `"generate mock-default"`)

// --- Required attributes ---

/// The name of the operation being performed (e.g., "generate").
pub const GEN_AI_OPERATION_NAME: &str = "gen_ai.operation.name";

/// The name of the GenAI provider (e.g., "anthropic").
pub const GEN_AI_PROVIDER_NAME: &str = "gen_ai.provider.name";

// --- Recommended attributes ---

/// The model ID requested (e.g., "mock-default").
pub const GEN_AI_REQUEST_MODEL: &str = "gen_ai.request.model";

/// The number of input tokens consumed.
pub const GEN_AI_USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";

/// The number of output tokens generated.
pub const GEN_AI_USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";

// --- Operation name values ---

/// A single text generation call.
pub const OP_GENERATE: &str = "generate";

/// The planning call made once per run before dispatch starts.
pub const OP_PLAN_RUN: &str = "plan_run";

use serde::{Deserialize, Serialize};

use crate::model::{Capabilities, InlineHint};

/// Whether nodes are spliced into the caller or emitted as subroutines.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InlinePolicy {
    /// Follow each node's hint; `Preferred` nodes are inlined up to
    /// `inline_size_threshold` output elements.
    Auto,
    Always,
    Never,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Name of the emitted entry point.
    pub function_name: String,
    pub inline: InlinePolicy,
    pub inline_size_threshold: usize,
    /// Sizes up to this many elements are emitted as straight-line code.
    pub unroll_threshold: usize,
    /// Expand every loop regardless of size.
    pub unroll_loops: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            function_name: "predict".to_string(),
            inline: InlinePolicy::Auto,
            inline_size_threshold: 64,
            unroll_threshold: 8,
            unroll_loops: false,
        }
    }
}

impl CompilerOptions {
    pub fn strategy_for(&self, size: usize) -> EmissionStrategy {
        if self.unroll_loops || size <= self.unroll_threshold {
            EmissionStrategy::Expanded
        } else {
            EmissionStrategy::Loop
        }
    }

    pub fn should_inline(&self, capabilities: Capabilities, output_size: usize) -> bool {
        match (capabilities.inline, self.inline) {
            (InlineHint::Required, _) => true,
            (InlineHint::Never, _) => false,
            (InlineHint::Preferred, InlinePolicy::Always) => true,
            (InlineHint::Preferred, InlinePolicy::Never) => false,
            (InlineHint::Preferred, InlinePolicy::Auto) => output_size <= self.inline_size_threshold,
        }
    }
}

/// How a size-parameterized node lays out its per-element work.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmissionStrategy {
    Loop,
    Expanded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: CompilerOptions =
            serde_json::from_str(r#"{ "unroll_threshold": 2, "inline": "never" }"#).unwrap();
        assert_eq!(options.function_name, "predict");
        assert_eq!(options.unroll_threshold, 2);
        assert_eq!(options.inline, InlinePolicy::Never);
        assert_eq!(options.strategy_for(3), EmissionStrategy::Loop);
        assert_eq!(options.strategy_for(2), EmissionStrategy::Expanded);
    }

    #[test]
    fn test_inline_decision_respects_hints() {
        let options = CompilerOptions::default();
        let preferred = Capabilities::compilable(InlineHint::Preferred);
        assert!(options.should_inline(preferred, 64));
        assert!(!options.should_inline(preferred, 65));
        assert!(options.should_inline(Capabilities::compilable(InlineHint::Required), 10_000));

        let never = CompilerOptions {
            inline: InlinePolicy::Never,
            ..CompilerOptions::default()
        };
        assert!(!never.should_inline(preferred, 1));
        assert!(never.should_inline(Capabilities::input(), 1));
    }
}

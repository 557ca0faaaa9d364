use crate::config::types::ConformanceConfig;
use crate::error::{Severity, Violation};

/// Validate a configuration for internal consistency.
///
/// Returns a list of violations. If any violation has
/// [`Severity::Error`], no buffers may be allocated from the config.
pub fn validate_config(config: &ConformanceConfig) -> Vec<Violation> {
    let mut violations = Vec::new();

    validate_dimensions(config, &mut violations);
    validate_patch_grid(config, &mut violations);
    validate_attention(config, &mut violations);
    validate_moe(config, &mut violations);
    validate_harness(config, &mut violations);

    violations
}

/// True when no violation is an error.
pub fn is_usable(violations: &[Violation]) -> bool {
    violations.iter().all(|v| v.severity != Severity::Error)
}

fn push(
    violations: &mut Vec<Violation>,
    severity: Severity,
    rule: &str,
    message: String,
    location: &str,
) {
    violations.push(Violation {
        severity,
        rule: rule.to_string(),
        message,
        location: Some(location.to_string()),
    });
}

fn validate_dimensions(config: &ConformanceConfig, violations: &mut Vec<Violation>) {
    let m = &config.model;
    let required = [
        ("feature_dim", m.feature_dim),
        ("feature_block_size", m.feature_block_size),
        ("num_patches", m.num_patches),
        ("input_channels", m.input_channels),
        ("image_height", m.image_height),
        ("image_width", m.image_width),
        ("patch_height", m.patch_height),
        ("patch_width", m.patch_width),
        ("num_layers", m.num_layers),
        ("num_heads", m.num_heads),
        ("num_experts", m.num_experts),
        ("expert_hidden_dim", m.expert_hidden_dim),
        ("vit_hidden_dim", m.vit_hidden_dim),
    ];
    for (name, value) in required {
        if value == 0 {
            push(
                violations,
                Severity::Error,
                "CFG-001",
                format!("model.{name} must be non-zero"),
                &format!("model.{name}"),
            );
        }
    }
}

fn validate_patch_grid(config: &ConformanceConfig, violations: &mut Vec<Violation>) {
    let m = &config.model;
    if m.patch_height == 0 || m.patch_width == 0 {
        return;
    }
    if m.image_height % m.patch_height != 0 || m.image_width % m.patch_width != 0 {
        push(
            violations,
            Severity::Error,
            "CFG-002",
            format!(
                "image {}x{} is not tiled exactly by {}x{} patches",
                m.image_height, m.image_width, m.patch_height, m.patch_width
            ),
            "model.image_height",
        );
    }
    let (rows, cols) = m.patch_grid();
    if rows * cols != m.num_patches {
        push(
            violations,
            Severity::Error,
            "CFG-003",
            format!(
                "model.num_patches = {} but the patch grid is {rows}x{cols} = {}",
                m.num_patches,
                rows * cols
            ),
            "model.num_patches",
        );
    }
}

fn validate_attention(config: &ConformanceConfig, violations: &mut Vec<Violation>) {
    let m = &config.model;
    if m.num_heads > 0 && m.feature_dim % m.num_heads != 0 {
        push(
            violations,
            Severity::Error,
            "CFG-004",
            format!(
                "model.feature_dim = {} is not divisible by num_heads = {}",
                m.feature_dim, m.num_heads
            ),
            "model.num_heads",
        );
    }
    if m.num_attn_linear != 4 {
        push(
            violations,
            Severity::Warning,
            "CFG-005",
            format!(
                "model.num_attn_linear = {}; the reference engine expects q/k/v/out = 4",
                m.num_attn_linear
            ),
            "model.num_attn_linear",
        );
    }
    if m.num_layer_norms != 2 {
        push(
            violations,
            Severity::Warning,
            "CFG-006",
            format!(
                "model.num_layer_norms = {}; the reference engine expects 2",
                m.num_layer_norms
            ),
            "model.num_layer_norms",
        );
    }
}

fn validate_moe(config: &ConformanceConfig, violations: &mut Vec<Violation>) {
    let m = &config.model;
    if m.moe_top_k == 0 || m.moe_top_k > m.num_experts {
        push(
            violations,
            Severity::Error,
            "CFG-007",
            format!(
                "model.moe_top_k = {} must lie in 1..={}",
                m.moe_top_k, m.num_experts
            ),
            "model.moe_top_k",
        );
    }
    if config.harness.gate_task >= m.num_gate_tasks {
        push(
            violations,
            Severity::Error,
            "CFG-008",
            format!(
                "harness.gate_task = {} but only {} gate task(s) exist",
                config.harness.gate_task, m.num_gate_tasks
            ),
            "harness.gate_task",
        );
    }
}

fn validate_harness(config: &ConformanceConfig, violations: &mut Vec<Violation>) {
    let h = &config.harness;
    let m = &config.model;
    if !h.mse_threshold.is_finite() || h.mse_threshold < 0.0 {
        push(
            violations,
            Severity::Error,
            "CFG-009",
            format!(
                "harness.mse_threshold = {} must be finite and non-negative",
                h.mse_threshold
            ),
            "harness.mse_threshold",
        );
    }
    if h.num_images == 0 {
        push(
            violations,
            Severity::Error,
            "CFG-010",
            "harness.num_images must be at least 1".to_string(),
            "harness.num_images",
        );
    }
    if h.display_patch_limit > m.num_patches {
        push(
            violations,
            Severity::Warning,
            "CFG-011",
            format!(
                "harness.display_patch_limit = {} exceeds num_patches = {}; clamped",
                h.display_patch_limit, m.num_patches
            ),
            "harness.display_patch_limit",
        );
    }
    if h.display_dim_limit > m.feature_dim {
        push(
            violations,
            Severity::Warning,
            "CFG-012",
            format!(
                "harness.display_dim_limit = {} exceeds feature_dim = {}; clamped",
                h.display_dim_limit, m.feature_dim
            ),
            "harness.display_dim_limit",
        );
    }
}

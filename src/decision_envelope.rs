// =============================================================================
// Decision envelope — per-market gate audit trail
// =============================================================================
//
// One envelope per evaluation of one market in one cycle. Rewritten from the
// teacher's `decision_envelope.rs` (`allow`/`blocked` constructors, per-layer
// verdict) with this engine's own layer names instead of the teacher's
// indicator-ensemble layers.
// =============================================================================

use serde::Serialize;

use crate::clock::now_ms;
use crate::types::NearBy;

/// Which gate layer produced a verdict, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateLayer {
    Cooldown,
    Stage1,
    NearMargin,
    Depth,
    LeagueGate,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionEnvelope {
    pub signal_id: String,
    pub condition_id: String,
    pub created_ts: i64,
    pub allowed: bool,
    pub blocked_layer: Option<GateLayer>,
    pub blocked_reason: Option<String>,
    pub near_by: NearBy,
}

impl DecisionEnvelope {
    pub fn allow(signal_id: impl Into<String>, condition_id: impl Into<String>, near_by: NearBy) -> Self {
        Self {
            signal_id: signal_id.into(),
            condition_id: condition_id.into(),
            created_ts: now_ms(),
            allowed: true,
            blocked_layer: None,
            blocked_reason: None,
            near_by,
        }
    }

    pub fn blocked(
        signal_id: impl Into<String>,
        condition_id: impl Into<String>,
        layer: GateLayer,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            signal_id: signal_id.into(),
            condition_id: condition_id.into(),
            created_ts: now_ms(),
            allowed: false,
            blocked_layer: Some(layer),
            blocked_reason: Some(reason.into()),
            near_by: NearBy::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_envelope_has_no_block_fields() {
        let envelope = DecisionEnvelope::allow("sig1", "c1", NearBy::Both);
        assert!(envelope.allowed);
        assert!(envelope.blocked_layer.is_none());
        assert!(envelope.blocked_reason.is_none());
    }

    #[test]
    fn blocked_envelope_records_layer_and_reason() {
        let envelope = DecisionEnvelope::blocked("sig1", "c1", GateLayer::Depth, "depth_ask_below_min");
        assert!(!envelope.allowed);
        assert_eq!(envelope.blocked_layer, Some(GateLayer::Depth));
        assert_eq!(envelope.blocked_reason.as_deref(), Some("depth_ask_below_min"));
    }
}

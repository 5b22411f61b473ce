//! # Promotion Guard
//!
//! Decides whether an externally configured promotion may stack additional
//! discount on top of a bundle component line.
//!
//! ## Policy Chain (first match decides)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. Header line ─────────────────────────────────────────► BLOCK        │
//! │  2. Code matches an exclusion pattern ───────────────────► BLOCK        │
//! │  3. Whitelist non-empty and code not on it ──────────────► BLOCK        │
//! │  4. Bundle override       no ► BLOCK   yes ► ALLOW*   inherit ▼         │
//! │  5. Promotion override never ► BLOCK always ► ALLOW*  inherit ▼         │
//! │  6. Global default   Exclude ► BLOCK   Allow ► ALLOW*                   │
//! │                                                                         │
//! │  * ALLOW is subject to the cumulative discount cap:                     │
//! │    bundle_pct_applied + estimated promotion pct > cap ► BLOCK           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The policy is a plain value passed in by the caller, sourced once per
//! request. Nothing here reads global state.

use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{BundleLineMetadata, Percent};

// =============================================================================
// Policy
// =============================================================================

/// What happens when no override applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum GlobalPromotionPolicy {
    /// Promotions never stack on bundle components.
    #[default]
    Exclude,
    /// Promotions stack, subject to the cumulative cap.
    Allow,
}

/// Per-bundle override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum BundleOverride {
    Yes,
    No,
    #[default]
    Inherit,
}

/// Per-promotion override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PromotionOverride {
    Always,
    Never,
    #[default]
    Inherit,
}

/// Settings governing promotion stacking on bundle lines.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(default)]
pub struct PromotionPolicy {
    pub default: GlobalPromotionPolicy,

    /// Keyed by bundle id.
    pub bundle_overrides: HashMap<String, BundleOverride>,

    /// Keyed by promotion code, matched case-insensitively. A candidate's
    /// own override wins when set.
    pub promotion_overrides: HashMap<String, PromotionOverride>,

    /// Regular expressions matched case-insensitively against the code.
    pub exclusion_patterns: Vec<String>,

    /// Allowed codes. Empty means "no whitelist".
    pub whitelist: Vec<String>,

    /// Maximum combined discount as a fraction (0.5 = 50%).
    pub max_cumulative_discount: Option<f64>,
}

// =============================================================================
// Promotion Candidate
// =============================================================================

/// The discount a promotion would apply to a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", content = "value")]
pub enum PromotionAction {
    PercentOff(Percent),
    AmountOffPerUnit(Money),
}

/// An external promotion asking to discount a bundle line further.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PromotionCandidate {
    /// Coupon code; automatic promotions have none.
    pub code: Option<String>,
    pub name: String,
    pub action: PromotionAction,
    #[serde(default)]
    pub promotion_override: PromotionOverride,
}

impl PromotionCandidate {
    /// Estimated extra percentage this promotion removes from a line.
    pub fn estimated_pct(&self, line: &BundleLineMetadata) -> f64 {
        match self.action {
            PromotionAction::PercentOff(pct) => pct.percentage(),
            PromotionAction::AmountOffPerUnit(amount) => {
                if line.effective_unit_price.is_positive() {
                    amount.cents() as f64 / line.effective_unit_price.cents() as f64 * 100.0
                } else {
                    100.0
                }
            }
        }
    }
}

// =============================================================================
// Guard Result
// =============================================================================

/// The rule that produced a guard decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum GuardRule {
    HeaderLine,
    ExclusionPattern,
    Whitelist,
    BundleOverride,
    PromotionOverride,
    GlobalDefault,
    DiscountCap,
}

/// Inputs and intermediate values behind a decision, for audit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct GuardMetadata {
    pub bundle_key: String,
    pub bundle_id: String,
    pub promotion_code: Option<String>,
    pub matched_pattern: Option<String>,
    pub existing_pct: f64,
    pub estimated_pct: Option<f64>,
    pub cumulative_pct: Option<f64>,
    pub cap_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct GuardResult {
    pub allowed: bool,
    pub reason: String,
    pub deciding_rule: GuardRule,
    pub metadata: GuardMetadata,
}

// =============================================================================
// Guard
// =============================================================================

/// A policy with its exclusion patterns compiled.
///
/// Build once per request and evaluate every line with it.
#[derive(Debug, Clone)]
pub struct PromotionGuard<'p> {
    policy: &'p PromotionPolicy,
    patterns: Vec<Regex>,
    whitelist: Vec<String>,
    /// `promotion_overrides` keyed by trimmed, lowercased code.
    code_overrides: HashMap<String, PromotionOverride>,
}

impl<'p> PromotionGuard<'p> {
    /// Compiles the policy.
    ///
    /// ## Errors
    /// `InvalidPattern` if an exclusion pattern is not a valid regex.
    pub fn new(policy: &'p PromotionPolicy) -> CoreResult<Self> {
        let patterns = policy
            .exclusion_patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| CoreError::InvalidPattern {
                        pattern: p.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<CoreResult<Vec<_>>>()?;

        let whitelist = policy
            .whitelist
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();

        let code_overrides = policy
            .promotion_overrides
            .iter()
            .map(|(code, choice)| (code.trim().to_lowercase(), *choice))
            .collect();

        Ok(PromotionGuard {
            policy,
            patterns,
            whitelist,
            code_overrides,
        })
    }

    /// Runs the policy chain for one line.
    pub fn evaluate(&self, line: &BundleLineMetadata, promotion: &PromotionCandidate) -> GuardResult {
        let mut metadata = GuardMetadata {
            bundle_key: line.bundle_key.clone(),
            bundle_id: line.bundle_id.clone(),
            promotion_code: promotion.code.clone(),
            existing_pct: line.bundle_pct_applied,
            cap_pct: self.policy.max_cumulative_discount.map(|cap| cap * 100.0),
            ..GuardMetadata::default()
        };

        // 1. Header lines are display only
        if line.is_bundle_header {
            return blocked(GuardRule::HeaderLine, "bundle header lines are never discounted", metadata);
        }

        let code = promotion.code.as_deref().map(str::trim).filter(|c| !c.is_empty());

        // 2. Exclusion patterns
        if let Some(code) = code {
            if let Some(pattern) = self.patterns.iter().find(|re| re.is_match(code)) {
                metadata.matched_pattern = Some(pattern.as_str().to_string());
                return blocked(
                    GuardRule::ExclusionPattern,
                    format!("promotion code '{}' matches exclusion pattern '{}'", code, pattern.as_str()),
                    metadata,
                );
            }
        }

        // 3. Whitelist
        if !self.whitelist.is_empty() {
            let listed = code
                .map(|c| self.whitelist.contains(&c.to_lowercase()))
                .unwrap_or(false);
            if !listed {
                return blocked(
                    GuardRule::Whitelist,
                    format!("promotion code '{}' is not whitelisted", code.unwrap_or("")),
                    metadata,
                );
            }
        }

        // 4. Bundle override
        match self
            .policy
            .bundle_overrides
            .get(&line.bundle_id)
            .copied()
            .unwrap_or_default()
        {
            BundleOverride::No => {
                return blocked(
                    GuardRule::BundleOverride,
                    format!("bundle override 'no' blocks promotions on bundle {}", line.bundle_id),
                    metadata,
                );
            }
            BundleOverride::Yes => {
                return self.allow_within_cap(
                    GuardRule::BundleOverride,
                    format!("bundle override 'yes' allows promotions on bundle {}", line.bundle_id),
                    line,
                    promotion,
                    metadata,
                );
            }
            BundleOverride::Inherit => {}
        }

        // 5. Promotion override
        let promotion_override = match promotion.promotion_override {
            PromotionOverride::Inherit => code
                .and_then(|c| self.code_overrides.get(&c.to_lowercase()))
                .copied()
                .unwrap_or_default(),
            explicit => explicit,
        };
        match promotion_override {
            PromotionOverride::Never => {
                return blocked(
                    GuardRule::PromotionOverride,
                    format!("promotion override 'never' for '{}'", promotion.name),
                    metadata,
                );
            }
            PromotionOverride::Always => {
                return self.allow_within_cap(
                    GuardRule::PromotionOverride,
                    format!("promotion override 'always' for '{}'", promotion.name),
                    line,
                    promotion,
                    metadata,
                );
            }
            PromotionOverride::Inherit => {}
        }

        // 6. Global default
        match self.policy.default {
            GlobalPromotionPolicy::Exclude => blocked(
                GuardRule::GlobalDefault,
                "global policy excludes promotions on bundle components",
                metadata,
            ),
            GlobalPromotionPolicy::Allow => self.allow_within_cap(
                GuardRule::GlobalDefault,
                "global policy allows promotions on bundle components".to_string(),
                line,
                promotion,
                metadata,
            ),
        }
    }

    fn allow_within_cap(
        &self,
        rule: GuardRule,
        reason: String,
        line: &BundleLineMetadata,
        promotion: &PromotionCandidate,
        mut metadata: GuardMetadata,
    ) -> GuardResult {
        let estimated = promotion.estimated_pct(line);
        let cumulative = line.bundle_pct_applied + estimated;
        metadata.estimated_pct = Some(estimated);
        metadata.cumulative_pct = Some(cumulative);

        if let Some(cap_pct) = metadata.cap_pct {
            if cumulative > cap_pct {
                return blocked(
                    GuardRule::DiscountCap,
                    format!(
                        "cap exceeded: cumulative discount {:.2}% is above {:.2}%",
                        cumulative, cap_pct
                    ),
                    metadata,
                );
            }
        }

        GuardResult {
            allowed: true,
            reason,
            deciding_rule: rule,
            metadata,
        }
    }
}

fn blocked(rule: GuardRule, reason: impl Into<String>, metadata: GuardMetadata) -> GuardResult {
    GuardResult {
        allowed: false,
        reason: reason.into(),
        deciding_rule: rule,
        metadata,
    }
}

/// One-shot guard evaluation.
///
/// Compiles `policy` for a single line. When evaluating many lines, build a
/// [`PromotionGuard`] once instead.
pub fn evaluate_promotion_guard(
    line: &BundleLineMetadata,
    promotion: &PromotionCandidate,
    policy: &PromotionPolicy,
) -> CoreResult<GuardResult> {
    Ok(PromotionGuard::new(policy)?.evaluate(line, promotion))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn line(header: bool, pct: f64) -> BundleLineMetadata {
        BundleLineMetadata {
            bundle_key: "k-1".to_string(),
            bundle_id: "b-1".to_string(),
            variant_id: if header { None } else { Some("v-1".to_string()) },
            is_bundle_header: header,
            quantity: 1,
            base_unit_price: Money::from_cents(1000),
            effective_unit_price: Money::from_cents(900),
            bundle_adj_amount: Money::from_cents(-100),
            bundle_pct_applied: pct,
            bundle_share: 1.0,
        }
    }

    fn promo(code: Option<&str>, pct: u32) -> PromotionCandidate {
        PromotionCandidate {
            code: code.map(str::to_string),
            name: "Spring Sale".to_string(),
            action: PromotionAction::PercentOff(Percent::from_whole(pct)),
            promotion_override: PromotionOverride::Inherit,
        }
    }

    fn allow_policy() -> PromotionPolicy {
        PromotionPolicy {
            default: GlobalPromotionPolicy::Allow,
            ..PromotionPolicy::default()
        }
    }

    #[test]
    fn test_bundle_override_beats_global_allow() {
        let mut policy = allow_policy();
        policy
            .bundle_overrides
            .insert("b-1".to_string(), BundleOverride::No);

        let result = evaluate_promotion_guard(&line(false, 10.0), &promo(Some("SPRING"), 5), &policy).unwrap();
        assert!(!result.allowed);
        assert_eq!(result.deciding_rule, GuardRule::BundleOverride);
        assert!(result.reason.contains("bundle override"));
        assert!(!result.reason.contains("global"));
    }

    #[test]
    fn test_header_always_blocked() {
        let result =
            evaluate_promotion_guard(&line(true, 0.0), &promo(Some("ANY"), 5), &allow_policy()).unwrap();
        assert!(!result.allowed);
        assert_eq!(result.deciding_rule, GuardRule::HeaderLine);
    }

    #[test]
    fn test_exclusion_pattern_case_insensitive() {
        let mut policy = allow_policy();
        policy.exclusion_patterns = vec!["^staff-".to_string()];

        let result = evaluate_promotion_guard(&line(false, 10.0), &promo(Some("STAFF-20"), 5), &policy).unwrap();
        assert!(!result.allowed);
        assert_eq!(result.deciding_rule, GuardRule::ExclusionPattern);
        assert_eq!(result.metadata.matched_pattern.as_deref(), Some("^staff-"));

        // code-less promotions never match a pattern
        let result = evaluate_promotion_guard(&line(false, 10.0), &promo(None, 5), &policy).unwrap();
        assert!(result.allowed);
    }

    #[test]
    fn test_whitelist() {
        let mut policy = allow_policy();
        policy.whitelist = vec![" Spring ".to_string()];

        let ok = evaluate_promotion_guard(&line(false, 10.0), &promo(Some("spring"), 5), &policy).unwrap();
        assert!(ok.allowed);

        let no = evaluate_promotion_guard(&line(false, 10.0), &promo(Some("SUMMER"), 5), &policy).unwrap();
        assert_eq!(no.deciding_rule, GuardRule::Whitelist);

        let none = evaluate_promotion_guard(&line(false, 10.0), &promo(None, 5), &policy).unwrap();
        assert!(!none.allowed);
    }

    #[test]
    fn test_promotion_overrides() {
        let mut policy = PromotionPolicy::default();
        policy
            .promotion_overrides
            .insert("VIP".to_string(), PromotionOverride::Always);

        let result = evaluate_promotion_guard(&line(false, 10.0), &promo(Some("VIP"), 5), &policy).unwrap();
        assert!(result.allowed);
        assert_eq!(result.deciding_rule, GuardRule::PromotionOverride);

        // the candidate's own override wins
        let mut candidate = promo(Some("VIP"), 5);
        candidate.promotion_override = PromotionOverride::Never;
        let result = evaluate_promotion_guard(&line(false, 10.0), &candidate, &policy).unwrap();
        assert!(!result.allowed);

        let result = evaluate_promotion_guard(&line(false, 10.0), &promo(Some("OTHER"), 5), &policy).unwrap();
        assert!(!result.allowed);
        assert_eq!(result.deciding_rule, GuardRule::GlobalDefault);
    }

    #[test]
    fn test_promotion_override_codes_ignore_case() {
        let mut policy = PromotionPolicy::default();
        policy
            .promotion_overrides
            .insert(" Vip ".to_string(), PromotionOverride::Always);

        for code in ["VIP", "vip", " vIp"] {
            let result = evaluate_promotion_guard(&line(false, 10.0), &promo(Some(code), 5), &policy).unwrap();
            assert!(result.allowed, "{}", code);
            assert_eq!(result.deciding_rule, GuardRule::PromotionOverride);
        }
    }

    #[test]
    fn test_discount_cap() {
        let mut policy = allow_policy();
        policy.max_cumulative_discount = Some(0.25);

        let ok = evaluate_promotion_guard(&line(false, 10.0), &promo(Some("A"), 15), &policy).unwrap();
        assert!(ok.allowed);
        assert_eq!(ok.metadata.cumulative_pct, Some(25.0));

        let capped = evaluate_promotion_guard(&line(false, 10.0), &promo(Some("A"), 16), &policy).unwrap();
        assert!(!capped.allowed);
        assert_eq!(capped.deciding_rule, GuardRule::DiscountCap);
        assert!(capped.reason.starts_with("cap exceeded"));

        // overrides are still capped
        policy.bundle_overrides.insert("b-1".to_string(), BundleOverride::Yes);
        let capped = evaluate_promotion_guard(&line(false, 10.0), &promo(Some("A"), 16), &policy).unwrap();
        assert_eq!(capped.deciding_rule, GuardRule::DiscountCap);
    }

    #[test]
    fn test_amount_estimate() {
        let candidate = PromotionCandidate {
            code: None,
            name: "Two dollars off".to_string(),
            action: PromotionAction::AmountOffPerUnit(Money::from_cents(180)),
            promotion_override: PromotionOverride::Inherit,
        };
        assert!((candidate.estimated_pct(&line(false, 10.0)) - 20.0).abs() < 1e-9);

        let mut free = line(false, 100.0);
        free.effective_unit_price = Money::zero();
        assert!((candidate.estimated_pct(&free) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_pattern() {
        let mut policy = allow_policy();
        policy.exclusion_patterns = vec!["(unclosed".to_string()];
        let err = PromotionGuard::new(&policy).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPattern { .. }));
    }

    fn any_policy() -> impl Strategy<Value = PromotionPolicy> {
        (
            prop::bool::ANY,
            prop::sample::select(vec![BundleOverride::Yes, BundleOverride::No, BundleOverride::Inherit]),
            prop::sample::select(vec![
                PromotionOverride::Always,
                PromotionOverride::Never,
                PromotionOverride::Inherit,
            ]),
            prop::option::of(0.0f64..2.0),
            prop::bool::ANY,
        )
            .prop_map(|(allow, bundle, promotion, cap, whitelisted)| {
                let mut policy = PromotionPolicy {
                    default: if allow {
                        GlobalPromotionPolicy::Allow
                    } else {
                        GlobalPromotionPolicy::Exclude
                    },
                    max_cumulative_discount: cap,
                    ..PromotionPolicy::default()
                };
                policy.bundle_overrides.insert("b-1".to_string(), bundle);
                policy.promotion_overrides.insert("CODE".to_string(), promotion);
                if whitelisted {
                    policy.whitelist.push("CODE".to_string());
                }
                policy
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_header_lines_always_blocked(policy in any_policy(), pct in 0u32..=100) {
            let result = evaluate_promotion_guard(&line(true, 0.0), &promo(Some("CODE"), pct), &policy).unwrap();
            prop_assert!(!result.allowed);
            prop_assert_eq!(result.deciding_rule, GuardRule::HeaderLine);
        }
    }
}

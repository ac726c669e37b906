//! Commission calculation
//!
//! Rules are keyed by `(operator, transaction_type)` and layered by scope:
//! a user's custom rule wins over the user's scheme, which wins over the
//! global rule. When nothing matches the charge is zero.
//!
//! Charges are rounded to paise with midpoint away from zero.

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::core_types::UserId;
use crate::error::{Result, WalletError};
use crate::money::Money;
use crate::transaction::TransactionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionKind {
    /// `value` is a percent of the amount
    Percentage,
    /// `value` is a flat charge
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    Global,
    Scheme(String),
    User(UserId),
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleScope::Global => write!(f, "global"),
            RuleScope::Scheme(name) => write!(f, "scheme:{}", name),
            RuleScope::User(id) => write!(f, "user:{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionRule {
    pub kind: CommissionKind,
    pub value: Decimal,
    #[serde(default)]
    pub min: Money,
    #[serde(default)]
    pub max: Option<Money>,
}

impl CommissionRule {
    pub fn percentage(value: Decimal, min: Money, max: Option<Money>) -> Self {
        Self {
            kind: CommissionKind::Percentage,
            value,
            min,
            max,
        }
    }

    pub fn fixed(value: Money, min: Money) -> Self {
        Self {
            kind: CommissionKind::Fixed,
            value: value.inner(),
            min,
            max: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.value.is_sign_negative() {
            return Err(WalletError::Validation(
                "commission value cannot be negative".into(),
            ));
        }
        if let Some(max) = self.max
            && max < self.min
        {
            return Err(WalletError::Validation(format!(
                "commission max {} is below min {}",
                max, self.min
            )));
        }
        Ok(())
    }

    /// Charge for `amount` under this rule
    pub fn apply(&self, amount: Money) -> Result<Money> {
        match self.kind {
            CommissionKind::Percentage => {
                let raw = amount.inner() * self.value / Decimal::ONE_HUNDRED;
                let charge = Money::round_from(raw)?.max(self.min);
                Ok(match self.max {
                    Some(max) => charge.min(max),
                    None => charge,
                })
            }
            CommissionKind::Fixed => Ok(Money::round_from(self.value)?.max(self.min)),
        }
    }
}

/// Serializable rule with its scope, used by configuration and the admin API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    pub scope: ScopeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub operator: String,
    pub transaction_type: TransactionType,
    #[serde(flatten)]
    pub rule: CommissionRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Global,
    Scheme,
    User,
}

impl RuleSpec {
    pub fn resolve_scope(&self) -> Result<RuleScope> {
        match self.scope {
            ScopeKind::Global => Ok(RuleScope::Global),
            ScopeKind::Scheme => self
                .scheme
                .as_ref()
                .filter(|s| !s.trim().is_empty())
                .map(|s| RuleScope::Scheme(s.trim().to_string()))
                .ok_or_else(|| WalletError::Validation("scheme scope requires a scheme".into())),
            ScopeKind::User => self
                .user_id
                .map(RuleScope::User)
                .ok_or_else(|| WalletError::Validation("user scope requires a userId".into())),
        }
    }

    fn from_parts(key: &RuleKey, rule: &CommissionRule) -> Self {
        let (scope, scheme, user_id) = match &key.scope {
            RuleScope::Global => (ScopeKind::Global, None, None),
            RuleScope::Scheme(name) => (ScopeKind::Scheme, Some(name.clone()), None),
            RuleScope::User(id) => (ScopeKind::User, None, Some(*id)),
        };
        Self {
            scope,
            scheme,
            user_id,
            operator: key.operator.clone(),
            transaction_type: key.transaction_type,
            rule: rule.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct RuleKey {
    scope: RuleScope,
    /// Lower-cased operator key
    operator: String,
    transaction_type: TransactionType,
}

impl RuleKey {
    fn new(scope: RuleScope, operator: &str, transaction_type: TransactionType) -> Self {
        Self {
            scope,
            operator: normalize_operator(operator),
            transaction_type,
        }
    }
}

fn normalize_operator(operator: &str) -> String {
    operator.trim().to_ascii_lowercase()
}

/// Layered commission engine
#[derive(Default)]
pub struct CommissionEngine {
    rules: DashMap<RuleKey, CommissionRule>,
    /// user -> assigned scheme name
    schemes: DashMap<UserId, String>,
}

impl CommissionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configured default rules
    pub fn with_rules(specs: &[RuleSpec]) -> Result<Self> {
        let engine = Self::new();
        for spec in specs {
            engine.upsert_rule(spec)?;
        }
        info!(count = specs.len(), "Commission rules loaded");
        Ok(engine)
    }

    pub fn upsert_rule(&self, spec: &RuleSpec) -> Result<()> {
        if spec.operator.trim().is_empty() {
            return Err(WalletError::Validation("operator is required".into()));
        }
        spec.rule.validate()?;
        let key = RuleKey::new(spec.resolve_scope()?, &spec.operator, spec.transaction_type);
        debug!(scope = %key.scope, operator = %key.operator, "Commission rule upserted");
        self.rules.insert(key, spec.rule.clone());
        Ok(())
    }

    /// Returns true if a rule was removed
    pub fn remove_rule(
        &self,
        scope: &RuleScope,
        operator: &str,
        transaction_type: TransactionType,
    ) -> bool {
        self.rules
            .remove(&RuleKey::new(scope.clone(), operator, transaction_type))
            .is_some()
    }

    /// Assign (or clear with `None`) a user's scheme
    pub fn assign_scheme(&self, user_id: UserId, scheme: Option<&str>) {
        match scheme.map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => {
                self.schemes.insert(user_id, name.to_string());
            }
            None => {
                self.schemes.remove(&user_id);
            }
        }
    }

    pub fn scheme_of(&self, user_id: UserId) -> Option<String> {
        self.schemes.get(&user_id).map(|s| s.value().clone())
    }

    /// All rules, ordered by scope then operator
    pub fn rules(&self) -> Vec<RuleSpec> {
        let mut entries: Vec<(RuleKey, CommissionRule)> = self
            .rules
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
            .iter()
            .map(|(k, r)| RuleSpec::from_parts(k, r))
            .collect()
    }

    /// Most specific rule for the user
    pub fn resolve(
        &self,
        operator: &str,
        transaction_type: TransactionType,
        user_id: UserId,
    ) -> Option<(RuleScope, CommissionRule)> {
        let mut scopes = vec![RuleScope::User(user_id)];
        if let Some(scheme) = self.scheme_of(user_id) {
            scopes.push(RuleScope::Scheme(scheme));
        }
        scopes.push(RuleScope::Global);

        scopes.into_iter().find_map(|scope| {
            let key = RuleKey::new(scope.clone(), operator, transaction_type);
            self.rules.get(&key).map(|r| (scope, r.value().clone()))
        })
    }

    pub fn compute(
        &self,
        operator: &str,
        transaction_type: TransactionType,
        user_id: UserId,
        amount: Money,
    ) -> Result<Money> {
        match self.resolve(operator, transaction_type, user_id) {
            Some((scope, rule)) => {
                let charge = rule.apply(amount)?;
                debug!(
                    user_id,
                    operator,
                    scope = %scope,
                    amount = %amount,
                    charge = %charge,
                    "Commission computed"
                );
                Ok(charge)
            }
            None => {
                warn!(
                    user_id,
                    operator,
                    transaction_type = %transaction_type,
                    "No commission rule configured, charging zero"
                );
                Ok(Money::ZERO)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn money(s: &str) -> Money {
        Money::parse(s).unwrap()
    }

    fn spec(scope: ScopeKind, operator: &str, rule: CommissionRule) -> RuleSpec {
        RuleSpec {
            scope,
            scheme: None,
            user_id: None,
            operator: operator.to_string(),
            transaction_type: TransactionType::DmtTransfer,
            rule,
        }
    }

    #[test]
    fn test_percentage_clamping() {
        let rule = CommissionRule::percentage(dec!(2), money("5"), Some(money("50")));
        assert_eq!(rule.apply(money("100")).unwrap(), money("5"));
        assert_eq!(rule.apply(money("5000")).unwrap(), money("50"));
        assert_eq!(rule.apply(money("1000")).unwrap(), money("20"));
    }

    #[test]
    fn test_percentage_without_max() {
        let rule = CommissionRule::percentage(dec!(1), Money::ZERO, None);
        assert_eq!(rule.apply(money("100000")).unwrap(), money("1000"));
    }

    #[test]
    fn test_percentage_rounds_half_away_from_zero() {
        let rule = CommissionRule::percentage(dec!(1.5), Money::ZERO, None);
        // 1.5% of 0.99 = 0.01485 -> 0.01
        assert_eq!(rule.apply(money("0.99")).unwrap(), money("0.01"));
        // 1.5% of 1.70 = 0.0255 -> 0.03
        assert_eq!(rule.apply(money("1.70")).unwrap(), money("0.03"));
    }

    #[test]
    fn test_fixed_clamped_to_min() {
        let rule = CommissionRule::fixed(money("3"), money("5"));
        assert_eq!(rule.apply(money("100")).unwrap(), money("5"));
        let rule = CommissionRule::fixed(money("10"), money("5"));
        assert_eq!(rule.apply(money("100")).unwrap(), money("10"));
    }

    #[test]
    fn test_resolution_precedence() {
        let engine = CommissionEngine::new();
        engine
            .upsert_rule(&spec(
                ScopeKind::Global,
                "IMPS",
                CommissionRule::fixed(money("10"), Money::ZERO),
            ))
            .unwrap();
        let mut gold = spec(
            ScopeKind::Scheme,
            "IMPS",
            CommissionRule::fixed(money("7"), Money::ZERO),
        );
        gold.scheme = Some("gold".into());
        engine.upsert_rule(&gold).unwrap();
        let mut custom = spec(
            ScopeKind::User,
            "IMPS",
            CommissionRule::fixed(money("3"), Money::ZERO),
        );
        custom.user_id = Some(1);
        engine.upsert_rule(&custom).unwrap();

        engine.assign_scheme(1, Some("gold"));
        engine.assign_scheme(2, Some("gold"));

        let dmt = TransactionType::DmtTransfer;
        assert_eq!(engine.compute("IMPS", dmt, 1, money("100")).unwrap(), money("3"));
        assert_eq!(engine.compute("IMPS", dmt, 2, money("100")).unwrap(), money("7"));
        assert_eq!(engine.compute("IMPS", dmt, 3, money("100")).unwrap(), money("10"));

        engine.assign_scheme(2, None);
        assert_eq!(engine.compute("IMPS", dmt, 2, money("100")).unwrap(), money("10"));
    }

    #[test]
    fn test_unknown_operator_is_free() {
        let engine = CommissionEngine::new();
        let charge = engine
            .compute("NOBODY", TransactionType::MobileRecharge, 1, money("100"))
            .unwrap();
        assert_eq!(charge, Money::ZERO);
    }

    #[test]
    fn test_operator_case_insensitive() {
        let engine = CommissionEngine::new();
        engine
            .upsert_rule(&spec(
                ScopeKind::Global,
                "imps",
                CommissionRule::fixed(money("5"), Money::ZERO),
            ))
            .unwrap();
        let charge = engine
            .compute(" IMPS ", TransactionType::DmtTransfer, 1, money("100"))
            .unwrap();
        assert_eq!(charge, money("5"));
    }

    #[test]
    fn test_invalid_rules_rejected() {
        let engine = CommissionEngine::new();
        let bad = spec(
            ScopeKind::Global,
            "IMPS",
            CommissionRule::percentage(dec!(2), money("50"), Some(money("5"))),
        );
        assert!(engine.upsert_rule(&bad).is_err());
        let no_scheme = spec(
            ScopeKind::Scheme,
            "IMPS",
            CommissionRule::fixed(money("1"), Money::ZERO),
        );
        assert!(engine.upsert_rule(&no_scheme).is_err());
    }

    #[test]
    fn test_remove_and_list() {
        let engine = CommissionEngine::new();
        engine
            .upsert_rule(&spec(
                ScopeKind::Global,
                "NEFT",
                CommissionRule::fixed(money("2"), Money::ZERO),
            ))
            .unwrap();
        assert_eq!(engine.rules().len(), 1);
        assert_eq!(engine.rules()[0].operator, "neft");
        assert!(engine.remove_rule(&RuleScope::Global, "NEFT", TransactionType::DmtTransfer));
        assert!(engine.rules().is_empty());
    }

    #[test]
    fn test_rule_spec_deserializes_from_yaml() {
        let yaml = r#"
scope: scheme
scheme: gold
operator: IMPS
transactionType: dmt-transfer
kind: percentage
value: "2"
min: "5.00"
max: "50.00"
"#;
        let spec: RuleSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.resolve_scope().unwrap(), RuleScope::Scheme("gold".into()));
        assert_eq!(spec.rule.max, Some(money("50")));
    }
}

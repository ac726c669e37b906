//! Access guard
//!
//! Pure decision over who is calling, what they are calling and from where.
//! The gateway evaluates it in middleware before any handler runs.

use serde::{Deserialize, Serialize};

use crate::core_types::UserId;
use crate::error::WalletError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// Route families with distinct requirements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Public,
    User,
    Dmt,
    Admin,
}

impl RouteClass {
    /// Classify a path below the API prefix
    pub fn of_path(path: &str) -> Self {
        let path = path.trim_start_matches('/');
        if path.is_empty() || path == "health" {
            RouteClass::Public
        } else if path.starts_with("admin") {
            RouteClass::Admin
        } else if path.starts_with("dmt") {
            RouteClass::Dmt
        } else {
            RouteClass::User
        }
    }
}

/// Device location as reported by the client
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoLocation {
    /// Parse `"lat,lng"`; out-of-range values are rejected
    pub fn parse(raw: &str) -> Option<Self> {
        let (lat, lng) = raw.split_once(',')?;
        let latitude: f64 = lat.trim().parse().ok()?;
        let longitude: f64 = lng.trim().parse().ok()?;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return None;
        }
        Some(Self {
            latitude,
            longitude,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccessContext {
    pub user_id: Option<UserId>,
    pub role: Option<Role>,
    pub route: RouteClass,
    pub location: Option<GeoLocation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessPolicy {
    pub require_location_for_dmt: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Unauthenticated,
    AdminRequired,
    LocationRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }

    pub fn into_result(self) -> Result<(), WalletError> {
        match self {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Deny(DenyReason::Unauthenticated) => Err(WalletError::Unauthorized),
            AccessDecision::Deny(DenyReason::AdminRequired) => Err(WalletError::Forbidden),
            AccessDecision::Deny(DenyReason::LocationRequired) => Err(WalletError::AccessDenied(
                "location is required for money transfer".into(),
            )),
        }
    }
}

pub fn evaluate(ctx: &AccessContext, policy: &AccessPolicy) -> AccessDecision {
    if ctx.route == RouteClass::Public {
        return AccessDecision::Allow;
    }
    if ctx.user_id.is_none() || ctx.role.is_none() {
        return AccessDecision::Deny(DenyReason::Unauthenticated);
    }
    match ctx.route {
        RouteClass::Admin if ctx.role != Some(Role::Admin) => {
            AccessDecision::Deny(DenyReason::AdminRequired)
        }
        RouteClass::Dmt if policy.require_location_for_dmt && ctx.location.is_none() => {
            AccessDecision::Deny(DenyReason::LocationRequired)
        }
        _ => AccessDecision::Allow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(route: RouteClass, role: Option<Role>, location: Option<GeoLocation>) -> AccessContext {
        AccessContext {
            user_id: role.map(|_| 1),
            role,
            route,
            location,
        }
    }

    const STRICT: AccessPolicy = AccessPolicy {
        require_location_for_dmt: true,
    };

    #[test]
    fn test_public_routes_need_nothing() {
        assert!(evaluate(&ctx(RouteClass::Public, None, None), &STRICT).is_allowed());
    }

    #[test]
    fn test_unauthenticated_denied() {
        assert_eq!(
            evaluate(&ctx(RouteClass::User, None, None), &STRICT),
            AccessDecision::Deny(DenyReason::Unauthenticated)
        );
    }

    #[test]
    fn test_admin_routes_need_admin_role() {
        assert_eq!(
            evaluate(&ctx(RouteClass::Admin, Some(Role::User), None), &STRICT),
            AccessDecision::Deny(DenyReason::AdminRequired)
        );
        assert!(evaluate(&ctx(RouteClass::Admin, Some(Role::Admin), None), &STRICT).is_allowed());
    }

    #[test]
    fn test_dmt_location_gate() {
        let here = GeoLocation::parse("12.97,77.59");
        assert_eq!(
            evaluate(&ctx(RouteClass::Dmt, Some(Role::User), None), &STRICT),
            AccessDecision::Deny(DenyReason::LocationRequired)
        );
        assert!(evaluate(&ctx(RouteClass::Dmt, Some(Role::User), here), &STRICT).is_allowed());
        assert!(
            evaluate(
                &ctx(RouteClass::Dmt, Some(Role::User), None),
                &AccessPolicy::default()
            )
            .is_allowed()
        );
    }

    #[test]
    fn test_route_classification() {
        assert_eq!(RouteClass::of_path("/health"), RouteClass::Public);
        assert_eq!(RouteClass::of_path("/admin/transactions/x"), RouteClass::Admin);
        assert_eq!(RouteClass::of_path("/admin/dmt/transactions/bulk-check-status"), RouteClass::Admin);
        assert_eq!(RouteClass::of_path("/dmt/kyc"), RouteClass::Dmt);
        assert_eq!(RouteClass::of_path("/wallet/balance"), RouteClass::User);
    }

    #[test]
    fn test_location_parse() {
        assert!(GeoLocation::parse("12.97, 77.59").is_some());
        assert!(GeoLocation::parse("91,0").is_none());
        assert!(GeoLocation::parse("abc").is_none());
    }

    #[test]
    fn test_denials_map_to_errors() {
        assert_eq!(
            AccessDecision::Deny(DenyReason::LocationRequired)
                .into_result()
                .unwrap_err()
                .code(),
            "ACCESS_DENIED"
        );
        assert_eq!(
            AccessDecision::Deny(DenyReason::AdminRequired).into_result(),
            Err(WalletError::Forbidden)
        );
    }
}

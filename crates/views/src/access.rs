//! Route access guard.

use std::fmt;
use std::str::FromStr;

use common::Error;
use screener_client::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Login,
    Register,
    Dashboard,
    Screener,
    SavedScreens,
    Options,
    Admin,
}

impl Route {
    pub const ALL: [Route; 7] = [
        Route::Login,
        Route::Register,
        Route::Dashboard,
        Route::Screener,
        Route::SavedScreens,
        Route::Options,
        Route::Admin,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::Register => "/register",
            Route::Dashboard => "/",
            Route::Screener => "/screener",
            Route::SavedScreens => "/screens",
            Route::Options => "/options",
            Route::Admin => "/admin",
        }
    }

    /// Reachable without a session.
    pub fn is_public(&self) -> bool {
        matches!(self, Route::Login | Route::Register)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl FromStr for Route {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        let wanted = if wanted.len() > 1 {
            wanted.trim_end_matches('/')
        } else {
            wanted
        };
        Route::ALL
            .into_iter()
            .find(|r| r.path() == wanted)
            .ok_or_else(|| Error::Other(format!("unknown route: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    Redirect(Route),
}

/// Decide whether `session` may see `route`.
///
/// Private routes send anyone unauthenticated to `Login`. `Admin` also needs
/// a privileged identity; everyone else is sent to the dashboard.
pub fn authorize(route: Route, session: &Session) -> Access {
    if route.is_public() {
        return Access::Allow;
    }
    if !session.is_authenticated() {
        return Access::Redirect(Route::Login);
    }
    if route == Route::Admin && !session.is_privileged() {
        return Access::Redirect(Route::Dashboard);
    }
    Access::Allow
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Credential, Identity, SubscriptionStatus, SubscriptionTier};
    use screener_client::SessionStatus;

    fn signed_in(privileged: bool) -> Session {
        Session {
            user: Some(Identity {
                id: 1,
                email: "trader@x.com".into(),
                display_name: None,
                is_privileged: privileged,
                tier: SubscriptionTier::Free,
                tier_status: SubscriptionStatus::Active,
            }),
            token: Some(Credential::new("tok")),
            status: SessionStatus::Authenticated,
        }
    }

    #[test]
    fn test_unauthenticated_private_routes_redirect_to_login() {
        let session = Session::default();
        for route in Route::ALL {
            let expected = if route.is_public() {
                Access::Allow
            } else {
                Access::Redirect(Route::Login)
            };
            assert_eq!(authorize(route, &session), expected, "{route}");
        }
    }

    #[test]
    fn test_admin_requires_privilege() {
        let regular = signed_in(false);
        assert_eq!(authorize(Route::Admin, &regular), Access::Redirect(Route::Dashboard));
        assert_eq!(authorize(Route::Screener, &regular), Access::Allow);

        let admin = signed_in(true);
        assert_eq!(authorize(Route::Admin, &admin), Access::Allow);
    }

    #[test]
    fn test_authenticating_is_not_authenticated() {
        let session = Session {
            status: SessionStatus::Authenticating,
            ..Session::default()
        };
        assert_eq!(authorize(Route::Dashboard, &session), Access::Redirect(Route::Login));
    }

    #[test]
    fn test_parse_route() {
        assert_eq!("/".parse::<Route>().ok(), Some(Route::Dashboard));
        assert_eq!("/screens/".parse::<Route>().ok(), Some(Route::SavedScreens));
        assert!("/billing".parse::<Route>().is_err());
    }
}

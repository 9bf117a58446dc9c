//! Routes, navigation requests and the guard for protected views.

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::session::{Session, SessionStore};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    Login,
    Register,
    NewsDetail(String),
    NewsCreate,
    NewsEdit(String),
    Profile,
}

impl Route {
    /// Parse an application path such as `/news/edit/42`
    pub fn parse(path: &str) -> Option<Route> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            [] => Some(Route::Home),
            ["login"] => Some(Route::Login),
            ["register"] => Some(Route::Register),
            ["profile"] => Some(Route::Profile),
            ["news", "create"] => Some(Route::NewsCreate),
            ["news", "edit", id] => Some(Route::NewsEdit(id.to_string())),
            ["news", id] => Some(Route::NewsDetail(id.to_string())),
            _ => None,
        }
    }

    /// Routes that require a signed-in user
    pub fn is_protected(&self) -> bool {
        matches!(self, Route::NewsCreate | Route::NewsEdit(_) | Route::Profile)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Home => write!(f, "/"),
            Route::Login => write!(f, "/login"),
            Route::Register => write!(f, "/register"),
            Route::NewsDetail(id) => write!(f, "/news/{}", id),
            Route::NewsCreate => write!(f, "/news/create"),
            Route::NewsEdit(id) => write!(f, "/news/edit/{}", id),
            Route::Profile => write!(f, "/profile"),
        }
    }
}

/// Sends navigation requests to whoever drives the views
#[derive(Debug, Clone)]
pub struct Navigator {
    tx: mpsc::UnboundedSender<Route>,
}

impl Navigator {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Route>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn navigate(&self, route: Route) {
        debug!("Navigation requested: {}", route);
        if self.tx.send(route).is_err() {
            debug!("No view listening for navigation");
        }
    }
}

/// Outcome of a guard check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Allow,
    /// Startup verification has not finished yet
    Defer,
    Redirect(Route),
}

impl Access {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Access::Allow)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Access to {route} requires signing in")]
pub struct AccessDenied {
    pub route: Route,
}

pub struct RouteGuard;

impl RouteGuard {
    /// Decide synchronously from the given session value
    pub fn check(session: &Session, route: &Route) -> Access {
        if !route.is_protected() {
            return Access::Allow;
        }
        if !session.is_bootstrapped() {
            return Access::Defer;
        }
        if session.is_authenticated() {
            Access::Allow
        } else {
            Access::Redirect(Route::Login)
        }
    }

    /// Wait for startup verification, then decide. Redirects are sent to the navigator.
    pub async fn resolve(store: &SessionStore, route: &Route) -> Access {
        let mut updates = store.subscribe();
        let session = match updates.wait_for(Session::is_bootstrapped).await {
            Ok(session) => session.clone(),
            Err(_) => store.snapshot(),
        };

        let access = Self::check(&session, route);
        if let Access::Redirect(target) = &access {
            info!("Access to {} denied, redirecting to {}", route, target);
            store.navigator().navigate(target.clone());
        }
        access
    }

    /// Resolve and turn anything but `Allow` into an error
    pub async fn require(store: &SessionStore, route: &Route) -> Result<(), AccessDenied> {
        match Self::resolve(store, route).await {
            Access::Allow => Ok(()),
            _ => Err(AccessDenied {
                route: route.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::User;

    fn user() -> User {
        User {
            id: "u1".into(),
            email: "ann@example.com".into(),
            name: "Ann".into(),
        }
    }

    #[test]
    fn parses_application_paths() {
        assert_eq!(Route::parse("/"), Some(Route::Home));
        assert_eq!(Route::parse(""), Some(Route::Home));
        assert_eq!(Route::parse("/login"), Some(Route::Login));
        assert_eq!(Route::parse("/news/create"), Some(Route::NewsCreate));
        assert_eq!(Route::parse("/news/42"), Some(Route::NewsDetail("42".into())));
        assert_eq!(Route::parse("/news/edit/42/"), Some(Route::NewsEdit("42".into())));
        assert_eq!(Route::parse("/profile?tab=1"), Some(Route::Profile));
        assert_eq!(Route::parse("/admin"), None);
    }

    #[test]
    fn display_round_trips_through_parse() {
        for route in [
            Route::Home,
            Route::Register,
            Route::NewsDetail("7".into()),
            Route::NewsEdit("7".into()),
            Route::Profile,
        ] {
            assert_eq!(Route::parse(&route.to_string()), Some(route));
        }
    }

    #[test]
    fn public_routes_always_allowed() {
        for session in [Session::default(), Session::verifying(), Session::anonymous()] {
            assert_eq!(RouteGuard::check(&session, &Route::Home), Access::Allow);
            assert_eq!(
                RouteGuard::check(&session, &Route::NewsDetail("1".into())),
                Access::Allow
            );
        }
    }

    #[test]
    fn protected_routes_need_authentication() {
        let route = Route::NewsCreate;
        assert_eq!(RouteGuard::check(&Session::default(), &route), Access::Defer);
        assert_eq!(RouteGuard::check(&Session::verifying(), &route), Access::Defer);
        assert_eq!(
            RouteGuard::check(&Session::anonymous(), &route),
            Access::Redirect(Route::Login)
        );
        assert!(RouteGuard::check(&Session::authenticated(user()), &route).is_allowed());
    }

    #[test]
    fn edit_and_profile_are_protected() {
        assert!(Route::NewsEdit("1".into()).is_protected());
        assert!(Route::Profile.is_protected());
        assert!(!Route::Login.is_protected());
    }

    #[tokio::test]
    async fn navigator_delivers_in_order() {
        let (navigator, mut rx) = Navigator::channel();
        navigator.navigate(Route::Home);
        navigator.navigate(Route::Login);
        assert_eq!(rx.recv().await, Some(Route::Home));
        assert_eq!(rx.recv().await, Some(Route::Login));
    }
}

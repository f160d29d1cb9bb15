use crate::session::SessionSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    About,
    SignIn,
    SignUp,
    Profile,
}

impl Route {
    pub fn path(self) -> &'static str {
        match self {
            Self::Home => "/",
            Self::About => "/about",
            Self::SignIn => "/sign-in",
            Self::SignUp => "/sign-up",
            Self::Profile => "/profile",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        let trimmed = path.trim_end_matches('/');
        match trimmed {
            "" => Some(Self::Home),
            "/about" => Some(Self::About),
            "/sign-in" => Some(Self::SignIn),
            "/sign-up" => Some(Self::SignUp),
            "/profile" => Some(Self::Profile),
            _ => None,
        }
    }

    pub fn is_protected(self) -> bool {
        matches!(self, Self::Profile)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    Redirect(Route),
}

/// Stateless; evaluate again on every navigation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteGuard;

impl RouteGuard {
    pub fn permits(snapshot: &SessionSnapshot) -> bool {
        snapshot.current_user.is_some()
    }

    pub fn check(&self, route: Route, snapshot: &SessionSnapshot) -> RouteDecision {
        if !route.is_protected() || Self::permits(snapshot) {
            RouteDecision::Allow
        } else {
            RouteDecision::Redirect(Route::SignIn)
        }
    }
}

//! Per-page access policy.

use multidb_common::Role;
use tokio::sync::watch;

use crate::session::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Login,
    Register,
    Dashboard,
    Instances,
    CreateInstance,
    AssignInstance,
    Users,
    Queries,
}

impl Route {
    /// Roles allowed to see the page. Empty means any signed-in user.
    pub fn allowed_roles(&self) -> &'static [Role] {
        match self {
            Self::CreateInstance | Self::AssignInstance | Self::Users => &[Role::Admin],
            _ => &[],
        }
    }

    pub fn is_protected(&self) -> bool {
        !matches!(self, Self::Login | Self::Register)
    }

    /// The command a terminal user runs to reach this page.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Login => "multidb login",
            Self::Register => "multidb register",
            Self::Dashboard => "multidb whoami",
            Self::Instances => "multidb instances list",
            Self::CreateInstance => "multidb instances create",
            Self::AssignInstance => "multidb instances assign",
            Self::Users => "multidb users",
            Self::Queries => "multidb query",
        }
    }

    /// Where a settled session lands.
    pub fn landing_for(state: &SessionState) -> Option<Self> {
        match state {
            SessionState::Unknown => None,
            SessionState::Authenticated(_) => Some(Self::Dashboard),
            SessionState::Anonymous => Some(Self::Login),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session still resolving; show a placeholder and do nothing else.
    Wait,
    Redirect(Route),
    Render,
}

pub fn evaluate(
    is_loading: bool,
    is_authenticated: bool,
    role: Option<Role>,
    allowed_roles: &[Role],
) -> GuardDecision {
    if is_loading {
        return GuardDecision::Wait;
    }
    if !is_authenticated {
        return GuardDecision::Redirect(Route::Login);
    }
    if !allowed_roles.is_empty() && !role.is_some_and(|r| allowed_roles.contains(&r)) {
        return GuardDecision::Redirect(Route::Dashboard);
    }
    GuardDecision::Render
}

pub fn evaluate_route(state: &SessionState, route: Route) -> GuardDecision {
    if !route.is_protected() {
        return GuardDecision::Render;
    }
    evaluate(
        state.is_loading(),
        state.is_authenticated(),
        state.role(),
        route.allowed_roles(),
    )
}

/// Re-evaluates on every session change until the decision is no longer `Wait`.
pub async fn resolve(rx: &mut watch::Receiver<SessionState>, route: Route) -> GuardDecision {
    loop {
        let decision = evaluate_route(&rx.borrow_and_update(), route);
        if decision != GuardDecision::Wait {
            return decision;
        }
        if rx.changed().await.is_err() {
            return GuardDecision::Redirect(Route::Login);
        }
    }
}

use crate::error::CrmError;
use crm_schema::{Organization, User};
use parking_lot::RwLock;

/// Signed-in user, organization and bearer token.
///
/// Injected into backends instead of living in ambient global state.
#[derive(Debug, Default)]
pub struct Session {
    inner: RwLock<SessionState>,
}

#[derive(Clone, Debug, Default)]
struct SessionState {
    token: Option<String>,
    user: Option<User>,
    organization: Option<Organization>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let session = Self::default();
        session.sign_in(token, None, None);
        session
    }

    pub fn sign_in(
        &self,
        token: impl Into<String>,
        user: Option<User>,
        organization: Option<Organization>,
    ) {
        let token = token.into();
        let mut state = self.inner.write();
        state.token = if token.trim().is_empty() {
            None
        } else {
            Some(token)
        };
        state.user = user;
        state.organization = organization;
    }

    pub fn sign_out(&self) {
        *self.inner.write() = SessionState::default();
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.read().token.is_some()
    }

    /// The bearer token, or `NotAuthenticated` before any request goes out.
    pub fn require_token(&self) -> Result<String, CrmError> {
        self.inner
            .read()
            .token
            .clone()
            .ok_or(CrmError::NotAuthenticated)
    }

    pub fn user(&self) -> Option<User> {
        self.inner.read().user.clone()
    }

    pub fn organization(&self) -> Option<Organization> {
        self.inner.read().organization.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_session_has_no_token() {
        let session = Session::anonymous();
        assert!(matches!(
            session.require_token(),
            Err(CrmError::NotAuthenticated)
        ));
    }

    #[test]
    fn blank_token_does_not_authenticate() {
        let session = Session::with_token("   ");
        assert!(!session.is_authenticated());
    }

    #[test]
    fn sign_out_clears_everything() {
        let session = Session::anonymous();
        session.sign_in(
            "tok",
            Some(User {
                id: "u-1".into(),
                name: "Ada".into(),
                email: "ada@example.com".into(),
            }),
            None,
        );
        assert_eq!(session.require_token().expect("token"), "tok");
        session.sign_out();
        assert!(session.user().is_none());
        assert!(!session.is_authenticated());
    }
}

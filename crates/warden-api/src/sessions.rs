use tracing::debug;

use warden_types::{Request, Response, ResponseCode, keys};

use crate::{AppState, internal_error, session_of};

/// Always succeeds: logging out twice, or with an unknown session, is fine.
pub fn logout(state: &AppState, req: &Request) -> Response {
    let sid = req.field(keys::SESSION_ID).unwrap_or_default();
    if !sid.is_empty() {
        state.repo.delete_session(sid);
    }
    debug!(request_id = %req.id, "logged out session {}", sid);
    Response::reply(req, ResponseCode::LogoutOk, format!("Logged out session: {}", sid))
}

/// Profile of the session owner, for the landing page.
pub fn home(state: &AppState, req: &Request) -> Response {
    let Some(session) = session_of(state, req) else {
        return Response::reply(req, ResponseCode::HomeFailed, "session expired or unknown");
    };

    match state.repo.get_user(&session.username) {
        Ok(Some(user)) => Response::reply(
            req,
            ResponseCode::HomeOk,
            format!("User {} found", user.username),
        )
        .with(keys::USERNAME, user.username)
        .with(keys::NICKNAME, user.nickname)
        .with(keys::PROFILE_PICTURE_REF, user.profile_picture_ref),
        Ok(None) => Response::reply(
            req,
            ResponseCode::HomeFailed,
            format!("No such user: {}", session.username),
        ),
        Err(e) => internal_error(req, e),
    }
}

pub fn get_session(state: &AppState, req: &Request) -> Response {
    let Some(session) = session_of(state, req) else {
        return Response::reply(req, ResponseCode::GetSessionFailed, "session expired or unknown");
    };

    match state.repo.get_user(&session.username) {
        Ok(Some(user)) => Response::reply(req, ResponseCode::GetSessionOk, "Success")
            .with(keys::SESSION_ID, session.session_id)
            .with(keys::USERNAME, user.username)
            .with(keys::NICKNAME, user.nickname)
            .with(keys::PROFILE_PICTURE_REF, user.profile_picture_ref),
        Ok(None) => Response::reply(
            req,
            ResponseCode::GetSessionFailed,
            format!("No such user: {}", session.username),
        ),
        Err(e) => internal_error(req, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{logged_in, state};
    use warden_types::RequestType;

    #[test]
    fn home_returns_profile() {
        let state = state();
        let sid = logged_in(&state, "bob", "secret");

        let req = Request::new(RequestType::Home, "h1").with(keys::SESSION_ID, sid);
        let res = home(&state, &req);
        assert_eq!(res.code, ResponseCode::HomeOk);
        assert_eq!(res.field(keys::USERNAME), Some("bob"));
        assert_eq!(res.field(keys::NICKNAME), Some("bob"));
        assert_eq!(res.field(keys::PROFILE_PICTURE_REF), Some(""));
        assert!(res.field(keys::PASSWORD_HASH).is_none());
    }

    #[test]
    fn home_without_session_fails() {
        let state = state();
        let res = home(&state, &Request::new(RequestType::Home, "h2"));
        assert_eq!(res.code, ResponseCode::HomeFailed);
        assert!(res.data.is_empty());
    }

    #[test]
    fn logout_then_get_session_fails() {
        let state = state();
        let sid = logged_in(&state, "bob", "secret");

        let get = Request::new(RequestType::GetSession, "g1").with(keys::SESSION_ID, sid.clone());
        let res = get_session(&state, &get);
        assert_eq!(res.code, ResponseCode::GetSessionOk);
        assert_eq!(res.field(keys::SESSION_ID), Some(sid.as_str()));

        let out = Request::new(RequestType::Logout, "l1").with(keys::SESSION_ID, sid.clone());
        assert_eq!(logout(&state, &out).code, ResponseCode::LogoutOk);
        assert_eq!(logout(&state, &out).code, ResponseCode::LogoutOk);

        assert_eq!(get_session(&state, &get).code, ResponseCode::GetSessionFailed);
    }
}

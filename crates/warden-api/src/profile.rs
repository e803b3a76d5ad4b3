use tracing::debug;

use warden_types::{Request, Response, ResponseCode, keys};

use crate::{AppState, internal_error, session_of};

/// Edit nickname and/or profile picture of the session owner. A field left
/// out keeps its current value.
pub fn edit(state: &AppState, req: &Request) -> Response {
    let Some(session) = session_of(state, req) else {
        return Response::reply(req, ResponseCode::EditFailed, "not logged in");
    };

    if let Some(username) = req.field(keys::USERNAME) {
        if username != session.username {
            return Response::reply(
                req,
                ResponseCode::EditFailed,
                format!("Session does not belong to {}", username),
            );
        }
    }

    let current = match state.repo.get_user(&session.username) {
        Ok(Some(user)) => user,
        Ok(None) => {
            return Response::reply(
                req,
                ResponseCode::EditFailed,
                format!("No such user: {}", session.username),
            );
        }
        Err(e) => return internal_error(req, e),
    };

    let nickname = req.field(keys::NICKNAME).unwrap_or(&current.nickname);
    let picture = req
        .field(keys::PROFILE_PICTURE_REF)
        .unwrap_or(&current.profile_picture_ref);

    match state.repo.update_user(&session.username, nickname, picture) {
        Ok(1) => {
            debug!(request_id = %req.id, "edited {}", session.username);
            Response::reply(
                req,
                ResponseCode::EditOk,
                format!("Edited {} successfully", session.username),
            )
        }
        Ok(_) => Response::reply(
            req,
            ResponseCode::EditFailed,
            format!("Editing {} failed", session.username),
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
    fn edit_is_visible_on_next_read() {
        let state = state();
        let sid = logged_in(&state, "dave", "pw");

        let req = Request::new(RequestType::Edit, "e1")
            .with(keys::SESSION_ID, sid)
            .with(keys::USERNAME, "dave")
            .with(keys::NICKNAME, "newnick")
            .with(keys::PROFILE_PICTURE_REF, "pic2");
        assert_eq!(edit(&state, &req).code, ResponseCode::EditOk);

        let dave = state.repo.get_user("dave").unwrap().unwrap();
        assert_eq!(dave.nickname, "newnick");
        assert_eq!(dave.profile_picture_ref, "pic2");
    }

    #[test]
    fn missing_fields_keep_current_values() {
        let state = state();
        let sid = logged_in(&state, "dave", "pw");

        let req = Request::new(RequestType::Edit, "e2")
            .with(keys::SESSION_ID, sid)
            .with(keys::PROFILE_PICTURE_REF, "/images/dave.jpg");
        assert_eq!(edit(&state, &req).code, ResponseCode::EditOk);

        let dave = state.repo.get_user("dave").unwrap().unwrap();
        assert_eq!(dave.nickname, "dave");
        assert_eq!(dave.profile_picture_ref, "/images/dave.jpg");
    }

    #[test]
    fn cannot_edit_someone_else() {
        let state = state();
        let sid = logged_in(&state, "dave", "pw");
        logged_in(&state, "erin", "pw");

        let req = Request::new(RequestType::Edit, "e3")
            .with(keys::SESSION_ID, sid)
            .with(keys::USERNAME, "erin")
            .with(keys::NICKNAME, "pwned");
        assert_eq!(edit(&state, &req).code, ResponseCode::EditFailed);
        assert_eq!(state.repo.get_user("erin").unwrap().unwrap().nickname, "erin");
    }

    #[test]
    fn edit_without_session_fails() {
        let state = state();
        let req = Request::new(RequestType::Edit, "e4").with(keys::NICKNAME, "x");
        assert_eq!(edit(&state, &req).code, ResponseCode::EditFailed);
    }
}

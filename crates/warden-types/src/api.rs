use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// -- Field keys --

/// Keys used in `Request::data` and `Response::data`.
pub mod keys {
    pub const USERNAME: &str = "username";
    pub const NICKNAME: &str = "nickname";
    /// Request-only. Never stored, never logged.
    pub const PASSWORD_PLAIN: &str = "password_plain";
    pub const PASSWORD_HASH: &str = "password_hash";
    pub const PROFILE_PICTURE_REF: &str = "profile_picture_ref";
    pub const SESSION_ID: &str = "session_id";
}

// -- Request --

/// The closed set of operations the back-end understands.
///
/// Tags the back-end does not know decode to `Unknown` so the dispatcher can
/// answer them instead of dropping the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    Login,
    Register,
    Edit,
    Logout,
    Home,
    GetSession,
    ChangePassword,
    #[serde(other)]
    Unknown,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "LOGIN",
            Self::Register => "REGISTER",
            Self::Edit => "EDIT",
            Self::Logout => "LOGOUT",
            Self::Home => "HOME",
            Self::GetSession => "GET_SESSION",
            Self::ChangePassword => "CHANGE_PASSWORD",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, echoed by the response.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RequestType,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl Request {
    pub fn new(kind: RequestType, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            data: HashMap::new(),
        }
    }

    /// Builder-style setter for a data field.
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Returns the field if present and non-empty.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

// Plaintext passwords must not end up in logs through `{:?}`.
impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data: HashMap<&str, &str> = self
            .data
            .iter()
            .map(|(k, v)| {
                if k == keys::PASSWORD_PLAIN {
                    (k.as_str(), "<redacted>")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect();
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("data", &data)
            .finish()
    }
}

// -- Response --

/// Outcome codes. Serialized as plain integers on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ResponseCode {
    LoginOk,
    LoginFailed,
    EditOk,
    EditFailed,
    LogoutOk,
    InsertOk,
    InsertFailed,
    HomeOk,
    HomeFailed,
    GetSessionOk,
    GetSessionFailed,
    PasswordOk,
    PasswordFailed,
    UnknownRequest,
    InternalError,
}

impl ResponseCode {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::LoginOk => 10,
            Self::LoginFailed => 11,
            Self::EditOk => 20,
            Self::EditFailed => 21,
            Self::LogoutOk => 30,
            Self::InsertOk => 40,
            Self::InsertFailed => 41,
            Self::HomeOk => 50,
            Self::HomeFailed => 51,
            Self::GetSessionOk => 60,
            Self::GetSessionFailed => 61,
            Self::PasswordOk => 70,
            Self::PasswordFailed => 71,
            Self::UnknownRequest => 400,
            Self::InternalError => 500,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::LoginOk
                | Self::EditOk
                | Self::LogoutOk
                | Self::InsertOk
                | Self::HomeOk
                | Self::GetSessionOk
                | Self::PasswordOk
        )
    }
}

impl From<ResponseCode> for i32 {
    fn from(code: ResponseCode) -> Self {
        code.as_i32()
    }
}

/// An integer that is not one of the known response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownCode(pub i32);

impl fmt::Display for UnknownCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown response code {}", self.0)
    }
}

impl TryFrom<i32> for ResponseCode {
    type Error = UnknownCode;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        let code = match value {
            10 => Self::LoginOk,
            11 => Self::LoginFailed,
            20 => Self::EditOk,
            21 => Self::EditFailed,
            30 => Self::LogoutOk,
            40 => Self::InsertOk,
            41 => Self::InsertFailed,
            50 => Self::HomeOk,
            51 => Self::HomeFailed,
            60 => Self::GetSessionOk,
            61 => Self::GetSessionFailed,
            70 => Self::PasswordOk,
            71 => Self::PasswordFailed,
            400 => Self::UnknownRequest,
            500 => Self::InternalError,
            other => return Err(UnknownCode(other)),
        };
        Ok(code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Echo of `Request::id`.
    pub id: String,
    pub code: ResponseCode,
    pub description: String,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl Response {
    /// A response answering `req` with an empty data map.
    pub fn reply(req: &Request, code: ResponseCode, description: impl Into<String>) -> Self {
        Self {
            id: req.id.clone(),
            code,
            description: description.into(),
            data: HashMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }
}

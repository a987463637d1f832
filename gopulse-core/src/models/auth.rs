use serde::Deserialize;

/// Login form fields for `POST /account/login`.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub remember_me: bool,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            remember_me: false,
        }
    }

    pub fn remember_me(mut self, remember_me: bool) -> Self {
        self.remember_me = remember_me;
        self
    }

    pub(crate) fn form(&self) -> [(&'static str, &str); 3] {
        [
            ("username", self.username.as_str()),
            ("passwd", self.password.as_str()),
            ("remember_me", if self.remember_me { "1" } else { "0" }),
        ]
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("remember_me", &self.remember_me)
            .finish()
    }
}

/// Payload of `GET /user/current`. Only the fields the realtime core uses.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CurrentUser {
    pub uid: i64,
    pub username: String,
    pub name: String,
    pub is_root: bool,
    pub msgnum: Option<i64>,
}

use serde::Serialize;
use std::num::NonZeroU64;

use crate::models::auth::CurrentUser;
use crate::utils::coerce::clamp_count;

/// The signed-in user as far as the realtime core cares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: NonZeroU64,
    pub display_name: String,
    pub unread_count: u64,
    pub is_admin: bool,
}

impl Identity {
    pub fn new(id: NonZeroU64, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            unread_count: 0,
            is_admin: false,
        }
    }

    pub fn with_unread(mut self, unread_count: u64) -> Self {
        self.unread_count = unread_count;
        self
    }

    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    /// A user record with `uid <= 0` is the anonymous user and yields `None`.
    pub fn from_current(user: CurrentUser) -> Option<Self> {
        let id = u64::try_from(user.uid).ok().and_then(NonZeroU64::new)?;
        let display_name = if user.name.trim().is_empty() {
            user.username
        } else {
            user.name
        };
        Some(Self {
            id,
            display_name,
            unread_count: clamp_count(user.msgnum),
            is_admin: user.is_root,
        })
    }
}

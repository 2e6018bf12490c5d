use crate::tryon::types::UserProfile;

/// Holds at most one profile for the session. Replacement is wholesale and
/// unvalidated; completeness is checked at submission time.
#[derive(Debug, Default)]
pub struct ProfileStore {
    current: Option<UserProfile>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, profile: UserProfile) {
        self.current = Some(profile);
    }

    pub fn get(&self) -> Option<&UserProfile> {
        self.current.as_ref()
    }

    pub fn clear(&mut self) -> Option<UserProfile> {
        self.current.take()
    }
}

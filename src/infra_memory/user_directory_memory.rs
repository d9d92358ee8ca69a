use crate::domain_model::*;
use crate::domain_port::*;
use dashmap::DashMap;

/// Stand-in for the account database. In permissive mode every user id is
/// reported as existing, with an empty email unless one was registered.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: DashMap<UserId, UserProfile>,
    permissive: bool,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn permissive() -> Self {
        Self {
            users: DashMap::new(),
            permissive: true,
        }
    }

    pub fn insert(&self, user_id: UserId, email: impl Into<String>) {
        self.users.insert(
            user_id,
            UserProfile {
                user_id,
                email: email.into(),
            },
        );
    }

    pub fn remove(&self, user_id: UserId) -> bool {
        self.users.remove(&user_id).is_some()
    }
}

#[async_trait::async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user_by_id(
        &self,
        user_id: UserId,
    ) -> Result<Option<UserProfile>, UserDirectoryError> {
        if let Some(profile) = self.users.get(&user_id) {
            return Ok(Some(profile.value().clone()));
        }
        if self.permissive {
            return Ok(Some(UserProfile {
                user_id,
                email: String::new(),
            }));
        }
        Ok(None)
    }
}

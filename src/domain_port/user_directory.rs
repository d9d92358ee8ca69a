use crate::domain_model::*;

#[derive(Debug, thiserror::Error)]
pub enum UserDirectoryError {
    #[error("user directory unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of the account database owned by the user service.
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user_by_id(&self, user_id: UserId)
    -> Result<Option<UserProfile>, UserDirectoryError>;
}

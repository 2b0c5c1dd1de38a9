//! Remote contracts and the in-memory reference remote.

pub mod defaults;
pub mod local;

use async_trait::async_trait;

use crate::cas::Secured;
use crate::client::Client;
use crate::error::Result;
use crate::types::{PartialPerspective, Perspective};

pub use defaults::{create_commit, get_home, next_timestamp, snap_default_perspective};
pub use local::{LocalAccessControl, RemoteLocal};

/// Who may move a perspective.
#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn can_update(&self, perspective_id: &str, user_id: Option<&str>) -> Result<bool>;

    async fn get_owner(&self, perspective_id: &str) -> Result<Option<String>>;
}

/// A backend that owns perspectives and is reached through a [`Client`].
#[async_trait]
pub trait RemoteEvees: Client {
    fn id(&self) -> &str;

    fn default_path(&self) -> &str {
        ""
    }

    fn user_id(&self) -> Option<String>;

    fn cas_id(&self) -> &str;

    fn access_control(&self) -> &dyn AccessControl;

    /// Build (but do not store) a perspective owned by this remote.
    async fn snap_perspective(
        &self,
        partial: PartialPerspective,
        guardian_id: Option<&str>,
    ) -> Result<Secured<Perspective>>;

    async fn is_logged(&self) -> Result<bool> {
        Ok(self.user_id().is_some())
    }

    async fn login(&self) -> Result<()> {
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        Ok(())
    }

    async fn ready(&self) -> Result<()> {
        Ok(())
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool> {
        Ok(true)
    }
}

use std::{sync::Arc, time::Duration};

use tracing::info;

use crate::{
    clock::Clock,
    error::{CoreError, CoreResult, bounded},
    models::{DeviceKind, DeviceTokenEntity},
    store::{TokenRegistry, UserDirectory},
};

/// Registration of push tokens. A token identifies a physical device, so registering it again
/// under another account moves it there.
pub struct DeviceRegistry {
    tokens: Arc<dyn TokenRegistry>,
    directory: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl DeviceRegistry {
    pub fn new(
        tokens: Arc<dyn TokenRegistry>,
        directory: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            tokens,
            directory,
            clock,
            timeout,
        }
    }

    pub async fn register(
        &self,
        user_id: i32,
        token: &str,
        device_kind: DeviceKind,
    ) -> CoreResult<DeviceTokenEntity> {
        bounded(self.timeout, "load user", self.directory.find_user(user_id))
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("User #{user_id}")))?;

        let row = bounded(
            self.timeout,
            "register device token",
            self.tokens
                .upsert_token(user_id, token, device_kind, self.clock.now()),
        )
        .await?;

        info!(
            "Device token #{} ({}) registered for user #{}",
            row.id, row.device_kind, user_id
        );
        Ok(row)
    }
}

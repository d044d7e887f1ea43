//! StaticSessionCounter - 手動で設定する対話セッション数

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{HostId, StoreError};
use crate::ports::SessionCounter;

#[derive(Debug, Default)]
pub struct StaticSessionCounter {
    sessions: Mutex<HashMap<HostId, u32>>,
}

impl StaticSessionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, host: HostId, sessions: u32) {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(host, sessions);
    }
}

#[async_trait]
impl SessionCounter for StaticSessionCounter {
    async fn interactive_sessions(&self, host: &HostId) -> Result<u32, StoreError> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sessions.get(host).copied().unwrap_or(0))
    }
}

//! SessionCounter port - 対話セッション（人間起点）の使用中スロット数
//!
//! CapacityAllocator はこの値を見て、自律 dispatch が対話用の予約枠を食わないようにします。

use async_trait::async_trait;

use crate::domain::{HostId, StoreError};

#[async_trait]
pub trait SessionCounter: Send + Sync {
    async fn interactive_sessions(&self, host: &HostId) -> Result<u32, StoreError>;
}

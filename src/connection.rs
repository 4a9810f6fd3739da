use std::sync::Arc;

use crate::{
    api::{PresenceClient, PresenceClientFactory},
    error::Result,
    utils::redact_token,
};

/// 当前持有的富状态连接。
///
/// 同一时刻只保留一条连接；令牌变化时，旧连接会先被拆除再建立新连接。
/// 本结构本身不做同步，只能在更新临界区（`PresenceUpdater` 的互斥锁）内使用。
#[derive(Default)]
pub(crate) struct ConnectionSlot {
    current: Option<(String, Arc<dyn PresenceClient>)>,
}

impl ConnectionSlot {
    /// 返回与 `token` 对应的客户端，必要时替换旧连接。
    pub(crate) async fn get_or_create(
        &mut self,
        factory: &dyn PresenceClientFactory,
        token: &str,
    ) -> Result<Arc<dyn PresenceClient>> {
        if let Some((cached_token, client)) = &self.current
            && cached_token == token
        {
            return Ok(Arc::clone(client));
        }

        if let Some((old_token, old_client)) = self.current.take() {
            log::info!(
                "[Connection] 令牌已变化 ({} -> {})，正在关闭旧连接...",
                redact_token(&old_token),
                redact_token(token)
            );
            teardown_client(old_client.as_ref()).await;
        }

        log::debug!("[Connection] 正在为令牌 {} 建立新连接...", redact_token(token));
        let client = factory.create(token).await?;
        self.current = Some((token.to_string(), Arc::clone(&client)));
        Ok(client)
    }

    /// 取出当前连接（如果有），之后的更新会重新建立连接。
    pub(crate) fn take(&mut self) -> Option<Arc<dyn PresenceClient>> {
        self.current.take().map(|(_, client)| client)
    }

    #[cfg(test)]
    pub(crate) fn token(&self) -> Option<&str> {
        self.current.as_ref().map(|(token, _)| token.as_str())
    }
}

/// 清除活动并关闭连接。两步的错误都只记录，不会向上传播，
/// 一条坏掉的旧连接绝不能妨碍新连接的建立。
pub(crate) async fn teardown_client(client: &dyn PresenceClient) {
    if let Err(e) = client.clear_activity().await {
        log::debug!("[Connection] 关闭前清除活动失败 (已忽略): {e}");
    }
    if let Err(e) = client.close().await {
        log::debug!("[Connection] 关闭连接失败 (已忽略): {e}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{api::ActivityPayload, error::PresenceError};

    #[derive(Default)]
    struct Journal(Mutex<Vec<String>>);

    impl Journal {
        fn push(&self, entry: String) {
            self.0.lock().unwrap().push(entry);
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct BrokenClient {
        token: String,
        journal: Arc<Journal>,
    }

    #[async_trait]
    impl PresenceClient for BrokenClient {
        async fn set_activity(&self, _payload: &ActivityPayload) -> Result<()> {
            Ok(())
        }

        async fn clear_activity(&self) -> Result<()> {
            self.journal.push(format!("clear:{}", self.token));
            Err(PresenceError::client("pipe closed"))
        }

        async fn close(&self) -> Result<()> {
            self.journal.push(format!("close:{}", self.token));
            Err(PresenceError::client("pipe closed"))
        }
    }

    struct JournalFactory(Arc<Journal>);

    #[async_trait]
    impl PresenceClientFactory for JournalFactory {
        async fn create(&self, token: &str) -> Result<Arc<dyn PresenceClient>> {
            self.0.push(format!("create:{token}"));
            Ok(Arc::new(BrokenClient {
                token: token.to_string(),
                journal: Arc::clone(&self.0),
            }))
        }
    }

    #[tokio::test]
    async fn test_same_token_reuses_client() {
        let journal = Arc::new(Journal::default());
        let factory = JournalFactory(Arc::clone(&journal));
        let mut slot = ConnectionSlot::default();

        let first = slot.get_or_create(&factory, "alpha").await.unwrap();
        let second = slot.get_or_create(&factory, "alpha").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(journal.entries(), vec!["create:alpha"]);
    }

    #[tokio::test]
    async fn test_token_change_replaces_even_if_teardown_fails() {
        let journal = Arc::new(Journal::default());
        let factory = JournalFactory(Arc::clone(&journal));
        let mut slot = ConnectionSlot::default();

        slot.get_or_create(&factory, "alpha").await.unwrap();
        slot.get_or_create(&factory, "beta").await.unwrap();

        assert_eq!(
            journal.entries(),
            vec!["create:alpha", "clear:alpha", "close:alpha", "create:beta"]
        );
        assert_eq!(slot.token(), Some("beta"));
    }

    #[tokio::test]
    async fn test_factory_error_leaves_slot_empty() {
        struct FailingFactory;

        #[async_trait]
        impl PresenceClientFactory for FailingFactory {
            async fn create(&self, _token: &str) -> Result<Arc<dyn PresenceClient>> {
                Err(PresenceError::connect("service not running"))
            }
        }

        let mut slot = ConnectionSlot::default();
        let result = slot.get_or_create(&FailingFactory, "alpha").await;
        assert!(matches!(result, Err(PresenceError::Connect(_))));
        assert_eq!(slot.token(), None);
    }
}

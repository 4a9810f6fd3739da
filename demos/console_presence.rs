use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicI64, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use presence_sync::{
    ActivityPayload, AlbumRef, ArtistRef, HostContext, MainContextQueue, NoopArtworkResolver,
    PresenceClient, PresenceClientFactory, PresenceConfig, PresenceCoordinator, ProcessLifecycle,
    Result, StartParameters, Track,
};

/// 把活动打印到终端的富状态客户端。
struct ConsoleClient {
    token: String,
}

#[async_trait]
impl PresenceClient for ConsoleClient {
    async fn set_activity(&self, payload: &ActivityPayload) -> Result<()> {
        let json = payload
            .to_json()
            .unwrap_or_else(|e| format!("<序列化失败: {e}>"));
        log::info!("[{}] 设置活动: {json}", self.token);
        Ok(())
    }

    async fn clear_activity(&self) -> Result<()> {
        log::info!("[{}] 清除活动", self.token);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        log::info!("[{}] 连接已关闭", self.token);
        Ok(())
    }
}

struct ConsoleFactory;

#[async_trait]
impl PresenceClientFactory for ConsoleFactory {
    async fn create(&self, token: &str) -> Result<Arc<dyn PresenceClient>> {
        log::info!("正在为令牌 '{token}' 建立连接...");
        Ok(Arc::new(ConsoleClient {
            token: token.to_string(),
        }))
    }
}

fn demo_track() -> Track {
    Track {
        id: "solaris".into(),
        title: "Solaris".into(),
        duration_ms: 240_000,
        artists: vec![ArtistRef {
            id: None,
            name: "Stellardrone".into(),
        }],
        album: Some(AlbumRef {
            id: None,
            title: "Light Years".into(),
        }),
        artwork_url: Some("https://img.example.com/light-years.jpg".into()),
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    let config = PresenceConfig {
        application_name: "Console Player".into(),
        track_url_template: Some("https://music.example.com/track/{id}".into()),
        ..Default::default()
    };
    let coordinator =
        PresenceCoordinator::new(Arc::new(ConsoleFactory), Arc::new(NoopArtworkResolver), config);

    // 模拟的播放器状态，只在“UI 线程”中读取。
    let position_ms = Arc::new(AtomicI64::new(0));
    let paused = Arc::new(AtomicBool::new(false));

    let (queue, pump) = MainContextQueue::channel();
    let _ui_thread = pump.spawn_thread("demo_ui_thread")?;
    let lifecycle = Arc::new(ProcessLifecycle::new());

    let position_reader = Arc::clone(&position_ms);
    let paused_reader = Arc::clone(&paused);
    coordinator.start(
        HostContext::new(Arc::new(queue), lifecycle.clone()),
        StartParameters::from_callbacks(
            "demo-token",
            Arc::new(|| Some(demo_track())),
            Arc::new(move || position_reader.load(Ordering::SeqCst)),
            Arc::new(move || paused_reader.load(Ordering::SeqCst)),
            Arc::new(|| 2_000),
        ),
    )?;

    for second in 1..=10 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if !paused.load(Ordering::SeqCst) {
            position_ms.fetch_add(1_000, Ordering::SeqCst);
        }
        if second == 5 {
            log::info!("暂停播放");
            paused.store(true, Ordering::SeqCst);
        }
    }

    log::info!(
        "最近一次估算: 开始 {:?}, 结束 {:?}",
        coordinator.last_start_time_estimate(),
        coordinator.last_end_time_estimate()
    );

    log::info!("手动刷新: {}", coordinator.update_now("demo-token", None, 0, false).await);

    lifecycle.destroy();
    tokio::time::sleep(Duration::from_millis(200)).await;
    log::info!("同步是否仍在运行: {}", coordinator.is_running());
    Ok(())
}

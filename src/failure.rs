use std::sync::{
    Mutex, PoisonError,
    atomic::{AtomicU32, Ordering},
};
use std::time::Duration;

use tokio::time::Instant;

/// 连续失败计数器。
///
/// 更新失败时加一，成功时归零。只存在于进程生命周期内，不做持久化。
#[derive(Debug, Default)]
pub(crate) struct FailureTracker {
    count: AtomicU32,
}

impl FailureTracker {
    /// 记录一次失败，返回记录后的连续失败次数。
    pub(crate) fn record_failure(&self) -> u32 {
        self.count.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    pub(crate) fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }

    pub(crate) fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

/// `restart()` 被拒绝的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RestartRefusal {
    /// 距离上次重启不足冷却时长。
    Cooldown { remaining: Duration },
    /// 连续失败次数已达上限。
    TooManyFailures { count: u32 },
}

/// 重启的闸门：时间冷却 + 失败次数两道检查。
#[derive(Debug)]
pub(crate) struct RestartGate {
    cooldown: Duration,
    max_failures: u32,
    last_restart: Mutex<Option<Instant>>,
}

impl RestartGate {
    pub(crate) fn new(cooldown: Duration, max_failures: u32) -> Self {
        Self {
            cooldown,
            max_failures,
            last_restart: Mutex::new(None),
        }
    }

    /// 检查当前是否允许重启；允许时立即记录本次重启时间，并返回之前的记录。
    ///
    /// 检查和记录在同一把锁内完成，并发的两次 `restart()` 只有一次能通过。
    /// 重启本身失败时，用返回值调用 [`revert`](Self::revert) 撤销这次记录。
    pub(crate) fn try_acquire(&self, failures: u32) -> Result<Option<Instant>, RestartRefusal> {
        let mut last_restart = self
            .last_restart
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(last) = *last_restart {
            let elapsed = last.elapsed();
            if elapsed < self.cooldown {
                return Err(RestartRefusal::Cooldown {
                    remaining: self.cooldown - elapsed,
                });
            }
        }

        if failures >= self.max_failures {
            return Err(RestartRefusal::TooManyFailures { count: failures });
        }

        Ok(last_restart.replace(Instant::now()))
    }

    /// 撤销最近一次 `try_acquire` 记录的重启时间。
    pub(crate) fn revert(&self, previous: Option<Instant>) {
        *self
            .last_restart
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = previous;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_tracker_counts_and_resets() {
        let tracker = FailureTracker::default();
        assert_eq!(tracker.record_failure(), 1);
        assert_eq!(tracker.record_failure(), 2);
        assert_eq!(tracker.count(), 2);
        tracker.reset();
        assert_eq!(tracker.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_cooldown() {
        let gate = RestartGate::new(Duration::from_secs(30), 3);
        assert_eq!(gate.try_acquire(0), Ok(None));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(matches!(
            gate.try_acquire(0),
            Err(RestartRefusal::Cooldown { remaining }) if remaining <= Duration::from_secs(20)
        ));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(matches!(gate.try_acquire(0), Ok(Some(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_revert_restores_previous_restart() {
        let gate = RestartGate::new(Duration::from_secs(30), 3);
        let previous = gate.try_acquire(0).unwrap();
        gate.revert(previous);
        assert_eq!(gate.try_acquire(0), Ok(None));
    }

    #[test]
    fn test_gate_failure_threshold() {
        let gate = RestartGate::new(Duration::from_secs(30), 3);
        assert_eq!(
            gate.try_acquire(3),
            Err(RestartRefusal::TooManyFailures { count: 3 })
        );
        // 被拒绝的尝试不会开始冷却。
        assert_eq!(gate.try_acquire(2), Ok(None));
    }
}

// 传输模拟器
//
// 用随机大小的分片和随机间隔模拟一次分片上传：
// - 进度单调递增，只有百分比变大时才回调
// - 完成回调恰好触发一次
// - 取消句柄保证之后不再有任何回调（即使下一步已经排期）
// - 回调返回的后续动作在闸门外执行，可以再去取消其他传输
//
// TransferDriver 是与真实分片上传客户端相同的接口，替换实现时调用方无需改动

use super::error::{UploadError, UploadResult};
use super::file::FileId;
use crate::config::SimulatorConfig;
use parking_lot::ReentrantMutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// 闸门释放后才执行的后续动作
pub type Deferred = Box<dyn FnOnce() + Send + 'static>;
/// 进度回调（参数为百分比 1..=100），在闸门内执行
pub type ProgressCallback = Box<dyn FnMut(u8) -> Option<Deferred> + Send + 'static>;
/// 完成回调，在闸门内执行
pub type CompleteCallback = Box<dyn FnOnce() -> Option<Deferred> + Send + 'static>;

/// 传输驱动
///
/// 模拟实现与真实传输共用此接口
pub trait TransferDriver: Send + Sync {
    /// 启动一次传输
    ///
    /// `total_bytes` 为 0 时返回 [`UploadError::InvalidTotalSize`]，不会产生任何回调
    fn start(
        &self,
        file_id: &FileId,
        total_bytes: u64,
        on_progress: ProgressCallback,
        on_complete: CompleteCallback,
    ) -> UploadResult<TransferHandle>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Active,
    Finished,
    Cancelled,
}

/// 传输取消句柄
///
/// 回调在闸门锁内执行，`cancel()` 返回后不会再有回调触发。
/// 锁可重入，回调内部取消自身传输不会死锁。
/// 闸门内只应做状态更新，耗时或会取消其他传输的逻辑放进 [`Deferred`]
#[derive(Clone)]
pub struct TransferHandle {
    gate: Arc<ReentrantMutex<Cell<GateState>>>,
    token: CancellationToken,
}

impl std::fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferHandle")
            .field("state", &self.gate.lock().get())
            .finish()
    }
}

impl Default for TransferHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferHandle {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(ReentrantMutex::new(Cell::new(GateState::Active))),
            token: CancellationToken::new(),
        }
    }

    /// 取消传输
    ///
    /// 返回 true 表示确实中止了一个进行中的传输；已完成或已取消时为空操作
    pub fn cancel(&self) -> bool {
        let stopped = {
            let gate = self.gate.lock();
            if gate.get() == GateState::Active {
                gate.set(GateState::Cancelled);
                true
            } else {
                false
            }
        };
        self.token.cancel();
        stopped
    }

    pub fn is_cancelled(&self) -> bool {
        self.gate.lock().get() == GateState::Cancelled
    }

    pub fn is_finished(&self) -> bool {
        self.gate.lock().get() == GateState::Finished
    }

    /// 传输驱动用于感知取消的令牌
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 仅在传输仍然活跃时执行回调，已结束时返回 None
    pub fn run_if_active<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let gate = self.gate.lock();
        if gate.get() != GateState::Active {
            return None;
        }
        Some(f())
    }

    /// 执行完成回调并进入终态
    pub fn complete<R>(&self, on_complete: impl FnOnce() -> R) -> Option<R> {
        let gate = self.gate.lock();
        if gate.get() != GateState::Active {
            return None;
        }
        let output = on_complete();
        if gate.get() == GateState::Active {
            gate.set(GateState::Finished);
        }
        Some(output)
    }
}

/// 单步推进结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// 需要上报的新百分比（未增长时为 None）
    pub report: Option<u8>,
    /// 是否已传完
    pub done: bool,
}

/// 累计字节计数，负责百分比去重
#[derive(Debug, Clone)]
pub struct ProgressCounter {
    total_bytes: u64,
    transferred: u64,
    last_reported: u8,
}

impl ProgressCounter {
    pub fn new(total_bytes: u64) -> UploadResult<Self> {
        if total_bytes == 0 {
            return Err(UploadError::InvalidTotalSize);
        }
        Ok(Self {
            total_bytes,
            transferred: 0,
            last_reported: 0,
        })
    }

    /// 推进一个分片，累计值不会超过总大小
    pub fn advance(&mut self, chunk: u64) -> Step {
        self.transferred = self.transferred.saturating_add(chunk).min(self.total_bytes);

        let percent = self.percent();
        let report = if percent > self.last_reported {
            self.last_reported = percent;
            Some(percent)
        } else {
            None
        };

        Step {
            report,
            done: self.transferred >= self.total_bytes,
        }
    }

    /// floor(transferred / total * 100)
    pub fn percent(&self) -> u8 {
        (self.transferred as u128 * 100 / self.total_bytes as u128) as u8
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }
}

/// 模拟传输驱动
pub struct SimulatedTransfer {
    config: SimulatorConfig,
    /// 设置种子时，每个传输用 seed + 序号 初始化随机数
    sequence: AtomicU64,
}

impl SimulatedTransfer {
    pub fn new(config: SimulatorConfig) -> Self {
        let mut config = config;
        config.min_chunk_bytes = config.min_chunk_bytes.max(1);
        if config.max_chunk_bytes < config.min_chunk_bytes {
            config.max_chunk_bytes = config.min_chunk_bytes;
        }
        if config.max_step_delay_ms < config.min_step_delay_ms {
            config.max_step_delay_ms = config.min_step_delay_ms;
        }
        Self {
            config,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    fn next_rng(&self) -> StdRng {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(sequence)),
            None => StdRng::from_entropy(),
        }
    }
}

impl Default for SimulatedTransfer {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl TransferDriver for SimulatedTransfer {
    fn start(
        &self,
        file_id: &FileId,
        total_bytes: u64,
        on_progress: ProgressCallback,
        on_complete: CompleteCallback,
    ) -> UploadResult<TransferHandle> {
        let counter = ProgressCounter::new(total_bytes)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| UploadError::NoRuntime)?;

        let handle = TransferHandle::new();
        let run = SimulatedRun {
            file_id: file_id.clone(),
            config: self.config.clone(),
            rng: self.next_rng(),
            counter,
            handle: handle.clone(),
            on_progress,
            on_complete,
        };

        debug!("启动模拟传输: file_id={}, total_bytes={}", file_id, total_bytes);
        runtime.spawn(run.run());

        Ok(handle)
    }
}

/// 一次模拟传输的运行状态（由后台任务独占）
struct SimulatedRun {
    file_id: FileId,
    config: SimulatorConfig,
    rng: StdRng,
    counter: ProgressCounter,
    handle: TransferHandle,
    on_progress: ProgressCallback,
    on_complete: CompleteCallback,
}

impl SimulatedRun {
    async fn run(self) {
        let SimulatedRun {
            file_id,
            config,
            mut rng,
            mut counter,
            handle,
            mut on_progress,
            on_complete,
        } = self;
        let token = handle.cancellation_token();
        let mut delay = config.initial_delay();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => {
                    debug!("模拟传输已取消: file_id={}, transferred={}", file_id, counter.transferred());
                    return;
                }
            }

            let chunk = rng.gen_range(config.min_chunk_bytes..=config.max_chunk_bytes);
            let step = counter.advance(chunk);
            trace!(
                "传输步进: file_id={}, chunk={}, transferred={}, report={:?}",
                file_id,
                chunk,
                counter.transferred(),
                step.report
            );

            if let Some(percent) = step.report {
                match handle.run_if_active(|| on_progress(percent)) {
                    Some(deferred) => deferred.into_iter().for_each(|f| f()),
                    None => {
                        debug!("传输已取消，丢弃进度: file_id={}", file_id);
                        return;
                    }
                }
            }

            if step.done {
                if let Some(deferred) = handle.complete(on_complete) {
                    debug!("模拟传输完成: file_id={}", file_id);
                    deferred.into_iter().for_each(|f| f());
                }
                return;
            }

            delay = next_delay(&config, &mut rng);
        }
    }
}

/// 下一步前的等待：随机间隔，偶尔附加一次停顿
fn next_delay(config: &SimulatorConfig, rng: &mut StdRng) -> Duration {
    let base = rng.gen_range(config.min_step_delay_ms..=config.max_step_delay_ms);
    let stalled = rng.gen::<f64>() < config.stall_probability;
    let extra = if stalled { config.stall_delay_ms } else { 0 };
    Duration::from_millis(base.saturating_add(extra))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Progress(u8),
        Complete,
    }

    fn recorder() -> (Arc<Mutex<Vec<Event>>>, ProgressCallback) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        (
            events,
            Box::new(move |p| {
                sink.lock().push(Event::Progress(p));
                None
            }),
        )
    }

    fn seeded(seed: u64) -> SimulatedTransfer {
        SimulatedTransfer::new(SimulatorConfig {
            seed: Some(seed),
            ..SimulatorConfig::default()
        })
    }

    #[test]
    fn test_counter_rejects_zero() {
        assert_eq!(
            ProgressCounter::new(0).unwrap_err(),
            UploadError::InvalidTotalSize
        );
    }

    #[test]
    fn test_counter_dedups_and_clamps() {
        let mut counter = ProgressCounter::new(1000).unwrap();

        assert_eq!(counter.advance(5), Step { report: None, done: false });
        assert_eq!(counter.advance(10), Step { report: Some(1), done: false });
        assert_eq!(counter.advance(4), Step { report: None, done: false });
        assert_eq!(counter.advance(500), Step { report: Some(51), done: false });
        assert_eq!(counter.advance(10_000), Step { report: Some(100), done: true });
        assert_eq!(counter.transferred(), 1000);
    }

    #[test]
    fn test_counter_large_totals() {
        let mut counter = ProgressCounter::new(u64::MAX).unwrap();
        let step = counter.advance(u64::MAX / 2);
        assert_eq!(step.report, Some(49));
    }

    #[test]
    fn test_start_without_runtime() {
        let driver = SimulatedTransfer::default();
        let result = driver.start(&FileId::from("a"), 10, Box::new(|_| None), Box::new(|| None));
        assert_eq!(result.unwrap_err(), UploadError::NoRuntime);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_bytes_fails_fast() {
        let driver = SimulatedTransfer::default();
        let (events, on_progress) = recorder();
        let result = driver.start(&FileId::from("a"), 0, on_progress, Box::new(|| None));
        assert_eq!(result.unwrap_err(), UploadError::InvalidTotalSize);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(events.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_strictly_increasing_then_complete() {
        let driver = seeded(1);
        let (events, on_progress) = recorder();
        let (tx, rx) = oneshot::channel();
        let sink = events.clone();

        driver
            .start(
                &FileId::from("a.pdf"),
                5 * 1024 * 1024,
                on_progress,
                Box::new(move || {
                    sink.lock().push(Event::Complete);
                    let _ = tx.send(());
                    None
                }),
            )
            .unwrap();

        rx.await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let events = events.lock().clone();
        assert_eq!(events.last(), Some(&Event::Complete));
        let percents: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                Event::Progress(p) => Some(*p),
                Event::Complete => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(percents.last(), Some(&100));
        assert_eq!(events.iter().filter(|e| **e == Event::Complete).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_file_single_step() {
        let driver = seeded(2);
        let (events, on_progress) = recorder();
        let (tx, rx) = oneshot::channel();

        let handle = driver
            .start(
                &FileId::from("tiny"),
                100,
                on_progress,
                Box::new(move || {
                    let _ = tx.send(());
                    None
                }),
            )
            .unwrap();

        rx.await.unwrap();
        assert_eq!(*events.lock(), vec![Event::Progress(100)]);
        assert!(handle.is_finished());
        // 完成后取消是空操作
        assert!(!handle.cancel());
        assert!(!handle.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_callbacks() {
        let driver = seeded(3);
        let (events, on_progress) = recorder();
        let sink = events.clone();

        let handle = driver
            .start(
                &FileId::from("big"),
                5 * 1024 * 1024,
                on_progress,
                Box::new(move || {
                    sink.lock().push(Event::Complete);
                    None
                }),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(handle.cancel());
        assert!(handle.is_cancelled());
        let seen = events.lock().len();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(events.lock().len(), seen);
        assert!(!events.lock().contains(&Event::Complete));
        assert!(!handle.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_step() {
        let driver = seeded(4);
        let (events, on_progress) = recorder();
        let handle = driver
            .start(&FileId::from("a"), 10, on_progress, Box::new(|| None))
            .unwrap();

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_reentrant_cancel_inside_callback() {
        let handle = TransferHandle::new();
        let inner = handle.clone();
        assert_eq!(handle.run_if_active(|| inner.cancel()), Some(true));
        assert_eq!(handle.run_if_active(|| panic!("不应执行")), None::<()>);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_runs_outside_gate() {
        let driver = seeded(5);
        let (tx, rx) = oneshot::channel();
        let slot: Arc<Mutex<Option<TransferHandle>>> = Arc::new(Mutex::new(None));

        let inner_slot = slot.clone();
        let handle = driver
            .start(
                &FileId::from("a"),
                100,
                Box::new(|_| None),
                Box::new(move || {
                    Some(Box::new(move || {
                        // 另一个线程读取闸门，闸门仍被持有时会一直阻塞
                        let handle = inner_slot.lock().clone();
                        let finished = std::thread::spawn(move || {
                            handle.map(|handle| handle.is_finished())
                        })
                        .join()
                        .ok()
                        .flatten();
                        let _ = tx.send(finished);
                    }) as Deferred)
                }),
            )
            .unwrap();
        *slot.lock() = Some(handle);

        assert_eq!(rx.await.unwrap(), Some(true));
    }

    #[test]
    fn test_next_delay_bounds() {
        let config = SimulatorConfig {
            stall_probability: 1.0,
            ..SimulatorConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..100 {
            let delay = next_delay(&config, &mut rng).as_millis() as u64;
            assert!((550..=999).contains(&delay));
        }
    }

    #[test]
    fn test_next_delay_saturates() {
        let config = SimulatorConfig {
            min_step_delay_ms: u64::MAX,
            max_step_delay_ms: u64::MAX,
            stall_probability: 1.0,
            stall_delay_ms: u64::MAX,
            ..SimulatorConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(next_delay(&config, &mut rng), Duration::from_millis(u64::MAX));
    }
}

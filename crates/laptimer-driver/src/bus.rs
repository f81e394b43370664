//! 事件总线
//!
//! 生产者（过线检测、无线上行、Flash 完成回调、定时器）只通过 [`EventSender`]
//! 投递事件；事件的处理只发生在主循环调用 [`EventBus::dispatch_pending`]
//! 或 [`EventBus::process_next_event`] 时。
//!
//! # 设计
//!
//! - **即时事件**: 定容 crossbeam channel，队列满时 `emit` 返回错误，不阻塞
//! - **延迟事件**: 定容定时器池，每个槽位用一个原子标志认领（CAS），
//!   到期时按 (到期时刻, 提交顺序) 进入即时队列
//! - **观察者**: 定容观察者表，以句柄注销；投递对主循环是串行的、不可重入的
//!
//! 定时器以总线内部的虚拟毫秒时钟计时，由主循环通过 [`EventBus::advance`]
//! 推进，不读取墙钟。

use crate::event::Event;
use crate::DriverError;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{error, trace, warn};

/// 即时事件队列容量
pub const MAX_EVENTS: usize = 16;
/// 观察者表容量
pub const MAX_OBSERVERS: usize = 4;
/// 定时器池容量
pub const MAX_TIMERS: usize = 8;

/// 总线容量配置
///
/// 观察者表与定时器池在编译期按 [`MAX_OBSERVERS`] / [`MAX_TIMERS`] 分配，
/// 配置值只能收紧，不能放大。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BusConfig {
    pub max_events: usize,
    pub max_observers: usize,
    pub max_timers: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_events: MAX_EVENTS,
            max_observers: MAX_OBSERVERS,
            max_timers: MAX_TIMERS,
        }
    }
}

/// 事件观察者
///
/// 在主循环上下文中被调用。需要继续投递事件的观察者自行持有一个
/// [`EventSender`]。
pub trait EventObserver: Send {
    fn on_event(&mut self, event: &Event);
}

/// 共享的观察者引用
pub type SharedObserver = Arc<Mutex<dyn EventObserver>>;

/// 注册观察者返回的句柄，用于注销
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle {
    slot: usize,
    serial: u64,
}

struct TimerEntry {
    event: Event,
    due_at: u64,
    seq: u64,
}

#[derive(Default)]
struct TimerSlot {
    used: AtomicBool,
    entry: Mutex<Option<TimerEntry>>,
}

struct TimerPool {
    slots: [TimerSlot; MAX_TIMERS],
    limit: usize,
    now_ms: AtomicU64,
    seq: AtomicU64,
}

impl TimerPool {
    fn new(limit: usize) -> Self {
        Self {
            slots: std::array::from_fn(|_| TimerSlot::default()),
            limit: limit.min(MAX_TIMERS),
            now_ms: AtomicU64::new(0),
            seq: AtomicU64::new(0),
        }
    }

    fn schedule(&self, event: Event, delay_ms: u32) -> Result<(), DriverError> {
        for slot in &self.slots[..self.limit] {
            if slot
                .used
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let due_at = self.now_ms.load(Ordering::Acquire) + u64::from(delay_ms);
                let seq = self.seq.fetch_add(1, Ordering::Relaxed);
                *slot.entry.lock() = Some(TimerEntry { event, due_at, seq });
                return Ok(());
            }
        }
        Err(DriverError::TimerPoolExhausted {
            capacity: self.limit,
        })
    }

    fn release(&self, index: usize) -> Option<Event> {
        let slot = &self.slots[index];
        let event = slot.entry.lock().take().map(|entry| entry.event);
        slot.used.store(false, Ordering::Release);
        event
    }

    /// 已到期槽位，按 (到期时刻, 提交顺序) 排序
    fn due(&self, now_ms: u64) -> SmallVec<[(u64, u64, usize); MAX_TIMERS]> {
        let mut due: SmallVec<[(u64, u64, usize); MAX_TIMERS]> = SmallVec::new();
        for (index, slot) in self.slots[..self.limit].iter().enumerate() {
            let entry = slot.entry.lock();
            if let Some(entry) = entry.as_ref() {
                if entry.due_at <= now_ms {
                    due.push((entry.due_at, entry.seq, index));
                }
            }
        }
        due.sort_unstable();
        due
    }

    /// 最早到期的槽位
    fn earliest(&self) -> Option<(u64, usize)> {
        self.slots[..self.limit]
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.entry
                    .lock()
                    .as_ref()
                    .map(|entry| (entry.due_at, entry.seq, index))
            })
            .min()
            .map(|(due_at, _, index)| (due_at, index))
    }

    fn pending(&self) -> usize {
        self.slots[..self.limit]
            .iter()
            .filter(|slot| slot.entry.lock().is_some())
            .count()
    }
}

struct BusShared {
    tx: Sender<Event>,
    capacity: usize,
    timers: TimerPool,
}

/// 事件投递端，可克隆并跨线程使用
#[derive(Clone)]
pub struct EventSender {
    shared: Arc<BusShared>,
}

impl EventSender {
    /// 投递即时事件
    pub fn emit(&self, event: Event) -> Result<(), DriverError> {
        match self.shared.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DriverError::QueueFull {
                capacity: self.shared.capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(DriverError::ChannelClosed),
        }
    }

    /// 在 `delay_ms` 毫秒后投递事件
    pub fn emit_delayed(&self, event: Event, delay_ms: u32) -> Result<(), DriverError> {
        self.shared.timers.schedule(event, delay_ms).inspect_err(|e| {
            error!(?event, delay_ms, "Cannot schedule delayed event: {}", e);
        })
    }
}

impl std::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSender")
            .field("queued", &self.shared.tx.len())
            .field("timers", &self.shared.timers.pending())
            .finish()
    }
}

struct ObserverEntry {
    serial: u64,
    observer: SharedObserver,
}

/// 事件总线
pub struct EventBus {
    shared: Arc<BusShared>,
    rx: Receiver<Event>,
    observers: [Option<ObserverEntry>; MAX_OBSERVERS],
    max_observers: usize,
    next_serial: u64,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        let capacity = config.max_events.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            shared: Arc::new(BusShared {
                tx,
                capacity,
                timers: TimerPool::new(config.max_timers),
            }),
            rx,
            observers: std::array::from_fn(|_| None),
            max_observers: config.max_observers.min(MAX_OBSERVERS),
            next_serial: 0,
        }
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            shared: self.shared.clone(),
        }
    }

    /// 注册观察者，观察者表已满时失败
    pub fn register(&mut self, observer: SharedObserver) -> Result<ObserverHandle, DriverError> {
        let slot = self.observers[..self.max_observers]
            .iter()
            .position(Option::is_none)
            .ok_or(DriverError::ObserverCapacity {
                capacity: self.max_observers,
            })?;
        let serial = self.next_serial;
        self.next_serial += 1;
        self.observers[slot] = Some(ObserverEntry { serial, observer });
        Ok(ObserverHandle { slot, serial })
    }

    pub fn unregister(&mut self, handle: ObserverHandle) -> Result<(), DriverError> {
        let registered = self
            .observers
            .get(handle.slot)
            .and_then(Option::as_ref)
            .is_some_and(|entry| entry.serial == handle.serial);
        if !registered {
            return Err(DriverError::UnknownObserver);
        }
        self.observers[handle.slot] = None;
        Ok(())
    }

    pub fn observer_count(&self) -> usize {
        self.observers.iter().flatten().count()
    }

    /// 待处理的即时事件数
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// 未到期的定时器数
    pub fn pending_timers(&self) -> usize {
        self.shared.timers.pending()
    }

    /// 推进定时器时钟，已到期的延迟事件按到期顺序进入即时队列
    ///
    /// 即时队列已满时剩余事件留在槽位中，下次推进时再次尝试，顺序不变。
    /// 返回进入队列的事件数。
    pub fn advance(&self, elapsed_ms: u32) -> usize {
        let timers = &self.shared.timers;
        let now_ms = timers.now_ms.fetch_add(u64::from(elapsed_ms), Ordering::AcqRel)
            + u64::from(elapsed_ms);

        let mut fired = 0;
        for (_, _, index) in timers.due(now_ms) {
            let slot = &timers.slots[index];
            let mut entry = slot.entry.lock();
            let Some(event) = entry.as_ref().map(|e| e.event) else {
                continue;
            };
            match self.shared.tx.try_send(event) {
                Ok(()) => {
                    *entry = None;
                    drop(entry);
                    slot.used.store(false, Ordering::Release);
                    fired += 1;
                },
                Err(_) => {
                    warn!(?event, "Event queue full, delayed event postponed");
                    break;
                },
            }
        }
        fired
    }

    /// 投递所有排队的即时事件（包括投递过程中新产生的），返回投递数
    pub fn dispatch_pending(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(event) = self.rx.try_recv() {
            self.deliver(&event);
            delivered += 1;
        }
        delivered
    }

    /// 逐个处理事件
    ///
    /// 先处理即时事件；即时队列为空时，把虚拟时钟直接推进到最早的定时器
    /// 并投递它。两者都没有时返回 `None`。
    pub fn process_next_event(&mut self) -> Option<Event> {
        let event = match self.rx.try_recv() {
            Ok(event) => event,
            Err(_) => {
                let timers = &self.shared.timers;
                let (due_at, index) = timers.earliest()?;
                timers.now_ms.fetch_max(due_at, Ordering::AcqRel);
                timers.release(index)?
            },
        };
        self.deliver(&event);
        Some(event)
    }

    fn deliver(&self, event: &Event) {
        trace!(?event, "Dispatching event");
        for entry in self.observers.iter().flatten() {
            entry.observer.lock().on_event(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

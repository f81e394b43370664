//! 驱动层错误类型定义

use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// 即时事件队列已满
    #[error("Event queue full (capacity: {capacity})")]
    QueueFull { capacity: usize },

    /// 观察者表已满
    #[error("Observer table full (capacity: {capacity})")]
    ObserverCapacity { capacity: usize },

    /// 句柄不对应任何已注册的观察者
    #[error("Unknown observer handle")]
    UnknownObserver,

    /// 定时器槽位耗尽
    ///
    /// 延迟投递只用于低频的后台事务，耗尽说明容量配置有误。
    #[error("Timer pool exhausted (capacity: {capacity})")]
    TimerPoolExhausted { capacity: usize },

    /// 事件总线已销毁
    #[error("Event channel closed")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::DriverError;

    #[test]
    fn test_driver_error_display() {
        let msg = DriverError::QueueFull { capacity: 16 }.to_string();
        assert!(msg.contains("16"), "QueueFull message: {}", msg);

        let msg = DriverError::TimerPoolExhausted { capacity: 8 }.to_string();
        assert_eq!(msg, "Timer pool exhausted (capacity: 8)");

        assert_eq!(
            DriverError::ObserverCapacity { capacity: 4 }.to_string(),
            "Observer table full (capacity: 4)"
        );
        assert_eq!(DriverError::ChannelClosed.to_string(), "Event channel closed");
    }
}

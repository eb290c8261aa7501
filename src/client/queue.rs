// resilient_ws_client/src/client/queue.rs

//! 出站消息队列。
//!
//! 连接未处于 Open 状态时，`send` 会把消息放入本队列并返回一个 `PendingSend`。
//! 每条排队消息都持有一个一次性的结果通道，队列保证：消息离开队列之前，
//! 它的结果一定被恰好结算一次（成功或失败）。

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::error::{FailureReason, SendFailure};

/// 单条消息在被判定为失败之前允许的冲刷尝试次数。
pub const MAX_SEND_ATTEMPTS: u32 = 3;

/// 排队消息成功发出后的回执。
#[derive(Debug, Clone, PartialEq)]
pub struct SendReceipt {
    /// 原始载荷。
    pub payload: Value,
    /// 是否经由队列发出（立即发送的消息不会产生回执）。
    pub queued: bool,
}

/// 排队消息的最终结果。
pub type SendResult = Result<SendReceipt, SendFailure>;

/// 排队消息的延迟结果，`await` 后得到 `SendResult`。
#[derive(Debug)]
pub struct PendingSend {
    id: u64,
    rx: oneshot::Receiver<SendResult>,
}

impl PendingSend {
    /// 该消息在队列中的标识。
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingSend {
    type Output = SendResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(SendFailure { reason: FailureReason::ClientDropped, payload: Value::Null })
            })
        })
    }
}

/// 队列中的一条消息。
#[derive(Debug)]
struct QueuedMessage {
    id: u64,
    payload: Value,
    enqueued_at: DateTime<Utc>,
    attempts: u32,
    outcome: Option<oneshot::Sender<SendResult>>,
}

impl QueuedMessage {
    fn fulfil(mut self) {
        let payload = std::mem::take(&mut self.payload);
        if let Some(tx) = self.outcome.take() {
            // 接收端可能已被调用方丢弃，忽略即可
            let _ = tx.send(Ok(SendReceipt { payload, queued: true }));
        }
    }

    fn reject(mut self, reason: FailureReason) {
        let payload = std::mem::take(&mut self.payload);
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(Err(SendFailure { reason, payload }));
        }
    }
}

impl Drop for QueuedMessage {
    fn drop(&mut self) {
        if let Some(tx) = self.outcome.take() {
            let payload = std::mem::take(&mut self.payload);
            let _ = tx.send(Err(SendFailure { reason: FailureReason::ClientDropped, payload }));
        }
    }
}

/// 一次冲刷的统计结果。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub retained: usize,
    pub expired: usize,
}

/// 先进先出的出站队列。
#[derive(Debug, Default)]
pub struct OutboundQueue {
    messages: VecDeque<QueuedMessage>,
    next_id: u64,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 将载荷追加到队尾，返回其延迟结果。
    pub fn enqueue(&mut self, payload: Value) -> PendingSend {
        self.next_id += 1;
        let id = self.next_id;
        let (tx, rx) = oneshot::channel();
        debug!(
            "[发送队列] 消息入队 (ID: {}, 类型: {})，当前队列长度: {}",
            id,
            payload.get("type").and_then(Value::as_str).unwrap_or("unknown"),
            self.messages.len() + 1
        );
        self.messages.push_back(QueuedMessage {
            id,
            payload,
            enqueued_at: Utc::now(),
            attempts: 0,
            outcome: Some(tx),
        });
        PendingSend { id, rx }
    }

    /// 按入队顺序逐条尝试发送。
    ///
    /// `transmit` 返回 `true` 表示发送成功。成功的消息以原始载荷结算并移出队列；
    /// 失败的消息累加尝试次数，未达上限的保留（顺序不变）等待下一次冲刷，
    /// 达到上限的以 `RetriesExhausted` 拒绝并移出。
    pub fn flush<F>(&mut self, mut transmit: F) -> FlushReport
    where
        F: FnMut(&Value) -> bool,
    {
        let mut report = FlushReport::default();
        if self.messages.is_empty() {
            return report;
        }
        info!("[发送队列] 开始冲刷队列，共 {} 条消息", self.messages.len());

        let pending = std::mem::take(&mut self.messages);
        for mut message in pending {
            if transmit(&message.payload) {
                debug!(
                    "[发送队列] 消息已发出 (ID: {}, 排队 {}ms)",
                    message.id,
                    (Utc::now() - message.enqueued_at).num_milliseconds()
                );
                message.fulfil();
                report.sent += 1;
                continue;
            }

            message.attempts += 1;
            if message.attempts < MAX_SEND_ATTEMPTS {
                debug!("[发送队列] 消息发送失败 (ID: {})，第 {} 次尝试，保留在队列中", message.id, message.attempts);
                self.messages.push_back(message);
                report.retained += 1;
            } else {
                warn!("[发送队列] 消息 (ID: {}) 已失败 {} 次，放弃发送", message.id, message.attempts);
                let attempts = message.attempts;
                message.reject(FailureReason::RetriesExhausted { attempts });
                report.expired += 1;
            }
        }
        report
    }

    /// 以给定原因拒绝并清空所有排队消息，返回被清掉的数量。
    pub fn reject_all(&mut self, reason: FailureReason) -> usize {
        let count = self.messages.len();
        if count > 0 {
            info!("[发送队列] 清空队列，拒绝 {} 条消息，原因: {:?}", count, reason);
        }
        for message in self.messages.drain(..) {
            message.reject(reason.clone());
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// 在当前线程上直接取出已结算的结果。
    fn settled(pending: PendingSend) -> SendResult {
        futures_util::FutureExt::now_or_never(pending).expect("结果应当已经结算")
    }

    #[test]
    fn test_enqueue_preserves_call_order() {
        let mut queue = OutboundQueue::new();
        for n in 0..4 {
            queue.enqueue(json!({ "type": "n", "n": n }));
        }
        assert_eq!(queue.len(), 4);

        let mut order = Vec::new();
        queue.flush(|payload| {
            order.push(payload["n"].as_i64().unwrap());
            true
        });
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_successful_flush_fulfils_with_original_payload() {
        let mut queue = OutboundQueue::new();
        let pending = queue.enqueue(json!({ "type": "a" }));
        let report = queue.flush(|_| true);
        assert_eq!(report, FlushReport { sent: 1, retained: 0, expired: 0 });
        assert_eq!(
            settled(pending).unwrap(),
            SendReceipt { payload: json!({ "type": "a" }), queued: true }
        );
    }

    #[test]
    fn test_message_rejected_after_three_failed_flushes() {
        let mut queue = OutboundQueue::new();
        let mut pending = queue.enqueue(json!({ "type": "doomed" }));

        for _ in 0..2 {
            let report = queue.flush(|_| false);
            assert_eq!(report.retained, 1);
            assert_eq!(queue.len(), 1);
            assert!(futures_util::FutureExt::now_or_never(&mut pending).is_none());
        }

        let report = queue.flush(|_| false);
        assert_eq!(report.expired, 1);
        assert!(queue.is_empty());
        let failure = settled(pending).unwrap_err();
        assert_eq!(failure.reason, FailureReason::RetriesExhausted { attempts: 3 });
        assert_eq!(failure.payload, json!({ "type": "doomed" }));
    }

    #[test]
    fn test_message_succeeding_on_third_flush_is_fulfilled() {
        let mut queue = OutboundQueue::new();
        let pending = queue.enqueue(json!({ "type": "late" }));
        queue.enqueue(json!({ "type": "other" }));

        queue.flush(|p| p["type"] != "late");
        queue.flush(|_| false);
        assert_eq!(queue.len(), 1);

        let report = queue.flush(|_| true);
        assert_eq!(report.sent, 1);
        assert!(queue.is_empty());
        assert!(settled(pending).is_ok());
    }

    #[test]
    fn test_retained_messages_keep_relative_order() {
        let mut queue = OutboundQueue::new();
        for name in ["a", "b", "c", "d"] {
            queue.enqueue(json!({ "type": name }));
        }
        queue.flush(|p| p["type"] == "b" || p["type"] == "d");

        let mut order = Vec::new();
        queue.flush(|p| {
            order.push(p["type"].as_str().unwrap().to_string());
            true
        });
        assert_eq!(order, vec!["a", "c"]);
    }

    #[test]
    fn test_reject_all_settles_regardless_of_attempts() {
        let mut queue = OutboundQueue::new();
        let first = queue.enqueue(json!({ "type": "x" }));
        queue.flush(|_| false);
        let second = queue.enqueue(json!({ "type": "y" }));

        let reason = FailureReason::ConnectionClosed { code: 1000, reason: String::new() };
        assert_eq!(queue.reject_all(reason.clone()), 2);
        assert!(queue.is_empty());
        assert_eq!(settled(first).unwrap_err().reason, reason);
        assert_eq!(settled(second).unwrap_err().reason, reason);
    }

    #[test]
    fn test_dropping_queue_settles_outstanding_messages() {
        let mut queue = OutboundQueue::new();
        let pending = queue.enqueue(json!({ "type": "orphan" }));
        drop(queue);
        let failure = settled(pending).unwrap_err();
        assert_eq!(failure.reason, FailureReason::ClientDropped);
        assert_eq!(failure.payload["type"], "orphan");
    }
}

//! # events
//!
//! Defines [`EngineEvent`] — ทุก Event ที่ Engine Broadcast ออกไปผ่าน WebSocket
//! (`/ws/monitor`) ให้ Dashboard ดูแบบ read-only
//!
//! ใช้ `tokio::sync::broadcast::Sender<String>` โดยแปลง Event เป็น JSON
//! String ก่อนส่ง เพื่อหลีกเลี่ยง Clone constraints ที่ซับซ้อน

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{CloseReason, Decision, Direction};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEvent {
    /// Decision ผ่าน Router แล้ว (ไม่ว่าจะเทรดได้หรือไม่)
    SignalProduced {
        signal_id: Uuid,
        path:      String,
        decision:  Box<Decision>,
    },

    /// Gate ไม่ให้ผ่าน
    SignalRejected {
        signal_id: Uuid,
        asset:     String,
        rejection: String,
    },

    /// MT5 รับ Order แล้ว
    OrderPlaced {
        trade_id:  Uuid,
        asset:     String,
        direction: Direction,
        ticket:    u64,
        lots:      f64,
        entry:     f64,
        sl:        f64,
        tp:        f64,
    },

    /// Sizing ไม่ผ่าน หรือ MT5 ปฏิเสธ / ส่งไม่ถึง
    OrderFailed {
        signal_id: Uuid,
        asset:     String,
        error:     String,
    },

    /// Trade ปิดแล้ว (TP / SL / Manual)
    TradeClosed {
        trade_id:   Uuid,
        asset:      String,
        ticket:     u64,
        exit_price: f64,
        pnl:        f64,
        reason:     CloseReason,
    },

    /// Tick ของ asset นี้ถูกข้าม (ไม่มีข้อมูล, นอก Session, หยุดชั่วคราว)
    TickSkipped {
        asset:  String,
        reason: String,
    },
}

impl EngineEvent {
    /// แปลงเป็น JSON String สำหรับส่งผ่าน WebSocket
    #[inline]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"event":"SERIALIZATION_ERROR"}"#.to_string())
    }
}

/// Cloneable handle over the broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<String>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// ไม่ panic ถ้าไม่มี listener (headless mode)
    pub fn publish(&self, event: &EngineEvent) {
        let _ = self.tx.send(event.to_json());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_screaming_snake() {
        let json = EngineEvent::TickSkipped { asset: "US100".into(), reason: "paused".into() }.to_json();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["event"], "TICK_SKIPPED");
        assert_eq!(v["asset"], "US100");
    }

    #[tokio::test]
    async fn publish_without_listeners_is_fine_and_subscribers_receive() {
        let bus = EventBus::default();
        bus.publish(&EngineEvent::TickSkipped { asset: "X".into(), reason: "r".into() });

        let mut rx = bus.subscribe();
        bus.publish(&EngineEvent::TickSkipped { asset: "XAUUSD".into(), reason: "no_data".into() });
        let msg = rx.recv().await.unwrap();
        assert!(msg.contains("XAUUSD"));
    }
}

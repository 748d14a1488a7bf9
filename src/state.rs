//! # state
//!
//! Shared state ของ monitoring surface — read-only view เหนือ [`Store`] และ
//! [`EventBus`] ที่ทั้งสอง loop ใช้ร่วมกัน
//!
//! `Arc<AppState>` ถูก clone เข้าไปในทุก Axum handler ผ่าน
//! `axum::extract::State` (O(1))

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::engine::session::{Clock, SessionClock};
use crate::events::EventBus;
use crate::store::Store;

// ─── AppState ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub store:      Arc<dyn Store>,
    /// Subscribe-only from handlers
    pub events:     EventBus,
    pub clock:      Arc<dyn Clock>,
    pub session:    SessionClock,
    pub assets:     Vec<String>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        store:   Arc<dyn Store>,
        events:  EventBus,
        clock:   Arc<dyn Clock>,
        session: SessionClock,
        assets:  Vec<String>,
    ) -> Self {
        let started_at = clock.now();
        Self { store, events, clock, session, assets, started_at }
    }
}

/// Convenience type alias so callers can write `SharedState`.
pub type SharedState = Arc<AppState>;

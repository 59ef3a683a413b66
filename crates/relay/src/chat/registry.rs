// Lazily created rooms keyed by stream id.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::room::{Room, RoomSettings};
use crate::metrics;

pub const DEFAULT_RETIRE_GRACE: Duration = Duration::from_secs(5);

/// Owns every active room.
///
/// Lock order is always registry before room; rooms never reach back into
/// the registry.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    settings: RoomSettings,
    retire_grace: Duration,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(RoomSettings::default(), DEFAULT_RETIRE_GRACE)
    }
}

impl RoomRegistry {
    pub fn new(settings: RoomSettings, retire_grace: Duration) -> Self {
        Self { rooms: RwLock::new(HashMap::new()), settings, retire_grace }
    }

    /// Return the room for `room_id`, creating it on first use.
    ///
    /// Concurrent callers for the same id always get the same room.
    pub async fn get_or_create(&self, room_id: &str) -> Arc<Room> {
        if let Some(room) = self.rooms.read().await.get(room_id) {
            return Arc::clone(room);
        }

        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(room_id.to_string()).or_insert_with(|| {
            info!(room_id = %room_id, "creating chat room");
            Arc::new(Room::new(room_id, self.settings))
        });
        let room = Arc::clone(room);
        metrics::set_active_rooms(rooms.len());
        room
    }

    pub async fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Retire `room` once the grace period passes, unless it is rejoined in
    /// the meantime. A zero grace retires immediately.
    ///
    /// `vacancy` is the generation reported by the leave that emptied the
    /// room. A timer whose room was emptied again later does nothing; the
    /// later leave owns retirement.
    pub async fn schedule_retire(self: &Arc<Self>, room: &Arc<Room>, vacancy: u64) {
        if self.retire_grace.is_zero() {
            self.retire_vacant(room, vacancy).await;
            return;
        }

        let registry = Arc::clone(self);
        let room = Arc::clone(room);
        let grace = self.retire_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            registry.retire_vacant(&room, vacancy).await;
        });
    }

    /// Drop `room` if it is still the registered room for its id and has
    /// stayed empty since `vacancy`. History goes with it.
    async fn retire_vacant(&self, room: &Arc<Room>, vacancy: u64) -> bool {
        let mut rooms = self.rooms.write().await;
        let room_id = room.id();
        if !rooms.get(room_id).is_some_and(|current| Arc::ptr_eq(current, room)) {
            return false;
        }
        if !room.retire_if_empty(vacancy).await {
            debug!(room_id = %room_id, vacancy, "room reused before retirement");
            return false;
        }

        rooms.remove(room_id);
        metrics::set_active_rooms(rooms.len());
        info!(room_id = %room_id, "retired empty chat room");
        true
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub fn settings(&self) -> RoomSettings {
        self.settings
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use chrono::Utc;
    use livechat_common::types::Role;
    use uuid::Uuid;

    use super::RoomRegistry;
    use crate::chat::{presence::Member, room::RoomSettings};

    fn member() -> Member {
        Member { user_id: None, username: "A".into(), role: Role::Viewer, joined_at: Utc::now() }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_get_or_create_yields_one_room() {
        let registry = Arc::new(RoomRegistry::default());
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move { registry.get_or_create("42").await }));
        }

        let mut rooms = Vec::new();
        for task in tasks {
            rooms.push(task.await.expect("task should complete"));
        }

        assert!(rooms.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn occupied_rooms_are_not_retired() {
        let registry = RoomRegistry::default();
        let room = registry.get_or_create("42").await;
        room.join(Uuid::new_v4(), member()).await.expect("join should succeed");

        assert!(!registry.retire_vacant(&room, 0).await);
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn retired_room_is_replaced_with_empty_history() {
        let registry = Arc::new(RoomRegistry::new(RoomSettings::default(), Duration::ZERO));
        let room = registry.get_or_create("42").await;
        let session_id = Uuid::new_v4();
        room.join(session_id, member()).await.expect("join should succeed");
        room.publish(crate::chat::room::Draft::User { session_id, body: "hi".into() })
            .await
            .expect("publish should succeed");
        let left = room.leave(session_id).await;

        registry.schedule_retire(&room, left.vacancy).await;
        assert!(registry.get("42").await.is_none());
        assert!(room.is_retired().await);

        let fresh = registry.get_or_create("42").await;
        assert!(!Arc::ptr_eq(&room, &fresh));
        assert!(fresh.history().await.is_empty());
    }

    #[tokio::test]
    async fn grace_period_lets_rejoin_keep_the_room() {
        let registry =
            Arc::new(RoomRegistry::new(RoomSettings::default(), Duration::from_millis(50)));
        let room = registry.get_or_create("42").await;
        registry.schedule_retire(&room, 0).await;

        room.join(Uuid::new_v4(), member()).await.expect("join should succeed");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let current = registry.get("42").await.expect("room should survive the grace period");
        assert!(Arc::ptr_eq(&room, &current));
    }

    #[tokio::test]
    async fn grace_period_retires_room_left_empty() {
        let registry =
            Arc::new(RoomRegistry::new(RoomSettings::default(), Duration::from_millis(50)));
        let room = registry.get_or_create("42").await;
        registry.schedule_retire(&room, 0).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(registry.get("42").await.is_none());
    }

    #[tokio::test]
    async fn earlier_timer_does_not_cut_a_later_grace_period_short() {
        let registry =
            Arc::new(RoomRegistry::new(RoomSettings::default(), Duration::from_millis(100)));
        let room = registry.get_or_create("42").await;

        let first = Uuid::new_v4();
        room.join(first, member()).await.expect("join should succeed");
        let left = room.leave(first).await;
        registry.schedule_retire(&room, left.vacancy).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        let second = Uuid::new_v4();
        room.join(second, member()).await.expect("rejoin should succeed");
        let left = room.leave(second).await;
        registry.schedule_retire(&room, left.vacancy).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        let current = registry.get("42").await.expect("room should outlive the first timer");
        assert!(Arc::ptr_eq(&room, &current));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(registry.get("42").await.is_none());
        assert!(room.is_retired().await);
    }

    #[tokio::test]
    async fn timer_for_a_replaced_room_leaves_the_new_room_alone() {
        let registry =
            Arc::new(RoomRegistry::new(RoomSettings::default(), Duration::from_millis(50)));
        let old = registry.get_or_create("42").await;
        registry.schedule_retire(&old, 0).await;
        assert!(registry.retire_vacant(&old, 0).await);

        let fresh = registry.get_or_create("42").await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let current = registry.get("42").await.expect("fresh room should survive");
        assert!(Arc::ptr_eq(&fresh, &current));
    }
}

use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::models::{EventId, SeatSnapshot};
use crate::redis_client::RedisClient;

// Кеш снимков занятых мест. Только для отображения: решения о брони всегда
// принимает хранилище, кеш может отставать на TTL.
#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    ttl_seconds: u64,
}

fn seats_key(event_id: EventId) -> String {
    format!("seats:{}", event_id)
}

impl CacheService {
    pub fn new(redis: RedisClient, ttl_seconds: u64) -> Self {
        Self {
            redis,
            ttl_seconds: ttl_seconds.max(1),
        }
    }

    // Получить снимок из кеша; любая ошибка Redis = промах
    pub async fn get_seat_snapshot(&self, event_id: EventId) -> Option<SeatSnapshot> {
        match self.get_snapshot_from_cache(event_id).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(%event_id, "Seat snapshot cache read failed: {}", e);
                None
            }
        }
    }

    pub async fn save_seat_snapshot(&self, snapshot: &SeatSnapshot) {
        if let Err(e) = self.save_snapshot_to_cache(snapshot).await {
            warn!(event_id = %snapshot.event_id, "Seat snapshot cache write failed: {}", e);
        }
    }

    // Инвалидировать кеш мест
    pub async fn invalidate_seats(&self, event_id: EventId) {
        let mut conn = self.redis.conn.clone();
        let result: Result<(), _> = conn.del(seats_key(event_id)).await;
        match result {
            Ok(()) => debug!(%event_id, "Invalidated seats cache"),
            Err(e) => warn!(%event_id, "Failed to invalidate seats cache: {}", e),
        }
    }

    // === Работа с кешем ===

    async fn get_snapshot_from_cache(&self, event_id: EventId) -> Result<Option<SeatSnapshot>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let data: Option<String> = conn.get(seats_key(event_id)).await?;
        let Some(data) = data else {
            return Ok(None);
        };
        let snapshot = serde_json::from_str(&data).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error"))
        })?;
        Ok(Some(snapshot))
    }

    async fn save_snapshot_to_cache(&self, snapshot: &SeatSnapshot) -> Result<(), redis::RedisError> {
        let data = serde_json::to_string(snapshot).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error"))
        })?;
        let mut conn = self.redis.conn.clone();
        conn.set_ex(seats_key(snapshot.event_id), data, self.ttl_seconds).await
    }
}

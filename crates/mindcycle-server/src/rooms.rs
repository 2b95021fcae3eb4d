// Channel rooms
//
// One broadcast channel per channel id. A loop's events fan out only to
// sockets joined to the loop's channel room.

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use mindcycle_contracts::EventEnvelope;

/// Room fanout registry
pub struct RoomRegistry {
    rooms: DashMap<Uuid, broadcast::Sender<EventEnvelope>>,
    capacity: usize,
}

impl RoomRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, channel_id: Uuid) -> broadcast::Sender<EventEnvelope> {
        self.rooms
            .entry(channel_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Join a room, receiving every envelope published after this call
    pub fn join(&self, channel_id: Uuid) -> broadcast::Receiver<EventEnvelope> {
        self.sender(channel_id).subscribe()
    }

    /// Publish to a room; returns the number of live receivers
    pub fn publish(&self, channel_id: Uuid, envelope: EventEnvelope) -> usize {
        match self.rooms.get(&channel_id) {
            Some(sender) => sender.send(envelope).unwrap_or(0),
            // Nobody ever joined this room; nothing to fan out
            None => 0,
        }
    }

    /// Number of sockets currently joined to a room
    pub fn member_count(&self, channel_id: Uuid) -> usize {
        self.rooms
            .get(&channel_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(512)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindcycle_contracts::{EventPayload, LoopStatus};

    fn started(channel_id: Uuid) -> EventEnvelope {
        EventEnvelope::new(
            Uuid::now_v7(),
            channel_id,
            EventPayload::Started {
                loop_id: Uuid::now_v7(),
                status: LoopStatus::Starting,
            },
        )
    }

    #[tokio::test]
    async fn test_room_isolation() {
        let rooms = RoomRegistry::default();
        let channel_a = Uuid::now_v7();
        let channel_b = Uuid::now_v7();

        let mut rx_a = rooms.join(channel_a);
        let mut rx_b = rooms.join(channel_b);

        rooms.publish(channel_a, started(channel_a));

        let received = rx_a.recv().await.unwrap();
        assert_eq!(received.channel_id, channel_a);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_members() {
        let rooms = RoomRegistry::default();
        let channel = Uuid::now_v7();
        assert_eq!(rooms.publish(channel, started(channel)), 0);
    }

    #[tokio::test]
    async fn test_member_count() {
        let rooms = RoomRegistry::default();
        let channel = Uuid::now_v7();
        assert_eq!(rooms.member_count(channel), 0);

        let _rx1 = rooms.join(channel);
        let _rx2 = rooms.join(channel);
        assert_eq!(rooms.member_count(channel), 2);

        drop(_rx1);
        assert_eq!(rooms.member_count(channel), 1);
    }
}

//! Redis Streams Broker Adapter
//!
//! Maps the broker port onto Redis Streams:
//!
//! | Port operation | Redis command                                     |
//! |----------------|---------------------------------------------------|
//! | `publish`      | `XADD <topic> MAXLEN ~ <n> * key <k> value <v>`   |
//! | `tail_id`      | `XREVRANGE <topic> + - COUNT 1`                   |
//! | `subscribe`    | `XGROUP CREATE <topic> <group> $ MKSTREAM`        |
//! | `next`         | `XREADGROUP GROUP <group> <consumer> BLOCK <ms>`  |
//! | `ack`          | `XACK <topic> <group> <id>`                       |
//! | `close`        | `XGROUP DELCONSUMER <topic> <group> <consumer>`   |
//!
//! A group that already exists is moved to `$` on subscribe so that every
//! establishment starts at the tail, whatever offset a previous run left.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::{ConnectionLike, MultiplexedConnection};
use redis::streams::{
    StreamId, StreamMaxlen, StreamRangeReply, StreamReadOptions, StreamReadReply,
};

use crate::broker::{
    Broker, BrokerError, BrokerMessage, MessageId, StartPosition, Subscription,
};

/// Stream field holding the grouping key.
const KEY_FIELD: &str = "key";

/// Stream field holding the message value.
const VALUE_FIELD: &str = "value";

/// Tuning for the Redis Streams adapter.
#[derive(Debug, Clone)]
pub struct RedisStreamSettings {
    /// Approximate number of entries retained per stream.
    pub max_len: usize,
    /// How long a single `XREADGROUP` blocks waiting for entries.
    pub block: Duration,
    /// Maximum entries fetched per `XREADGROUP`.
    pub batch_size: usize,
}

impl Default for RedisStreamSettings {
    fn default() -> Self {
        Self {
            max_len: 1_000,
            block: Duration::from_millis(1_000),
            batch_size: 64,
        }
    }
}

/// Broker backed by Redis Streams.
///
/// Construction does not touch the network; connections are opened on
/// first use (`ping`, `publish`) or per subscription.
pub struct RedisStreamBroker {
    client: redis::Client,
    settings: RedisStreamSettings,
    publisher: tokio::sync::OnceCell<MultiplexedConnection>,
}

impl RedisStreamBroker {
    /// Create a broker for the given `redis://` URL.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Connection` if the URL is malformed.
    pub fn new(url: &str, settings: RedisStreamSettings) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url).map_err(connection_error)?;
        Ok(Self {
            client,
            settings,
            publisher: tokio::sync::OnceCell::new(),
        })
    }

    async fn publisher(&self) -> Result<MultiplexedConnection, BrokerError> {
        self.publisher
            .get_or_try_init(|| async {
                self.client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(connection_error)
            })
            .await
            .cloned()
    }

    async fn ensure_group(
        conn: &mut MultiplexedConnection,
        topic: &str,
        group: &str,
        start: StartPosition,
    ) -> Result<(), BrokerError> {
        let id = start_id(start);
        let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(topic, group, id).await;

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                let mut cmd = redis::cmd("XGROUP");
                cmd.arg("SETID").arg(topic).arg(group).arg(id);
                conn.req_packed_command(&cmd)
                    .await
                    .map(|_| ())
                    .map_err(subscribe_error)
            }
            Err(e) => Err(subscribe_error(e)),
        }
    }
}

#[async_trait]
impl Broker for RedisStreamBroker {
    async fn ping(&self) -> Result<(), BrokerError> {
        let mut conn = self.publisher().await?;
        let mut cmd = redis::cmd("PING");
        cmd.arg("price-bus");
        conn.req_packed_command(&cmd)
            .await
            .map(|_| ())
            .map_err(connection_error)
    }

    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<String, BrokerError> {
        let mut conn = self.publisher().await?;
        let fields: [(&str, &[u8]); 2] = [(KEY_FIELD, key.as_bytes()), (VALUE_FIELD, payload)];

        conn.xadd_maxlen(topic, StreamMaxlen::Approx(self.settings.max_len), "*", &fields)
            .await
            .map_err(|e| BrokerError::Publish {
                message: e.to_string(),
            })
    }

    async fn tail_id(&self, topic: &str) -> Result<Option<MessageId>, BrokerError> {
        let mut conn = self.publisher().await?;
        let reply: StreamRangeReply = conn
            .xrevrange_count(topic, "+", "-", 1)
            .await
            .map_err(connection_error)?;

        reply
            .ids
            .first()
            .map(|entry| entry.id.parse())
            .transpose()
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        start: StartPosition,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        // Blocking reads get their own connection so they never stall publishes.
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(subscribe_error)?;

        Self::ensure_group(&mut conn, topic, group, start).await?;

        let consumer = format!("{group}-{}", uuid::Uuid::new_v4().simple());
        tracing::debug!(topic, group, consumer = %consumer, "Redis stream subscription established");

        Ok(Box::new(RedisStreamSubscription {
            conn,
            topic: topic.to_string(),
            group: group.to_string(),
            consumer,
            settings: self.settings.clone(),
            pending: VecDeque::new(),
            closed: false,
        }))
    }
}

/// Subscription handle returned by [`RedisStreamBroker`].
pub struct RedisStreamSubscription {
    conn: MultiplexedConnection,
    topic: String,
    group: String,
    consumer: String,
    settings: RedisStreamSettings,
    pending: VecDeque<BrokerMessage>,
    closed: bool,
}

impl RedisStreamSubscription {
    async fn fetch(&mut self) -> Result<(), BrokerError> {
        let block_ms = usize::try_from(self.settings.block.as_millis()).unwrap_or(usize::MAX);
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .block(block_ms)
            .count(self.settings.batch_size);

        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(&[self.topic.as_str()], &[">"], &options)
            .await
            .map_err(|e| BrokerError::Receive {
                message: e.to_string(),
            })?;

        if let Some(reply) = reply {
            for stream in reply.keys {
                self.pending
                    .extend(stream.ids.iter().map(stream_entry_to_message));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Subscription for RedisStreamSubscription {
    async fn next(&mut self) -> Result<BrokerMessage, BrokerError> {
        loop {
            if self.closed {
                return Err(BrokerError::Closed);
            }
            if let Some(message) = self.pending.pop_front() {
                return Ok(message);
            }
            self.fetch().await?;
        }
    }

    async fn ack(&mut self, message: &BrokerMessage) -> Result<(), BrokerError> {
        self.conn
            .xack::<_, _, _, ()>(&self.topic, &self.group, &[message.id.as_str()])
            .await
            .map_err(|e| BrokerError::Receive {
                message: e.to_string(),
            })
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.pending.clear();

        self.conn
            .xgroup_delconsumer::<_, _, _, ()>(&self.topic, &self.group, &self.consumer)
            .await
            .map_err(connection_error)
    }
}

const fn start_id(start: StartPosition) -> &'static str {
    match start {
        StartPosition::Latest => "$",
        StartPosition::Earliest => "0",
    }
}

fn stream_entry_to_message(entry: &StreamId) -> BrokerMessage {
    BrokerMessage {
        id: entry.id.clone(),
        key: entry.get::<String>(KEY_FIELD),
        payload: entry.get::<Vec<u8>>(VALUE_FIELD).unwrap_or_default(),
    }
}

fn connection_error(e: redis::RedisError) -> BrokerError {
    BrokerError::Connection {
        message: e.to_string(),
    }
}

fn subscribe_error(e: redis::RedisError) -> BrokerError {
    BrokerError::Subscribe {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;
    use crate::reading::PriceReading;

    #[test_case(StartPosition::Latest, "$" ; "latest starts at tail")]
    #[test_case(StartPosition::Earliest, "0" ; "earliest starts at head")]
    fn start_ids(start: StartPosition, expected: &str) {
        assert_eq!(start_id(start), expected);
    }

    #[test]
    fn stream_entry_maps_fields() {
        let payload = PriceReading::new("X", 101.5, 1000).encode().unwrap();
        let mut map = HashMap::new();
        map.insert(
            KEY_FIELD.to_string(),
            redis::Value::BulkString(b"X".to_vec()),
        );
        map.insert(
            VALUE_FIELD.to_string(),
            redis::Value::BulkString(payload.clone()),
        );
        let entry = StreamId {
            id: "1700000000000-0".to_string(),
            map,
        };

        let message = stream_entry_to_message(&entry);
        assert_eq!(message.id, "1700000000000-0");
        assert_eq!(message.key.as_deref(), Some("X"));
        assert_eq!(message.payload, payload);
        assert_eq!(message.reading().unwrap().price, 101.5);
    }

    #[test]
    fn stream_entry_without_value_fails_decode() {
        let entry = StreamId {
            id: "1-0".to_string(),
            map: HashMap::new(),
        };
        let message = stream_entry_to_message(&entry);
        assert!(message.key.is_none());
        assert!(message.reading().is_err());
    }

    #[test]
    fn malformed_url_is_connection_error() {
        let result = RedisStreamBroker::new("not a url", RedisStreamSettings::default());
        assert!(matches!(result, Err(BrokerError::Connection { .. })));
    }

    #[test]
    fn settings_defaults() {
        let settings = RedisStreamSettings::default();
        assert_eq!(settings.max_len, 1_000);
        assert_eq!(settings.block, Duration::from_millis(1_000));
        assert_eq!(settings.batch_size, 64);
    }
}

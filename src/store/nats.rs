//! Store backed by a NATS JetStream key-value bucket.

use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use super::{Operation, Store, Update, Watch, WatchEvent, matches, validate_key, validate_pattern};
use crate::error::{Result, SdError};

fn unavailable(e: impl std::fmt::Display) -> SdError {
    SdError::StoreUnavailable(e.to_string())
}

/// Connect to the NATS server.
///
/// The client keeps retrying in the background, both for the initial
/// connection and after any later disconnect.
pub async fn connect(url: &str) -> Result<async_nats::Client> {
    let client = async_nats::ConnectOptions::new()
        .retry_on_initial_connect()
        .event_callback(|event| async move {
            match event {
                async_nats::Event::Connected => info!("NATS connected"),
                async_nats::Event::Disconnected => warn!("NATS disconnected"),
                other => debug!(event = %other, "NATS event"),
            }
        })
        .connect(url)
        .await
        .map_err(unavailable)?;
    info!(url, "NATS client created");
    Ok(client)
}

pub struct NatsStore {
    kv: kv::Store,
}

impl NatsStore {
    /// Open `bucket`, creating it when it does not exist yet.
    pub async fn open(client: async_nats::Client, bucket: &str) -> Result<Self> {
        let js = jetstream::new(client);

        let kv = match js.get_key_value(bucket).await {
            Ok(kv) => kv,
            Err(e) => {
                debug!(bucket, error = %e, "Bucket lookup failed, creating");
                js.create_key_value(kv::Config {
                    bucket: bucket.to_string(),
                    history: 1,
                    ..Default::default()
                })
                .await
                .map_err(unavailable)?
            }
        };

        info!(bucket, "Key-value bucket ready");
        Ok(Self { kv })
    }

    async fn all_keys(&self) -> Result<Vec<String>> {
        let mut keys = self.kv.keys().await.map_err(unavailable)?;
        let mut out = Vec::new();
        while let Some(key) = keys.next().await {
            out.push(key.map_err(unavailable)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl Store for NatsStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        match self.kv.get(key).await.map_err(unavailable)? {
            Some(value) => Ok(value.to_vec()),
            None => Err(SdError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        validate_key(key)?;
        self.kv
            .put(key, Bytes::from(value))
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> Result<()> {
        validate_key(key)?;
        match self.kv.create(key, Bytes::from(value)).await {
            Ok(_) => Ok(()),
            Err(e) if matches!(e.kind(), kv::CreateErrorKind::AlreadyExists) => {
                Err(SdError::AlreadyExists {
                    key: key.to_string(),
                })
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.kv.delete(key).await.map_err(unavailable)
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .all_keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn watch(&self, pattern: &str) -> Result<Watch> {
        validate_pattern(pattern)?;

        // Open the live subscription before reading current values so a
        // write racing the replay shows up at least once.
        let mut live = self.kv.watch(pattern).await.map_err(unavailable)?;

        let mut replay = Vec::new();
        for key in self.all_keys().await? {
            if !matches(pattern, &key) {
                continue;
            }
            match self.kv.get(&key).await {
                Ok(Some(value)) => replay.push(Update::put(key, value.to_vec())),
                Ok(None) => {}
                Err(e) => warn!(%key, error = %e, "Skipping key during replay"),
            }
        }

        let (watch, mut feed) = Watch::channel(pattern);
        let pattern = pattern.to_string();
        debug!(%pattern, replay = replay.len(), "Watch opened");

        tokio::spawn(async move {
            for update in replay {
                if !feed.send(WatchEvent::Update(update)).await {
                    return;
                }
            }
            if !feed.send(WatchEvent::ReplayComplete).await {
                return;
            }

            loop {
                let entry = tokio::select! {
                    () = feed.cancelled() => break,
                    entry = live.next() => entry,
                };

                let update = match entry {
                    Some(Ok(entry)) => match entry.operation {
                        kv::Operation::Put => Update::put(entry.key, entry.value.to_vec()),
                        kv::Operation::Delete | kv::Operation::Purge => Update::delete(entry.key),
                    },
                    Some(Err(e)) => {
                        warn!(%pattern, error = %e, "Watch stream error");
                        continue;
                    }
                    None => break,
                };

                if update.operation == Operation::Delete {
                    debug!(%pattern, key = %update.key, "Watch saw delete");
                }
                if !feed.send(WatchEvent::Update(update)).await {
                    break;
                }
            }
            debug!(%pattern, "Watch closed");
        });

        Ok(watch)
    }
}

//! roomsync-demo: two in-process clients sharing one in-memory store
//!
//! The first client connects without a room id, gets redirected, reconnects,
//! and then both clients move objects and watch each other's updates arrive.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use roomsync::ids::{IdSource, RandomIds};
use roomsync::{
    ConnectOutcome, ConnectionContext, MemoryStore, RoomId, RoomInfo, RoomSync, SenderId,
    SharedObject, SyncConfig, SyncEvent, SyncedObject, Vector3,
};
use serde_json::{json, Value as JsonValue};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const EVENT_WAIT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "roomsync-demo")]
#[command(about = "Two clients syncing object transforms through a shared room")]
struct Cli {
    /// Page URL the first client connects from; add `?room=roomN` to join a room
    #[arg(short, long, default_value = "https://demo.local/scene/")]
    url: String,

    /// YAML sync config
    #[arg(short, long, env = "ROOMSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Moves each client makes
    #[arg(short, long, default_value_t = 5)]
    moves: u32,
}

/// Names each demo client after itself so the two never share a sender id.
/// Room ids are still random.
struct DemoIds {
    sender_id: SenderId,
}

impl IdSource for DemoIds {
    fn sender_id(&self) -> SenderId {
        self.sender_id.clone()
    }

    fn room_id(&self) -> RoomId {
        RandomIds.room_id()
    }

    fn room_name_number(&self) -> u32 {
        RandomIds.room_name_number()
    }
}

struct Client {
    name: &'static str,
    sync: RoomSync,
    events: broadcast::Receiver<SyncEvent>,
    cube: SharedObject,
    sphere: SharedObject,
}

impl Client {
    async fn new(name: &'static str, store: &MemoryStore, config: &SyncConfig) -> Result<Self> {
        let sync = RoomSync::builder(Arc::new(store.clone()), config.clone())
            .ids(Arc::new(DemoIds {
                sender_id: SenderId::new(name),
            }))
            .build()?;
        let events = sync.subscribe_events();
        let cube = SyncedObject::new().into_shared();
        let sphere = SyncedObject::new()
            .with_sync_data(color("white"))
            .into_shared();
        sync.register(cube.clone(), "cube").await?;
        sync.register(sphere.clone(), "sphere").await?;
        info!(client = name, sender_id = %sync.sender_id(), "Client ready to connect");
        Ok(Self {
            name,
            sync,
            events,
            cube,
            sphere,
        })
    }

    /// Connect, following one redirect if the URL carried no room.
    async fn join(&self, url: &str) -> Result<RoomInfo> {
        let mut context = ConnectionContext::new(url);
        for _ in 0..2 {
            match self.sync.connect(&context).await? {
                ConnectOutcome::Ready(info) => return Ok(info),
                ConnectOutcome::Redirect { room_id, url } => {
                    info!(client = self.name, %room_id, %url, "Redirected, reconnecting");
                    context = ConnectionContext::new(url);
                }
                ConnectOutcome::Degraded { room_id, error } => {
                    bail!("{}: room {} unavailable: {}", self.name, room_id, error)
                }
                ConnectOutcome::NoObjects => bail!("{}: no objects registered", self.name),
            }
        }
        bail!("{}: redirected more than once", self.name)
    }

    /// Wait for the next event `matches` accepts, printing latency reports on the way.
    async fn wait_for(&mut self, matches: impl Fn(&SyncEvent) -> bool) -> Result<SyncEvent> {
        loop {
            let event = timeout(EVENT_WAIT, self.events.recv())
                .await
                .with_context(|| format!("{}: timed out waiting for sync event", self.name))?
                .with_context(|| format!("{}: event channel closed", self.name))?;
            if let SyncEvent::LatencyReported(report) = &event {
                println!(
                    "{} latency samples {:?} ms, average {} ms",
                    self.name, report.samples, report.average
                );
            }
            if matches(&event) {
                return Ok(event);
            }
        }
    }

    async fn wait_initialized(&mut self) -> Result<()> {
        let mut remaining = 2;
        while remaining > 0 {
            self.wait_for(|e| matches!(e, SyncEvent::Initialized { .. }))
                .await?;
            remaining -= 1;
        }
        Ok(())
    }
}

fn color(name: &str) -> JsonValue {
    json!({ "color": name })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SyncConfig::load_from_file(path)?,
        None => SyncConfig::default(),
    };
    info!(app_id = %config.app_id, "Starting demo");

    let store = MemoryStore::new();
    let mut alice = Client::new("alice", &store, &config).await?;
    let mut bob = Client::new("bob", &store, &config).await?;

    let room = alice.join(&cli.url).await?;
    alice.wait_initialized().await?;
    println!("alice is in {} ({})", room.identifier, room.shareable_url);

    let bob_room = bob.join(&room.shareable_url).await?;
    bob.wait_initialized().await?;
    if bob_room.handle != room.handle {
        warn!(alice = %room.handle, bob = %bob_room.handle, "Clients ended up in different rooms");
    }

    for step in 1..=cli.moves {
        let offset = f64::from(step);

        alice.cube.write().await.position = Vector3::new(offset, 0.0, 0.0);
        alice.sync.save_all_changed().await;
        bob.wait_for(|e| matches!(e, SyncEvent::RemoteApplied { key, .. } if key == "cube"))
            .await?;

        {
            let mut sphere = bob.sphere.write().await;
            sphere.rotation = Vector3::new(0.0, offset / 10.0, 0.0);
            sphere.user_data.sync_data = Some(color(if step % 2 == 0 {
                "red"
            } else {
                "blue"
            }));
        }
        bob.sync.save(&bob.sphere).await;
        alice
            .wait_for(|e| matches!(e, SyncEvent::RemoteApplied { key, .. } if key == "sphere"))
            .await?;

        println!(
            "step {step}: bob sees cube at {:?}, alice sees sphere rotated {:?}",
            bob.cube.read().await.position,
            alice.sphere.read().await.rotation
        );
    }

    alice.sync.disconnect().await;
    bob.sync.disconnect().await;
    println!("{} store operations", store.operations().len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clients_have_distinct_sender_ids() {
        let store = MemoryStore::new();
        let config = SyncConfig::default();
        let alice = Client::new("alice", &store, &config).await.unwrap();
        let bob = Client::new("bob", &store, &config).await.unwrap();

        assert_eq!(alice.sync.sender_id(), &SenderId::new("alice"));
        assert_eq!(bob.sync.sender_id(), &SenderId::new("bob"));
    }
}

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use chirp_core::{
    bus::{Bus, Message, MessageStream},
    error::BusError,
};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_PACKET_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// One broker session. Incoming publishes are fanned out to every stream
/// returned by [`Bus::incoming`]; the streams end when the session drops.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    template: Arc<Mutex<broadcast::Receiver<Message>>>,
    closed: Arc<AtomicBool>,
}

impl MqttBus {
    pub async fn connect(settings: &MqttSettings) -> Result<Self> {
        let mut opts = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        opts.set_keep_alive(Duration::from_secs(30));
        opts.set_clean_session(true);
        opts.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        if let Some(user) = &settings.username {
            opts.set_credentials(user, settings.password.clone().unwrap_or_default());
        }

        let (client, mut eventloop) = AsyncClient::new(opts, 100);
        tokio::time::timeout(CONNECT_TIMEOUT, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| BusError::ConnectTimeout(CONNECT_TIMEOUT))?
            .with_context(|| format!("connect to mqtt broker {}:{}", settings.host, settings.port))?;
        tracing::info!("connected to mqtt broker {}:{}", settings.host, settings.port);

        let (tx, rx) = broadcast::channel(4096);
        let closed = Arc::new(AtomicBool::new(false));
        tokio::spawn(forward(eventloop, tx, Arc::clone(&closed)));

        Ok(Self { client, template: Arc::new(Mutex::new(rx)), closed })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        if let Event::Incoming(Incoming::ConnAck(ack)) = eventloop.poll().await? {
            if ack.code == ConnectReturnCode::Success {
                return Ok(());
            }
            return Err(BusError::Refused(format!("{:?}", ack.code)).into());
        }
    }
}

async fn forward(mut eventloop: EventLoop, tx: broadcast::Sender<Message>, closed: Arc<AtomicBool>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::Publish(p))) => {
                let _ = tx.send(Message { topic: p.topic, payload: p.payload, retain: p.retain });
            }
            Ok(_) => {}
            Err(e) => {
                if !closed.load(Ordering::SeqCst) {
                    tracing::error!("mqtt connection lost: {e}");
                }
                break;
            }
        }
    }
}

#[async_trait]
impl Bus for MqttBus {
    async fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed.into());
        }
        self.client
            .publish_bytes(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .with_context(|| format!("publish mqtt message to {topic}"))?;
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<()> {
        self.client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .with_context(|| format!("subscribe to {filter}"))?;
        tracing::debug!("subscribed to {filter}");
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.client.unsubscribe(filter).await.with_context(|| format!("unsubscribe from {filter}"))?;
        tracing::debug!("unsubscribed from {filter}");
        Ok(())
    }

    fn incoming(&self) -> Result<MessageStream> {
        let rx = self
            .template
            .lock()
            .map_err(|_| anyhow!("mqtt receiver lock poisoned"))?
            .resubscribe();
        let stream = BroadcastStream::new(rx).filter_map(|item| match item {
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::warn!("mqtt consumer fell behind: {e}");
                None
            }
        });
        Ok(Box::new(stream))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!("mqtt disconnect: {e}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::ErrorKind, net::TcpListener, process::{Child, Command, Stdio}};
    use tokio::time::{sleep, timeout, Duration};

    struct MosquittoGuard(Child);

    impl Drop for MosquittoGuard {
        fn drop(&mut self) {
            let _ = self.0.kill();
        }
    }

    async fn start_broker() -> Result<(MosquittoGuard, u16)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        drop(listener);

        let child = Command::new("mosquitto")
            .args(["-p", &port.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("spawn mosquitto")?;

        let guard = MosquittoGuard(child);
        let mut attempts = 0;
        loop {
            match tokio::net::TcpStream::connect(("127.0.0.1", port)).await {
                Ok(_) => break,
                Err(_) if attempts < 20 => {
                    attempts += 1;
                    sleep(Duration::from_millis(50)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok((guard, port))
    }

    fn settings(port: u16, client_id: &str) -> MqttSettings {
        MqttSettings {
            host: "127.0.0.1".into(),
            port,
            client_id: client_id.into(),
            username: None,
            password: None,
        }
    }

    fn not_installed(e: &anyhow::Error) -> bool {
        e.downcast_ref::<std::io::Error>().map(|io| io.kind()) == Some(ErrorKind::NotFound)
    }

    #[tokio::test]
    async fn publishes_and_receives() -> Result<()> {
        let (_guard, port) = match start_broker().await {
            Ok(ok) => ok,
            Err(e) if not_installed(&e) => {
                eprintln!("skipping publishes_and_receives: mosquitto not installed");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let bus = MqttBus::connect(&settings(port, "test-client")).await?;

        let mut stream = bus.incoming()?;
        bus.subscribe("application/+/status").await?;
        bus.publish("application/1/status", Bytes::from_static(b"initialize"), false).await?;

        let msg = timeout(Duration::from_secs(2), stream.next()).await?.expect("message expected");
        assert_eq!(msg.topic, "application/1/status");
        assert_eq!(msg.payload, Bytes::from_static(b"initialize"));
        bus.close().await?;
        bus.close().await?;
        assert!(bus.publish("application/1/status", Bytes::new(), false).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn retained_configs_reach_new_subscribers() -> Result<()> {
        let (_guard, port) = match start_broker().await {
            Ok(ok) => ok,
            Err(e) if not_installed(&e) => {
                eprintln!("skipping retained_configs_reach_new_subscribers: mosquitto not installed");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let publisher = MqttBus::connect(&settings(port, "test-publisher")).await?;
        publisher
            .publish("ha/sensor/0102/counter/config", Bytes::from_static(b"{}"), true)
            .await?;
        sleep(Duration::from_millis(100)).await;

        let bus = MqttBus::connect(&settings(port, "test-subscriber")).await?;
        let mut stream = bus.incoming()?;
        bus.subscribe("ha/+/+/+/config").await?;
        let msg = timeout(Duration::from_secs(2), stream.next()).await?.expect("retained config");
        assert_eq!(msg.topic, "ha/sensor/0102/counter/config");
        assert!(msg.retain);
        Ok(())
    }
}

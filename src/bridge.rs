//! Wires devices, their logs and the hub together.
//!
//! Each active device gets a reader on the blocking thread pool.
//! A reader appends every line to the device log and only then hands it to the hub,
//! so a subscriber never sees a line which is not in the log.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    actions::{Command, LineEvent},
    config::Config,
    device::{Device, Devices},
    error::Error,
    hub::Hub,
    log_sink::{LogLine, LogSink},
    registry::{Registry, SubscriberId},
    router::CommandRouter,
    serial::{Connection, LineSource, Opener, ReadOutcome},
};

/// Reads one device until it fails or shutdown is asked for.
struct Reader {
    name: String,
    source: LineSource,
    sink: LogSink,
    lines: mpsc::Sender<LogLine>,
    devices: Arc<Devices>,
    shutdown: CancellationToken,
}

impl Reader {
    fn run(mut self) {
        info!("Reading");

        loop {
            if self.shutdown.is_cancelled() {
                debug!("Shutdown");
                return;
            }

            let text = match self.source.read_line() {
                Ok(ReadOutcome::Timeout) => continue,
                Ok(ReadOutcome::Line(text)) => text,
                Err(e) => {
                    warn!(%e, "Read failed, giving up on device");
                    self.devices.fail(&self.name);
                    return;
                }
            };

            let line = LogLine::now(&self.name, text);

            if let Err(e) = self.sink.append(&line) {
                error!(%e, path = ?self.sink.path(), "Log append failed, giving up on device");
                self.devices.fail(&self.name);
                return;
            }

            if self.lines.blocking_send(line).is_err() {
                debug!("Hub gone");
                return;
            }
        }
    }
}

fn open_device(
    device: &Device,
    opener: &dyn Opener,
    config: &Config,
    devices: &Devices,
) -> Option<(LineSource, LogSink)> {
    devices.opening(&device.name);

    let connection = match opener
        .open(device, config.read_timeout())
        .and_then(|port| Connection::new(device.clone(), port))
    {
        Ok(connection) => Arc::new(connection),
        Err(e) => {
            warn!(%device, %e, "Could not open device");
            devices.fail(&device.name);
            return None;
        }
    };

    let sink = match LogSink::open(&config.log_dir, &device.name, config.rotation) {
        Ok(sink) => sink,
        Err(e) => {
            error!(%device, %e, "Could not open log");
            devices.fail(&device.name);
            return None;
        }
    };

    devices.activate(&device.name, Arc::clone(&connection));

    info!(%device, "Active");

    Some((LineSource::new(connection, config.read_timeout()), sink))
}

/// What the transports need in order to serve clients.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    devices: Arc<Devices>,
    registry: Arc<Registry>,
    router: CommandRouter,
    subscriber_capacity: usize,
    log_dir: PathBuf,
}

impl BridgeHandle {
    /// Start receiving every line any device prints from now on.
    ///
    /// The returned receiver must be kept up with,
    /// a subscriber falling more than the configured capacity behind is dropped.
    pub fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<Arc<LineEvent>>) {
        let (tx, rx) = mpsc::channel(self.subscriber_capacity);

        (self.registry.add(tx), rx)
    }

    /// Stop receiving lines. Unsubscribing twice is fine.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.registry.remove(id)
    }

    /// How many subscribers there are.
    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Write a command to its device.
    pub async fn route(&self, command: Command) -> Result<(), Error> {
        self.router.route(command).await
    }

    /// The devices and their states.
    pub fn devices(&self) -> &Arc<Devices> {
        &self.devices
    }

    /// Where device logs are.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

/// The running bridge.
#[derive(Debug)]
pub struct Bridge {
    handle: BridgeHandle,
    shutdown: CancellationToken,
    readers: Vec<JoinHandle<()>>,
    hub: JoinHandle<()>,
}

impl Bridge {
    /// Open every device and start reading.
    ///
    /// Devices which can't be opened are failed and left out,
    /// they don't stop the others.
    /// Cancelling `shutdown` stops all readers.
    pub fn start(
        config: &Config,
        opener: Arc<dyn Opener>,
        shutdown: CancellationToken,
    ) -> Result<Self, Error> {
        config.validate()?;

        let devices = Arc::new(Devices::new(config.resolve_devices()));
        let registry = Arc::new(Registry::default());

        let (lines_tx, lines_rx) = mpsc::channel(config.hub_capacity);

        let hub = tokio::spawn(
            Hub::new(Arc::clone(&registry))
                .run(lines_rx)
                .instrument(info_span!("hub")),
        );

        let readers = devices
            .configured()
            .iter()
            .filter_map(|device| {
                let (source, sink) = open_device(device, opener.as_ref(), config, &devices)?;

                let reader = Reader {
                    name: device.name.clone(),
                    source,
                    sink,
                    lines: lines_tx.clone(),
                    devices: Arc::clone(&devices),
                    shutdown: shutdown.clone(),
                };

                let span = info_span!("device", name = %device.name);

                Some(tokio::task::spawn_blocking(move || {
                    let _span = span.entered();
                    reader.run()
                }))
            })
            .collect::<Vec<_>>();

        info!(
            "{} of {} device(s) active",
            devices.active_count(),
            devices.configured().len()
        );

        let handle = BridgeHandle {
            router: CommandRouter::new(Arc::clone(&devices)),
            devices,
            registry,
            subscriber_capacity: config.subscriber_capacity,
            log_dir: config.log_dir.clone(),
        };

        Ok(Self {
            handle,
            shutdown,
            readers,
            hub,
        })
    }

    /// A handle for serving clients.
    pub fn handle(&self) -> BridgeHandle {
        self.handle.clone()
    }

    /// Stop every reader and wait for lines in flight to be published.
    /// Subscribers are dropped afterwards.
    pub async fn shutdown(self) {
        self.shutdown.cancel();

        for reader in self.readers {
            if let Err(e) = reader.await {
                warn!(?e, "Reader join error");
            }
        }

        // The readers held the only senders.
        if let Err(e) = self.hub.await {
            warn!(?e, "Hub join error");
        }

        self.handle.registry.clear();

        info!("Bridge shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use tokio::time::timeout;

    use super::*;
    use crate::{
        device::{DeviceState, Lookup},
        mock::{MockDevice, MockOpener},
    };

    struct Setup {
        bridge: Bridge,
        handle: BridgeHandle,
        d1: MockDevice,
        logs: TempDir,
    }

    fn config(logs: &TempDir) -> Config {
        Config {
            devices: vec![
                Device::new("d1", "/mock/1", 115_200),
                Device::new("absent", "/mock/absent", 115_200),
            ],
            auto_detect: None,
            log_dir: logs.path().to_owned(),
            read_timeout_ms: 20,
            ..Default::default()
        }
    }

    fn start_with(config: impl FnOnce(&TempDir) -> Config) -> Setup {
        let logs = tempfile::tempdir().unwrap();
        let opener = MockOpener::default();
        let d1 = opener.add("/mock/1");

        let bridge = Bridge::start(
            &config(&logs),
            Arc::new(opener),
            CancellationToken::new(),
        )
        .unwrap();

        Setup {
            handle: bridge.handle(),
            bridge,
            d1,
            logs,
        }
    }

    fn start() -> Setup {
        start_with(config)
    }

    async fn next(rx: &mut mpsc::Receiver<Arc<LineEvent>>) -> Arc<LineEvent> {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("A line should arrive in time")
            .expect("Subscription should be alive")
    }

    #[tokio::test]
    async fn line_is_logged_then_broadcast() {
        let setup = start();
        let (_, mut rx) = setup.handle.subscribe();

        setup.d1.feed("hello\r\n");

        let event = next(&mut rx).await;
        assert_eq!(event.device, "d1");
        assert!(event.text.starts_with('['));
        assert!(event.text.ends_with("] hello\n"));

        // Logged before it was published, so it must be there already.
        let log = std::fs::read_to_string(setup.logs.path().join("d1.log")).unwrap();
        assert_eq!(log, event.text);

        setup.bridge.shutdown().await;
    }

    #[tokio::test]
    async fn lines_keep_their_order() {
        let setup = start();
        let (_, mut rx) = setup.handle.subscribe();

        let words = lipsum::lipsum_words(50)
            .split_whitespace()
            .map(ToOwned::to_owned)
            .collect::<Vec<_>>();

        for word in &words {
            setup.d1.feed(format!("{word}\n"));
        }

        let mut received = vec![];
        for _ in &words {
            let event = next(&mut rx).await;
            received.push(event.text.split_once("] ").unwrap().1.trim_end().to_owned());
        }

        assert_eq!(received, words);

        let log = std::fs::read_to_string(setup.logs.path().join("d1.log")).unwrap();
        let logged = log
            .lines()
            .map(|record| record.split_once("] ").unwrap().1.to_owned())
            .collect::<Vec<_>>();
        assert_eq!(logged, words);

        setup.bridge.shutdown().await;
    }

    #[tokio::test]
    async fn absent_device_fails_alone() {
        let setup = start();
        let devices = setup.handle.devices();

        assert_eq!(devices.state("d1"), Some(DeviceState::Active));
        assert_eq!(devices.state("absent"), Some(DeviceState::Failed));

        assert_eq!(
            setup.handle.route(Command::new("absent", "PING")).await,
            Err(Error::DeviceUnavailable("absent".into()))
        );
        assert_eq!(setup.handle.route(Command::new("d1", "PING")).await, Ok(()));
        assert_eq!(setup.d1.written(), b"PING\r\n".to_vec());

        setup.bridge.shutdown().await;
    }

    #[tokio::test]
    async fn disconnect_fails_the_device() {
        let setup = start();
        setup.d1.disconnect();

        timeout(Duration::from_secs(5), async {
            while !matches!(setup.handle.devices().lookup("d1"), Lookup::Unavailable(_)) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Device should fail");

        assert_eq!(
            setup.handle.devices().state("d1"),
            Some(DeviceState::Failed)
        );
        assert_eq!(
            setup.handle.route(Command::new("d1", "PING")).await,
            Err(Error::DeviceUnavailable("d1".into()))
        );

        setup.bridge.shutdown().await;
    }

    #[tokio::test]
    async fn end_of_file_fails_the_device_after_its_last_line() {
        let setup = start();
        let (_, mut rx) = setup.handle.subscribe();

        setup.d1.feed("goodbye\n");
        setup.d1.close();

        assert!(next(&mut rx).await.text.ends_with("] goodbye\n"));

        timeout(Duration::from_secs(5), async {
            while setup.handle.devices().state("d1") != Some(DeviceState::Failed) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Device should fail");

        setup.bridge.shutdown().await;
    }

    #[tokio::test]
    async fn lagging_subscriber_is_dropped() {
        let setup = start_with(|logs| Config {
            subscriber_capacity: 1,
            ..config(logs)
        });

        let (slow, _slow_rx) = setup.handle.subscribe();
        let (_, mut fast_rx) = setup.handle.subscribe();
        assert_eq!(setup.handle.subscriber_count(), 2);

        for line in ["one", "two", "three"] {
            setup.d1.feed(format!("{line}\n"));
            assert!(next(&mut fast_rx).await.text.ends_with(&format!("] {line}\n")));
        }

        assert_eq!(setup.handle.subscriber_count(), 1);
        assert!(!setup.handle.unsubscribe(slow));

        setup.bridge.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_readers_and_ends_subscriptions() {
        let setup = start();
        let (_, mut rx) = setup.handle.subscribe();

        timeout(Duration::from_secs(5), setup.bridge.shutdown())
            .await
            .expect("Shutdown should not wait on idle devices");

        assert!(rx.recv().await.is_none());
        assert_eq!(setup.handle.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn bad_config_does_not_start() {
        let logs = tempfile::tempdir().unwrap();
        let config = Config {
            hub_capacity: 0,
            ..config(&logs)
        };

        let result = Bridge::start(
            &config,
            Arc::new(MockOpener::default()),
            CancellationToken::new(),
        );

        assert!(matches!(result, Err(Error::BadConfig(_))));
    }
}

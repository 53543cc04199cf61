// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    io,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use tokio::{
    sync::{
        mpsc::{self, error::TryRecvError},
        watch,
    },
    task::{JoinError, JoinHandle},
};
use tracing::{debug, error, info, span, warn, Level};

use crate::{
    engine::{Engine, Request, Status},
    thread_priority,
};

pub mod keyboard;

/// How many requests may queue up between polling cycles before drivers block.
const REQUEST_BUFFER: usize = 64;

/// Drivers turn some form of user input into engine requests.
pub trait Driver: Send + Sync + 'static {
    /// Starts monitoring input. The engine status is published on `status_rx` after
    /// every polling cycle that changed it. Dropping `requests_tx` ends the controller.
    fn monitor_requests(
        &self,
        requests_tx: mpsc::Sender<Request>,
        status_rx: watch::Receiver<Status>,
    ) -> JoinHandle<Result<(), io::Error>>;
}

/// Hosts the polling loop for an engine and feeds it requests from a driver.
pub struct Controller {
    handle: JoinHandle<()>,
    status_rx: watch::Receiver<Status>,
    writer: Option<thread::JoinHandle<()>>,
}

impl Controller {
    /// Creates a new controller that polls the engine every tick interval.
    pub fn new(engine: Engine, driver: Arc<dyn Driver>, tick_interval: Duration) -> Controller {
        let (status_tx, status_rx) = watch::channel(engine.status());
        Controller {
            handle: tokio::spawn(Controller::run(engine, driver, tick_interval, status_tx)),
            status_rx,
            writer: None,
        }
    }

    /// Waits on the given recording writer after the polling loop stops.
    pub fn with_writer(mut self, writer: thread::JoinHandle<()>) -> Controller {
        self.writer = Some(writer);
        self
    }

    /// The most recently published engine status.
    pub fn status(&self) -> Status {
        self.status_rx.borrow().clone()
    }

    /// Join will block until the controller finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await?;

        if let Some(writer) = self.writer.take() {
            if tokio::task::spawn_blocking(move || writer.join())
                .await?
                .is_err()
            {
                error!("Recording writer panicked.");
            }
        }
        Ok(())
    }

    async fn run(
        engine: Engine,
        driver: Arc<dyn Driver>,
        tick_interval: Duration,
        status_tx: watch::Sender<Status>,
    ) {
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_BUFFER);
        let monitor = driver.monitor_requests(requests_tx, status_tx.subscribe());

        let poller = tokio::task::spawn_blocking(move || {
            poll(engine, requests_rx, tick_interval, status_tx)
        });
        if let Err(e) = poller.await {
            error!(err = %e, "Polling loop failed.");
        }

        match monitor.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(err = %e, "Driver stopped with an error."),
            Err(e) => error!(err = %e, "Error waiting for driver to stop."),
        }
        info!("Controller closed.");
    }
}

/// Runs the engine until every request sender is gone. Each cycle reads the clock
/// once, applies pending requests, ticks the engine, publishes its status and
/// sleeps for what's left of the interval.
fn poll(
    mut engine: Engine,
    mut requests_rx: mpsc::Receiver<Request>,
    tick_interval: Duration,
    status_tx: watch::Sender<Status>,
) {
    let span = span!(Level::INFO, "polling loop");
    let _enter = span.enter();

    thread_priority::configure_polling_thread_priority();
    info!(tick_interval = ?tick_interval, "Polling started.");

    loop {
        let now = Instant::now();

        loop {
            match requests_rx.try_recv() {
                Ok(request) => {
                    debug!(request = ?request, "Received request.");
                    if let Err(e) = engine.handle(request, now) {
                        warn!(err = %e, "Request rejected.");
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    engine.shutdown(now);
                    publish(&status_tx, engine.status());
                    info!("Polling stopped.");
                    return;
                }
            }
        }

        engine.tick(now);
        publish(&status_tx, engine.status());

        let elapsed = now.elapsed();
        if elapsed < tick_interval {
            spin_sleep::sleep(tick_interval - elapsed);
        }
    }
}

fn publish(status_tx: &watch::Sender<Status>, status: Status) {
    status_tx.send_if_modified(|current| {
        if *current == status {
            return false;
        }
        *current = status;
        true
    });
}

#[cfg(test)]
mod test {
    use std::{
        error::Error,
        io,
        sync::{mpsc as std_mpsc, Arc, Mutex},
        time::Duration,
    };

    use tokio::{
        sync::{mpsc, watch},
        task::JoinHandle,
    };

    use crate::{
        engine::{Engine, NoteRequest, Request, Status},
        metronome::Metronome,
        midi,
        test::eventually,
    };

    use super::Driver;

    /// Forwards whatever the test sends until the test drops its sender.
    struct TestDriver {
        requests: Mutex<Option<std_mpsc::Receiver<Request>>>,
    }

    impl TestDriver {
        fn new(requests: std_mpsc::Receiver<Request>) -> TestDriver {
            TestDriver {
                requests: Mutex::new(Some(requests)),
            }
        }
    }

    impl Driver for TestDriver {
        fn monitor_requests(
            &self,
            requests_tx: mpsc::Sender<Request>,
            _status_rx: watch::Receiver<Status>,
        ) -> JoinHandle<Result<(), io::Error>> {
            let requests = self
                .requests
                .lock()
                .expect("failed to get lock")
                .take()
                .expect("driver already started");
            tokio::task::spawn_blocking(move || {
                while let Ok(request) = requests.recv() {
                    assert!(requests_tx.blocking_send(request).is_ok());
                }
                Ok(())
            })
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_controller() -> Result<(), Box<dyn Error>> {
        let device = Arc::new(midi::test::Device::get("mock-device"));
        let engine = Engine::new(device.clone(), Metronome::default(), None);
        let (test_tx, test_rx) = std_mpsc::channel();
        let driver = Arc::new(TestDriver::new(test_rx));
        let mut controller = super::Controller::new(engine, driver, Duration::from_millis(1));

        test_tx.send(Request::Note(NoteRequest {
            channel: 0,
            note: 60,
            velocity: 100,
            latch: false,
        }))?;
        eventually(
            || device.sent().contains(&vec![0x90, 60, 100]),
            "Note on was never sent",
        );
        // Released by the polling loop once the transient duration passes.
        eventually(
            || device.sent().contains(&vec![0x80, 60, 0]),
            "Note off was never sent",
        );
        eventually(
            || controller.status().transient_voices == 0,
            "Voice was never released",
        );

        test_tx.send(Request::StartRecording)?;
        eventually(|| controller.status().recording, "Recording never started");

        // Closing the driver shuts the engine down.
        drop(test_tx);
        assert!(
            controller.join().await.is_ok(),
            "Error waiting for controller"
        );
        assert!(!controller.status().recording);
        assert_eq!(
            Some(vec![0xE0, 0x00, 0x40]),
            device.sent().last().cloned(),
            "Shutdown should end with a pitch bend reset"
        );

        Ok(())
    }
}

//! Store actor: single owner of one [`TimestampedStore`].
//!
//! The actor multiplexes the sampling loop's feed and the facade's
//! queries onto one task, so appends and lookups are serialized without
//! a lock. Point queries ahead of the acquired data do not fail
//! immediately: they are parked as waiters and answered the moment a
//! satisfying record arrives, or failed with
//! [`HubError::WaitTimeout`] once the configured deadline passes.

use crate::core::{Sample, StorePayload};
use crate::data::{Lookup, TimestampedStore};
use crate::error::{AppResult, HubError};
use crate::hub::messages::StoreCommand;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

#[derive(Clone, Copy, PartialEq, Eq)]
enum QueryKind {
    Closest,
    Interpolated,
}

struct Waiter<T> {
    kind: QueryKind,
    timestamp_us: i64,
    deadline: Instant,
    reply: oneshot::Sender<AppResult<Sample<T>>>,
}

/// Actor owning one sensor store.
pub struct StoreActor<T: StorePayload> {
    store: TimestampedStore<T>,
    sample_rx: mpsc::Receiver<Sample<T>>,
    cmd_rx: mpsc::Receiver<StoreCommand<T>>,
    wait_timeout: Duration,
    waiters: Vec<Waiter<T>>,
}

impl<T: StorePayload> StoreActor<T> {
    pub fn new(
        capacity: usize,
        wait_timeout: Duration,
        sample_rx: mpsc::Receiver<Sample<T>>,
        cmd_rx: mpsc::Receiver<StoreCommand<T>>,
    ) -> Self {
        Self {
            store: TimestampedStore::new(capacity),
            sample_rx,
            cmd_rx,
            wait_timeout,
            waiters: Vec::new(),
        }
    }

    /// Serve until the command side hangs up.
    pub async fn run(mut self) {
        debug!("store actor started");
        let mut samples_open = true;
        loop {
            let next_deadline = self.waiters.iter().map(|w| w.deadline).min();
            tokio::select! {
                sample = self.sample_rx.recv(), if samples_open => {
                    match sample {
                        Some(sample) => {
                            self.store.append(sample.timestamp_us, sample.payload);
                            self.flush_waiters();
                        }
                        None => {
                            // Producer is gone; parked queries can never
                            // be satisfied.
                            samples_open = false;
                            for waiter in self.waiters.drain(..) {
                                let _ = waiter.reply.send(Err(HubError::ChannelClosed));
                            }
                        }
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle(cmd),
                        None => break,
                    }
                }
                _ = sleep_until_opt(next_deadline), if next_deadline.is_some() => {
                    self.expire_waiters();
                }
            }
        }
        debug!("store actor stopped");
    }

    fn handle(&mut self, cmd: StoreCommand<T>) {
        match cmd {
            StoreCommand::Closest {
                timestamp_us,
                reply,
            } => self.point_query(QueryKind::Closest, timestamp_us, reply),
            StoreCommand::Interpolated {
                timestamp_us,
                reply,
            } => self.point_query(QueryKind::Interpolated, timestamp_us, reply),
            StoreCommand::Range {
                start_us,
                end_us,
                new_only,
                reply,
            } => {
                let _ = reply.send(self.store.range(start_us, end_us, new_only));
            }
            StoreCommand::Len { reply } => {
                let _ = reply.send(self.store.len());
            }
        }
    }

    fn point_query(
        &mut self,
        kind: QueryKind,
        timestamp_us: i64,
        reply: oneshot::Sender<AppResult<Sample<T>>>,
    ) {
        match self.lookup(kind, timestamp_us) {
            Lookup::Hit(sample) => {
                let _ = reply.send(Ok(sample));
            }
            Lookup::Unsupported => {
                let _ = reply.send(Err(HubError::MalformedRequest(
                    "this store does not support interpolated queries".to_string(),
                )));
            }
            Lookup::Pending => {
                self.waiters.push(Waiter {
                    kind,
                    timestamp_us,
                    deadline: Instant::now() + self.wait_timeout,
                    reply,
                });
            }
        }
    }

    fn lookup(&self, kind: QueryKind, timestamp_us: i64) -> Lookup<T> {
        match kind {
            QueryKind::Closest => self.store.get_closest(timestamp_us),
            QueryKind::Interpolated => self.store.get_interpolated(timestamp_us),
        }
    }

    /// Re-run parked queries against the freshly grown store.
    fn flush_waiters(&mut self) {
        let mut remaining = Vec::new();
        for waiter in self.waiters.drain(..) {
            match match waiter.kind {
                QueryKind::Closest => self.store.get_closest(waiter.timestamp_us),
                QueryKind::Interpolated => self.store.get_interpolated(waiter.timestamp_us),
            } {
                Lookup::Hit(sample) => {
                    let _ = waiter.reply.send(Ok(sample));
                }
                Lookup::Unsupported => {
                    let _ = waiter.reply.send(Err(HubError::MalformedRequest(
                        "this store does not support interpolated queries".to_string(),
                    )));
                }
                Lookup::Pending => remaining.push(waiter),
            }
        }
        self.waiters = remaining;
    }

    fn expire_waiters(&mut self) {
        let now = Instant::now();
        let waited_ms = self.wait_timeout.as_millis() as u64;
        let mut remaining = Vec::new();
        for waiter in self.waiters.drain(..) {
            if waiter.deadline <= now {
                let _ = waiter.reply.send(Err(HubError::WaitTimeout { waited_ms }));
            } else {
                remaining.push(waiter);
            }
        }
        self.waiters = remaining;
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Coordinate3, Spectrum};

    type Handles<T> = (mpsc::Sender<Sample<T>>, mpsc::Sender<StoreCommand<T>>);

    fn spawn<T: StorePayload>(wait_timeout: Duration) -> Handles<T> {
        let (sample_tx, sample_rx) = mpsc::channel(32);
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = StoreActor::new(64, wait_timeout, sample_rx, cmd_rx);
        tokio::spawn(actor.run());
        (sample_tx, cmd_tx)
    }

    fn coord(v: f64) -> Coordinate3 {
        Coordinate3::new(v, v, v)
    }

    #[tokio::test]
    async fn test_closest_from_existing_data() {
        let (sample_tx, cmd_tx) = spawn::<Coordinate3>(Duration::from_secs(1));
        sample_tx.send(Sample::new(100, coord(1.0))).await.unwrap();
        sample_tx.send(Sample::new(200, coord(2.0))).await.unwrap();

        let (cmd, rx) = StoreCommand::closest(150);
        cmd_tx.send(cmd).await.unwrap();
        let sample = rx.await.unwrap().unwrap();
        assert_eq!(sample.timestamp_us, 200);
    }

    #[tokio::test]
    async fn test_query_ahead_waits_for_arrival() {
        let (sample_tx, cmd_tx) = spawn::<Coordinate3>(Duration::from_secs(5));
        sample_tx.send(Sample::new(100, coord(1.0))).await.unwrap();

        // Query ahead of everything acquired so far.
        let (cmd, rx) = StoreCommand::closest(300);
        cmd_tx.send(cmd).await.unwrap();

        // Let the actor park the waiter, then satisfy it.
        tokio::task::yield_now().await;
        sample_tx.send(Sample::new(350, coord(3.5))).await.unwrap();

        let sample = rx.await.unwrap().unwrap();
        assert_eq!(sample.timestamp_us, 350);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_times_out() {
        let (_sample_tx, cmd_tx) = spawn::<Coordinate3>(Duration::from_millis(50));

        let (cmd, rx) = StoreCommand::closest(100);
        cmd_tx.send(cmd).await.unwrap();

        match rx.await.unwrap() {
            Err(HubError::WaitTimeout { waited_ms }) => assert_eq!(waited_ms, 50),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_interpolated_answers_between_records() {
        let (sample_tx, cmd_tx) = spawn::<Coordinate3>(Duration::from_secs(1));
        sample_tx
            .send(Sample::new(100, Coordinate3::new(0.0, 0.0, 0.0)))
            .await
            .unwrap();
        sample_tx
            .send(Sample::new(200, Coordinate3::new(10.0, 10.0, 10.0)))
            .await
            .unwrap();

        let (cmd, rx) = StoreCommand::interpolated(150);
        cmd_tx.send(cmd).await.unwrap();
        let sample = rx.await.unwrap().unwrap();
        assert_eq!(sample.payload, Coordinate3::new(5.0, 5.0, 5.0));
    }

    #[tokio::test]
    async fn test_interpolated_unsupported_payload_is_malformed() {
        let (sample_tx, cmd_tx) = spawn::<Spectrum>(Duration::from_secs(1));
        let s = Spectrum {
            wavelength_nm: vec![500.0],
            intensity: vec![1.0],
            integration_time_us: 1000,
        };
        sample_tx.send(Sample::new(100, s.clone())).await.unwrap();
        sample_tx.send(Sample::new(200, s)).await.unwrap();

        let (cmd, rx) = StoreCommand::interpolated(150);
        cmd_tx.send(cmd).await.unwrap();
        assert!(matches!(
            rx.await.unwrap(),
            Err(HubError::MalformedRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_range_new_only_through_actor() {
        let (sample_tx, cmd_tx) = spawn::<Coordinate3>(Duration::from_secs(1));
        for ts in [100, 200, 300] {
            sample_tx.send(Sample::new(ts, coord(ts as f64))).await.unwrap();
        }

        let (cmd, rx) = StoreCommand::range(0, None, true);
        cmd_tx.send(cmd).await.unwrap();
        assert_eq!(rx.await.unwrap().len(), 3);

        let (cmd, rx) = StoreCommand::range(0, None, true);
        cmd_tx.send(cmd).await.unwrap();
        assert!(rx.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backdated_sample_keeps_actor_alive() {
        let (sample_tx, cmd_tx) = spawn::<Coordinate3>(Duration::from_secs(1));
        sample_tx
            .send(Sample::new(1_000_000, coord(1.0)))
            .await
            .unwrap();
        // An offset adjustment moves the producer clock backwards.
        sample_tx
            .send(Sample::new(875_000, coord(2.0)))
            .await
            .unwrap();

        // Wait until both records are ingested.
        loop {
            let (cmd, rx) = StoreCommand::len();
            cmd_tx.send(cmd).await.unwrap();
            if rx.await.unwrap() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }

        // The actor must still answer queries afterwards.
        let (cmd, rx) = StoreCommand::closest(0);
        cmd_tx.send(cmd).await.unwrap();
        let sample = rx.await.unwrap().unwrap();
        assert_eq!(sample.timestamp_us, 875_000);
    }

    #[tokio::test]
    async fn test_producer_hangup_fails_waiters() {
        let (sample_tx, cmd_tx) = spawn::<Coordinate3>(Duration::from_secs(30));

        let (cmd, rx) = StoreCommand::closest(100);
        cmd_tx.send(cmd).await.unwrap();
        tokio::task::yield_now().await;

        drop(sample_tx);
        assert!(matches!(rx.await.unwrap(), Err(HubError::ChannelClosed)));
    }
}

//! Background eviction of idle connections and liveness probing

use std::sync::{Arc, Weak};
use std::time::Duration;

use sqlx_sqlite_driver::Driver;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, trace};

use crate::Error;
use crate::queue::FileQueue;
use crate::registry::PoolRegistry;

/// Thresholds applied on every sweep
#[derive(Debug, Clone, Copy)]
pub(crate) struct SweepSettings {
   pub(crate) idle_timeout: Duration,
   pub(crate) probe_after: Duration,
}

/// Outcome of one sweep across all files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
   /// Idle connections closed for exceeding the idle timeout
   pub evicted_idle: usize,
   /// Idle connections that were probed
   pub probed: usize,
   /// Probed connections that failed and were closed
   pub probe_failures: usize,
}

impl SweepReport {
   fn merge(&mut self, other: SweepReport) {
      self.evicted_idle += other.evicted_idle;
      self.probed += other.probed;
      self.probe_failures += other.probe_failures;
   }
}

/// Handle to the periodic sweep task.
///
/// The task only holds a weak reference to the registry, so it never keeps
/// a dropped pool alive; it exits on its own once the registry is gone.
pub(crate) struct HealthMonitor {
   stop_tx: oneshot::Sender<()>,
   handle: JoinHandle<()>,
}

impl HealthMonitor {
   /// Spawn the sweep loop on `runtime`.
   pub(crate) fn spawn<D: Driver>(
      runtime: &Handle,
      registry: Weak<PoolRegistry<D>>,
      interval: Duration,
      settings: SweepSettings,
   ) -> Self {
      let (stop_tx, stop_rx) = oneshot::channel();
      let handle = runtime.spawn(run(registry, interval, settings, stop_rx));

      debug!(?interval, ?settings, "Health monitor started");
      Self { stop_tx, handle }
   }

   /// Stop the loop, waiting for an in-flight sweep to finish.
   pub(crate) async fn stop(self) {
      let _ = self.stop_tx.send(());
      if let Err(e) = self.handle.await
         && e.is_panic()
      {
         error!("Health monitor task panicked: {:?}", e);
      }
      debug!("Health monitor stopped");
   }
}

async fn run<D: Driver>(
   registry: Weak<PoolRegistry<D>>,
   interval: Duration,
   settings: SweepSettings,
   mut stop_rx: oneshot::Receiver<()>,
) {
   let mut ticker = tokio::time::interval(interval);
   ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
   // The first tick completes immediately
   ticker.tick().await;

   loop {
      tokio::select! {
         _ = &mut stop_rx => break,
         _ = ticker.tick() => {
            let Some(registry) = registry.upgrade() else { break };
            let report = sweep(&registry.snapshot(), settings).await;
            trace!(?report, "Health sweep complete");
         }
      }
   }
}

/// Evict expired idle connections and probe aging ones across `queues`.
pub(crate) async fn sweep<D: Driver>(
   queues: &[Arc<FileQueue<D>>],
   settings: SweepSettings,
) -> SweepReport {
   let mut report = SweepReport::default();
   for queue in queues {
      report.merge(sweep_queue(queue, settings).await);
   }
   report
}

async fn sweep_queue<D: Driver>(queue: &FileQueue<D>, settings: SweepSettings) -> SweepReport {
   let mut report = SweepReport::default();

   for slot in queue.take_expired(settings.idle_timeout) {
      debug!(
         path = %queue.path().display(),
         slot = slot.id(),
         idle_for = ?slot.idle_for(),
         age = ?slot.age(),
         "Evicting idle connection"
      );
      queue.close_slot(slot).await;
      report.evicted_idle += 1;
   }

   // Each candidate holds a capacity permit until it is back in the idle list
   for (mut slot, permit) in queue.take_for_probe(settings.probe_after) {
      report.probed += 1;

      match queue.driver().probe(slot.conn_mut()).await {
         Ok(()) => {
            if let Some(slot) = queue.return_probed(slot) {
               queue.close_slot(slot).await;
            }
         }
         Err(source) => {
            let slot_id = slot.id();
            let err = Error::HealthProbeFailed {
               path: slot.path().to_path_buf(),
               source,
            };
            error!(slot = slot_id, "{}", err);
            queue.close_slot(slot).await;
            report.probe_failures += 1;
         }
      }

      drop(permit);
   }

   report
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::mock::MockDriver;
   use std::path::PathBuf;

   const WAIT: Duration = Duration::from_secs(1);

   fn queue(max_connections: usize) -> (Arc<FileQueue<MockDriver>>, MockDriver) {
      let driver = MockDriver::default();
      let queue = Arc::new(FileQueue::new(
         1,
         PathBuf::from("/tmp/health.db"),
         max_connections,
         Arc::new(driver.clone()),
         Default::default(),
      ));
      (queue, driver)
   }

   #[tokio::test]
   async fn test_idle_slot_past_timeout_is_evicted() {
      let (queue, driver) = queue(2);
      drop(queue.take(WAIT).await.unwrap());
      assert_eq!(queue.stats().idle, 1);

      tokio::time::sleep(Duration::from_millis(30)).await;

      let settings = SweepSettings {
         idle_timeout: Duration::from_millis(10),
         probe_after: Duration::from_millis(5),
      };
      let report = sweep(&[Arc::clone(&queue)], settings).await;

      assert_eq!(report.evicted_idle, 1);
      assert_eq!(report.probed, 0);
      assert_eq!(queue.stats().idle, 0);
      assert_eq!(driver.closed(), 1);
   }

   #[tokio::test]
   async fn test_failed_probe_evicts_and_next_take_reopens() {
      let (queue, driver) = queue(1);
      drop(queue.take(WAIT).await.unwrap());
      driver.set_fail_probe(true);

      let settings = SweepSettings {
         idle_timeout: Duration::from_secs(60),
         probe_after: Duration::ZERO,
      };
      let report = sweep(&[Arc::clone(&queue)], settings).await;

      assert_eq!(report.probed, 1);
      assert_eq!(report.probe_failures, 1);
      assert_eq!(queue.stats().idle, 0);
      assert_eq!(driver.closed(), 1);

      driver.set_fail_probe(false);
      let conn = queue.take(WAIT).await.unwrap();
      assert_eq!(conn.id, 2, "Replacement connection is opened on demand");
   }

   #[tokio::test]
   async fn test_healthy_probe_keeps_slot() {
      let (queue, driver) = queue(1);
      drop(queue.take(WAIT).await.unwrap());

      let settings = SweepSettings {
         idle_timeout: Duration::from_secs(60),
         probe_after: Duration::ZERO,
      };
      let report = sweep(&[Arc::clone(&queue)], settings).await;

      assert_eq!(report.probed, 1);
      assert_eq!(report.probe_failures, 0);
      assert_eq!(queue.stats().idle, 1);
      assert_eq!(driver.closed(), 0);
   }

   #[tokio::test]
   async fn test_sweep_never_touches_checked_out_slots() {
      let (queue, driver) = queue(2);
      let held = queue.take(WAIT).await.unwrap();
      driver.set_fail_probe(true);

      tokio::time::sleep(Duration::from_millis(30)).await;

      let settings = SweepSettings {
         idle_timeout: Duration::from_millis(10),
         probe_after: Duration::ZERO,
      };
      let report = sweep(&[Arc::clone(&queue)], settings).await;

      assert_eq!(report, SweepReport::default());
      assert_eq!(queue.stats().active, 1);
      assert!(driver.calls().is_empty());
      drop(held);
   }

   #[tokio::test]
   async fn test_monitor_runs_on_interval_and_stops() {
      let driver = MockDriver::default();
      let registry = Arc::new(PoolRegistry::new(1, Arc::new(driver.clone()), 1));
      let queue = registry.get_or_create(std::path::Path::new("/tmp/monitor.db")).unwrap();
      drop(queue.take(WAIT).await.unwrap());

      let monitor = HealthMonitor::spawn(
         &Handle::current(),
         Arc::downgrade(&registry),
         Duration::from_millis(10),
         SweepSettings {
            idle_timeout: Duration::from_millis(5),
            probe_after: Duration::from_millis(5),
         },
      );

      tokio::time::sleep(Duration::from_millis(100)).await;
      assert_eq!(queue.stats().idle, 0, "Monitor should have evicted the idle slot");
      assert_eq!(driver.closed(), 1);

      tokio::time::timeout(WAIT, monitor.stop()).await.unwrap();
   }
}

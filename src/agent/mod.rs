//! Embedding interface.
//!
//! [`Agent`] wires the listener, aggregator, flush timer, upload queue and
//! drain workers together and exposes the lifecycle an embedding process
//! drives: `configure`, `start`, `submit`, `write`, `flush`, `shutdown`.

pub mod adapter;
pub mod writer;

pub use adapter::{snapshot_points, PointTemplate};
pub use writer::{whitelist, MetricWriter, DEFAULT_SOURCE};

use crate::core::{ComputedMetric, Config, MetricSample, OutgoingPoint, RelayError, Result};
use crate::export::{
    DrainWorker, HttpIngestClient, RegistrationCache, UploadQueue, UploadStats,
    UploadStatsSnapshot,
};
use crate::metrics::{decode_packet, BucketAggregator, Snapshot};
use crate::monitoring::SelfMonitor;
use crate::receiver::{ListenerHandle, ListenerStatsSnapshot, UdpListener};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Everything the flush timer and the write path need, shared between the
/// agent and its background tasks.
struct Pipeline {
    aggregator: Arc<BucketAggregator>,
    queue: UploadQueue,
    stats: Arc<UploadStats>,
    writer: MetricWriter,
    template: PointTemplate,
    monitor: Option<SelfMonitor>,
    upload_enabled: AtomicBool,
}

impl Pipeline {
    fn enqueue(&self, points: Vec<OutgoingPoint>) -> usize {
        if !self.upload_enabled.load(Ordering::Acquire) {
            self.stats.add_points_dropped(points.len());
            return 0;
        }
        self.queue.put_all(points)
    }

    fn write(&self, metric: ComputedMetric) -> bool {
        self.stats.record_write_call();
        match self.writer.prepare(metric) {
            Some(point) => self.enqueue(vec![point]) == 1,
            None => false,
        }
    }

    fn flush(&self) -> usize {
        let snapshot = self.aggregator.flush();
        self.enqueue_snapshot(&snapshot)
    }

    fn enqueue_snapshot(&self, snapshot: &Snapshot) -> usize {
        let points = snapshot_points(snapshot, &self.template);
        let produced = points.len();
        let accepted = self.enqueue(points);

        if accepted < produced {
            tracing::warn!(produced, accepted, "upload queue rejected flushed points");
        }

        if let Some(monitor) = &self.monitor {
            let stats = self.stats.snapshot(self.queue.depth());
            let now = Utc::now().timestamp_millis();
            for metric in monitor.metrics(&stats, now) {
                self.write(metric);
            }
        }

        tracing::debug!(metrics = snapshot.len(), points = accepted, "flush complete");
        accepted
    }
}

/// Background tasks owned by a started agent.
struct Running {
    listener: Option<ListenerHandle>,
    flush_stop: watch::Sender<bool>,
    flush_task: JoinHandle<()>,
    workers: Vec<JoinHandle<HttpIngestClient>>,
}

/// The statsd relay agent.
pub struct Agent {
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
    cache: Arc<RegistrationCache>,
    running: Option<Running>,
    upload_fault: Option<RelayError>,
}

impl Agent {
    /// Validate `config` and build every component. Nothing runs yet.
    pub fn configure(config: Config) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(UploadStats::default());
        let queue = UploadQueue::new(config.upload.max_queue_size, Arc::clone(&stats));
        let writer = MetricWriter::new(&config.aggregation, &config.writer)?;
        let monitor = config
            .monitoring
            .self_monitor
            .then(|| SelfMonitor::new(config.monitoring.namespace.clone()));

        let pipeline = Pipeline {
            aggregator: Arc::new(BucketAggregator::new(config.aggregation.gauge_expiry)),
            queue,
            stats,
            writer,
            template: PointTemplate {
                source: config.aggregation.source.clone(),
                dimensions: config.aggregation.dimensions.clone(),
            },
            monitor,
            upload_enabled: AtomicBool::new(true),
        };

        Ok(Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            cache: Arc::new(RegistrationCache::new()),
            running: None,
            upload_fault: None,
        })
    }

    /// Start the listener, the flush timer and the drain workers. An agent
    /// that has been shut down cannot be started again.
    ///
    /// A listener bind failure is an error. An unusable ingest endpoint is
    /// not: it disables the upload path, is reported through
    /// [`upload_fault`](Self::upload_fault), and everything else keeps
    /// running.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(RelayError::config("agent already started"));
        }
        if self.pipeline.queue.is_closed() {
            return Err(RelayError::config("agent was shut down and cannot be restarted"));
        }

        let listener = if self.config.listener.enabled {
            let listener = UdpListener::new(
                self.config.listener.clone(),
                Arc::clone(&self.pipeline.aggregator),
            );
            Some(listener.start().await?)
        } else {
            None
        };

        let workers = match self.start_workers().await {
            Ok(workers) => {
                self.upload_fault = None;
                self.pipeline.upload_enabled.store(true, Ordering::Release);
                workers
            },
            Err(e) => {
                tracing::error!(
                    error = %e,
                    url = %self.config.upload.ingest_url,
                    "upload path disabled"
                );
                self.pipeline.upload_enabled.store(false, Ordering::Release);
                self.upload_fault = Some(e);
                Vec::new()
            },
        };

        let (flush_stop, flush_task) = self.spawn_flush_timer();

        tracing::info!(
            listener = ?listener.as_ref().map(ListenerHandle::local_addr),
            workers = workers.len(),
            interval = ?self.config.aggregation.interval,
            "statsd relay started"
        );

        self.running = Some(Running {
            listener,
            flush_stop,
            flush_task,
            workers,
        });
        Ok(())
    }

    async fn start_workers(&self) -> Result<Vec<JoinHandle<HttpIngestClient>>> {
        let url = self.config.ingest_url()?;

        let mut first = HttpIngestClient::new(&url, &self.config.upload);
        first.connect().await?;

        let mut clients = vec![first];
        clients.extend(
            (1..self.config.upload.flushing_threads)
                .map(|_| HttpIngestClient::new(&url, &self.config.upload)),
        );

        Ok(clients
            .into_iter()
            .enumerate()
            .map(|(id, client)| {
                let worker = DrainWorker::new(
                    id,
                    self.pipeline.queue.receiver(),
                    Arc::clone(&self.cache),
                    Arc::clone(&self.pipeline.stats),
                    client,
                    self.config.upload.queue_flush_size,
                );
                tokio::spawn(worker.run())
            })
            .collect())
    }

    fn spawn_flush_timer(&self) -> (watch::Sender<bool>, JoinHandle<()>) {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let pipeline = Arc::clone(&self.pipeline);
        let period = self.config.aggregation.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        pipeline.flush();
                    },
                }
            }
        });

        (stop_tx, task)
    }

    /// Fold one sample into the current window.
    pub fn submit(&self, sample: MetricSample) {
        self.pipeline.aggregator.submit(sample);
    }

    /// Decode a raw statsd payload and fold every valid line. Returns the
    /// number of samples accepted.
    pub fn submit_packet(&self, packet: &[u8]) -> usize {
        let decoded = decode_packet(packet);
        let accepted = decoded.samples.len();
        self.pipeline.aggregator.submit_all(decoded.samples);
        accepted
    }

    /// Queue a metric computed by the embedding process. Returns false if it
    /// was skipped or dropped.
    pub fn write(&self, metric: ComputedMetric) -> bool {
        self.pipeline.write(metric)
    }

    /// Flush the current window now. Returns the number of points queued.
    pub fn flush(&self) -> usize {
        self.pipeline.flush()
    }

    /// Stop the timer and the listener, then stop every worker with one
    /// sentinel each. Points still queued behind the sentinels are not sent.
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        let _ = running.flush_stop.send(true);
        running.flush_task.await?;

        if let Some(mut listener) = running.listener {
            listener.stop().await?;
        }

        let workers = running.workers;
        self.pipeline.queue.shutdown(workers.len()).await?;
        for worker in workers {
            worker.await?;
        }

        let stats = self.stats();
        tracing::info!(
            points_written = stats.points_written,
            points_dropped = stats.points_dropped,
            rpc_errors = stats.rpc_errors,
            "statsd relay stopped"
        );
        Ok(())
    }

    /// True between `start` and `shutdown`
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Why the upload path is disabled, if it is
    pub fn upload_fault(&self) -> Option<&RelayError> {
        self.upload_fault.as_ref()
    }

    /// Bound listener address, if the listener is running
    pub fn listener_addr(&self) -> Option<SocketAddr> {
        self.running
            .as_ref()
            .and_then(|r| r.listener.as_ref())
            .map(ListenerHandle::local_addr)
    }

    /// Listener counters, if the listener is running
    pub fn listener_stats(&self) -> Option<ListenerStatsSnapshot> {
        self.running
            .as_ref()
            .and_then(|r| r.listener.as_ref())
            .map(ListenerHandle::stats)
    }

    /// Upload counters and current queue depth
    pub fn stats(&self) -> UploadStatsSnapshot {
        self.pipeline.stats.snapshot(self.pipeline.queue.depth())
    }

    /// Number of metric names registered so far
    pub async fn registered_metrics(&self) -> usize {
        self.cache.len().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

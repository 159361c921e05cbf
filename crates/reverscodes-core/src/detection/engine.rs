//! Detection engine: staggered concurrent probes, first positive wins.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::loader::{ResourceKind, ResourceLoader};
use super::probes::{BaitProbe, MutationProbe, NetworkProbe, Probe};
use super::surface::PageSurface;
use super::{DetectionSettings, DetectionVerdict, ProbePlan, ProbeReport};

/// Result of one battery.
#[derive(Debug, Default)]
struct Battery {
    reports: Vec<ProbeReport>,
    blocked: bool,
    timed_out: bool,
}

/// Runs the probe battery, retrying until a probe fires or attempts run out.
pub struct DetectionEngine {
    probes: Vec<Arc<dyn Probe>>,
    settings: DetectionSettings,
}

impl DetectionEngine {
    /// An engine with no probes; add them with [`with_probe`](Self::with_probe).
    pub fn new(settings: DetectionSettings) -> Self {
        Self {
            probes: Vec::new(),
            settings,
        }
    }

    pub fn with_probe(mut self, probe: impl Probe + 'static) -> Self {
        self.probes.push(Arc::new(probe));
        self
    }

    /// The full battery: DOM probes when a page is available, network probes
    /// always. Categories with nothing to try are left out.
    pub fn standard(
        settings: DetectionSettings,
        plan: &ProbePlan,
        surface: Option<Arc<dyn PageSurface>>,
        loader: Arc<dyn ResourceLoader>,
    ) -> Self {
        let t = settings.thresholds;
        let mut engine = Self::new(settings.clone());

        if let Some(surface) = surface.filter(|_| !plan.bait_classes.is_empty()) {
            engine = engine
                .with_probe(BaitProbe::new(
                    Arc::clone(&surface),
                    plan.bait_classes.clone(),
                    settings.bait_settle,
                    t.bait,
                ))
                .with_probe(MutationProbe::new(
                    surface,
                    plan.bait_classes.clone(),
                    settings.mutation_window,
                    t.mutation,
                ));
        }

        let network = [
            (ResourceKind::Script, &plan.script_urls, t.script),
            (ResourceKind::Fetch, &plan.fetch_urls, t.fetch),
            (ResourceKind::Image, &plan.image_urls, t.image),
        ];
        for (kind, urls, threshold) in network {
            if urls.is_empty() {
                continue;
            }
            engine = engine.with_probe(NetworkProbe::new(
                kind,
                Arc::clone(&loader),
                urls.clone(),
                settings.request_timeout,
                threshold,
            ));
        }
        engine
    }

    pub fn settings(&self) -> &DetectionSettings {
        &self.settings
    }

    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    /// Run up to `max_attempts` batteries. The attempt counter is local, so
    /// every call starts fresh.
    pub async fn detect(&self) -> DetectionVerdict {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut verdict = DetectionVerdict::default();

        for attempt in 1..=max_attempts {
            let battery = self.run_battery().await;
            verdict = DetectionVerdict {
                blocked: battery.blocked,
                signals: battery.reports.iter().filter(|r| r.blocked).count() as u32,
                probes_completed: battery.reports.len() as u32,
                attempts: attempt,
                timed_out: battery.timed_out,
                reports: battery.reports,
            };
            if verdict.blocked {
                break;
            }
            if attempt < max_attempts {
                tracing::debug!(attempt, "no block signal yet, retrying battery");
                tokio::time::sleep(self.settings.retry_delay).await;
            }
        }

        tracing::info!(
            blocked = verdict.blocked,
            signals = verdict.signals,
            attempts = verdict.attempts,
            "detection cycle finished"
        );
        verdict
    }

    /// One battery: every probe once, concurrently, with staggered starts.
    async fn run_battery(&self) -> Battery {
        let (tx, mut rx) = mpsc::channel(self.probes.len().max(1));
        let mut tasks = JoinSet::new();

        for (i, probe) in self.probes.iter().enumerate() {
            let probe = Arc::clone(probe);
            let tx = tx.clone();
            let offset = self.settings.stagger * i as u32;
            tasks.spawn(async move {
                tokio::time::sleep(offset).await;
                let report = probe.run().await;
                let _ = tx.send(report).await;
            });
        }
        drop(tx);

        let mut battery = Battery::default();
        let deadline = tokio::time::sleep(self.settings.battery_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::debug!(
                        reported = battery.reports.len(),
                        "battery timed out, discarding stragglers"
                    );
                    battery.timed_out = true;
                    break;
                }
                next = rx.recv() => match next {
                    Some(report) => {
                        tracing::debug!(?report, "probe reported");
                        let blocked = report.blocked;
                        battery.reports.push(report);
                        if blocked {
                            battery.blocked = true;
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        // Late reports are dropped with the receiver; wait for the aborted
        // probes so their cleanup has run before the verdict is returned.
        drop(rx);
        tasks.shutdown().await;
        battery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::ProbeKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct StubProbe {
        kind: ProbeKind,
        delay: Duration,
        blocked_from_run: u32,
        runs: Arc<AtomicU32>,
    }

    impl StubProbe {
        fn new(kind: ProbeKind, delay_ms: u64, blocked_from_run: u32) -> (Self, Arc<AtomicU32>) {
            let runs = Arc::new(AtomicU32::new(0));
            let probe = Self {
                kind,
                delay: Duration::from_millis(delay_ms),
                blocked_from_run,
                runs: Arc::clone(&runs),
            };
            (probe, runs)
        }
    }

    #[async_trait]
    impl Probe for StubProbe {
        fn kind(&self) -> ProbeKind {
            self.kind
        }

        async fn run(&self) -> ProbeReport {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            let blocked = self.blocked_from_run != 0 && run >= self.blocked_from_run;
            ProbeReport {
                kind: self.kind,
                suppressed: usize::from(blocked),
                total: 1,
                blocked,
            }
        }
    }

    fn settings() -> DetectionSettings {
        DetectionSettings::default()
    }

    #[tokio::test(start_paused = true)]
    async fn any_single_positive_probe_blocks() {
        let (quiet, _) = StubProbe::new(ProbeKind::Bait, 100, 0);
        let (loud, _) = StubProbe::new(ProbeKind::Fetch, 200, 1);
        let engine = DetectionEngine::new(settings())
            .with_probe(quiet)
            .with_probe(loud);

        let verdict = engine.detect().await;
        assert!(verdict.blocked);
        assert_eq!(verdict.attempts, 1);
        assert_eq!(verdict.signals, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_page_exhausts_all_attempts() {
        let (quiet, runs) = StubProbe::new(ProbeKind::Bait, 100, 0);
        let engine = DetectionEngine::new(settings()).with_probe(quiet);

        let verdict = engine.detect().await;
        assert!(!verdict.blocked);
        assert_eq!(verdict.attempts, 3);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn late_initialising_blocker_is_caught_on_retry() {
        let (probe, _) = StubProbe::new(ProbeKind::Script, 100, 2);
        let engine = DetectionEngine::new(settings()).with_probe(probe);

        let verdict = engine.detect().await;
        assert!(verdict.blocked);
        assert_eq!(verdict.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn first_positive_short_circuits_slow_probes() {
        let (fast, _) = StubProbe::new(ProbeKind::Fetch, 50, 1);
        let (slow, _) = StubProbe::new(ProbeKind::Bait, 5_000, 0);
        let engine = DetectionEngine::new(settings())
            .with_probe(fast)
            .with_probe(slow);

        let started = tokio::time::Instant::now();
        let verdict = engine.detect().await;
        assert!(verdict.blocked);
        assert_eq!(verdict.probes_completed, 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn battery_timeout_discards_stragglers() {
        let (hung, _) = StubProbe::new(ProbeKind::Image, 60_000, 1);
        let mut s = settings();
        s.max_attempts = 1;
        let engine = DetectionEngine::new(s).with_probe(hung);

        let started = tokio::time::Instant::now();
        let verdict = engine.detect().await;
        assert!(!verdict.blocked);
        assert!(verdict.timed_out);
        assert_eq!(verdict.probes_completed, 0);
        assert!(started.elapsed() < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn probes_start_staggered() {
        let (a, runs_a) = StubProbe::new(ProbeKind::Bait, 0, 0);
        let (b, runs_b) = StubProbe::new(ProbeKind::Fetch, 0, 0);
        let mut s = settings();
        s.stagger = Duration::from_millis(300);
        s.max_attempts = 1;
        let engine = DetectionEngine::new(s).with_probe(a).with_probe(b);

        let handle = tokio::spawn(async move { engine.detect().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs_a.load(Ordering::SeqCst), 1);
        assert_eq!(runs_b.load(Ordering::SeqCst), 0);

        let verdict = handle.await.unwrap();
        assert_eq!(verdict.probes_completed, 2);
        assert_eq!(runs_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn engine_without_probes_is_clean() {
        let verdict = DetectionEngine::new(settings()).detect().await;
        assert!(!verdict.blocked);
        assert_eq!(verdict.probes_completed, 0);
    }
}

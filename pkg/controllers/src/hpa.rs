use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use pkg_informer::{EventHandler, Informer, WorkQueue};
use pkg_types::hpa::{
    HorizontalPodAutoscaler, MetricSourceType, ScalingPolicy, ScalingPolicySelect,
    ScalingPolicyType, ScalingRules,
};
use pkg_types::meta::find_owner;
use pkg_types::pod::Pod;
use pkg_types::replicaset::{HPA_CONTROLLED, ReplicaSet};

use crate::replicaset::pod_from_template;

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// Outcome of one reconciliation pass.
enum ReconcileOutcome {
    /// The pass finished; the worker releases the in-flight slot.
    Complete,
    /// A detached scaling task was launched; it releases the slot itself
    /// when the last batch completes.
    ScalingStarted,
}

/// Horizontal Pod Autoscaler controller. Reconciles observed resource
/// utilization of a ReplicaSet's pods against the target utilization,
/// computing and rate-limiting replica-count changes.
pub struct HPAController {
    hpa_informer: Arc<Informer<HorizontalPodAutoscaler>>,
    pod_informer: Arc<Informer<Pod>>,
    rs_informer: Arc<Informer<ReplicaSet>>,
    queue: Arc<WorkQueue>,
    default_scale_up: ScalingRules,
    default_scale_down: ScalingRules,
    sweep_interval: Duration,
}

impl HPAController {
    pub fn new(
        hpa_informer: Arc<Informer<HorizontalPodAutoscaler>>,
        pod_informer: Arc<Informer<Pod>>,
        rs_informer: Arc<Informer<ReplicaSet>>,
    ) -> Self {
        Self {
            hpa_informer,
            pod_informer,
            rs_informer,
            queue: Arc::new(WorkQueue::new()),
            default_scale_up: ScalingRules {
                stabilization_window_seconds: 0,
                select_policy: ScalingPolicySelect::Max,
                policies: vec![
                    ScalingPolicy {
                        policy_type: ScalingPolicyType::Percent,
                        value: 100,
                        period_seconds: 15,
                    },
                    ScalingPolicy {
                        policy_type: ScalingPolicyType::Pods,
                        value: 4,
                        period_seconds: 15,
                    },
                ],
            },
            default_scale_down: ScalingRules {
                stabilization_window_seconds: 300,
                select_policy: ScalingPolicySelect::Min,
                policies: vec![ScalingPolicy {
                    policy_type: ScalingPolicyType::Percent,
                    value: 100,
                    period_seconds: 15,
                }],
            },
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Begin watching and syncing. Blocks the calling task until `stop`
    /// fires.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        self.hpa_informer.await_sync().await;
        self.pod_informer.await_sync().await;
        self.rs_informer.await_sync().await;
        self.register_handlers();

        // Periodic full sweep: every known autoscaler is re-enqueued so
        // metric drift is picked up even without object changes.
        {
            let ctrl = Arc::clone(&self);
            let mut stop = stop.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(ctrl.sweep_interval);
                loop {
                    tokio::select! {
                        _ = stop.changed() => return,
                        _ = interval.tick() => {
                            for hpa in ctrl.hpa_informer.list() {
                                ctrl.queue.add(&hpa.metadata.uid);
                            }
                        }
                    }
                }
            });
        }

        info!(
            "HPAController started (sweep every {}s)",
            self.sweep_interval.as_secs()
        );
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    info!("HPAController stopping");
                    return;
                }
                key = self.queue.get() => {
                    match Arc::clone(&self).reconcile_autoscaler(&key).await {
                        Ok(ReconcileOutcome::ScalingStarted) => {
                            // In-flight slot stays held until the batch task
                            // calls done; sweep re-enqueues meanwhile are
                            // coalesced by the queue.
                        }
                        Ok(ReconcileOutcome::Complete) => self.queue.done(&key),
                        Err(e) => {
                            warn!("Autoscaler {} reconcile error: {}", key, e);
                            self.queue.done(&key);
                        }
                    }
                }
            }
        }
    }

    fn register_handlers(&self) {
        self.hpa_informer.add_event_handler(EventHandler {
            on_add: Box::new({
                let queue = Arc::clone(&self.queue);
                move |hpa: &HorizontalPodAutoscaler| queue.add(&hpa.metadata.uid)
            }),
            on_update: Box::new({
                let queue = Arc::clone(&self.queue);
                move |new: &HorizontalPodAutoscaler, old: &HorizontalPodAutoscaler| {
                    if new.status.last_scale_time == old.status.last_scale_time
                        && new.status.current_replicas == old.status.current_replicas
                        && new.status.desired_replicas == old.status.desired_replicas
                    {
                        return;
                    }
                    queue.add(&new.metadata.uid);
                }
            }),
            on_delete: Box::new({
                let queue = Arc::clone(&self.queue);
                let rs_informer = Arc::clone(&self.rs_informer);
                move |hpa: &HorizontalPodAutoscaler| {
                    queue.add(&hpa.metadata.uid);
                    let rs_informer = Arc::clone(&rs_informer);
                    let hpa = hpa.clone();
                    tokio::spawn(return_control(rs_informer, hpa));
                }
            }),
        });
    }

    /// One reconciliation pass for the autoscaler under `key`.
    async fn reconcile_autoscaler(self: Arc<Self>, key: &str) -> anyhow::Result<ReconcileOutcome> {
        let Some(mut hpa) = self.hpa_informer.get(key) else {
            debug!("Autoscaler {} no longer cached, nothing to reconcile", key);
            return Ok(ReconcileOutcome::Complete);
        };

        if hpa.spec.scale_target_ref.kind != "ReplicaSet" {
            // Not retried until the scale target ref changes
            warn!(
                "Autoscaler {} targets unsupported kind {}",
                hpa.metadata.name, hpa.spec.scale_target_ref.kind
            );
            return Ok(ReconcileOutcome::Complete);
        }
        let Some(mut target) = find_target(&self.rs_informer, &hpa) else {
            anyhow::bail!(
                "target replicaset {} not found",
                hpa.spec.scale_target_ref.name
            );
        };

        // Transfer replica management away from the ReplicaSet controller
        if !target.hpa_controlled() {
            target.status.replicas = HPA_CONTROLLED;
            target.metadata.owner_references.push(hpa.owner_reference());
            self.rs_informer.update_item(&target).await?;
            info!(
                "Autoscaler {} took over replica management of {}",
                hpa.metadata.name, target.metadata.name
            );
        }

        let related: Vec<Pod> = self
            .pod_informer
            .list()
            .into_iter()
            .filter(|p| find_owner(&p.metadata.owner_references, &target.metadata.uid).is_some())
            .collect();
        hpa.status.current_replicas = related.len() as i32;

        let desired = desired_replicas(&hpa, &related)?;
        hpa.status.desired_replicas = desired;

        if desired == hpa.status.current_replicas {
            debug!(
                "Autoscaler {}: {} replicas already match demand",
                hpa.metadata.name, desired
            );
            return Ok(ReconcileOutcome::Complete);
        }

        let rule = if desired < hpa.status.current_replicas {
            hpa.spec
                .behavior
                .as_ref()
                .and_then(|b| b.scale_down.clone())
                .unwrap_or_else(|| self.default_scale_down.clone())
        } else {
            hpa.spec
                .behavior
                .as_ref()
                .and_then(|b| b.scale_up.clone())
                .unwrap_or_else(|| self.default_scale_up.clone())
        };

        if let Some(last) = hpa.status.last_scale_time {
            let elapsed = Utc::now().signed_duration_since(last).num_seconds();
            if elapsed < rule.stabilization_window_seconds {
                info!(
                    "Autoscaler {}: within stabilization window ({}s of {}s), not scaling",
                    hpa.metadata.name, elapsed, rule.stabilization_window_seconds
                );
                return Ok(ReconcileOutcome::Complete);
            }
        }
        if rule.select_policy == ScalingPolicySelect::Disabled {
            info!(
                "Autoscaler {}: scaling disabled in this direction",
                hpa.metadata.name
            );
            return Ok(ReconcileOutcome::Complete);
        }
        let Some(policy) = choose_policy(&rule, hpa.status.current_replicas) else {
            warn!(
                "Autoscaler {}: scaling rule has no policies",
                hpa.metadata.name
            );
            return Ok(ReconcileOutcome::Complete);
        };

        info!(
            "Autoscaler {}: scaling {} from {} to {} replicas",
            hpa.metadata.name, target.metadata.name, hpa.status.current_replicas, desired
        );
        let pod_uids: Vec<String> = related.iter().map(|p| p.metadata.uid.clone()).collect();
        let ctrl = Arc::clone(&self);
        let key = key.to_string();
        tokio::spawn(async move {
            ctrl.run_scaling_batches(&key, hpa, policy, pod_uids, target)
                .await;
        });
        Ok(ReconcileOutcome::ScalingStarted)
    }

    /// Detached scaling task: applies up to the policy's per-period cap per
    /// batch, sleeping `period_seconds` between batches, then persists the
    /// final status and releases the work-queue slot. There is no
    /// cancellation path; once started a batch run goes to completion.
    async fn run_scaling_batches(
        &self,
        key: &str,
        mut hpa: HorizontalPodAutoscaler,
        policy: ScalingPolicy,
        pod_uids: Vec<String>,
        rs: ReplicaSet,
    ) {
        let cap = per_period_cap(&policy, hpa.status.current_replicas);
        let period = Duration::from_secs(policy.period_seconds.max(0) as u64);
        if cap <= 0 {
            warn!(
                "Autoscaler {}: chosen policy permits no change",
                hpa.metadata.name
            );
            self.queue.done(key);
            return;
        }

        if hpa.status.desired_replicas < hpa.status.current_replicas {
            self.scale_down_batches(&mut hpa, cap, period, pod_uids).await;
        } else {
            self.scale_up_batches(&mut hpa, cap, period, &rs).await;
        }

        if let Err(e) = self.hpa_informer.update_item(&hpa).await {
            warn!(
                "Autoscaler {}: failed to persist status: {}",
                hpa.metadata.name, e
            );
        }
        // Releasing the in-flight slot last bounds concurrent scale
        // operations on one target to exactly one.
        self.queue.done(key);
    }

    async fn scale_down_batches(
        &self,
        hpa: &mut HorizontalPodAutoscaler,
        cap: i32,
        period: Duration,
        pod_uids: Vec<String>,
    ) {
        let mut candidates = pod_uids.into_iter();
        while hpa.status.current_replicas > hpa.status.desired_replicas {
            let batch = cap.min(hpa.status.current_replicas - hpa.status.desired_replicas);
            let mut progressed = 0;
            while progressed < batch {
                let Some(uid) = candidates.next() else { break };
                match self.pod_informer.delete_item(&uid).await {
                    Ok(()) => {
                        hpa.status.current_replicas -= 1;
                        hpa.status.last_scale_time = Some(Utc::now());
                        progressed += 1;
                        info!("Autoscaler {}: deleted pod {}", hpa.metadata.name, uid);
                    }
                    Err(e) => warn!(
                        "Autoscaler {}: failed to delete pod {}: {}",
                        hpa.metadata.name, uid, e
                    ),
                }
            }
            if progressed == 0 {
                warn!(
                    "Autoscaler {}: no more candidate pods to delete",
                    hpa.metadata.name
                );
                return;
            }
            if hpa.status.current_replicas > hpa.status.desired_replicas {
                tokio::time::sleep(period).await;
            }
        }
    }

    async fn scale_up_batches(
        &self,
        hpa: &mut HorizontalPodAutoscaler,
        cap: i32,
        period: Duration,
        rs: &ReplicaSet,
    ) {
        // Adopt ready matching-but-unowned pods before creating new ones,
        // mirroring the ReplicaSet controller's adoption precedence.
        let adoptable: Vec<Pod> = self
            .pod_informer
            .list()
            .into_iter()
            .filter(|p| {
                p.owner_replicaset().is_none() && rs.spec.selector.matches(&p.metadata.labels)
            })
            .collect();
        let mut candidates = adoptable.into_iter();
        let mut exhausted = false;
        while !exhausted && hpa.status.current_replicas < hpa.status.desired_replicas {
            let batch = cap.min(hpa.status.desired_replicas - hpa.status.current_replicas);
            let mut progressed = 0;
            while progressed < batch {
                let Some(mut pod) = candidates.next() else {
                    exhausted = true;
                    break;
                };
                pod.metadata.owner_references.push(rs.owner_reference());
                match self.pod_informer.update_item(&pod).await {
                    Ok(()) => {
                        hpa.status.current_replicas += 1;
                        hpa.status.last_scale_time = Some(Utc::now());
                        progressed += 1;
                        info!(
                            "Autoscaler {}: adopted pod {}",
                            hpa.metadata.name, pod.metadata.name
                        );
                    }
                    Err(e) => warn!(
                        "Autoscaler {}: failed to adopt pod {}: {}",
                        hpa.metadata.name, pod.metadata.name, e
                    ),
                }
            }
            if !exhausted && hpa.status.current_replicas < hpa.status.desired_replicas {
                tokio::time::sleep(period).await;
            }
        }

        // Create the remainder from the target's pod template
        while hpa.status.current_replicas < hpa.status.desired_replicas {
            let batch = cap.min(hpa.status.desired_replicas - hpa.status.current_replicas);
            let mut progressed = 0;
            for _ in 0..batch {
                let pod = pod_from_template(rs);
                match self.pod_informer.create_item(&pod).await {
                    Ok(_) => {
                        hpa.status.current_replicas += 1;
                        hpa.status.last_scale_time = Some(Utc::now());
                        progressed += 1;
                        info!(
                            "Autoscaler {}: created pod {}",
                            hpa.metadata.name, pod.metadata.name
                        );
                    }
                    Err(e) => warn!(
                        "Autoscaler {}: failed to create pod: {}",
                        hpa.metadata.name, e
                    ),
                }
            }
            if progressed == 0 {
                warn!(
                    "Autoscaler {}: pod creation is not progressing, giving up this cycle",
                    hpa.metadata.name
                );
                return;
            }
            if hpa.status.current_replicas < hpa.status.desired_replicas {
                tokio::time::sleep(period).await;
            }
        }
    }
}

/// Resolve the ReplicaSet an autoscaler points at, by name and API version.
fn find_target(
    rs_informer: &Informer<ReplicaSet>,
    hpa: &HorizontalPodAutoscaler,
) -> Option<ReplicaSet> {
    let target = &hpa.spec.scale_target_ref;
    rs_informer
        .list()
        .into_iter()
        .find(|rs| rs.metadata.name == target.name && rs.type_meta.api_version == target.api_version)
}

/// Return replica management to the target ReplicaSet after its autoscaler
/// was deleted: restore a concrete replica count and drop the autoscaler's
/// owner reference.
async fn return_control(rs_informer: Arc<Informer<ReplicaSet>>, hpa: HorizontalPodAutoscaler) {
    let Some(mut rs) = find_target(&rs_informer, &hpa) else {
        warn!(
            "Autoscaler {}: target replicaset {} not found on delete",
            hpa.metadata.name, hpa.spec.scale_target_ref.name
        );
        return;
    };
    rs.status.replicas = hpa.status.current_replicas;
    if let Some(idx) = find_owner(&rs.metadata.owner_references, &hpa.metadata.uid) {
        rs.metadata.owner_references.remove(idx);
    }
    match rs_informer.update_item(&rs).await {
        Ok(()) => info!(
            "Autoscaler {}: returned control of {} at {} replicas",
            hpa.metadata.name, rs.metadata.name, rs.status.replicas
        ),
        Err(e) => warn!(
            "Autoscaler {}: failed to return control of {}: {}",
            hpa.metadata.name, rs.metadata.name, e
        ),
    }
}

/// Sum of the reported per-container CPU percentages of one pod.
fn pod_cpu_utilization(pod: &Pod) -> f64 {
    pod.status
        .container_statuses
        .iter()
        .map(|c| c.state.cpu_percent)
        .sum()
}

/// Reported memory percentage of one pod, averaged over its containers.
fn pod_memory_utilization(pod: &Pod) -> f64 {
    let statuses = &pod.status.container_statuses;
    if statuses.is_empty() {
        return 0.0;
    }
    statuses.iter().map(|c| c.state.mem_percent).sum::<f64>() / statuses.len() as f64
}

/// Aggregate utilization across the owned pods for one resource name.
/// CPU sums the per-pod totals across pods; memory sums each pod's
/// container-average without dividing by the pod count. The asymmetry is
/// intentional and pinned down by tests.
fn aggregate_utilization(name: &str, pods: &[Pod]) -> Option<f64> {
    match name {
        "cpu" => Some(pods.iter().map(pod_cpu_utilization).sum()),
        "memory" => Some(pods.iter().map(pod_memory_utilization).sum()),
        _ => None,
    }
}

/// Compute the replica count the metrics call for: per metric,
/// ceil(current * observed/target); the highest-demand metric wins; the
/// result is clamped into [min_replicas, max_replicas].
fn desired_replicas(hpa: &HorizontalPodAutoscaler, pods: &[Pod]) -> anyhow::Result<i32> {
    let mut expect = 0i32;
    for metric in &hpa.spec.metrics {
        if metric.source_type != MetricSourceType::Resource {
            anyhow::bail!("unsupported metric type");
        }
        let Some(aggregate) = aggregate_utilization(&metric.resource.name, pods) else {
            warn!(
                "Unsupported resource metric {} ignored",
                metric.resource.name
            );
            continue;
        };
        let target = metric.resource.target.average_utilization;
        if target == 0 {
            warn!("Utilization target of 0 ignored for {}", metric.resource.name);
            continue;
        }
        let proportion = aggregate / target as f64;
        let candidate = (hpa.status.current_replicas as f64 * proportion).ceil() as i32;
        expect = expect.max(candidate);
    }
    Ok(expect.min(hpa.spec.max_replicas).max(hpa.spec.min_replicas))
}

/// Rate of change a policy permits, in pods per minute. Percent rates are
/// computed in floating point so sub-100 percentages do not truncate to
/// zero.
fn policy_rate_per_minute(policy: &ScalingPolicy, current_replicas: i32) -> f64 {
    match policy.policy_type {
        ScalingPolicyType::Pods => policy.value as f64 * 60.0 / policy.period_seconds as f64,
        ScalingPolicyType::Percent => {
            (policy.value as f64 / 100.0) * current_replicas as f64 * 60.0
                / policy.period_seconds as f64
        }
    }
}

/// Pick the policy with the maximum rate under `Max` selection, minimum
/// under `Min`.
fn choose_policy(rule: &ScalingRules, current_replicas: i32) -> Option<ScalingPolicy> {
    let mut best: Option<(f64, &ScalingPolicy)> = None;
    for policy in &rule.policies {
        let rate = policy_rate_per_minute(policy, current_replicas);
        let better = match &best {
            None => true,
            Some((best_rate, _)) => match rule.select_policy {
                ScalingPolicySelect::Min => rate < *best_rate,
                _ => rate > *best_rate,
            },
        };
        if better {
            best = Some((rate, policy));
        }
    }
    best.map(|(_, policy)| policy.clone())
}

/// Number of pods the chosen policy permits per period.
fn per_period_cap(policy: &ScalingPolicy, current_replicas: i32) -> i32 {
    match policy.policy_type {
        ScalingPolicyType::Pods => policy.value,
        ScalingPolicyType::Percent => {
            ((policy.value as f64 / 100.0) * current_replicas as f64).ceil() as i32
        }
    }
}

//! 部署调度器
//!
//! 部署流程：
//! 1. 解析目标主机，校验 playbook
//! 2. 原子地检查冲突并把目标切换到 `deploying`
//! 3. 登记任务、发布开始事件，后台执行
//! 4. 执行结束（成功、失败、panic 或看门狗超时）后写入终态、
//!    刷新统计、归档任务、发布完成事件
//!
//! 目标重叠的请求直接拒绝，不排队

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::env::constants::STATUS_RETRY_ATTEMPTS;
use crate::domain::deploy::{DeployRequest, DeploymentJob, JobAccepted, JobReport};
use crate::domain::event::{DeploymentEvent, Event};
use crate::domain::host::HostStatus;
use crate::infra::inventory::InventoryWriter;
use crate::infra::playbooks::{PlaybookError, PlaybookLibrary};
use crate::services::executor::{ExecutionAdapter, ExecutionRequest};
use crate::services::stats::StatsAggregator;
use crate::state::event_hub::EventHub;
use crate::state::host_store::{HostRepository, RepositoryError};
use crate::state::job_store::JobStore;

/// 终态写入重试的初始退避
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// 终态写入重试的退避上限
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// 部署错误
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("No target hosts matched the request")]
    NoTargets,

    #[error("Playbook '{0}' not found")]
    UnknownPlaybook(String),

    #[error("Unknown hosts: {}", .0.join(", "))]
    UnknownHosts(Vec<String>),

    #[error("Hosts already deploying: {}", .0.join(", "))]
    HostConflict(Vec<String>),

    #[error("Execution adapter failed: {0}")]
    ExecutionAdapter(String),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for DeployError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::MissingHosts { names, .. } => DeployError::UnknownHosts(names),
            RepositoryError::Conflict(names) => DeployError::HostConflict(names),
            other => DeployError::Repository(other),
        }
    }
}

impl From<PlaybookError> for DeployError {
    fn from(e: PlaybookError) -> Self {
        match e {
            PlaybookError::InvalidName(name)
            | PlaybookError::NotFound(name)
            | PlaybookError::AlreadyExists(name) => DeployError::UnknownPlaybook(name),
            PlaybookError::Io(e) => {
                DeployError::Repository(RepositoryError::Unavailable(format!("playbooks: {}", e)))
            }
        }
    }
}

/// 部署调度器
///
/// 启动时构造一次，持有全部协作组件的句柄
#[derive(Clone)]
pub struct Dispatcher {
    hosts: Arc<dyn HostRepository>,
    inventory: Arc<dyn InventoryWriter>,
    playbooks: Arc<PlaybookLibrary>,
    executor: Arc<dyn ExecutionAdapter>,
    events: Arc<EventHub>,
    jobs: Arc<JobStore>,
    /// 整个执行调用的上限
    watchdog: Duration,
    retry_backoff: Duration,
}

impl Dispatcher {
    pub fn new(
        hosts: Arc<dyn HostRepository>,
        inventory: Arc<dyn InventoryWriter>,
        playbooks: Arc<PlaybookLibrary>,
        executor: Arc<dyn ExecutionAdapter>,
        events: Arc<EventHub>,
        jobs: Arc<JobStore>,
        watchdog: Duration,
    ) -> Self {
        Self {
            hosts,
            inventory,
            playbooks,
            executor,
            events,
            jobs,
            watchdog,
            retry_backoff: RETRY_BACKOFF,
        }
    }

    /// 覆盖终态写入重试的初始退避
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// 解析目标主机
    ///
    /// 优先级：分组 > 显式主机列表 > 环境内全部主机。
    /// 显式主机不在这里校验存在性，由 `start_deployment` 统一校验
    pub async fn resolve_targets(
        &self,
        environment: &str,
        hosts: Option<&[String]>,
        group: Option<&str>,
    ) -> Result<Vec<String>, DeployError> {
        let group = group.map(str::trim).filter(|g| !g.is_empty());
        let explicit = hosts.filter(|h| !h.is_empty());

        let targets: Vec<String> = match (group, explicit) {
            (Some(group), _) => self
                .hosts
                .list_by_group(group, environment)
                .await?
                .into_iter()
                .map(|h| h.name)
                .collect(),
            (None, Some(hosts)) => hosts.to_vec(),
            (None, None) => self
                .hosts
                .list_by_environment(environment)
                .await?
                .into_iter()
                .map(|h| h.name)
                .collect(),
        };

        if targets.is_empty() {
            return Err(DeployError::NoTargets);
        }
        Ok(targets)
    }

    /// 启动部署，立即返回任务 ID
    pub async fn start_deployment(
        &self,
        environment: &str,
        playbook: &str,
        targets: Vec<String>,
    ) -> Result<JobAccepted, DeployError> {
        let mut seen = HashSet::new();
        let targets: Vec<String> = targets
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();
        if targets.is_empty() {
            return Err(DeployError::NoTargets);
        }

        let playbook_path = self.playbooks.resolve(playbook).await?;

        // 检查与切换在仓库的同一把锁内完成
        self.hosts.begin_deployment(environment, &targets).await?;

        let job_id = Uuid::new_v4().to_string();
        self.jobs
            .create(DeploymentJob::new(
                job_id.clone(),
                environment.to_string(),
                playbook.to_string(),
                targets.clone(),
            ))
            .await;

        if let Err(e) = StatsAggregator::refresh(self.hosts.as_ref()).await {
            warn!(job_id = %job_id, error = %e, "Failed to refresh stats");
        }

        info!(
            job_id = %job_id,
            environment = %environment,
            playbook = %playbook,
            targets = targets.len(),
            "Deployment started"
        );

        self.events.publish(Event::Deployment(DeploymentEvent::started(
            &job_id,
            environment,
            playbook,
            &targets,
        )));

        let request = ExecutionRequest {
            job_id: job_id.clone(),
            environment: environment.to_string(),
            playbook: playbook.to_string(),
            playbook_path,
            inventory_path: self.inventory.inventory_path(environment),
            targets,
        };
        let target_count = request.targets.len();

        let dispatcher = self.clone();
        tokio::spawn(async move {
            let report = dispatcher.supervise(&request).await;
            dispatcher.complete(&request, report).await;
        });

        Ok(JobAccepted {
            job_accepted: true,
            job_id,
            target_count,
        })
    }

    /// 解析目标并启动部署
    pub async fn request_deployment(
        &self,
        request: DeployRequest,
    ) -> Result<JobAccepted, DeployError> {
        let targets = self
            .resolve_targets(
                &request.environment,
                request.hosts.as_deref(),
                request.group.as_deref(),
            )
            .await?;
        self.start_deployment(&request.environment, &request.playbook, targets)
            .await
    }

    /// 在独立任务中执行，带看门狗
    ///
    /// 适配器 panic 以 JoinError 形式返回；看门狗到期时中止任务，
    /// 子进程与临时文件随 future 一起释放
    async fn supervise(&self, request: &ExecutionRequest) -> JobReport {
        let executor = self.executor.clone();
        let owned = request.clone();
        let mut handle = tokio::spawn(async move { executor.run(&owned).await });

        match tokio::time::timeout(self.watchdog, &mut handle).await {
            Ok(Ok(Ok(outcome))) => JobReport {
                success: outcome.success,
                exit_code: outcome.exit_code,
                log_path: Some(outcome.log_path),
                error: outcome
                    .timed_out
                    .then(|| "Engine run timed out and was killed".to_string()),
            },
            Ok(Ok(Err(e))) => {
                error!(job_id = %request.job_id, error = %e, "Execution failed");
                JobReport::failed(DeployError::ExecutionAdapter(e.to_string()).to_string())
            }
            Ok(Err(e)) => {
                let reason = if e.is_panic() {
                    "Execution adapter panicked".to_string()
                } else {
                    format!("Execution task aborted: {}", e)
                };
                error!(job_id = %request.job_id, "{}", reason);
                JobReport::failed(reason)
            }
            Err(_) => {
                handle.abort();
                error!(
                    job_id = %request.job_id,
                    "Watchdog expired after {}s, aborting execution",
                    self.watchdog.as_secs()
                );
                JobReport::failed(format!(
                    "Watchdog expired after {}s",
                    self.watchdog.as_secs()
                ))
            }
        }
    }

    /// 收尾：终态、统计、归档、完成事件
    async fn complete(&self, request: &ExecutionRequest, report: JobReport) {
        let status = if report.success {
            HostStatus::Secured
        } else {
            HostStatus::Error
        };

        let changed = self.finish_with_retry(request, status).await;
        let secured = status == HostStatus::Secured;

        if let Err(e) = StatsAggregator::refresh(self.hosts.as_ref()).await {
            warn!(job_id = %request.job_id, error = %e, "Failed to refresh stats");
        }

        self.jobs.finish(&request.job_id, &report).await;

        if secured {
            info!(
                job_id = %request.job_id,
                environment = %request.environment,
                hosts = changed.len(),
                "Deployment completed successfully"
            );
        } else {
            warn!(
                job_id = %request.job_id,
                environment = %request.environment,
                exit_code = ?report.exit_code,
                error = ?report.error,
                "Deployment failed"
            );
        }

        self.events.publish(Event::Deployment(DeploymentEvent::completed(
            &request.job_id,
            &request.environment,
            &request.playbook,
            &request.targets,
            secured,
            report.exit_code,
        )));
    }

    /// 写入终态，直到成功为止
    ///
    /// 仓库不可用时指数退避重试，间隔封顶后持续重试。
    /// 写入成功前任务保持活跃，目标主机始终归属于该任务
    async fn finish_with_retry(&self, request: &ExecutionRequest, status: HostStatus) -> Vec<String> {
        let mut backoff = self.retry_backoff;
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match self
                .hosts
                .finish_deployment(&request.environment, &request.targets, status)
                .await
            {
                Ok(changed) => {
                    if attempt > 1 {
                        info!(job_id = %request.job_id, attempt, "Recorded final host status");
                    }
                    return changed;
                }
                Err(e) if attempt < STATUS_RETRY_ATTEMPTS => {
                    warn!(
                        job_id = %request.job_id,
                        attempt,
                        error = %e,
                        "Failed to record final host status, retrying"
                    );
                }
                Err(e) => {
                    error!(
                        job_id = %request.job_id,
                        hosts = ?request.targets,
                        attempt,
                        error = %e,
                        "Still unable to record final host status"
                    );
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(RETRY_BACKOFF_MAX);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::deploy::JobOutcome;
    use crate::domain::event::DeploymentPhase;
    use crate::domain::host::{Host, HostId, NewHost};
    use crate::domain::stats::StatsSnapshot;
    use crate::infra::inventory::YamlInventory;
    use crate::services::executor::{ExecutionError, ExecutionOutcome};
    use crate::state::event_hub::EventSubscription;
    use crate::state::host_store::{HostStore, RepositoryResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Exit(i32),
        Fail,
        Panic,
        Hang,
    }

    struct FakeAdapter {
        behaviour: Behaviour,
        /// 为 Some 时等待放行后才返回
        gate: Option<Arc<Notify>>,
        calls: Mutex<Vec<ExecutionRequest>>,
    }

    impl FakeAdapter {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                gate: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn gated(behaviour: Behaviour, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(behaviour)
            }
        }
    }

    #[async_trait]
    impl ExecutionAdapter for FakeAdapter {
        async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, ExecutionError> {
            self.calls.lock().unwrap().push(request.clone());
            if let Some(ref gate) = self.gate {
                gate.notified().await;
            }
            match self.behaviour {
                Behaviour::Exit(code) => Ok(ExecutionOutcome {
                    success: code == 0,
                    exit_code: Some(code),
                    timed_out: false,
                    log_path: "/tmp/fake.log".into(),
                }),
                Behaviour::Fail => Err(ExecutionError::Prepare(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "log dir not writable",
                ))),
                Behaviour::Panic => panic!("adapter exploded"),
                Behaviour::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    /// finish_deployment 前几次调用失败的仓库
    struct FlakyRepository {
        inner: HostStore,
        finish_failures: AtomicU32,
    }

    #[async_trait]
    impl HostRepository for FlakyRepository {
        async fn list_all(&self) -> RepositoryResult<Vec<Host>> {
            self.inner.list_all().await
        }
        async fn list_by_environment(&self, environment: &str) -> RepositoryResult<Vec<Host>> {
            self.inner.list_by_environment(environment).await
        }
        async fn list_by_group(&self, group: &str, environment: &str) -> RepositoryResult<Vec<Host>> {
            self.inner.list_by_group(group, environment).await
        }
        async fn get(&self, id: HostId) -> RepositoryResult<Host> {
            self.inner.get(id).await
        }
        async fn insert(&self, host: NewHost) -> RepositoryResult<Host> {
            self.inner.insert(host).await
        }
        async fn delete(&self, id: HostId) -> RepositoryResult<Host> {
            self.inner.delete(id).await
        }
        async fn set_status(
            &self,
            environment: &str,
            names: &[String],
            status: HostStatus,
        ) -> RepositoryResult<()> {
            self.inner.set_status(environment, names, status).await
        }
        async fn begin_deployment(&self, environment: &str, names: &[String]) -> RepositoryResult<()> {
            self.inner.begin_deployment(environment, names).await
        }
        async fn finish_deployment(
            &self,
            environment: &str,
            names: &[String],
            status: HostStatus,
        ) -> RepositoryResult<Vec<String>> {
            let failing = self
                .finish_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(RepositoryError::Unavailable("disk full".to_string()));
            }
            self.inner.finish_deployment(environment, names, status).await
        }
        async fn record_stats(&self, snapshot: StatsSnapshot) -> RepositoryResult<()> {
            self.inner.record_stats(snapshot).await
        }
        async fn latest_stats(&self) -> RepositoryResult<Option<StatsSnapshot>> {
            self.inner.latest_stats().await
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        hosts: Arc<dyn HostRepository>,
        events: Arc<EventHub>,
        jobs: Arc<JobStore>,
        _dir: tempfile::TempDir,
    }

    fn new_host(name: &str, environment: &str, groups: &[&str]) -> NewHost {
        NewHost {
            name: name.to_string(),
            ip: "10.0.0.1".to_string(),
            environment: environment.to_string(),
            security_level: "standard".to_string(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    async fn seed(repository: &dyn HostRepository) {
        repository.insert(new_host("A", "prod", &["web"])).await.unwrap();
        repository.insert(new_host("B", "prod", &["webserver"])).await.unwrap();
        repository.insert(new_host("C", "staging", &["web"])).await.unwrap();
    }

    async fn harness_with(
        hosts: Arc<dyn HostRepository>,
        adapter: FakeAdapter,
        watchdog: Duration,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let playbooks = PlaybookLibrary::new(dir.path().join("playbooks"));
        playbooks.create("site.yml", "- hosts: all\n").await.unwrap();

        seed(hosts.as_ref()).await;

        let events = Arc::new(EventHub::new());
        let jobs = Arc::new(JobStore::new());
        let dispatcher = Dispatcher::new(
            hosts.clone(),
            Arc::new(YamlInventory::new(dir.path().join("inventories"))),
            Arc::new(playbooks),
            Arc::new(adapter),
            events.clone(),
            jobs.clone(),
            watchdog,
        );

        Harness {
            dispatcher,
            hosts,
            events,
            jobs,
            _dir: dir,
        }
    }

    async fn harness(adapter: FakeAdapter) -> Harness {
        harness_with(Arc::new(HostStore::in_memory()), adapter, Duration::from_secs(10)).await
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|n| n.to_string()).collect()
    }

    async fn status_of(hosts: &dyn HostRepository, environment: &str, name: &str) -> HostStatus {
        hosts
            .list_by_environment(environment)
            .await
            .unwrap()
            .into_iter()
            .find(|h| h.name == name)
            .unwrap()
            .status
    }

    /// 等待指定任务的完成事件
    async fn wait_completed(events: &mut EventSubscription, job_id: &str) -> DeploymentEvent {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Some(Event::Deployment(event)) = events.next().await {
                    if event.job_id == job_id && event.phase == DeploymentPhase::Completed {
                        return event;
                    }
                }
            }
        })
        .await
        .expect("deployment did not complete")
    }

    #[tokio::test]
    async fn test_successful_deployment_secures_targets() {
        let h = harness(FakeAdapter::new(Behaviour::Exit(0))).await;
        let mut events = h.events.subscribe();

        let accepted = h
            .dispatcher
            .start_deployment("prod", "site.yml", names(&["A", "B"]))
            .await
            .unwrap();
        assert!(accepted.job_accepted);
        assert_eq!(accepted.target_count, 2);

        let started = events.next().await.unwrap();
        match started {
            Event::Deployment(e) => {
                assert_eq!(e.phase, DeploymentPhase::Started);
                assert_eq!(e.status, HostStatus::Deploying);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let completed = wait_completed(&mut events, &accepted.job_id).await;
        assert_eq!(completed.success, Some(true));
        assert_eq!(completed.hosts, names(&["A", "B"]));

        assert_eq!(status_of(h.hosts.as_ref(), "prod", "A").await, HostStatus::Secured);
        assert_eq!(status_of(h.hosts.as_ref(), "prod", "B").await, HostStatus::Secured);
        assert_eq!(status_of(h.hosts.as_ref(), "staging", "C").await, HostStatus::Pending);

        let prod: Vec<Host> = h.hosts.list_by_environment("prod").await.unwrap();
        let snapshot = StatsAggregator::compute(&prod);
        assert_eq!(
            (snapshot.host_count, snapshot.secured_count, snapshot.vulnerabilities_count),
            (2, 2, 0)
        );

        let job = h.jobs.get_any(&accepted.job_id).await.unwrap();
        assert_eq!(job.outcome, JobOutcome::Success);
        assert_eq!(h.jobs.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_deployment_marks_targets_error() {
        let h = harness(FakeAdapter::new(Behaviour::Exit(2))).await;
        let mut events = h.events.subscribe();

        let accepted = h
            .dispatcher
            .start_deployment("prod", "site.yml", names(&["A", "B"]))
            .await
            .unwrap();
        let completed = wait_completed(&mut events, &accepted.job_id).await;
        assert_eq!(completed.success, Some(false));
        assert_eq!(completed.exit_code, Some(2));

        assert_eq!(status_of(h.hosts.as_ref(), "prod", "A").await, HostStatus::Error);
        assert_eq!(status_of(h.hosts.as_ref(), "prod", "B").await, HostStatus::Error);

        // 三台主机中两台未加固
        let latest = h.hosts.latest_stats().await.unwrap().unwrap();
        assert_eq!(latest.host_count, 3);
        assert_eq!(latest.secured_count, 0);
        assert_eq!(latest.vulnerabilities_count, 1);

        let job = h.jobs.get_any(&accepted.job_id).await.unwrap();
        assert_eq!(job.outcome, JobOutcome::Failure);
        assert_eq!(job.exit_code, Some(2));
    }

    #[tokio::test]
    async fn test_overlapping_deployment_is_rejected() {
        let gate = Arc::new(Notify::new());
        let h = harness(FakeAdapter::gated(Behaviour::Exit(0), gate.clone())).await;
        let mut events = h.events.subscribe();

        let first = h
            .dispatcher
            .start_deployment("prod", "site.yml", names(&["A", "B"]))
            .await
            .unwrap();

        let second = h
            .dispatcher
            .start_deployment("prod", "site.yml", names(&["B"]))
            .await;
        match second {
            Err(DeployError::HostConflict(hosts)) => assert_eq!(hosts, names(&["B"])),
            other => panic!("expected conflict, got {:?}", other),
        }

        // 第一个任务的主机不受影响
        assert_eq!(status_of(h.hosts.as_ref(), "prod", "A").await, HostStatus::Deploying);
        assert_eq!(status_of(h.hosts.as_ref(), "prod", "B").await, HostStatus::Deploying);
        assert_eq!(h.jobs.active_count().await, 1);

        gate.notify_one();
        wait_completed(&mut events, &first.job_id).await;
        assert_eq!(status_of(h.hosts.as_ref(), "prod", "B").await, HostStatus::Secured);
    }

    #[tokio::test]
    async fn test_disjoint_deployments_run_concurrently() {
        let gate = Arc::new(Notify::new());
        let h = harness(FakeAdapter::gated(Behaviour::Exit(0), gate.clone())).await;

        h.dispatcher
            .start_deployment("prod", "site.yml", names(&["A"]))
            .await
            .unwrap();
        h.dispatcher
            .start_deployment("prod", "site.yml", names(&["B"]))
            .await
            .unwrap();
        assert_eq!(h.jobs.active_count().await, 2);
        assert_eq!(status_of(h.hosts.as_ref(), "prod", "A").await, HostStatus::Deploying);
        assert_eq!(status_of(h.hosts.as_ref(), "prod", "B").await, HostStatus::Deploying);
    }

    #[tokio::test]
    async fn test_validation_errors_do_not_mutate() {
        let h = harness(FakeAdapter::new(Behaviour::Exit(0))).await;

        assert!(matches!(
            h.dispatcher.start_deployment("prod", "site.yml", vec![]).await,
            Err(DeployError::NoTargets)
        ));
        assert!(matches!(
            h.dispatcher
                .start_deployment("prod", "missing.yml", names(&["A"]))
                .await,
            Err(DeployError::UnknownPlaybook(name)) if name == "missing.yml"
        ));
        match h
            .dispatcher
            .start_deployment("prod", "site.yml", names(&["A", "ghost"]))
            .await
        {
            Err(DeployError::UnknownHosts(hosts)) => assert_eq!(hosts, names(&["ghost"])),
            other => panic!("expected unknown hosts, got {:?}", other),
        }

        assert_eq!(status_of(h.hosts.as_ref(), "prod", "A").await, HostStatus::Pending);
        assert_eq!(h.jobs.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_resolve_targets() {
        let h = harness(FakeAdapter::new(Behaviour::Exit(0))).await;

        // 分组精确匹配，web 不会匹配 webserver
        let by_group = h
            .dispatcher
            .resolve_targets("prod", Some(names(&["B"]).as_slice()), Some("web"))
            .await
            .unwrap();
        assert_eq!(by_group, names(&["A"]));

        let explicit = h
            .dispatcher
            .resolve_targets("prod", Some(names(&["B", "ghost"]).as_slice()), None)
            .await
            .unwrap();
        assert_eq!(explicit, names(&["B", "ghost"]));

        let mut all = h
            .dispatcher
            .resolve_targets("prod", Some(&[][..]), None)
            .await
            .unwrap();
        all.sort();
        assert_eq!(all, names(&["A", "B"]));

        assert!(matches!(
            h.dispatcher.resolve_targets("empty", None, None).await,
            Err(DeployError::NoTargets)
        ));
        assert!(matches!(
            h.dispatcher.resolve_targets("prod", None, Some("db")).await,
            Err(DeployError::NoTargets)
        ));
    }

    #[tokio::test]
    async fn test_request_deployment_empty_environment_creates_no_job() {
        let h = harness(FakeAdapter::new(Behaviour::Exit(0))).await;

        let request = DeployRequest {
            environment: "empty".to_string(),
            playbook: "site.yml".to_string(),
            hosts: None,
            group: None,
        };
        assert!(matches!(
            h.dispatcher.request_deployment(request).await,
            Err(DeployError::NoTargets)
        ));
        assert_eq!(h.jobs.active_count().await, 0);
        assert_eq!(h.jobs.history_count().await, 0);
    }

    #[tokio::test]
    async fn test_request_deployment_passes_targets_to_adapter() {
        let adapter = Arc::new(FakeAdapter::new(Behaviour::Exit(0)));
        let dir = tempfile::tempdir().unwrap();
        let playbooks = PlaybookLibrary::new(dir.path());
        playbooks.create("harden.yml", "").await.unwrap();
        let hosts: Arc<dyn HostRepository> = Arc::new(HostStore::in_memory());
        seed(hosts.as_ref()).await;
        let events = Arc::new(EventHub::new());
        let dispatcher = Dispatcher::new(
            hosts,
            Arc::new(YamlInventory::new(dir.path().join("inventories"))),
            Arc::new(playbooks),
            adapter.clone(),
            events.clone(),
            Arc::new(JobStore::new()),
            Duration::from_secs(10),
        );
        let mut subscription = events.subscribe();

        let accepted = dispatcher
            .request_deployment(DeployRequest {
                environment: "staging".to_string(),
                playbook: "harden.yml".to_string(),
                hosts: None,
                group: Some("web".to_string()),
            })
            .await
            .unwrap();
        wait_completed(&mut subscription, &accepted.job_id).await;

        let calls = adapter.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].targets, names(&["C"]));
        assert_eq!(calls[0].environment, "staging");
        assert!(calls[0].inventory_path.ends_with("staging/hosts.yml"));
        assert!(calls[0].playbook_path.ends_with("harden.yml"));
    }

    #[tokio::test]
    async fn test_adapter_error_marks_targets_error() {
        let h = harness(FakeAdapter::new(Behaviour::Fail)).await;
        let mut events = h.events.subscribe();

        let accepted = h
            .dispatcher
            .start_deployment("prod", "site.yml", names(&["A"]))
            .await
            .unwrap();
        let completed = wait_completed(&mut events, &accepted.job_id).await;
        assert_eq!(completed.success, Some(false));
        assert_eq!(status_of(h.hosts.as_ref(), "prod", "A").await, HostStatus::Error);

        let job = h.jobs.get_any(&accepted.job_id).await.unwrap();
        assert!(job.error.unwrap().contains("log dir not writable"));
    }

    #[tokio::test]
    async fn test_adapter_panic_is_contained() {
        let h = harness(FakeAdapter::new(Behaviour::Panic)).await;
        let mut events = h.events.subscribe();

        let accepted = h
            .dispatcher
            .start_deployment("prod", "site.yml", names(&["A", "B"]))
            .await
            .unwrap();
        let completed = wait_completed(&mut events, &accepted.job_id).await;
        assert_eq!(completed.success, Some(false));
        assert_eq!(status_of(h.hosts.as_ref(), "prod", "A").await, HostStatus::Error);
        assert_eq!(status_of(h.hosts.as_ref(), "prod", "B").await, HostStatus::Error);
    }

    #[tokio::test]
    async fn test_watchdog_forces_error() {
        let h = harness_with(
            Arc::new(HostStore::in_memory()),
            FakeAdapter::new(Behaviour::Hang),
            Duration::from_millis(200),
        )
        .await;
        let mut events = h.events.subscribe();

        let accepted = h
            .dispatcher
            .start_deployment("prod", "site.yml", names(&["A"]))
            .await
            .unwrap();
        let completed = wait_completed(&mut events, &accepted.job_id).await;
        assert_eq!(completed.success, Some(false));
        assert_eq!(status_of(h.hosts.as_ref(), "prod", "A").await, HostStatus::Error);

        let job = h.jobs.get_any(&accepted.job_id).await.unwrap();
        assert!(job.error.unwrap().contains("Watchdog"));
    }

    #[tokio::test]
    async fn test_final_status_is_retried() {
        let repository = Arc::new(FlakyRepository {
            inner: HostStore::in_memory(),
            finish_failures: AtomicU32::new(2),
        });
        let h = harness_with(
            repository.clone(),
            FakeAdapter::new(Behaviour::Exit(0)),
            Duration::from_secs(10),
        )
        .await;
        let mut events = h.events.subscribe();

        let accepted = h
            .dispatcher
            .start_deployment("prod", "site.yml", names(&["A"]))
            .await
            .unwrap();
        wait_completed(&mut events, &accepted.job_id).await;

        assert_eq!(repository.finish_failures.load(Ordering::SeqCst), 0);
        assert_eq!(status_of(h.hosts.as_ref(), "prod", "A").await, HostStatus::Secured);
    }

    #[tokio::test]
    async fn test_final_status_outlasts_retry_budget() {
        let repository = Arc::new(FlakyRepository {
            inner: HostStore::in_memory(),
            finish_failures: AtomicU32::new(STATUS_RETRY_ATTEMPTS + 3),
        });
        let mut h = harness_with(
            repository.clone(),
            FakeAdapter::new(Behaviour::Exit(0)),
            Duration::from_secs(10),
        )
        .await;
        h.dispatcher = h.dispatcher.with_retry_backoff(Duration::from_millis(1));
        let mut events = h.events.subscribe();

        let accepted = h
            .dispatcher
            .start_deployment("prod", "site.yml", names(&["A"]))
            .await
            .unwrap();
        let completed = wait_completed(&mut events, &accepted.job_id).await;

        assert_eq!(completed.success, Some(true));
        assert_eq!(repository.finish_failures.load(Ordering::SeqCst), 0);
        assert_eq!(status_of(h.hosts.as_ref(), "prod", "A").await, HostStatus::Secured);
        assert_eq!(h.jobs.active_count().await, 0);

        // 主机可再次部署
        let again = h
            .dispatcher
            .start_deployment("prod", "site.yml", names(&["A"]))
            .await
            .unwrap();
        wait_completed(&mut events, &again.job_id).await;
        assert_eq!(status_of(h.hosts.as_ref(), "prod", "A").await, HostStatus::Secured);
    }

    #[tokio::test]
    async fn test_job_stays_active_while_final_status_is_pending() {
        let repository = Arc::new(FlakyRepository {
            inner: HostStore::in_memory(),
            finish_failures: AtomicU32::new(u32::MAX),
        });
        let h = harness_with(
            repository.clone(),
            FakeAdapter::new(Behaviour::Exit(0)),
            Duration::from_secs(10),
        )
        .await;
        let dispatcher = h.dispatcher.clone().with_retry_backoff(Duration::from_millis(1));

        dispatcher
            .start_deployment("prod", "site.yml", names(&["A"]))
            .await
            .unwrap();

        // 等到重试次数超过初始预算
        tokio::time::timeout(Duration::from_secs(10), async {
            while u32::MAX - repository.finish_failures.load(Ordering::SeqCst)
                <= STATUS_RETRY_ATTEMPTS
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(status_of(h.hosts.as_ref(), "prod", "A").await, HostStatus::Deploying);
        assert_eq!(h.jobs.active_count().await, 1);

        // 仓库恢复后终态落盘，任务归档
        repository.finish_failures.store(0, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(10), async {
            while h.jobs.active_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(status_of(h.hosts.as_ref(), "prod", "A").await, HostStatus::Secured);
    }

    #[test]
    fn test_playbook_io_error_maps_to_repository() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(
            DeployError::from(PlaybookError::Io(io)),
            DeployError::Repository(RepositoryError::Unavailable(_))
        ));
    }

    #[test]
    fn test_repository_error_mapping() {
        let missing = RepositoryError::MissingHosts {
            environment: "prod".to_string(),
            names: names(&["x"]),
        };
        assert!(matches!(DeployError::from(missing), DeployError::UnknownHosts(_)));
        assert!(matches!(
            DeployError::from(RepositoryError::Conflict(names(&["x"]))),
            DeployError::HostConflict(_)
        ));
        assert!(matches!(
            DeployError::from(RepositoryError::Unavailable("down".to_string())),
            DeployError::Repository(_)
        ));
    }
}

//! 发现阶段编排
//!
//! 从根目录开始逐层建立目录任务，限制同时进行的远程列举数，
//! 汇总重命名表、待定删除和选择性同步状态，并通过事件流把结果交给下游。
//! 所有状态只在 [`DiscoveryPhase::run`] 所在的任务中修改，列举结果通过通道送回。

use crate::config::DiscoveryConfig;
use crate::core::comparator::FileComparator;
use crate::core::comparison::{ChildRequest, Comparison, DirectoryJob, JobKind, QueryMode};
use crate::core::exclude::ExcludeFilter;
use crate::core::listing::{ListingResult, RemoteListing, SingleDirectoryListing};
use crate::core::pending::PendingDeletions;
use crate::core::records::{
    Classification, DiscoveredItem, DiscoveryEvent, Direction, Instruction, ItemType,
};
use crate::core::renames::RenameTable;
use crate::core::selective::SelectiveSyncLists;
use crate::db::JournalSnapshot;
use crate::error::{DiscoveryError, Result};
use crate::storage::{Account, LocalFilesystem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 目录任务编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub usize);

/// 本地发现方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalDiscoveryStyle {
    /// 每个目录都读取文件系统
    #[default]
    FilesystemOnly,
    /// 只读取判定函数选中的目录，其余用日志内容
    DatabaseAndFilesystem,
}

pub type DiscoverLocallyFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// 发现阶段的只读输入
pub struct DiscoveryContext {
    pub account: Arc<Account>,
    pub local: Arc<dyn LocalFilesystem>,
    pub excludes: Arc<dyn ExcludeFilter>,
    pub journal: Arc<JournalSnapshot>,
    pub config: DiscoveryConfig,
    pub comparator: FileComparator,
    pub local_discovery_style: LocalDiscoveryStyle,
    should_discover_locally: Option<DiscoverLocallyFn>,
    pub phase_id: Uuid,
}

impl DiscoveryContext {
    pub fn new(
        account: Arc<Account>,
        local: Arc<dyn LocalFilesystem>,
        excludes: Arc<dyn ExcludeFilter>,
        journal: Arc<JournalSnapshot>,
        config: DiscoveryConfig,
    ) -> Self {
        let comparator = FileComparator::with_config(config.compare_config());
        Self {
            account,
            local,
            excludes,
            journal,
            config,
            comparator,
            local_discovery_style: LocalDiscoveryStyle::FilesystemOnly,
            should_discover_locally: None,
            phase_id: Uuid::new_v4(),
        }
    }

    pub fn with_local_discovery(
        mut self,
        style: LocalDiscoveryStyle,
        predicate: Option<DiscoverLocallyFn>,
    ) -> Self {
        self.local_discovery_style = style;
        self.should_discover_locally = predicate;
        self
    }

    /// 该目录是否需要读取本地文件系统
    pub fn should_discover_locally(&self, path: &str) -> bool {
        match self.local_discovery_style {
            LocalDiscoveryStyle::FilesystemOnly => true,
            LocalDiscoveryStyle::DatabaseAndFilesystem => self
                .should_discover_locally
                .as_ref()
                .map_or(true, |predicate| predicate(path)),
        }
    }
}

/// 事件发送与计数，致命错误之后不再发送任何事件
pub(crate) struct EventEmitter {
    tx: mpsc::UnboundedSender<DiscoveryEvent>,
    closed: bool,
    counts: BTreeMap<Classification, usize>,
    silently_excluded: usize,
    big_folders: Vec<String>,
}

impl EventEmitter {
    fn new(tx: mpsc::UnboundedSender<DiscoveryEvent>) -> Self {
        Self {
            tx,
            closed: false,
            counts: BTreeMap::new(),
            silently_excluded: 0,
            big_folders: Vec::new(),
        }
    }

    fn send(&mut self, event: DiscoveryEvent) {
        if self.closed {
            return;
        }
        // 接收端已关闭时继续完成阶段，结果仍在汇总中
        let _ = self.tx.send(event);
    }

    pub fn item(&mut self, item: DiscoveredItem) {
        if self.closed {
            return;
        }
        *self.counts.entry(item.classification()).or_default() += 1;
        self.send(DiscoveryEvent::ItemDiscovered(Box::new(item)));
    }

    pub fn silently_excluded(&mut self, path: &str) {
        if self.closed {
            return;
        }
        self.silently_excluded += 1;
        self.send(DiscoveryEvent::SilentlyExcluded {
            path: path.to_string(),
        });
    }

    pub fn new_big_folder(&mut self, path: &str, is_external: bool) {
        if self.closed {
            return;
        }
        self.big_folders.push(path.to_string());
        self.send(DiscoveryEvent::NewBigFolder {
            path: path.to_string(),
            is_external,
        });
    }

    fn fatal(&mut self, message: String) {
        self.send(DiscoveryEvent::FatalError { message });
        self.closed = true;
    }

    fn finished(&mut self) {
        self.send(DiscoveryEvent::Finished);
        self.closed = true;
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// 比较过程中共享的可变状态
pub(crate) struct PhaseState {
    pub renamed_remote: RenameTable,
    pub renamed_local: RenameTable,
    pub pending: PendingDeletions,
    pub selective: SelectiveSyncLists,
    pub emitter: EventEmitter,
    pub cancelled_jobs: HashSet<JobId>,
    /// 因另一端有修改而重新新建的原路径，不能再被重命名认领
    pub revived: HashSet<String>,
    /// 已观察到的远程目录 etag，按日志路径索引
    pub remote_dir_etags: HashMap<String, String>,
    pub errors: Vec<String>,
    pub data_fingerprint: Option<String>,
}

impl PhaseState {
    /// 撤销一个待定删除，返回是否找到以及它删除前的 etag
    pub fn find_and_cancel_deleted_job(&mut self, path: &str) -> (bool, String) {
        match self.pending.find_and_cancel(path) {
            Some(pending) => {
                if let Some(job) = pending.job {
                    self.cancelled_jobs.insert(job);
                }
                (true, pending.etag)
            }
            None => (false, String::new()),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct JobArena {
    slots: Vec<Option<DirectoryJob>>,
}

impl JobArena {
    pub fn insert(&mut self, mut job: DirectoryJob) -> JobId {
        let id = JobId(self.slots.len());
        job.id = id;
        self.slots.push(Some(job));
        id
    }

    pub fn get(&self, id: JobId) -> Option<&DirectoryJob> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut DirectoryJob> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn remove(&mut self, id: JobId) -> Option<DirectoryJob> {
        self.slots.get_mut(id.0).and_then(Option::take)
    }

    pub fn children_of(&self, parent: JobId) -> Vec<JobId> {
        self.slots
            .iter()
            .flatten()
            .filter(|job| job.parent == Some(parent))
            .map(|job| job.id)
            .collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DirectoryJob> {
        self.slots.iter_mut().flatten()
    }

    pub fn live(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

/// 列举任务送回的消息
#[derive(Debug)]
pub(crate) enum PhaseMessage {
    Listed { job: JobId, result: ListingResult },
}

/// 从其他任务取消发现阶段
#[derive(Debug, Clone)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// 发现阶段汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverySummary {
    pub phase_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub counts: BTreeMap<Classification, usize>,
    pub silently_excluded: usize,
    pub big_folders: Vec<String>,
    pub errors: Vec<String>,
    /// 服务器返回的数据指纹
    pub data_fingerprint: Option<String>,
    /// 阶段结束时的白名单（包含本次自动加入的新目录）
    pub white_list: Vec<String>,
    pub listings: usize,
    pub duration_ms: u64,
}

impl DiscoverySummary {
    pub fn count(&self, classification: Classification) -> usize {
        self.counts.get(&classification).copied().unwrap_or(0)
    }

    pub fn total_items(&self) -> usize {
        self.counts.values().sum()
    }

    /// 是否存在需要同步的变化
    pub fn has_changes(&self) -> bool {
        self.counts
            .iter()
            .any(|(c, n)| *n > 0 && !matches!(c, Classification::Unchanged | Classification::Excluded))
    }
}

pub type DiscoveryEvents = UnboundedReceiverStream<DiscoveryEvent>;

/// 一次发现阶段
pub struct DiscoveryPhase {
    ctx: DiscoveryContext,
    state: PhaseState,
    jobs: JobArena,
    queue: VecDeque<JobId>,
    /// 已删除目录的任务，主树完成后再执行
    deferred: VecDeque<JobId>,
    active: usize,
    listings_started: usize,
    tx: mpsc::UnboundedSender<PhaseMessage>,
    rx: mpsc::UnboundedReceiver<PhaseMessage>,
    abort: CancellationToken,
    fatal_error: Option<DiscoveryError>,
}

impl DiscoveryPhase {
    pub fn new(ctx: DiscoveryContext) -> Result<(Self, DiscoveryEvents)> {
        ctx.config.validate()?;
        let selective = SelectiveSyncLists::new(
            &ctx.config.selective_sync_black_list,
            &ctx.config.selective_sync_white_list,
        )?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (tx, rx) = mpsc::unbounded_channel();
        let phase = Self {
            ctx,
            state: PhaseState {
                renamed_remote: RenameTable::new(),
                renamed_local: RenameTable::new(),
                pending: PendingDeletions::new(),
                selective,
                emitter: EventEmitter::new(event_tx),
                cancelled_jobs: HashSet::new(),
                revived: HashSet::new(),
                remote_dir_etags: HashMap::new(),
                errors: Vec::new(),
                data_fingerprint: None,
            },
            jobs: JobArena::default(),
            queue: VecDeque::new(),
            deferred: VecDeque::new(),
            active: 0,
            listings_started: 0,
            tx,
            rx,
            abort: CancellationToken::new(),
            fatal_error: None,
        };
        Ok((phase, UnboundedReceiverStream::new(event_rx)))
    }

    pub fn set_selective_sync_black_list(&mut self, list: &[String]) -> Result<()> {
        self.state.selective.set_black_list(list)
    }

    pub fn set_selective_sync_white_list(&mut self, list: &[String]) -> Result<()> {
        self.state.selective.set_white_list(list)
    }

    pub fn selective_sync_white_list(&self) -> &[String] {
        self.state.selective.white_list()
    }

    pub fn is_in_selective_sync_black_list(&self, path: &str) -> bool {
        self.state.selective.is_in_black_list(path)
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            token: self.abort.clone(),
        }
    }

    /// 按已检测到的重命名改写路径
    ///
    /// `Direction::Down` 使用服务器上的重命名，`Direction::Up` 使用本地的重命名。
    pub fn adjust_renamed_path(&self, path: &str, direction: Direction) -> String {
        match direction {
            Direction::Down => self.state.renamed_remote.adjust(path),
            _ => self.state.renamed_local.adjust(path),
        }
    }

    /// 登记待定删除；`job` 为该目录的延迟任务，撤销时一并取消
    pub fn register_pending_deletion(&mut self, path: &str, item: DiscoveredItem, job: Option<JobId>) {
        self.state.pending.register(path, item, job);
    }

    pub fn find_and_cancel_deleted_job(&mut self, path: &str) -> (bool, String) {
        self.state.find_and_cancel_deleted_job(path)
    }

    /// 执行发现阶段，直到所有目录比较完成、出现致命错误或被取消
    pub async fn run(mut self) -> Result<DiscoverySummary> {
        let started = Instant::now();
        let started_at = Utc::now();
        info!(
            "开始发现阶段 {} (远程: {}, 并发: {})",
            self.ctx.phase_id,
            self.ctx.account.name,
            self.ctx.config.max_active_jobs
        );

        let root = self.jobs.insert(DirectoryJob::root(self.ctx.config.root_pin_state));
        self.queue.push_back(root);

        let abort = self.abort.clone();
        let mut aborted = false;
        loop {
            self.schedule_more_jobs();
            if self.fatal_error.is_some() {
                break;
            }
            if self.active == 0 && self.queue.is_empty() {
                // 主树已完成，开始比较已删除的目录
                let deferred: Vec<JobId> = self
                    .deferred
                    .drain(..)
                    .filter(|id| !self.state.cancelled_jobs.contains(id))
                    .collect();
                if deferred.is_empty() {
                    break;
                }
                debug!("开始比较 {} 个已删除目录", deferred.len());
                self.queue.extend(deferred);
                continue;
            }

            let message = tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    aborted = true;
                    break;
                }
                message = self.rx.recv() => message,
            };
            match message {
                Some(PhaseMessage::Listed { job, result }) => self.handle_listed(job, result),
                None => break,
            }
        }

        if let Some(err) = self.fatal_error.take() {
            return Err(err);
        }
        if aborted {
            warn!("发现阶段已取消: {}", self.ctx.phase_id);
            self.abort_all();
            self.state.emitter.close();
            return Err(DiscoveryError::Aborted);
        }

        // 剩余的待定删除此时才发出
        let deletions = self.state.pending.drain();
        debug!("发出 {} 个删除项", deletions.len());
        for (_, pending) in deletions {
            self.state.emitter.item(pending.item);
        }
        if self.jobs.live() > 0 {
            warn!("发现阶段结束时仍有 {} 个未完成的目录任务", self.jobs.live());
        }
        self.state.emitter.finished();

        let summary = DiscoverySummary {
            phase_id: self.ctx.phase_id,
            started_at,
            counts: std::mem::take(&mut self.state.emitter.counts),
            silently_excluded: self.state.emitter.silently_excluded,
            big_folders: std::mem::take(&mut self.state.emitter.big_folders),
            errors: std::mem::take(&mut self.state.errors),
            data_fingerprint: self.state.data_fingerprint.take(),
            white_list: self.state.selective.white_list().to_vec(),
            listings: self.listings_started,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "发现阶段完成: {} 个条目, {} 次列举, 耗时 {} ms",
            summary.total_items(),
            summary.listings,
            summary.duration_ms
        );
        Ok(summary)
    }

    fn schedule_more_jobs(&mut self) {
        while self.fatal_error.is_none() && self.active < self.ctx.config.max_active_jobs {
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            if self.state.cancelled_jobs.contains(&id) {
                self.drop_job(id);
                continue;
            }
            if self.jobs.get(id).is_some() {
                self.start_job(id);
            }
        }
    }

    fn start_job(&mut self, id: JobId) {
        let ctx = &self.ctx;
        let Some(job) = self.jobs.get_mut(id) else {
            return;
        };

        let local = match job.query_local {
            QueryMode::ParentMissing => Ok(Vec::new()),
            QueryMode::FromJournal => Ok(ctx
                .journal
                .children_of(&job.paths.original)
                .map(|r| r.to_local_entry())
                .collect()),
            QueryMode::Normal => ctx
                .local
                .list_directory(&job.paths.local)
                .map(Option::unwrap_or_default)
                .map_err(|e| format!("{:#}", e)),
        };
        let local = match local {
            Ok(entries) => entries,
            Err(message) => {
                let path = job.paths.local.clone();
                if job.is_root {
                    self.fail_phase(DiscoveryError::LocalListing { path, message });
                } else {
                    self.job_failed(id, message);
                }
                return;
            }
        };
        job.local_entries = Some(local);

        match job.query_server {
            QueryMode::Normal => {
                let mut listing = SingleDirectoryListing::new(&ctx.account, job.paths.server.clone());
                listing.set_is_root_path(job.is_root);
                let tx = self.tx.clone();
                listing.start(move |result| {
                    let _ = tx.send(PhaseMessage::Listed { job: id, result });
                });
                job.listing = Some(listing);
                self.active += 1;
                self.listings_started += 1;
            }
            QueryMode::ParentMissing => self.finish_listing(id, Ok(RemoteListing::default())),
            QueryMode::FromJournal => {
                let original = job.paths.original.clone();
                let listing = RemoteListing {
                    entries: ctx
                        .journal
                        .children_of(&original)
                        .map(|r| r.to_remote_entry())
                        .collect(),
                    dir_etag: ctx
                        .journal
                        .get(&original)
                        .map(|r| r.etag.clone())
                        .unwrap_or_default(),
                    ..Default::default()
                };
                self.finish_listing(id, Ok(listing));
            }
        }
    }

    fn handle_listed(&mut self, id: JobId, result: ListingResult) {
        let Some(job) = self.jobs.get_mut(id) else {
            return;
        };
        // 已取消的列举不再处理
        if job.listing.take().is_none() {
            return;
        }
        self.active -= 1;
        self.finish_listing(id, result);
    }

    fn finish_listing(&mut self, id: JobId, result: ListingResult) {
        if self.state.cancelled_jobs.contains(&id) {
            self.drop_job(id);
            return;
        }
        let Some(job) = self.jobs.get_mut(id) else {
            return;
        };
        let is_root = job.is_root;
        let listing = match result {
            Ok(listing) => listing,
            Err(message) => {
                if is_root {
                    self.fail_phase(DiscoveryError::Listing {
                        path: "/".to_string(),
                        message,
                    });
                } else {
                    self.job_failed(id, message);
                }
                return;
            }
        };
        let local = job.local_entries.take().unwrap_or_default();
        // 目录自身的信息以列举结果为准
        if let Some(item) = job.dir_item.as_mut() {
            if !listing.dir_perm.is_null() {
                item.remote_perm = listing.dir_perm;
            }
            item.is_external_storage |= listing.is_external_storage;
        }
        let paths = job.paths.clone();
        let pin_state = job.pin_state;
        let kind = job.kind;

        if is_root {
            if let Some(actual) = &listing.data_fingerprint {
                let expected = self.ctx.journal.data_fingerprint();
                if !expected.is_empty() && expected != actual {
                    self.fail_phase(DiscoveryError::FingerprintMismatch {
                        expected: expected.to_string(),
                        actual: actual.clone(),
                    });
                    return;
                }
            }
            self.state.data_fingerprint = listing.data_fingerprint.clone();
        }

        if !listing.dir_etag.is_empty() {
            self.state
                .remote_dir_etags
                .insert(paths.original.clone(), listing.dir_etag.clone());
        }

        let outcome = Comparison::new(&self.ctx, &mut self.state, &paths, pin_state, kind)
            .run(local, listing.entries);
        if outcome.resurrect {
            self.state.pending.resurrect(&paths.original);
        }
        for request in outcome.children {
            self.add_child(id, request);
        }
        if let Some(job) = self.jobs.get_mut(id) {
            job.compared = true;
        }
        self.try_complete(id);
    }

    fn add_child(&mut self, parent: JobId, request: ChildRequest) {
        let deferred = request.kind == JobKind::DeletedDirectory;
        let (mut job, item) = DirectoryJob::from_request((!deferred).then_some(parent), request);
        if deferred {
            let original = job.paths.original.clone();
            // 同一目录中稍后处理的兄弟条目可能已把它识别为重命名
            if self.state.renamed_remote.contains_original(&original)
                || self.state.renamed_local.contains_original(&original)
            {
                debug!("已按重命名处理，不再删除: {}", original);
                return;
            }
            let id = self.jobs.insert(job);
            self.state.pending.register(original, item, Some(id));
            self.deferred.push_back(id);
        } else {
            job.dir_item = Some(item);
            let id = self.jobs.insert(job);
            if let Some(parent) = self.jobs.get_mut(parent) {
                parent.pending_children += 1;
            }
            self.queue.push_back(id);
        }
    }

    /// 目录比较完成且子任务都结束后发出目录条目，并沿父链向上检查
    fn try_complete(&mut self, id: JobId) {
        let mut current = Some(id);
        while let Some(id) = current {
            let done = self
                .jobs
                .get(id)
                .is_some_and(|job| job.compared && job.pending_children == 0);
            if !done {
                break;
            }
            let Some(job) = self.jobs.remove(id) else {
                break;
            };
            if let Some(item) = job.dir_item {
                self.state.emitter.item(item);
            }
            current = job.parent;
            if let Some(parent) = current.and_then(|p| self.jobs.get_mut(p)) {
                parent.pending_children = parent.pending_children.saturating_sub(1);
            }
        }
    }

    /// 非根目录列举失败：目录条目改为错误，其余目录继续
    fn job_failed(&mut self, id: JobId, message: String) {
        let Some(job) = self.jobs.get_mut(id) else {
            return;
        };
        if job.abort() {
            self.active = self.active.saturating_sub(1);
        }
        warn!("目录发现失败: {}: {}", job.paths.target, message);

        let mut item = job
            .dir_item
            .take()
            .unwrap_or_else(|| DiscoveredItem::new(&job.paths.target, &job.paths.original));
        item.item_type = ItemType::Directory;
        item.instruction = Instruction::Error;
        item.direction = Direction::None;
        item.error = Some(message.clone());
        job.dir_item = Some(item);
        job.local_entries = None;
        job.compared = true;

        self.state
            .errors
            .push(format!("{}: {}", job.paths.target, message));
        if job.kind == JobKind::DeletedDirectory {
            // 无法确认目录内容，不删除
            let original = job.paths.original.clone();
            self.state.pending.find_and_cancel(&original);
        }
        self.try_complete(id);
    }

    /// 丢弃任务及其子任务，不发出任何条目
    fn drop_job(&mut self, id: JobId) {
        let Some(mut job) = self.jobs.remove(id) else {
            return;
        };
        if job.abort() {
            self.active = self.active.saturating_sub(1);
        }
        debug!("丢弃目录任务: {}", job.paths.target);
        for child in self.jobs.children_of(id) {
            self.drop_job(child);
        }
        if let Some(parent) = job.parent {
            if let Some(parent_job) = self.jobs.get_mut(parent) {
                parent_job.pending_children = parent_job.pending_children.saturating_sub(1);
            }
            self.try_complete(parent);
        }
    }

    fn fail_phase(&mut self, err: DiscoveryError) {
        error!("发现阶段失败: {}", err);
        self.state.emitter.fatal(err.to_string());
        self.abort_all();
        self.fatal_error = Some(err);
    }

    fn abort_all(&mut self) {
        for job in self.jobs.iter_mut() {
            job.abort();
        }
        self.active = 0;
        self.queue.clear();
        self.deferred.clear();
        self.state.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pinstate::PinState;

    fn emitter() -> (EventEmitter, mpsc::UnboundedReceiver<DiscoveryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventEmitter::new(tx), rx)
    }

    #[test]
    fn test_job_arena_reuses_nothing() {
        let mut arena = JobArena::default();
        let root = arena.insert(DirectoryJob::root(PinState::AlwaysLocal));
        let mut child = DirectoryJob::root(PinState::AlwaysLocal);
        child.parent = Some(root);
        child.is_root = false;
        let child = arena.insert(child);

        assert_eq!(root, JobId(0));
        assert_eq!(child, JobId(1));
        assert_eq!(arena.get(child).map(|j| j.id), Some(child));
        assert_eq!(arena.children_of(root), vec![child]);

        assert!(arena.remove(child).is_some());
        assert!(arena.get(child).is_none());
        assert_eq!(arena.live(), 1);
        assert_eq!(arena.insert(DirectoryJob::root(PinState::Inherited)), JobId(2));
    }

    #[test]
    fn test_emitter_stops_after_fatal() {
        let (mut emitter, mut rx) = emitter();
        emitter.item(DiscoveredItem::new("a", "a"));
        emitter.fatal("boom".to_string());
        emitter.item(DiscoveredItem::new("b", "b"));
        emitter.finished();

        assert!(matches!(rx.try_recv(), Ok(DiscoveryEvent::ItemDiscovered(_))));
        assert!(matches!(rx.try_recv(), Ok(DiscoveryEvent::FatalError { .. })));
        assert!(rx.try_recv().is_err());
        assert_eq!(emitter.counts.get(&Classification::Unchanged), Some(&1));
    }

    #[test]
    fn test_cancel_marks_deferred_job() {
        let (emitter, _rx) = emitter();
        let mut state = PhaseState {
            renamed_remote: RenameTable::new(),
            renamed_local: RenameTable::new(),
            pending: PendingDeletions::new(),
            selective: SelectiveSyncLists::default(),
            emitter,
            cancelled_jobs: HashSet::new(),
            revived: HashSet::new(),
            remote_dir_etags: HashMap::new(),
            errors: Vec::new(),
            data_fingerprint: None,
        };
        let mut item = DiscoveredItem::new("dir", "dir");
        item.etag = "e1".to_string();
        state.pending.register("dir", item, Some(JobId(7)));

        assert_eq!(state.find_and_cancel_deleted_job("dir"), (true, "e1".to_string()));
        assert!(state.cancelled_jobs.contains(&JobId(7)));
        assert_eq!(state.find_and_cancel_deleted_job("dir"), (false, String::new()));
    }

    #[test]
    fn test_summary_changes() {
        let mut summary = DiscoverySummary {
            phase_id: Uuid::new_v4(),
            started_at: Utc::now(),
            counts: BTreeMap::new(),
            silently_excluded: 0,
            big_folders: Vec::new(),
            errors: Vec::new(),
            data_fingerprint: None,
            white_list: Vec::new(),
            listings: 0,
            duration_ms: 0,
        };
        summary.counts.insert(Classification::Unchanged, 3);
        assert!(!summary.has_changes());
        summary.counts.insert(Classification::New, 1);
        assert!(summary.has_changes());
        assert_eq!(summary.count(Classification::New), 1);
        assert_eq!(summary.total_items(), 4);
    }
}

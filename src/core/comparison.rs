//! 单个目录的三方比较
//!
//! 把同一目录下的远程列举、本地列举和日志基线按名称合并，
//! 为每个名称产出一个发现结果，并返回需要继续深入的子目录。

use crate::core::comparator::FileRelation;
use crate::core::exclude::ExcludeType;
use crate::core::listing::SingleDirectoryListing;
use crate::core::paths;
use crate::core::phase::{DiscoveryContext, JobId, PhaseState};
use crate::core::pinstate::PinState;
use crate::core::records::{
    DiscoveredItem, Direction, Instruction, ItemType, LocalEntry, Permission, RemoteEntry,
};
use crate::db::JournalRecord;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// 一个条目在四个视角下的路径
///
/// - `original`: 日志中的路径
/// - `local`: 本地当前路径
/// - `server`: 服务器当前路径
/// - `target`: 同步完成后的路径
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathTuple {
    pub original: String,
    pub local: String,
    pub server: String,
    pub target: String,
}

impl PathTuple {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self, name: &str) -> Self {
        Self {
            original: paths::join(&self.original, name),
            local: paths::join(&self.local, name),
            server: paths::join(&self.server, name),
            target: paths::join(&self.target, name),
        }
    }
}

/// 一端的查询方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// 实际列举
    Normal,
    /// 该端不存在此目录，视为空
    ParentMissing,
    /// 用日志内容代替列举
    FromJournal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Normal,
    /// 已在一端删除的目录，只有主树完成后才比较
    DeletedDirectory,
}

/// 比较时请求的子目录任务
#[derive(Debug)]
pub(crate) struct ChildRequest {
    pub paths: PathTuple,
    pub item: DiscoveredItem,
    pub query_server: QueryMode,
    pub query_local: QueryMode,
    pub pin_state: PinState,
    pub kind: JobKind,
}

/// 目录任务
#[derive(Debug)]
pub struct DirectoryJob {
    pub id: JobId,
    pub parent: Option<JobId>,
    pub paths: PathTuple,
    /// 完成时发出的目录条目，根目录没有
    pub dir_item: Option<DiscoveredItem>,
    pub query_server: QueryMode,
    pub query_local: QueryMode,
    pub pin_state: PinState,
    pub kind: JobKind,
    pub is_root: bool,
    pub(crate) listing: Option<SingleDirectoryListing>,
    pub(crate) local_entries: Option<Vec<LocalEntry>>,
    pub(crate) pending_children: usize,
    pub(crate) compared: bool,
}

impl DirectoryJob {
    pub fn root(pin_state: PinState) -> Self {
        Self {
            id: JobId(0),
            parent: None,
            paths: PathTuple::root(),
            dir_item: None,
            query_server: QueryMode::Normal,
            query_local: QueryMode::Normal,
            pin_state,
            kind: JobKind::Normal,
            is_root: true,
            listing: None,
            local_entries: None,
            pending_children: 0,
            compared: false,
        }
    }

    pub(crate) fn from_request(parent: Option<JobId>, request: ChildRequest) -> (Self, DiscoveredItem) {
        let job = Self {
            id: JobId(0),
            parent,
            paths: request.paths,
            dir_item: None,
            query_server: request.query_server,
            query_local: request.query_local,
            pin_state: request.pin_state,
            kind: request.kind,
            is_root: false,
            listing: None,
            local_entries: None,
            pending_children: 0,
            compared: false,
        };
        (job, request.item)
    }

    /// 取消进行中的列举，返回是否确实有列举在进行
    pub(crate) fn abort(&mut self) -> bool {
        match self.listing.take() {
            Some(listing) => {
                listing.abort();
                true
            }
            None => false,
        }
    }
}

/// 一个目录的比较结果
#[derive(Debug, Default)]
pub(crate) struct ComparisonOutcome {
    pub children: Vec<ChildRequest>,
    /// 已删除目录下出现了需要保留的内容
    pub resurrect: bool,
}

#[derive(Default)]
struct Entries<'a> {
    local: Option<LocalEntry>,
    remote: Option<RemoteEntry>,
    base: Option<&'a JournalRecord>,
}

/// 这些操作意味着已删除的父目录必须保留
fn revives_parent(instruction: Instruction) -> bool {
    matches!(
        instruction,
        Instruction::New
            | Instruction::Sync
            | Instruction::Conflict
            | Instruction::TypeChange
            | Instruction::Rename
    )
}

fn is_external(remote: &RemoteEntry) -> bool {
    remote.remote_perm.has_permission(Permission::IsMounted)
        || remote.remote_perm.has_permission(Permission::IsMountedSub)
}

pub(crate) struct Comparison<'a> {
    ctx: &'a DiscoveryContext,
    state: &'a mut PhaseState,
    paths: &'a PathTuple,
    pin_state: PinState,
    kind: JobKind,
    /// 本目录的两端条目，重命名校验同目录原路径时使用
    local_here: HashMap<String, LocalEntry>,
    remote_here: HashMap<String, RemoteEntry>,
    outcome: ComparisonOutcome,
}

impl<'a> Comparison<'a> {
    pub fn new(
        ctx: &'a DiscoveryContext,
        state: &'a mut PhaseState,
        paths: &'a PathTuple,
        pin_state: PinState,
        kind: JobKind,
    ) -> Self {
        Self {
            ctx,
            state,
            paths,
            pin_state,
            kind,
            local_here: HashMap::new(),
            remote_here: HashMap::new(),
            outcome: ComparisonOutcome::default(),
        }
    }

    pub fn run(mut self, local: Vec<LocalEntry>, remote: Vec<RemoteEntry>) -> ComparisonOutcome {
        let ctx = self.ctx;
        let mut names: BTreeMap<String, Entries<'a>> = BTreeMap::new();
        for entry in local {
            let name = entry.name.clone();
            self.local_here.insert(name.clone(), entry.clone());
            names.entry(name).or_default().local = Some(entry);
        }
        for entry in remote {
            let name = entry.name.clone();
            if entry.is_directory && !entry.etag.is_empty() {
                let original = paths::join(&self.paths.original, &name);
                self.state.remote_dir_etags.insert(original, entry.etag.clone());
            }
            self.remote_here.insert(name.clone(), entry.clone());
            names.entry(name).or_default().remote = Some(entry);
        }
        for record in ctx.journal.children_of(&self.paths.original) {
            names.entry(record.name().to_string()).or_default().base = Some(record);
        }

        for (name, entries) in names {
            self.process(&name, entries);
        }
        self.outcome
    }

    fn process(&mut self, name: &str, entries: Entries<'a>) {
        let paths = self.paths.child(name);
        let Entries { local, remote, base } = entries;

        if self.state.selective.is_in_black_list(&paths.target)
            || (paths.original != paths.target
                && self.state.selective.is_in_black_list(&paths.original))
        {
            debug!("选择性同步排除: {}", paths.target);
            self.state.emitter.silently_excluded(&paths.target);
            return;
        }

        let is_dir = remote
            .as_ref()
            .map(|r| r.is_directory)
            .or_else(|| local.as_ref().map(|l| l.is_directory))
            .or_else(|| base.map(|b| b.is_directory()))
            .unwrap_or(false);
        if self.check_excluded(&paths, is_dir, local.as_ref(), remote.as_ref()) {
            return;
        }

        let pin_state = PinState::resolve(self.pin_state, base.and_then(|b| b.pin_state), base.is_none());

        match (local, remote, base) {
            (Some(l), Some(r), Some(b)) => self.process_known(paths, l, r, b, pin_state),
            (Some(l), Some(r), None) => self.process_both_new(paths, l, r, pin_state),
            (None, Some(r), None) => self.process_new_remote(paths, r, pin_state),
            (Some(l), None, None) => self.process_new_local(paths, l, pin_state),
            (None, Some(r), Some(b)) => self.process_missing_locally(paths, r, b, pin_state),
            (Some(l), None, Some(b)) => self.process_missing_remotely(paths, l, b, pin_state),
            (None, None, Some(b)) => self.process_missing_both(paths, b),
            (None, None, None) => {}
        }
    }

    /// 排除规则与符号链接，返回 true 表示已处理完毕
    fn check_excluded(
        &mut self,
        paths: &PathTuple,
        is_dir: bool,
        local: Option<&LocalEntry>,
        remote: Option<&RemoteEntry>,
    ) -> bool {
        let ignore_hidden = self.ctx.config.ignore_hidden_files;
        let verdict = if ignore_hidden && local.is_some_and(|l| l.is_hidden) {
            ExcludeType::Hidden
        } else {
            self.ctx.excludes.check(&paths.target, is_dir, ignore_hidden)
        };

        if verdict.is_silent() {
            self.state.emitter.silently_excluded(&paths.target);
            return true;
        }
        if verdict != ExcludeType::NotExcluded {
            let mut item = self.item(paths, local, remote);
            item.instruction = Instruction::Ignore;
            item.error = verdict.message().map(String::from);
            self.emit(item);
            return true;
        }

        if local.is_some_and(|l| l.is_symlink) {
            let mut item = self.item(paths, local, remote);
            item.instruction = Instruction::Ignore;
            item.item_type = ItemType::SoftLink;
            item.error = Some("符号链接不会被同步".to_string());
            self.emit(item);
            return true;
        }
        false
    }

    fn item(
        &self,
        paths: &PathTuple,
        local: Option<&LocalEntry>,
        remote: Option<&RemoteEntry>,
    ) -> DiscoveredItem {
        let mut item = DiscoveredItem::new(&paths.target, &paths.original);
        if let Some(r) = remote {
            item.apply_remote(r);
            item.is_external_storage = is_external(r);
        }
        if let Some(l) = local {
            item.apply_local(l);
        }
        item
    }

    fn local_changed(&self, local_path: &str, local: &LocalEntry, base: &JournalRecord) -> bool {
        let ctx = self.ctx;
        ctx.comparator
            .local_changed(local, base, || ctx.local.content_checksum(local_path).ok())
    }

    /// 原路径的本地副本是否仍与日志一致，不一致时不能作为远程重命名处理
    fn local_original_unchanged(&self, base: &JournalRecord, local_original: &str) -> bool {
        let original = base.path.as_str();
        if self.state.revived.contains(original) {
            return false;
        }
        // 已登记删除说明本地副本未修改
        if self.state.pending.get(original).is_some_and(|p| !p.resurrected) {
            return true;
        }
        if base.is_directory() {
            return true;
        }
        let name = paths::file_name(original);
        let entry = if paths::parent(original) == self.paths.original {
            self.local_here.get(name).cloned()
        } else {
            self.ctx
                .local
                .list_directory(paths::parent(local_original))
                .ok()
                .flatten()
                .and_then(|entries| entries.into_iter().find(|e| e.name == name))
        };
        entry.is_some_and(|local| !self.local_changed(local_original, &local, base))
    }

    /// 原路径在服务器上是否仍与日志一致，不一致时不能作为本地重命名处理
    fn remote_original_unchanged(&self, base: &JournalRecord) -> bool {
        let original = base.path.as_str();
        if self.state.revived.contains(original) {
            return false;
        }
        if let Some(pending) = self.state.pending.get(original) {
            return !pending.resurrected && pending.etag == base.etag;
        }
        if paths::parent(original) == self.paths.original {
            return self
                .remote_here
                .get(paths::file_name(original))
                .is_some_and(|remote| remote.etag == base.etag);
        }
        // 所在目录尚未比较：取最近的已知祖先，目录 etag 随子树内容变化
        let mut current = original;
        while !current.is_empty() {
            current = paths::parent(current);
            if let Some(etag) = self.state.remote_dir_etags.get(current) {
                return self
                    .ctx
                    .journal
                    .get(current)
                    .is_some_and(|record| record.etag == *etag);
            }
        }
        false
    }

    fn skip_listing(&self, remote: &RemoteEntry, base: &JournalRecord) -> bool {
        self.ctx.config.skip_unchanged_remote_dirs
            && base.is_directory()
            && !remote.etag.is_empty()
            && remote.etag == base.etag
    }

    fn emit(&mut self, item: DiscoveredItem) {
        if self.kind == JobKind::DeletedDirectory && revives_parent(item.instruction) {
            self.outcome.resurrect = true;
        }
        debug!(
            "发现: {} {:?} {:?}",
            item.file, item.instruction, item.direction
        );
        self.state.emitter.item(item);
    }

    fn request_child(
        &mut self,
        paths: PathTuple,
        item: DiscoveredItem,
        query_server: QueryMode,
        query_local: QueryMode,
        pin_state: PinState,
        kind: JobKind,
    ) {
        if self.kind == JobKind::DeletedDirectory
            && kind == JobKind::Normal
            && revives_parent(item.instruction)
        {
            self.outcome.resurrect = true;
        }
        self.outcome.children.push(ChildRequest {
            paths,
            item,
            query_server,
            query_local,
            pin_state,
            kind,
        });
    }

    /// 两端和日志中都存在
    fn process_known(
        &mut self,
        paths: PathTuple,
        local: LocalEntry,
        remote: RemoteEntry,
        base: &JournalRecord,
        pin_state: PinState,
    ) {
        let mut item = self.item(&paths, Some(&local), Some(&remote));
        item.pin_state = pin_state;

        if remote.is_directory && local.is_directory {
            let unchanged = base.is_directory() && remote.etag == base.etag;
            if !unchanged {
                item.instruction = Instruction::UpdateMetadata;
                item.direction = Direction::Down;
            }
            let query_server = if self.skip_listing(&remote, base) {
                QueryMode::FromJournal
            } else {
                QueryMode::Normal
            };
            let query_local = if self.ctx.should_discover_locally(&paths.local) {
                QueryMode::Normal
            } else {
                QueryMode::FromJournal
            };
            self.request_child(paths, item, query_server, query_local, pin_state, JobKind::Normal);
            return;
        }

        if remote.is_directory != local.is_directory {
            let local_type_changed = local.is_directory != base.is_directory();
            if local_type_changed {
                if self.ctx.comparator.remote_changed(&remote, base) != FileRelation::Equal {
                    item.instruction = Instruction::Conflict;
                } else {
                    item.instruction = Instruction::TypeChange;
                    item.direction = Direction::Up;
                }
            } else if self.local_changed(&paths.local, &local, base) {
                item.instruction = Instruction::Conflict;
            } else {
                item.instruction = Instruction::TypeChange;
                item.direction = Direction::Down;
            }

            match item.direction {
                Direction::Up if local.is_directory => {
                    item.item_type = ItemType::Directory;
                    self.request_child(
                        paths,
                        item,
                        QueryMode::ParentMissing,
                        QueryMode::Normal,
                        pin_state,
                        JobKind::Normal,
                    );
                }
                Direction::Down if remote.is_directory => {
                    self.request_child(
                        paths,
                        item,
                        QueryMode::Normal,
                        QueryMode::ParentMissing,
                        pin_state,
                        JobKind::Normal,
                    );
                }
                _ => {
                    if item.instruction == Instruction::TypeChange {
                        item.item_type = ItemType::File;
                    }
                    self.emit(item);
                }
            }
            return;
        }

        // 两端都是文件
        let local_changed = self.local_changed(&paths.local, &local, base);
        let relation = self.ctx.comparator.remote_changed(&remote, base);
        let (instruction, direction) = match (local_changed, relation) {
            (false, FileRelation::Equal) => (Instruction::None, Direction::None),
            (false, FileRelation::MetadataOnly) => (Instruction::UpdateMetadata, Direction::Down),
            (false, FileRelation::Changed) => (Instruction::Sync, Direction::Down),
            (true, FileRelation::Equal) => (Instruction::Sync, Direction::Up),
            (true, _) => {
                if self.ctx.comparator.same_content(&local, &remote) {
                    (Instruction::UpdateMetadata, Direction::Down)
                } else {
                    (Instruction::Conflict, Direction::None)
                }
            }
        };
        item.instruction = instruction;
        item.direction = direction;

        if local.is_virtual {
            item.item_type = ItemType::VirtualFile;
            if pin_state == PinState::AlwaysLocal {
                item.item_type = ItemType::VirtualFileDownload;
                item.instruction = Instruction::Sync;
                item.direction = Direction::Down;
            }
        }
        self.emit(item);
    }

    /// 两端都新出现，日志中没有
    fn process_both_new(
        &mut self,
        paths: PathTuple,
        local: LocalEntry,
        remote: RemoteEntry,
        pin_state: PinState,
    ) {
        let mut item = self.item(&paths, Some(&local), Some(&remote));
        item.pin_state = pin_state;

        if remote.is_directory && local.is_directory {
            item.instruction = Instruction::UpdateMetadata;
            item.direction = Direction::Down;
            self.request_child(
                paths,
                item,
                QueryMode::Normal,
                QueryMode::Normal,
                pin_state,
                JobKind::Normal,
            );
            return;
        }

        if remote.is_directory == local.is_directory
            && self.ctx.comparator.same_content(&local, &remote)
        {
            item.instruction = Instruction::UpdateMetadata;
            item.direction = Direction::Down;
        } else {
            item.instruction = Instruction::Conflict;
        }
        self.emit(item);
    }

    /// 只在服务器上出现
    fn process_new_remote(&mut self, paths: PathTuple, remote: RemoteEntry, pin_state: PinState) {
        if self.try_remote_rename(&paths, &remote) {
            return;
        }
        if remote.is_directory && !self.check_new_folder(&paths.target, &remote) {
            return;
        }

        let mut item = self.item(&paths, None, Some(&remote));
        item.instruction = Instruction::New;
        item.direction = Direction::Down;
        item.pin_state = pin_state;

        if remote.is_directory {
            self.request_child(
                paths,
                item,
                QueryMode::Normal,
                QueryMode::ParentMissing,
                pin_state,
                JobKind::Normal,
            );
        } else {
            if self.ctx.config.virtual_files && pin_state == PinState::OnlineOnly {
                item.item_type = ItemType::VirtualFile;
            }
            self.emit(item);
        }
    }

    /// 新目录是否可以直接同步，否则发出等待确认的通知
    fn check_new_folder(&mut self, path: &str, remote: &RemoteEntry) -> bool {
        let selective = &mut self.state.selective;

        if remote.remote_perm.has_permission(Permission::IsMounted)
            && self.ctx.config.confirm_external_storage
        {
            if selective.white_list_contains_exact(path) {
                return true;
            }
            info!("新的外部存储需要确认: {}", path);
            self.state.emitter.new_big_folder(path, true);
            return false;
        }

        if selective.is_in_white_list(path) {
            return true;
        }

        if let Some(limit) = self.ctx.config.big_folder_limit_bytes() {
            if remote.size >= limit {
                info!("新目录过大需要确认: {} ({} 字节)", path, remote.size);
                self.state.emitter.new_big_folder(path, false);
                return false;
            }
        }

        selective.add_to_white_list(path);
        true
    }

    /// 远程重命名：按文件 ID（目录在没有 ID 时按 etag）在日志中找到原路径
    fn try_remote_rename(&mut self, paths: &PathTuple, remote: &RemoteEntry) -> bool {
        let ctx = self.ctx;
        let journal = &ctx.journal;
        let candidate = if !remote.file_id.is_empty() {
            journal.find_by_file_id(&remote.file_id)
        } else if remote.is_directory && !remote.etag.is_empty() {
            journal.find_dir_by_etag(&remote.etag)
        } else {
            None
        };
        let Some(base) = candidate else {
            return false;
        };
        let original = base.path.as_str();
        if original == paths.original || base.is_directory() != remote.is_directory {
            return false;
        }
        if self.state.renamed_remote.contains_original(original)
            || self.state.selective.is_in_black_list(original)
        {
            return false;
        }
        // 本地必须仍保留原路径
        let local_original = self.state.renamed_local.adjust(original);
        if !ctx.local.exists(&local_original) {
            return false;
        }
        if !self.local_original_unchanged(base, &local_original) {
            debug!("原路径本地已修改，不按重命名处理: {}", original);
            return false;
        }

        self.state.renamed_remote.insert(original, &paths.server);
        let (cancelled, prior_etag) = self.state.find_and_cancel_deleted_job(original);
        info!("检测到远程重命名: {} -> {}", original, paths.target);

        let pin_state = PinState::resolve(self.pin_state, base.pin_state, false);
        let mut item = DiscoveredItem::new(&paths.target, original);
        item.apply_remote(remote);
        item.is_external_storage = is_external(remote);
        item.instruction = Instruction::Rename;
        item.direction = Direction::Down;
        item.inode = base.inode;
        item.pin_state = pin_state;
        item.previous_etag = Some(if cancelled && !prior_etag.is_empty() {
            prior_etag
        } else {
            base.etag.clone()
        });

        if remote.is_directory {
            let query_server = if self.skip_listing(remote, base) {
                QueryMode::FromJournal
            } else {
                QueryMode::Normal
            };
            let child_paths = PathTuple {
                original: original.to_string(),
                local: local_original,
                server: paths.server.clone(),
                target: paths.target.clone(),
            };
            self.request_child(
                child_paths,
                item,
                query_server,
                QueryMode::Normal,
                pin_state,
                JobKind::Normal,
            );
        } else {
            self.emit(item);
        }
        true
    }

    /// 只在本地出现
    fn process_new_local(&mut self, paths: PathTuple, local: LocalEntry, pin_state: PinState) {
        if self.try_local_rename(&paths, &local) {
            return;
        }

        let mut item = self.item(&paths, Some(&local), None);
        item.pin_state = pin_state;

        if local.is_virtual {
            // 服务器和日志中都没有的占位文件
            item.instruction = Instruction::Remove;
            item.direction = Direction::Down;
            self.emit(item);
            return;
        }

        item.instruction = Instruction::New;
        item.direction = Direction::Up;
        if local.is_directory {
            self.request_child(
                paths,
                item,
                QueryMode::ParentMissing,
                QueryMode::Normal,
                pin_state,
                JobKind::Normal,
            );
        } else {
            self.emit(item);
        }
    }

    /// 本地重命名：按 inode 在日志中找到原路径
    fn try_local_rename(&mut self, paths: &PathTuple, local: &LocalEntry) -> bool {
        if local.inode == 0 {
            return false;
        }
        let ctx = self.ctx;
        let Some(base) = ctx.journal.find_by_inode(local.inode) else {
            return false;
        };
        let original = base.path.as_str();
        if original == paths.original || base.is_directory() != local.is_directory {
            return false;
        }
        // inode 可能被复用，文件还要求大小和时间一致
        if !local.is_directory && (local.size != base.size || local.modtime != base.modtime) {
            return false;
        }
        if self.state.renamed_local.contains_original(original)
            || self.state.selective.is_in_black_list(original)
        {
            return false;
        }
        // 本地原路径必须已经不存在
        if ctx.local.exists(&self.state.renamed_local.adjust(original)) {
            return false;
        }
        if !self.remote_original_unchanged(base) {
            debug!("原路径服务器上已修改，不按重命名处理: {}", original);
            return false;
        }

        self.state.renamed_local.insert(original, &paths.local);
        let (cancelled, prior_etag) = self.state.find_and_cancel_deleted_job(original);
        info!("检测到本地重命名: {} -> {}", original, paths.target);

        let pin_state = PinState::resolve(self.pin_state, base.pin_state, false);
        let mut item = DiscoveredItem::new(&paths.target, original);
        item.apply_local(local);
        item.etag = base.etag.clone();
        item.file_id = base.file_id.clone();
        item.remote_perm = base.remote_perm;
        item.checksum_header = base.checksum.clone().unwrap_or_default();
        item.instruction = Instruction::Rename;
        item.direction = Direction::Up;
        item.pin_state = pin_state;
        item.previous_etag = Some(if cancelled && !prior_etag.is_empty() {
            prior_etag
        } else {
            base.etag.clone()
        });

        if local.is_directory {
            let child_paths = PathTuple {
                original: original.to_string(),
                local: paths.local.clone(),
                server: self.state.renamed_remote.adjust(original),
                target: paths.target.clone(),
            };
            self.request_child(
                child_paths,
                item,
                QueryMode::Normal,
                QueryMode::Normal,
                pin_state,
                JobKind::Normal,
            );
        } else {
            self.emit(item);
        }
        true
    }

    /// 日志和服务器中存在，本地已消失
    fn process_missing_locally(
        &mut self,
        paths: PathTuple,
        remote: RemoteEntry,
        base: &JournalRecord,
        pin_state: PinState,
    ) {
        if self.state.renamed_local.contains_original(&paths.original) {
            debug!("已按本地重命名处理: {}", paths.original);
            return;
        }

        let mut item = self.item(&paths, None, Some(&remote));
        item.pin_state = pin_state;

        let type_changed = remote.is_directory != base.is_directory();
        let changed = type_changed
            || (!remote.is_directory
                && self.ctx.comparator.remote_changed(&remote, base) != FileRelation::Equal);
        if changed {
            // 服务器上有修改，重新下载
            self.state.revived.insert(paths.original.clone());
            item.instruction = Instruction::New;
            item.direction = Direction::Down;
            if remote.is_directory {
                self.request_child(
                    paths,
                    item,
                    QueryMode::Normal,
                    QueryMode::ParentMissing,
                    pin_state,
                    JobKind::Normal,
                );
            } else {
                self.emit(item);
            }
            return;
        }

        item.instruction = Instruction::Remove;
        item.direction = Direction::Up;
        if remote.is_directory {
            let query_server = if self.skip_listing(&remote, base) {
                QueryMode::FromJournal
            } else {
                QueryMode::Normal
            };
            self.request_child(
                paths,
                item,
                query_server,
                QueryMode::ParentMissing,
                pin_state,
                JobKind::DeletedDirectory,
            );
        } else {
            let original = paths.original.clone();
            self.state.pending.register(original, item, None);
        }
    }

    /// 日志和本地存在，服务器上已消失
    fn process_missing_remotely(
        &mut self,
        paths: PathTuple,
        local: LocalEntry,
        base: &JournalRecord,
        pin_state: PinState,
    ) {
        if self.state.renamed_remote.contains_original(&paths.original) {
            debug!("已按远程重命名处理: {}", paths.original);
            return;
        }

        let mut item = self.item(&paths, Some(&local), None);
        item.etag = base.etag.clone();
        item.file_id = base.file_id.clone();
        item.pin_state = pin_state;

        if local.is_virtual {
            item.instruction = Instruction::Remove;
            item.direction = Direction::Down;
            let original = paths.original.clone();
            self.state.pending.register(original, item, None);
            return;
        }

        let type_changed = local.is_directory != base.is_directory();
        if type_changed || (!local.is_directory && self.local_changed(&paths.local, &local, base)) {
            // 本地有修改，重新上传
            self.state.revived.insert(paths.original.clone());
            item.instruction = Instruction::New;
            item.direction = Direction::Up;
            if local.is_directory {
                self.request_child(
                    paths,
                    item,
                    QueryMode::ParentMissing,
                    QueryMode::Normal,
                    pin_state,
                    JobKind::Normal,
                );
            } else {
                self.emit(item);
            }
            return;
        }

        item.instruction = Instruction::Remove;
        item.direction = Direction::Down;
        if local.is_directory {
            self.request_child(
                paths,
                item,
                QueryMode::ParentMissing,
                QueryMode::Normal,
                pin_state,
                JobKind::DeletedDirectory,
            );
        } else {
            let original = paths.original.clone();
            self.state.pending.register(original, item, None);
        }
    }

    /// 只剩日志记录，两端都已删除
    fn process_missing_both(&mut self, paths: PathTuple, base: &JournalRecord) {
        if self.state.renamed_local.contains_original(&paths.original)
            || self.state.renamed_remote.contains_original(&paths.original)
        {
            return;
        }
        let mut item = DiscoveredItem::new(&paths.target, &paths.original);
        item.item_type = base.item_type;
        item.etag = base.etag.clone();
        item.file_id = base.file_id.clone();
        item.instruction = Instruction::Remove;
        self.emit(item);
    }
}

use clap::Parser;
use futures::StreamExt;
use std::process::ExitCode;
use std::sync::Arc;
use syncdiscover::config::{Args, DiscoveryConfig};
use syncdiscover::core::{
    Classification, DiscoveredItem, DiscoveryContext, DiscoveryEvent, DiscoveryEvents,
    DiscoveryPhase, DiscoverySummary, Direction, ExcludeFilter, PatternExcludes,
    SelectiveSyncListType,
};
use syncdiscover::db::{SqliteJournal, SyncJournal};
use syncdiscover::logging::init_logging;
use syncdiscover::storage::{Account, LocalFs, WebDavLister};
use tracing::{error, info, warn};

/// 输出事件，返回收到的事件数
async fn print_events(mut events: DiscoveryEvents, json: bool, all: bool) -> usize {
    let mut count = 0;
    while let Some(event) = events.next().await {
        count += 1;
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("事件序列化失败: {}", e),
            }
            continue;
        }
        match event {
            DiscoveryEvent::ItemDiscovered(item) => {
                if all || item.classification() != Classification::Unchanged {
                    println!("{}", format_item(&item));
                }
            }
            DiscoveryEvent::SilentlyExcluded { path } => {
                if all {
                    println!("{:<10} {:<4} {}", "skipped", "", path);
                }
            }
            DiscoveryEvent::NewBigFolder { path, is_external } => {
                let reason = if is_external { "外部存储" } else { "大目录" };
                println!("{:<10} {:<4} {} (需要确认: {})", "pending", "", path, reason);
            }
            DiscoveryEvent::FatalError { message } => {
                eprintln!("错误: {}", message);
            }
            DiscoveryEvent::Finished => {}
        }
    }
    count
}

fn format_item(item: &DiscoveredItem) -> String {
    let arrow = match item.direction {
        Direction::Up => "->",
        Direction::Down => "<-",
        Direction::None => "",
    };
    let class = serde_json::to_value(item.classification())
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default();
    let mut line = if item.file != item.original_file {
        format!("{:<10} {:<4} {} => {}", class, arrow, item.original_file, item.file)
    } else {
        format!("{:<10} {:<4} {}", class, arrow, item.file)
    };
    if let Some(error) = &item.error {
        line.push_str(&format!(" ({})", error));
    }
    line
}

fn print_summary(summary: &DiscoverySummary) {
    eprintln!(
        "新增 {}, 删除 {}, 重命名 {}, 修改 {}, 冲突 {}, 未变 {}, 排除 {}, 错误 {} ({} 次列举, {} ms)",
        summary.count(Classification::New),
        summary.count(Classification::Removed),
        summary.count(Classification::Renamed),
        summary.count(Classification::Modified),
        summary.count(Classification::Conflict),
        summary.count(Classification::Unchanged),
        summary.count(Classification::Excluded) + summary.silently_excluded,
        summary.count(Classification::Error),
        summary.listings,
        summary.duration_ms
    );
}

/// 合并配置与日志中的列表
fn merge_lists(a: &[String], b: Vec<String>) -> Vec<String> {
    let mut merged = a.to_vec();
    merged.extend(b);
    merged
}

async fn run(args: Args) -> anyhow::Result<bool> {
    let config_dir = args.config_dir();
    let mut config = DiscoveryConfig::load(&config_dir);
    args.apply(&mut config);
    config.validate()?;

    let journal = SqliteJournal::open(&args.journal_path()).await?;
    let snapshot = journal.snapshot().await?;
    info!("已加载 {} 条日志记录", snapshot.len());

    config.selective_sync_black_list = merge_lists(
        &config.selective_sync_black_list,
        journal.selective_sync_list(SelectiveSyncListType::BlackList).await?,
    );
    config.selective_sync_white_list = merge_lists(
        &config.selective_sync_white_list,
        journal.selective_sync_list(SelectiveSyncListType::WhiteList).await?,
    );

    let lister = WebDavLister::new(
        &args.webdav_endpoint,
        &args.user,
        &args.password,
        args.root.clone(),
    )?;
    let account = Arc::new(Account::new(args.webdav_endpoint.clone(), Arc::new(lister)));
    let local = LocalFs::new(&args.local)?.with_virtual_file_suffix(config.virtual_file_suffix.clone());

    let excludes = PatternExcludes::new();
    for file in &config.exclude_files {
        excludes.add_exclude_file(file.clone());
    }
    for pattern in &config.exclude_patterns {
        excludes.add_pattern(pattern);
    }
    excludes.reload()?;

    let previous_fingerprint = snapshot.data_fingerprint().to_string();
    let ctx = DiscoveryContext::new(
        account,
        Arc::new(local),
        Arc::new(excludes),
        Arc::new(snapshot),
        config,
    );
    let (phase, events) = DiscoveryPhase::new(ctx)?;

    let abort = phase.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，取消发现");
            abort.abort();
        }
    });

    let printer = tokio::spawn(print_events(events, args.json, args.all));
    let result = phase.run().await;
    let _ = printer.await;

    let ok = match result {
        Ok(summary) => {
            if let Some(fingerprint) = &summary.data_fingerprint {
                if previous_fingerprint.is_empty() {
                    journal.set_data_fingerprint(fingerprint).await?;
                }
            }
            journal
                .set_selective_sync_list(SelectiveSyncListType::WhiteList, &summary.white_list)
                .await?;
            if !args.quiet {
                print_summary(&summary);
            }
            summary.errors.is_empty()
        }
        Err(e) => {
            error!("发现失败: {}", e);
            eprintln!("发现失败: {}", e);
            false
        }
    };

    journal.close().await;
    Ok(ok)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config_dir = args.config_dir();
    if let Err(e) = std::fs::create_dir_all(&config_dir) {
        eprintln!("无法创建配置目录 {:?}: {}", config_dir, e);
        return ExitCode::FAILURE;
    }
    let _guard = init_logging(&config_dir, args.verbose, args.quiet);

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("错误: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

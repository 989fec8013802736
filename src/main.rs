use anyhow::{Context, Result};
use document_uploader_rust::{
    logging,
    uploader::{format_bytes, BroadcastHooks, CandidateFile, UploadEvent, UploadSession},
    AppConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

const CONFIG_PATH: &str = "config/app.toml";

/// 根据扩展名推断媒体类型（浏览器场景下由文件选择方提供）
fn guess_media_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "zip" => "application/zip",
        "rar" => "application/vnd.rar",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// 把命令行中的路径转成候选文件
async fn collect_candidates(paths: &[PathBuf]) -> Result<Vec<CandidateFile>> {
    let mut candidates = Vec::with_capacity(paths.len());
    for path in paths {
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("无法获取文件元数据: {:?}", path))?;
        if metadata.is_dir() {
            warn!("跳过目录: {:?}", path);
            continue;
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let absolute = tokio::fs::canonicalize(path)
            .await
            .unwrap_or_else(|_| path.clone());

        candidates.push(CandidateFile::local(
            name,
            metadata.len(),
            guess_media_type(path),
            absolute,
        ));
    }
    Ok(candidates)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = AppConfig::load_or_default(CONFIG_PATH)
        .await
        .context("加载配置失败")?;
    let _log_guard = logging::init_logging(&config.log);

    let paths: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        eprintln!("用法: document-uploader <文件>...");
        return Ok(());
    }

    let hooks = Arc::new(BroadcastHooks::default());
    let mut events = hooks.subscribe();
    let session = UploadSession::from_config(&config, hooks.clone());

    let candidates = collect_candidates(&paths).await?;
    let result = session.submit(candidates)?;
    for message in result.messages() {
        warn!("{}", message);
    }
    if result.admitted.is_empty() {
        info!("没有可上传的文件");
        return Ok(());
    }

    let names: std::collections::HashMap<_, _> = session
        .view()
        .into_iter()
        .map(|v| (v.file.id.clone(), v.file.name.clone()))
        .collect();

    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(UploadEvent::Progress { file_id, progress }) => {
                    let name = names.get(&file_id).map(String::as_str).unwrap_or("?");
                    info!("{} {}%", name, progress);
                }
                Ok(UploadEvent::Completed { file_id }) => {
                    let name = names.get(&file_id).map(String::as_str).unwrap_or("?");
                    info!("{} 上传完成", name);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("事件积压，跳过 {} 条", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::select! {
        _ = session.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("收到中断信号，取消所有传输");
        }
    }

    for view in session.view() {
        info!(
            "{} ({}, {}) - {}%{}",
            view.file.name,
            view.category(),
            format_bytes(view.file.size, 2),
            view.progress(),
            session
                .preview_url(&view.file.id)
                .map(|url| format!(" 预览: {}", url))
                .unwrap_or_default()
        );
    }

    tracing::debug!("最终视图: {}", serde_json::to_string(&session.view())?);

    session.clear_all();
    drop(session);
    drop(hooks);
    let _ = printer.await;

    Ok(())
}

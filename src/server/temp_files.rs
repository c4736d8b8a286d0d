use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::error::GatewayError;
use crate::logging::Diagnostics;
use crate::server::payload::to_safe_filename;

/// 交给回调的临时文件：只读句柄 + 字节数
pub struct TempUpload {
    pub path: PathBuf,
    pub file: tokio::fs::File,
    pub len: u64,
}

/// 请求级临时文件。每个文件名带时间戳和进程内序号，同名上传并发也不会冲突。
pub struct TempStore {
    dir: PathBuf,
    seq: AtomicU64,
    diagnostics: Arc<Diagnostics>,
}

/// future 被取消（客户端断开、超时）时兜底删除
struct RemoveOnDrop(Option<PathBuf>);

impl RemoveOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        if let Some(path) = self.0.take()
            && let Err(e) = std::fs::remove_file(&path)
            && e.kind() != ErrorKind::NotFound
        {
            tracing::error!(path = %path.display(), error = %e, "failed to remove temp file");
        }
    }
}

impl TempStore {
    pub fn new(dir: impl Into<PathBuf>, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicU64::new(0),
            diagnostics,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn unique_name(&self, name_hint: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}-{}-{}",
            Utc::now().timestamp_millis(),
            seq,
            to_safe_filename(name_hint, "upload")
        )
    }

    /// 写入临时文件后执行 `body`；无论 `body` 成功、失败还是写盘本身出错，
    /// 返回前都会删除文件。删除失败只记错误日志，不影响返回值。
    pub async fn with_temp_file<F, Fut, T>(
        &self,
        name_hint: &str,
        bytes: &[u8],
        body: F,
    ) -> Result<T, GatewayError>
    where
        F: FnOnce(TempUpload) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(self.unique_name(name_hint));
        let guard = RemoveOnDrop(Some(path.clone()));

        let result = async {
            tokio::fs::write(&path, bytes).await?;
            let file = tokio::fs::File::open(&path).await?;
            body(TempUpload {
                path: path.clone(),
                file,
                len: bytes.len() as u64,
            })
            .await
        }
        .await;

        guard.disarm();
        self.remove(&path).await;
        result
    }

    async fn remove(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => self.diagnostics.log_error(format!(
                "failed to remove temp file {}: {}",
                path.display(),
                e
            )),
        }
    }
}

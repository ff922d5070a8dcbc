//! FsStore - 複数のワーカープロセスが共有するディレクトリ上の key/value store
//!
//! # 学習ポイント
//! - `create_new` による排他ロック（プロセス間で使える最小のロック）
//! - 所有者トークンによるロック解放（他人のロックを消さない）
//! - temp ファイル + rename による atomic な書き込み
//! - Async での blocking IO の扱い（spawn_blocking）
//!
//! # ディレクトリ構成
//! - `values/<escaped-key>`: 現在の値。常に rename で置き換える
//! - `locks/<escaped-key>.lock`: 条件付き書き込みの間だけ存在するロック
//!
//! 読み取りはロックを取らない。rename は atomic なので、`get` は古い値か
//! 新しい値のどちらかを見る。書き込み（`put_if_absent`, `compare_and_swap`）は
//! キーごとのロックを排他作成で取る。クラッシュしたプロセスが残したロックは
//! `stale_lock_after` を過ぎると破棄される。

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{trace, warn};
use ulid::Ulid;

use crate::error::StoreError;
use crate::ports::KeyValueStore;

const MAX_ESCAPED_KEY_LEN: usize = 200;
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(5);

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// FsStore は共有ディレクトリ上の key/value store
///
/// # 使用例
/// ```ignore
/// let store = FsStore::new("/mnt/shared/claims")
///     .with_stale_lock_after(Duration::from_secs(30));
/// let filter = ClaimFilterBuilder::new(store).build()?;
/// ```
///
/// # 注意
/// - 同じディレクトリを見る全プロセスで同じ設定を使うこと
/// - `stale_lock_after` は 1 回の書き込みにかかる時間より十分長くすること
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    stale_lock_after: Duration,
    lock_wait: Duration,
}

impl FsStore {
    /// `root` 以下を使う FsStore を作成
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            stale_lock_after: Duration::from_secs(30),
            lock_wait: Duration::from_secs(5),
        }
    }

    /// ロックファイルが放棄されたとみなすまでの時間を設定
    pub fn with_stale_lock_after(mut self, stale_lock_after: Duration) -> Self {
        self.stale_lock_after = stale_lock_after;
        self
    }

    /// ロック待ちの上限を設定（超えたら `StoreError::Unavailable`）
    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    fn paths(&self, key: &str) -> Result<KeyPaths, StoreError> {
        let escaped = escape_key(key)?;
        Ok(KeyPaths {
            value: self.root.join("values").join(&escaped),
            lock: self.root.join("locks").join(format!("{escaped}.lock")),
        })
    }

    /// blocking な処理を spawn_blocking で実行
    async fn run_blocking<T, F>(&self, key: &str, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(FsStore, KeyPaths) -> Result<T, StoreError> + Send + 'static,
    {
        let paths = self.paths(key)?;
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(store, paths))
            .await
            .map_err(|e| StoreError::Unavailable(format!("fs store task failed: {e}")))?
    }

    /// キーのロックを取得
    ///
    /// # 実装
    /// 1. `create_new` でロックファイルを作成し、自分のトークンを書く
    /// 2. 既にあれば、古すぎるロックかどうかを確認
    /// 3. 古ければ、確認したときのトークンを条件にロックを破棄してやり直す
    /// 4. `lock_wait` を過ぎたら `Unavailable`
    fn acquire_lock(&self, path: &Path) -> Result<LockGuard, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let token = format!("pid={} lock={}", std::process::id(), Ulid::new());
        let started = Instant::now();
        loop {
            match std::fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(path)
            {
                Ok(mut f) => {
                    let guard = LockGuard {
                        path: path.to_path_buf(),
                        token: token.clone(),
                    };
                    f.write_all(token.as_bytes())?;
                    return Ok(guard);
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if let Some(observed) = self.stale_lock_token(path)? {
                        warn!(lock = %path.display(), holder = %observed, "breaking stale store lock");
                        release_if_owned(path, &observed)?;
                        continue;
                    }
                    if started.elapsed() >= self.lock_wait {
                        return Err(StoreError::Unavailable(format!(
                            "lock {} busy for {:?}",
                            path.display(),
                            self.lock_wait
                        )));
                    }
                    trace!(lock = %path.display(), "store lock busy, waiting");
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(err) => return Err(StoreError::Io(err)),
            }
        }
    }

    /// ロックが古すぎれば、その持ち主のトークンを返す
    ///
    /// 時刻と内容は同じファイルハンドルから読むので、両者は同じロックのもの。
    fn stale_lock_token(&self, path: &Path) -> Result<Option<String>, StoreError> {
        let mut file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e)),
        };
        let modified = file.metadata()?.modified()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        if age < self.stale_lock_after {
            return Ok(None);
        }
        let mut token = String::new();
        file.read_to_string(&mut token)?;
        Ok(Some(token))
    }
}

struct KeyPaths {
    value: PathBuf,
    lock: PathBuf,
}

/// 取得したロック。Drop で自分のロックだけを解放する。
struct LockGuard {
    path: PathBuf,
    token: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match release_if_owned(&self.path, &self.token) {
            Ok(true) => {}
            Ok(false) => warn!(
                lock = %self.path.display(),
                "store lock was broken as stale while held; consider a longer stale_lock_after"
            ),
            Err(e) => warn!(lock = %self.path.display(), error = %e, "failed to release store lock"),
        }
    }
}

/// `path` のロックが `token` を持っているときだけ削除する
///
/// ロックはまず一意な名前へ rename する。rename で動くのは 1 つのファイルだけ
/// なので、2 人が同じロックを消すことはない。他人のロックだった場合は
/// hard link で元の場所に戻す（既に新しいロックがあれば上書きしない）。
fn release_if_owned(path: &Path, token: &str) -> std::io::Result<bool> {
    let aside = path.with_extension(format!("lock.{}", Ulid::new()));
    match std::fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    }

    let owned = std::fs::read_to_string(&aside).is_ok_and(|held| held == token);
    if !owned {
        match std::fs::hard_link(&aside, path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                warn!(lock = %path.display(), "store lock replaced while being checked");
            }
            Err(e) => {
                let _ = std::fs::remove_file(&aside);
                return Err(e);
            }
        }
    }
    std::fs::remove_file(&aside)?;
    Ok(owned)
}

#[async_trait]
impl KeyValueStore for FsStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.run_blocking(key, |_, paths| read_value(&paths.value))
            .await
    }

    async fn put_if_absent(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        let value = value.to_string();
        self.run_blocking(key, move |store, paths| {
            let _lock = store.acquire_lock(&paths.lock)?;
            if let Some(existing) = read_value(&paths.value)? {
                return Ok(Some(existing));
            }
            write_atomic(&paths.value, value.as_bytes())?;
            Ok(None)
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
    ) -> Result<bool, StoreError> {
        let expected = expected.to_string();
        let new = new.to_string();
        self.run_blocking(key, move |store, paths| {
            let _lock = store.acquire_lock(&paths.lock)?;
            match read_value(&paths.value)? {
                Some(current) if current == expected => {
                    write_atomic(&paths.value, new.as_bytes())?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
        .await
    }
}

/// 任意のキーを 1 つの安全なファイル名に変換
///
/// `[A-Za-z0-9_-]` はそのまま、それ以外のバイトは `%XX` になる。
/// 変換後の名前が `.`/`..` になったりパス区切りを含むことはない。
fn escape_key(key: &str) -> Result<String, StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("empty key".to_string()));
    }
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    if out.len() > MAX_ESCAPED_KEY_LEN {
        return Err(StoreError::InvalidKey(format!(
            "key too long for a file name ({} bytes escaped)",
            out.len()
        )));
    }
    Ok(out)
}

fn read_value(path: &Path) -> Result<Option<String>, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Io(e)),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().ok_or_else(|| {
        StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path must have parent",
        ))
    })?;
    std::fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| StoreError::InvalidKey(format!("bad file name {}", path.display())))?;
    let tmp = parent.join(format!(
        ".{file_name}.tmp.{}.{}.{}",
        std::process::id(),
        unix_time_ms(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    {
        let mut f = std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }

    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn unix_time_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

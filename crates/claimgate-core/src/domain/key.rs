//! Store keys - store 上のキー
//!
//! FileKey は `<prefix><ファイル識別子>` の形で、再起動やワーカーをまたいで
//! 安定している必要があります。prefix を変えれば、1 つの store を複数の
//! フィルタで共有しても互いに干渉しません。

use std::fmt;

use serde::{Deserialize, Serialize};

/// KeyPrefix はフィルタの名前空間
///
/// # 例
/// ```ignore
/// let key = KeyPrefix::new("billing:").key_for("a.csv");
/// assert_eq!(key.as_str(), "billing:a.csv");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyPrefix(String);

impl KeyPrefix {
    /// 文字列から KeyPrefix を作成
    pub fn new(prefix: impl Into<String>) -> Self {
        Self(prefix.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// この名前空間でのファイルのキーを作る
    pub fn key_for(&self, file_id: &str) -> FileKey {
        FileKey(format!("{}{}", self.0, file_id))
    }
}

impl Default for KeyPrefix {
    fn default() -> Self {
        Self::new("claimgate:")
    }
}

/// FileKey は store 上の 1 ファイル分のキー（`<prefix><file-identifier>`）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileKey(String);

impl FileKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FileKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

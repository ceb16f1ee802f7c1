use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{AnalysisError, Result};

/// 解析リクエスト1件分のキャンセルトークン
///
/// トークンは呼び出し側が所有し、コアはステージ/バッチ境界で
/// `checkpoint()` を呼ぶだけ。シグナルハンドラは一切導入しない。
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// ステージ境界チェック。発火済みなら `Cancelled` を返す
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AnalysisError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_passes_by_default() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.checkpoint().is_ok());
    }

    #[test]
    fn test_checkpoint_fails_after_cancel() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.checkpoint(), Err(AnalysisError::Cancelled)));
    }

    #[test]
    fn test_clone_shares_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }
}

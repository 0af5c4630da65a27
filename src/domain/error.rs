/// ErrorKind は呼び出し境界でエラーを分類するための種別。
///
/// 各ユースケースのエラー型は `kind()` でこの種別を返す。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    Expired,
    Storage,
    /// 引換失敗の内部原因を隠蔽した汎用エラー。
    RedeemFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Expired => "expired",
            ErrorKind::Storage => "storage",
            ErrorKind::RedeemFailed => "redeem_failed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

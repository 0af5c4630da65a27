use std::future::Future;
use std::time::Duration;

/// `limit` 以内に `fut` が完了しなければ `on_timeout` のエラーを返す。
///
/// タイムアウト時は `fut` ごと破棄されるため、内部で開始したトランザクションは
/// commit されずにロールバックされる。
pub(crate) async fn with_deadline<T, E, F>(
    limit: Option<Duration>,
    fut: F,
    on_timeout: impl FnOnce(Duration) -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout(limit)),
        },
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let result: Result<(), String> = with_deadline(
            Some(Duration::from_millis(10)),
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            },
            |limit| format!("timed out after {:?}", limit),
        )
        .await;
        assert_eq!(result.unwrap_err(), "timed out after 10ms");
    }

    #[tokio::test]
    async fn test_without_limit_passes_through() {
        let result: Result<i32, String> = with_deadline(None, async { Ok(7) }, |_| String::new()).await;
        assert_eq!(result.unwrap(), 7);
    }
}

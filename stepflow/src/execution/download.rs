//! HTTP download with streaming SHA-256 verification.

use super::context::ExecutionContext;
use super::logs::StreamCapture;
use super::{begin, finalize};
use crate::core::StepRunResult;
use crate::errors::{ExecutionError, ExecutionFailure};
use crate::plan::DownloadSpec;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Fetches `spec.url` into `spec.output`.
///
/// The body is streamed to disk while hashed. A non-2xx status is an error.
/// When an expected digest is given and differs from the computed one
/// (compared case-insensitively), the call fails after the file is fully
/// written; the file is left in place.
pub async fn download(
    ctx: &ExecutionContext,
    client: &reqwest::Client,
    spec: &DownloadSpec,
) -> Result<StepRunResult, ExecutionFailure> {
    if spec.url.trim().is_empty() {
        return Err(ExecutionFailure::before_start(
            ExecutionError::InvalidInput("url is required".to_string()),
            ctx.step_name.clone(),
        ));
    }
    if spec.output.as_os_str().is_empty() {
        return Err(ExecutionFailure::before_start(
            ExecutionError::InvalidInput("output is required".to_string()),
            ctx.step_name.clone(),
        ));
    }

    let (mut logs, start) = begin(ctx, spec.url.clone());
    let outcome = match tokio::time::timeout(ctx.timeout, fetch(client, spec, logs.stdout_mut())).await {
        Ok(Ok(())) => Ok(0),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(ExecutionError::Timeout { timeout: ctx.timeout }),
    };
    finalize(ctx, logs, start, outcome)
}

async fn fetch(
    client: &reqwest::Client,
    spec: &DownloadSpec,
    stdout: &mut StreamCapture,
) -> Result<(), ExecutionError> {
    let response = client.get(&spec.url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ExecutionError::HttpStatus(status.as_u16()));
    }

    if let Some(parent) = spec.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(&spec.output).await?;

    let mut hasher = Sha256::new();
    let mut written: u64 = 0;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    debug!(url = %spec.url, bytes = written, "Download complete");

    if let Some(expected) = spec.sha256.as_deref().filter(|s| !s.is_empty()) {
        let actual = hex::encode(hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(ExecutionError::DigestMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
    }

    stdout.write(format!("downloaded {}\n", spec.output.display()).as_bytes());
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunIdentity;

    const BODY: &[u8] = b"hello artifact";

    fn digest(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    fn ctx(dir: &std::path::Path) -> ExecutionContext {
        ExecutionContext::new(RunIdentity::new("wf").with_run_id("r"), "fetch", dir)
    }

    #[tokio::test]
    async fn test_download_verifies_digest() {
        let url = test_server::serve(200, BODY).await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("nested/out.bin");
        let spec = DownloadSpec {
            url: format!("{url}/file"),
            output: output.clone(),
            sha256: Some(digest(BODY).to_uppercase()),
        };

        let result = download(&ctx(dir.path()), &reqwest::Client::new(), &spec)
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(std::fs::read(&output).unwrap(), BODY);
        assert_eq!(result.stdout, format!("downloaded {}\n", output.display()));
    }

    #[tokio::test]
    async fn test_digest_mismatch_fails_after_write() {
        let url = test_server::serve(200, BODY).await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.bin");
        let spec = DownloadSpec {
            url,
            output: output.clone(),
            sha256: Some("00".repeat(32)),
        };

        let failure = download(&ctx(dir.path()), &reqwest::Client::new(), &spec)
            .await
            .unwrap_err();
        match &failure.error {
            ExecutionError::DigestMismatch { expected, actual } => {
                assert_eq!(expected, &"00".repeat(32));
                assert_eq!(actual, &digest(BODY));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!failure.error.is_retryable());
        assert_eq!(std::fs::read(&output).unwrap(), BODY);
        assert!(failure.result.error.unwrap().starts_with("sha256 mismatch"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let url = test_server::serve(404, b"missing").await;
        let dir = tempfile::tempdir().unwrap();
        let spec = DownloadSpec {
            url,
            output: dir.path().join("out.bin"),
            sha256: None,
        };

        let failure = download(&ctx(dir.path()), &reqwest::Client::new(), &spec)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ExecutionError::HttpStatus(404)));
        assert!(!dir.path().join("out.bin").exists());
    }
}

// web_capture.rs - HTTP probing and screenshots for open ports
// Purpose: Fetch each service over HTTP(S), keep a raw header+body dump,
//          and grab a headless browser screenshot of the page

use crate::system::{CommandSpec, SystemShell};
use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub fn scheme_for(service: &str) -> &'static str {
    if service.contains("ssl") { "https" } else { "http" }
}

pub fn target_url(ip: &str, port: u16, service: &str) -> String {
    format!("{}://{}:{}", scheme_for(service), ip, port)
}

pub fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .danger_accept_invalid_certs(true)
        .no_proxy()
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .context("Failed to create HTTP client")
}

/// Status line, headers, blank line, body
pub fn render_response(version: &str, status: StatusCode, headers: &[(String, String)], body: &str) -> String {
    let mut out = format!(
        "{} {} {}\r\n",
        version,
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    );
    for (name, value) in headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str("\r\n");
    out.push_str(body);
    out
}

/// GET the url; `Ok(None)` for a 404
pub async fn fetch(client: &Client, url: &str) -> Result<Option<String>> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }

    let version = format!("{:?}", response.version());
    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .map(|(name, value)| (name.to_string(), String::from_utf8_lossy(value.as_bytes()).to_string()))
        .collect();
    let body = response
        .text()
        .await
        .with_context(|| format!("Failed to read response body from {}", url))?;

    Ok(Some(render_response(&version, status, &headers, &body)))
}

/// PNG bytes as stored on a `Port`
pub fn encode_screenshot(png: &[u8]) -> String {
    urlencoding::encode(&STANDARD.encode(png)).into_owned()
}

pub fn screenshot_path(dir: &Path, ip: &str, port: u16) -> PathBuf {
    dir.join(format!("screenshot_{}_{}.png", ip.replace('.', "-"), port))
}

pub fn screenshot_command(browser: &str, output: &Path, url: &str) -> CommandSpec {
    CommandSpec::new(browser)
        .args([
            "--headless",
            "--disable-gpu",
            "--no-sandbox",
            "--window-size=1280,720",
            "--ignore-certificate-errors",
            "--virtual-time-budget=5000",
        ])
        .arg(format!("--screenshot={}", output.display()))
        .arg(url)
}

/// Encoded screenshot, or `None` when the browser produced no file
pub async fn capture_screenshot<S: SystemShell + ?Sized>(
    shell: &S,
    browser: &str,
    dir: &Path,
    ip: &str,
    port: u16,
    url: &str,
) -> Result<Option<String>> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let output = screenshot_path(dir, ip, port);

    // The browser exit code says little; the file is what counts
    shell.run(&screenshot_command(browser, &output, url)).await?;

    if !output.exists() {
        return Ok(None);
    }
    let png = tokio::fs::read(&output)
        .await
        .with_context(|| format!("Failed to read {}", output.display()))?;
    tokio::fs::remove_file(&output).await.ok();
    Ok(Some(encode_screenshot(&png)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::fake::FakeShell;
    use axum::Router;
    use axum::routing::get;

    #[test]
    fn test_scheme_follows_service_name() {
        assert_eq!(target_url("10.0.0.1", 443, "ssl/http"), "https://10.0.0.1:443");
        assert_eq!(target_url("10.0.0.1", 8080, "http-proxy"), "http://10.0.0.1:8080");
    }

    #[test]
    fn test_render_like_curl_include() {
        let headers = vec![("server".to_string(), "nginx".to_string())];
        let raw = render_response("HTTP/1.1", StatusCode::OK, &headers, "<html></html>");
        assert_eq!(raw, "HTTP/1.1 200 OK\r\nserver: nginx\r\n\r\n<html></html>");
    }

    #[test]
    fn test_screenshot_encoding_is_url_safe() {
        let encoded = encode_screenshot(&[0xfb, 0xff, 0xfe]);
        // "+//+" in plain base64
        assert_eq!(encoded, "%2B%2F%2F%2B");
    }

    #[tokio::test]
    async fn test_capture_reads_and_removes_png() {
        let dir = tempfile::tempdir().unwrap();
        let shell = FakeShell::with_commands(&["chromium"]);
        let png = screenshot_path(dir.path(), "10.0.0.2", 80);
        std::fs::write(&png, b"PNG").unwrap();

        let shot = capture_screenshot(&shell, "chromium", dir.path(), "10.0.0.2", 80, "http://10.0.0.2:80")
            .await
            .unwrap();

        assert_eq!(shot, Some(encode_screenshot(b"PNG")));
        assert!(!png.exists());
        assert_eq!(shell.calls_matching("--screenshot="), 1);
        assert_eq!(shell.calls_matching("--headless"), 1);
    }

    #[tokio::test]
    async fn test_capture_without_output_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let shell = FakeShell::default();
        let shot = capture_screenshot(&shell, "chromium", dir.path(), "10.0.0.3", 80, "http://10.0.0.3:80")
            .await
            .unwrap();
        assert!(shot.is_none());
    }

    #[tokio::test]
    async fn test_fetch_skips_not_found() {
        let app = Router::new().route("/", get(|| async { "hello" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.ok() });

        let client = build_client(5).unwrap();
        let found = fetch(&client, &format!("http://{}/", addr)).await.unwrap().unwrap();
        assert!(found.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(found.ends_with("\r\n\r\nhello"));

        let missing = fetch(&client, &format!("http://{}/missing", addr)).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_fetch_fails_on_truncated_body() {
        let app = Router::new().route(
            "/",
            get(|| async {
                let chunks: Vec<Result<&'static str, std::io::Error>> = vec![
                    Ok("<html>partial"),
                    Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
                ];
                axum::body::Body::from_stream(futures::stream::iter(chunks))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.ok() });

        let client = build_client(5).unwrap();
        let result = fetch(&client, &format!("http://{}/", addr)).await;
        assert!(result.is_err());
    }
}

// auth.rs - Bearer token authentication for the API
// Purpose: Load or mint the API token, print it once at startup, and reject
//          requests without a valid `Authorization: Bearer <token>` header

use crate::logger::Logger;
use anyhow::{Context, Result};
use axum::Json;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use colored::*;
use rand::RngCore;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

/// Read the token from `path`, or generate one (32 random bytes, hex) and save it
pub fn load_or_create_token(path: &Path, logger: &Logger) -> Result<String> {
    if path.exists() {
        let token = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
            .trim()
            .to_string();
        if !token.is_empty() {
            logger.debug(format!("Using existing token from {}", path.display()));
            return Ok(token);
        }
    }

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = hex::encode(bytes);
    std::fs::write(path, &token).with_context(|| format!("Failed to write {}", path.display()))?;
    logger.debug(format!("Generated and saved new token to {}", path.display()));
    Ok(token)
}

pub fn print_token_banner(token: &str) {
    println!();
    println!("{}", "═".repeat(80).yellow());
    println!("{}", format!("  API TOKEN: {}", token).yellow().bold());
    println!("{}", "  Send it as: Authorization: Bearer <token>".yellow());
    println!("{}", "═".repeat(80).yellow());
    println!();
}

/// Compares every byte regardless of where the first mismatch is
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    MissingHeader,
    InvalidToken,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let detail = match self {
            AuthRejection::MissingHeader => "Invalid or missing Authorization header",
            AuthRejection::InvalidToken => "Invalid token",
        };
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Unauthorized", "detail": detail})),
        )
            .into_response()
    }
}

pub struct TokenAuth {
    tokens: Vec<String>,
    /// token -> Unix seconds after which it is refused
    expiry: HashMap<String, f64>,
    exclude_paths: Vec<String>,
    logger: Logger,
}

impl TokenAuth {
    pub fn new(tokens: Vec<String>, exclude_paths: Vec<String>, logger: Logger) -> Self {
        Self {
            tokens,
            expiry: HashMap::new(),
            exclude_paths,
            logger,
        }
    }

    pub fn with_expiry(mut self, token: &str, expires_at: f64) -> Self {
        self.expiry.insert(token.to_string(), expires_at);
        self
    }

    /// Entries ending in '/' match only themselves (with or without that slash);
    /// others also cover their sub-paths
    pub fn is_path_excluded(&self, path: &str) -> bool {
        self.exclude_paths.iter().any(|excluded| {
            if path == excluded {
                return true;
            }
            match excluded.strip_suffix('/') {
                Some(bare) => !bare.is_empty() && path == bare,
                None => path
                    .strip_prefix(excluded.as_str())
                    .is_some_and(|rest| rest.starts_with('/')),
            }
        })
    }

    pub fn is_token_valid(&self, token: &str, now: f64) -> bool {
        if self.expiry.get(token).is_some_and(|expires_at| *expires_at < now) {
            return false;
        }
        self.tokens
            .iter()
            .fold(false, |found, valid| constant_time_eq(token.as_bytes(), valid.as_bytes()) | found)
    }

    pub fn check(&self, path: &str, headers: &HeaderMap, now: f64) -> Result<(), AuthRejection> {
        if self.tokens.is_empty() || self.is_path_excluded(path) {
            return Ok(());
        }

        let token = headers
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or(AuthRejection::MissingHeader)?;

        if !self.is_token_valid(token, now) {
            return Err(AuthRejection::InvalidToken);
        }
        Ok(())
    }
}

pub async fn require_token(State(auth): State<Arc<TokenAuth>>, request: Request, next: Next) -> Response {
    let now = crate::model::unix_now();
    match auth.check(request.uri().path(), request.headers(), now) {
        Ok(()) => next.run(request).await,
        Err(rejection) => {
            let client = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            auth.logger.warn(format!("Authentication failed ({:?}) - IP: {}", rejection, client));
            rejection.into_response()
        }
    }
}

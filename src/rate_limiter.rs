// rate_limiter.rs - Sliding window rate limiting per client IP

use axum::Json;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allowed { remaining: usize, reset_secs: f64 },
    Limited { retry_after: f64 },
}

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    clients: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn plural(count: u64, word: &str) -> String {
    if count > 1 { format!("{}s", word) } else { word.to_string() }
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request from `ip` at `now` unless its window is full
    pub fn check(&self, ip: IpAddr, now: Instant) -> Decision {
        let Ok(mut clients) = self.clients.lock() else {
            return Decision::Allowed { remaining: self.max_requests, reset_secs: 0.0 };
        };
        // Forget clients whose whole window has passed
        clients.retain(|_, times| {
            times
                .back()
                .is_some_and(|last| now.saturating_duration_since(*last) <= self.window)
        });
        let times = clients.entry(ip).or_default();

        while times
            .front()
            .is_some_and(|first| now.saturating_duration_since(*first) > self.window)
        {
            times.pop_front();
        }

        if times.len() >= self.max_requests {
            let oldest = times.front().copied().unwrap_or(now);
            let retry_after = self.window.as_secs_f64() - now.saturating_duration_since(oldest).as_secs_f64();
            return Decision::Limited {
                retry_after: round2(retry_after),
            };
        }

        times.push_back(now);
        let oldest = times.front().copied().unwrap_or(now);
        Decision::Allowed {
            remaining: self.max_requests - times.len(),
            reset_secs: round2(self.window.as_secs_f64() - now.saturating_duration_since(oldest).as_secs_f64()),
        }
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.clients.lock().map(|clients| clients.len()).unwrap_or_default()
    }

    pub fn limit_exceeded(&self, retry_after: f64) -> Response {
        let window = self.window.as_secs();
        let detail = format!(
            "Limit of {} {} per {} {}",
            self.max_requests,
            plural(self.max_requests as u64, "request"),
            window,
            plural(window, "second")
        );
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "Rate limit exceeded",
                "detail": detail,
                "retry_after": retry_after,
            })),
        )
            .into_response()
    }
}

pub async fn limit_requests(State(limiter): State<Arc<RateLimiter>>, request: Request, next: Next) -> Response {
    // Without connection info every caller shares one bucket
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    match limiter.check(ip, Instant::now()) {
        Decision::Limited { retry_after } => limiter.limit_exceeded(retry_after),
        Decision::Allowed { remaining, reset_secs } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(limiter.max_requests));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            if let Ok(reset) = HeaderValue::from_str(&reset_secs.to_string()) {
                headers.insert("x-ratelimit-reset", reset);
            }
            response
        }
    }
}

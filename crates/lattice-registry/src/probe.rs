//! HTTP health probes.
//!
//! One probe is a single GET against a service's declared health path,
//! bounded by a timeout. Probes never panic and never surface errors to
//! the caller; every outcome folds into a [`ProbeReport`] the state
//! machine consumes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use http_body_util::BodyExt;
use tracing::debug;

/// Outcome of a single health probe.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ProbeReport {
    /// 2xx within the timeout. `metadata` holds the top-level keys of the
    /// response body when it is a JSON object.
    Ok {
        latency_ms: f64,
        metadata: HashMap<String, serde_json::Value>,
    },
    /// Non-2xx response within the timeout.
    BadStatus { latency_ms: f64, status: u16 },
    /// The probe did not complete within the timeout.
    TimedOut { latency_ms: f64 },
    /// Connection or request failure.
    Failed { error: String },
}

/// Probe `http://{address}{path}` once, bounded by `timeout`.
pub(crate) async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeReport {
    let uri = format!("http://{address}{path}");
    let started = Instant::now();

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "health probe connection failed");
                return ProbeReport::Failed {
                    error: e.to_string(),
                };
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "health probe handshake failed");
                return ProbeReport::Failed {
                    error: e.to_string(),
                };
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "lattice-registry/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            // A malformed health path or host makes the URI invalid.
            Err(e) => {
                debug!(error = %e, %uri, "health probe request build failed");
                return ProbeReport::Failed {
                    error: e.to_string(),
                };
            }
        };

        match sender.send_request(req).await {
            Ok(resp) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                let status = resp.status();
                if status.is_success() {
                    let metadata = match resp.into_body().collect().await {
                        Ok(collected) => parse_metadata(&collected.to_bytes()),
                        Err(_) => HashMap::new(),
                    };
                    ProbeReport::Ok {
                        latency_ms,
                        metadata,
                    }
                } else {
                    debug!(status = %status, %uri, "health probe non-2xx");
                    ProbeReport::BadStatus {
                        latency_ms,
                        status: status.as_u16(),
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, %uri, "health probe request failed");
                ProbeReport::Failed {
                    error: e.to_string(),
                }
            }
        }
    })
    .await;

    match result {
        Ok(report) => report,
        Err(_) => {
            debug!(%uri, "health probe timed out");
            ProbeReport::TimedOut {
                latency_ms: timeout.as_secs_f64() * 1000.0,
            }
        }
    }
}

/// Top-level keys of a JSON object body; anything else yields nothing.
fn parse_metadata(body: &[u8]) -> HashMap<String, serde_json::Value> {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
        _ => HashMap::new(),
    }
}

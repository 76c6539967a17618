use mongodb::options::{ClientOptions, ServerAddress};
use std::time::{Duration, Instant};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Best-effort DNS and TCP diagnostics for each target node, logged before
/// the real client connects. Failures here are informational only; the
/// authoritative error comes from the driver's own connection attempt.
pub(crate) async fn log_target_preflight(options: &ClientOptions) {
    if options.hosts.is_empty() {
        tracing::warn!("target mongodb preflight found no host:port nodes in URI");
        return;
    }
    let timeout = crate::env::env_millis("MONGODB_CONNECT_TIMEOUT_MS")
        .or(options.connect_timeout)
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT);
    tracing::info!(
        nodes = ?options.hosts.iter().map(ToString::to_string).collect::<Vec<_>>(),
        timeout_ms = timeout.as_millis() as u64,
        "target mongodb preflight starting"
    );

    for address in &options.hosts {
        let ServerAddress::Tcp { host, port } = address else {
            continue;
        };
        let port = port.unwrap_or(27017);
        let node = format!("{host}:{port}");

        match tokio::net::lookup_host((host.as_str(), port)).await {
            Ok(resolved) => {
                let mut addresses: Vec<String> =
                    resolved.map(|addr| addr.ip().to_string()).collect();
                addresses.sort();
                addresses.dedup();
                tracing::info!(node, ?addresses, "preflight DNS resolved");
            }
            Err(error) => {
                tracing::warn!(node, %error, "preflight DNS lookup failed");
                continue;
            }
        }

        let started = Instant::now();
        match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&node)).await {
            Ok(Ok(_stream)) => {
                tracing::info!(
                    node,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "preflight TCP connect succeeded"
                );
            }
            Ok(Err(error)) => {
                tracing::warn!(
                    node,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    %error,
                    "preflight TCP connect failed"
                );
            }
            Err(_) => {
                tracing::warn!(
                    node,
                    timeout_ms = timeout.as_millis() as u64,
                    "preflight TCP connect timed out"
                );
            }
        }
    }
}
